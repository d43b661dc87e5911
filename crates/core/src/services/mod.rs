use std::sync::{Arc, Mutex};

use crate::store::SqliteStore;

pub mod claims;
pub mod fanout;
pub mod jobs;
pub mod ledger;
pub mod limits;
pub mod resolver;

/// The single SQLite connection shared by all request handlers. Locking
/// per operation also serializes the claim transaction with everything
/// else that touches the ledger.
pub type SharedStore = Arc<Mutex<SqliteStore>>;

pub fn shared_store(store: SqliteStore) -> SharedStore {
  Arc::new(Mutex::new(store))
}
