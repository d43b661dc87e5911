use std::sync::Arc;

use crate::clock::Clock;
use crate::domain::claim::{ClaimView, derive_status, expires_in_seconds};
use crate::error::Result;
use crate::services::SharedStore;
use crate::services::ledger::map_store_error;
use crate::services::resolver::ResolvedKey;

/// Read side of the task/claim state machine: folder- and
/// workspace-level claim listings with derived status. The write side
/// (claim/renew/terminal appends) goes through the ledger, which owns
/// the atomic claim transaction.
pub struct ClaimService {
  store: SharedStore,
  clock: Arc<dyn Clock>,
}

impl ClaimService {
  pub fn new(store: SharedStore, clock: Arc<dyn Clock>) -> Self {
    Self { store, clock }
  }

  /// All claims (active and expired) under `scope_path`, optionally
  /// filtered by author. Status and `expires_in_seconds` are derived at
  /// this instant; nothing is written.
  pub fn list(
    &self,
    key: &ResolvedKey,
    scope_path: &str,
    author: Option<&str>,
  ) -> Result<Vec<ClaimView>> {
    let now = self.clock.now();
    let rows = {
      let store = self.store.lock().expect("store lock");
      store
        .claims_under_scope(&key.workspace_id, Some(scope_path), author)
        .map_err(map_store_error)?
    };
    Ok(
      rows
        .into_iter()
        .map(|row| ClaimView {
          status: derive_status(now, row.deadline, row.terminal),
          expires_in_seconds: expires_in_seconds(now, row.deadline),
          claim_id: row.claim_id,
          task_id: row.task_id,
          file_path: row.file_path,
          author: row.author,
          expires_at: row.deadline,
        })
        .collect(),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::{Duration, Utc};

  use crate::clock::ManualClock;
  use crate::domain::append::AppendKind;
  use crate::domain::claim::ClaimStatus;
  use crate::domain::key::Permission;
  use crate::domain::scope::Scope;
  use crate::services::shared_store;
  use crate::store::{AppendInsert, ClaimInsert, SqliteStore};

  fn fixture() -> (ClaimService, SharedStore, ManualClock, ResolvedKey) {
    let mut store = SqliteStore::open_in_memory().unwrap();
    let ws = store.create_workspace("test", Utc::now()).unwrap();
    let store = shared_store(store);
    let clock = ManualClock::new(Utc::now());
    let service = ClaimService::new(store.clone(), Arc::new(clock.clone()));
    let key = ResolvedKey {
      key_hash: "h".into(),
      workspace_id: ws.id,
      scope: Scope::Workspace,
      permission: Permission::Read,
    };
    (service, store, clock, key)
  }

  fn seed_claim(store: &SharedStore, ws: &str, path: &str, author: &str, ttl_secs: i64, now: chrono::DateTime<Utc>) {
    let mut store = store.lock().unwrap();
    let task = store
      .append_entry(AppendInsert {
        workspace_id: ws.to_string(),
        path: path.to_string(),
        author: "poster".into(),
        kind: AppendKind::Task,
        ref_id: None,
        expires_at: None,
        content: "task".into(),
        content_preview: "task".into(),
        now,
      })
      .unwrap();
    store
      .insert_claim(ClaimInsert {
        workspace_id: ws.to_string(),
        path: path.to_string(),
        author: author.to_string(),
        task_id: task.id,
        expires_at: now + Duration::seconds(ttl_secs),
        now,
        wip_limit: 10,
        wip_scope: None,
      })
      .unwrap();
  }

  #[test]
  fn listing_filters_by_scope_and_author() {
    let (service, store, clock, key) = fixture();
    let now = clock.now();
    seed_claim(&store, &key.workspace_id, "/projects/a.md", "agent-a", 900, now);
    seed_claim(&store, &key.workspace_id, "/projects/b.md", "agent-b", 900, now);
    seed_claim(&store, &key.workspace_id, "/notes/c.md", "agent-a", 900, now);

    let under_projects = service.list(&key, "/projects/", None).unwrap();
    assert_eq!(under_projects.len(), 2);

    let only_a = service.list(&key, "/projects/", Some("agent-a")).unwrap();
    assert_eq!(only_a.len(), 1);
    assert_eq!(only_a[0].file_path, "/projects/a.md");
  }

  #[test]
  fn expiry_is_derived_at_listing_time() {
    let (service, store, clock, key) = fixture();
    let now = clock.now();
    seed_claim(&store, &key.workspace_id, "/projects/a.md", "agent-a", 120, now);

    let before = service.list(&key, "/projects/", None).unwrap();
    assert_eq!(before[0].status, ClaimStatus::Active);
    assert_eq!(before[0].expires_in_seconds, 120);

    clock.advance(Duration::seconds(120));
    let after = service.list(&key, "/projects/", None).unwrap();
    assert_eq!(after[0].status, ClaimStatus::Expired);
    assert_eq!(after[0].expires_in_seconds, 0, "pinned at zero, never negative");
  }
}
