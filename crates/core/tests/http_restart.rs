//! The ledger and minted keys survive a daemon restart on the same
//! database file.

use std::sync::Arc;

use serde_json::json;

use relay_core::clock::SystemClock;
use relay_core::config::Config;
use relay_core::server::DaemonHandle;
use relay_core::store::SqliteStore;
use test_support::{HttpClient, TempData};

async fn start_daemon(data: &TempData) -> (DaemonHandle, HttpClient) {
  let config = Config {
    bind: "127.0.0.1:0".into(),
    db_path: data.db_path().to_string_lossy().into_owned(),
    ..Config::default()
  };
  let store = SqliteStore::open(data.db_path()).expect("open store");
  let state = relay_core::server::AppState::build(config, store, Arc::new(SystemClock));
  let handle = relay_core::server::start(state).await.expect("start daemon");
  let client = HttpClient::new(handle.local_addr());
  (handle, client)
}

#[tokio::test]
async fn appends_and_keys_survive_restart() {
  let data = TempData::new();

  let (handle, client) = start_daemon(&data).await;
  let (status, envelope) = client.post("/workspaces", json!({"name": "durable"})).await;
  assert_eq!(status, 200);
  let ws = envelope.data.unwrap();
  let append_key = ws["keys"]
    .as_array()
    .unwrap()
    .iter()
    .find(|k| k["permission"] == "append")
    .unwrap()["key"]
    .as_str()
    .unwrap()
    .to_string();

  let (status, _) = client
    .post(
      &format!("/a/{append_key}/files/notes.md"),
      json!({"author": "a", "kind": "comment", "content": "first"}),
    )
    .await;
  assert_eq!(status, 200);
  handle.stop();

  let (handle, client) = start_daemon(&data).await;
  let (status, _) = client
    .post(
      &format!("/a/{append_key}/files/notes.md"),
      json!({"author": "a", "kind": "comment", "content": "second"}),
    )
    .await;
  assert_eq!(status, 200, "key minted before restart still resolves");

  let (status, envelope) = client
    .get(&format!("/a/{append_key}/files/notes.md"))
    .await;
  assert_eq!(status, 200);
  let listing = envelope.data.unwrap();
  assert_eq!(listing["count"], 2);
  assert_eq!(listing["appends"][0]["seq"], 1);
  assert_eq!(listing["appends"][1]["seq"], 2);

  handle.stop();
}
