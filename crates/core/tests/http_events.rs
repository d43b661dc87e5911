//! Event stream behaviour over real HTTP: greeting frame, scope
//! filtering, and cleanup after disconnect.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::time::timeout;

use relay_core::clock::ManualClock;
use relay_core::config::Config;
use relay_core::domain::key::{CapabilityKey, Permission, generate_secret, hash_secret};
use relay_core::domain::scope::Scope;
use relay_core::server::{AppState, DaemonHandle};
use relay_core::store::SqliteStore;
use test_support::{HttpClient, NdjsonReader, poll_until};

struct TestEnv {
  handle: DaemonHandle,
  client: HttpClient,
  append_key: String,
  read_key: String,
  workspace_id: String,
}

async fn start_env() -> TestEnv {
  let clock = ManualClock::new(Utc::now());
  let config = Config {
    bind: "127.0.0.1:0".into(),
    ..Config::default()
  };
  let store = SqliteStore::open_in_memory().expect("open store");
  let state = AppState::build(config, store, Arc::new(clock));
  let handle = relay_core::server::start(state).await.expect("start daemon");
  let client = HttpClient::new(handle.local_addr());

  let (status, envelope) = client.post("/workspaces", json!({"name": "events"})).await;
  assert_eq!(status, 200);
  let data = envelope.data.expect("workspace data");
  let key_for = |permission: &str| -> String {
    data["keys"]
      .as_array()
      .unwrap()
      .iter()
      .find(|k| k["permission"] == permission)
      .expect("minted key")["key"]
      .as_str()
      .unwrap()
      .to_string()
  };
  TestEnv {
    append_key: key_for("append"),
    read_key: key_for("read"),
    workspace_id: data["workspace_id"].as_str().unwrap().to_string(),
    handle,
    client,
  }
}

async fn next_frame(reader: &mut NdjsonReader) -> serde_json::Value {
  timeout(Duration::from_secs(5), reader.next_line())
    .await
    .expect("frame before timeout")
    .expect("stream still open")
}

#[tokio::test]
async fn subscriber_receives_appends_after_greeting() {
  let env = start_env().await;

  let resp = env
    .client
    .get_streaming(&format!("/events/{}", env.read_key))
    .await;
  assert_eq!(resp.status(), 200);
  assert_eq!(
    resp.headers()[hyper::header::CONTENT_TYPE],
    "application/x-ndjson"
  );
  let mut reader = NdjsonReader::new(resp.into_body());

  let greeting = next_frame(&mut reader).await;
  assert_eq!(greeting["ok"], true);
  assert_eq!(greeting["data"]["subscribed"], true);
  assert_eq!(greeting["data"]["scope_kind"], "workspace");

  let (status, _) = env
    .client
    .post(
      &format!("/a/{}/files/notes.md", env.append_key),
      json!({"author": "agent-a", "kind": "comment", "content": "hello"}),
    )
    .await;
  assert_eq!(status, 200);

  let event = next_frame(&mut reader).await;
  assert_eq!(event["file_path"], "/notes.md");
  assert_eq!(event["kind"], "comment");
  assert_eq!(event["author"], "agent-a");
  assert_eq!(event["content_preview"], "hello");

  env.handle.stop();
}

#[tokio::test]
async fn folder_scoped_subscriber_only_sees_its_subtree() {
  let env = start_env().await;

  // Seed a read key confined to the projects folder.
  let scoped = generate_secret();
  {
    let state = env.handle.state();
    let mut store = state.store.lock().expect("store lock");
    store
      .insert_capability_key(&CapabilityKey {
        key_hash: hash_secret(&scoped),
        workspace_id: env.workspace_id.clone(),
        scope: Scope::Folder("/projects/".into()),
        permission: Permission::Read,
        expires_at: None,
        revoked_at: None,
        created_at: Utc::now(),
      })
      .expect("seed key");
  }

  let resp = env
    .client
    .get_streaming(&format!("/events/{scoped}"))
    .await;
  let mut reader = NdjsonReader::new(resp.into_body());
  let greeting = next_frame(&mut reader).await;
  assert_eq!(greeting["data"]["scope_kind"], "folder");
  assert_eq!(greeting["data"]["scope_path"], "/projects/");

  // An append outside the scope, then one inside. Only the second may
  // arrive, so seeing it first proves the other was filtered.
  for (path, content) in [("other/a.md", "outside"), ("projects/b.md", "inside")] {
    let (status, _) = env
      .client
      .post(
        &format!("/a/{}/files/{path}", env.append_key),
        json!({"author": "agent-a", "kind": "comment", "content": content}),
      )
      .await;
    assert_eq!(status, 200);
  }

  let event = next_frame(&mut reader).await;
  assert_eq!(event["file_path"], "/projects/b.md");
  assert_eq!(event["content_preview"], "inside");

  env.handle.stop();
}

#[tokio::test]
async fn disconnect_removes_the_subscription() {
  let env = start_env().await;
  let fanout = env.handle.state().fanout.clone();
  assert_eq!(fanout.subscriber_count(), 0);

  let resp = env
    .client
    .get_streaming(&format!("/events/{}", env.read_key))
    .await;
  let mut reader = NdjsonReader::new(resp.into_body());
  let _ = next_frame(&mut reader).await;
  assert_eq!(fanout.subscriber_count(), 1);

  drop(reader);
  let cleaned = poll_until(
    Duration::from_secs(5),
    Duration::from_millis(20),
    || async { fanout.subscriber_count() == 0 },
  )
  .await;
  assert!(cleaned, "subscription removed after client disconnect");

  env.handle.stop();
}

#[tokio::test]
async fn subscribe_with_unknown_key_is_a_uniform_404() {
  let env = start_env().await;
  let (status, envelope) = env.client.get("/events/rk_doesnotexist").await;
  assert_eq!(status, 404);
  assert_eq!(envelope.error.unwrap().code, "PERMISSION_DENIED");
  env.handle.stop();
}
