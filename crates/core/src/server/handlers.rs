use hyper::{Response, StatusCode, header};
use bytes::Bytes;
use serde_json::{Value, json};
use tracing::info;

use super::AppState;
use super::router::{BoxedBody, error_response};
use super::stream::EventStreamBody;
use crate::domain::key::{CapabilityKey, Permission, generate_secret, hash_secret};
use crate::error::ApiError;
use crate::services::ledger::AppendRequest;
use crate::services::limits::LimiterDecision;
use crate::wire::{
  ApiKeyCreateResponse, AppendParams, CapabilityCheckParams, CapabilityCheckResponse,
  CapabilityCheckResult, ClaimListResponse, MintedKey, WorkspaceCreateParams,
  WorkspaceCreateResponse,
};

fn parse_body<T: serde::de::DeserializeOwned>(body: Value) -> Result<T, ApiError> {
  serde_json::from_value(body).map_err(|e| ApiError::InvalidRequest(format!("invalid body: {e}")))
}

// ---- bootstrap ----

/// Create a workspace and mint its workspace-scoped key tiers. The
/// plaintext secrets appear in this response and nowhere else.
pub(super) fn create_workspace(state: &AppState, body: Value) -> Result<Value, ApiError> {
  let params: WorkspaceCreateParams = parse_body(body)?;
  if params.name.trim().is_empty() {
    return Err(ApiError::InvalidRequest("`name` is required".into()));
  }
  let now = state.clock.now();
  let mut store = state.store.lock().expect("store lock");
  let workspace = store.create_workspace(&params.name, now)?;

  let mut keys = Vec::new();
  for permission in [Permission::Read, Permission::Append, Permission::Write] {
    let secret = generate_secret();
    store.insert_capability_key(&CapabilityKey {
      key_hash: hash_secret(&secret),
      workspace_id: workspace.id.clone(),
      scope: crate::domain::scope::Scope::Workspace,
      permission,
      expires_at: None,
      revoked_at: None,
      created_at: now,
    })?;
    keys.push(MintedKey {
      key: secret,
      permission: permission.as_str().to_string(),
    });
  }
  info!(event = "workspace_created", workspace = %workspace.id, name = %params.name);
  Ok(json!(WorkspaceCreateResponse {
    workspace_id: workspace.id,
    name: workspace.name,
    keys,
  }))
}

/// Claim an anonymous workspace with a write key. Exactly once; a second
/// claim conflicts.
pub(super) fn claim_workspace(state: &AppState, body: Value) -> Result<Value, ApiError> {
  #[derive(serde::Deserialize)]
  struct Params {
    key: String,
  }
  let params: Params = parse_body(body)?;
  let resolved = state.resolver.resolve(&params.key, None, Permission::Write)?;
  let mut store = state.store.lock().expect("store lock");
  store
    .claim_workspace(&resolved.workspace_id)
    .map_err(|err| match err {
      crate::store::StoreError::WorkspaceAlreadyClaimed => {
        ApiError::InvalidRequest("workspace is already claimed".into())
      }
      other => ApiError::Internal(other),
    })?;
  info!(event = "workspace_claimed", workspace = %resolved.workspace_id);
  Ok(json!({ "workspace_id": resolved.workspace_id, "claimed": true }))
}

// ---- ledger ----

pub(super) fn append(
  state: &AppState,
  raw_key: &str,
  path: &str,
  body: Value,
) -> Result<Value, ApiError> {
  let params: AppendParams = parse_body(body)?;
  let resolved = state.resolver.resolve(raw_key, Some(path), Permission::Append)?;
  let stored = state.ledger.append(
    &resolved,
    AppendRequest {
      path: path.to_string(),
      author: params.author,
      kind: params.kind,
      content: params.content,
      ref_id: params.ref_id,
      expires_in_seconds: params.expires_in_seconds,
    },
  )?;
  Ok(json!(stored))
}

pub(super) fn list_appends(
  state: &AppState,
  raw_key: &str,
  path: &str,
  kind: Option<&str>,
  author: Option<&str>,
) -> Result<Value, ApiError> {
  let resolved = state.resolver.resolve(raw_key, Some(path), Permission::Read)?;
  let appends = state.ledger.list(&resolved, path, kind, author)?;
  let count = appends.len();
  Ok(json!({ "appends": appends, "count": count }))
}

// ---- claims ----

pub(super) fn list_claims(
  state: &AppState,
  raw_key: &str,
  folder_path: &str,
  author: Option<&str>,
) -> Result<Value, ApiError> {
  let resolved = state
    .resolver
    .resolve(raw_key, Some(folder_path), Permission::Read)?;
  let claims = state.claims.list(&resolved, folder_path, author)?;
  let count = claims.len();
  Ok(json!(ClaimListResponse { claims, count }))
}

// ---- api keys ----

pub(super) fn create_api_key(state: &AppState, raw_key: &str) -> Result<Value, ApiError> {
  let resolved = state.resolver.resolve(raw_key, None, Permission::Write)?;
  match state.api_key_limiter.check_and_record(&resolved.workspace_id) {
    LimiterDecision::Allowed => {}
    LimiterDecision::Rejected { retry_after_secs } => {
      info!(
        event = "api_key_rate_limited",
        workspace = %resolved.workspace_id,
        retry_after_secs,
      );
      return Err(ApiError::RateLimited {
        retry_after_secs: Some(retry_after_secs),
      });
    }
  }
  let secret = generate_secret();
  {
    let mut store = state.store.lock().expect("store lock");
    store.insert_api_key(
      &hash_secret(&secret),
      &resolved.workspace_id,
      resolved.permission,
      state.clock.now(),
    )?;
  }
  info!(event = "api_key_created", workspace = %resolved.workspace_id);
  Ok(json!(ApiKeyCreateResponse {
    key: secret,
    permission: resolved.permission.as_str().to_string(),
  }))
}

// ---- capability check ----

pub(super) fn check_capabilities(state: &AppState, body: Value) -> Result<Value, ApiError> {
  let params: CapabilityCheckParams = parse_body(body)?;
  if params.keys.len() > 100 {
    return Err(ApiError::InvalidRequest("at most 100 keys per check".into()));
  }
  let results = params
    .keys
    .into_iter()
    .map(|raw| match state.resolver.resolve(&raw, None, Permission::Read) {
      Ok(resolved) => CapabilityCheckResult {
        key: raw,
        valid: true,
        permission: Some(resolved.permission.as_str().to_string()),
        scope_kind: Some(resolved.scope.kind().to_string()),
        scope_path: Some(resolved.scope.path().to_string()),
        error: None,
      },
      // Same public code no matter why the key failed.
      Err(err) => CapabilityCheckResult {
        key: raw,
        valid: false,
        permission: None,
        scope_kind: None,
        scope_path: None,
        error: Some(err.public_code().to_string()),
      },
    })
    .collect();
  Ok(json!(CapabilityCheckResponse { results }))
}

// ---- jobs ----

pub(super) fn poll_job(state: &AppState, raw_key: &str) -> Result<Value, ApiError> {
  let view = state.jobs.poll(raw_key)?;
  Ok(json!(view))
}

// ---- events ----

/// Subscribe channel: resolve the key, register with the fan-out under
/// the key's scope, and stream matching events as ndjson until the
/// client disconnects.
pub(super) fn subscribe(state: &AppState, raw_key: &str) -> Response<BoxedBody> {
  let resolved = match state.resolver.resolve(raw_key, None, Permission::Read) {
    Ok(r) => r,
    Err(err) => return error_response(&err),
  };
  let (subscription, rx) = state
    .fanout
    .subscribe(&resolved.workspace_id, resolved.scope.clone());
  let greeting = json!({
    "ok": true,
    "data": {
      "subscribed": true,
      "scope_kind": resolved.scope.kind(),
      "scope_path": resolved.scope.path(),
    }
  });
  let mut line = serde_json::to_vec(&greeting).unwrap_or_default();
  line.push(b'\n');
  let body = EventStreamBody::new(state.fanout.clone(), subscription, rx, Bytes::from(line));
  info!(
    event = "events_subscribed",
    workspace = %resolved.workspace_id,
    scope_kind = resolved.scope.kind(),
  );
  Response::builder()
    .status(StatusCode::OK)
    .header(header::CONTENT_TYPE, "application/x-ndjson")
    .body(BoxedBody::new(body))
    .expect("build response")
}
