use std::sync::Arc;

use chrono::Duration;
use tracing::info;

use crate::clock::Clock;
use crate::domain::append::{Append, AppendKind, preview};
use crate::error::{ApiError, Result};
use crate::services::fanout::{AppendEvent, EventFanout};
use crate::services::resolver::ResolvedKey;
use crate::services::SharedStore;
use crate::domain::scope::Scope;
use crate::store::{AppendFilters, AppendInsert, ClaimInsert, StoreError};

/// Policy knobs for the ledger, taken from config at startup.
#[derive(Debug, Clone)]
pub struct LedgerPolicy {
  /// Claim TTL applied when the caller does not supply one.
  pub default_claim_ttl_secs: u64,
  /// Upper bound on caller-supplied claim/renew TTLs.
  pub max_claim_ttl_secs: u64,
  /// Max concurrent active claims per author within the key's scope.
  pub wip_limit: usize,
}

/// Caller-facing append request, already past key resolution.
#[derive(Debug, Clone)]
pub struct AppendRequest {
  pub path: String,
  pub author: String,
  pub kind: String,
  pub content: Option<String>,
  pub ref_id: Option<String>,
  pub expires_in_seconds: Option<u64>,
}

/// The append ledger: validates typed entries, writes them through the
/// store transactionally, and notifies the fan-out after (never before) a
/// successful write.
pub struct LedgerService {
  store: SharedStore,
  fanout: Arc<EventFanout>,
  clock: Arc<dyn Clock>,
  policy: LedgerPolicy,
}

impl LedgerService {
  pub fn new(
    store: SharedStore,
    fanout: Arc<EventFanout>,
    clock: Arc<dyn Clock>,
    policy: LedgerPolicy,
  ) -> Self {
    Self {
      store,
      fanout,
      clock,
      policy,
    }
  }

  pub fn append(&self, key: &ResolvedKey, req: AppendRequest) -> Result<Append> {
    let kind = AppendKind::parse(&req.kind)
      .ok_or_else(|| ApiError::InvalidAppendType(req.kind.clone()))?;
    if req.author.trim().is_empty() {
      return Err(ApiError::InvalidRequest("`author` is required".into()));
    }
    match kind.ref_target() {
      Some(_) if req.ref_id.is_none() => {
        return Err(ApiError::InvalidRequest(format!("`ref` is required for `{kind}`")));
      }
      None if req.ref_id.is_some() => {
        return Err(ApiError::InvalidRequest(format!("`ref` is not allowed on `{kind}`")));
      }
      _ => {}
    }
    if req.expires_in_seconds.is_some() && !kind.carries_deadline() {
      return Err(ApiError::InvalidRequest(format!(
        "`expires_in_seconds` is not allowed on `{kind}`"
      )));
    }

    let now = self.clock.now();
    let expires_at = if kind.carries_deadline() {
      let ttl = req
        .expires_in_seconds
        .unwrap_or(self.policy.default_claim_ttl_secs)
        .min(self.policy.max_claim_ttl_secs);
      if ttl == 0 {
        return Err(ApiError::InvalidRequest("`expires_in_seconds` must be positive".into()));
      }
      Some(now + Duration::seconds(ttl as i64))
    } else {
      None
    };

    let content = req.content.unwrap_or_default();
    let stored = if kind == AppendKind::Claim {
      let task_id = req.ref_id.clone().expect("checked above");
      let wip_scope = match &key.scope {
        Scope::Workspace => None,
        Scope::Folder(p) | Scope::File(p) => Some(p.clone()),
      };
      let result = {
        let mut store = self.store.lock().expect("store lock");
        store.insert_claim(ClaimInsert {
          workspace_id: key.workspace_id.clone(),
          path: req.path.clone(),
          author: req.author.clone(),
          task_id,
          expires_at: expires_at.expect("claims carry a deadline"),
          now,
          wip_limit: self.policy.wip_limit,
          wip_scope,
        })
      };
      result.map_err(map_store_error)?
    } else {
      let insert = AppendInsert {
        workspace_id: key.workspace_id.clone(),
        path: req.path.clone(),
        author: req.author.clone(),
        kind,
        ref_id: req.ref_id.clone(),
        expires_at,
        content_preview: preview(&content),
        content,
        now,
      };
      let result = {
        let mut store = self.store.lock().expect("store lock");
        store.append_entry(insert)
      };
      result.map_err(map_store_error)?
    };

    info!(
      event = "append_stored",
      workspace = %key.workspace_id,
      path = %req.path,
      kind = %stored.kind,
      seq = stored.seq,
      author = %stored.author,
    );
    self.fanout.publish(&AppendEvent {
      workspace_id: key.workspace_id.clone(),
      file_path: req.path,
      append_id: stored.id.clone(),
      seq: stored.seq,
      author: stored.author.clone(),
      kind: stored.kind,
      content_preview: stored.content_preview.clone(),
      created_at: stored.created_at,
    });
    Ok(stored)
  }

  pub fn list(
    &self,
    key: &ResolvedKey,
    path: &str,
    kind: Option<&str>,
    author: Option<&str>,
  ) -> Result<Vec<Append>> {
    let kind = match kind {
      Some(k) => Some(AppendKind::parse(k).ok_or_else(|| ApiError::InvalidAppendType(k.into()))?),
      None => None,
    };
    let filters = AppendFilters {
      kind,
      author: author.map(str::to_string),
    };
    let store = self.store.lock().expect("store lock");
    store
      .appends_for_file(&key.workspace_id, path, &filters)
      .map_err(map_store_error)
  }
}

pub(crate) fn map_store_error(err: StoreError) -> ApiError {
  match err {
    StoreError::FileMissing => ApiError::FileNotFound,
    StoreError::TaskMissing => ApiError::TaskNotFound,
    StoreError::RefMissing(id) if id.is_empty() => {
      ApiError::InvalidRequest("`ref` is required".into())
    }
    StoreError::RefMissing(id) => {
      ApiError::InvalidRequest(format!("`ref` `{id}` does not exist in this file"))
    }
    StoreError::RefKindMismatch { expected } => {
      ApiError::InvalidRequest(format!("`ref` must point to a `{expected}` append"))
    }
    StoreError::ClaimInactive => {
      ApiError::InvalidRequest("claim is no longer active; submit a new claim".into())
    }
    StoreError::ClaimTerminal => {
      ApiError::InvalidRequest("claim already has a terminal entry".into())
    }
    StoreError::AlreadyClaimed | StoreError::TaskHeld => ApiError::AlreadyClaimed,
    StoreError::WipExceeded { retry_after_secs } => {
      ApiError::WipLimitExceeded { retry_after_secs }
    }
    other => ApiError::Internal(other),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Utc;

  use crate::clock::ManualClock;
  use crate::domain::key::Permission;
  use crate::services::shared_store;
  use crate::store::SqliteStore;

  struct Fixture {
    ledger: LedgerService,
    fanout: Arc<EventFanout>,
    clock: ManualClock,
    key: ResolvedKey,
  }

  fn fixture() -> Fixture {
    let mut store = SqliteStore::open_in_memory().unwrap();
    let ws = store.create_workspace("test", Utc::now()).unwrap();
    let store = shared_store(store);
    let fanout = Arc::new(EventFanout::new());
    let clock = ManualClock::new(Utc::now());
    let ledger = LedgerService::new(
      store,
      fanout.clone(),
      Arc::new(clock.clone()),
      LedgerPolicy {
        default_claim_ttl_secs: 900,
        max_claim_ttl_secs: 3600,
        wip_limit: 2,
      },
    );
    let key = ResolvedKey {
      key_hash: "h".into(),
      workspace_id: ws.id,
      scope: Scope::Workspace,
      permission: Permission::Write,
    };
    Fixture {
      ledger,
      fanout,
      clock,
      key,
    }
  }

  fn append(fx: &Fixture, kind: &str, ref_id: Option<String>) -> Result<Append> {
    fx.ledger.append(
      &fx.key,
      AppendRequest {
        path: "/tasks.md".into(),
        author: "alice".into(),
        kind: kind.into(),
        content: Some("Implement X".into()),
        ref_id,
        expires_in_seconds: None,
      },
    )
  }

  #[test]
  fn rejects_unknown_kind() {
    let fx = fixture();
    let err = append(&fx, "annotation", None).unwrap_err();
    assert_eq!(err.code(), "INVALID_APPEND_TYPE");
    assert_eq!(err.http_status(), 400);
  }

  #[test]
  fn rejects_missing_or_dangling_refs() {
    let fx = fixture();
    let err = append(&fx, "claim", None).unwrap_err();
    assert_eq!(err.code(), "INVALID_REQUEST");

    append(&fx, "task", None).unwrap();
    let err = fx
      .ledger
      .append(
        &fx.key,
        AppendRequest {
          path: "/tasks.md".into(),
          author: "alice".into(),
          kind: "response".into(),
          content: None,
          ref_id: Some("no-such-id".into()),
          expires_in_seconds: None,
        },
      )
      .unwrap_err();
    assert_eq!(err.code(), "INVALID_REQUEST");
  }

  #[test]
  fn claim_ttl_is_bounded() {
    let fx = fixture();
    let task = append(&fx, "task", None).unwrap();
    let claim = fx
      .ledger
      .append(
        &fx.key,
        AppendRequest {
          path: "/tasks.md".into(),
          author: "agent-a".into(),
          kind: "claim".into(),
          content: None,
          ref_id: Some(task.id),
          expires_in_seconds: Some(86_400),
        },
      )
      .unwrap();
    let ttl = claim.expires_at.unwrap() - fx.clock.now();
    assert_eq!(ttl.num_seconds(), 3600);
  }

  #[test]
  fn publishes_after_successful_write_only() {
    let fx = fixture();
    let (_, mut rx) = fx.fanout.subscribe(&fx.key.workspace_id, Scope::Workspace);

    append(&fx, "annotation", None).unwrap_err();
    assert!(rx.try_recv().is_err(), "no event for a rejected append");

    let stored = append(&fx, "task", None).unwrap();
    let event = rx.try_recv().unwrap();
    assert_eq!(event.append_id, stored.id);
    assert_eq!(event.file_path, "/tasks.md");
  }

  #[test]
  fn wrong_kind_ref_is_rejected() {
    let fx = fixture();
    let task = append(&fx, "task", None).unwrap();
    // Response must reference a claim, not the task itself.
    let err = fx
      .ledger
      .append(
        &fx.key,
        AppendRequest {
          path: "/tasks.md".into(),
          author: "agent-a".into(),
          kind: "response".into(),
          content: Some("done".into()),
          ref_id: Some(task.id),
          expires_in_seconds: None,
        },
      )
      .unwrap_err();
    assert_eq!(err.code(), "INVALID_REQUEST");
  }
}
