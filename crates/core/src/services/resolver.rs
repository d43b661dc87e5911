use std::sync::Arc;

use tracing::{debug, warn};

use crate::clock::Clock;
use crate::domain::key::{Permission, hash_secret};
use crate::domain::scope::Scope;
use crate::error::{ApiError, Result};
use crate::services::SharedStore;

/// Successful resolution of a capability key against a requested path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedKey {
  pub key_hash: String,
  pub workspace_id: String,
  pub scope: Scope,
  pub permission: Permission,
}

/// Decodes a capability key and answers "is this key authorized for an
/// operation requiring `required` on `requested_path`?". Read-only:
/// resolution never mutates key state.
///
/// Fails closed. Unknown, expired, and revoked keys produce distinct
/// variants for telemetry, but all of them render as the same 404 on the
/// wire (see `ApiError::public_code`), so responses cannot be used to
/// probe which keys exist or are still live.
pub struct KeyResolver {
  store: SharedStore,
  clock: Arc<dyn Clock>,
}

impl KeyResolver {
  pub fn new(store: SharedStore, clock: Arc<dyn Clock>) -> Self {
    Self { store, clock }
  }

  pub fn resolve(
    &self,
    raw_key: &str,
    requested_path: Option<&str>,
    required: Permission,
  ) -> Result<ResolvedKey> {
    let key_hash = hash_secret(raw_key);
    let record = {
      let store = self.store.lock().expect("store lock");
      store.capability_key(&key_hash)?
    };
    let Some(record) = record else {
      warn!(event = "key_rejected", code = "INVALID_KEY");
      return Err(ApiError::InvalidKey);
    };

    let now = self.clock.now();
    if let Some(revoked_at) = record.revoked_at
      && now >= revoked_at
    {
      warn!(event = "key_rejected", code = "KEY_REVOKED", workspace = %record.workspace_id);
      return Err(ApiError::KeyRevoked);
    }
    if let Some(expires_at) = record.expires_at
      && now >= expires_at
    {
      warn!(event = "key_rejected", code = "KEY_EXPIRED", workspace = %record.workspace_id);
      return Err(ApiError::KeyExpired);
    }

    if !record.permission.satisfies(required) {
      warn!(
        event = "key_rejected",
        code = "PERMISSION_DENIED",
        held = record.permission.as_str(),
        required = required.as_str(),
      );
      return Err(ApiError::PermissionDenied);
    }

    if let Some(path) = requested_path
      && !record.scope.matches(path)
    {
      warn!(
        event = "key_rejected",
        code = "PERMISSION_DENIED",
        scope = record.scope.path(),
        requested = path,
      );
      return Err(ApiError::PermissionDenied);
    }

    debug!(
      event = "key_resolved",
      workspace = %record.workspace_id,
      permission = record.permission.as_str(),
      scope_kind = record.scope.kind(),
    );
    Ok(ResolvedKey {
      key_hash: record.key_hash,
      workspace_id: record.workspace_id,
      scope: record.scope,
      permission: record.permission,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::{Duration, Utc};

  use crate::clock::ManualClock;
  use crate::domain::key::{CapabilityKey, generate_secret};
  use crate::services::shared_store;
  use crate::store::SqliteStore;

  struct Fixture {
    resolver: KeyResolver,
    store: SharedStore,
    clock: ManualClock,
    workspace_id: String,
  }

  fn fixture() -> Fixture {
    let mut store = SqliteStore::open_in_memory().unwrap();
    let ws = store.create_workspace("test", Utc::now()).unwrap();
    let store = shared_store(store);
    let clock = ManualClock::new(Utc::now());
    let resolver = KeyResolver::new(store.clone(), Arc::new(clock.clone()));
    Fixture {
      resolver,
      store,
      clock,
      workspace_id: ws.id,
    }
  }

  fn mint(fx: &Fixture, scope: Scope, permission: Permission) -> String {
    let secret = generate_secret();
    let key = CapabilityKey {
      key_hash: hash_secret(&secret),
      workspace_id: fx.workspace_id.clone(),
      scope,
      permission,
      expires_at: None,
      revoked_at: None,
      created_at: fx.clock.now(),
    };
    fx.store.lock().unwrap().insert_capability_key(&key).unwrap();
    secret
  }

  #[test]
  fn unknown_key_fails_closed() {
    let fx = fixture();
    let err = fx
      .resolver
      .resolve("rk_nope", Some("/a.md"), Permission::Read)
      .unwrap_err();
    assert!(matches!(err, ApiError::InvalidKey));
    assert_eq!(err.http_status(), 404);
  }

  #[test]
  fn higher_tiers_satisfy_lower_requirements() {
    let fx = fixture();
    let write = mint(&fx, Scope::Workspace, Permission::Write);
    for required in [Permission::Read, Permission::Append, Permission::Write] {
      assert!(fx.resolver.resolve(&write, Some("/a.md"), required).is_ok());
    }
    let read = mint(&fx, Scope::Workspace, Permission::Read);
    assert!(fx.resolver.resolve(&read, Some("/a.md"), Permission::Read).is_ok());
    assert!(matches!(
      fx.resolver.resolve(&read, Some("/a.md"), Permission::Append).unwrap_err(),
      ApiError::PermissionDenied
    ));
  }

  #[test]
  fn folder_scope_constrains_the_path() {
    let fx = fixture();
    let key = mint(&fx, Scope::Folder("/projects/".into()), Permission::Append);
    assert!(fx
      .resolver
      .resolve(&key, Some("/projects/alpha.md"), Permission::Append)
      .is_ok());
    assert!(matches!(
      fx.resolver.resolve(&key, Some("/notes/x.md"), Permission::Append).unwrap_err(),
      ApiError::PermissionDenied
    ));
  }

  #[test]
  fn expiry_and_revocation_are_permanent() {
    let fx = fixture();
    let secret = generate_secret();
    let key = CapabilityKey {
      key_hash: hash_secret(&secret),
      workspace_id: fx.workspace_id.clone(),
      scope: Scope::Workspace,
      permission: Permission::Write,
      expires_at: Some(fx.clock.now() + Duration::seconds(60)),
      revoked_at: None,
      created_at: fx.clock.now(),
    };
    fx.store.lock().unwrap().insert_capability_key(&key).unwrap();

    assert!(fx.resolver.resolve(&secret, None, Permission::Read).is_ok());
    fx.clock.advance(Duration::seconds(61));
    assert!(matches!(
      fx.resolver.resolve(&secret, None, Permission::Read).unwrap_err(),
      ApiError::KeyExpired
    ));

    let revoked = mint(&fx, Scope::Workspace, Permission::Write);
    fx.store
      .lock()
      .unwrap()
      .revoke_capability_key(&hash_secret(&revoked), fx.clock.now())
      .unwrap();
    assert!(matches!(
      fx.resolver.resolve(&revoked, None, Permission::Read).unwrap_err(),
      ApiError::KeyRevoked
    ));
  }
}
