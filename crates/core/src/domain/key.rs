use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::scope::Scope;

/// Permission tiers, ordered: read ⊂ append ⊂ write. `Export` sits
/// outside the ladder; export keys authorize export jobs and nothing
/// else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
  Read,
  Append,
  Write,
  Export,
}

impl Permission {
  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "read" => Some(Self::Read),
      "append" => Some(Self::Append),
      "write" => Some(Self::Write),
      "export" => Some(Self::Export),
      _ => None,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Read => "read",
      Self::Append => "append",
      Self::Write => "write",
      Self::Export => "export",
    }
  }

  /// Whether a key holding this permission is accepted for an operation
  /// that requires `required`. Higher tiers satisfy lower ones, never the
  /// reverse; `export` satisfies only itself and `read`.
  pub fn satisfies(&self, required: Permission) -> bool {
    match (self, required) {
      (Self::Export, Self::Export) | (Self::Export, Self::Read) => true,
      (Self::Export, _) | (_, Self::Export) => false,
      (held, required) => held >= &required,
    }
  }
}

/// A capability key as stored: the secret never lands in the store, only
/// its SHA-256 hex digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityKey {
  pub key_hash: String,
  pub workspace_id: String,
  pub scope: Scope,
  pub permission: Permission,
  pub expires_at: Option<DateTime<Utc>>,
  pub revoked_at: Option<DateTime<Utc>>,
  pub created_at: DateTime<Utc>,
}

/// Mint a fresh unguessable key secret. Two v4 UUIDs of entropy, hex
/// without separators, prefixed for log greppability.
pub fn generate_secret() -> String {
  format!(
    "rk_{}{}",
    Uuid::new_v4().simple(),
    Uuid::new_v4().simple()
  )
}

/// Hash a raw key for storage/lookup.
pub fn hash_secret(raw: &str) -> String {
  let digest = Sha256::digest(raw.as_bytes());
  let mut out = String::with_capacity(64);
  for byte in digest {
    out.push_str(&format!("{byte:02x}"));
  }
  out
}
