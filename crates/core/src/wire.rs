//! Request/response DTOs for the HTTP surface.
//!
//! Everything crossing the wire goes through the two envelopes: success
//! is `{"ok":true,"data":...}`, failure is
//! `{"ok":false,"error":{"code","message"}}` with an optional
//! `retry_after_secs` on 429s.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::claim::ClaimView;
use crate::error::ApiError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ErrorBody {
  pub code: String,
  pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct Envelope {
  pub ok: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub data: Option<Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<ErrorBody>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub retry_after_secs: Option<u64>,
}

impl Envelope {
  pub fn success(data: Value) -> Self {
    Self {
      ok: true,
      data: Some(data),
      error: None,
      retry_after_secs: None,
    }
  }

  pub fn failure(err: &ApiError) -> Self {
    Self {
      ok: false,
      data: None,
      error: Some(ErrorBody {
        code: err.public_code().to_string(),
        message: err.public_message(),
      }),
      retry_after_secs: err.retry_after_secs(),
    }
  }
}

// ---- append ----

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AppendParams {
  pub author: String,
  pub kind: String,
  #[serde(default)]
  pub content: Option<String>,
  #[serde(default, rename = "ref")]
  pub ref_id: Option<String>,
  #[serde(default)]
  pub expires_in_seconds: Option<u64>,
}

// ---- claims ----

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ClaimListResponse {
  pub claims: Vec<ClaimView>,
  pub count: usize,
}

// ---- workspaces ----

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct WorkspaceCreateParams {
  pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct MintedKey {
  pub key: String,
  pub permission: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct WorkspaceCreateResponse {
  pub workspace_id: String,
  pub name: String,
  /// Plaintext capability keys, returned exactly once.
  pub keys: Vec<MintedKey>,
}

// ---- capability check ----

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct CapabilityCheckParams {
  pub keys: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct CapabilityCheckResult {
  pub key: String,
  pub valid: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub permission: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub scope_kind: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub scope_path: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct CapabilityCheckResponse {
  pub results: Vec<CapabilityCheckResult>,
}

// ---- api keys ----

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ApiKeyCreateResponse {
  pub key: String,
  pub permission: String,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn envelopes_serialize_to_the_documented_shape() {
    let ok = Envelope::success(serde_json::json!({"x": 1}));
    let v = serde_json::to_value(&ok).unwrap();
    assert_eq!(v["ok"], true);
    assert_eq!(v["data"]["x"], 1);
    assert!(v.get("error").is_none());

    let err = Envelope::failure(&ApiError::AlreadyClaimed);
    let v = serde_json::to_value(&err).unwrap();
    assert_eq!(v["ok"], false);
    assert_eq!(v["error"]["code"], "ALREADY_CLAIMED");
    assert!(v.get("data").is_none());
  }

  #[test]
  fn retry_hint_rides_on_429_envelopes() {
    let err = Envelope::failure(&ApiError::WipLimitExceeded {
      retry_after_secs: Some(45),
    });
    let v = serde_json::to_value(&err).unwrap();
    assert_eq!(v["retry_after_secs"], 45);
  }
}
