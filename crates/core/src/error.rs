use thiserror::Error;

use crate::store::StoreError;

/// Public error taxonomy. Every failure leaving the core maps to exactly
/// one of these; the HTTP layer renders them as the standard error
/// envelope with `http_status()`.
///
/// Key failures (unknown, expired, revoked) all surface to callers as an
/// identical 404 so the response cannot be used as a key-enumeration or
/// liveness oracle. The distinct variants exist for logs only.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("invalid request: {0}")]
  InvalidRequest(String),
  #[error("unknown append kind `{0}`")]
  InvalidAppendType(String),
  #[error("invalid path")]
  InvalidPath,

  #[error("unknown key")]
  InvalidKey,
  #[error("key expired")]
  KeyExpired,
  #[error("key revoked")]
  KeyRevoked,
  #[error("permission denied")]
  PermissionDenied,
  #[error("file not found")]
  FileNotFound,
  #[error("task not found")]
  TaskNotFound,
  #[error("job not found")]
  JobNotFound,

  #[error("task is already claimed")]
  AlreadyClaimed,

  #[error("too many active claims")]
  WipLimitExceeded { retry_after_secs: Option<u64> },
  #[error("rate limit exceeded")]
  RateLimited { retry_after_secs: Option<u64> },

  #[error("internal error")]
  Internal(#[source] StoreError),
}

impl ApiError {
  /// Stable machine-readable code used in envelopes and logs.
  pub fn code(&self) -> &'static str {
    match self {
      Self::InvalidRequest(_) => "INVALID_REQUEST",
      Self::InvalidAppendType(_) => "INVALID_APPEND_TYPE",
      Self::InvalidPath => "INVALID_PATH",
      Self::InvalidKey => "INVALID_KEY",
      Self::KeyExpired => "KEY_EXPIRED",
      Self::KeyRevoked => "KEY_REVOKED",
      Self::PermissionDenied => "PERMISSION_DENIED",
      Self::FileNotFound => "FILE_NOT_FOUND",
      Self::TaskNotFound => "TASK_NOT_FOUND",
      Self::JobNotFound => "JOB_NOT_FOUND",
      Self::AlreadyClaimed => "ALREADY_CLAIMED",
      Self::WipLimitExceeded { .. } => "WIP_LIMIT_EXCEEDED",
      Self::RateLimited { .. } => "RATE_LIMITED",
      Self::Internal(_) => "INTERNAL",
    }
  }

  pub fn http_status(&self) -> u16 {
    match self {
      Self::InvalidRequest(_) | Self::InvalidAppendType(_) | Self::InvalidPath => 400,
      Self::InvalidKey
      | Self::KeyExpired
      | Self::KeyRevoked
      | Self::PermissionDenied
      | Self::FileNotFound
      | Self::TaskNotFound
      | Self::JobNotFound => 404,
      Self::AlreadyClaimed => 409,
      Self::WipLimitExceeded { .. } | Self::RateLimited { .. } => 429,
      Self::Internal(_) => 500,
    }
  }

  /// Code as rendered in the response envelope. Key failures collapse to
  /// a single code so the three reasons stay indistinguishable on the
  /// wire.
  pub fn public_code(&self) -> &'static str {
    match self {
      Self::InvalidKey | Self::KeyExpired | Self::KeyRevoked | Self::PermissionDenied => {
        "PERMISSION_DENIED"
      }
      other => other.code(),
    }
  }

  /// Message as rendered in the response envelope. Never contains
  /// internals; key failures share one byte-identical message.
  pub fn public_message(&self) -> String {
    match self {
      Self::InvalidKey | Self::KeyExpired | Self::KeyRevoked | Self::PermissionDenied => {
        "not found".to_string()
      }
      Self::Internal(_) => "internal error".to_string(),
      other => other.to_string(),
    }
  }

  pub fn retry_after_secs(&self) -> Option<u64> {
    match self {
      Self::WipLimitExceeded { retry_after_secs } | Self::RateLimited { retry_after_secs } => {
        *retry_after_secs
      }
      _ => None,
    }
  }
}

impl From<StoreError> for ApiError {
  fn from(err: StoreError) -> Self {
    Self::Internal(err)
  }
}

pub type Result<T> = std::result::Result<T, ApiError>;
