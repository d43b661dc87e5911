use thiserror::Error;

use crate::domain::append::AppendKind;

/// Storage-layer failures. The claim lifecycle variants exist because the
/// "check then insert" step must run inside one transaction, so the store
/// is where those conflicts are detected.
#[derive(Debug, Error)]
pub enum StoreError {
  #[error("sqlite: {0}")]
  Sql(#[from] rusqlite::Error),
  #[error("io: {0}")]
  Io(#[from] std::io::Error),
  #[error("row not found")]
  MissingRow,
  #[error("workspace is already claimed")]
  WorkspaceAlreadyClaimed,
  #[error("file not found")]
  FileMissing,
  #[error("task not found")]
  TaskMissing,
  #[error("ref `{0}` not found in this file")]
  RefMissing(String),
  #[error("ref must point to a `{expected}` append")]
  RefKindMismatch { expected: AppendKind },
  #[error("claim is no longer active")]
  ClaimInactive,
  #[error("claim already has a terminal entry")]
  ClaimTerminal,
  #[error("task already has an active claim")]
  AlreadyClaimed,
  #[error("task was closed by a terminal entry")]
  TaskHeld,
  #[error("author is at the concurrent claim limit")]
  WipExceeded { retry_after_secs: Option<u64> },
}

pub type Result<T> = std::result::Result<T, StoreError>;
