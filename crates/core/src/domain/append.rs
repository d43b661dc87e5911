use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The closed set of ledger entry kinds. Anything else is rejected at the
/// door with `INVALID_APPEND_TYPE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppendKind {
  Comment,
  Task,
  Claim,
  Renew,
  Response,
  Cancel,
  Blocked,
  Heartbeat,
}

impl AppendKind {
  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "comment" => Some(Self::Comment),
      "task" => Some(Self::Task),
      "claim" => Some(Self::Claim),
      "renew" => Some(Self::Renew),
      "response" => Some(Self::Response),
      "cancel" => Some(Self::Cancel),
      "blocked" => Some(Self::Blocked),
      "heartbeat" => Some(Self::Heartbeat),
      _ => None,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Comment => "comment",
      Self::Task => "task",
      Self::Claim => "claim",
      Self::Renew => "renew",
      Self::Response => "response",
      Self::Cancel => "cancel",
      Self::Blocked => "blocked",
      Self::Heartbeat => "heartbeat",
    }
  }

  /// The kind of append a `ref` on this entry must point to, or `None`
  /// for kinds that stand alone (comment, task, heartbeat).
  pub fn ref_target(&self) -> Option<AppendKind> {
    match self {
      Self::Comment | Self::Task | Self::Heartbeat => None,
      Self::Claim => Some(Self::Task),
      Self::Renew | Self::Response | Self::Cancel | Self::Blocked => Some(Self::Claim),
    }
  }

  /// Whether the entry's content folds into the file's materialized
  /// markdown. Claims and lifecycle markers are annotations and do not.
  pub fn is_content_bearing(&self) -> bool {
    matches!(self, Self::Comment | Self::Task | Self::Response)
  }

  /// Whether an `expires_at` deadline is legal on this kind.
  pub fn carries_deadline(&self) -> bool {
    matches!(self, Self::Claim | Self::Renew)
  }

  /// Kinds that make the referenced claim terminal.
  pub fn is_terminal(&self) -> bool {
    matches!(self, Self::Response | Self::Cancel | Self::Blocked)
  }
}

impl std::fmt::Display for AppendKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// One immutable entry in a file's ledger. `seq` is strictly increasing
/// per file and assigned by the store inside the write transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Append {
  pub id: String,
  pub file_id: String,
  pub seq: i64,
  pub author: String,
  pub kind: AppendKind,
  #[serde(rename = "ref", skip_serializing_if = "Option::is_none")]
  pub ref_id: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub expires_at: Option<DateTime<Utc>>,
  pub content: String,
  pub content_preview: String,
  pub created_at: DateTime<Utc>,
}

/// Maximum preview length in characters, not bytes.
pub const PREVIEW_CHARS: usize = 160;

/// Derive the listing preview eagerly at write time so listings never
/// reload full content. Truncation happens on a char boundary.
pub fn preview(content: &str) -> String {
  let trimmed = content.trim_end();
  if trimmed.chars().count() <= PREVIEW_CHARS {
    return trimmed.to_string();
  }
  let cut: String = trimmed.chars().take(PREVIEW_CHARS - 1).collect();
  format!("{cut}\u{2026}")
}
