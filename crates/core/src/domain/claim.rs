use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::append::AppendKind;

/// Derived claim status. Never stored: the deadline plus an optional
/// terminal marker are the only sources of truth, and status is computed
/// at read time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
  Active,
  Expired,
  Completed,
  Cancelled,
  Blocked,
}

impl ClaimStatus {
  pub fn is_terminal(&self) -> bool {
    matches!(self, Self::Completed | Self::Cancelled | Self::Blocked)
  }
}

/// Compute a claim's status at `now`. A terminal append referencing the
/// claim wins over the clock; otherwise the claim is active strictly
/// before its deadline and expired from the deadline on.
pub fn derive_status(
  now: DateTime<Utc>,
  expires_at: DateTime<Utc>,
  terminal: Option<AppendKind>,
) -> ClaimStatus {
  match terminal {
    Some(AppendKind::Response) => ClaimStatus::Completed,
    Some(AppendKind::Cancel) => ClaimStatus::Cancelled,
    Some(AppendKind::Blocked) => ClaimStatus::Blocked,
    _ => {
      if now < expires_at {
        ClaimStatus::Active
      } else {
        ClaimStatus::Expired
      }
    }
  }
}

/// Seconds until expiry, pinned at 0 once the deadline has passed. Never
/// negative.
pub fn expires_in_seconds(now: DateTime<Utc>, expires_at: DateTime<Utc>) -> u64 {
  (expires_at - now).num_seconds().max(0) as u64
}

/// One claim as returned by the claim listing: the stored facts plus the
/// derived fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ClaimView {
  pub claim_id: String,
  pub task_id: String,
  pub file_path: String,
  pub author: String,
  pub status: ClaimStatus,
  pub expires_at: DateTime<Utc>,
  pub expires_in_seconds: u64,
}
