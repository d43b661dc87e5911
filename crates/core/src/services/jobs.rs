use std::sync::Arc;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::clock::Clock;
use crate::domain::key::{generate_secret, hash_secret};
use crate::error::{ApiError, Result};
use crate::services::SharedStore;
use crate::store::JobRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
  Queued,
  Processing,
  Ready,
  Failed,
  Expired,
}

impl JobStatus {
  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "queued" => Some(Self::Queued),
      "processing" => Some(Self::Processing),
      "ready" => Some(Self::Ready),
      "failed" => Some(Self::Failed),
      "expired" => Some(Self::Expired),
      _ => None,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Queued => "queued",
      Self::Processing => "processing",
      Self::Ready => "ready",
      Self::Failed => "failed",
      Self::Expired => "expired",
    }
  }

  pub fn is_terminal(&self) -> bool {
    matches!(self, Self::Ready | Self::Failed | Self::Expired)
  }
}

/// What a poller sees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct JobView {
  pub status: JobStatus,
  pub progress: i64,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub result: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

/// Async job bookkeeping: created by an async operation (export), polled
/// by its unguessable job key, terminal once ready/failed/expired. The
/// work itself (building the export) happens outside this core; workers
/// drive `advance` and `finish`.
pub struct JobService {
  store: SharedStore,
  clock: Arc<dyn Clock>,
  ttl: Duration,
}

impl JobService {
  pub fn new(store: SharedStore, clock: Arc<dyn Clock>, ttl_secs: u64) -> Self {
    Self {
      store,
      clock,
      ttl: Duration::seconds(ttl_secs as i64),
    }
  }

  /// Enqueue a job and hand back its polling secret (shown once).
  pub fn create(&self, workspace_id: &str) -> Result<String> {
    let secret = generate_secret();
    let now = self.clock.now();
    let job = JobRow {
      key_hash: hash_secret(&secret),
      workspace_id: workspace_id.to_string(),
      status: JobStatus::Queued.as_str().to_string(),
      progress: 0,
      result: None,
      error: None,
      expires_at: now + self.ttl,
      created_at: now,
    };
    {
      let mut store = self.store.lock().expect("store lock");
      store.insert_job(&job)?;
    }
    info!(event = "job_created", workspace = workspace_id);
    Ok(secret)
  }

  /// Worker-side progress update.
  pub fn advance(&self, raw_key: &str, progress: i64) -> Result<()> {
    let mut store = self.store.lock().expect("store lock");
    store
      .update_job(
        &hash_secret(raw_key),
        JobStatus::Processing.as_str(),
        progress.clamp(0, 100),
        None,
        None,
      )
      .map_err(|_| ApiError::JobNotFound)
  }

  /// Worker-side terminal transition.
  pub fn finish(&self, raw_key: &str, result: std::result::Result<&str, &str>) -> Result<()> {
    let (status, ok, err) = match result {
      Ok(payload) => (JobStatus::Ready, Some(payload), None),
      Err(message) => (JobStatus::Failed, None, Some(message)),
    };
    let mut store = self.store.lock().expect("store lock");
    store
      .update_job(&hash_secret(raw_key), status.as_str(), 100, ok, err)
      .map_err(|_| ApiError::JobNotFound)
  }

  /// Poll by job key. Expiry is evaluated lazily here: a job past its
  /// deadline reports 404 exactly like an absent one.
  pub fn poll(&self, raw_key: &str) -> Result<JobView> {
    let row = {
      let store = self.store.lock().expect("store lock");
      store.job_by_key_hash(&hash_secret(raw_key))?
    };
    let Some(row) = row else {
      return Err(ApiError::JobNotFound);
    };
    let status = JobStatus::parse(&row.status).unwrap_or(JobStatus::Failed);
    if !status.is_terminal() && self.clock.now() >= row.expires_at {
      return Err(ApiError::JobNotFound);
    }
    Ok(JobView {
      status,
      progress: row.progress,
      result: row.result,
      error: row.error,
    })
  }
}
