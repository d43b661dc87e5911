use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::domain::append::AppendKind;
use crate::domain::scope::Scope;

/// What a subscriber receives for each matching append.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AppendEvent {
  pub workspace_id: String,
  pub file_path: String,
  pub append_id: String,
  pub seq: i64,
  pub author: String,
  pub kind: AppendKind,
  pub content_preview: String,
  pub created_at: DateTime<Utc>,
}

const SUBSCRIBER_BUFFER: usize = 64;

struct Subscriber {
  workspace_id: String,
  scope: Scope,
  tx: mpsc::Sender<AppendEvent>,
}

/// In-process publish/subscribe keyed by scope. Constructed once at
/// process start and passed by handle to request handlers; a second
/// process instance would need this externalized to a shared broker,
/// which this component deliberately does not attempt.
///
/// Delivery is at most once, best effort while connected: a slow or gone
/// subscriber is skipped, and missed events are not replayed (callers
/// needing durability re-fetch from the ledger).
#[derive(Default)]
pub struct EventFanout {
  next_id: AtomicU64,
  subscribers: Mutex<HashMap<u64, Subscriber>>,
}

impl EventFanout {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a subscriber for a workspace and scope, as resolved from
  /// the connecting capability key. Returns the subscription id and the
  /// receiving end of the event channel.
  pub fn subscribe(
    &self,
    workspace_id: &str,
    scope: Scope,
  ) -> (u64, mpsc::Receiver<AppendEvent>) {
    let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
    let mut subs = self.subscribers.lock().expect("fanout lock");
    subs.insert(
      id,
      Subscriber {
        workspace_id: workspace_id.to_string(),
        scope,
        tx,
      },
    );
    debug!(event = "fanout_subscribe", subscription = id, subscribers = subs.len());
    (id, rx)
  }

  /// Tear down a subscription. Idempotent.
  pub fn unsubscribe(&self, id: u64) {
    let mut subs = self.subscribers.lock().expect("fanout lock");
    if subs.remove(&id).is_some() {
      debug!(event = "fanout_unsubscribe", subscription = id, subscribers = subs.len());
    }
  }

  /// Deliver an event to every live subscriber whose scope matches the
  /// event's file path. Called after the append committed, never before.
  pub fn publish(&self, event: &AppendEvent) {
    let subs = self.subscribers.lock().expect("fanout lock");
    let mut delivered = 0usize;
    for sub in subs.values() {
      if sub.workspace_id != event.workspace_id {
        continue;
      }
      if !sub.scope.matches(&event.file_path) {
        continue;
      }
      // try_send keeps publish non-blocking; a full or closed channel
      // just loses the event for that subscriber.
      if sub.tx.try_send(event.clone()).is_ok() {
        delivered += 1;
      }
    }
    debug!(
      event = "fanout_publish",
      path = %event.file_path,
      kind = %event.kind,
      delivered,
    );
  }

  pub fn subscriber_count(&self) -> usize {
    self.subscribers.lock().expect("fanout lock").len()
  }

  /// Drop every subscription. Test isolation hook.
  pub fn reset(&self) {
    self.subscribers.lock().expect("fanout lock").clear();
  }
}
