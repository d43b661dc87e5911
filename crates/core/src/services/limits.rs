use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

use crate::clock::Clock;

/// Sliding-window rate limiter for API-key creation, keyed per workspace.
/// Tracks recent creation timestamps; once `max_events` fall inside the
/// window, further creations are rejected with a `retry_after` computed
/// from the oldest timestamp.
///
/// Held as an explicit service handle (no ambient state) so tests can
/// `reset()` it and a multi-instance deployment can swap it for a shared
/// store.
pub struct RateLimiter {
  clock: Arc<dyn Clock>,
  window: Duration,
  max_events: usize,
  events: Mutex<HashMap<String, VecDeque<DateTime<Utc>>>>,
}

/// Outcome of a limiter check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimiterDecision {
  Allowed,
  Rejected { retry_after_secs: u64 },
}

impl RateLimiter {
  pub fn new(clock: Arc<dyn Clock>, window: Duration, max_events: usize) -> Self {
    Self {
      clock,
      window,
      max_events,
      events: Mutex::new(HashMap::new()),
    }
  }

  /// Check the window for `key` and record the event if allowed. Check
  /// and record are one step under the lock so two racing creations
  /// cannot both squeeze into the last slot.
  pub fn check_and_record(&self, key: &str) -> LimiterDecision {
    let now = self.clock.now();
    let mut events = self.events.lock().expect("limiter lock");
    let window = events.entry(key.to_string()).or_default();
    while let Some(oldest) = window.front() {
      if now - *oldest >= self.window {
        window.pop_front();
      } else {
        break;
      }
    }
    if window.len() >= self.max_events {
      // The oldest event leaving the window frees the next slot.
      let oldest = *window.front().expect("non-empty window");
      let retry_after = (oldest + self.window - now).num_seconds().max(1) as u64;
      return LimiterDecision::Rejected {
        retry_after_secs: retry_after,
      };
    }
    window.push_back(now);
    LimiterDecision::Allowed
  }

  /// Clear all tracked windows. Test isolation hook.
  pub fn reset(&self) {
    self.events.lock().expect("limiter lock").clear();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::ManualClock;

  fn limiter(max: usize, window_secs: i64) -> (RateLimiter, ManualClock) {
    let clock = ManualClock::new(Utc::now());
    let limiter = RateLimiter::new(
      Arc::new(clock.clone()),
      Duration::seconds(window_secs),
      max,
    );
    (limiter, clock)
  }

  #[test]
  fn rejects_past_the_limit_with_retry_hint() {
    let (limiter, _clock) = limiter(3, 60);
    for _ in 0..3 {
      assert_eq!(limiter.check_and_record("ws"), LimiterDecision::Allowed);
    }
    match limiter.check_and_record("ws") {
      LimiterDecision::Rejected { retry_after_secs } => {
        assert!(retry_after_secs > 0 && retry_after_secs <= 60);
      }
      other => panic!("expected rejection, got {other:?}"),
    }
  }

  #[test]
  fn window_slides_with_the_clock() {
    let (limiter, clock) = limiter(2, 60);
    assert_eq!(limiter.check_and_record("ws"), LimiterDecision::Allowed);
    clock.advance(Duration::seconds(30));
    assert_eq!(limiter.check_and_record("ws"), LimiterDecision::Allowed);
    assert!(matches!(
      limiter.check_and_record("ws"),
      LimiterDecision::Rejected { .. }
    ));
    // The first event ages out 60s after it happened.
    clock.advance(Duration::seconds(31));
    assert_eq!(limiter.check_and_record("ws"), LimiterDecision::Allowed);
  }

  #[test]
  fn keys_are_independent() {
    let (limiter, _clock) = limiter(1, 60);
    assert_eq!(limiter.check_and_record("ws-a"), LimiterDecision::Allowed);
    assert_eq!(limiter.check_and_record("ws-b"), LimiterDecision::Allowed);
    assert!(matches!(
      limiter.check_and_record("ws-a"),
      LimiterDecision::Rejected { .. }
    ));
  }

  #[test]
  fn reset_clears_all_windows() {
    let (limiter, _clock) = limiter(1, 60);
    assert_eq!(limiter.check_and_record("ws"), LimiterDecision::Allowed);
    limiter.reset();
    assert_eq!(limiter.check_and_record("ws"), LimiterDecision::Allowed);
  }
}
