use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

/// Time source for everything that compares against a deadline (claim
/// expiry, key expiry, the rate limiter window). Injected so tests can
/// advance time deterministically.
pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock implementation used by the daemon.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }
}

/// Manually advanced clock for deterministic tests.
#[derive(Debug, Clone)]
pub struct ManualClock {
  now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
  pub fn new(start: DateTime<Utc>) -> Self {
    Self {
      now: Arc::new(Mutex::new(start)),
    }
  }

  pub fn advance(&self, duration: chrono::Duration) {
    let mut now = self.now.lock().expect("clock lock");
    *now += duration;
  }

  pub fn set(&self, instant: DateTime<Utc>) {
    let mut now = self.now.lock().expect("clock lock");
    *now = instant;
  }
}

impl Clock for ManualClock {
  fn now(&self) -> DateTime<Utc> {
    *self.now.lock().expect("clock lock")
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn manual_clock_advances() {
    let clock = ManualClock::new(Utc::now());
    let t0 = clock.now();
    clock.advance(chrono::Duration::seconds(90));
    assert_eq!(clock.now() - t0, chrono::Duration::seconds(90));
  }
}
