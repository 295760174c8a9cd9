//! Reconnect pacing: the fixed backoff ladder and the adaptive idle/batch policy.

use std::time::Duration;

/// Sleep before an attempt, indexed by consecutive failures (clamped).
pub const BACKOFF_LADDER_MS: [u64; 10] = [10, 20, 30, 60, 120, 300, 600, 1200, 1800, 3600];

/// Consecutive-failure counter mapped onto [`BACKOFF_LADDER_MS`].
#[derive(Debug, Default, Clone)]
pub struct Backoff {
    consecutive_errors: usize,
}

impl Backoff {
    pub fn new() -> Self {
        Self::default()
    }

    /// How long to wait before the next attempt.
    pub fn delay(&self) -> Duration {
        let idx = self.consecutive_errors.min(BACKOFF_LADDER_MS.len() - 1);
        Duration::from_millis(BACKOFF_LADDER_MS[idx])
    }

    pub fn record_failure(&mut self) {
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
    }

    pub fn record_success(&mut self) {
        self.consecutive_errors = 0;
    }

    pub fn consecutive_errors(&self) -> usize {
        self.consecutive_errors
    }
}

/// Adaptive request shape for the next connection attempt.
///
/// Idle time doubles (capped) each time a connection goes quiet. Batch size
/// halves (floor 1) each time the server overflows the burst limits, and
/// snaps back to its baseline after a batch arrives normally.
#[derive(Debug, Clone)]
pub struct BatchSizePolicy {
    base_idle: Duration,
    max_idle: Duration,
    idle_time: Duration,
    base_batch: usize,
    batch_size: usize,
}

impl BatchSizePolicy {
    pub fn new(base_idle: Duration, max_idle: Duration, base_batch: usize) -> Self {
        let base_batch = base_batch.max(1);
        let max_idle = max_idle.max(base_idle);
        Self {
            base_idle,
            max_idle,
            idle_time: base_idle,
            base_batch,
            batch_size: base_batch,
        }
    }

    pub fn idle_time(&self) -> Duration {
        self.idle_time
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn on_idle(&mut self) {
        self.idle_time = (self.idle_time * 2).min(self.max_idle);
    }

    /// Halve the batch size. Returns `false` when it was already 1, meaning
    /// the burst cannot shrink any further.
    pub fn on_too_large(&mut self) -> bool {
        if self.batch_size <= 1 {
            return false;
        }
        self.batch_size = (self.batch_size / 2).max(1);
        true
    }

    /// A batch arrived within limits.
    pub fn on_batch(&mut self) {
        self.batch_size = self.base_batch;
        self.idle_time = self.base_idle;
    }
}
