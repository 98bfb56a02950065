use std::time::Duration;

/// Bounded exponential backoff with full jitter.
///
/// Attempt `n` (0-based) sleeps a uniform sample of
/// `[0, min(cap, base * 2^n)]`. `max_retries: None` retries forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_retries: Option<u32>,
}

impl BackoffPolicy {
    /// Live channel reconnects.
    pub const RECONNECT: Self = Self {
        base: Duration::from_millis(500),
        cap: Duration::from_secs(30),
        max_retries: None,
    };

    /// Read-state pushes: three attempts in total.
    pub const READ_RETRY: Self = Self {
        base: Duration::from_millis(200),
        cap: Duration::from_secs(2),
        max_retries: Some(2),
    };

    pub fn with_max_retries(mut self, max_retries: Option<u32>) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn start(&self) -> Backoff {
        Backoff { policy: *self, attempt: 0 }
    }

    /// Upper bound of the delay before retry `attempt`.
    pub fn cap_for(&self, attempt: u32) -> Duration {
        let base_ms = u64::try_from(self.base.as_millis()).unwrap_or(u64::MAX);
        let cap_ms = u64::try_from(self.cap.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(compute_backoff_cap(base_ms, attempt).min(cap_ms))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::RECONNECT
    }
}

/// Retry state for one sequence of attempts.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    attempt: u32,
}

impl Backoff {
    /// Delay before the next attempt, or `None` once retries are exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if let Some(max) = self.policy.max_retries {
            if self.attempt >= max {
                return None;
            }
        }
        let cap = self.policy.cap_for(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        let cap_ms = u64::try_from(cap.as_millis()).unwrap_or(u64::MAX);
        Some(Duration::from_millis(sample_delay(rand::random::<u64>(), cap_ms)))
    }

    /// Retries handed out since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// `base_ms * 2^attempt`, saturating.
pub const fn compute_backoff_cap(base_ms: u64, attempt: u32) -> u64 {
    let factor = match 1u64.checked_shl(attempt) {
        Some(value) => value,
        None => u64::MAX,
    };
    base_ms.saturating_mul(factor)
}

/// Map a random value onto `[0, cap]`.
pub const fn sample_delay(rand_value: u64, cap: u64) -> u64 {
    if cap == 0 {
        0
    } else if cap == u64::MAX {
        rand_value
    } else {
        rand_value % (cap + 1)
    }
}
