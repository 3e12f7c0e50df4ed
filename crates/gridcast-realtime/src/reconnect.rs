use crate::error::ConnectError;
use std::time::Duration;
use tokio::time::Instant;

pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;
pub const DEFAULT_BACKOFF_MULTIPLIER: u32 = 2;
pub const DEFAULT_MAX_DELAY_MS: u64 = 10_000;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub multiplier: u32,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl BackoffPolicy {
    /// `min(base * multiplier^(attempt - 1), max)` for a 1-based attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.max(1) - 1;
        let factor = u64::from(self.multiplier.max(1)).saturating_pow(exponent);
        let base_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(base_ms.saturating_mul(factor)).min(self.max_delay)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    Retry { attempt: u32, delay: Duration },
    GiveUp { attempts: u32 },
    /// The failure cannot be fixed by retrying with the same credentials.
    Terminal,
}

/// Attempt counter plus the single pending reconnect deadline.
#[derive(Debug, Clone)]
pub struct ReconnectController {
    policy: BackoffPolicy,
    attempt: u32,
    deadline: Option<Instant>,
}

impl ReconnectController {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            attempt: 0,
            deadline: None,
        }
    }

    pub fn policy(&self) -> BackoffPolicy {
        self.policy
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Record a qualifying drop. Any pending deadline is replaced.
    pub fn on_drop(&mut self, error: &ConnectError, now: Instant) -> ReconnectDecision {
        self.deadline = None;
        if !error.is_retryable() {
            return ReconnectDecision::Terminal;
        }
        if self.attempt >= self.policy.max_attempts {
            return ReconnectDecision::GiveUp {
                attempts: self.attempt,
            };
        }
        self.attempt += 1;
        let delay = self.policy.delay_for(self.attempt);
        self.deadline = Some(now + delay);
        ReconnectDecision::Retry {
            attempt: self.attempt,
            delay,
        }
    }

    /// Consume the deadline once it has fired.
    pub fn fire(&mut self) {
        self.deadline = None;
    }

    pub fn on_success(&mut self) {
        self.attempt = 0;
        self.deadline = None;
    }

    pub fn cancel(&mut self) {
        self.on_success();
    }
}
