//! Exponential backoff policy
//!
//! Shared by the report generator's retry loop and the client-side reconnect
//! logic. Attempts are 1-based: attempt 1 waits `base`, attempt 2 waits
//! `2 * base`, and so on, never exceeding `max`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::protocol::CloseKind;

/// Capped exponential backoff with a bounded number of attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Delay before the first retry
    #[serde(with = "millis")]
    pub base: Duration,
    /// Upper bound on any single delay
    #[serde(with = "millis")]
    pub max: Duration,
    /// Attempts after which the caller gives up
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl BackoffPolicy {
    pub fn new(base: Duration, max: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max,
            max_attempts,
        }
    }

    /// Delay for the given attempt, ignoring the attempt cap
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let factor = 1u32 << exponent;
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Delay before `attempt`, or `None` once `max_attempts` is exceeded
    ///
    /// Pure function of the attempt number.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        Some(self.delay_for(attempt))
    }
}

/// What a client should do after its channel closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Wait, then open a new channel
    Reconnect(Duration),
    /// Attempts exhausted; fall back to polling only
    GiveUp,
    /// Orderly close; nothing more to receive
    Stop,
}

/// Client-side reconnect bookkeeping for one persistent channel
#[derive(Debug, Clone)]
pub struct ConnectionLifecycle {
    policy: BackoffPolicy,
    attempt: u32,
}

impl ConnectionLifecycle {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Channel opened successfully; the attempt counter starts over
    pub fn on_open(&mut self) {
        self.attempt = 0;
    }

    /// Channel closed with the given classification
    pub fn on_close(&mut self, kind: CloseKind) -> ReconnectDecision {
        if kind == CloseKind::Normal {
            return ReconnectDecision::Stop;
        }

        self.attempt += 1;
        match self.policy.next_delay(self.attempt) {
            Some(delay) => ReconnectDecision::Reconnect(delay),
            None => ReconnectDecision::GiveUp,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
