//! Retry policy and request identity rotation.
//!
//! Both are pure: the engine asks them what to do and performs the waiting
//! and header selection itself.

use std::time::Duration;

use jobpulse_shared::{FetchFailure, FetchFailureKind, FetchLimits};

/// What went wrong with a single attempt at a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptError {
    /// Connection, DNS, TLS, timeout, or body read error.
    Network(String),
    /// Non-success HTTP status, with the server's `Retry-After` hint if any.
    Status {
        code: u16,
        retry_after: Option<Duration>,
    },
    /// The body could not be parsed by the source's extractor.
    Malformed(String),
}

impl AttemptError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Malformed(_) => true,
            Self::Status { code, .. } => matches!(code, 408 | 429) || *code >= 500,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Convert into the failure value reported for the page.
    pub fn into_failure(self, source_id: &str, url: &str, attempts: u32) -> FetchFailure {
        let (kind, message) = match self {
            Self::Network(msg) => (FetchFailureKind::Network, msg),
            Self::Status { code, .. } if code == 429 || code == 503 => (
                FetchFailureKind::RateLimited { code },
                format!("HTTP {code}"),
            ),
            Self::Status { code, .. } => (FetchFailureKind::Status { code }, format!("HTTP {code}")),
            Self::Malformed(msg) => (FetchFailureKind::Malformed, msg),
        };
        FetchFailure {
            source_id: source_id.to_string(),
            url: url.to_string(),
            attempts,
            kind,
            message,
        }
    }
}

/// Decision returned by [`RetryPolicy::decide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    GiveUp,
}

/// Exponential backoff with an attempt ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts allowed, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base: Duration,
    /// Cap for any single delay.
    pub max: Duration,
}

impl RetryPolicy {
    /// Delay after `attempts_made` failed attempts: `base * 2^(attempts_made - 1)`, capped.
    pub fn backoff(&self, attempts_made: u32) -> Duration {
        let exponent = attempts_made.saturating_sub(1);
        let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Decide whether to try again after the `attempts_made`-th attempt failed.
    pub fn decide(&self, attempts_made: u32, error: &AttemptError) -> RetryDecision {
        if attempts_made >= self.max_attempts || !error.is_retryable() {
            return RetryDecision::GiveUp;
        }
        let mut delay = self.backoff(attempts_made);
        if let Some(hint) = error.retry_after() {
            delay = delay.max(hint).min(self.max);
        }
        RetryDecision::Retry { delay }
    }
}

impl From<&FetchLimits> for RetryPolicy {
    fn from(limits: &FetchLimits) -> Self {
        Self {
            max_attempts: limits.max_attempts.max(1),
            base: limits.backoff_base,
            max: limits.backoff_max,
        }
    }
}

/// Round-robin User-Agent selection.
#[derive(Debug, Clone, Default)]
pub struct IdentityRotation {
    agents: Vec<String>,
}

impl IdentityRotation {
    pub fn new(agents: Vec<String>) -> Self {
        Self {
            agents: agents.into_iter().filter(|a| !a.trim().is_empty()).collect(),
        }
    }

    /// Agent for the `attempt`-th try (0-based) of request number `request_index`.
    /// Consecutive requests and retries of one request each move to the next agent.
    pub fn pick(&self, request_index: usize, attempt: u32) -> Option<&str> {
        if self.agents.is_empty() {
            return None;
        }
        let slot = request_index.wrapping_add(attempt as usize) % self.agents.len();
        Some(self.agents[slot].as_str())
    }
}
