//! Delivery state machine.
//!
//! Pure decision logic: how an attempt's outcome is classified, how long to
//! back off before the next attempt, and which state a delivery moves to.
//! Persistence applies the resulting [`Transition`] atomically.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;

use crate::models::{AttemptErrorType, Delivery, DeliveryStatus};

/// Default delay before the first retry.
pub const DEFAULT_BASE_DELAY_SECS: i64 = 30;

/// Default ceiling on any single backoff delay.
pub const DEFAULT_MAX_DELAY_SECS: i64 = 3600;

/// Default jitter applied around the computed delay (±20%).
pub const DEFAULT_JITTER_RATIO: f64 = 0.2;

/// Exponential backoff with a ceiling and symmetric jitter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::seconds(DEFAULT_BASE_DELAY_SECS),
            max_delay: Duration::seconds(DEFAULT_MAX_DELAY_SECS),
            jitter_ratio: DEFAULT_JITTER_RATIO,
        }
    }
}

impl RetryPolicy {
    pub fn new(base_delay_secs: u64, max_delay_secs: u64, jitter_ratio: f64) -> Self {
        Self {
            base_delay: Duration::seconds(base_delay_secs as i64),
            max_delay: Duration::seconds(max_delay_secs as i64),
            jitter_ratio: jitter_ratio.clamp(0.0, 0.99),
        }
    }

    /// `base * 2^(attempts-1)`, capped at `max_delay`. No jitter.
    pub fn base_backoff(&self, attempts: i32) -> Duration {
        let exponent = (attempts.max(1) - 1).min(30) as u32;
        let base_ms = self.base_delay.num_milliseconds().max(0);
        let delay_ms = base_ms.saturating_mul(1_i64 << exponent);
        Duration::milliseconds(delay_ms.min(self.max_delay.num_milliseconds()))
    }

    /// Backoff scaled by `1 + jitter` where `jitter` is in `[-ratio, ratio]`.
    pub fn backoff_with_jitter(&self, attempts: i32, jitter: f64) -> Duration {
        let jitter = jitter.clamp(-self.jitter_ratio, self.jitter_ratio);
        let base_ms = self.base_backoff(attempts).num_milliseconds() as f64;
        Duration::milliseconds((base_ms * (1.0 + jitter)).round() as i64)
    }

    /// When the next attempt becomes due after `attempts` attempts so far.
    pub fn next_retry_at(&self, now: DateTime<Utc>, attempts: i32) -> DateTime<Utc> {
        let jitter = if self.jitter_ratio > 0.0 {
            rand::thread_rng().gen_range(-self.jitter_ratio..=self.jitter_ratio)
        } else {
            0.0
        };
        now + self.backoff_with_jitter(attempts, jitter)
    }
}

/// Verdict on a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Success,
    /// Worth trying again while budget remains.
    Retryable(AttemptErrorType),
    /// The receiver rejected the payload; retrying will not help.
    Terminal(AttemptErrorType),
}

impl Verdict {
    pub fn is_success(&self) -> bool {
        matches!(self, Verdict::Success)
    }

    pub fn error_type(&self) -> Option<AttemptErrorType> {
        match self {
            Verdict::Success => None,
            Verdict::Retryable(kind) | Verdict::Terminal(kind) => Some(*kind),
        }
    }
}

/// 4xx responses other than 408 and 429 mean the receiver will never accept
/// this payload.
pub fn is_terminal_status(status: u16) -> bool {
    (400..500).contains(&status) && status != 408 && status != 429
}

/// Classify an attempt from its HTTP status (if any response arrived) and the
/// transport-level failure (if any).
///
/// A non-2xx status always classifies as `http_error`, even if the body could
/// not be read.
pub fn classify(status: Option<u16>, failure: Option<AttemptErrorType>) -> Verdict {
    match (status, failure) {
        (Some(code), _) if !(200..300).contains(&code) => {
            if is_terminal_status(code) {
                Verdict::Terminal(AttemptErrorType::HttpError)
            } else {
                Verdict::Retryable(AttemptErrorType::HttpError)
            }
        }
        (_, Some(kind)) => Verdict::Retryable(kind),
        (Some(_), None) => Verdict::Success,
        (None, None) => Verdict::Retryable(AttemptErrorType::InvalidResponse),
    }
}

/// Delivery state after an attempt has been recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub status: DeliveryStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Decide the delivery's next state after one more attempt with `verdict`.
///
/// Keeps `attempts <= max_attempts` and `dead_letter => attempts == max_attempts`.
pub fn plan_transition(
    delivery: &Delivery,
    verdict: Verdict,
    now: DateTime<Utc>,
    retry: &RetryPolicy,
) -> Transition {
    let attempts = delivery.attempts + 1;
    let max_attempts = delivery.max_attempts.max(attempts);

    match verdict {
        Verdict::Success => Transition {
            status: DeliveryStatus::Success,
            attempts,
            max_attempts,
            next_retry_at: None,
            completed_at: Some(now),
        },
        Verdict::Retryable(_) if attempts < max_attempts => Transition {
            status: DeliveryStatus::Pending,
            attempts,
            max_attempts,
            next_retry_at: Some(retry.next_retry_at(now, attempts)),
            completed_at: None,
        },
        Verdict::Retryable(_) => dead_letter(attempts, max_attempts, now),
        Verdict::Terminal(_) => dead_letter(attempts, attempts, now),
    }
}

fn dead_letter(attempts: i32, max_attempts: i32, now: DateTime<Utc>) -> Transition {
    Transition {
        status: DeliveryStatus::DeadLetter,
        attempts,
        max_attempts,
        next_retry_at: None,
        completed_at: Some(now),
    }
}
