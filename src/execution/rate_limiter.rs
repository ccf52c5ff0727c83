use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::clock::Clock;

/// Per-subject throttling policy.
///
/// `is_limited` is a pure query; only `record_event` changes state, so a rejected
/// attempt never extends its own wait.
pub trait RateLimiter: Send + Sync {
    fn is_limited(&self, subject: &str) -> bool;
    fn record_event(&self, subject: &str);
}

#[derive(Debug, Clone, Copy)]
struct SubjectState {
    last_event_at: DateTime<Utc>,
    streak: u32,
}

/// ASCII-only folding, the same equality the ledger's NOCASE column uses.
fn subject_key(subject: &str) -> String {
    subject.to_ascii_lowercase()
}

// ---------------------------------------------------------------------------
// Constant delay
// ---------------------------------------------------------------------------

/// Limited while less than `delay` has passed since the subject's last event.
pub struct ConstantRateLimiter {
    delay: Duration,
    clock: Arc<dyn Clock>,
    subjects: DashMap<String, SubjectState>,
}

impl ConstantRateLimiter {
    pub fn new(delay: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            delay,
            clock,
            subjects: DashMap::new(),
        }
    }
}

impl RateLimiter for ConstantRateLimiter {
    fn is_limited(&self, subject: &str) -> bool {
        match self.subjects.get(&subject_key(subject)) {
            Some(state) => self.clock.now() - state.last_event_at < self.delay,
            None => false,
        }
    }

    fn record_event(&self, subject: &str) {
        let now = self.clock.now();
        self.subjects.retain(|_, state| now - state.last_event_at < self.delay);
        self.subjects.insert(
            subject_key(subject),
            SubjectState {
                last_event_at: now,
                streak: 0,
            },
        );
    }
}

// ---------------------------------------------------------------------------
// Exponential backoff
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct ExponentialParams {
    /// Cap on how long a subject is ever made to wait.
    pub max_delay: Duration,
    /// The first wait after a reset is `2^base_factor` seconds.
    pub base_factor: u32,
    /// Idle time after which the streak resets to `base_factor`.
    pub reset_after: Duration,
}

impl Default for ExponentialParams {
    fn default() -> Self {
        Self {
            max_delay: Duration::minutes(10),
            base_factor: 1,
            reset_after: Duration::hours(1),
        }
    }
}

/// Limited while `elapsed <= 2^streak` seconds and `elapsed < max_delay`.
pub struct ExponentialRateLimiter {
    params: ExponentialParams,
    clock: Arc<dyn Clock>,
    subjects: DashMap<String, SubjectState>,
}

impl ExponentialRateLimiter {
    pub fn new(params: ExponentialParams, clock: Arc<dyn Clock>) -> Self {
        Self {
            params,
            clock,
            subjects: DashMap::new(),
        }
    }

    /// Current wait window for a streak, saturating instead of overflowing.
    fn backoff(streak: u32) -> Duration {
        let secs = 2i64.checked_pow(streak).unwrap_or(i64::MAX);
        Duration::try_seconds(secs).unwrap_or(Duration::MAX)
    }
}

impl RateLimiter for ExponentialRateLimiter {
    fn is_limited(&self, subject: &str) -> bool {
        let Some(state) = self.subjects.get(&subject_key(subject)) else {
            return false;
        };
        let elapsed = self.clock.now() - state.last_event_at;
        elapsed <= Self::backoff(state.streak) && elapsed < self.params.max_delay
    }

    fn record_event(&self, subject: &str) {
        let now = self.clock.now();
        let base = self.params.base_factor;
        let reset_after = self.params.reset_after;
        let max_delay = self.params.max_delay;

        // Past both windows a subject behaves exactly as if it was never seen.
        self.subjects.retain(|_, state| {
            let elapsed = now - state.last_event_at;
            elapsed <= reset_after || elapsed < max_delay
        });

        self.subjects
            .entry(subject_key(subject))
            .and_modify(|state| {
                if now - state.last_event_at > reset_after {
                    state.streak = base;
                } else {
                    state.streak = state.streak.saturating_add(1);
                }
                state.last_event_at = now;
            })
            .or_insert(SubjectState {
                last_event_at: now,
                streak: base,
            });

        tracing::debug!(subject = %subject, "Rate limiter: event recorded");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn exponential(clock: &Arc<ManualClock>) -> ExponentialRateLimiter {
        ExponentialRateLimiter::new(
            ExponentialParams {
                max_delay: Duration::seconds(10),
                base_factor: 1,
                reset_after: Duration::seconds(30),
            },
            clock.clone(),
        )
    }

    #[test]
    fn test_unknown_subject_is_not_limited() {
        let clock = Arc::new(ManualClock::at_epoch());
        assert!(!exponential(&clock).is_limited("alice"));
    }

    #[test]
    fn test_exponential_backoff_grows_with_streak() {
        let clock = Arc::new(ManualClock::at_epoch());
        let limiter = exponential(&clock);

        limiter.record_event("alice"); // t=0, streak=1 -> 2s window

        clock.advance_secs(1);
        assert!(limiter.is_limited("alice"));
        clock.advance_secs(1); // t=2, boundary is inclusive
        assert!(limiter.is_limited("alice"));
        clock.advance_secs(1); // t=3
        assert!(!limiter.is_limited("alice"));

        limiter.record_event("alice"); // t=3, streak=2 -> 4s window
        clock.advance_secs(3); // t=6
        assert!(limiter.is_limited("alice"));
        clock.advance_secs(1); // t=7, elapsed 4 <= 4
        assert!(limiter.is_limited("alice"));
        clock.advance_secs(1); // t=8
        assert!(!limiter.is_limited("alice"));
    }

    #[test]
    fn test_max_delay_caps_wait() {
        let clock = Arc::new(ManualClock::at_epoch());
        let limiter = exponential(&clock);

        // Five quick events push the streak to 5 (32s window), beyond max_delay.
        for _ in 0..5 {
            limiter.record_event("bob");
            clock.advance_secs(1);
        }
        clock.advance_secs(8); // 9s since the last event
        assert!(limiter.is_limited("bob"));
        clock.advance_secs(1); // 10s == max_delay
        assert!(!limiter.is_limited("bob"));
    }

    #[test]
    fn test_streak_resets_after_idle() {
        let clock = Arc::new(ManualClock::at_epoch());
        let limiter = exponential(&clock);

        for _ in 0..4 {
            limiter.record_event("carol");
            clock.advance_secs(1);
        }
        clock.advance_secs(31);
        limiter.record_event("carol"); // streak back to 1

        clock.advance_secs(3);
        assert!(!limiter.is_limited("carol"));
    }

    #[test]
    fn test_subjects_are_independent_and_case_insensitive() {
        let clock = Arc::new(ManualClock::at_epoch());
        let limiter = exponential(&clock);

        limiter.record_event("Alice");
        assert!(limiter.is_limited("alice"));
        assert!(!limiter.is_limited("bob"));
    }

    #[test]
    fn test_case_folding_is_ascii_only() {
        let clock = Arc::new(ManualClock::at_epoch());
        let limiter = exponential(&clock);

        limiter.record_event("\u{c9}LAN");
        assert!(limiter.is_limited("\u{c9}lan"));
        assert!(!limiter.is_limited("\u{e9}lan"));
    }

    #[test]
    fn test_idle_subjects_are_pruned_on_record() {
        let clock = Arc::new(ManualClock::at_epoch());
        let limiter = exponential(&clock);

        limiter.record_event("alice");
        limiter.record_event("bob");
        clock.advance_secs(30);
        limiter.record_event("carol");
        assert_eq!(limiter.subjects.len(), 3);

        clock.advance_secs(1); // alice and bob idle for 31s, past reset_after and max_delay
        limiter.record_event("carol");
        assert_eq!(limiter.subjects.len(), 1);
        assert!(!limiter.is_limited("alice"));

        let constant = ConstantRateLimiter::new(Duration::seconds(5), clock.clone());
        constant.record_event("dave");
        clock.advance_secs(5);
        constant.record_event("erin");
        assert_eq!(constant.subjects.len(), 1);
        assert!(constant.is_limited("erin"));
    }

    #[test]
    fn test_constant_delay() {
        let clock = Arc::new(ManualClock::at_epoch());
        let limiter = ConstantRateLimiter::new(Duration::seconds(5), clock.clone());

        limiter.record_event("dave");
        clock.advance_secs(4);
        assert!(limiter.is_limited("dave"));
        clock.advance_secs(1);
        assert!(!limiter.is_limited("dave"));
    }

    #[test]
    fn test_zero_delay_never_limits() {
        let clock = Arc::new(ManualClock::at_epoch());
        let limiter = ConstantRateLimiter::new(Duration::zero(), clock);

        limiter.record_event("erin");
        assert!(!limiter.is_limited("erin"));
    }
}
