// src/engine/clock.rs

//! Lazy time enforcement. Sessions keep no running timer; remaining time is
//! recomputed from the last recorded event whenever a request arrives.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeCheck {
    /// Remaining seconds after charging the idle gap; None for unlimited
    /// sessions.
    pub remaining_sec: Option<i64>,
    pub expired: bool,
}

/// Recomputes the remaining budget as of `now`. Elapsed time is charged from
/// `last_event_at`; clock skew that would make the gap negative is clamped to
/// zero so a session can only lose time, never gain it. Unlimited sessions
/// (no budget) never expire.
pub fn check(
    remaining_sec: Option<i64>,
    last_event_at: DateTime<Utc>,
    deadline: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> TimeCheck {
    let Some(remaining) = remaining_sec else {
        return TimeCheck {
            remaining_sec: None,
            expired: false,
        };
    };

    let elapsed = (now - last_event_at).num_seconds().max(0);
    let left = (remaining - elapsed).max(0);
    let past_deadline = deadline.is_some_and(|d| now >= d);

    TimeCheck {
        remaining_sec: Some(left),
        expired: left == 0 || past_deadline,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-06-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn charges_idle_time_since_last_event() {
        let now = t0() + TimeDelta::seconds(40);
        let c = check(Some(100), t0(), Some(t0() + TimeDelta::seconds(100)), now);
        assert_eq!(c.remaining_sec, Some(60));
        assert!(!c.expired);
    }

    #[test]
    fn expires_when_budget_runs_out() {
        let now = t0() + TimeDelta::seconds(150);
        let c = check(Some(100), t0(), Some(t0() + TimeDelta::seconds(100)), now);
        assert_eq!(c.remaining_sec, Some(0));
        assert!(c.expired);
    }

    #[test]
    fn expires_at_deadline_even_with_budget_left() {
        // Deadline was derived from an earlier remaining value; if it has
        // passed, the session is over regardless of the stored counter.
        let deadline = t0() + TimeDelta::seconds(30);
        let now = t0() + TimeDelta::seconds(30);
        let c = check(Some(500), t0(), Some(deadline), now);
        assert!(c.expired);
    }

    #[test]
    fn clock_skew_never_refunds_time() {
        let now = t0() - TimeDelta::seconds(20);
        let c = check(Some(100), t0(), None, now);
        assert_eq!(c.remaining_sec, Some(100));
        assert!(!c.expired);
    }

    #[test]
    fn unlimited_sessions_never_expire() {
        let now = t0() + TimeDelta::days(30);
        let c = check(None, t0(), None, now);
        assert_eq!(c.remaining_sec, None);
        assert!(!c.expired);
    }
}
