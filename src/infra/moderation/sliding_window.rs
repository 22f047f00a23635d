// Sliding-window rate limiter for report submissions.
//
// Per-user timestamps live in a DashMap so concurrent submitters don't
// contend on a single lock. State is process-local and not persisted.

use crate::core::moderation::{ModerationConfig, RateDecision, ReportRateLimiter, UserId};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;

pub struct SlidingWindowLimiter {
    max_events: usize,
    window: Duration,
    hits: DashMap<UserId, VecDeque<DateTime<Utc>>>,
}

impl SlidingWindowLimiter {
    pub fn new(max_events: u32, window: Duration) -> Self {
        Self {
            max_events: max_events.max(1) as usize,
            window,
            hits: DashMap::new(),
        }
    }

    pub fn from_config(config: &ModerationConfig) -> Self {
        Self::new(
            config.rate_limit_max_reports,
            Duration::seconds(config.rate_limit_window_secs as i64),
        )
    }

    /// Drop users whose window is entirely in the past.
    pub fn prune(&self, now: DateTime<Utc>) {
        let cutoff = now - self.window;
        self.hits
            .retain(|_, hits| hits.back().is_some_and(|last| *last > cutoff));
    }
}

impl ReportRateLimiter for SlidingWindowLimiter {
    fn check(&self, user_id: UserId, now: DateTime<Utc>) -> RateDecision {
        let cutoff = now - self.window;
        let mut hits = self.hits.entry(user_id).or_default();

        while hits.front().is_some_and(|at| *at <= cutoff) {
            hits.pop_front();
        }

        if hits.len() >= self.max_events {
            let retry_after = hits
                .front()
                .map(|oldest| (*oldest + self.window - now).num_seconds())
                .unwrap_or(0);
            return RateDecision::Limited {
                retry_after_secs: retry_after.max(1) as u64,
            };
        }

        hits.push_back(now);
        RateDecision::Allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 1, 8, 0, 0).unwrap()
    }

    #[test]
    fn limits_after_max_events_in_window() {
        let limiter = SlidingWindowLimiter::new(3, Duration::seconds(60));

        for i in 0..3 {
            assert_eq!(
                limiter.check(1, t0() + Duration::seconds(i)),
                RateDecision::Allowed
            );
        }
        assert_eq!(
            limiter.check(1, t0() + Duration::seconds(10)),
            RateDecision::Limited { retry_after_secs: 50 }
        );
        // Other users are unaffected
        assert_eq!(limiter.check(2, t0()), RateDecision::Allowed);
    }

    #[test]
    fn window_slides_forward() {
        let limiter = SlidingWindowLimiter::new(2, Duration::seconds(60));
        assert_eq!(limiter.check(1, t0()), RateDecision::Allowed);
        assert_eq!(limiter.check(1, t0() + Duration::seconds(30)), RateDecision::Allowed);
        assert!(matches!(
            limiter.check(1, t0() + Duration::seconds(59)),
            RateDecision::Limited { .. }
        ));

        // The first hit leaves the window at t0 + 60s
        assert_eq!(limiter.check(1, t0() + Duration::seconds(60)), RateDecision::Allowed);
    }

    #[test]
    fn rejected_attempts_do_not_extend_the_window() {
        let limiter = SlidingWindowLimiter::new(1, Duration::seconds(10));
        assert_eq!(limiter.check(1, t0()), RateDecision::Allowed);
        for i in 1..10 {
            assert!(matches!(
                limiter.check(1, t0() + Duration::seconds(i)),
                RateDecision::Limited { .. }
            ));
        }
        assert_eq!(limiter.check(1, t0() + Duration::seconds(10)), RateDecision::Allowed);
    }

    #[test]
    fn prune_forgets_idle_users() {
        let limiter = SlidingWindowLimiter::new(1, Duration::seconds(10));
        limiter.check(1, t0());
        limiter.check(2, t0() + Duration::seconds(8));

        limiter.prune(t0() + Duration::seconds(15));
        assert!(!limiter.hits.contains_key(&1));
        assert!(limiter.hits.contains_key(&2));
    }
}
