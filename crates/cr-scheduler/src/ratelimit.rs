//! Per-user rolling-window submission counter.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Rolling-window rate limiter keyed by user.
///
/// The window slides from each submission's own timestamp — no calendar
/// alignment. Each key's ledger sits behind its own lock, so the
/// read-modify-write is atomic per user without any global lock.
#[derive(Debug)]
pub struct RateLimitCounter {
    cap: usize,
    window: Duration,
    ledgers: DashMap<String, Mutex<VecDeque<DateTime<Utc>>>>,
}

impl RateLimitCounter {
    pub fn new(cap: usize, window_secs: u64) -> Self {
        Self {
            cap,
            window: Duration::seconds(window_secs as i64),
            ledgers: DashMap::new(),
        }
    }

    /// Record a submission attempt for `user`. Returns `false` when the cap
    /// is already spent inside the window; attempts are counted at check
    /// time, whether or not later admission steps pass.
    pub fn try_acquire(&self, user: &str) -> bool {
        self.try_acquire_at(user, Utc::now())
    }

    /// Clock-injected variant of [`RateLimitCounter::try_acquire`].
    pub fn try_acquire_at(&self, user: &str, now: DateTime<Utc>) -> bool {
        let entry = self
            .ledgers
            .entry(user.to_string())
            .or_insert_with(|| Mutex::new(VecDeque::new()));
        let mut ledger = entry.lock();

        while let Some(oldest) = ledger.front() {
            if now - *oldest >= self.window {
                ledger.pop_front();
            } else {
                break;
            }
        }

        if ledger.len() >= self.cap {
            return false;
        }
        ledger.push_back(now);
        true
    }

    /// Submissions currently counted against `user`.
    pub fn count_at(&self, user: &str, now: DateTime<Utc>) -> usize {
        self.ledgers
            .get(user)
            .map(|entry| {
                let ledger = entry.lock();
                ledger.iter().filter(|t| now - **t < self.window).count()
            })
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn twentieth_succeeds_twenty_first_is_rejected() {
        let limiter = RateLimitCounter::new(20, 3600);
        for i in 0..20 {
            assert!(limiter.try_acquire_at("alice", at(i)), "submission {i}");
        }
        assert!(!limiter.try_acquire_at("alice", at(20)));
    }

    #[test]
    fn window_slides_from_submission_time_not_calendar() {
        let limiter = RateLimitCounter::new(2, 60);
        assert!(limiter.try_acquire_at("alice", at(0)));
        assert!(limiter.try_acquire_at("alice", at(30)));
        assert!(!limiter.try_acquire_at("alice", at(59)));

        // The first submission ages out exactly one window after itself.
        assert!(limiter.try_acquire_at("alice", at(60)));
        assert_eq!(limiter.count_at("alice", at(60)), 2);
    }

    #[test]
    fn users_are_isolated() {
        let limiter = RateLimitCounter::new(1, 3600);
        assert!(limiter.try_acquire_at("alice", at(0)));
        assert!(limiter.try_acquire_at("bob", at(0)));
        assert!(!limiter.try_acquire_at("alice", at(1)));
    }

    #[test]
    fn rejected_attempts_do_not_extend_the_window() {
        let limiter = RateLimitCounter::new(1, 60);
        assert!(limiter.try_acquire_at("alice", at(0)));
        assert!(!limiter.try_acquire_at("alice", at(10)));
        // Only the accepted submission occupies the window.
        assert!(limiter.try_acquire_at("alice", at(60)));
    }
}
