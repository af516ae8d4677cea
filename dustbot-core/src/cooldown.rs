//! src/cooldown.rs
//!
//! Per-user command cooldowns. Process-local: a worker restart resets the
//! windows, and two workers never coordinate on one.

use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct CooldownTracker {
    window: Duration,
    last_used: HashMap<String, Instant>,
}

impl CooldownTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_used: HashMap::new(),
        }
    }

    /// Returns the remaining seconds when the user is still cooling down;
    /// otherwise records this use and returns `None`.
    pub fn check(&mut self, user: &str) -> Option<u64> {
        self.check_at(user, Instant::now())
    }

    fn check_at(&mut self, user: &str, now: Instant) -> Option<u64> {
        if let Some(last) = self.last_used.get(user) {
            let elapsed = now.saturating_duration_since(*last);
            if elapsed < self.window {
                return Some((self.window - elapsed).as_secs().max(1));
            }
        }
        self.last_used.insert(user.to_string(), now);
        None
    }

    pub fn reset(&mut self, user: &str) {
        self.last_used.remove(user);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_use_passes_and_starts_window() {
        let mut tracker = CooldownTracker::new(Duration::from_secs(30));
        let start = Instant::now();
        assert_eq!(tracker.check_at("alice", start), None);
        let remaining = tracker.check_at("alice", start + Duration::from_secs(10));
        assert_eq!(remaining, Some(20));
    }

    #[test]
    fn window_expiry_allows_reuse() {
        let mut tracker = CooldownTracker::new(Duration::from_secs(30));
        let start = Instant::now();
        assert_eq!(tracker.check_at("alice", start), None);
        assert_eq!(tracker.check_at("alice", start + Duration::from_secs(31)), None);
    }

    #[test]
    fn users_are_independent() {
        let mut tracker = CooldownTracker::new(Duration::from_secs(30));
        let start = Instant::now();
        assert_eq!(tracker.check_at("alice", start), None);
        assert_eq!(tracker.check_at("bob", start), None);
        assert!(tracker.check_at("alice", start + Duration::from_secs(1)).is_some());
    }

    #[test]
    fn reset_clears_the_window() {
        let mut tracker = CooldownTracker::new(Duration::from_secs(30));
        let start = Instant::now();
        assert_eq!(tracker.check_at("alice", start), None);
        tracker.reset("alice");
        assert_eq!(tracker.check_at("alice", start + Duration::from_secs(1)), None);
    }
}
