//! Fixed-window counter state.

use chrono::{DateTime, TimeDelta, Utc};
use std::time::Duration;

/// Per-key counter state for a single fixed window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitEntry {
    /// Admitted attempts in the current window
    pub count: u32,
    /// When the current window ends and `count` must reset
    pub window_reset_at: DateTime<Utc>,
}

impl RateLimitEntry {
    /// Open a fresh window starting at `now`.
    pub fn new(now: DateTime<Utc>, window: Duration) -> Self {
        Self {
            count: 0,
            window_reset_at: window_end(now, window),
        }
    }

    /// Whether the window has ended at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.window_reset_at <= now
    }

    /// Replace an expired window with a fresh one.
    ///
    /// Returns `true` if the window rolled over.
    pub fn roll_over_if_expired(&mut self, now: DateTime<Utc>, window: Duration) -> bool {
        if self.is_expired(now) {
            *self = Self::new(now, window);
            true
        } else {
            false
        }
    }

    /// Admit one attempt if the window still has room under `limit`.
    ///
    /// Denied attempts leave the count untouched.
    pub fn try_admit(&mut self, limit: u32) -> bool {
        if self.count < limit {
            self.count += 1;
            true
        } else {
            false
        }
    }

    /// Give back one previously admitted attempt.
    pub fn refund(&mut self) {
        self.count = self.count.saturating_sub(1);
    }

    /// Remaining quota under `limit`.
    pub fn remaining(&self, limit: u32) -> u32 {
        limit.saturating_sub(self.count)
    }
}

/// The end of a window of length `window` opened at `now`, saturating on overflow.
pub(crate) fn window_end(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(window)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Whole seconds until `reset_time`, rounded up and never negative.
pub fn retry_after_secs(reset_time: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let millis = (reset_time - now).num_milliseconds();
    if millis <= 0 {
        0
    } else {
        (millis as u64).div_ceil(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_new_entry_window() {
        let entry = RateLimitEntry::new(start(), Duration::from_millis(60_000));

        assert_eq!(entry.count, 0);
        assert_eq!(entry.window_reset_at, start() + TimeDelta::seconds(60));
        assert!(entry.window_reset_at > start());
    }

    #[test]
    fn test_try_admit_stops_at_limit() {
        let mut entry = RateLimitEntry::new(start(), Duration::from_secs(60));

        for _ in 0..3 {
            assert!(entry.try_admit(3));
        }

        // The 4th attempt is denied and not counted
        assert!(!entry.try_admit(3));
        assert_eq!(entry.count, 3);
        assert_eq!(entry.remaining(3), 0);
    }

    #[test]
    fn test_expiry_is_inclusive_of_reset_time() {
        let entry = RateLimitEntry::new(start(), Duration::from_secs(60));

        assert!(!entry.is_expired(start() + TimeDelta::milliseconds(59_999)));
        assert!(entry.is_expired(start() + TimeDelta::seconds(60)));
    }

    #[test]
    fn test_roll_over_resets_count() {
        let window = Duration::from_secs(60);
        let mut entry = RateLimitEntry::new(start(), window);
        entry.try_admit(10);
        entry.try_admit(10);

        let later = start() + TimeDelta::seconds(61);
        assert!(entry.roll_over_if_expired(later, window));
        assert_eq!(entry.count, 0);
        assert_eq!(entry.window_reset_at, later + TimeDelta::seconds(60));

        // Fresh window does not roll again
        assert!(!entry.roll_over_if_expired(later, window));
    }

    #[test]
    fn test_refund_saturates() {
        let mut entry = RateLimitEntry::new(start(), Duration::from_secs(1));
        entry.refund();
        assert_eq!(entry.count, 0);

        entry.try_admit(5);
        entry.refund();
        assert_eq!(entry.remaining(5), 5);
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let now = start();

        assert_eq!(retry_after_secs(now + TimeDelta::milliseconds(1), now), 1);
        assert_eq!(retry_after_secs(now + TimeDelta::milliseconds(1000), now), 1);
        assert_eq!(retry_after_secs(now + TimeDelta::milliseconds(1001), now), 2);
        assert_eq!(retry_after_secs(now, now), 0);
        assert_eq!(retry_after_secs(now - TimeDelta::seconds(5), now), 0);
    }
}
