//! Sliding window
//!
//! Admits at most `limit` requests within any trailing `window`.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use crate::ratelimit::{Admission, RateLimitInfo};

#[derive(Debug, Clone)]
pub struct SlidingWindow {
    limit: u32,
    window: Duration,
    /// Admission instants still inside the window, oldest first
    requests: VecDeque<Instant>,
    last_activity: Instant,
}

impl SlidingWindow {
    pub fn new(limit: u32, window: Duration, now: Instant) -> Self {
        Self {
            limit,
            window,
            requests: VecDeque::new(),
            last_activity: now,
        }
    }

    /// Drops admissions that have left the window.
    fn prune(&mut self, now: Instant) {
        let Some(cutoff) = now.checked_sub(self.window) else {
            return;
        };
        while matches!(self.requests.front(), Some(&at) if at <= cutoff) {
            self.requests.pop_front();
        }
    }

    fn until_leaves(&self, admitted_at: Instant, now: Instant) -> Duration {
        admitted_at
            .checked_add(self.window)
            .map(|leaves_at| leaves_at.saturating_duration_since(now))
            .unwrap_or(Duration::MAX)
    }

    fn in_window(&self) -> u32 {
        self.requests.len() as u32
    }
}

impl Admission for SlidingWindow {
    fn try_acquire(&mut self, now: Instant, tokens: u32) -> bool {
        self.prune(now);
        self.last_activity = now;

        let fits = self
            .in_window()
            .checked_add(tokens)
            .is_some_and(|total| total <= self.limit);
        if fits {
            self.requests.extend(std::iter::repeat(now).take(tokens as usize));
            true
        } else {
            false
        }
    }

    fn info(&mut self, now: Instant) -> RateLimitInfo {
        self.prune(now);

        let remaining = self.limit.saturating_sub(self.in_window());
        let until_oldest_leaves = self
            .requests
            .front()
            .map(|&oldest| self.until_leaves(oldest, now))
            .unwrap_or(Duration::ZERO);
        let until_empty = self
            .requests
            .back()
            .map(|&newest| self.until_leaves(newest, now))
            .unwrap_or(Duration::ZERO);

        let retry_after = (remaining == 0).then_some(until_oldest_leaves);
        RateLimitInfo::new(self.limit, remaining, until_empty, retry_after)
    }

    fn is_full(&self, now: Instant) -> bool {
        match self.requests.back() {
            Some(&newest) => now
                .checked_sub(self.window)
                .is_some_and(|cutoff| newest <= cutoff),
            None => true,
        }
    }

    fn reset(&mut self, now: Instant) {
        self.requests.clear();
        self.last_activity = now;
    }

    fn last_activity(&self) -> Instant {
        self.last_activity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_admits_up_to_limit() {
        let now = Instant::now();
        let mut window = SlidingWindow::new(3, Duration::from_secs(10), now);

        assert!(window.try_acquire(now, 1));
        assert!(window.try_acquire(now, 1));
        assert!(window.try_acquire(now, 1));
        assert!(!window.try_acquire(now, 1));
    }

    #[test]
    fn test_window_slides() {
        let start = Instant::now() + Duration::from_secs(100);
        let mut window = SlidingWindow::new(2, Duration::from_secs(10), start);

        assert!(window.try_acquire(start, 1));
        assert!(window.try_acquire(start + Duration::from_secs(5), 1));
        assert!(!window.try_acquire(start + Duration::from_secs(9), 1));

        // The first admission leaves the window at start + 10s
        assert!(window.try_acquire(start + Duration::from_secs(10), 1));
        assert!(!window.try_acquire(start + Duration::from_secs(11), 1));
    }

    #[test]
    fn test_window_info_retry_after() {
        let start = Instant::now() + Duration::from_secs(100);
        let mut window = SlidingWindow::new(1, Duration::from_secs(10), start);
        window.try_acquire(start, 1);

        let info = window.info(start + Duration::from_secs(4));
        assert_eq!(info.remaining, 0);
        assert_eq!(info.retry_after, Some(Duration::from_secs(6)));
    }

    #[test]
    fn test_window_reset() {
        let now = Instant::now();
        let mut window = SlidingWindow::new(1, Duration::from_secs(10), now);
        window.try_acquire(now, 1);

        window.reset(now);

        assert!(window.try_acquire(now, 1));
    }

    #[test]
    fn test_window_oversized_request_is_refused_without_overflow() {
        let now = Instant::now();
        let mut window = SlidingWindow::new(5, Duration::from_secs(10), now);
        assert!(window.try_acquire(now, 1));

        assert!(!window.try_acquire(now, u32::MAX));
        assert!(window.try_acquire(now, 4));
        assert!(!window.try_acquire(now, 1));
    }

    #[test]
    fn test_window_info_with_unrepresentable_window() {
        let now = Instant::now();
        let mut window = SlidingWindow::new(1, Duration::MAX, now);
        window.try_acquire(now, 1);

        let info = window.info(now);
        assert_eq!(info.remaining, 0);
        assert_eq!(info.retry_after, Some(Duration::MAX));
    }

    #[test]
    fn test_window_is_full_once_every_admission_left() {
        let start = Instant::now() + Duration::from_secs(100);
        let mut window = SlidingWindow::new(2, Duration::from_secs(10), start);
        assert!(window.is_full(start));

        window.try_acquire(start, 1);
        assert!(!window.is_full(start + Duration::from_secs(5)));
        assert!(window.is_full(start + Duration::from_secs(10)));
    }
}
