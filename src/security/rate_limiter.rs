use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{PromptError, Result};

/// Length of the enhance rate-limit window.
pub const ENHANCE_WINDOW: Duration = Duration::from_secs(60);

/// Enhance invocations allowed per window.
pub const ENHANCE_MAX_PER_WINDOW: u32 = 2;

/// Fixed-window limiter for the "enhance" action.
///
/// A window opens at the first recorded invocation and lasts
/// [`ENHANCE_WINDOW`]. Querying never mutates: an expired window simply
/// reads as full quota until the next [`record`](Self::record) opens a new
/// one.
pub struct EnhanceLimiter {
    window: Duration,
    max_per_window: u32,
    state: Mutex<WindowState>,
}

#[derive(Debug, Default)]
struct WindowState {
    window_start: Option<Instant>,
    count: u32,
}

impl WindowState {
    /// Invocations counted against the window that is live at `now`.
    fn used_at(&self, now: Instant, window: Duration) -> u32 {
        match self.window_start {
            Some(start) if now.saturating_duration_since(start) < window => self.count,
            _ => 0,
        }
    }
}

/// Snapshot of the limiter for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimiterStatus {
    /// Invocations used in the live window.
    pub used: u32,
    /// Invocations allowed per window.
    pub limit: u32,
    /// Time until the live window expires, if one is open.
    pub resets_in: Option<Duration>,
}

impl Default for EnhanceLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl EnhanceLimiter {
    pub fn new() -> Self {
        Self::with_limits(ENHANCE_WINDOW, ENHANCE_MAX_PER_WINDOW)
    }

    pub(crate) fn with_limits(window: Duration, max_per_window: u32) -> Self {
        Self {
            window,
            max_per_window,
            state: Mutex::new(WindowState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, WindowState> {
        // the state is two plain integers; a panic mid-update cannot leave it torn
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Invocations still allowed at `now`.
    pub fn remaining_at(&self, now: Instant) -> u32 {
        let used = self.lock().used_at(now, self.window);
        self.max_per_window.saturating_sub(used)
    }

    pub fn can_invoke_at(&self, now: Instant) -> bool {
        self.remaining_at(now) > 0
    }

    /// Consume one unit of quota at `now`, opening a new window if the
    /// previous one has expired.
    pub fn record_at(&self, now: Instant) {
        let mut state = self.lock();
        if state.used_at(now, self.window) == 0 {
            state.window_start = Some(now);
            state.count = 1;
        } else {
            state.count += 1;
        }
        debug!(used = state.count, limit = self.max_per_window, "enhance invocation recorded");
    }

    pub fn record(&self) {
        self.record_at(Instant::now())
    }

    /// `Err(RateLimited)` with the wait time when no quota is left at `now`.
    /// Never consumes quota.
    pub fn check_at(&self, now: Instant) -> Result<()> {
        if self.can_invoke_at(now) {
            return Ok(());
        }

        let status = self.status_at(now);
        let wait = status.resets_in.unwrap_or_default();
        warn!(
            used = status.used,
            limit = status.limit,
            wait_secs = wait.as_secs(),
            "enhance rate limit exceeded"
        );
        Err(PromptError::RateLimited(format!(
            "enhance limit of {} per {}s reached, try again in {}s",
            self.max_per_window,
            self.window.as_secs(),
            wait.as_secs().max(1)
        )))
    }

    pub fn check(&self) -> Result<()> {
        self.check_at(Instant::now())
    }

    pub fn status_at(&self, now: Instant) -> LimiterStatus {
        let state = self.lock();
        let used = state.used_at(now, self.window);
        let resets_in = match state.window_start {
            Some(start) if used > 0 => {
                Some(self.window.saturating_sub(now.saturating_duration_since(start)))
            }
            _ => None,
        };
        LimiterStatus {
            used,
            limit: self.max_per_window,
            resets_in,
        }
    }

    pub fn status(&self) -> LimiterStatus {
        self.status_at(Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn test_fresh_limiter_allows() {
        let limiter = EnhanceLimiter::new();
        let now = Instant::now();
        assert!(limiter.can_invoke_at(now));
        assert_eq!(limiter.remaining_at(now), 2);
        assert_eq!(limiter.status_at(now).resets_in, None);
    }

    #[test]
    fn test_two_records_block_within_window() {
        let limiter = EnhanceLimiter::new();
        let t0 = Instant::now();
        limiter.record_at(t0);
        limiter.record_at(t0 + secs(5));
        assert!(!limiter.can_invoke_at(t0 + secs(10)));
        assert!(!limiter.can_invoke_at(t0 + secs(59)));
    }

    #[test]
    fn test_window_expires_sixty_seconds_after_first_call() {
        let limiter = EnhanceLimiter::new();
        let t0 = Instant::now();
        limiter.record_at(t0);
        limiter.record_at(t0 + secs(30));

        let later = t0 + secs(60);
        assert!(limiter.can_invoke_at(later));
        let status = limiter.status_at(later);
        assert_eq!(status.used, 0);
        assert_eq!(status.resets_in, None);
    }

    #[test]
    fn test_queries_do_not_mutate() {
        let limiter = EnhanceLimiter::new();
        let t0 = Instant::now();
        limiter.record_at(t0);
        for offset in [1, 10, 59] {
            assert_eq!(limiter.remaining_at(t0 + secs(offset)), 1);
        }
        // an expired-looking query must not restart the window
        assert_eq!(limiter.remaining_at(t0 + secs(120)), 2);
        assert_eq!(limiter.remaining_at(t0 + secs(30)), 1);
    }

    #[test]
    fn test_record_after_expiry_opens_new_window() {
        let limiter = EnhanceLimiter::new();
        let t0 = Instant::now();
        limiter.record_at(t0);
        limiter.record_at(t0 + secs(1));
        let t1 = t0 + secs(61);
        limiter.record_at(t1);
        assert_eq!(limiter.remaining_at(t1), 1);
        assert_eq!(limiter.status_at(t1).resets_in, Some(ENHANCE_WINDOW));
    }

    #[test]
    fn test_check_blocks_without_consuming() {
        let limiter = EnhanceLimiter::new();
        let t0 = Instant::now();
        limiter.check_at(t0).unwrap();
        limiter.record_at(t0);
        limiter.check_at(t0 + secs(1)).unwrap();
        limiter.record_at(t0 + secs(1));

        let err = limiter.check_at(t0 + secs(2)).unwrap_err();
        assert!(matches!(err, PromptError::RateLimited(_)));
        assert!(err.to_string().contains("58s"));
        assert_eq!(limiter.status_at(t0 + secs(2)).used, 2);

        limiter.check_at(t0 + secs(60)).unwrap();
        assert_eq!(limiter.remaining_at(t0 + secs(60)), 2);
    }

    #[test]
    fn test_check_alone_never_spends_quota() {
        let limiter = EnhanceLimiter::new();
        let t0 = Instant::now();
        for offset in 0..5 {
            limiter.check_at(t0 + secs(offset)).unwrap();
        }
        assert_eq!(limiter.remaining_at(t0 + secs(5)), 2);
    }

    #[test]
    fn test_custom_limits() {
        let limiter = EnhanceLimiter::with_limits(secs(10), 1);
        let t0 = Instant::now();
        limiter.record_at(t0);
        assert!(limiter.check_at(t0 + secs(9)).is_err());
        assert!(limiter.check_at(t0 + secs(10)).is_ok());
    }
}
