//! A small burst-then-steady-state log rate limiter.
//!
//! High-frequency diagnostic sites (handshake failure, syscall errors) log
//! through this instead of directly through `tracing`, so a chatty peer or a
//! flapping link can't flood the log. The policy is a token bucket: a
//! generous initial burst of 10, then a slower steady-state refill of 25
//! per interval.

use std::sync::Mutex;
use std::time::{Duration, Instant};

const BURST: u32 = 10;
const PER_INTERVAL: u32 = 25;
const INTERVAL: Duration = Duration::from_secs(60);

struct Window {
    tokens: u32,
    start: Instant,
}

struct State {
    window: Option<Window>,
    suppressed: u64,
}

/// A named rate limiter; one is kept per logging call site.
pub struct RateLimiter {
    state: Mutex<State>,
}

impl RateLimiter {
    pub const fn new() -> Self {
        RateLimiter { state: Mutex::new(State { window: None, suppressed: 0 }) }
    }

    /// Returns `Some(suppressed_count)` if this call should log, carrying
    /// how many prior calls were dropped since the last one that logged.
    /// Returns `None` if this call should be suppressed.
    pub fn should_log(&self) -> Option<u64> {
        let mut state = self.state.lock().unwrap();
        let now = Instant::now();

        let window = match &mut state.window {
            Some(w) if now.duration_since(w.start) < INTERVAL => w,
            Some(w) => {
                w.tokens = PER_INTERVAL;
                w.start = now;
                w
            }
            None => {
                state.window = Some(Window { tokens: BURST, start: now });
                state.window.as_mut().unwrap()
            }
        };

        if window.tokens == 0 {
            state.suppressed += 1;
            return None;
        }

        window.tokens -= 1;
        Some(std::mem::take(&mut state.suppressed))
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Logs through `tracing::warn!` subject to the shared rate limiter
/// `$limiter`, folding in how many prior calls were suppressed.
macro_rules! rate_limited_warn {
    ($limiter:expr, $($arg:tt)+) => {
        if let Some(suppressed) = $limiter.should_log() {
            if suppressed > 0 {
                tracing::warn!(suppressed, $($arg)+);
            } else {
                tracing::warn!($($arg)+);
            }
        }
    };
}

pub(crate) use rate_limited_warn;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_then_suppressed() {
        let limiter = RateLimiter::new();
        let mut logged = 0;
        for _ in 0..(BURST * 2) {
            if limiter.should_log().is_some() {
                logged += 1;
            }
        }
        assert_eq!(logged, BURST as usize);
    }

    #[test]
    fn suppressed_calls_stay_suppressed_within_window() {
        let limiter = RateLimiter::new();
        for _ in 0..BURST {
            assert!(limiter.should_log().is_some());
        }
        assert!(limiter.should_log().is_none());
        assert!(limiter.should_log().is_none());
    }
}
