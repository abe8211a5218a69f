//! Cooperative cancellation for replay waits.
//!
//! A [`CancelToken`] is a cloneable thread-safe flag. The scheduler and the
//! runtime only ever *observe* it between work units; the integrator sets it
//! from wherever makes sense (typically an escape-key listener thread).
//! Cancellation is cooperative, not preemptive: an action already dispatched
//! finishes before the flag takes effect.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// Slice length for interruptible sleeps. Bounds how stale a cancellation
/// can be observed mid-wait.
pub const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Thread-safe cancellation flag shared between the replay thread and an
/// external listener.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Sleep for `total`, checking `token` roughly every [`SLEEP_SLICE`].
///
/// Returns `true` if the full duration elapsed, `false` if the token was set
/// before (or while) waiting.
pub fn sleep_with_cancel(total: Duration, token: &CancelToken) -> bool {
    let mut remaining = total;
    while !remaining.is_zero() {
        if token.is_cancelled() {
            return false;
        }
        let slice = remaining.min(SLEEP_SLICE);
        thread::sleep(slice);
        remaining = remaining.saturating_sub(slice);
    }
    !token.is_cancelled()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn sleep_completes_when_not_cancelled() {
        let token = CancelToken::new();
        let start = Instant::now();
        assert!(sleep_with_cancel(Duration::from_millis(120), &token));
        assert!(start.elapsed() >= Duration::from_millis(120));
    }

    #[test]
    fn sleep_returns_early_when_cancelled() {
        let token = CancelToken::new();
        let setter = token.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(80));
            setter.cancel();
        });
        let start = Instant::now();
        assert!(!sleep_with_cancel(Duration::from_secs(5), &token));
        assert!(start.elapsed() < Duration::from_secs(2));
        handle.join().expect("join");
    }

    #[test]
    fn pre_cancelled_token_skips_the_wait() {
        let token = CancelToken::new();
        token.cancel();
        let start = Instant::now();
        assert!(!sleep_with_cancel(Duration::from_secs(5), &token));
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}
