//! Bounded retry with a fixed backoff for flaky card I/O.

use core::time::Duration;

/// Blocking delay between attempts. Injected so tests run without sleeping.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

impl<T: Sleeper + ?Sized> Sleeper for &T {
    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration)
    }
}

/// Sleeps the calling thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Retry limits for one operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first. Values of `0` are treated as `1`.
    pub max_attempts: u32,
    /// Delay taken before every attempt after the first.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(50),
        }
    }
}

/// Outcome of [`RetryPolicy::run`].
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    /// Last result: the first success, or the final failure.
    pub result: Result<T, E>,
    /// Attempts actually made.
    pub attempts: u32,
}

impl RetryPolicy {
    /// Policy that never retries.
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }

    /// Run `op` until it succeeds or attempts run out. `op` receives the
    /// zero-based attempt number.
    pub fn run<T, E, S, F>(&self, sleeper: &S, mut op: F) -> RetryOutcome<T, E>
    where
        S: Sleeper + ?Sized,
        F: FnMut(u32) -> Result<T, E>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            if attempt > 0 {
                sleeper.sleep(self.backoff);
            }
            let result = op(attempt);
            attempt += 1;
            if result.is_ok() || attempt >= max_attempts {
                return RetryOutcome {
                    result,
                    attempts: attempt,
                };
            }
        }
    }
}
