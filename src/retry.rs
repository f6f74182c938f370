use std::time::Duration;

/// Explicit, blocking wait between steps against the reader.
pub trait Pause {
    fn pause(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadPause;

impl Pause for ThreadPause {
    fn pause(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    Linear { initial: Duration, step: Duration },
}

impl Backoff {
    /// Wait after the `failed_attempt`-th failure (1-based).
    pub fn delay(&self, failed_attempt: u32) -> Duration {
        match *self {
            Self::Fixed(delay) => delay,
            Self::Linear { initial, step } => {
                initial.saturating_add(step.saturating_mul(failed_attempt.saturating_sub(1)))
            }
        }
    }
}

/// Errors that say whether another attempt can help.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Bounded retry shared by every retry site of the harvest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Fixed(delay),
        }
    }

    pub fn linear(max_attempts: u32, initial: Duration, step: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Linear { initial, step },
        }
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or
    /// `max_attempts` (at least one) attempts were made. `op` receives the
    /// 1-based attempt number. The last error is returned.
    pub fn run<T, E: Retryable>(
        &self,
        pause: &dyn Pause,
        mut op: impl FnMut(u32) -> Result<T, E>,
    ) -> Result<T, E> {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(err) if attempt >= attempts || !err.is_retryable() => return Err(err),
                Err(_) => {
                    pause.pause(self.backoff.delay(attempt));
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::cell::RefCell;

    use super::*;

    /// Records requested waits instead of sleeping.
    #[derive(Debug, Default)]
    pub(crate) struct RecordingPause {
        pub(crate) waits: RefCell<Vec<Duration>>,
    }

    impl Pause for RecordingPause {
        fn pause(&self, duration: Duration) {
            self.waits.borrow_mut().push(duration);
        }
    }

    #[derive(Debug, PartialEq, Eq)]
    enum TestError {
        Flaky,
        Broken,
    }

    impl Retryable for TestError {
        fn is_retryable(&self) -> bool {
            matches!(self, Self::Flaky)
        }
    }

    #[test]
    fn linear_backoff_grows_by_step() {
        let backoff = Backoff::Linear {
            initial: Duration::from_secs(5),
            step: Duration::from_secs(5),
        };
        assert_eq!(backoff.delay(1), Duration::from_secs(5));
        assert_eq!(backoff.delay(3), Duration::from_secs(15));
    }

    #[test]
    fn retries_until_success() {
        let pause = RecordingPause::default();
        let policy = RetryPolicy::fixed(3, Duration::from_millis(10));
        let result = policy.run(&pause, |attempt| {
            if attempt < 3 {
                Err(TestError::Flaky)
            } else {
                Ok(attempt)
            }
        });
        assert_eq!(result, Ok(3));
        assert_eq!(pause.waits.borrow().len(), 2);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let pause = RecordingPause::default();
        let policy = RetryPolicy::linear(3, Duration::from_secs(5), Duration::from_secs(5));
        let mut calls = 0;
        let result: Result<(), _> = policy.run(&pause, |_| {
            calls += 1;
            Err(TestError::Flaky)
        });
        assert_eq!(result, Err(TestError::Flaky));
        assert_eq!(calls, 3);
        assert_eq!(
            *pause.waits.borrow(),
            vec![Duration::from_secs(5), Duration::from_secs(10)]
        );
    }

    #[test]
    fn non_retryable_errors_stop_immediately() {
        let pause = RecordingPause::default();
        let policy = RetryPolicy::fixed(5, Duration::from_secs(1));
        let mut calls = 0;
        let result: Result<(), _> = policy.run(&pause, |_| {
            calls += 1;
            Err(TestError::Broken)
        });
        assert_eq!(result, Err(TestError::Broken));
        assert_eq!(calls, 1);
        assert!(pause.waits.borrow().is_empty());
    }
}
