use std::fmt::Display;
use std::time::Duration;

use crate::config::RetrySettings;

/// Uniform retry policy for probe, preload and source-swap failures.
///
/// Centralized so retry counts are not duplicated per call site: every
/// recoverable media operation goes through [`RetryPolicy::run`].
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    attempts: u32,
    delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }

    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self::new(settings.attempts, Duration::from_millis(settings.delay_ms))
    }

    /// Run an async operation, retrying with a fixed delay until it
    /// succeeds or the attempt budget is exhausted. The final error is
    /// returned to the caller, which marks the asset unavailable.
    pub async fn run<T, E, F, Fut>(&self, what: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        log::debug!("{} succeeded on attempt {}", what, attempt);
                    }
                    return Ok(value);
                }
                Err(e) if attempt < self.attempts => {
                    log::warn!(
                        "{} failed (attempt {}/{}): {}",
                        what,
                        attempt,
                        self.attempts,
                        e
                    );
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    log::warn!("{} failed after {} attempts: {}", what, self.attempts, e);
                    return Err(e);
                }
            }
        }
    }
}
