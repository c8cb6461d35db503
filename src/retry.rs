use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

/// Doubling delay with a ceiling and an attempt budget.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial_delay: Duration,
    max_delay: Duration,
    max_retries: u32,
    current_attempt: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxRetriesExceeded;

impl std::fmt::Display for MaxRetriesExceeded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Maximum retry attempts exceeded")
    }
}

impl std::error::Error for MaxRetriesExceeded {}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration, retries: u32) -> Self {
        Self {
            initial_delay: initial,
            max_delay: max,
            max_retries: retries,
            current_attempt: 0,
        }
    }

    /// Delay for the next retry, or `None` once the budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.current_attempt >= self.max_retries {
            return None;
        }
        let factor = 2u32.saturating_pow(self.current_attempt.min(31));
        let delay = self.initial_delay.saturating_mul(factor).min(self.max_delay);
        self.current_attempt += 1;
        Some(delay)
    }

    pub async fn sleep(&mut self, what: &str) -> Result<(), MaxRetriesExceeded> {
        let delay = self.next_delay().ok_or(MaxRetriesExceeded)?;
        warn!(
            "Retry {} attempt {} of {} in {}ms",
            what,
            self.current_attempt,
            self.max_retries,
            delay.as_millis()
        );
        sleep(delay).await;
        Ok(())
    }
}
