use std::time::{Duration, Instant};

use crate::errors::RetryError;

/// Bounds how often the supervisor retries a failed launch.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: Option<usize>,
    pub within_duration: Option<Duration>,
    pub with_time_between: Option<Duration>,
    current_retry_count: usize,
    last_retry: Instant,
}

#[derive(Default)]
pub struct RetryConfigBuilder {
    max_retries: Option<usize>,
    within_duration: Option<Duration>,
    with_time_between: Option<Duration>,
}

impl RetryConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_max_retries(mut self, retries: usize) -> Self {
        self.max_retries = Some(retries);
        self
    }

    #[must_use]
    pub fn within_duration(mut self, duration: Duration) -> Self {
        self.within_duration = Some(duration);
        self
    }

    #[must_use]
    pub fn with_time_between(mut self, time: Duration) -> Self {
        self.with_time_between = Some(time);
        self
    }

    #[must_use]
    pub fn build(self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            within_duration: self.within_duration,
            with_time_between: self.with_time_between,
            current_retry_count: 0,
            last_retry: Instant::now(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfigBuilder::new()
            .with_max_retries(3)
            .with_time_between(Duration::from_millis(50))
            .build()
    }
}

impl RetryConfig {
    #[must_use]
    pub fn retries(&self) -> usize {
        self.current_retry_count
    }

    pub(crate) fn reset_count(&mut self) {
        self.current_retry_count = 0;
        self.last_retry = Instant::now();
    }

    pub fn increment_retry(&mut self) -> Result<(), RetryError> {
        let elapsed = self.last_retry.elapsed();

        if let Some(duration) = self.within_duration {
            if elapsed > duration {
                self.reset_count();
            }
        }

        if self.current_retry_count < self.max_retries.unwrap_or(0) {
            self.current_retry_count += 1;
            self.last_retry = Instant::now();
            Ok(())
        } else {
            Err(RetryError::new("Max retry reached"))
        }
    }

    pub async fn maybe_wait(&self) {
        if let Some(duration) = self.with_time_between {
            tokio::time::sleep(duration).await;
        }
    }
}
