//! Bounded hand-off of records to a downstream buffer.

use crate::buffer::DataBuffer;
use crate::config::StageConfig;
use crate::error::{StageError, StageResult};
use std::time::Duration;
use tracing::trace;

/// Up to `max_attempts` tries, each waiting at most `max_wait` for free capacity.
///
/// Exhaustion is an ordinary outcome: the record is dropped and the caller
/// gets a `ResourceExhaustion` [`StageError`] to report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProducePolicy {
    max_attempts: u32,
    max_wait: Duration,
}

impl ProducePolicy {
    pub fn new(max_attempts: u32, max_wait: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            max_wait,
        }
    }

    pub fn from_config(config: &StageConfig) -> Self {
        Self::new(config.produce_retry_times, config.produce_wait())
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }

    pub async fn produce<T>(&self, buffer: &DataBuffer<T>, item: T) -> StageResult<()> {
        let mut item = item;
        for attempt in 1..=self.max_attempts {
            match buffer.produce_timeout(item, self.max_wait).await {
                Ok(()) => return Ok(()),
                Err(rejected) => {
                    trace!(
                        attempt = attempt,
                        max_attempts = self.max_attempts,
                        capacity = buffer.capacity(),
                        "Buffer full, retrying produce"
                    );
                    item = rejected;
                }
            }
        }
        Err(StageError::buffer_saturated(
            self.max_attempts,
            buffer.capacity(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_produce_succeeds_with_capacity() {
        let buffer = DataBuffer::new(2);
        let policy = ProducePolicy::new(3, Duration::from_millis(10));
        policy.produce(&buffer, 1).await.unwrap();
        assert_eq!(buffer.len(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_drop_record() {
        let buffer = DataBuffer::new(1);
        buffer.try_produce(0).unwrap();
        let policy = ProducePolicy::new(2, Duration::from_millis(5));

        let error = policy.produce(&buffer, 1).await.unwrap_err();
        assert_eq!(error.category(), ErrorCategory::ResourceExhaustion);
        assert_eq!(buffer.consume_if_possible(10), vec![0]);
    }

    #[tokio::test]
    async fn test_retry_succeeds_once_consumer_drains() {
        let buffer = Arc::new(DataBuffer::new(1));
        buffer.try_produce(0).unwrap();

        let consumer = {
            let buffer = Arc::clone(&buffer);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                buffer.consume_if_possible(1)
            })
        };

        let policy = ProducePolicy::new(50, Duration::from_millis(10));
        policy.produce(&buffer, 1).await.unwrap();
        assert_eq!(consumer.await.unwrap(), vec![0]);
        assert_eq!(buffer.consume_if_possible(1), vec![1]);
    }

    #[test]
    fn test_zero_attempts_means_one() {
        let policy = ProducePolicy::from_config(&StageConfig::default().with_produce_retry(
            0,
            Duration::from_millis(1),
        ));
        assert_eq!(policy.max_attempts(), 1);
    }
}
