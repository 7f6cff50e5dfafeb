//! Bounded FIFO buffer placed between two adjacent stages.
//!
//! Storage is a lock-free `ArrayQueue`; two `Notify` handles wake a parked
//! producer or consumer. Waiters register interest before re-checking the
//! queue so a wake-up between the check and the await is never lost, and
//! dropping a parked future (task abort) leaves the queue untouched.

use crossbeam::queue::ArrayQueue;
use std::fmt;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

pub struct DataBuffer<T> {
    queue: ArrayQueue<T>,
    not_empty: Notify,
    not_full: Notify,
}

impl<T> DataBuffer<T> {
    /// Create a buffer holding at most `capacity` items.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero. The task builder validates sizes first.
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
            not_empty: Notify::new(),
            not_full: Notify::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.queue.is_full()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Non-blocking insert. Hands the item back when the buffer is full.
    pub fn try_produce(&self, item: T) -> Result<(), T> {
        self.queue.push(item)?;
        self.not_empty.notify_one();
        Ok(())
    }

    /// Insert, waiting for free capacity.
    pub async fn produce(&self, mut item: T) {
        loop {
            let notified = self.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_produce(item) {
                Ok(()) => return,
                Err(rejected) => item = rejected,
            }
            notified.await;
        }
    }

    /// Insert, waiting at most `wait` for free capacity.
    pub async fn produce_timeout(&self, mut item: T, wait: Duration) -> Result<(), T> {
        let deadline = Instant::now() + wait;
        loop {
            let notified = self.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_produce(item) {
                Ok(()) => return Ok(()),
                Err(rejected) => item = rejected,
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.try_produce(item);
            }
        }
    }

    /// Remove the head item, waiting until one is available.
    pub async fn consume(&self) -> T {
        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(item) = self.queue.pop() {
                self.not_full.notify_one();
                return item;
            }
            notified.await;
        }
    }

    /// Remove up to `max` items without waiting. Returns an empty batch when
    /// nothing is ready.
    pub fn consume_if_possible(&self, max: usize) -> Vec<T> {
        let mut batch = Vec::with_capacity(max.min(self.queue.len()));
        while batch.len() < max {
            match self.queue.pop() {
                Some(item) => batch.push(item),
                None => break,
            }
        }
        if !batch.is_empty() {
            self.not_full.notify_one();
        }
        batch
    }
}

impl<T> fmt::Debug for DataBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataBuffer")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_try_produce_on_full_buffer() {
        let buffer = DataBuffer::new(2);
        assert!(buffer.try_produce(1).is_ok());
        assert!(buffer.try_produce(2).is_ok());
        assert!(buffer.is_full());
        assert_eq!(buffer.try_produce(3), Err(3));
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_consume_if_possible_is_bounded() {
        let buffer = DataBuffer::new(8);
        for i in 0..5 {
            buffer.try_produce(i).unwrap();
        }
        assert_eq!(buffer.consume_if_possible(3), vec![0, 1, 2]);
        assert_eq!(buffer.consume_if_possible(10), vec![3, 4]);
        assert!(buffer.consume_if_possible(10).is_empty());
    }

    #[tokio::test]
    async fn test_produce_waits_for_capacity() {
        let buffer = Arc::new(DataBuffer::new(1));
        buffer.try_produce(1).unwrap();

        let producer = {
            let buffer = Arc::clone(&buffer);
            tokio::spawn(async move { buffer.produce(2).await })
        };
        tokio::task::yield_now().await;
        assert!(!producer.is_finished());

        assert_eq!(buffer.consume().await, 1);
        producer.await.unwrap();
        assert_eq!(buffer.consume().await, 2);
    }

    #[test]
    fn test_consumer_wakes_parked_producer() {
        use tokio_test::{assert_pending, assert_ready, task};

        let buffer = DataBuffer::new(1);
        buffer.try_produce(1).unwrap();

        let mut producer = task::spawn(buffer.produce(2));
        assert_pending!(producer.poll());
        assert!(!producer.is_woken());

        assert_eq!(buffer.consume_if_possible(1), vec![1]);
        assert!(producer.is_woken());
        assert_ready!(producer.poll());
        drop(producer);

        let mut consumer = task::spawn(buffer.consume());
        assert_eq!(assert_ready!(consumer.poll()), 2);
    }

    #[tokio::test]
    async fn test_produce_timeout_hands_item_back() {
        let buffer = DataBuffer::new(1);
        buffer.try_produce("first").unwrap();
        let result = buffer
            .produce_timeout("second", Duration::from_millis(50))
            .await;
        assert_eq!(result, Err("second"));
        assert_eq!(buffer.len(), 1);
    }

    #[tokio::test]
    async fn test_aborted_producer_leaves_queue_consistent() {
        let buffer = Arc::new(DataBuffer::new(1));
        buffer.try_produce(10).unwrap();

        let producer = {
            let buffer = Arc::clone(&buffer);
            tokio::spawn(async move { buffer.produce(11).await })
        };
        tokio::task::yield_now().await;
        producer.abort();
        assert!(producer.await.unwrap_err().is_cancelled());

        assert_eq!(buffer.consume_if_possible(4), vec![10]);
        assert!(buffer.try_produce(12).is_ok());
    }
}
