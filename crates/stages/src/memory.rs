//! In-process FIFO queue.
//!
//! Holds serialized wire payloads rather than decoded events so that the
//! decode step (and its [`QueueError::Malformed`] path) behaves exactly as it
//! does against a broker. Not durable across process restarts.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use pipeline::{ChangeEvent, EventQueue, QueueError};
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

/// An unbounded FIFO of queue payloads shared between producers and one consumer.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    items: Mutex<VecDeque<String>>,
    available: Notify,
}

impl MemoryQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a raw payload without encoding it.
    ///
    /// Lets callers inject payloads written by other producers, including
    /// ones that will fail to decode.
    pub async fn push_raw(&self, payload: impl Into<String>) {
        self.items.lock().await.push_back(payload.into());
        self.available.notify_one();
    }

    /// Number of payloads waiting.
    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    /// Returns `true` if no payloads are waiting.
    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }
}

#[async_trait]
impl EventQueue for MemoryQueue {
    async fn push(&self, event: &ChangeEvent) -> Result<(), QueueError> {
        let payload = event.to_wire()?;
        self.push_raw(payload).await;
        Ok(())
    }

    async fn pop(&self, timeout: Duration) -> Result<Option<ChangeEvent>, QueueError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(payload) = self.items.lock().await.pop_front() {
                return ChangeEvent::from_wire(&payload).map(Some);
            }
            if tokio::time::timeout_at(deadline, self.available.notified())
                .await
                .is_err()
            {
                return Ok(None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pipeline::{FileChange, FileStatus, Filename, SourceId, Timestamp};

    use super::*;

    fn event(source: u64) -> ChangeEvent {
        ChangeEvent::new(
            SourceId::new(source),
            Timestamp::now(),
            vec![FileChange::new(
                Filename::new("f").unwrap(),
                FileStatus::Added,
            )],
        )
    }

    #[tokio::test]
    async fn pops_in_push_order() {
        let queue = MemoryQueue::new();
        for id in 1..=3 {
            queue.push(&event(id)).await.unwrap();
        }

        for id in 1..=3 {
            let popped = queue.pop(Duration::from_millis(10)).await.unwrap().unwrap();
            assert_eq!(popped.source_id(), SourceId::new(id));
        }
        assert!(queue.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn pop_times_out_on_empty_queue() {
        let queue = MemoryQueue::new();
        let started = Instant::now();
        assert_eq!(queue.pop(Duration::from_secs(1)).await.unwrap(), None);
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn pop_wakes_when_a_producer_pushes() {
        let queue = std::sync::Arc::new(MemoryQueue::new());
        let producer = queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            producer.push(&event(5)).await.unwrap();
        });

        let popped = queue.pop(Duration::from_secs(1)).await.unwrap().unwrap();
        assert_eq!(popped.source_id(), SourceId::new(5));
    }

    #[tokio::test]
    async fn malformed_payload_is_removed_and_reported() {
        let queue = MemoryQueue::new();
        queue.push_raw("{\"source_id\":").await;
        queue.push(&event(2)).await.unwrap();

        assert!(matches!(
            queue.pop(Duration::from_millis(10)).await,
            Err(QueueError::Malformed { .. })
        ));
        assert_eq!(queue.len().await, 1);
        let next = queue.pop(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(next.source_id(), SourceId::new(2));
    }
}
