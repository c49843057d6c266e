//! Distribution Queue
//!
//! Unbounded multi-producer, single-consumer FIFO between the feed thread
//! and the broadcast loop. Producers never block and may live on any
//! thread; the consumer runs on the relay runtime. There is no capacity
//! limit and nothing is dropped while the consumer is alive.

use tokio::sync::mpsc;

use crate::domain::quote::FeedItem;

/// Create a connected producer/consumer pair.
#[must_use]
pub fn distribution_queue() -> (QueueProducer, QueueConsumer) {
    let (tx, rx) = mpsc::unbounded_channel();
    (QueueProducer { tx }, QueueConsumer { rx })
}

/// Enqueue side. Cheap to clone, safe to call from foreign threads.
#[derive(Debug, Clone)]
pub struct QueueProducer {
    tx: mpsc::UnboundedSender<FeedItem>,
}

impl QueueProducer {
    /// Enqueue an item.
    ///
    /// Returns `false` if the consumer is gone; the item is dropped.
    pub fn push(&self, item: FeedItem) -> bool {
        self.tx.send(item).is_ok()
    }

    /// Whether the consumer has been dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Dequeue side, owned by the broadcast loop.
#[derive(Debug)]
pub struct QueueConsumer {
    rx: mpsc::UnboundedReceiver<FeedItem>,
}

impl QueueConsumer {
    /// Wait for the next item. `None` once every producer is dropped and
    /// the queue is drained.
    pub async fn next(&mut self) -> Option<FeedItem> {
        self.rx.recv().await
    }

    /// Take an item if one is ready.
    pub fn try_next(&mut self) -> Option<FeedItem> {
        self.rx.try_recv().ok()
    }

    /// Items waiting.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether nothing is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio_test::{assert_pending, assert_ready_eq, task};

    use super::*;

    #[test]
    fn preserves_order() {
        let (producer, mut consumer) = distribution_queue();
        for i in 0..5 {
            assert!(producer.push(FeedItem::from(json!(i))));
        }

        let drained: Vec<_> = std::iter::from_fn(|| consumer.try_next()).collect();
        assert_eq!(
            drained,
            (0..5).map(|i| FeedItem::from(json!(i))).collect::<Vec<_>>()
        );
    }

    #[test]
    fn push_after_consumer_dropped_is_silent() {
        let (producer, consumer) = distribution_queue();
        drop(consumer);

        assert!(producer.is_closed());
        assert!(!producer.push(FeedItem::from(json!("late"))));
    }

    #[test]
    fn consumer_wakes_on_push() {
        let (producer, mut consumer) = distribution_queue();
        let mut next = task::spawn(consumer.next());

        assert_pending!(next.poll());
        producer.push(FeedItem::from(json!({"tk": "1"})));
        assert!(next.is_woken());
        assert_ready_eq!(next.poll(), Some(FeedItem::from(json!({"tk": "1"}))));
    }

    #[tokio::test]
    async fn producers_on_foreign_threads() {
        let (producer, mut consumer) = distribution_queue();

        let handles: Vec<_> = (0..4)
            .map(|thread| {
                let producer = producer.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        producer.push(FeedItem::from(json!({"thread": thread, "seq": i})));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        drop(producer);

        let mut received = 0;
        while consumer.next().await.is_some() {
            received += 1;
        }
        assert_eq!(received, 400);
    }
}
