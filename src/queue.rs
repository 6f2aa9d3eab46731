//! Shared FIFO of capture targets terminated by one stop marker per worker.

use crate::Target;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// What a worker can pull off the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkItem {
    Target(Target),
    /// Sentinel: the worker that takes it stops draining.
    Stop,
}

/// Many-producer, many-consumer queue.
///
/// The receiver lives behind an async mutex so a dequeue is an atomic take:
/// every item goes to exactly one worker.
#[derive(Clone)]
pub struct TargetQueue {
    sender: mpsc::UnboundedSender<WorkItem>,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<WorkItem>>>,
}

impl TargetQueue {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
        }
    }

    /// Build the queue in one go: every target, then `stops` sentinels.
    pub fn with_targets(targets: impl IntoIterator<Item = Target>, stops: usize) -> Self {
        let queue = Self::new();
        for target in targets {
            queue.put(WorkItem::Target(target));
        }
        for _ in 0..stops {
            queue.put(WorkItem::Stop);
        }
        queue
    }

    pub fn put(&self, item: WorkItem) {
        // The queue owns a receiver, so the channel cannot be closed here.
        let _ = self.sender.send(item);
    }

    /// Wait for the next item.
    ///
    /// Blocks while the queue is empty. Callers rely on the sentinels to wake
    /// up; the queue never closes while a handle to it is alive.
    pub async fn get(&self) -> Option<WorkItem> {
        let mut receiver = self.receiver.lock().await;
        receiver.recv().await
    }

    /// Take an item only if one is ready.
    pub async fn try_get(&self) -> Option<WorkItem> {
        let mut receiver = self.receiver.lock().await;
        receiver.try_recv().ok()
    }
}

impl Default for TargetQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_targets_precede_sentinels() {
        let queue = TargetQueue::with_targets(vec![Target::from("a"), Target::from("b")], 2);

        assert_eq!(queue.get().await, Some(WorkItem::Target(Target::from("a"))));
        assert_eq!(queue.get().await, Some(WorkItem::Target(Target::from("b"))));
        assert_eq!(queue.get().await, Some(WorkItem::Stop));
        assert_eq!(queue.get().await, Some(WorkItem::Stop));
        assert_eq!(queue.try_get().await, None);
    }

    #[tokio::test]
    async fn test_concurrent_drain_takes_each_item_once() {
        let targets: Vec<Target> = (0..50).map(|i| Target::new(format!("host-{i}"))).collect();
        let consumers = 4;
        let queue = TargetQueue::with_targets(targets.clone(), consumers);

        let handles: Vec<_> = (0..consumers)
            .map(|_| {
                let queue = queue.clone();
                tokio::spawn(async move {
                    let mut taken = Vec::new();
                    while let Some(WorkItem::Target(target)) = queue.get().await {
                        taken.push(target);
                        tokio::task::yield_now().await;
                    }
                    taken
                })
            })
            .collect();

        let mut drained = Vec::new();
        for handle in handles {
            drained.extend(handle.await.unwrap());
        }
        drained.sort();
        let mut expected = targets;
        expected.sort();
        assert_eq!(drained, expected);
        assert_eq!(queue.try_get().await, None);
    }
}
