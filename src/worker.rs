use crate::{
    resolve_target, FILE_ONLY_TARGET, CaptureBackend, CaptureError, CaptureRecord, Config, Metrics,
    ShutdownListener, Target, TargetQueue, WorkItem,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

/// A progress line is printed every time this many captures have completed.
pub const PROGRESS_INTERVAL: usize = 15;

/// Completed-capture count shared by all workers, paired with the total.
///
/// Counts attempts, not successes: a failed capture is still progress.
#[derive(Debug, Clone)]
pub struct ProgressCounter {
    completed: Arc<AtomicUsize>,
    total: usize,
}

impl ProgressCounter {
    pub fn new(total: usize) -> Self {
        Self {
            completed: Arc::new(AtomicUsize::new(0)),
            total,
        }
    }

    /// Bump the count and return the new value.
    pub fn increment(&self) -> usize {
        self.completed.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn is_milestone(value: usize) -> bool {
        value > 0 && value % PROGRESS_INTERVAL == 0
    }

    /// Count one finished capture and report when a milestone is crossed.
    pub fn record_completion(&self) -> usize {
        let value = self.increment();
        if Self::is_milestone(value) {
            println!(
                "\x1b[32m[*] Completed {} out of {} services\x1b[0m",
                value, self.total
            );
            info!(target: FILE_ONLY_TARGET, "Completed {} out of {} services", value, self.total);
        }
        value
    }
}

/// Why a worker left its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    Sentinel,
    Interrupted,
    QueueClosed,
}

#[derive(Debug, Clone)]
pub struct WorkerStats {
    pub id: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub exit: WorkerExit,
}

/// Everything a worker shares with its siblings.
pub struct WorkerContext {
    pub queue: TargetQueue,
    pub creation_lock: Arc<Mutex<()>>,
    pub counter: ProgressCounter,
    pub results: mpsc::UnboundedSender<CaptureRecord>,
    pub shutdown: ShutdownListener,
}

pub struct CaptureWorker<B: CaptureBackend> {
    id: usize,
    config: Arc<Config>,
    backend: Arc<B>,
    metrics: Arc<Metrics>,
}

impl<B: CaptureBackend> CaptureWorker<B> {
    pub fn new(id: usize, config: Arc<Config>, backend: Arc<B>, metrics: Arc<Metrics>) -> Self {
        Self {
            id,
            config,
            backend,
            metrics,
        }
    }

    /// Create a driver, drain the queue with it, then quit it.
    ///
    /// The driver is quit exactly once on every path that got one: sentinel,
    /// interrupt or closed queue. Only driver creation can fail the worker.
    pub async fn run(self, mut ctx: WorkerContext) -> Result<WorkerStats, CaptureError> {
        let _live = ctx.shutdown.register_worker();

        let driver = {
            let _creating = ctx.creation_lock.lock().await;
            debug!("Worker {} creating browser driver", self.id);
            self.backend
                .create_driver(&self.config, self.config.user_agent.as_deref())
                .await?
        };
        info!("Starting capture worker {}", self.id);

        let (driver, stats) = self.drain(driver, &mut ctx).await;
        self.backend.quit(driver).await;

        info!(
            "Capture worker {} stopped ({:?}) after {} targets",
            self.id, stats.exit, stats.processed
        );
        Ok(stats)
    }

    async fn drain(&self, mut driver: B::Driver, ctx: &mut WorkerContext) -> (B::Driver, WorkerStats) {
        let mut stats = WorkerStats {
            id: self.id,
            processed: 0,
            succeeded: 0,
            exit: WorkerExit::Sentinel,
        };

        loop {
            if ctx.shutdown.is_triggered() {
                stats.exit = WorkerExit::Interrupted;
                break;
            }

            let item = tokio::select! {
                biased;
                _ = ctx.shutdown.wait() => {
                    stats.exit = WorkerExit::Interrupted;
                    break;
                }
                item = ctx.queue.get() => item,
            };

            let target = match item {
                Some(WorkItem::Target(target)) => target,
                Some(WorkItem::Stop) => {
                    stats.exit = WorkerExit::Sentinel;
                    break;
                }
                None => {
                    stats.exit = WorkerExit::QueueClosed;
                    break;
                }
            };

            let (record, next_driver) = self.capture(target, driver).await;
            driver = next_driver;

            stats.processed += 1;
            if record.outcome.is_success() {
                stats.succeeded += 1;
            }

            if ctx.results.send(record).is_err() {
                warn!("Worker {} could not hand over a capture record", self.id);
            }
            ctx.counter.record_completion();
        }

        (driver, stats)
    }

    async fn capture(&self, target: Target, driver: B::Driver) -> (CaptureRecord, B::Driver) {
        info!("Attempting to screenshot {}", target);
        let started = Instant::now();
        let mut record = CaptureRecord::new(target, self.id);

        if !self.config.skip_dns {
            record.resolved = resolve_target(&record.target).await;
            if record.resolved.is_none() {
                debug!("Worker {} could not resolve {}", self.id, record.target);
                self.metrics.record_resolution_failure();
            }
        }

        let (mut record, driver) = self
            .backend
            .capture_host(&self.config, record, driver)
            .await;

        if record.duration.is_zero() {
            record.duration = started.elapsed();
        }
        if record.outcome.is_success() {
            debug!("Worker {} captured {}", self.id, record.target);
        } else {
            warn!(
                "Worker {} failed to capture {}: {:?}",
                self.id, record.target, record.outcome
            );
        }
        self.metrics.record_capture(&record.outcome, record.duration);

        (record, driver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_milestones_every_fifteen() {
        let milestones: Vec<usize> = (1..=46).filter(|v| ProgressCounter::is_milestone(*v)).collect();
        assert_eq!(milestones, vec![15, 30, 45]);
        assert!(!ProgressCounter::is_milestone(0));
    }

    #[test]
    fn test_counter_increments_are_shared() {
        let counter = ProgressCounter::new(23);
        let clone = counter.clone();

        assert_eq!(counter.increment(), 1);
        assert_eq!(clone.increment(), 2);
        assert_eq!(counter.record_completion(), 3);
        assert_eq!(clone.completed(), 3);
        assert_eq!(clone.total(), 23);
    }

    #[tokio::test]
    async fn test_counter_under_concurrency() {
        let counter = ProgressCounter::new(400);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counter = counter.clone();
                tokio::spawn(async move {
                    for _ in 0..50 {
                        counter.increment();
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(counter.completed(), 400);
    }
}
