//! Worker pool coordinator
//!
//! Builds the target queue, decides how many workers to run, wraps the run in
//! the virtual display when one is needed, and collects what every worker
//! produced. Nothing a worker does can make `run_targets` fail: worker errors
//! and panics are logged and listed in the summary.

use crate::{
    CaptureBackend, CaptureError, CaptureRecord, CaptureWorker, Config, Metrics,
    ProgressCounter, Shutdown, Target, TargetQueue, TargetSource, VirtualDisplay, WorkerContext,
};
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

/// Never more workers than targets, never more than configured.
pub fn worker_count(threads: usize, targets: usize) -> usize {
    threads.min(targets)
}

#[derive(Debug, Default)]
pub struct PoolSummary {
    pub total_targets: usize,
    pub workers_spawned: usize,
    pub sentinels_enqueued: usize,
    /// Final value of the shared progress counter
    pub completed: usize,
    pub records: Vec<CaptureRecord>,
    pub worker_failures: Vec<String>,
    pub display_started: bool,
    pub elapsed: Duration,
}

impl PoolSummary {
    pub fn succeeded(&self) -> usize {
        self.records.iter().filter(|r| r.outcome.is_success()).count()
    }
}

pub struct WorkerPool<B: CaptureBackend> {
    config: Arc<Config>,
    backend: Arc<B>,
    metrics: Arc<Metrics>,
    shutdown: Shutdown,
    display: Option<Box<dyn VirtualDisplay>>,
}

impl<B: CaptureBackend> WorkerPool<B> {
    pub fn new(config: Config, backend: B, metrics: Arc<Metrics>, shutdown: Shutdown) -> Self {
        Self {
            config: Arc::new(config),
            backend: Arc::new(backend),
            metrics,
            shutdown,
            display: None,
        }
    }

    /// Attach the display started around runs that need one.
    pub fn with_display(mut self, display: Box<dyn VirtualDisplay>) -> Self {
        self.display = Some(display);
        self
    }

    /// Load every target from `source` and capture them all.
    pub async fn run(&mut self, source: &TargetSource) -> Result<PoolSummary, CaptureError> {
        let targets = source.load().await?;
        info!("Loaded {} targets", targets.len());
        Ok(self.run_targets(targets).await)
    }

    pub async fn run_targets(&mut self, targets: Vec<Target>) -> PoolSummary {
        let started = Instant::now();
        let total = targets.len();
        let num_workers = worker_count(self.config.threads, total);

        let queue = TargetQueue::with_targets(targets, num_workers);
        let counter = ProgressCounter::new(total);

        let mut summary = PoolSummary {
            total_targets: total,
            sentinels_enqueued: num_workers,
            ..Default::default()
        };

        if num_workers == 0 {
            info!("No targets to capture");
            return summary;
        }

        summary.display_started = self.start_display().await;
        let config = self.worker_config(summary.display_started);

        info!("Starting {} capture workers for {} targets", num_workers, total);
        let (results_tx, mut results_rx) = mpsc::unbounded_channel();
        let creation_lock = Arc::new(Mutex::new(()));

        let handles: Vec<_> = (0..num_workers)
            .map(|id| {
                let worker = CaptureWorker::new(
                    id,
                    config.clone(),
                    self.backend.clone(),
                    self.metrics.clone(),
                );
                let ctx = WorkerContext {
                    queue: queue.clone(),
                    creation_lock: creation_lock.clone(),
                    counter: counter.clone(),
                    results: results_tx.clone(),
                    shutdown: self.shutdown.listener(),
                };
                tokio::spawn(worker.run(ctx))
            })
            .collect();
        summary.workers_spawned = handles.len();
        drop(results_tx);

        for (id, joined) in join_all(handles).await.into_iter().enumerate() {
            match joined {
                Ok(Ok(stats)) => debug!(
                    "Worker {} finished: {} processed, {} succeeded",
                    stats.id, stats.processed, stats.succeeded
                ),
                Ok(Err(e)) => {
                    error!("Worker {} failed: {}", id, e);
                    summary.worker_failures.push(format!("worker {id}: {e}"));
                }
                Err(e) => {
                    error!("Worker {} did not complete: {}", id, e);
                    summary.worker_failures.push(format!("worker {id}: {e}"));
                }
            }
        }

        while let Some(record) = results_rx.recv().await {
            summary.records.push(record);
        }

        if summary.display_started {
            self.stop_display().await;
        }

        summary.completed = counter.completed();
        summary.elapsed = started.elapsed();
        if summary.completed < total && !self.shutdown.is_triggered() {
            warn!(
                "Only {} of {} targets were attempted",
                summary.completed, total
            );
        }
        summary
    }

    /// Settings handed to workers, pointing browsers at the running display.
    fn worker_config(&self, display_started: bool) -> Arc<Config> {
        let display_name = self
            .display
            .as_ref()
            .filter(|_| display_started)
            .and_then(|display| display.display_name());

        match display_name {
            Some(name) => {
                debug!("Browsers will render into display {}", name);
                Arc::new(Config {
                    virtual_display: Some(name),
                    ..(*self.config).clone()
                })
            }
            None => self.config.clone(),
        }
    }

    async fn start_display(&mut self) -> bool {
        if !self.config.wants_virtual_display() {
            return false;
        }
        let Some(display) = self.display.as_mut() else {
            return false;
        };

        match display.start().await {
            Ok(()) => true,
            Err(e) => {
                warn!("Continuing without virtual display: {}", e);
                false
            }
        }
    }

    async fn stop_display(&mut self) {
        if let Some(display) = self.display.as_mut() {
            display.stop().await;
        }
    }
}
