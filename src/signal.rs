//! Interrupt handling and the stop request shared with workers.
//!
//! An interrupt is a hard stop: the handler asks workers to quit their
//! browsers, gives them a short grace period and then exits the process.
//! Captures still in flight at that point are abandoned.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{error, info, warn};

/// How long workers get to tear down their drivers after an interrupt.
pub const INTERRUPT_GRACE: Duration = Duration::from_secs(2);

/// Exit status used when the run is interrupted.
pub const INTERRUPTED_EXIT_CODE: i32 = 1;

#[derive(Clone)]
pub struct Shutdown {
    sender: broadcast::Sender<()>,
    triggered: Arc<AtomicBool>,
    live_workers: Arc<AtomicUsize>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self {
            sender,
            triggered: Arc::new(AtomicBool::new(false)),
            live_workers: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn trigger(&self) {
        self.triggered.store(true, Ordering::SeqCst);
        let _ = self.sender.send(());
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    pub fn listener(&self) -> ShutdownListener {
        ShutdownListener {
            receiver: self.sender.subscribe(),
            triggered: self.triggered.clone(),
            live_workers: self.live_workers.clone(),
        }
    }

    pub fn live_workers(&self) -> usize {
        self.live_workers.load(Ordering::SeqCst)
    }

    /// Wait until every registered worker is gone, or `grace` runs out.
    ///
    /// Returns whether all workers finished in time.
    pub async fn wait_for_workers(&self, grace: Duration) -> bool {
        let deadline = Instant::now() + grace;
        while self.live_workers() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            sleep(Duration::from_millis(50)).await;
        }
        true
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// A worker's view of the stop request.
pub struct ShutdownListener {
    receiver: broadcast::Receiver<()>,
    triggered: Arc<AtomicBool>,
    live_workers: Arc<AtomicUsize>,
}

impl ShutdownListener {
    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Resolves once a stop has been requested. Never resolves otherwise.
    pub async fn wait(&mut self) {
        if self.is_triggered() {
            return;
        }
        match self.receiver.recv().await {
            Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => std::future::pending::<()>().await,
        }
    }

    /// Count the caller as a live worker until the guard drops.
    pub fn register_worker(&self) -> WorkerGuard {
        self.live_workers.fetch_add(1, Ordering::SeqCst);
        WorkerGuard {
            live_workers: self.live_workers.clone(),
        }
    }
}

pub struct WorkerGuard {
    live_workers: Arc<AtomicUsize>,
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.live_workers.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Install the process-wide SIGINT/SIGTERM handler.
///
/// Call once, from the main task.
pub fn install_interrupt_handler(shutdown: Shutdown) -> JoinHandle<()> {
    tokio::spawn(async move {
        wait_for_signal().await;

        println!();
        println!("Quitting...");
        warn!("Interrupt received, stopping {} workers", shutdown.live_workers());

        shutdown.trigger();
        if !shutdown.wait_for_workers(INTERRUPT_GRACE).await {
            warn!(
                "{} workers still busy after {:?}, exiting anyway",
                shutdown.live_workers(),
                INTERRUPT_GRACE
            );
        }

        std::process::exit(INTERRUPTED_EXIT_CODE);
    })
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) {
        (Ok(mut sigint), Ok(mut sigterm)) => {
            tokio::select! {
                _ = sigint.recv() => info!("Received SIGINT"),
                _ = sigterm.recv() => info!("Received SIGTERM"),
            }
        }
        _ => wait_for_ctrl_c().await,
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for interrupt: {}", e);
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_listener_sees_trigger() {
        let shutdown = Shutdown::new();
        let mut listener = shutdown.listener();
        assert!(!listener.is_triggered());

        let waiter = tokio::spawn(async move {
            listener.wait().await;
            listener.is_triggered()
        });
        tokio::task::yield_now().await;
        shutdown.trigger();

        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_late_listener_sees_earlier_trigger() {
        let shutdown = Shutdown::new();
        shutdown.trigger();

        let mut listener = shutdown.listener();
        tokio::time::timeout(Duration::from_secs(1), listener.wait())
            .await
            .expect("wait should return immediately");
    }

    #[tokio::test]
    async fn test_wait_for_workers_tracks_guards() {
        let shutdown = Shutdown::new();
        let listener = shutdown.listener();

        let guard = listener.register_worker();
        assert_eq!(shutdown.live_workers(), 1);
        assert!(!shutdown.wait_for_workers(Duration::from_millis(100)).await);

        drop(guard);
        assert_eq!(shutdown.live_workers(), 0);
        assert!(shutdown.wait_for_workers(Duration::from_millis(100)).await);
    }

    #[tokio::test]
    async fn test_dropped_shutdown_does_not_wake_listener() {
        let shutdown = Shutdown::new();
        let mut listener = shutdown.listener();
        drop(shutdown);

        let waited = tokio::time::timeout(Duration::from_millis(100), listener.wait()).await;
        assert!(waited.is_err());
    }
}
