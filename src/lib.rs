//! # Sitewitness
//!
//! Bulk website screenshot tool. Reads a list of URLs, spreads them over a
//! pool of capture workers that each drive their own Chrome, and
//! writes a screenshot and the page source for every target.
//!
//! ## How a run works
//!
//! | Stage | Component | Notes |
//! |-------|-----------|-------|
//! | Load targets | [`TargetSource`] | file lines first, then `--single` |
//! | Queue | [`TargetQueue`] | targets followed by one [`WorkItem::Stop`] per worker |
//! | Display | [`Xvfb`] | started once around the pool unless the browser is shown |
//! | Workers | [`CaptureWorker`] | `min(threads, targets)` tasks, one driver each |
//! | Progress | [`ProgressCounter`] | a line every 15 completed captures |
//! | Results | [`RunReport`] | `report.json` plus `metrics.prom` |
//!
//! Driver creation is serialized across workers; everything else runs in
//! parallel. An interrupt asks every worker to quit its browser and exits the
//! process shortly after.
//!
//! ## Output layout
//!
//! ```text
//! <output_dir>/
//!   screens/<stem>.png    screenshot per target
//!   source/<stem>.txt     page HTML per target
//!   logfile.log
//!   report.json
//!   metrics.prom
//! ```
//!
//! ## Library use
//!
//! ```rust,no_run
//! use sitewitness::{ChromeBackend, Config, Metrics, Shutdown, Target, WorkerPool};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let metrics = Arc::new(Metrics::new());
//!     let config = Config {
//!         show_browser: true,
//!         ..Default::default()
//!     };
//!     let mut pool = WorkerPool::new(
//!         config,
//!         ChromeBackend::new(metrics.clone()),
//!         metrics,
//!         Shutdown::new(),
//!     );
//!
//!     let summary = pool.run_targets(vec![Target::from("example.com")]).await;
//!     println!("{} of {} captured", summary.succeeded(), summary.total_targets);
//! }
//! ```
//!
//! ## CLI Usage
//!
//! ```bash
//! sitewitness -f urls.txt --threads 20 --timeout 10 -d results/
//! sitewitness --single https://example.com --format jpeg --no-dns
//! ```

/// Configuration and settings for a capture run
pub mod config;

/// Error types and error handling utilities
pub mod error;

/// Capture targets and where they are read from
pub mod target;

/// Shared work queue with stop sentinels
pub mod queue;

/// Forward DNS lookup of targets
pub mod resolve;

/// Per-target results and the run report
pub mod record;

/// Browser engine abstraction used by workers
pub mod backend;

/// Chrome implementation of the capture backend
pub mod browser;

/// Virtual display lifecycle
pub mod display;

/// Interrupt handling and worker shutdown
pub mod signal;

/// Performance metrics collection
pub mod metrics;

/// Capture workers and the shared progress counter
pub mod worker;

/// Worker pool coordination
pub mod pool;

/// Command-line interface implementation
pub mod cli;


pub use backend::*;
pub use browser::*;
pub use cli::*;
pub use config::*;
pub use display::*;
pub use error::*;
pub use metrics::*;
pub use pool::*;
pub use queue::*;
pub use record::*;
pub use resolve::*;
pub use signal::*;
pub use target::*;
pub use worker::*;
