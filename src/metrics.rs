use crate::CaptureOutcome;
use metrics::{register_counter, register_histogram, Counter, Histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

pub const METRICS_FILE_NAME: &str = "metrics.prom";

/// Capture counters shared by every worker.
///
/// Handles are registered against whatever recorder is installed when the
/// struct is built; without one they are no-ops.
pub struct Metrics {
    pub captures_completed: Counter,
    pub captures_failed: Counter,
    pub captures_timed_out: Counter,
    pub resolution_failures: Counter,
    pub driver_restarts: Counter,
    pub capture_duration: Histogram,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            captures_completed: register_counter!("sitewitness_captures_completed_total"),
            captures_failed: register_counter!("sitewitness_captures_failed_total"),
            captures_timed_out: register_counter!("sitewitness_captures_timed_out_total"),
            resolution_failures: register_counter!("sitewitness_resolution_failures_total"),
            driver_restarts: register_counter!("sitewitness_driver_restarts_total"),
            capture_duration: register_histogram!("sitewitness_capture_duration_seconds"),
        }
    }

    pub fn record_capture(&self, outcome: &CaptureOutcome, duration: Duration) {
        self.captures_completed.increment(1);

        match outcome {
            CaptureOutcome::TimedOut => self.captures_timed_out.increment(1),
            CaptureOutcome::Failed { .. } => self.captures_failed.increment(1),
            _ => {}
        }

        self.capture_duration.record(duration.as_secs_f64());
    }

    pub fn record_resolution_failure(&self) {
        self.resolution_failures.increment(1);
    }

    pub fn record_driver_restart(&self) {
        self.driver_restarts.increment(1);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Install the Prometheus recorder globally. Must run before `Metrics::new`.
pub fn install_prometheus_recorder() -> Result<PrometheusHandle, Box<dyn std::error::Error>> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    Ok(handle)
}

/// Render the current metric values into the output directory.
pub async fn write_metrics_snapshot(
    handle: &PrometheusHandle,
    output_dir: &Path,
) -> std::io::Result<PathBuf> {
    let path = output_dir.join(METRICS_FILE_NAME);
    tokio::fs::write(&path, handle.render()).await?;
    info!("Metrics written to {}", path.display());
    Ok(path)
}
