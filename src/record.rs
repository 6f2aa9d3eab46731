//! Per-target capture results and the run report built from them.

use crate::{CaptureError, Target};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const REPORT_FILE_NAME: &str = "report.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CaptureOutcome {
    /// Not attempted yet
    Pending,
    Captured,
    TimedOut,
    Failed { error: String },
}

impl CaptureOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CaptureOutcome::Captured)
    }
}

impl From<&CaptureError> for CaptureOutcome {
    fn from(err: &CaptureError) -> Self {
        match err {
            CaptureError::Timeout(_) => CaptureOutcome::TimedOut,
            other => CaptureOutcome::Failed {
                error: other.to_string(),
            },
        }
    }
}

/// Everything learned about one target during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureRecord {
    pub target: Target,
    pub resolved: Option<IpAddr>,
    pub outcome: CaptureOutcome,
    pub attempts: usize,
    pub page_title: Option<String>,
    pub final_url: Option<String>,
    pub screenshot_path: Option<PathBuf>,
    pub source_path: Option<PathBuf>,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
    pub worker_id: usize,
}

impl CaptureRecord {
    pub fn new(target: Target, worker_id: usize) -> Self {
        Self {
            target,
            resolved: None,
            outcome: CaptureOutcome::Pending,
            attempts: 0,
            page_title: None,
            final_url: None,
            screenshot_path: None,
            source_path: None,
            duration: Duration::ZERO,
            worker_id,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeTotals {
    pub captured: usize,
    pub timed_out: usize,
    pub failed: usize,
    pub pending: usize,
}

impl OutcomeTotals {
    pub fn tally<'a>(records: impl IntoIterator<Item = &'a CaptureRecord>) -> Self {
        let mut totals = Self::default();
        for record in records {
            match record.outcome {
                CaptureOutcome::Captured => totals.captured += 1,
                CaptureOutcome::TimedOut => totals.timed_out += 1,
                CaptureOutcome::Failed { .. } => totals.failed += 1,
                CaptureOutcome::Pending => totals.pending += 1,
            }
        }
        totals
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub total_targets: usize,
    pub totals: OutcomeTotals,
    pub records: Vec<CaptureRecord>,
}

impl RunReport {
    pub fn new(started_at: DateTime<Utc>, total_targets: usize, mut records: Vec<CaptureRecord>) -> Self {
        records.sort_by(|a, b| a.target.cmp(&b.target));
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at,
            total_targets,
            totals: OutcomeTotals::tally(&records),
            records,
        }
    }

    pub async fn write_to(&self, output_dir: &Path) -> Result<PathBuf, CaptureError> {
        let path = output_dir.join(REPORT_FILE_NAME);
        let json = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(&path, json).await?;
        Ok(path)
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
