//! Off-screen X display wrapped around a capture run.

use crate::CaptureError;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

const FIRST_DISPLAY: u32 = 99;
const LAST_DISPLAY: u32 = 199;
const STARTUP_TIMEOUT: Duration = Duration::from_secs(3);

#[async_trait]
pub trait VirtualDisplay: Send {
    async fn start(&mut self) -> Result<(), CaptureError>;

    /// Tear the display down. Calling it on a display that never started is a no-op.
    async fn stop(&mut self);

    /// X display name browsers should render into, while running.
    fn display_name(&self) -> Option<String>;
}

/// `Xvfb` server. Its display name is handed to each browser launch.
pub struct Xvfb {
    width: u32,
    height: u32,
    child: Option<Child>,
    display: Option<u32>,
}

impl Xvfb {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            child: None,
            display: None,
        }
    }

    fn lock_file(display: u32) -> PathBuf {
        PathBuf::from(format!("/tmp/.X{display}-lock"))
    }

    fn free_display() -> Option<u32> {
        (FIRST_DISPLAY..=LAST_DISPLAY).find(|n| !Self::lock_file(*n).exists())
    }
}

#[async_trait]
impl VirtualDisplay for Xvfb {
    async fn start(&mut self) -> Result<(), CaptureError> {
        if self.child.is_some() {
            return Ok(());
        }

        let display_num = Self::free_display()
            .ok_or_else(|| CaptureError::DisplayFailed("no free X display number".to_string()))?;

        let mut child = Command::new("Xvfb")
            .arg(format!(":{display_num}"))
            .args(["-screen", "0", &format!("{}x{}x24", self.width, self.height)])
            .args(["-nolisten", "tcp"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CaptureError::DisplayFailed(format!("could not launch Xvfb: {e}")))?;

        let deadline = Instant::now() + STARTUP_TIMEOUT;
        while !Self::lock_file(display_num).exists() {
            if let Ok(Some(status)) = child.try_wait() {
                return Err(CaptureError::DisplayFailed(format!("Xvfb exited with {status}")));
            }
            if Instant::now() >= deadline {
                warn!("Xvfb :{display_num} did not report ready, continuing anyway");
                break;
            }
            sleep(Duration::from_millis(50)).await;
        }

        self.display = Some(display_num);
        self.child = Some(child);

        info!(
            "Virtual display :{display_num} started ({}x{})",
            self.width, self.height
        );
        Ok(())
    }

    async fn stop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };

        if let Err(e) = child.kill().await {
            debug!("Xvfb already gone: {}", e);
        }

        if let Some(display_num) = self.display.take() {
            info!("Virtual display :{display_num} stopped");
        }
    }

    fn display_name(&self) -> Option<String> {
        self.display.map(|n| format!(":{n}"))
    }
}
