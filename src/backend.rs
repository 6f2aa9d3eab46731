//! Seam between the worker pool and whatever actually drives a browser.

use crate::{CaptureError, CaptureRecord, Config};
use async_trait::async_trait;

/// A browser automation engine.
///
/// Workers create one driver each, feed it every target they dequeue and
/// quit it when they stop. `capture_host` takes the driver by value and hands
/// back the one to keep using, which lets an implementation swap in a fresh
/// session after a crash. It records failures in the returned record instead
/// of erroring, so one bad target never stops a worker.
#[async_trait]
pub trait CaptureBackend: Send + Sync + 'static {
    type Driver: Send + 'static;

    async fn create_driver(
        &self,
        config: &Config,
        user_agent: Option<&str>,
    ) -> Result<Self::Driver, CaptureError>;

    async fn capture_host(
        &self,
        config: &Config,
        record: CaptureRecord,
        driver: Self::Driver,
    ) -> (CaptureRecord, Self::Driver);

    async fn quit(&self, driver: Self::Driver);
}
