//! Chrome DevTools capture backend
//!
//! Each driver is one Chrome process with its own profile and temp
//! directories, so workers never share browser state. A capture opens a fresh
//! tab, loads the target under the configured timeout, saves the page source
//! and a screenshot, and closes the tab again. A driver whose CDP handler has
//! stopped is treated as dead and replaced before the next attempt.

use crate::{
    create_browser_config, session_profile_dir, session_temp_dir, CaptureBackend, CaptureError,
    CaptureOutcome, CaptureRecord, Config, Metrics, OutputFormat,
};
use async_trait::async_trait;
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use url::Url;

const QUIT_TIMEOUT: Duration = Duration::from_secs(5);

/// One running Chrome instance owned by a single worker.
pub struct ChromeDriver {
    instance_id: String,
    browser: Browser,
    handler: JoinHandle<()>,
}

impl ChromeDriver {
    pub fn is_alive(&self) -> bool {
        !self.handler.is_finished()
    }
}

pub struct ChromeBackend {
    metrics: Arc<Metrics>,
    next_instance: AtomicUsize,
}

impl ChromeBackend {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self {
            metrics,
            next_instance: AtomicUsize::new(0),
        }
    }

    fn next_instance_id(&self) -> String {
        format!(
            "{}-{}",
            std::process::id(),
            self.next_instance.fetch_add(1, Ordering::Relaxed)
        )
    }

    /// Launch a replacement and retire the old driver. On failure the old
    /// driver stays in place so the caller always has one to return.
    async fn restart(&self, config: &Config, driver: &mut ChromeDriver) -> Result<(), CaptureError> {
        let fresh = self
            .create_driver(config, config.user_agent.as_deref())
            .await?;
        let old = std::mem::replace(driver, fresh);
        info!(
            "Replaced browser instance {} with {}",
            old.instance_id, driver.instance_id
        );
        self.quit(old).await;
        self.metrics.record_driver_restart();
        Ok(())
    }

    async fn attempt(
        &self,
        config: &Config,
        driver: &ChromeDriver,
        url: &Url,
        record: &mut CaptureRecord,
    ) -> Result<(), CaptureError> {
        let page = driver
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| CaptureError::PageError(e.to_string()))?;

        let result = self.render(config, &page, url, record).await;
        let _ = page.close().await;
        result
    }

    /// Run one attempt and blame the browser when its handler is gone.
    async fn checked_attempt(
        &self,
        config: &Config,
        driver: &ChromeDriver,
        url: &Url,
        record: &mut CaptureRecord,
    ) -> Result<(), CaptureError> {
        self.attempt(config, driver, url, record)
            .await
            .map_err(|e| attribute_to_driver(e, driver.is_alive(), &driver.instance_id))
    }

    async fn render(
        &self,
        config: &Config,
        page: &Page,
        url: &Url,
        record: &mut CaptureRecord,
    ) -> Result<(), CaptureError> {
        let navigation = async {
            page.goto(url.as_str()).await?;
            page.wait_for_navigation().await?;
            Ok::<_, chromiumoxide::error::CdpError>(())
        };
        timeout(config.timeout, navigation)
            .await
            .map_err(|_| CaptureError::Timeout(config.timeout))?
            .map_err(|e| CaptureError::PageError(e.to_string()))?;

        record.page_title = page.get_title().await.ok().flatten();
        record.final_url = page.url().await.ok().flatten();

        let source = page
            .content()
            .await
            .map_err(|e| CaptureError::PageError(e.to_string()))?;

        let screenshot_params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .build();
        let png_data = page
            .screenshot(screenshot_params)
            .await
            .map_err(|e| CaptureError::CaptureFailed(e.to_string()))?;
        let image_data = convert_image_format(png_data, config.output_format)?;

        let stem = record.target.file_stem();
        let screenshot_path = config
            .screens_dir()
            .join(format!("{stem}.{}", config.output_format.extension()));
        let source_path = config.source_dir().join(format!("{stem}.txt"));

        fs::write(&screenshot_path, image_data).await?;
        fs::write(&source_path, source).await?;

        record.screenshot_path = Some(screenshot_path);
        record.source_path = Some(source_path);
        Ok(())
    }
}

#[async_trait]
impl CaptureBackend for ChromeBackend {
    type Driver = ChromeDriver;

    async fn create_driver(
        &self,
        config: &Config,
        user_agent: Option<&str>,
    ) -> Result<ChromeDriver, CaptureError> {
        let instance_id = self.next_instance_id();

        let mut session_config = config.clone();
        if let Some(user_agent) = user_agent {
            session_config.user_agent = Some(user_agent.to_string());
        }

        for dir in [session_temp_dir(&instance_id), session_profile_dir(&instance_id)] {
            fs::create_dir_all(&dir).await.map_err(|e| {
                CaptureError::BrowserLaunchFailed(format!(
                    "Failed to create {}: {}",
                    dir.display(),
                    e
                ))
            })?;
        }

        let browser_config = create_browser_config(&session_config, &instance_id)
            .map_err(CaptureError::BrowserLaunchFailed)?;
        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| CaptureError::BrowserLaunchFailed(e.to_string()))?;

        // The handler drives all CDP traffic and must be polled for the
        // browser to make progress.
        let handler_instance = instance_id.clone();
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    error!("Handler error for browser {}: {}", handler_instance, e);
                    break;
                }
            }
            debug!("Handler stream for browser {} ended", handler_instance);
        });

        info!("Browser instance {} created", instance_id);
        Ok(ChromeDriver {
            instance_id,
            browser,
            handler,
        })
    }

    async fn capture_host(
        &self,
        config: &Config,
        mut record: CaptureRecord,
        mut driver: ChromeDriver,
    ) -> (CaptureRecord, ChromeDriver) {
        let started = Instant::now();

        let url = match record.target.url() {
            Ok(url) => url,
            Err(e) => {
                record.outcome = CaptureOutcome::from(&e);
                return (record, driver);
            }
        };

        let max_attempts = config.max_retries + 1;
        for attempt in 1..=max_attempts {
            record.attempts = attempt;

            if !driver.is_alive() {
                warn!(
                    "Browser instance {} died, restarting before {}",
                    driver.instance_id, record.target
                );
                if let Err(e) = self.restart(config, &mut driver).await {
                    record.outcome = CaptureOutcome::from(&e);
                    break;
                }
            }

            match self.checked_attempt(config, &driver, &url, &mut record).await {
                Ok(()) => {
                    record.outcome = CaptureOutcome::Captured;
                    break;
                }
                Err(e) => {
                    record.outcome = CaptureOutcome::from(&e);
                    if e.is_fatal_for_driver() {
                        warn!("{} while capturing {}, restarting", e, record.target);
                        if let Err(restart_err) = self.restart(config, &mut driver).await {
                            record.outcome = CaptureOutcome::from(&restart_err);
                            break;
                        }
                    }
                    if !e.is_retryable() || attempt == max_attempts {
                        break;
                    }
                    debug!(
                        "Retrying {} after {} (attempt {}/{})",
                        record.target, e, attempt, max_attempts
                    );
                }
            }
        }

        record.duration = started.elapsed();
        (record, driver)
    }

    async fn quit(&self, mut driver: ChromeDriver) {
        let closed = timeout(QUIT_TIMEOUT, driver.browser.close()).await;
        if !matches!(closed, Ok(Ok(_))) {
            debug!("Browser {} did not close cleanly, killing it", driver.instance_id);
            let _ = driver.browser.kill().await;
        }
        let _ = timeout(QUIT_TIMEOUT, driver.browser.wait()).await;
        driver.handler.abort();

        for dir in [
            session_temp_dir(&driver.instance_id),
            session_profile_dir(&driver.instance_id),
        ] {
            let _ = fs::remove_dir_all(dir).await;
        }
        debug!("Browser instance {} shut down", driver.instance_id);
    }
}

/// A failure on a browser whose handler has stopped means the browser died.
fn attribute_to_driver(err: CaptureError, alive: bool, instance_id: &str) -> CaptureError {
    if alive || err.is_fatal_for_driver() {
        return err;
    }
    CaptureError::BrowserProcessDied(format!("browser {instance_id} exited: {err}"))
}

fn convert_image_format(png_data: Vec<u8>, format: OutputFormat) -> Result<Vec<u8>, CaptureError> {
    match format {
        OutputFormat::Png => Ok(png_data),
        OutputFormat::Jpeg => {
            let img = image::load_from_memory(&png_data)
                .map_err(|e| CaptureError::CaptureFailed(e.to_string()))?;
            let rgb = image::DynamicImage::ImageRgb8(img.to_rgb8());

            let mut jpeg_data = Vec::new();
            rgb.write_to(
                &mut std::io::Cursor::new(&mut jpeg_data),
                image::ImageFormat::Jpeg,
            )
            .map_err(|e| CaptureError::CaptureFailed(e.to_string()))?;

            Ok(jpeg_data)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_png() -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(4, 3, image::Rgba([10, 200, 30, 255]));
        let mut data = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut std::io::Cursor::new(&mut data), image::ImageFormat::Png)
            .unwrap();
        data
    }

    #[test]
    fn test_png_passthrough() {
        let png = tiny_png();
        assert_eq!(convert_image_format(png.clone(), OutputFormat::Png).unwrap(), png);
    }

    #[test]
    fn test_jpeg_conversion() {
        let jpeg = convert_image_format(tiny_png(), OutputFormat::Jpeg).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (4, 3));
    }

    #[test]
    fn test_garbage_is_not_an_image() {
        assert!(matches!(
            convert_image_format(vec![1, 2, 3], OutputFormat::Jpeg),
            Err(CaptureError::CaptureFailed(_))
        ));
    }

    #[test]
    fn test_errors_on_dead_browser_restart_the_driver() {
        let err = attribute_to_driver(
            CaptureError::PageError("channel closed".to_string()),
            false,
            "7-0",
        );
        assert!(err.is_fatal_for_driver());
        assert!(err.is_retryable());
        assert!(err.to_string().contains("7-0"));

        let err = attribute_to_driver(CaptureError::Timeout(Duration::from_secs(7)), true, "7-0");
        assert!(matches!(err, CaptureError::Timeout(_)));
        assert!(!err.is_fatal_for_driver());
    }

    #[test]
    fn test_instance_ids_are_unique() {
        let backend = ChromeBackend::new(Arc::new(Metrics::new()));
        let first = backend.next_instance_id();
        let second = backend.next_instance_id();
        assert_ne!(first, second);
        assert!(first.starts_with(&std::process::id().to_string()));
    }
}
