use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum CaptureError {
    #[error("Browser launch failed: {0}")]
    BrowserLaunchFailed(String),

    #[error("Browser process died: {0}")]
    BrowserProcessDied(String),

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Page error: {0}")]
    PageError(String),

    #[error("Screenshot capture failed: {0}")]
    CaptureFailed(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Virtual display failed: {0}")]
    DisplayFailed(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl CaptureError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CaptureError::PageError(_)
                | CaptureError::Timeout(_)
                | CaptureError::BrowserProcessDied(_)
        )
    }

    /// Whether the driver that produced this error should be thrown away
    /// before the next attempt.
    pub fn is_fatal_for_driver(&self) -> bool {
        matches!(self, CaptureError::BrowserProcessDied(_))
    }
}

impl From<std::io::Error> for CaptureError {
    fn from(err: std::io::Error) -> Self {
        CaptureError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for CaptureError {
    fn from(err: serde_json::Error) -> Self {
        CaptureError::SerializationError(err.to_string())
    }
}

/// Problems with user-supplied settings, detected before any worker starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("You didn't specify a file! I need a file containing URLs!")]
    MissingInput,

    #[error("You didn't specify the correct path to a file: {0}")]
    InputFileNotFound(String),

    #[error("Specify a width >= {min} and <= {max}, for example 1920. Got {value}")]
    WidthOutOfRange { value: u32, min: u32, max: u32 },

    #[error("Specify a height >= {min} and <= {max}, for example 1080. Got {value}")]
    HeightOutOfRange { value: u32, min: u32, max: u32 },

    #[error("Please provide a port for the proxy!")]
    ProxyPortMissing,

    #[error("Please provide an IP for the proxy!")]
    ProxyIpMissing,

    #[error("Unsupported proxy type: {0} (expected http or socks5)")]
    UnsupportedProxyType(String),

    #[error("Unsupported output format: {0} (expected png or jpeg)")]
    UnsupportedFormat(String),

    #[error("Thread count must be greater than 0")]
    ZeroThreads,

    #[error("Timeout must be greater than 0")]
    ZeroTimeout,

    #[error("Could not read configuration file {path}: {reason}")]
    ConfigFile { path: String, reason: String },
}
