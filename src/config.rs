//! Configuration management with serde serialization/deserialization
//!
//! This module holds every setting the capture run needs: worker count,
//! per-request timeout and retries, browser window size, proxy and output
//! layout. It also derives the browser command line from those settings.

use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const MIN_WIDTH: u32 = 600;
pub const MAX_WIDTH: u32 = 7680;
pub const MIN_HEIGHT: u32 = 400;
pub const MAX_HEIGHT: u32 = 4320;

/// Size of the off-screen display started around the worker pool.
pub const VIRTUAL_DISPLAY_SIZE: (u32, u32) = (1920, 1080);

pub const LOG_FILE_NAME: &str = "logfile.log";
pub const SCREENS_DIR: &str = "screens";
pub const SOURCE_DIR: &str = "source";

/// Main configuration structure for a capture run
///
/// # Examples
///
/// ```rust
/// use sitewitness::Config;
///
/// let config = Config {
///     threads: 4,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Upper bound on the number of capture workers (default: 10)
    ///
    /// The pool never spawns more workers than there are targets.
    pub threads: usize,

    /// Maximum time to wait for a single page load (default: 7 seconds)
    ///
    /// Written as whole seconds in configuration files.
    #[serde(with = "duration_secs")]
    pub timeout: Duration,

    /// How many times a timed out or failed page load is retried (default: 1)
    pub max_retries: usize,

    /// User-Agent sent with every request (default: browser default)
    pub user_agent: Option<String>,

    /// Web proxy every browser session goes through
    pub proxy: Option<ProxyConfig>,

    /// Show the browser window instead of rendering off-screen (default: false)
    ///
    /// When set, no virtual display is started.
    pub show_browser: bool,

    /// Browser window size used for screenshots
    pub viewport: Viewport,

    /// Skip DNS resolution of targets (default: false)
    pub skip_dns: bool,

    /// Directory receiving screenshots, page sources, the log and the report
    pub output_dir: PathBuf,

    /// Image format written for screenshots (default: PNG)
    pub output_format: OutputFormat,

    /// Path to Chrome/Chromium executable (default: auto-detect)
    pub chrome_path: Option<String>,

    /// X display the browsers render into, set once a virtual display runs
    #[serde(skip)]
    pub virtual_display: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            threads: 10,
            timeout: Duration::from_secs(7),
            max_retries: 1,
            user_agent: None,
            proxy: None,
            show_browser: false,
            viewport: Viewport::default(),
            skip_dns: false,
            output_dir: PathBuf::from("."),
            output_format: OutputFormat::Png,
            chrome_path: None,
            virtual_display: None,
        }
    }
}

impl Config {
    /// Load a configuration from a JSON file. Missing fields take their defaults.
    pub async fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let content =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|e| ConfigError::ConfigFile {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?;

        serde_json::from_str(&content).map_err(|e| ConfigError::ConfigFile {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.threads == 0 {
            return Err(ConfigError::ZeroThreads);
        }

        if self.timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }

        self.viewport.validate()
    }

    /// Whether the pool should wrap its run in a virtual display.
    pub fn wants_virtual_display(&self) -> bool {
        !self.show_browser
    }

    /// Browsers run headless unless shown or given a virtual display.
    pub fn headless(&self) -> bool {
        !self.show_browser && self.virtual_display.is_none()
    }

    pub fn log_file_path(&self) -> PathBuf {
        self.output_dir.join(LOG_FILE_NAME)
    }

    pub fn screens_dir(&self) -> PathBuf {
        self.output_dir.join(SCREENS_DIR)
    }

    pub fn source_dir(&self) -> PathBuf {
        self.output_dir.join(SOURCE_DIR)
    }
}

/// Browser window size for screenshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct Viewport {
    /// Window width in pixels, 600-7680 (default: 1366)
    pub width: u32,

    /// Window height in pixels, 400-4320 (default: 768)
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1366,
            height: 768,
        }
    }
}

impl Viewport {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_WIDTH..=MAX_WIDTH).contains(&self.width) {
            return Err(ConfigError::WidthOutOfRange {
                value: self.width,
                min: MIN_WIDTH,
                max: MAX_WIDTH,
            });
        }

        if !(MIN_HEIGHT..=MAX_HEIGHT).contains(&self.height) {
            return Err(ConfigError::HeightOutOfRange {
                value: self.height,
                min: MIN_HEIGHT,
                max: MAX_HEIGHT,
            });
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyType {
    Http,
    Socks5,
}

impl FromStr for ProxyType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "socks5" => Ok(Self::Socks5),
            other => Err(ConfigError::UnsupportedProxyType(other.to_string())),
        }
    }
}

impl ProxyType {
    fn scheme(&self) -> &'static str {
        match self {
            ProxyType::Http => "http",
            ProxyType::Socks5 => "socks5",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProxyConfig {
    pub ip: String,
    pub port: u16,
    pub kind: ProxyType,
}

impl ProxyConfig {
    /// Combine the separately supplied proxy address parts.
    ///
    /// Both parts or neither must be given; a lone IP or a lone port is an error.
    pub fn from_parts(
        ip: Option<String>,
        port: Option<u16>,
        kind: ProxyType,
    ) -> Result<Option<Self>, ConfigError> {
        match (ip, port) {
            (Some(ip), Some(port)) => Ok(Some(Self { ip, port, kind })),
            (Some(_), None) => Err(ConfigError::ProxyPortMissing),
            (None, Some(_)) => Err(ConfigError::ProxyIpMissing),
            (None, None) => Ok(None),
        }
    }

    pub fn server_arg(&self) -> String {
        format!(
            "--proxy-server={}://{}:{}",
            self.kind.scheme(),
            self.ip,
            self.port
        )
    }
}

/// Supported screenshot formats
///
/// - PNG: lossless, what the browser produces natively
/// - JPEG: re-encoded from the PNG, much smaller files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Png,
    Jpeg,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpg",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "png" => Ok(Self::Png),
            "jpeg" | "jpg" => Ok(Self::Jpeg),
            other => Err(ConfigError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Generate Chrome command-line arguments for one browser session
///
/// Every session gets its own temp directory so that concurrently running
/// workers never share Chrome singleton state.
pub fn chrome_args(config: &Config, instance_id: &str) -> Vec<String> {
    let mut args = vec![
        "--no-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--disable-gpu".to_string(),
        "--disable-background-timer-throttling".to_string(),
        "--disable-backgrounding-occluded-windows".to_string(),
        "--disable-renderer-backgrounding".to_string(),
        "--disable-features=TranslateUI".to_string(),
        "--disable-extensions".to_string(),
        "--disable-default-apps".to_string(),
        "--disable-sync".to_string(),
        "--no-first-run".to_string(),
        "--disable-process-singleton-dialog".to_string(),
        "--allow-running-insecure-content".to_string(),
        "--ignore-certificate-errors".to_string(),
        "--ignore-ssl-errors".to_string(),
        format!(
            "--window-size={},{}",
            config.viewport.width, config.viewport.height
        ),
        format!("--temp-dir={}", session_temp_dir(instance_id).display()),
    ];

    if let Some(proxy) = &config.proxy {
        args.push(proxy.server_arg());
    }

    if let Some(user_agent) = &config.user_agent {
        args.push(format!("--user-agent={user_agent}"));
    }

    args
}

pub fn session_temp_dir(instance_id: &str) -> PathBuf {
    std::env::temp_dir().join(format!("sitewitness-temp-{instance_id}"))
}

pub fn session_profile_dir(instance_id: &str) -> PathBuf {
    std::env::temp_dir().join(format!("sitewitness-profile-{instance_id}"))
}

pub fn create_browser_config(
    config: &Config,
    instance_id: &str,
) -> Result<chromiumoxide::browser::BrowserConfig, String> {
    use chromiumoxide::browser::BrowserConfig;

    let mut builder = BrowserConfig::builder()
        .window_size(config.viewport.width, config.viewport.height)
        .request_timeout(config.timeout)
        .user_data_dir(session_profile_dir(instance_id))
        .args(chrome_args(config, instance_id));

    if !config.headless() {
        builder = builder.with_head();
    }

    if let Some(display) = &config.virtual_display {
        builder = builder.env("DISPLAY", display);
    }

    if let Some(chrome_path) = &config.chrome_path {
        builder = builder.chrome_executable(chrome_path);
    }

    builder.build()
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_viewport(width: u32, height: u32) -> Config {
        Config {
            viewport: Viewport { width, height },
            ..Default::default()
        }
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.threads, 10);
        assert_eq!(config.timeout, Duration::from_secs(7));
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.viewport, Viewport { width: 1366, height: 768 });
        assert!(!config.show_browser);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_width_bounds() {
        assert!(matches!(
            with_viewport(599, 768).validate(),
            Err(ConfigError::WidthOutOfRange { value: 599, .. })
        ));
        assert!(with_viewport(600, 768).validate().is_ok());
        assert!(with_viewport(7680, 768).validate().is_ok());
        assert!(matches!(
            with_viewport(7681, 768).validate(),
            Err(ConfigError::WidthOutOfRange { value: 7681, .. })
        ));
    }

    #[test]
    fn test_height_bounds() {
        assert!(matches!(
            with_viewport(1366, 399).validate(),
            Err(ConfigError::HeightOutOfRange { value: 399, .. })
        ));
        assert!(with_viewport(1366, 400).validate().is_ok());
        assert!(with_viewport(1366, 4320).validate().is_ok());
        assert!(matches!(
            with_viewport(1366, 4321).validate(),
            Err(ConfigError::HeightOutOfRange { value: 4321, .. })
        ));
    }

    #[test]
    fn test_zero_threads_and_timeout_rejected() {
        let config = Config {
            threads: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroThreads));

        let config = Config {
            timeout: Duration::ZERO,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroTimeout));
    }

    #[test]
    fn test_proxy_parts() {
        assert_eq!(
            ProxyConfig::from_parts(Some("127.0.0.1".into()), None, ProxyType::Http),
            Err(ConfigError::ProxyPortMissing)
        );
        assert_eq!(
            ProxyConfig::from_parts(None, Some(8080), ProxyType::Http),
            Err(ConfigError::ProxyIpMissing)
        );
        assert_eq!(ProxyConfig::from_parts(None, None, ProxyType::Http), Ok(None));

        let proxy = ProxyConfig::from_parts(Some("127.0.0.1".into()), Some(1080), ProxyType::Socks5)
            .unwrap()
            .unwrap();
        assert_eq!(proxy.server_arg(), "--proxy-server=socks5://127.0.0.1:1080");
    }

    #[test]
    fn test_parse_enums() {
        assert_eq!("SOCKS5".parse::<ProxyType>(), Ok(ProxyType::Socks5));
        assert!("ftp".parse::<ProxyType>().is_err());
        assert_eq!("jpg".parse::<OutputFormat>(), Ok(OutputFormat::Jpeg));
        assert_eq!(OutputFormat::Jpeg.extension(), "jpg");
        assert!("gif".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_chrome_args_generation() {
        let config = Config {
            user_agent: Some("witness/1.0".to_string()),
            proxy: Some(ProxyConfig {
                ip: "10.0.0.1".to_string(),
                port: 3128,
                kind: ProxyType::Http,
            }),
            ..Default::default()
        };
        let args = chrome_args(&config, "42-0");

        assert!(args.contains(&"--no-sandbox".to_string()));
        assert!(args.contains(&"--window-size=1366,768".to_string()));
        assert!(args.contains(&"--user-agent=witness/1.0".to_string()));
        assert!(args.contains(&"--proxy-server=http://10.0.0.1:3128".to_string()));
        assert!(args.iter().any(|a| a.starts_with("--temp-dir=") && a.ends_with("sitewitness-temp-42-0")));
    }

    #[test]
    fn test_timeout_is_whole_seconds_in_json() {
        let config: Config = serde_json::from_str(r#"{ "timeout": 10 }"#).unwrap();
        assert_eq!(config.timeout, Duration::from_secs(10));

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["timeout"], 10);
        assert!(json.get("virtual_display").is_none());

        assert!(serde_json::from_str::<Config>(r#"{ "timeout": "ten" }"#).is_err());
    }

    #[test]
    fn test_headless_unless_shown_or_on_a_display() {
        let mut config = Config::default();
        assert!(config.headless());

        config.virtual_display = Some(":99".to_string());
        assert!(!config.headless());

        let shown = Config {
            show_browser: true,
            ..Default::default()
        };
        assert!(!shown.headless());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: Config = serde_json::from_str(r#"{ "threads": 3, "skip_dns": true }"#).unwrap();
        assert_eq!(config.threads, 3);
        assert!(config.skip_dns);
        assert_eq!(config.max_retries, 1);
    }
}
