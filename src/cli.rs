use crate::{
    Config, ConfigError, OutputFormat, ProxyConfig, ProxyType, TargetSource, Viewport,
};
use anyhow::Context;
use clap::{CommandFactory, Parser};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tokio::fs;
use tracing::info;
use tracing_subscriber::{filter::filter_fn, fmt, prelude::*, EnvFilter};

/// Log target for lines already printed to the console; kept out of the
/// stdout layer so they only reach the log file.
pub const FILE_ONLY_TARGET: &str = "sitewitness::console";

fn shown_on_stdout(target: &str) -> bool {
    target != FILE_ONLY_TARGET
}

#[derive(Parser, Debug)]
#[command(name = "sitewitness")]
#[command(about = "Capture screenshots and page source for a list of websites")]
#[command(version)]
pub struct Cli {
    #[arg(short = 'f', value_name = "FILE", help = "File containing URLs to screenshot, one per line")]
    pub file: Option<PathBuf>,

    #[arg(long, value_name = "URL", help = "Single URL to screenshot")]
    pub single: Option<String>,

    #[arg(long, help = "Skip DNS resolution when capturing")]
    pub no_dns: bool,

    #[arg(long, value_name = "SECS", help = "Maximum time to wait for a page load [default: 7]")]
    pub timeout: Option<u64>,

    #[arg(long, value_name = "N", help = "Number of capture workers [default: 10]")]
    pub threads: Option<usize>,

    #[arg(long, value_name = "N", help = "Retries for a timed out page load [default: 1]")]
    pub max_retries: Option<usize>,

    #[arg(long, value_name = "UA", help = "User-Agent to send with every request")]
    pub user_agent: Option<String>,

    #[arg(long, value_name = "IP", help = "IP of the web proxy to use")]
    pub proxy_ip: Option<String>,

    #[arg(long, value_name = "PORT", help = "Port of the web proxy to use")]
    pub proxy_port: Option<u16>,

    #[arg(long, value_name = "TYPE", default_value = "http", help = "Proxy type (http or socks5)")]
    pub proxy_type: String,

    #[arg(long = "show-selenium", alias = "show-browser", help = "Show the browser window instead of using a virtual display")]
    pub show_browser: bool,

    #[arg(long, value_name = "PX", help = "Screenshot width, 600-7680 [default: 1366]")]
    pub width: Option<u32>,

    #[arg(long, value_name = "PX", help = "Screenshot height, 400-4320 [default: 768]")]
    pub height: Option<u32>,

    #[arg(short = 'd', value_name = "DIR", help = "Directory for the report [default: ./<date>_<time>]")]
    pub directory: Option<PathBuf>,

    #[arg(long, value_name = "FORMAT", help = "Screenshot format (png or jpeg) [default: png]")]
    pub format: Option<String>,

    #[arg(long, value_name = "PATH", help = "Chrome executable path")]
    pub chrome_path: Option<String>,

    #[arg(long, value_name = "FILE", help = "JSON configuration file, flags override it")]
    pub config: Option<PathBuf>,

    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,
}

impl Cli {
    /// Where the targets come from.
    pub fn target_source(&self) -> TargetSource {
        TargetSource {
            file: self.file.clone(),
            single: self.single.clone(),
        }
    }

    /// Merge the optional config file with the command line and validate the
    /// result.
    pub async fn build_config(&self) -> Result<Config, ConfigError> {
        let mut config = match &self.config {
            Some(path) => Config::from_json_file(path).await?,
            None => Config::default(),
        };

        // Width, height, then proxy: the first problem found is the one shown.
        config.viewport = Viewport {
            width: self.width.unwrap_or(config.viewport.width),
            height: self.height.unwrap_or(config.viewport.height),
        };
        config.viewport.validate()?;

        if self.proxy_ip.is_some() || self.proxy_port.is_some() {
            let proxy_type = self.proxy_type.parse::<ProxyType>()?;
            config.proxy =
                ProxyConfig::from_parts(self.proxy_ip.clone(), self.proxy_port, proxy_type)?;
        }

        if let Some(threads) = self.threads {
            config.threads = threads;
        }
        if let Some(timeout) = self.timeout {
            config.timeout = Duration::from_secs(timeout);
        }
        if let Some(max_retries) = self.max_retries {
            config.max_retries = max_retries;
        }
        if let Some(user_agent) = &self.user_agent {
            config.user_agent = Some(user_agent.clone());
        }
        if self.show_browser {
            config.show_browser = true;
        }
        if self.no_dns {
            config.skip_dns = true;
        }
        if let Some(chrome_path) = &self.chrome_path {
            config.chrome_path = Some(chrome_path.clone());
        }
        if let Some(format) = &self.format {
            config.output_format = format.parse::<OutputFormat>()?;
        }

        match &self.directory {
            Some(dir) => config.output_dir = dir.clone(),
            None if self.config.is_none() => config.output_dir = default_output_dir(),
            None => {}
        }

        config.validate()?;
        Ok(config)
    }
}

/// Timestamped directory name under the working directory.
pub fn default_output_dir() -> PathBuf {
    PathBuf::from(chrono::Local::now().format("%Y-%m-%d_%H%M%S").to_string())
}

/// Print a validation error followed by the usage text.
pub fn print_usage_error(error: &ConfigError) {
    println!("[*] Error: {error}");
    let _ = Cli::command().print_help();
    println!();
}

/// Create the output directory and its `screens` and `source` subdirectories.
pub async fn prepare_output_dir(config: &Config) -> anyhow::Result<()> {
    for dir in [&config.output_dir, &config.screens_dir(), &config.source_dir()] {
        fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create output directory {}", dir.display()))?;
    }
    Ok(())
}

/// Log to stdout and to `log_path`. `RUST_LOG` overrides the level.
pub fn setup_logging(verbose: bool, log_path: &Path) -> anyhow::Result<()> {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{level},chromiumoxide=warn")));

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("Failed to open log file {}", log_path.display()))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_filter(filter_fn(|meta| shown_on_stdout(meta.target()))),
        )
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(log_file)),
        )
        .try_init()
        .context("Failed to install log subscriber")?;

    info!("Logging to {}", log_path.display());
    Ok(())
}
