use anyhow::Context;
use clap::Parser;
use sitewitness::{
    install_interrupt_handler, install_prometheus_recorder, prepare_output_dir,
    print_usage_error, setup_logging, write_metrics_snapshot, ChromeBackend, Cli, Metrics,
    RunReport, Shutdown, WorkerPool, Xvfb, FILE_ONLY_TARGET, VIRTUAL_DISPLAY_SIZE,
};
use std::process;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let started = Instant::now();
    let started_at = chrono::Utc::now();
    let args = Cli::parse();

    let source = args.target_source();
    let config = match source.validate() {
        Ok(()) => args.build_config().await,
        Err(e) => Err(e),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            print_usage_error(&e);
            process::exit(2);
        }
    };

    prepare_output_dir(&config).await?;
    setup_logging(args.verbose, &config.log_file_path())?;
    info!("Starting sitewitness v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Writing results to {} with {} threads, {:?} timeout",
        config.output_dir.display(),
        config.threads,
        config.timeout
    );

    // The recorder has to be in place before any metric handle is registered.
    let prometheus = match install_prometheus_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("Metrics recorder unavailable: {}", e);
            None
        }
    };
    let metrics = Arc::new(Metrics::new());

    let shutdown = Shutdown::new();
    let _interrupt = install_interrupt_handler(shutdown.clone());

    let output_dir = config.output_dir.clone();
    let (width, height) = VIRTUAL_DISPLAY_SIZE;
    let mut pool = WorkerPool::new(
        config,
        ChromeBackend::new(metrics.clone()),
        metrics,
        shutdown,
    )
    .with_display(Box::new(Xvfb::new(width, height)));

    let summary = pool.run(&source).await.context("Failed to load targets")?;
    info!(
        "{} of {} targets captured by {} workers",
        summary.succeeded(),
        summary.total_targets,
        summary.workers_spawned
    );
    for failure in &summary.worker_failures {
        warn!("{}", failure);
    }

    let report = RunReport::new(started_at, summary.total_targets, summary.records);
    let report_path = report
        .write_to(&output_dir)
        .await
        .context("Failed to write report")?;
    info!("Report written to {}", report_path.display());

    if let Some(handle) = &prometheus {
        if let Err(e) = write_metrics_snapshot(handle, &output_dir).await {
            warn!("Failed to write metrics snapshot: {}", e);
        }
    }

    let elapsed = started.elapsed().as_secs_f64();
    info!(target: FILE_ONLY_TARGET, "Finished in {:.2} seconds", elapsed);
    println!("Finished in {:.2} seconds", elapsed);
    Ok(())
}
