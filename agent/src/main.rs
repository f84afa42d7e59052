//! perfstack sampler process
//!
//! Samples host CPU, RAM and GPU activity until its stdin is closed (or it is
//! interrupted), writes the timeline panels and prints a JSON report on stdout.
//! Logs go to stderr.

use anyhow::{Context, Result};
use clap::Parser;
use perfstack_agent::config::{PanelSize, SamplerConfig, DEFAULT_OUTPUT};
use perfstack_agent::sampler::run_sampler;
use perfstack_shared::utils::parse_interval;
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "perfstack-agent")]
#[command(about = "System activity sampler for perfstack", long_about = None)]
#[command(version)]
struct Args {
    /// Output prefix; panels are written to <OUTPUT>_cpu.svg and <OUTPUT>_gpu_<i>.svg
    #[arg(short, long, default_value = DEFAULT_OUTPUT)]
    output: PathBuf,

    /// Sampling interval (e.g. "1", "0.5", "250ms")
    #[arg(short, long, default_value = "1", value_parser = parse_interval)]
    interval: Duration,

    /// Panel width
    #[arg(long, default_value_t = 1200.0)]
    width: f64,

    /// Panel height
    #[arg(long, default_value_t = 200.0)]
    height: f64,

    /// Do not sample GPUs
    #[arg(long)]
    no_gpu: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_tracing(args.verbose)?;
    debug!("Configuration: {:?}", args);

    let config = SamplerConfig {
        output_prefix: args.output,
        interval: args.interval,
        gpu_enabled: !args.no_gpu,
        panel: PanelSize {
            width: args.width,
            height: args.height,
        },
    };

    let stop = CancellationToken::new();
    watch_stdin(stop.clone())?;
    watch_interrupt(stop.clone());

    let report = run_sampler(&config, &stop).await?;

    let json = serde_json::to_string(&report).context("Failed to encode report")?;
    println!("{}", json);
    Ok(())
}

/// Cancel `stop` once stdin reaches end of file
fn watch_stdin(stop: CancellationToken) -> Result<()> {
    std::thread::Builder::new()
        .name("stop-watcher".to_string())
        .spawn(move || {
            let mut stdin = std::io::stdin().lock();
            let mut buf = [0u8; 64];
            loop {
                match stdin.read(&mut buf) {
                    Ok(0) => break,
                    Ok(_) => continue,
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
            debug!("Stdin closed");
            stop.cancel();
        })
        .context("Failed to start stdin watcher")?;
    Ok(())
}

/// Cancel `stop` on Ctrl-C when run by hand
fn watch_interrupt(stop: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted; finishing up");
            stop.cancel();
        }
    });
}

/// Initialize tracing/logging on stderr; stdout carries the report
fn init_tracing(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    Ok(())
}
