//! CLI for perfstack
//!
//! `perfstack [-o OUTPUT] [-p PROF_INTERVAL] [-s SYS_INTERVAL] SCRIPT [ARGS...]`
//! profiles one run of SCRIPT and writes `<OUTPUT>.svg` and `<OUTPUT>.html`.

use anyhow::Result;
use clap::{CommandFactory, Parser};
use perfstack_agent::config::DEFAULT_OUTPUT;
use perfstack_shared::utils::parse_interval;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod output;
mod profile;

#[derive(Parser, Debug)]
#[command(name = "perfstack")]
#[command(about = "Profile a program's call stacks alongside host CPU, RAM and GPU activity", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Output file name without extension
    #[arg(short, long, default_value = DEFAULT_OUTPUT)]
    pub output: PathBuf,

    /// Profiler sampling interval in seconds (default: 1000 samples/second)
    #[arg(
        short = 'p',
        long = "prof-interval",
        alias = "prof_interval",
        default_value = "0.001",
        value_parser = parse_interval
    )]
    pub prof_interval: Duration,

    /// System activity sampling interval in seconds (default: 1 sample/second)
    #[arg(
        short = 's',
        long = "sys-interval",
        alias = "sys_interval",
        default_value = "1",
        value_parser = parse_interval
    )]
    pub sys_interval: Duration,

    /// Keep the flame chart, panel SVGs and raw profile after composition
    #[arg(long)]
    pub keep_intermediate: bool,

    /// Do not sample GPUs
    #[arg(long)]
    pub no_gpu: bool,

    /// Sampling profiler command, py-spy compatible ("none" disables call stacks)
    #[arg(long, env = "PERFSTACK_PROFILER")]
    pub profiler: Option<String>,

    /// Panel width
    #[arg(long, default_value_t = 1200.0)]
    pub width: f64,

    /// Panel height
    #[arg(long, default_value_t = 200.0)]
    pub height: f64,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Program or Python script to profile, followed by its arguments
    #[arg(value_name = "SCRIPT", trailing_var_arg = true)]
    pub command: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let Some((script, args)) = cli.command.split_first() else {
        Cli::command().print_help()?;
        return Ok(ExitCode::SUCCESS);
    };
    let (script, args) = (PathBuf::from(script), args.to_vec());

    init_tracing(cli.verbose);

    profile::run(&cli, script, args).await
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["perfstack", "train.py"]).unwrap();
        assert_eq!(cli.output, PathBuf::from("perf_output"));
        assert_eq!(cli.prof_interval, Duration::from_millis(1));
        assert_eq!(cli.sys_interval, Duration::from_secs(1));
        assert_eq!(cli.command, vec!["train.py"]);
    }

    #[test]
    fn test_script_arguments_are_passed_through() {
        let cli = Cli::try_parse_from([
            "perfstack", "-o", "run1", "-s", "0.5", "train.py", "--epochs", "3", "-v",
        ])
        .unwrap();
        assert_eq!(cli.output, PathBuf::from("run1"));
        assert_eq!(cli.sys_interval, Duration::from_millis(500));
        assert_eq!(cli.command, vec!["train.py", "--epochs", "3", "-v"]);
        assert!(!cli.verbose);
    }

    #[test]
    fn test_underscore_aliases() {
        let cli =
            Cli::try_parse_from(["perfstack", "--prof_interval", "0.01", "--sys_interval", "2", "job.py"]).unwrap();
        assert_eq!(cli.prof_interval, Duration::from_millis(10));
        assert_eq!(cli.sys_interval, Duration::from_secs(2));
    }

    #[test]
    fn test_missing_script_parses() {
        let cli = Cli::try_parse_from(["perfstack"]).unwrap();
        assert!(cli.command.is_empty());
    }

    #[test]
    fn test_rejects_bad_interval() {
        assert!(Cli::try_parse_from(["perfstack", "-s", "0", "job.py"]).is_err());
        assert!(Cli::try_parse_from(["perfstack", "-p", "fast", "job.py"]).is_err());
        assert!(Cli::try_parse_from(["perfstack", "-s", "1e300", "job.py"]).is_err());
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }
}
