//! The profiling run behind the `perfstack` command

use crate::output;
use crate::Cli;
use anyhow::Result;
use perfstack_agent::config::PanelSize;
use perfstack_agent::{RunConfig, RunSummary, TargetExit, TargetFault, NO_PROFILER};
use perfstack_shared::utils::format_rate;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;

pub async fn run(cli: &Cli, script: PathBuf, args: Vec<String>) -> Result<ExitCode> {
    let mut config = RunConfig::new(script, args);
    config.output_prefix = cli.output.clone();
    config.prof_interval = cli.prof_interval;
    config.sys_interval = cli.sys_interval;
    config.gpu_enabled = !cli.no_gpu;
    config.keep_intermediate = cli.keep_intermediate;
    config.panel = PanelSize {
        width: cli.width,
        height: cli.height,
    };
    if let Some(profiler) = &cli.profiler {
        config.profiler_command = profiler.clone();
    }

    config.validate()?;
    debug!("Run configuration: {:?}", config);
    print_banner(&config);

    let summary = match perfstack_agent::run_profiler(config).await {
        Ok(summary) => summary,
        Err(e) => {
            if let Some(fault) = e.downcast_ref::<TargetFault>() {
                debug!("Run aborted: {:#}", e);
                output::error(&format!("Target failed: {}", fault));
                return Ok(ExitCode::FAILURE);
            }
            return Err(e);
        }
    };

    print_summary(&summary);
    Ok(ExitCode::from(exit_status(summary.exit)))
}

fn print_banner(config: &RunConfig) {
    let gpus = if config.gpu_enabled {
        perfstack_gpu::device_count()
    } else {
        0
    };
    let profiler = if config.profiler_command == NO_PROFILER {
        "disabled".to_string()
    } else {
        format!("{} ({})", format_rate(config.prof_interval), config.profiler_command)
    };

    output::banner(&[
        ("Script to profile", config.script.display().to_string()),
        (
            "Profiling output",
            format!("{}[.svg/.html]", config.output_prefix.display()),
        ),
        ("Profiler sampling frequency", profiler),
        ("System activity sampling frequency", format_rate(config.sys_interval)),
        ("Number of GPUs", gpus.to_string()),
    ]);
}

fn print_summary(summary: &RunSummary) {
    match summary.exit {
        TargetExit::Completed => output::success("Target completed"),
        TargetExit::ExitCode(code) => output::warning(&format!("Target exited with status {}", code)),
        TargetExit::Interrupted => output::warning("Target interrupted"),
    }

    output::info(&format!(
        "{} system samples over {:.1}s, {} call-stack samples",
        summary.sampler.samples, summary.sampler.duration_secs, summary.profile_samples
    ));
    if summary.profile_samples == 0 {
        output::warning("No call stacks were recorded; the flame chart is a placeholder");
    }

    output::success(&format!(
        "Composed {} panel(s) into {}",
        summary.layout.panels.len(),
        summary.composed.display()
    ));
    output::success(&format!("Timeline report: {}", summary.report.display()));
}

/// The target's own exit status, so wrapping scripts see what the target returned
fn exit_status(exit: TargetExit) -> u8 {
    u8::try_from(exit.code()).unwrap_or(1)
}
