//! Run coordination
//!
//! Drives one profiling run: starts the sampler process, runs the target under
//! the call-stack profiler, stops the sampler once the target is gone and
//! renders the profile. The sampler is stopped and joined on every path out of
//! [`run`], including target faults.

pub mod sampler_process;
pub mod target;

pub use sampler_process::SamplerProcess;
pub use target::{TargetCommand, TargetExit, TargetFault};

use crate::config::RunConfig;
use crate::output::flamegraph::generate_flame_chart;
use crate::output::html::generate_report;
use crate::output::ArtifactPaths;
use crate::profiler::{ProfileSession, StackProfiler};
use crate::sampler::SamplerReport;
use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::{info, warn};

/// Everything a run left on disk
#[derive(Debug, Clone)]
pub struct RunArtifacts {
    pub paths: ArtifactPaths,

    /// How the target ended
    pub exit: TargetExit,

    /// What the sampler process reported
    pub sampler: SamplerReport,

    /// Call-stack samples behind the flame chart
    pub profile_samples: usize,
}

impl RunArtifacts {
    /// Panels in composition order: flame chart, CPU/RAM, then GPUs by index
    pub fn panels(&self) -> Vec<PathBuf> {
        let mut panels = vec![self.paths.flame_chart()];
        panels.extend(self.sampler.cpu_panel().map(|p| p.path.clone()));
        panels.extend(self.sampler.gpu_panels().map(|p| p.path.clone()));
        panels
    }

    /// Files that only exist to build the composed document
    pub fn intermediates(&self) -> Vec<PathBuf> {
        let mut files = self.panels();
        files.push(self.paths.profiler_raw());
        files
    }
}

/// Profile one run of the target described by `config`
pub async fn run<P: StackProfiler>(config: &RunConfig, profiler: &mut P) -> Result<RunArtifacts> {
    config.validate().context("Invalid configuration")?;

    let paths = ArtifactPaths::new(&config.output_prefix);
    if let Some(dir) = paths.prefix().parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory: {}", dir.display()))?;
    }

    let sampler = SamplerProcess::spawn(&config.sampler_bin, &config.sampler_config())?;

    let outcome = run_target(config, &paths, profiler).await;

    // Join before reading anything the sampler wrote, whatever the target did
    let sampler_report = sampler.stop().await;
    let (exit, session) = outcome?;
    let sampler_report = sampler_report?;

    match exit {
        TargetExit::Completed => info!("Target completed"),
        TargetExit::ExitCode(code) => info!("Target exited with status {}", code),
        TargetExit::Interrupted => info!("Target interrupted"),
    }

    let flame = generate_flame_chart(&session, &paths.flame_chart(), config.panel.width.round() as usize)?;
    generate_report(&session, &flame, &paths.report())?;

    Ok(RunArtifacts {
        paths,
        exit,
        sampler: sampler_report,
        profile_samples: session.sample_count(),
    })
}

/// Run the target to completion under `profiler`
async fn run_target<P: StackProfiler>(
    config: &RunConfig,
    paths: &ArtifactPaths,
    profiler: &mut P,
) -> Result<(TargetExit, ProfileSession)> {
    let command = TargetCommand::new(
        &config.script,
        &config.args,
        &config.interpreter,
        &paths.exception_report(),
    );
    let target = command.spawn()?;

    match target.id() {
        Some(pid) => {
            info!("Target started (PID {})", pid);
            if let Err(e) = profiler.start(pid) {
                warn!("Call-stack profiling unavailable: {:#}", e);
            }
        }
        None => warn!("Target exited before the profiler could attach"),
    }

    let exit = target.wait().await;

    let session = match profiler.stop().await {
        Ok(session) => session,
        Err(e) => {
            warn!("Failed to collect call-stack profile: {:#}", e);
            ProfileSession::empty(config.title(), config.prof_interval)
        }
    };

    Ok((exit?, session))
}
