//! perfstack agent library
//!
//! Runs a target program under a call-stack profiler while a separate sampler
//! process records host CPU, RAM and GPU activity, then stacks the flame chart
//! and the activity panels into one SVG document.

pub mod config;
pub mod coordinator;
pub mod output;
pub mod profiler;
pub mod sampler;
pub mod source;

pub use config::{PanelSize, RunConfig, SamplerConfig};
pub use coordinator::{RunArtifacts, TargetExit, TargetFault};
pub use profiler::{ExternalProfiler, NullProfiler, ProfileSession, StackProfiler};
pub use sampler::{SamplerReport, SamplerState};

use anyhow::{Context, Result};
use output::compose::{compose, ComposedLayout, PANEL_SPACING};
use output::ArtifactPaths;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Profiler command that disables call-stack sampling
pub const NO_PROFILER: &str = "none";

/// Outcome of a complete run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub exit: TargetExit,

    /// Final composed document
    pub composed: PathBuf,

    /// HTML timeline report
    pub report: PathBuf,

    pub layout: ComposedLayout,
    pub sampler: SamplerReport,
    pub profile_samples: usize,
}

/// Profile a run with the profiler named in `config`
pub async fn run_profiler(config: RunConfig) -> Result<RunSummary> {
    let raw_output = ArtifactPaths::new(&config.output_prefix).profiler_raw();

    if config.profiler_command == NO_PROFILER {
        info!("Call-stack profiling disabled");
        let mut profiler = NullProfiler::new(config.title(), config.prof_interval);
        run_with(&config, &mut profiler).await
    } else {
        let mut profiler = ExternalProfiler::new(
            config.profiler_command.clone(),
            config.prof_interval,
            raw_output,
            config.title(),
        );
        run_with(&config, &mut profiler).await
    }
}

/// Profile a run with `profiler`, compose the panels and clean up
pub async fn run_with<P: StackProfiler>(config: &RunConfig, profiler: &mut P) -> Result<RunSummary> {
    let artifacts = coordinator::run(config, profiler).await?;

    let composed = artifacts.paths.composed();
    let layout = compose(&artifacts.panels(), &composed, PANEL_SPACING)
        .context("Failed to compose panels")?;

    if config.keep_intermediate {
        debug!("Keeping intermediate files");
    } else {
        remove_intermediates(&artifacts);
    }

    Ok(RunSummary {
        exit: artifacts.exit,
        composed,
        report: artifacts.paths.report(),
        layout,
        sampler: artifacts.sampler,
        profile_samples: artifacts.profile_samples,
    })
}

fn remove_intermediates(artifacts: &RunArtifacts) {
    for path in artifacts.intermediates() {
        match std::fs::remove_file(&path) {
            Ok(()) => debug!("Removed {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
        }
    }
}
