//! Handle on the sampler process
//!
//! The sampler runs as a separate `perfstack-agent` process so that profiling
//! overhead in this process does not show up in its readings. Its stdin pipe is
//! the stop signal: this handle is the only writer, and closing the pipe tells
//! the sampler to finish. Its stdout carries the JSON [`SamplerReport`].

use crate::config::SamplerConfig;
use crate::sampler::SamplerReport;
use anyhow::{bail, Context, Result};
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Child, ChildStdin, Command, Stdio};
use tracing::{debug, info, warn};

/// A running sampler process.
///
/// Dropping the handle without calling [`SamplerProcess::stop`] still closes
/// the pipe and waits for the process, so it never outlives the run.
#[derive(Debug)]
pub struct SamplerProcess {
    child: Option<Child>,
    stop: Option<ChildStdin>,
}

impl SamplerProcess {
    pub fn spawn(bin: &Path, config: &SamplerConfig) -> Result<Self> {
        config.validate().context("Invalid sampler configuration")?;

        let mut child = Command::new(bin)
            .args(config.to_args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            // Own process group: a terminal Ctrl-C must not cut the sampling short
            .process_group(0)
            .spawn()
            .with_context(|| format!("Failed to launch sampler: {}", bin.display()))?;

        let stop = child.stdin.take();
        info!("Sampler process started (PID {})", child.id());

        Ok(Self {
            child: Some(child),
            stop,
        })
    }

    pub fn id(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    /// Signal the sampler to stop, wait for it to exit and read its report
    pub async fn stop(mut self) -> Result<SamplerReport> {
        drop(self.stop.take());
        let Some(child) = self.child.take() else {
            bail!("Sampler process already reaped");
        };

        debug!("Waiting for sampler process (PID {}) to exit", child.id());
        let output = tokio::task::spawn_blocking(move || child.wait_with_output())
            .await
            .context("Sampler join task failed")?
            .context("Failed to wait for sampler process")?;

        if !output.status.success() {
            bail!("Sampler process failed: {}", output.status);
        }

        let report: SamplerReport =
            serde_json::from_slice(&output.stdout).context("Malformed sampler report")?;
        info!(
            "Sampler exited: {} samples, {} panel(s)",
            report.samples,
            report.panels.len()
        );
        Ok(report)
    }
}

impl Drop for SamplerProcess {
    fn drop(&mut self) {
        drop(self.stop.take());
        if let Some(mut child) = self.child.take() {
            warn!("Sampler handle dropped; waiting for PID {} to exit", child.id());
            if let Err(e) = child.wait() {
                warn!("Failed to wait for sampler process: {}", e);
            }
        }
    }
}
