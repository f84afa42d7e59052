//! Sampling profiler running as a separate executable
//!
//! Drives a py-spy compatible profiler: `<cmd> record --pid <pid> --rate <hz>
//! --format speedscope --output <file>`. The profiler exits on its own once
//! the target exits; if it lingers it is interrupted, then killed.

use super::{speedscope, ProfileSession, StackProfiler};
use anyhow::{Context, Result};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use perfstack_shared::utils::time::system_time_secs;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// How long the profiler gets to flush its output after the target exits
const STOP_GRACE: Duration = Duration::from_secs(10);

pub struct ExternalProfiler {
    command: String,
    interval: Duration,
    raw_output: PathBuf,
    program: String,
    child: Option<Child>,
    started_at: f64,
    started: Option<Instant>,
}

impl ExternalProfiler {
    /// `raw_output` receives the profiler's speedscope file
    pub fn new(
        command: impl Into<String>,
        interval: Duration,
        raw_output: impl Into<PathBuf>,
        program: impl Into<String>,
    ) -> Self {
        Self {
            command: command.into(),
            interval,
            raw_output: raw_output.into(),
            program: program.into(),
            child: None,
            started_at: 0.0,
            started: None,
        }
    }

    fn rate_hz(&self) -> u64 {
        perfstack_shared::utils::rate_hz(self.interval).round().max(1.0) as u64
    }

    fn empty_session(&self, duration_secs: f64) -> ProfileSession {
        ProfileSession {
            started_at: self.started_at,
            duration_secs,
            ..ProfileSession::empty(self.program.clone(), self.interval)
        }
    }

    /// Wait for the profiler to exit, interrupting and finally killing it
    async fn wait_for_exit(child: &mut Child) -> Result<()> {
        if let Ok(status) = tokio::time::timeout(STOP_GRACE, child.wait()).await {
            let status = status?;
            if !status.success() {
                warn!("Profiler exited with {}", status);
            }
            return Ok(());
        }

        if let Some(id) = child.id() {
            info!("Profiler still running; sending SIGINT");
            if let Err(e) = kill(Pid::from_raw(id as i32), Signal::SIGINT) {
                debug!("Failed to interrupt profiler: {}", e);
            }
        }
        if tokio::time::timeout(STOP_GRACE, child.wait()).await.is_err() {
            warn!("Profiler did not exit after SIGINT; killing it");
            child.kill().await?;
        }
        Ok(())
    }
}

impl StackProfiler for ExternalProfiler {
    fn start(&mut self, pid: u32) -> Result<()> {
        let rate = self.rate_hz();
        info!("Starting {} at {} Hz on PID {}", self.command, rate, pid);

        // A leftover file from an earlier run must not pass for this one
        if self.raw_output.exists() {
            std::fs::remove_file(&self.raw_output)
                .with_context(|| format!("Failed to remove stale {}", self.raw_output.display()))?;
        }

        let child = Command::new(&self.command)
            .arg("record")
            .arg("--pid")
            .arg(pid.to_string())
            .arg("--rate")
            .arg(rate.to_string())
            .arg("--format")
            .arg("speedscope")
            .arg("--output")
            .arg(&self.raw_output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to launch profiler '{}'", self.command))?;

        self.child = Some(child);
        self.started_at = system_time_secs();
        self.started = Some(Instant::now());
        Ok(())
    }

    async fn stop(&mut self) -> Result<ProfileSession> {
        let elapsed = self
            .started
            .map(|s| s.elapsed().as_secs_f64())
            .unwrap_or_default();

        let Some(mut child) = self.child.take() else {
            return Ok(self.empty_session(elapsed));
        };
        Self::wait_for_exit(&mut child).await?;

        if !self.raw_output.exists() {
            warn!(
                "Profiler produced no output at {} (is '{}' installed and allowed to attach?)",
                self.raw_output.display(),
                self.command
            );
            return Ok(self.empty_session(elapsed));
        }

        let json = tokio::fs::read_to_string(&self.raw_output)
            .await
            .with_context(|| format!("Failed to read {}", self.raw_output.display()))?;
        let mut session = speedscope::parse(&json, &self.program, self.interval, self.started_at)?;
        session.duration_secs = session.duration_secs.max(elapsed);
        session.drop_launcher_frames();

        info!(
            "Profiler collected {} samples across {} thread(s)",
            session.sample_count(),
            session.threads.len()
        );
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_profiler_binary_fails_to_start() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut profiler = ExternalProfiler::new(
            "perfstack-no-such-profiler",
            Duration::from_millis(1),
            temp_dir.path().join("stacks.json"),
            "job.py",
        );
        assert!(profiler.start(std::process::id()).is_err());

        // Stopping a profiler that never started yields an empty session
        let session = profiler.stop().await.unwrap();
        assert!(session.is_empty());
        assert_eq!(session.program, "job.py");
    }

    #[tokio::test]
    async fn test_profiler_without_output_yields_empty_session() {
        let temp_dir = tempfile::tempdir().unwrap();
        // `true` ignores its arguments and exits without writing anything
        let mut profiler = ExternalProfiler::new(
            "true",
            Duration::from_millis(10),
            temp_dir.path().join("stacks.json"),
            "job.py",
        );
        profiler.start(std::process::id()).unwrap();
        let session = profiler.stop().await.unwrap();
        assert!(session.is_empty());
        assert_eq!(session.interval, Duration::from_millis(10));
    }

    #[test]
    fn test_rate() {
        let profiler = ExternalProfiler::new("py-spy", Duration::from_millis(1), "x.json", "p");
        assert_eq!(profiler.rate_hz(), 1000);
    }
}
