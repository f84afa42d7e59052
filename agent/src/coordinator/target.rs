//! The profiled program, run as a subordinate process

use nix::sys::signal::Signal;
use std::ffi::OsString;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use thiserror::Error;
use tokio::process::{Child, Command};
use tracing::{debug, info};

/// How the target ended when it ended on its own terms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetExit {
    /// Exited with status 0
    Completed,
    /// Requested a non-zero exit status
    ExitCode(i32),
    /// Stopped by an interrupt (Ctrl-C, SIGINT or SIGTERM)
    Interrupted,
}

impl TargetExit {
    /// Shell-style exit status for this outcome
    pub fn code(&self) -> i32 {
        match self {
            TargetExit::Completed => 0,
            TargetExit::ExitCode(code) => *code,
            TargetExit::Interrupted => 128 + Signal::SIGINT as i32,
        }
    }
}

#[derive(Debug, Error)]
pub enum TargetFault {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} was killed by {signal}")]
    Signaled { program: String, signal: String },

    #[error("{program} raised an uncaught exception: {exception}")]
    Uncaught { program: String, exception: String },

    #[error("lost track of {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Runs the script named by its second argument as `__main__`. An uncaught
/// exception is printed, summarized into the file named by the first argument
/// and turned into exit status 1. `SystemExit` and `KeyboardInterrupt` pass
/// through untouched.
const PYTHON_LAUNCHER: &str = r#"
import os, runpy, sys, traceback
report, script = sys.argv[1], sys.argv[2]
sys.argv = sys.argv[2:]
sys.path[0] = os.path.dirname(os.path.abspath(script))
try:
    runpy.run_path(script, run_name="__main__")
except (SystemExit, KeyboardInterrupt):
    raise
except BaseException as e:
    traceback.print_exc()
    with open(report, "w") as f:
        f.write("%s: %s" % (type(e).__name__, e))
    sys.exit(1)
"#;

/// Command line that launches the target
#[derive(Debug, Clone, PartialEq)]
pub struct TargetCommand {
    program: PathBuf,
    args: Vec<OsString>,
    display: String,
    /// Where the Python launcher records an uncaught exception
    exception_report: Option<PathBuf>,
}

impl TargetCommand {
    /// `.py` scripts run under `interpreter` through a launcher that reports
    /// uncaught exceptions to `exception_report`; anything else is executed
    /// directly.
    pub fn new(script: &Path, args: &[String], interpreter: &str, exception_report: &Path) -> Self {
        let display = script.display().to_string();
        let is_python = script.extension().is_some_and(|ext| ext == "py");

        let (program, mut argv, exception_report) = if is_python {
            let argv = vec![
                OsString::from("-c"),
                OsString::from(PYTHON_LAUNCHER),
                exception_report.as_os_str().to_os_string(),
                script.as_os_str().to_os_string(),
            ];
            (PathBuf::from(interpreter), argv, Some(exception_report.to_path_buf()))
        } else {
            (executable_path(script), Vec::new(), None)
        };
        argv.extend(args.iter().map(OsString::from));

        Self {
            program,
            args: argv,
            display,
            exception_report,
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    pub fn spawn(&self) -> Result<RunningTarget, TargetFault> {
        debug!("Launching {}", self.display);

        // A report left by an earlier run must not pass for this one
        if let Some(report) = &self.exception_report {
            match std::fs::remove_file(report) {
                Ok(()) => debug!("Removed stale {}", report.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(TargetFault::Spawn {
                        program: self.display.clone(),
                        source,
                    })
                }
            }
        }

        let child = Command::new(&self.program)
            .args(&self.args)
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TargetFault::Spawn {
                program: self.display.clone(),
                source,
            })?;

        Ok(RunningTarget {
            child,
            display: self.display.clone(),
            exception_report: self.exception_report.clone(),
        })
    }
}

/// A bare file name would be looked up on `PATH`; run local files from `./`
fn executable_path(script: &Path) -> PathBuf {
    let bare = script
        .parent()
        .map_or(true, |parent| parent.as_os_str().is_empty());
    if bare && script.is_file() {
        Path::new(".").join(script)
    } else {
        script.to_path_buf()
    }
}

#[derive(Debug)]
pub struct RunningTarget {
    child: Child,
    display: String,
    exception_report: Option<PathBuf>,
}

impl RunningTarget {
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait for the target to exit.
    ///
    /// A Ctrl-C while waiting reaches the target through the terminal's process
    /// group; the target is still waited for and the run counts as interrupted.
    ///
    /// Waiting installs tokio's SIGINT handler, which stays in place for the
    /// rest of the process: a later Ctrl-C no longer terminates this process.
    /// Callers that keep working after the target exits must watch for
    /// interrupts themselves.
    pub async fn wait(mut self) -> Result<TargetExit, TargetFault> {
        let interrupt = async {
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        };

        tokio::select! {
            status = self.child.wait() => {
                let status = status.map_err(|source| self.lost(source))?;
                let exit = classify(&self.display, status)?;
                match self.uncaught_exception().await {
                    Some(exception) => Err(TargetFault::Uncaught {
                        program: self.display.clone(),
                        exception,
                    }),
                    None => Ok(exit),
                }
            }
            _ = interrupt => {
                info!("Interrupted; waiting for {} to exit", self.display);
                let status = self.child.wait().await.map_err(|source| self.lost(source))?;
                debug!("{} exited with {} after interrupt", self.display, status);
                Ok(TargetExit::Interrupted)
            }
        }
    }

    /// Summary the Python launcher left behind, consuming the report file
    async fn uncaught_exception(&self) -> Option<String> {
        let report = self.exception_report.as_ref()?;
        let summary = tokio::fs::read_to_string(report).await.ok()?;
        if let Err(e) = tokio::fs::remove_file(report).await {
            debug!("Failed to remove {}: {}", report.display(), e);
        }
        Some(summary.trim().to_string())
    }

    fn lost(&self, source: std::io::Error) -> TargetFault {
        TargetFault::Wait {
            program: self.display.clone(),
            source,
        }
    }
}

/// Map an exit status to an outcome; fatal signals are faults
pub fn classify(program: &str, status: ExitStatus) -> Result<TargetExit, TargetFault> {
    if let Some(code) = status.code() {
        return Ok(if code == 0 {
            TargetExit::Completed
        } else {
            TargetExit::ExitCode(code)
        });
    }

    match status.signal().map(Signal::try_from) {
        Some(Ok(Signal::SIGINT | Signal::SIGTERM)) => Ok(TargetExit::Interrupted),
        Some(Ok(signal)) => Err(TargetFault::Signaled {
            program: program.to_string(),
            signal: signal.to_string(),
        }),
        Some(Err(_)) | None => Err(TargetFault::Signaled {
            program: program.to_string(),
            signal: format!("signal {}", status.signal().unwrap_or_default()),
        }),
    }
}
