//! Configuration types for a profiling run and for the sampler process

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Output prefix used when none is given
pub const DEFAULT_OUTPUT: &str = "perf_output";

/// Profiler sampling interval (1000 samples/second)
pub const DEFAULT_PROF_INTERVAL: Duration = Duration::from_millis(1);

/// System activity sampling interval (1 sample/second)
pub const DEFAULT_SYS_INTERVAL: Duration = Duration::from_secs(1);

/// Highest call-stack sampling rate accepted
pub const MAX_PROFILER_RATE_HZ: u64 = 10_000;

/// Name of the sampler binary shipped next to the CLI
pub const SAMPLER_BIN_NAME: &str = "perfstack-agent";

/// Dimensions of one timeline panel, in SVG user units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PanelSize {
    pub width: f64,
    pub height: f64,
}

impl Default for PanelSize {
    fn default() -> Self {
        Self {
            width: 1200.0,
            height: 200.0,
        }
    }
}

impl PanelSize {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.width > 0.0 && self.height > 0.0) {
            anyhow::bail!("Panel size must be positive (got {}x{})", self.width, self.height);
        }
        Ok(())
    }
}

/// Settings passed to the sampler process
#[derive(Debug, Clone, PartialEq)]
pub struct SamplerConfig {
    /// Output prefix; panels are written to `<prefix>_cpu.svg` and `<prefix>_gpu_<i>.svg`
    pub output_prefix: PathBuf,

    /// Time between two samples
    pub interval: Duration,

    /// Sample GPUs when telemetry is available
    pub gpu_enabled: bool,

    /// Panel dimensions
    pub panel: PanelSize,
}

impl SamplerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.interval.is_zero() {
            anyhow::bail!("System sampling interval must be greater than 0");
        }
        if self.output_prefix.as_os_str().is_empty() {
            anyhow::bail!("Output prefix must not be empty");
        }
        self.panel.validate()
    }

    /// Command-line arguments understood by the `perfstack-agent` binary
    pub fn to_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--output".into(),
            self.output_prefix.clone().into_os_string(),
            "--interval".into(),
            self.interval.as_secs_f64().to_string().into(),
            "--width".into(),
            self.panel.width.to_string().into(),
            "--height".into(),
            self.panel.height.to_string().into(),
        ];
        if !self.gpu_enabled {
            args.push("--no-gpu".into());
        }
        args
    }
}

/// Configuration of one profiling run
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Program or script to profile
    pub script: PathBuf,

    /// Arguments passed to the target
    pub args: Vec<String>,

    /// Output file name without extension
    pub output_prefix: PathBuf,

    /// Call-stack sampling interval
    pub prof_interval: Duration,

    /// System activity sampling interval
    pub sys_interval: Duration,

    /// Sample GPUs when telemetry is available
    pub gpu_enabled: bool,

    /// Keep the per-panel SVGs after composition
    pub keep_intermediate: bool,

    /// Panel dimensions
    pub panel: PanelSize,

    /// Sampling profiler executable (py-spy compatible)
    pub profiler_command: String,

    /// Interpreter used for `.py` targets
    pub interpreter: String,

    /// Path of the sampler binary
    pub sampler_bin: PathBuf,
}

impl RunConfig {
    /// Configuration with defaults, honouring `PERFSTACK_PROFILER`,
    /// `PERFSTACK_PYTHON` and `PERFSTACK_AGENT`.
    pub fn new(script: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            script: script.into(),
            args,
            output_prefix: PathBuf::from(DEFAULT_OUTPUT),
            prof_interval: DEFAULT_PROF_INTERVAL,
            sys_interval: DEFAULT_SYS_INTERVAL,
            gpu_enabled: true,
            keep_intermediate: false,
            panel: PanelSize::default(),
            profiler_command: std::env::var("PERFSTACK_PROFILER")
                .unwrap_or_else(|_| "py-spy".to_string()),
            interpreter: std::env::var("PERFSTACK_PYTHON")
                .unwrap_or_else(|_| "python3".to_string()),
            sampler_bin: default_sampler_bin(),
        }
    }

    /// Call-stack sampling rate in Hz
    pub fn profiler_rate_hz(&self) -> u64 {
        if self.prof_interval.is_zero() {
            return 0;
        }
        (1.0 / self.prof_interval.as_secs_f64()).round() as u64
    }

    /// Sampler settings derived from this run
    pub fn sampler_config(&self) -> SamplerConfig {
        SamplerConfig {
            output_prefix: self.output_prefix.clone(),
            interval: self.sys_interval,
            gpu_enabled: self.gpu_enabled,
            panel: self.panel,
        }
    }

    /// Name shown in flame chart titles and reports
    pub fn title(&self) -> String {
        self.script.display().to_string()
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.script.as_os_str().is_empty() {
            anyhow::bail!("No script to profile");
        }

        let rate = self.profiler_rate_hz();
        if rate == 0 {
            anyhow::bail!("Profiler sampling interval too long (rate rounds to 0 Hz)");
        }
        if rate > MAX_PROFILER_RATE_HZ {
            anyhow::bail!("Profiler sampling rate too high (max {} Hz)", MAX_PROFILER_RATE_HZ);
        }

        self.sampler_config().validate()
    }
}

/// Locate the sampler binary: `PERFSTACK_AGENT`, else next to the running executable
pub fn default_sampler_bin() -> PathBuf {
    if let Ok(path) = std::env::var("PERFSTACK_AGENT") {
        return PathBuf::from(path);
    }
    let file_name = format!("{}{}", SAMPLER_BIN_NAME, std::env::consts::EXE_SUFFIX);
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(&file_name)))
        .unwrap_or_else(|| Path::new(&file_name).to_path_buf())
}
