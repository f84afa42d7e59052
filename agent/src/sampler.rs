//! Fixed-interval resource sampler
//!
//! The sampler moves through `Idle → Running → Draining → Done`. While running
//! it reads a [`MetricSource`] once per interval and appends to one series for
//! CPU/RAM and one per GPU. Stop requests are checked once per iteration, after
//! the sleep, so a stop arriving mid-sleep is observed within one interval and
//! no sample is taken after it. Draining freezes the series; rendering writes
//! the CPU/RAM panel on its own scale and every GPU panel on a shared one.

use crate::config::{PanelSize, SamplerConfig};
use crate::output::panel::{render_panel, PanelSpec};
use crate::output::ArtifactPaths;
use crate::source::{MetricSource, SystemMetricSource};
use anyhow::{Context, Result};
use perfstack_shared::{shared_maxima, DeviceIndex, GpuReading, Sample, Series, SeriesError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SamplerState {
    Idle,
    Running,
    Draining,
    Done,
}

#[derive(Debug, Error)]
pub enum SamplerError {
    #[error("cannot {operation} while the sampler is {state:?}")]
    InvalidState {
        operation: &'static str,
        state: SamplerState,
    },

    #[error("sample rejected: {0}")]
    Series(#[from] SeriesError),
}

/// Which metric group a panel shows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "device", rename_all = "snake_case")]
pub enum PanelKind {
    Cpu,
    Gpu(DeviceIndex),
}

/// A panel written by the sampler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelArtifact {
    pub kind: PanelKind,
    pub path: PathBuf,
    pub samples: usize,
    pub max_a: f64,
    pub max_b: f64,
}

/// Summary the sampler process prints on stdout when it exits
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplerReport {
    /// Number of samples per series
    pub samples: usize,

    /// Seconds covered by the series
    pub duration_secs: f64,

    /// GPUs that were sampled
    pub devices: Vec<DeviceIndex>,

    /// Panels in composition order (CPU/RAM first, then GPUs by index)
    pub panels: Vec<PanelArtifact>,
}

impl SamplerReport {
    /// Path of the CPU/RAM panel, if one was written
    pub fn cpu_panel(&self) -> Option<&PanelArtifact> {
        self.panels.iter().find(|p| p.kind == PanelKind::Cpu)
    }

    /// GPU panels ordered by device index
    pub fn gpu_panels(&self) -> impl Iterator<Item = &PanelArtifact> {
        self.panels
            .iter()
            .filter(|p| matches!(p.kind, PanelKind::Gpu(_)))
    }
}

/// Resource sampler over a metric source
pub struct Sampler<S> {
    source: S,
    interval: Duration,
    state: SamplerState,
    started: Option<Instant>,
    cpu: Series,
    gpus: BTreeMap<DeviceIndex, Series>,
}

impl<S: MetricSource> Sampler<S> {
    pub fn new(source: S, interval: Duration) -> Self {
        Self {
            source,
            interval,
            state: SamplerState::Idle,
            started: None,
            cpu: Series::new(),
            gpus: BTreeMap::new(),
        }
    }

    pub fn state(&self) -> SamplerState {
        self.state
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// CPU/RAM series recorded so far
    pub fn cpu_series(&self) -> &Series {
        &self.cpu
    }

    /// Per-device series recorded so far, ordered by device index
    pub fn gpu_series(&self) -> &BTreeMap<DeviceIndex, Series> {
        &self.gpus
    }

    /// `Idle → Running`: one empty series per metric group
    pub fn start(&mut self) -> Result<(), SamplerError> {
        self.expect_state(SamplerState::Idle, "start")?;

        self.cpu = Series::new();
        self.gpus = self
            .source
            .devices()
            .iter()
            .map(|&device| (device, Series::new()))
            .collect();
        self.started = Some(Instant::now());
        self.state = SamplerState::Running;

        info!(
            "Sampling system activity every {:?} ({} GPU(s))",
            self.interval,
            self.gpus.len()
        );
        Ok(())
    }

    /// Take one reading and append it to every series
    pub fn sample(&mut self) -> Result<(), SamplerError> {
        self.expect_state(SamplerState::Running, "sample")?;

        let elapsed = self
            .started
            .map(|start| start.elapsed().as_secs_f64())
            .unwrap_or_default();
        let reading = self.source.read();

        self.cpu
            .push(Sample::new(elapsed, reading.cpu_pct, reading.mem_pct))?;
        for (&device, series) in self.gpus.iter_mut() {
            let gpu = reading
                .gpus
                .iter()
                .find(|g| g.device == device)
                .copied()
                .unwrap_or_else(|| GpuReading::idle(device));
            series.push(Sample::new(elapsed, gpu.utilization_pct, gpu.memory_pct))?;
        }
        Ok(())
    }

    /// Sample until `stop` is cancelled.
    ///
    /// The stop request is checked after each sleep; the sleep itself is never
    /// cut short.
    pub async fn run(&mut self, stop: &CancellationToken) -> Result<(), SamplerError> {
        while !stop.is_cancelled() {
            self.sample()?;
            tokio::time::sleep(self.interval).await;
        }
        debug!("Stop observed after {} samples", self.cpu.len());
        Ok(())
    }

    /// `Running → Draining`: the series are frozen from here on
    pub fn finish(&mut self) -> Result<(), SamplerError> {
        self.expect_state(SamplerState::Running, "finish")?;
        self.state = SamplerState::Draining;
        Ok(())
    }

    /// `Draining → Done`: write the CPU/RAM panel and the GPU panels.
    ///
    /// GPU panels share one utilization maximum and one memory maximum so
    /// devices can be compared at a glance.
    pub fn render(&mut self, paths: &ArtifactPaths, size: PanelSize) -> Result<SamplerReport> {
        self.expect_state(SamplerState::Draining, "render")?;

        let mut panels = Vec::with_capacity(1 + self.gpus.len());

        let cpu_path = paths.cpu_panel();
        let layout = render_panel(&self.cpu, &PanelSpec::new("% CPU", "% RAM", size), &cpu_path)
            .context("Failed to render CPU/RAM panel")?;
        panels.push(PanelArtifact {
            kind: PanelKind::Cpu,
            path: cpu_path,
            samples: self.cpu.len(),
            max_a: layout.max_a,
            max_b: layout.max_b,
        });

        if !self.gpus.is_empty() {
            let (max_util, max_mem) = shared_maxima(self.gpus.values());
            debug!(
                "Shared GPU scale: utilization {:.1}%, memory {:.1}%",
                max_util, max_mem
            );

            for (&device, series) in &self.gpus {
                let spec = PanelSpec::new(
                    format!("% GPU {}", device),
                    format!("% G-RAM {}", device),
                    size,
                )
                .with_maxima(max_util, max_mem);
                let path = paths.gpu_panel(device);
                let layout = render_panel(series, &spec, &path)
                    .with_context(|| format!("Failed to render panel for GPU {}", device))?;
                panels.push(PanelArtifact {
                    kind: PanelKind::Gpu(device),
                    path,
                    samples: series.len(),
                    max_a: layout.max_a,
                    max_b: layout.max_b,
                });
            }
        }

        self.state = SamplerState::Done;

        Ok(SamplerReport {
            samples: self.cpu.len(),
            duration_secs: self.cpu.span(),
            devices: self.gpus.keys().copied().collect(),
            panels,
        })
    }

    fn expect_state(&self, expected: SamplerState, operation: &'static str) -> Result<(), SamplerError> {
        if self.state != expected {
            return Err(SamplerError::InvalidState {
                operation,
                state: self.state,
            });
        }
        Ok(())
    }
}

/// Run a complete sampling session over `source` until `stop` is cancelled
pub async fn run_with_source<S: MetricSource>(
    source: S,
    config: &SamplerConfig,
    stop: &CancellationToken,
) -> Result<SamplerReport> {
    config.validate().context("Invalid sampler configuration")?;

    let mut sampler = Sampler::new(source, config.interval);
    sampler.start()?;
    sampler.run(stop).await?;
    sampler.finish()?;

    let report = sampler.render(&ArtifactPaths::new(&config.output_prefix), config.panel)?;
    info!(
        "Sampling complete: {} samples over {:.2}s, {} panel(s)",
        report.samples,
        report.duration_secs,
        report.panels.len()
    );
    Ok(report)
}

/// Sample this host until `stop` is cancelled
pub async fn run_sampler(config: &SamplerConfig, stop: &CancellationToken) -> Result<SamplerReport> {
    let source = SystemMetricSource::new(config.gpu_enabled);
    // The first CPU reading is a delta against the priming refresh
    tokio::time::sleep(source.ready_in()).await;
    run_with_source(source, config, stop).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use perfstack_shared::Reading;

    /// Replays scripted readings and requests a stop after `stop_after` reads
    struct ScriptedSource {
        devices: Vec<DeviceIndex>,
        readings: Vec<Reading>,
        reads: usize,
        stop_after: Option<(usize, CancellationToken)>,
    }

    impl ScriptedSource {
        fn new(devices: Vec<DeviceIndex>, readings: Vec<Reading>) -> Self {
            Self {
                devices,
                readings,
                reads: 0,
                stop_after: None,
            }
        }
    }

    impl MetricSource for ScriptedSource {
        fn devices(&self) -> &[DeviceIndex] {
            &self.devices
        }

        fn read(&mut self) -> Reading {
            let reading = self.readings[self.reads % self.readings.len()].clone();
            self.reads += 1;
            if let Some((n, token)) = &self.stop_after {
                if self.reads == *n {
                    token.cancel();
                }
            }
            reading
        }
    }

    fn cpu_reading(cpu: f64, mem: f64) -> Reading {
        Reading {
            cpu_pct: cpu,
            mem_pct: mem,
            gpus: Vec::new(),
        }
    }

    fn gpu_reading(util: [f64; 2]) -> Reading {
        Reading {
            cpu_pct: 10.0,
            mem_pct: 20.0,
            gpus: vec![
                GpuReading {
                    device: 0,
                    utilization_pct: util[0],
                    memory_pct: 30.0,
                },
                GpuReading {
                    device: 1,
                    utilization_pct: util[1],
                    memory_pct: 60.0,
                },
            ],
        }
    }

    #[test]
    fn test_state_transitions() {
        let source = ScriptedSource::new(vec![], vec![cpu_reading(1.0, 2.0)]);
        let mut sampler = Sampler::new(source, Duration::from_millis(10));
        assert_eq!(sampler.state(), SamplerState::Idle);

        assert!(sampler.sample().is_err());
        assert!(sampler.finish().is_err());

        sampler.start().unwrap();
        assert_eq!(sampler.state(), SamplerState::Running);
        assert!(sampler.start().is_err());

        sampler.finish().unwrap();
        assert_eq!(sampler.state(), SamplerState::Draining);
        assert!(matches!(
            sampler.sample(),
            Err(SamplerError::InvalidState {
                operation: "sample",
                state: SamplerState::Draining
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_checked_once_per_iteration() {
        let token = CancellationToken::new();
        let mut source = ScriptedSource::new(vec![], vec![cpu_reading(5.0, 50.0)]);
        source.stop_after = Some((3, token.clone()));

        let mut sampler = Sampler::new(source, Duration::from_millis(500));
        sampler.start().unwrap();
        sampler.run(&token).await.unwrap();

        // The third read requested the stop; that sample is kept, none follow.
        let timestamps: Vec<f64> = sampler.cpu_series().samples().iter().map(|s| s.timestamp).collect();
        assert_eq!(timestamps, vec![0.0, 0.5, 1.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_length_bounded_by_duration() {
        let token = CancellationToken::new();
        let source = ScriptedSource::new(vec![], vec![cpu_reading(5.0, 50.0)]);
        let mut sampler = Sampler::new(source, Duration::from_millis(500));
        sampler.start().unwrap();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            canceller.cancel();
        });
        sampler.run(&token).await.unwrap();

        let series = sampler.cpu_series();
        // ceil(2.0 / 0.5) + 1
        assert!(series.len() >= 4 && series.len() <= 5, "len = {}", series.len());
        for pair in series.samples().windows(2) {
            assert!(pair[1].timestamp > pair[0].timestamp);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_stopped_takes_no_samples() {
        let token = CancellationToken::new();
        token.cancel();
        let source = ScriptedSource::new(vec![], vec![cpu_reading(5.0, 50.0)]);
        let mut sampler = Sampler::new(source, Duration::from_millis(500));
        sampler.start().unwrap();
        sampler.run(&token).await.unwrap();
        assert!(sampler.cpu_series().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_gpu_panels_share_scale() {
        let temp_dir = tempfile::tempdir().unwrap();
        let token = CancellationToken::new();
        let mut source = ScriptedSource::new(
            vec![0, 1],
            vec![gpu_reading([10.0, 5.0]), gpu_reading([80.0, 40.0]), gpu_reading([20.0, 10.0])],
        );
        source.stop_after = Some((3, token.clone()));

        let config = SamplerConfig {
            output_prefix: temp_dir.path().join("run"),
            interval: Duration::from_millis(100),
            gpu_enabled: true,
            panel: PanelSize::default(),
        };
        let report = run_with_source(source, &config, &token).await.unwrap();

        assert_eq!(report.samples, 3);
        assert_eq!(report.devices, vec![0, 1]);
        let kinds: Vec<PanelKind> = report.panels.iter().map(|p| p.kind).collect();
        assert_eq!(kinds, vec![PanelKind::Cpu, PanelKind::Gpu(0), PanelKind::Gpu(1)]);

        for panel in report.gpu_panels() {
            assert_eq!(panel.max_a, 80.0);
            assert_eq!(panel.max_b, 60.0);
            assert!(panel.path.exists());
        }
        // CPU/RAM keeps its own scale
        let cpu = report.cpu_panel().unwrap();
        assert_eq!((cpu.max_a, cpu.max_b), (10.0, 20.0));
        assert!(temp_dir.path().join("run_cpu.svg").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_gpu_channel_omitted_from_every_panel() {
        let temp_dir = tempfile::tempdir().unwrap();
        let token = CancellationToken::new();
        // Memory in use on both devices, no compute on either
        let mut source = ScriptedSource::new(vec![0, 1], vec![gpu_reading([0.0, 0.0])]);
        source.stop_after = Some((3, token.clone()));

        let config = SamplerConfig {
            output_prefix: temp_dir.path().join("run"),
            interval: Duration::from_millis(100),
            gpu_enabled: true,
            panel: PanelSize::default(),
        };
        let report = run_with_source(source, &config, &token).await.unwrap();

        assert_eq!(report.gpu_panels().count(), 2);
        for panel in report.gpu_panels() {
            assert_eq!(panel.max_a, 0.0);
            assert_eq!(panel.max_b, 60.0);

            let svg = std::fs::read_to_string(&panel.path).unwrap();
            assert!(!svg.contains("<title>% GPU"), "utilization band drawn in {}", panel.path.display());
            assert!(svg.contains("<title>% G-RAM"));
            assert!(svg.contains("(max 0.0)"));
        }
    }

    #[test]
    fn test_report_json_shape() {
        let report = SamplerReport {
            samples: 2,
            duration_secs: 1.0,
            devices: vec![0],
            panels: vec![PanelArtifact {
                kind: PanelKind::Gpu(0),
                path: PathBuf::from("x_gpu_0.svg"),
                samples: 2,
                max_a: 1.0,
                max_b: 2.0,
            }],
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["panels"][0]["kind"]["kind"], "gpu");
        assert_eq!(json["panels"][0]["kind"]["device"], 0);

        let back: SamplerReport = serde_json::from_value(json).unwrap();
        assert_eq!(back, report);
    }
}
