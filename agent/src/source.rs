//! Host metric source
//!
//! One call to [`MetricSource::read`] yields a point-in-time [`Reading`] of host
//! CPU, system memory and per-GPU utilization. GPU enumeration happens once,
//! when the source is built; reads never fail.

use perfstack_gpu::{DeviceSet, GpuTelemetry};
use perfstack_shared::{percent_of, DeviceIndex, GpuReading, Reading};
use std::collections::HashSet;
use std::time::{Duration, Instant};
use sysinfo::{System, MINIMUM_CPU_UPDATE_INTERVAL};
use tracing::{info, warn};

/// Point-in-time telemetry queries
pub trait MetricSource {
    /// GPUs covered by every reading, fixed for the lifetime of the source
    fn devices(&self) -> &[DeviceIndex];

    /// Take one reading
    fn read(&mut self) -> Reading;
}

/// Metric source backed by `sysinfo` and, when present, GPU telemetry
pub struct SystemMetricSource<G = DeviceSet> {
    system: System,
    gpus: Option<G>,
    /// Devices whose reads have failed at least once (warned about once)
    failed: HashSet<DeviceIndex>,
    /// When CPU usage was first refreshed
    primed_at: Instant,
}

impl SystemMetricSource<DeviceSet> {
    /// Create a source for this host, enumerating GPUs if `gpu_enabled`
    pub fn new(gpu_enabled: bool) -> Self {
        let gpus = if gpu_enabled {
            DeviceSet::detect()
        } else {
            info!("GPU sampling disabled");
            None
        };
        Self::with_gpus(gpus)
    }
}

impl<G: GpuTelemetry> SystemMetricSource<G> {
    /// Create a source with an explicit GPU backend
    pub fn with_gpus(gpus: Option<G>) -> Self {
        let mut system = System::new();
        // CPU usage is a delta between two refreshes; prime the first one.
        system.refresh_cpu_usage();
        system.refresh_memory();

        Self {
            system,
            gpus,
            failed: HashSet::new(),
            primed_at: Instant::now(),
        }
    }

    /// Time left before the first CPU reading is meaningful; sysinfo needs
    /// refreshes at least [`MINIMUM_CPU_UPDATE_INTERVAL`] apart.
    pub fn ready_in(&self) -> Duration {
        MINIMUM_CPU_UPDATE_INTERVAL.saturating_sub(self.primed_at.elapsed())
    }
}

impl<G: GpuTelemetry> MetricSource for SystemMetricSource<G> {
    fn devices(&self) -> &[DeviceIndex] {
        self.gpus.as_ref().map(|g| g.devices()).unwrap_or(&[])
    }

    fn read(&mut self) -> Reading {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();

        let mut gpus = Vec::new();
        if let Some(telemetry) = &self.gpus {
            for &device in telemetry.devices() {
                let reading = match telemetry.read(device) {
                    Ok(reading) => reading,
                    Err(e) => {
                        if self.failed.insert(device) {
                            warn!("{}; recording 0% for this device", e);
                        }
                        GpuReading::idle(device)
                    }
                };
                gpus.push(reading);
            }
        }

        Reading {
            cpu_pct: self.system.global_cpu_usage() as f64,
            mem_pct: percent_of(self.system.used_memory(), self.system.total_memory()),
            gpus,
        }
    }
}
