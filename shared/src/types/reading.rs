//! Point-in-time telemetry readings
//!
//! A [`Reading`] is what one tick of the sampler observes on the host: a CPU
//! percentage, a system memory percentage, and one [`GpuReading`] per device
//! that was enumerated when sampling began.

use serde::{Deserialize, Serialize};

/// Stable identity of a GPU, assigned once at enumeration time
pub type DeviceIndex = u32;

/// Utilization of a single GPU at one instant
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpuReading {
    /// Device the reading belongs to
    pub device: DeviceIndex,

    /// Compute utilization in percent
    pub utilization_pct: f64,

    /// Device memory in use, in percent of total device memory
    pub memory_pct: f64,
}

impl GpuReading {
    /// A reading that reports an idle device; used when a device read fails mid-run
    pub fn idle(device: DeviceIndex) -> Self {
        Self {
            device,
            utilization_pct: 0.0,
            memory_pct: 0.0,
        }
    }
}

/// One observation of host resource utilization
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Host-wide CPU utilization in percent
    pub cpu_pct: f64,

    /// System memory in use, in percent
    pub mem_pct: f64,

    /// Per-device readings, ordered by device index
    pub gpus: Vec<GpuReading>,
}

/// Convert a used/total pair into a percentage.
///
/// A zero total yields 0 rather than NaN.
pub fn percent_of(used: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    100.0 * used as f64 / total as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_of() {
        assert_eq!(percent_of(50, 200), 25.0);
        assert_eq!(percent_of(0, 200), 0.0);
        assert_eq!(percent_of(10, 0), 0.0);
    }

    #[test]
    fn test_idle_reading() {
        let reading = GpuReading::idle(3);
        assert_eq!(reading.device, 3);
        assert_eq!(reading.utilization_pct, 0.0);
        assert_eq!(reading.memory_pct, 0.0);
    }
}
