//! Device capacity probes.
//!
//! The manager never measures hardware itself; callers refresh it from a
//! [`CapacityProbe`] whenever they see fit.

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

use super::breakdown::DeviceCapacity;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Source of raw device capacity figures.
#[cfg_attr(test, mockall::automock)]
pub trait CapacityProbe: Send + Sync {
    fn probe(&self) -> Result<DeviceCapacity>;
}

/// Reads total host RAM from `/proc/meminfo`. GPU figures are not
/// discoverable this way, so VRAM and external usage come from the caller.
pub struct HostMemoryProbe {
    meminfo: PathBuf,
    total_vram_gb: f64,
    external_apps_vram_gb: f64,
}

impl HostMemoryProbe {
    pub fn new(total_vram_gb: f64, external_apps_vram_gb: f64) -> Self {
        Self {
            meminfo: PathBuf::from("/proc/meminfo"),
            total_vram_gb,
            external_apps_vram_gb,
        }
    }

    #[cfg(test)]
    fn with_meminfo(path: PathBuf) -> Self {
        Self {
            meminfo: path,
            total_vram_gb: 0.0,
            external_apps_vram_gb: 0.0,
        }
    }
}

impl CapacityProbe for HostMemoryProbe {
    fn probe(&self) -> Result<DeviceCapacity> {
        let content = fs::read_to_string(&self.meminfo)
            .with_context(|| format!("Failed to read {}", self.meminfo.display()))?;
        let total_kb = parse_meminfo_kb(&content, "MemTotal:")
            .context("MemTotal not found in meminfo")?;

        Ok(DeviceCapacity {
            total_vram_gb: self.total_vram_gb,
            total_ram_gb: total_kb as f64 * 1024.0 / BYTES_PER_GB,
            external_apps_vram_gb: self.external_apps_vram_gb,
        })
    }
}

fn parse_meminfo_kb(content: &str, key: &str) -> Option<u64> {
    content
        .lines()
        .find(|line| line.starts_with(key))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mem_total() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("meminfo");
        fs::write(
            &path,
            "MemTotal:       16777216 kB\nMemFree:         1024 kB\nMemAvailable:   8388608 kB\n",
        )
        .unwrap();

        let capacity = HostMemoryProbe::with_meminfo(path).probe().unwrap();
        assert_eq!(capacity.total_ram_gb, 16.0);
        assert_eq!(capacity.total_vram_gb, 0.0);
    }

    #[test]
    fn huge_mem_total_does_not_overflow() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("meminfo");
        fs::write(&path, format!("MemTotal: {} kB\n", u64::MAX)).unwrap();

        let capacity = HostMemoryProbe::with_meminfo(path).probe().unwrap();
        assert!(capacity.total_ram_gb.is_finite());
        assert!(capacity.total_ram_gb > 0.0);
    }

    #[test]
    fn missing_mem_total_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("meminfo");
        fs::write(&path, "MemFree: 1024 kB\n").unwrap();

        assert!(HostMemoryProbe::with_meminfo(path).probe().is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        let probe = HostMemoryProbe::with_meminfo(PathBuf::from("/nonexistent/meminfo"));
        assert!(probe.probe().is_err());
    }
}
