//! Machine capability probing.
//!
//! Worker nodes declare a clock capacity (MHz) and a memory capacity (MB).
//! Explicit settings always win; otherwise a [`CapabilityProbe`] measures
//! the host.

use std::path::PathBuf;

use crate::config::Settings;
use crate::protocol::error::{ReqdistError, Result};

pub trait CapabilityProbe: Send + Sync {
    /// Clock frequency in MHz.
    fn clock_frequency(&self) -> Result<i64>;

    /// Total memory in MB.
    fn memory_amount(&self) -> Result<i64>;
}

/// Declared capacity of a worker node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capacity {
    pub clock: i64,
    pub memory: i64,
}

/// Resolves the node capacity: settings first, the probe for whatever is
/// left unset. The probe is not consulted when both values are configured.
pub fn resolve_capacity(settings: &Settings, probe: &dyn CapabilityProbe) -> Result<Capacity> {
    let clock = match settings.clock_amount {
        Some(clock) => clock,
        None => probe.clock_frequency()?,
    };
    let memory = match settings.memory_amount {
        Some(memory) => memory,
        None => probe.memory_amount()?,
    };
    Ok(Capacity { clock, memory })
}

/// Reads `/proc/cpuinfo` and `/proc/meminfo`.
#[derive(Debug, Clone)]
pub struct ProcProbe {
    cpuinfo: PathBuf,
    meminfo: PathBuf,
}

impl ProcProbe {
    pub fn new() -> Self {
        Self::with_paths("/proc/cpuinfo", "/proc/meminfo")
    }

    pub fn with_paths(cpuinfo: impl Into<PathBuf>, meminfo: impl Into<PathBuf>) -> Self {
        Self {
            cpuinfo: cpuinfo.into(),
            meminfo: meminfo.into(),
        }
    }

    fn read(path: &PathBuf) -> Result<String> {
        std::fs::read_to_string(path).map_err(|e| {
            ReqdistError::InvalidConfig(format!(
                "cannot read {} ({}); set the capacity explicitly",
                path.display(),
                e
            ))
        })
    }
}

impl Default for ProcProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl CapabilityProbe for ProcProbe {
    fn clock_frequency(&self) -> Result<i64> {
        parse_cpuinfo(&Self::read(&self.cpuinfo)?)
    }

    fn memory_amount(&self) -> Result<i64> {
        parse_meminfo(&Self::read(&self.meminfo)?)
    }
}

/// Fixed values, for in-process nodes and tests.
#[derive(Debug, Clone, Copy)]
pub struct StaticProbe(pub Capacity);

impl CapabilityProbe for StaticProbe {
    fn clock_frequency(&self) -> Result<i64> {
        Ok(self.0.clock)
    }

    fn memory_amount(&self) -> Result<i64> {
        Ok(self.0.memory)
    }
}

/// Value of the first `key: value` line whose key contains `key_part`
/// (case insensitive).
fn find_property(text: &str, key_part: &str) -> Option<String> {
    text.lines().find_map(|line| {
        let line = line.to_lowercase();
        let (key, value) = line.split_once(':')?;
        key.contains(key_part).then(|| value.trim().to_string())
    })
}

/// Clock frequency from the first `cpu MHz` entry of `/proc/cpuinfo`.
pub fn parse_cpuinfo(text: &str) -> Result<i64> {
    let value = find_property(text, "mhz")
        .ok_or_else(|| ReqdistError::InvalidConfig("cpu MHz not found in cpuinfo".into()))?;
    value
        .parse::<f64>()
        .map(|mhz| mhz as i64)
        .map_err(|e| ReqdistError::InvalidConfig(format!("bad cpu MHz '{}': {}", value, e)))
}

/// Total memory in MB from the `MemTotal` entry of `/proc/meminfo`.
pub fn parse_meminfo(text: &str) -> Result<i64> {
    let value = find_property(text, "memtotal")
        .ok_or_else(|| ReqdistError::InvalidConfig("MemTotal not found in meminfo".into()))?;
    let bad_value = || ReqdistError::InvalidConfig(format!("unknown MemTotal value '{}'", value));

    let split = value.len().checked_sub(2).ok_or_else(bad_value)?;
    let (number, unit) = value.split_at(split);
    let amount: i64 = number.trim().parse().map_err(|_| bad_value())?;
    match unit {
        "kb" => Ok(amount / 1024),
        "mb" => Ok(amount),
        "gb" => Ok(amount * 1024),
        _ => Err(bad_value()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CPUINFO: &str = "processor\t: 0\nvendor_id\t: GenuineIntel\nmodel name\t: Intel(R) Xeon(R)\ncpu MHz\t\t: 2394.454\ncache size\t: 16384 KB\n\nprocessor\t: 1\ncpu MHz\t\t: 1200.000\n";
    const MEMINFO: &str = "MemTotal:       16314480 kB\nMemFree:         1022704 kB\n";

    struct FailingProbe;

    impl CapabilityProbe for FailingProbe {
        fn clock_frequency(&self) -> Result<i64> {
            Err(ReqdistError::InvalidConfig("no clock".into()))
        }

        fn memory_amount(&self) -> Result<i64> {
            Err(ReqdistError::InvalidConfig("no memory".into()))
        }
    }

    #[test]
    fn test_parse_cpuinfo_first_entry() {
        assert_eq!(parse_cpuinfo(CPUINFO).unwrap(), 2394);
    }

    #[test]
    fn test_parse_cpuinfo_missing() {
        assert!(parse_cpuinfo("processor : 0\n").is_err());
    }

    #[test]
    fn test_parse_meminfo_units() {
        assert_eq!(parse_meminfo(MEMINFO).unwrap(), 15932);
        assert_eq!(parse_meminfo("MemTotal: 2048 mB").unwrap(), 2048);
        assert_eq!(parse_meminfo("MemTotal: 3 GB").unwrap(), 3072);
    }

    #[test]
    fn test_parse_meminfo_unknown_unit() {
        assert!(parse_meminfo("MemTotal: 3 TB").is_err());
        assert!(parse_meminfo("MemTotal: k").is_err());
        assert!(parse_meminfo("MemFree: 12 kB").is_err());
    }

    #[test]
    fn test_settings_override_probe() {
        let settings = Settings {
            clock_amount: Some(100),
            memory_amount: Some(200),
            ..Settings::default()
        };
        let capacity = resolve_capacity(&settings, &FailingProbe).unwrap();
        assert_eq!(capacity, Capacity { clock: 100, memory: 200 });
    }

    #[test]
    fn test_probe_fills_missing_values() {
        let settings = Settings {
            clock_amount: Some(100),
            ..Settings::default()
        };
        let probe = StaticProbe(Capacity { clock: 3000, memory: 4096 });
        let capacity = resolve_capacity(&settings, &probe).unwrap();
        assert_eq!(capacity, Capacity { clock: 100, memory: 4096 });
    }

    #[test]
    fn test_proc_probe_missing_files() {
        let probe = ProcProbe::with_paths("/nonexistent/cpuinfo", "/nonexistent/meminfo");
        assert!(matches!(probe.clock_frequency(), Err(ReqdistError::InvalidConfig(_))));
        assert!(resolve_capacity(&Settings::default(), &probe).is_err());
    }
}
