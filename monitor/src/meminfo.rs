//! Memory statistics from `/proc/meminfo`.
//!
//! This module reads the kernel's memory counters and turns them into a
//! utilization percentage.

use notifymem_core::{MemorySample, MonitorError};
use std::fs;
use std::path::{Path, PathBuf};

/// Source of memory samples.
///
/// Readers hold no state between calls: every [`MemoryReader::read`] goes
/// back to the underlying source.
pub trait MemoryReader: Send + Sync {
    /// Capture the current total and available memory.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::Io`] if the memory-information source is unreadable.
    fn read(&self) -> Result<MemorySample, MonitorError>;

    /// Check if the source can be read on this system.
    ///
    /// # Errors
    ///
    /// Returns the error a regular read would produce.
    fn check_availability(&self) -> Result<(), MonitorError> {
        self.read().map(|_| ())
    }
}

/// Reader backed by the Linux `/proc/meminfo` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcMeminfo {
    path: PathBuf,
}

impl ProcMeminfo {
    /// Path to the proc meminfo file.
    pub const PROC_MEMINFO_PATH: &'static str = "/proc/meminfo";

    /// Create a reader for a meminfo file path (useful for testing).
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The file this reader parses.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for ProcMeminfo {
    fn default() -> Self {
        Self::with_path(Self::PROC_MEMINFO_PATH)
    }
}

impl MemoryReader for ProcMeminfo {
    fn read(&self) -> Result<MemorySample, MonitorError> {
        let bytes = fs::read(&self.path).map_err(|e| MonitorError::io(self.path.clone(), e))?;
        // Invalid UTF-8 only spoils the line it appears on.
        Ok(parse_meminfo_content(&String::from_utf8_lossy(&bytes)))
    }
}

/// Parse memory information from meminfo content.
///
/// Lines look like `MemTotal:       16384000 kB`. Unknown keys are ignored
/// and lines without a numeric value are skipped. A missing `MemTotal` or
/// `MemAvailable` leaves the corresponding field at 0.
pub fn parse_meminfo_content(content: &str) -> MemorySample {
    let mut sample = MemorySample::default();

    for line in content.lines() {
        let mut parts = line.split_whitespace();
        let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
            continue;
        };

        let Ok(value) = value.parse::<u64>() else {
            continue;
        };

        match key {
            "MemTotal:" => sample.total = value,
            "MemAvailable:" => sample.available = value,
            _ => {} // Ignore other fields
        }
    }

    sample
}

/// Calculate the percentage of memory in use, floored to an integer.
///
/// # Errors
///
/// Returns [`MonitorError::InvalidData`] if the sample reports zero total memory.
///
/// # Examples
///
/// ```rust
/// use notifymem::meminfo::compute_utilization;
/// use notifymem_core::MemorySample;
///
/// assert_eq!(compute_utilization(&MemorySample::new(100, 50)).unwrap(), 50);
/// assert!(compute_utilization(&MemorySample::new(0, 10)).is_err());
/// ```
pub fn compute_utilization(sample: &MemorySample) -> Result<u8, MonitorError> {
    if sample.total == 0 {
        return Err(MonitorError::invalid_data("total memory is 0"));
    }

    // Widen so `used * 100` cannot overflow for any u64 total.
    let percent = u128::from(sample.used()) * 100 / u128::from(sample.total);
    // used <= total, so percent <= 100
    Ok(percent as u8)
}
