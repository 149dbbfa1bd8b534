use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// A raw memory reading produced by a [`crate::MemorySampler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryReading {
    pub total_bytes: u64,
    pub used_bytes: u64,
}

impl MemoryReading {
    pub fn new(total_bytes: u64, used_bytes: u64) -> Self {
        Self {
            total_bytes,
            used_bytes,
        }
    }

    /// Build a reading that is `percent` full of `total_bytes`.
    pub fn at_percent(total_bytes: u64, percent: f64) -> Self {
        let used = ((total_bytes as f64) * percent.clamp(0.0, 100.0) / 100.0).round() as u64;
        Self::new(total_bytes, used)
    }
}

/// One classified observation of memory usage. Immutable once recorded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PressureSample {
    pub timestamp: SystemTime,
    pub used_bytes: u64,
    pub available_bytes: u64,
    pub percent_used: f64,
}

impl PressureSample {
    pub(crate) fn from_reading(reading: MemoryReading, timestamp: SystemTime) -> Self {
        let total = reading.total_bytes.max(1);
        let used = reading.used_bytes.min(total);
        Self {
            timestamp,
            used_bytes: used,
            available_bytes: total - used,
            percent_used: (used as f64) * 100.0 / (total as f64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_is_clamped_to_total() {
        let sample =
            PressureSample::from_reading(MemoryReading::new(100, 250), SystemTime::UNIX_EPOCH);
        assert_eq!(sample.used_bytes, 100);
        assert_eq!(sample.available_bytes, 0);
        assert_eq!(sample.percent_used, 100.0);
    }

    #[test]
    fn at_percent_builds_expected_usage() {
        let reading = MemoryReading::at_percent(1_000, 72.5);
        assert_eq!(reading.used_bytes, 725);
        let sample = PressureSample::from_reading(reading, SystemTime::UNIX_EPOCH);
        assert!((sample.percent_used - 72.5).abs() < f64::EPSILON);
    }
}
