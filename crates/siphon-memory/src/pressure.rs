use serde::{Deserialize, Serialize};

/// Coarse-grained memory pressure levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PressureLevel {
    Normal,
    Elevated,
    High,
    Critical,
}

impl PressureLevel {
    /// Fraction of a cache's current size that should be shed at this level.
    pub fn eviction_fraction(self) -> f64 {
        match self {
            PressureLevel::Normal => 0.0,
            PressureLevel::Elevated => 0.20,
            PressureLevel::High => 0.50,
            PressureLevel::Critical => 0.90,
        }
    }

    /// Bytes to shed from a cache currently holding `current` bytes:
    /// `ceil(current × eviction_fraction)`, never more than `current`.
    pub fn eviction_target_bytes(self, current: u64) -> u64 {
        let fraction = self.eviction_fraction();
        if fraction <= 0.0 || current == 0 {
            return 0;
        }
        let target = ((current as f64) * fraction).ceil() as u64;
        target.min(current)
    }

    /// Fraction of a configured capacity that remains usable at this level.
    ///
    /// Non-increasing in the level.
    pub fn capacity_fraction(self) -> f64 {
        match self {
            PressureLevel::Normal => 1.0,
            PressureLevel::Elevated => 0.80,
            PressureLevel::High => 0.50,
            PressureLevel::Critical => 0.10,
        }
    }

    pub(crate) fn to_u8(self) -> u8 {
        match self {
            PressureLevel::Normal => 0,
            PressureLevel::Elevated => 1,
            PressureLevel::High => 2,
            PressureLevel::Critical => 3,
        }
    }

    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            0 => PressureLevel::Normal,
            1 => PressureLevel::Elevated,
            2 => PressureLevel::High,
            _ => PressureLevel::Critical,
        }
    }

    pub fn all() -> [PressureLevel; 4] {
        [
            PressureLevel::Normal,
            PressureLevel::Elevated,
            PressureLevel::High,
            PressureLevel::Critical,
        ]
    }
}

/// Percent-used thresholds for computing a [`PressureLevel`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PressureThresholds {
    /// Enter `Elevated` when `percent_used >= elevated`.
    pub elevated: f64,
    /// Enter `High` when `percent_used >= high`.
    pub high: f64,
    /// Enter `Critical` when `percent_used >= critical`.
    pub critical: f64,
}

impl Default for PressureThresholds {
    fn default() -> Self {
        Self {
            elevated: 70.0,
            high: 85.0,
            critical: 95.0,
        }
    }
}

impl PressureThresholds {
    pub fn level_for_percent(self, percent_used: f64) -> PressureLevel {
        if percent_used >= self.critical {
            PressureLevel::Critical
        } else if percent_used >= self.high {
            PressureLevel::High
        } else if percent_used >= self.elevated {
            PressureLevel::Elevated
        } else {
            PressureLevel::Normal
        }
    }

    /// Thresholds must be strictly increasing and within `(0, 100]`.
    pub fn is_valid(self) -> bool {
        0.0 < self.elevated
            && self.elevated < self.high
            && self.high < self.critical
            && self.critical <= 100.0
    }
}
