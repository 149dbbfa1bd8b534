use crate::pressure::PressureLevel;
use serde::{Deserialize, Serialize};

/// Pipeline throttles applied while the system is under memory pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DegradedSettings {
    /// Small files may be read into a single buffer instead of streamed.
    pub read_whole_files: bool,
    /// Whole-file buffers may be inserted into the adaptive cache.
    pub populate_cache: bool,
}

impl DegradedSettings {
    pub fn for_level(level: PressureLevel) -> Self {
        match level {
            PressureLevel::Normal | PressureLevel::Elevated => Self {
                read_whole_files: true,
                populate_cache: true,
            },
            PressureLevel::High | PressureLevel::Critical => Self {
                read_whole_files: false,
                populate_cache: false,
            },
        }
    }
}
