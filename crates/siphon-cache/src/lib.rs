//! Bounded key → artifact cache whose effective capacity follows memory pressure.
//!
//! The configured capacity is scaled by [`PressureLevel::capacity_fraction`]
//! for the level last reported by a [`siphon_memory::PressureMonitor`]. When
//! the monitor reports a higher level the cache sheds the monitor's eviction
//! target immediately, oldest access first; capacity only grows back once the
//! monitor reports a lower level.
//!
//! Values are handed out by clone. Store `Arc`-backed artifacts so a hit stays
//! valid after the entry has been evicted.

mod cache;
mod error;
mod stats;

pub use cache::{AdaptiveCache, CacheConfig};
pub use error::CacheError;
pub use siphon_memory::PressureLevel;
pub use stats::{CacheStats, EvictionCause, EvictionCounts};
