use serde::Serialize;
use siphon_memory::PressureLevel;

/// Why an entry left the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionCause {
    /// Needed even at the full configured capacity.
    Capacity,
    /// Needed only because pressure reduced the effective capacity.
    Pressure,
    /// The entry outlived the configured TTL.
    Ttl,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EvictionCounts {
    pub capacity: u64,
    pub pressure: u64,
    pub ttl: u64,
}

impl EvictionCounts {
    pub fn total(&self) -> u64 {
        self.capacity + self.pressure + self.ttl
    }

    pub(crate) fn record(&mut self, cause: EvictionCause) {
        match cause {
            EvictionCause::Capacity => self.capacity += 1,
            EvictionCause::Pressure => self.pressure += 1,
            EvictionCause::Ttl => self.ttl += 1,
        }
    }
}

/// Point-in-time view of cache behaviour.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// `hits / (hits + misses)`, `0.0` before the first lookup.
    pub hit_rate: f64,
    pub insertions: u64,
    pub rejections: u64,
    pub entries: usize,
    pub occupied_bytes: u64,
    pub capacity_bytes: u64,
    pub effective_capacity: u64,
    pub level: PressureLevel,
    pub evictions: EvictionCounts,
}

pub(crate) fn hit_rate(hits: u64, misses: u64) -> f64 {
    let lookups = hits + misses;
    if lookups == 0 {
        0.0
    } else {
        hits as f64 / lookups as f64
    }
}
