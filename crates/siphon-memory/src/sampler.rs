use crate::cgroup;
use crate::sample::MemoryReading;
use parking_lot::Mutex;
use sysinfo::System;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SampleError {
    #[error("memory statistics are unavailable: {0}")]
    Unavailable(String),
    #[error("invalid memory reading: total={total_bytes} used={used_bytes}")]
    InvalidReading { total_bytes: u64, used_bytes: u64 },
}

/// Source of memory readings for a [`crate::PressureMonitor`].
///
/// Implementations must be cheap enough to call on every tick. Failures are
/// absorbed by the monitor.
pub trait MemorySampler: Send + Sync {
    fn sample(&self) -> Result<MemoryReading, SampleError>;
}

impl<F> MemorySampler for F
where
    F: Fn() -> Result<MemoryReading, SampleError> + Send + Sync,
{
    fn sample(&self) -> Result<MemoryReading, SampleError> {
        self()
    }
}

/// Samples host memory through `sysinfo`, preferring the enclosing cgroup's
/// limit and usage when the process is memory-constrained.
pub struct SystemSampler {
    system: Mutex<System>,
    limit_override: Option<u64>,
    prefer_cgroup: bool,
}

impl SystemSampler {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            limit_override: None,
            prefer_cgroup: true,
        }
    }

    /// Cap the total memory considered by the sampler.
    pub fn with_limit(mut self, limit_bytes: Option<u64>) -> Self {
        self.limit_override = limit_bytes.filter(|limit| *limit > 0);
        self
    }

    pub fn with_cgroup(mut self, prefer_cgroup: bool) -> Self {
        self.prefer_cgroup = prefer_cgroup;
        self
    }

    fn apply_limit(&self, reading: MemoryReading) -> MemoryReading {
        match self.limit_override {
            Some(limit) => MemoryReading::new(reading.total_bytes.min(limit), reading.used_bytes),
            None => reading,
        }
    }
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySampler for SystemSampler {
    fn sample(&self) -> Result<MemoryReading, SampleError> {
        if self.prefer_cgroup {
            if let Some(usage) = cgroup::probe() {
                return Ok(self.apply_limit(MemoryReading::new(usage.limit_bytes, usage.current_bytes)));
            }
        }

        let mut system = self.system.lock();
        system.refresh_memory();
        let total = system.total_memory();
        let available = system.available_memory();
        if total == 0 {
            return Err(SampleError::Unavailable(
                "host reported zero total memory".to_owned(),
            ));
        }
        // Some platforms report `available == 0` when the value is unknown; fall back to `used`.
        let used = if available > 0 {
            total.saturating_sub(available)
        } else {
            system.used_memory()
        };
        Ok(self.apply_limit(MemoryReading::new(total, used)))
    }
}

/// A sampler whose reading is set explicitly. Useful for tests and for hosts
/// where an external agent already knows the memory state.
#[derive(Debug)]
pub struct FixedSampler {
    state: Mutex<Result<MemoryReading, SampleError>>,
}

impl FixedSampler {
    pub fn new(reading: MemoryReading) -> Self {
        Self {
            state: Mutex::new(Ok(reading)),
        }
    }

    pub fn set(&self, reading: MemoryReading) {
        *self.state.lock() = Ok(reading);
    }

    pub fn set_percent(&self, percent: f64) {
        let total = match &*self.state.lock() {
            Ok(reading) => reading.total_bytes,
            Err(_) => 1 << 30,
        };
        self.set(MemoryReading::at_percent(total, percent));
    }

    pub fn fail(&self, message: impl Into<String>) {
        *self.state.lock() = Err(SampleError::Unavailable(message.into()));
    }
}

impl MemorySampler for FixedSampler {
    fn sample(&self) -> Result<MemoryReading, SampleError> {
        let state = self.state.lock().clone();
        let reading = state?;
        if reading.total_bytes == 0 {
            return Err(SampleError::InvalidReading {
                total_bytes: reading.total_bytes,
                used_bytes: reading.used_bytes,
            });
        }
        Ok(reading)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_sampler_reports_plausible_values() {
        let sampler = SystemSampler::new().with_cgroup(false);
        // Sandboxed hosts may hide memory statistics; only check values when present.
        if let Ok(reading) = sampler.sample() {
            assert!(reading.total_bytes > 0);
            assert!(reading.used_bytes <= reading.total_bytes);
        }
    }

    #[test]
    fn limit_override_caps_total() {
        let sampler = SystemSampler::new().with_cgroup(false).with_limit(Some(1024));
        if let Ok(reading) = sampler.sample() {
            assert!(reading.total_bytes <= 1024);
        }
    }

    #[test]
    fn fixed_sampler_can_fail_and_recover() {
        let sampler = FixedSampler::new(MemoryReading::new(100, 10));
        assert_eq!(sampler.sample().unwrap().used_bytes, 10);
        sampler.fail("probe offline");
        assert!(matches!(sampler.sample(), Err(SampleError::Unavailable(_))));
        sampler.set_percent(50.0);
        assert_eq!(sampler.sample().unwrap(), MemoryReading::new(1 << 30, 1 << 29));
    }

    #[test]
    fn closures_are_samplers() {
        let sampler = || -> Result<MemoryReading, SampleError> { Ok(MemoryReading::new(10, 5)) };
        assert_eq!(MemorySampler::sample(&sampler).unwrap().used_bytes, 5);
    }
}
