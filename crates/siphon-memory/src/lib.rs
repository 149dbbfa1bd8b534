//! Memory pressure monitoring for Siphon.
//!
//! A [`PressureMonitor`] samples system (or cgroup) memory usage on its own
//! background cadence, classifies it into a [`PressureLevel`], keeps a bounded
//! history of [`PressureSample`]s and notifies subscribers when the level
//! changes. Consumers such as the adaptive cache ask it how many bytes to shed
//! via [`PressureMonitor::eviction_target_bytes`].
//!
//! The monitor is an explicit instance with a start/stop lifecycle; there is no
//! process-global state. Inject it where it is needed.

mod cgroup;
mod degraded;
mod monitor;
mod pressure;
mod process;
mod sample;
mod sampler;
mod units;

pub use cgroup::{parse_cgroup_memory_limit_bytes, parse_proc_self_cgroup, ProcSelfCgroup};
pub use degraded::DegradedSettings;
pub use monitor::{
    CallbackId, MonitorConfig, MonitorHealth, PressureCallback, PressureEvent, PressureMonitor,
};
pub use pressure::{PressureLevel, PressureThresholds};
pub use process::current_rss_bytes;
pub use sample::{MemoryReading, PressureSample};
pub use sampler::{FixedSampler, MemorySampler, SampleError, SystemSampler};
pub use units::{parse_byte_size, ByteSizeError, GB, GIB, KB, KIB, MB, MIB};
