//! The extraction engine facade.
//!
//! [`ExtractionEngine`] wires one [`siphon_memory::PressureMonitor`], the
//! whole-file [`siphon_cache::AdaptiveCache`], a [`siphon_stream::StreamingExtractor`]
//! and a [`siphon_scheduler::Scheduler`] together from a [`SiphonConfig`], and
//! exposes the operations an outer API layer needs: submit, status, result,
//! cancel and the metrics, cache and pressure snapshots.
//!
//! ```no_run
//! use siphon_engine::{
//!     ExtractError, ExtractionEngine, ExtractionInput, Priority, RawFields, SiphonConfig,
//!     TaskContext,
//! };
//!
//! let engine = ExtractionEngine::builder(SiphonConfig::default())
//!     .default_extractor(|input: ExtractionInput, _ctx: &TaskContext| -> Result<RawFields, ExtractError> {
//!         let mut bytes = 0u64;
//!         input.for_each_slice(|slice| {
//!             bytes += slice.len() as u64;
//!             Ok(())
//!         })?;
//!         let mut fields = RawFields::new();
//!         fields.insert("bytes".into(), bytes.into());
//!         Ok(fields)
//!     })
//!     .start()?;
//!
//! let handle = engine.submit("/data/report.csv", "csv", Priority::Normal)?;
//! let result = engine.result(&handle);
//! println!("{}: {}", result.task_id, result.status);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod builder;
mod engine;
mod error;

pub use builder::EngineBuilder;
pub use engine::ExtractionEngine;
pub use error::EngineError;

pub use siphon_cache::CacheStats;
pub use siphon_config::SiphonConfig;
pub use siphon_core::{
    ErrorKind, ExtractError, ExtractionStatus, FileRef, FormatHint, Priority, RawFields, TaskId,
};
pub use siphon_memory::{PressureLevel, PressureMonitor};
pub use siphon_metrics::AggregateMetrics;
pub use siphon_scheduler::{
    ExtractionResult, FieldExtractor, ProgressEvent, ProgressReceiver, SubmitError, TaskContext,
    TaskHandle, TaskSpec, TaskState, TaskStatus,
};
pub use siphon_stream::{Chunk, ExtractionInput, FileResolver, FsResolver, SyntheticResolver};
