//! Core shared types for Siphon.
//!
//! This crate is intentionally small: identifiers, the task vocabulary shared by
//! the stream reader and the scheduler, and the error taxonomy every task-level
//! failure is classified into.

mod error;
mod ids;
mod panic;
mod task;

pub use error::{ErrorKind, ExtractError};
pub use ids::{TaskId, WorkerId};
pub use panic::panic_payload_to_str;
pub use task::{ExtractionStatus, FileRef, FormatHint, Priority, RawFields};

/// Cooperative cancellation primitive shared across all Siphon crates.
pub use tokio_util::sync::CancellationToken;

/// Current Siphon version string.
pub const SIPHON_VERSION: &str = env!("CARGO_PKG_VERSION");
