//! Streaming access to files of any size.
//!
//! [`StreamingExtractor::open`] resolves a [`siphon_core::FileRef`], picks a
//! chunk reader for the format hint and returns a [`ChunkStream`]: a lazy,
//! finite, non-restartable sequence of bounded [`Chunk`]s. Small files may
//! instead be read whole through [`StreamingExtractor::prepare`].
//!
//! Reader selection is table driven ([`ReaderTable`]). Structured readers walk
//! a container's native records (RIFF chunks, ISO-BMFF boxes, PNG chunks,
//! newline-delimited lines); everything else is cut into fixed byte windows.

mod chunk;
mod extractor;
mod progress;
mod reader;
mod source;
mod stream;

pub use chunk::{Chunk, ChunkLocator};
pub use extractor::{ExtractionInput, ReadPlan, StreamConfig, StreamingExtractor, WholeFile};
pub use progress::{ProgressObserver, ProgressUpdate, StreamProgress};
pub use reader::{ReaderKind, ReaderTable, UnknownReaderKind};
pub use source::{FileResolver, FsResolver, ResolvedFile, Source, SyntheticResolver, SyntheticSource};
pub use stream::{ChunkStream, StreamOptions};
