use crate::reader::{build_reader, ReaderKind, ReaderLimits, ReaderTable};
use crate::source::{FileResolver, ResolvedFile};
use crate::stream::{ChunkStream, StreamOptions};
use siphon_core::{ExtractError, FileRef, FormatHint};
use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    /// Files larger than this are always streamed.
    pub streaming_threshold_bytes: u64,
    pub chunk_size_bytes: usize,
    /// Upper bound on records batched into one chunk by the lines reader.
    pub max_records_per_chunk: usize,
    pub readers: ReaderTable,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            streaming_threshold_bytes: 100_000_000,
            chunk_size_bytes: 8 * 1024 * 1024,
            max_records_per_chunk: 4096,
            readers: ReaderTable::default(),
        }
    }
}

/// Whether a file is read in one buffer or streamed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPlan {
    Whole,
    Stream,
}

/// A small file read into memory in one piece.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WholeFile {
    pub file: FileRef,
    pub format: FormatHint,
    pub bytes: Arc<[u8]>,
}

impl WholeFile {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// What a field extractor receives.
#[derive(Debug)]
pub enum ExtractionInput {
    Stream(ChunkStream),
    Whole(WholeFile),
}

impl ExtractionInput {
    pub fn is_streaming(&self) -> bool {
        matches!(self, ExtractionInput::Stream(_))
    }

    pub fn file(&self) -> &FileRef {
        match self {
            ExtractionInput::Stream(stream) => stream.file(),
            ExtractionInput::Whole(whole) => &whole.file,
        }
    }

    /// Visit the content chunk by chunk regardless of how it was read.
    /// A whole file is presented as a single slice.
    pub fn for_each_slice<F>(self, mut f: F) -> Result<(), ExtractError>
    where
        F: FnMut(&[u8]) -> Result<(), ExtractError>,
    {
        match self {
            ExtractionInput::Whole(whole) => f(whole.as_bytes()),
            ExtractionInput::Stream(stream) => stream
                .for_each_chunk(|chunk| f(&chunk.payload))
                .map(|_| ()),
        }
    }
}

/// Opens files as chunk streams (or whole buffers when small enough).
pub struct StreamingExtractor {
    resolver: Arc<dyn FileResolver>,
    config: StreamConfig,
}

impl std::fmt::Debug for StreamingExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingExtractor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl StreamingExtractor {
    pub fn new(resolver: Arc<dyn FileResolver>, config: StreamConfig) -> Self {
        Self { resolver, config }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn resolver(&self) -> &Arc<dyn FileResolver> {
        &self.resolver
    }

    pub fn reader_kind_for(&self, format: &FormatHint) -> ReaderKind {
        self.config.readers.kind_for(format)
    }

    /// Decide how a file of `size` bytes is read. Unknown sizes stream.
    pub fn plan(&self, size: Option<u64>, allow_whole: bool) -> ReadPlan {
        match size {
            Some(size) if allow_whole && size <= self.config.streaming_threshold_bytes => {
                ReadPlan::Whole
            }
            _ => ReadPlan::Stream,
        }
    }

    pub fn open(&self, file: &FileRef, format: &FormatHint) -> Result<ChunkStream, ExtractError> {
        self.open_with(file, format, StreamOptions::default())
    }

    pub fn open_with(
        &self,
        file: &FileRef,
        format: &FormatHint,
        options: StreamOptions,
    ) -> Result<ChunkStream, ExtractError> {
        let (resolved, size) = self.resolve(file)?;
        self.stream_from(resolved, size, file, format, options)
    }

    /// Read a file below the streaming threshold into one buffer.
    pub fn read_whole(&self, file: &FileRef, format: &FormatHint) -> Result<WholeFile, ExtractError> {
        let (resolved, size) = self.resolve(file)?;
        if size > self.config.streaming_threshold_bytes {
            return Err(ExtractError::ResourceExhausted(format!(
                "{file} is {size} bytes; whole reads are limited to {} bytes",
                self.config.streaming_threshold_bytes
            )));
        }
        Self::whole_from(resolved, size, file, format)
    }

    /// Resolve once and return whichever input [`StreamingExtractor::plan`] picks.
    pub fn prepare(
        &self,
        file: &FileRef,
        format: &FormatHint,
        options: StreamOptions,
        allow_whole: bool,
    ) -> Result<ExtractionInput, ExtractError> {
        let (resolved, size) = self.resolve(file)?;
        match self.plan(Some(size), allow_whole) {
            ReadPlan::Whole => Ok(ExtractionInput::Whole(Self::whole_from(
                resolved, size, file, format,
            )?)),
            ReadPlan::Stream => Ok(ExtractionInput::Stream(
                self.stream_from(resolved, size, file, format, options)?,
            )),
        }
    }

    /// Resolve and measure. The resolver's estimate is replaced by the exact length.
    fn resolve(&self, file: &FileRef) -> Result<(ResolvedFile, u64), ExtractError> {
        let mut resolved = self.resolver.resolve(file)?;
        let size = resolved.source.seek(SeekFrom::End(0))?;
        resolved.source.seek(SeekFrom::Start(0))?;
        if let Some(hint) = resolved.size_hint {
            if hint != size {
                tracing::debug!(
                    target = "siphon.stream",
                    file = %file,
                    hint,
                    size,
                    "resolver size estimate differs from actual length"
                );
            }
        }
        Ok((resolved, size))
    }

    fn stream_from(
        &self,
        resolved: ResolvedFile,
        size: u64,
        file: &FileRef,
        format: &FormatHint,
        options: StreamOptions,
    ) -> Result<ChunkStream, ExtractError> {
        let wanted = self.config.readers.kind_for(format);
        let limits = ReaderLimits {
            chunk_size: self.config.chunk_size_bytes,
            max_records: self.config.max_records_per_chunk,
        };
        let (reader, kind) = build_reader(wanted, resolved.source, size, limits)?;
        tracing::debug!(
            target = "siphon.stream",
            file = %file,
            format = %format,
            reader = %kind,
            size,
            chunk_size = limits.chunk_size,
            "opened chunk stream"
        );
        Ok(ChunkStream::new(file.clone(), kind, reader, Some(size), options))
    }

    fn whole_from(
        resolved: ResolvedFile,
        size: u64,
        file: &FileRef,
        format: &FormatHint,
    ) -> Result<WholeFile, ExtractError> {
        let capacity = usize::try_from(size).map_err(|_| {
            ExtractError::ResourceExhausted(format!("{file} is too large to buffer"))
        })?;
        let mut bytes = Vec::with_capacity(capacity);
        resolved.source.take(size).read_to_end(&mut bytes)?;
        Ok(WholeFile {
            file: file.clone(),
            format: format.clone(),
            bytes: bytes.into(),
        })
    }
}
