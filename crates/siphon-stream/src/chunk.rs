use std::ops::Range;

/// Where a chunk's payload sits in the underlying file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkLocator {
    /// A fixed-size window of a format-agnostic stream.
    Bytes { range: Range<u64> },
    /// One native record (box, chunk, line), or one segment of a record that
    /// is larger than the chunk size.
    Record {
        index: u64,
        tag: Option<[u8; 4]>,
        range: Range<u64>,
        segment: u32,
        segments: u32,
    },
    /// A batch of consecutive records.
    Records {
        first: u64,
        count: u64,
        range: Range<u64>,
    },
}

impl ChunkLocator {
    pub fn byte_range(&self) -> Range<u64> {
        match self {
            ChunkLocator::Bytes { range }
            | ChunkLocator::Record { range, .. }
            | ChunkLocator::Records { range, .. } => range.clone(),
        }
    }

    /// Records completed by this chunk.
    pub(crate) fn completed_records(&self) -> u64 {
        match self {
            ChunkLocator::Bytes { .. } => 0,
            ChunkLocator::Record {
                segment, segments, ..
            } => u64::from(segment + 1 >= *segments),
            ChunkLocator::Records { count, .. } => *count,
        }
    }

    /// Four-character tag as text, for structured records.
    pub fn tag_str(&self) -> Option<&str> {
        match self {
            ChunkLocator::Record { tag: Some(tag), .. } => std::str::from_utf8(tag).ok(),
            _ => None,
        }
    }
}

/// One bounded unit of a file's content. Owned by the consumer once yielded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Strictly increasing from zero within one stream.
    pub sequence: u64,
    pub locator: ChunkLocator,
    pub payload: Vec<u8>,
    /// Set on exactly one chunk per stream, the last one.
    pub is_final: bool,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn byte_range(&self) -> Range<u64> {
        self.locator.byte_range()
    }
}

/// What a reader produces; the stream adds sequencing and the final flag.
#[derive(Debug)]
pub(crate) struct ChunkBody {
    pub locator: ChunkLocator,
    pub payload: Vec<u8>,
}
