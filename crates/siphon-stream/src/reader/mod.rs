//! Chunk readers, one per reader family, selected once when a stream opens.

mod generic;
mod lines;
mod records;

use crate::chunk::ChunkBody;
use crate::source::Source;
use serde::{Deserialize, Serialize};
use siphon_core::{ExtractError, FormatHint};
use std::collections::BTreeMap;
use std::io::{self, Read, Seek, SeekFrom};

pub(crate) use generic::GenericReader;
pub(crate) use lines::LinesReader;
pub(crate) use records::{IsoBmff, Png, RecordLayout, RecordReader, Riff};

/// Produces chunk bodies until the input is exhausted.
pub(crate) trait ChunkReader: Send {
    /// `Ok(None)` at end of input. After an error the reader is not polled again.
    fn next_chunk(&mut self) -> Result<Option<ChunkBody>, ExtractError>;
}

/// Reader family used for a format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReaderKind {
    /// Fixed-size byte windows.
    Generic,
    /// Newline-delimited records, batched.
    Lines,
    /// RIFF containers (WAV, AVI, WebP), chunk by chunk.
    Riff,
    /// ISO base media files (MP4, MOV, HEIF), top-level box by box.
    IsoBmff,
    /// PNG images, chunk by chunk.
    Png,
}

impl ReaderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ReaderKind::Generic => "generic",
            ReaderKind::Lines => "lines",
            ReaderKind::Riff => "riff",
            ReaderKind::IsoBmff => "iso_bmff",
            ReaderKind::Png => "png",
        }
    }

    pub fn is_structured(self) -> bool {
        !matches!(self, ReaderKind::Generic)
    }
}

impl std::fmt::Display for ReaderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown reader kind `{0}`")]
pub struct UnknownReaderKind(pub String);

impl std::str::FromStr for ReaderKind {
    type Err = UnknownReaderKind;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "generic" => Ok(ReaderKind::Generic),
            "lines" => Ok(ReaderKind::Lines),
            "riff" => Ok(ReaderKind::Riff),
            "iso_bmff" | "isobmff" => Ok(ReaderKind::IsoBmff),
            "png" => Ok(ReaderKind::Png),
            _ => Err(UnknownReaderKind(raw.to_owned())),
        }
    }
}

/// Maps format hints to reader families. Unlisted formats use [`ReaderKind::Generic`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderTable {
    formats: BTreeMap<String, ReaderKind>,
}

impl Default for ReaderTable {
    fn default() -> Self {
        let mut table = Self::empty();
        for format in ["mp4", "m4a", "m4v", "mov", "heic", "heif", "avif", "3gp"] {
            table.set(format, ReaderKind::IsoBmff);
        }
        for format in ["wav", "avi", "webp"] {
            table.set(format, ReaderKind::Riff);
        }
        table.set("png", ReaderKind::Png);
        for format in ["csv", "tsv", "jsonl", "ndjson", "log", "txt"] {
            table.set(format, ReaderKind::Lines);
        }
        table
    }
}

impl ReaderTable {
    pub fn empty() -> Self {
        Self {
            formats: BTreeMap::new(),
        }
    }

    pub fn set(&mut self, format: impl Into<FormatHint>, kind: ReaderKind) {
        self.formats.insert(format.into().as_str().to_owned(), kind);
    }

    pub fn with(mut self, format: impl Into<FormatHint>, kind: ReaderKind) -> Self {
        self.set(format, kind);
        self
    }

    pub fn kind_for(&self, format: &FormatHint) -> ReaderKind {
        self.formats
            .get(format.as_str())
            .copied()
            .unwrap_or(ReaderKind::Generic)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, ReaderKind)> + '_ {
        self.formats.iter().map(|(format, kind)| (format.as_str(), *kind))
    }
}

/// Limits shared by every reader.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ReaderLimits {
    pub chunk_size: usize,
    pub max_records: usize,
}

const SNIFF_LEN: usize = 16;

/// Build the reader for `wanted`, falling back to generic when the content
/// does not carry the expected signature. Returns the kind actually used.
pub(crate) fn build_reader(
    wanted: ReaderKind,
    mut source: Box<dyn Source>,
    total: u64,
    limits: ReaderLimits,
) -> Result<(Box<dyn ChunkReader>, ReaderKind), ExtractError> {
    let kind = match wanted {
        ReaderKind::Riff | ReaderKind::IsoBmff | ReaderKind::Png => {
            let prefix = sniff(&mut source)?;
            let matches = match wanted {
                ReaderKind::Riff => Riff.matches(&prefix),
                ReaderKind::IsoBmff => IsoBmff.matches(&prefix),
                _ => Png.matches(&prefix),
            };
            if matches {
                wanted
            } else {
                tracing::debug!(
                    target = "siphon.stream",
                    wanted = %wanted,
                    "signature mismatch; falling back to generic reader"
                );
                ReaderKind::Generic
            }
        }
        other => other,
    };

    let reader: Box<dyn ChunkReader> = match kind {
        ReaderKind::Generic => Box::new(GenericReader::new(source, limits.chunk_size)),
        ReaderKind::Lines => Box::new(LinesReader::new(source, limits)),
        ReaderKind::Riff => Box::new(RecordReader::new(Riff, source, total, limits.chunk_size)),
        ReaderKind::IsoBmff => {
            Box::new(RecordReader::new(IsoBmff, source, total, limits.chunk_size))
        }
        ReaderKind::Png => Box::new(RecordReader::new(Png, source, total, limits.chunk_size)),
    };
    Ok((reader, kind))
}

/// Read up to [`SNIFF_LEN`] leading bytes and rewind.
fn sniff(source: &mut Box<dyn Source>) -> io::Result<Vec<u8>> {
    let mut prefix = Vec::with_capacity(SNIFF_LEN);
    source.by_ref().take(SNIFF_LEN as u64).read_to_end(&mut prefix)?;
    source.seek(SeekFrom::Start(0))?;
    Ok(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_covers_structured_formats() {
        let table = ReaderTable::default();
        assert_eq!(table.kind_for(&FormatHint::new(".MP4")), ReaderKind::IsoBmff);
        assert_eq!(table.kind_for(&FormatHint::new("wav")), ReaderKind::Riff);
        assert_eq!(table.kind_for(&FormatHint::new("png")), ReaderKind::Png);
        assert_eq!(table.kind_for(&FormatHint::new("csv")), ReaderKind::Lines);
        assert_eq!(table.kind_for(&FormatHint::new("dicom")), ReaderKind::Generic);
        assert_eq!(table.kind_for(&FormatHint::generic()), ReaderKind::Generic);
    }

    #[test]
    fn table_entries_can_be_overridden() {
        let table = ReaderTable::default()
            .with("mp4", ReaderKind::Generic)
            .with("fits", ReaderKind::Lines);
        assert_eq!(table.kind_for(&FormatHint::new("mp4")), ReaderKind::Generic);
        assert_eq!(table.kind_for(&FormatHint::new("FITS")), ReaderKind::Lines);
    }

    #[test]
    fn kinds_parse_from_config_spellings() {
        assert_eq!("iso-bmff".parse::<ReaderKind>().unwrap(), ReaderKind::IsoBmff);
        assert_eq!(" Lines ".parse::<ReaderKind>().unwrap(), ReaderKind::Lines);
        assert!("zip".parse::<ReaderKind>().is_err());
        assert_eq!(
            serde_json::from_str::<ReaderKind>("\"iso_bmff\"").unwrap(),
            ReaderKind::IsoBmff
        );
    }
}
