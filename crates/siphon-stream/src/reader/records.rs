use super::ChunkReader;
use crate::chunk::{ChunkBody, ChunkLocator};
use crate::source::Source;
use siphon_core::ExtractError;
use std::io::{Read, Seek, SeekFrom};

/// Size and tag of one native record, parsed from its header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RecordHeader {
    pub tag: [u8; 4],
    /// Whole record length, header included.
    pub len: u64,
}

/// Container layout walked by [`RecordReader`].
pub(crate) trait RecordLayout: Send {
    const FORMAT: &'static str;
    /// Longest header [`RecordLayout::parse`] may need.
    const MAX_HEADER: usize;

    fn matches(&self, prefix: &[u8]) -> bool;

    /// Leading bytes that precede the first record (file signature).
    fn preamble_len(&self) -> u64 {
        0
    }

    /// Parse the record starting with `header`, with `remaining` bytes left in
    /// the file (header included).
    fn parse(&self, header: &[u8], remaining: u64) -> Result<RecordHeader, String>;
}

fn tag(bytes: &[u8]) -> [u8; 4] {
    let mut tag = [0u8; 4];
    tag.copy_from_slice(&bytes[..4]);
    tag
}

fn printable(tag: [u8; 4]) -> String {
    tag.iter()
        .map(|b| if b.is_ascii_graphic() { *b as char } else { '?' })
        .collect()
}

/// RIFF: `"RIFF" size form`, then `id size data [pad]` chunks.
pub(crate) struct Riff;

impl RecordLayout for Riff {
    const FORMAT: &'static str = "riff";
    const MAX_HEADER: usize = 8;

    fn matches(&self, prefix: &[u8]) -> bool {
        prefix.len() >= 12 && &prefix[..4] == b"RIFF"
    }

    fn preamble_len(&self) -> u64 {
        12
    }

    fn parse(&self, header: &[u8], remaining: u64) -> Result<RecordHeader, String> {
        if header.len() < 8 {
            return Err(format!("truncated chunk header ({} bytes)", header.len()));
        }
        let size = u64::from(u32::from_le_bytes([header[4], header[5], header[6], header[7]]));
        let body = 8 + size;
        let padded = body + (size & 1);
        let tag = tag(header);
        if body > remaining {
            return Err(format!(
                "chunk `{}` declares {size} bytes but only {} remain",
                printable(tag),
                remaining.saturating_sub(8)
            ));
        }
        // Writers commonly omit the pad byte on the last chunk.
        Ok(RecordHeader {
            tag,
            len: padded.min(remaining),
        })
    }
}

/// ISO base media: `size type [largesize]` boxes.
pub(crate) struct IsoBmff;

const BMFF_TOP_LEVEL: [&[u8; 4]; 10] = [
    b"ftyp", b"styp", b"moov", b"mdat", b"free", b"skip", b"wide", b"pnot", b"sidx", b"meta",
];

impl RecordLayout for IsoBmff {
    const FORMAT: &'static str = "iso_bmff";
    const MAX_HEADER: usize = 16;

    fn matches(&self, prefix: &[u8]) -> bool {
        prefix.len() >= 8 && BMFF_TOP_LEVEL.iter().any(|name| &prefix[4..8] == *name)
    }

    fn parse(&self, header: &[u8], remaining: u64) -> Result<RecordHeader, String> {
        if header.len() < 8 {
            return Err(format!("truncated box header ({} bytes)", header.len()));
        }
        let size = u64::from(u32::from_be_bytes([header[0], header[1], header[2], header[3]]));
        let tag = tag(&header[4..8]);
        let len = match size {
            // Extends to the end of the file.
            0 => remaining,
            1 => {
                if header.len() < 16 {
                    return Err(format!("truncated largesize for box `{}`", printable(tag)));
                }
                let mut large = [0u8; 8];
                large.copy_from_slice(&header[8..16]);
                let large = u64::from_be_bytes(large);
                if large < 16 {
                    return Err(format!("box `{}` has invalid largesize {large}", printable(tag)));
                }
                large
            }
            size if size < 8 => {
                return Err(format!("box `{}` has invalid size {size}", printable(tag)));
            }
            size => size,
        };
        if len > remaining {
            return Err(format!(
                "box `{}` declares {len} bytes but only {remaining} remain",
                printable(tag)
            ));
        }
        Ok(RecordHeader { tag, len })
    }
}

/// PNG: 8-byte signature, then `length type data crc` chunks.
pub(crate) struct Png;

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

impl RecordLayout for Png {
    const FORMAT: &'static str = "png";
    const MAX_HEADER: usize = 8;

    fn matches(&self, prefix: &[u8]) -> bool {
        prefix.starts_with(&PNG_SIGNATURE)
    }

    fn preamble_len(&self) -> u64 {
        PNG_SIGNATURE.len() as u64
    }

    fn parse(&self, header: &[u8], remaining: u64) -> Result<RecordHeader, String> {
        if header.len() < 8 {
            return Err(format!("truncated chunk header ({} bytes)", header.len()));
        }
        let length = u64::from(u32::from_be_bytes([header[0], header[1], header[2], header[3]]));
        let tag = tag(&header[4..8]);
        if length > i32::MAX as u64 {
            return Err(format!("chunk `{}` length {length} exceeds 2^31-1", printable(tag)));
        }
        let len = 12 + length;
        if len > remaining {
            return Err(format!(
                "chunk `{}` declares {length} data bytes but only {remaining} bytes remain",
                printable(tag)
            ));
        }
        Ok(RecordHeader { tag, len })
    }
}

struct OpenRecord {
    index: u64,
    tag: Option<[u8; 4]>,
    len: u64,
    emitted: u64,
    segment: u32,
}

/// Walks a container's top-level records, emitting each record (header
/// included) as one chunk, or as several segments when it is larger than
/// `chunk_size`.
pub(crate) struct RecordReader<L> {
    layout: L,
    source: Box<dyn Source>,
    total: u64,
    chunk_size: usize,
    offset: u64,
    next_index: u64,
    open: Option<OpenRecord>,
}

impl<L: RecordLayout> RecordReader<L> {
    pub(crate) fn new(layout: L, source: Box<dyn Source>, total: u64, chunk_size: usize) -> Self {
        Self {
            layout,
            source,
            total,
            chunk_size: chunk_size.max(1),
            offset: 0,
            next_index: 0,
            open: None,
        }
    }

    fn open_next(&mut self) -> Result<OpenRecord, ExtractError> {
        let index = self.next_index;
        let remaining = self.total - self.offset;

        if index == 0 && self.layout.preamble_len() > 0 {
            let len = self.layout.preamble_len().min(remaining);
            return Ok(OpenRecord {
                index,
                tag: None,
                len,
                emitted: 0,
                segment: 0,
            });
        }

        let mut header = Vec::with_capacity(L::MAX_HEADER);
        (&mut self.source)
            .take((L::MAX_HEADER as u64).min(remaining))
            .read_to_end(&mut header)?;
        self.source.seek(SeekFrom::Start(self.offset))?;

        let parsed = self.layout.parse(&header, remaining).map_err(|message| {
            ExtractError::malformed(L::FORMAT, format!("record {index} at offset {}: {message}", self.offset))
        })?;
        Ok(OpenRecord {
            index,
            tag: Some(parsed.tag),
            len: parsed.len,
            emitted: 0,
            segment: 0,
        })
    }
}

impl<L: RecordLayout> ChunkReader for RecordReader<L> {
    fn next_chunk(&mut self) -> Result<Option<ChunkBody>, ExtractError> {
        if self.open.is_none() {
            if self.offset >= self.total {
                return Ok(None);
            }
            let record = self.open_next()?;
            self.open = Some(record);
        }
        let Some(record) = self.open.as_mut() else {
            return Ok(None);
        };

        let want = (record.len - record.emitted).min(self.chunk_size as u64) as usize;
        let mut payload = vec![0u8; want];
        self.source.read_exact(&mut payload)?;

        let chunk_size = self.chunk_size as u64;
        let segments = u32::try_from(record.len.div_ceil(chunk_size).max(1)).unwrap_or(u32::MAX);
        let start = self.offset;
        self.offset += want as u64;
        let locator = ChunkLocator::Record {
            index: record.index,
            tag: record.tag,
            range: start..self.offset,
            segment: record.segment,
            segments,
        };
        record.emitted += want as u64;
        record.segment = record.segment.saturating_add(1);
        if record.emitted >= record.len {
            self.open = None;
            self.next_index += 1;
        }

        Ok(Some(ChunkBody { locator, payload }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn records<L: RecordLayout>(layout: L, data: Vec<u8>, chunk_size: usize) -> Result<Vec<ChunkBody>, ExtractError> {
        let total = data.len() as u64;
        let mut reader = RecordReader::new(layout, Box::new(Cursor::new(data)), total, chunk_size);
        let mut out = Vec::new();
        while let Some(body) = reader.next_chunk()? {
            out.push(body);
        }
        Ok(out)
    }

    fn bmff_box(kind: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut out = ((body.len() + 8) as u32).to_be_bytes().to_vec();
        out.extend_from_slice(kind);
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn walks_bmff_boxes_including_largesize() {
        let mut data = bmff_box(b"ftyp", b"isom\0\0\0\0");
        let mut large = 1u32.to_be_bytes().to_vec();
        large.extend_from_slice(b"mdat");
        large.extend_from_slice(&(16u64 + 4).to_be_bytes());
        large.extend_from_slice(b"DATA");
        data.extend_from_slice(&large);

        let chunks = records(IsoBmff, data, 1024).unwrap();
        let tags: Vec<_> = chunks.iter().map(|c| c.locator.tag_str().map(str::to_owned)).collect();
        assert_eq!(tags, vec![Some("ftyp".to_owned()), Some("mdat".to_owned())]);
        assert_eq!(chunks[1].locator.byte_range(), 16..36);
    }

    #[test]
    fn bmff_size_zero_runs_to_end() {
        let mut data = bmff_box(b"ftyp", b"mp42");
        data.extend_from_slice(&0u32.to_be_bytes());
        data.extend_from_slice(b"mdat");
        data.extend_from_slice(&[7u8; 100]);
        let chunks = records(IsoBmff, data, 40).unwrap();
        // ftyp, then a 108-byte mdat split into 40 + 40 + 28.
        assert_eq!(chunks.len(), 4);
        assert!(matches!(
            chunks[3].locator,
            ChunkLocator::Record { index: 1, segment: 2, segments: 3, .. }
        ));
    }

    #[test]
    fn riff_chunks_are_padded_and_preamble_is_first() {
        let mut data = b"RIFF".to_vec();
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(b"WAVE");
        data.extend_from_slice(b"fmt ");
        data.extend_from_slice(&3u32.to_le_bytes());
        data.extend_from_slice(&[1, 2, 3, 0]);
        data.extend_from_slice(b"data");
        data.extend_from_slice(&5u32.to_le_bytes());
        data.extend_from_slice(&[9; 5]);

        let chunks = records(Riff, data, 64).unwrap();
        let ranges: Vec<_> = chunks.iter().map(|c| c.locator.byte_range()).collect();
        // The trailing pad byte of `data` is missing and tolerated.
        assert_eq!(ranges, vec![0..12, 12..24, 24..37]);
        assert_eq!(chunks[1].locator.tag_str(), Some("fmt "));
    }

    #[test]
    fn truncated_png_chunk_is_malformed() {
        let mut data = PNG_SIGNATURE.to_vec();
        data.extend_from_slice(&13u32.to_be_bytes());
        data.extend_from_slice(b"IHDR");
        data.extend_from_slice(&[0; 4]);
        let err = records(Png, data, 64).unwrap_err();
        assert!(matches!(err, ExtractError::Malformed { ref format, .. } if format == "png"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn signatures() {
        assert!(Png.matches(&PNG_SIGNATURE));
        assert!(!Png.matches(b"GIF89a"));
        assert!(Riff.matches(b"RIFF\0\0\0\0WEBPVP8 "));
        assert!(IsoBmff.matches(b"\0\0\0\x18ftypmp42"));
        assert!(!IsoBmff.matches(b"\0\0\0\x18abcd"));
    }
}
