use super::ChunkReader;
use crate::chunk::{ChunkBody, ChunkLocator};
use crate::source::Source;
use siphon_core::ExtractError;
use std::io::Read;

/// Cuts the input into `chunk_size` windows; only the last may be shorter.
pub(crate) struct GenericReader {
    source: Box<dyn Source>,
    chunk_size: usize,
    offset: u64,
    exhausted: bool,
}

impl GenericReader {
    pub(crate) fn new(source: Box<dyn Source>, chunk_size: usize) -> Self {
        Self {
            source,
            chunk_size: chunk_size.max(1),
            offset: 0,
            exhausted: false,
        }
    }
}

/// Read until `buf` holds `limit` bytes or the source ends. `true` at end of input.
pub(super) fn fill(source: &mut dyn Source, buf: &mut Vec<u8>, limit: usize) -> std::io::Result<bool> {
    let want = limit.saturating_sub(buf.len());
    if want == 0 {
        return Ok(false);
    }
    let read = source.take(want as u64).read_to_end(buf)?;
    Ok(read < want)
}

impl ChunkReader for GenericReader {
    fn next_chunk(&mut self) -> Result<Option<ChunkBody>, ExtractError> {
        if self.exhausted {
            return Ok(None);
        }
        let mut payload = Vec::with_capacity(self.chunk_size);
        self.exhausted = fill(self.source.as_mut(), &mut payload, self.chunk_size)?;
        if payload.is_empty() {
            return Ok(None);
        }

        let start = self.offset;
        self.offset += payload.len() as u64;
        Ok(Some(ChunkBody {
            locator: ChunkLocator::Bytes {
                range: start..self.offset,
            },
            payload,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn windows_cover_the_input_exactly() {
        let data: Vec<u8> = (0..=255).cycle().take(1_000).collect();
        let mut reader = GenericReader::new(Box::new(Cursor::new(data.clone())), 300);
        let mut seen = Vec::new();
        let mut ranges = Vec::new();
        while let Some(body) = reader.next_chunk().unwrap() {
            ranges.push(body.locator.byte_range());
            seen.extend_from_slice(&body.payload);
        }
        assert_eq!(seen, data);
        assert_eq!(ranges, vec![0..300, 300..600, 600..900, 900..1_000]);
    }
}
