use super::generic::fill;
use super::{ChunkReader, ReaderLimits};
use crate::chunk::{ChunkBody, ChunkLocator};
use crate::source::Source;
use siphon_core::ExtractError;

/// Batches newline-terminated records into chunks of at most `chunk_size`
/// bytes and `max_records` records. A line longer than `chunk_size` is emitted
/// as consecutive segments of one record.
pub(crate) struct LinesReader {
    source: Box<dyn Source>,
    limits: ReaderLimits,
    // Bytes read past the last emitted record boundary.
    carry: Vec<u8>,
    offset: u64,
    next_line: u64,
    // Segment index of the oversized line currently being emitted.
    open_segment: Option<u32>,
    eof: bool,
}

impl LinesReader {
    pub(crate) fn new(source: Box<dyn Source>, limits: ReaderLimits) -> Self {
        Self {
            source,
            limits: ReaderLimits {
                chunk_size: limits.chunk_size.max(1),
                max_records: limits.max_records.max(1),
            },
            carry: Vec::new(),
            offset: 0,
            next_line: 0,
            open_segment: None,
            eof: false,
        }
    }

    fn emit(&mut self, payload: Vec<u8>, locator: impl FnOnce(std::ops::Range<u64>) -> ChunkLocator) -> ChunkBody {
        let start = self.offset;
        self.offset += payload.len() as u64;
        ChunkBody {
            locator: locator(start..self.offset),
            payload,
        }
    }

    fn segment(&mut self, payload: Vec<u8>, segment: u32, last: bool) -> ChunkBody {
        let index = self.next_line;
        if last {
            self.next_line += 1;
            self.open_segment = None;
        } else {
            self.open_segment = Some(segment + 1);
        }
        // The total is unknown until the line ends; `segments` is only exact on the last one.
        let segments = if last { segment + 1 } else { segment + 2 };
        self.emit(payload, |range| ChunkLocator::Record {
            index,
            tag: None,
            range,
            segment,
            segments,
        })
    }
}

impl ChunkReader for LinesReader {
    fn next_chunk(&mut self) -> Result<Option<ChunkBody>, ExtractError> {
        let mut window = std::mem::take(&mut self.carry);
        if !self.eof {
            self.eof = fill(self.source.as_mut(), &mut window, self.limits.chunk_size)?;
        }
        if window.is_empty() {
            return Ok(None);
        }

        let max_records = if self.open_segment.is_some() {
            1
        } else {
            self.limits.max_records
        };
        let mut records = 0u64;
        let mut cut = None;
        for (idx, byte) in window.iter().enumerate() {
            if *byte == b'\n' {
                records += 1;
                cut = Some(idx + 1);
                if records as usize == max_records {
                    break;
                }
            }
        }

        let body = match cut {
            Some(cut) => {
                self.carry = window.split_off(cut);
                match self.open_segment {
                    Some(segment) => self.segment(window, segment, true),
                    None => {
                        let first = self.next_line;
                        self.next_line += records;
                        self.emit(window, |range| ChunkLocator::Records {
                            first,
                            count: records,
                            range,
                        })
                    }
                }
            }
            // Unterminated last line.
            None if self.eof => match self.open_segment {
                Some(segment) => self.segment(window, segment, true),
                None => {
                    let first = self.next_line;
                    self.next_line += 1;
                    self.emit(window, |range| ChunkLocator::Records {
                        first,
                        count: 1,
                        range,
                    })
                }
            },
            // A full window without a newline: part of an oversized line.
            None => {
                let segment = self.open_segment.unwrap_or(0);
                self.segment(window, segment, false)
            }
        };
        Ok(Some(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn read_all(data: &[u8], chunk_size: usize, max_records: usize) -> Vec<ChunkBody> {
        let mut reader = LinesReader::new(
            Box::new(Cursor::new(data.to_vec())),
            ReaderLimits {
                chunk_size,
                max_records,
            },
        );
        let mut out = Vec::new();
        while let Some(body) = reader.next_chunk().unwrap() {
            out.push(body);
        }
        out
    }

    #[test]
    fn batches_whole_lines() {
        let chunks = read_all(b"a,1\nb,2\nc,3\nd,4\n", 10, 100);
        let payloads: Vec<&[u8]> = chunks.iter().map(|c| c.payload.as_slice()).collect();
        assert_eq!(payloads, vec![&b"a,1\nb,2\n"[..], &b"c,3\nd,4\n"[..]]);
        assert_eq!(
            chunks[1].locator,
            ChunkLocator::Records {
                first: 2,
                count: 2,
                range: 8..16
            }
        );
    }

    #[test]
    fn respects_record_limit_and_trailing_line() {
        let chunks = read_all(b"1\n2\n3\ntail", 64, 2);
        let counts: Vec<u64> = chunks.iter().map(|c| c.locator.completed_records()).collect();
        assert_eq!(counts, vec![2, 1, 1]);
        assert_eq!(chunks[2].payload, b"tail");
    }

    #[test]
    fn splits_oversized_lines_into_segments() {
        let mut data = vec![b'x'; 25];
        data.extend_from_slice(b"\nshort\n");
        let chunks = read_all(&data, 10, 100);

        let total: Vec<u8> = chunks.iter().flat_map(|c| c.payload.clone()).collect();
        assert_eq!(total, data);
        match &chunks[2].locator {
            ChunkLocator::Record {
                index,
                segment,
                segments,
                ..
            } => assert_eq!((*index, *segment, *segments), (0, 2, 3)),
            other => panic!("unexpected locator {other:?}"),
        }
        assert_eq!(chunks[2].payload, b"xxxxx\n");
        assert_eq!(
            chunks[3].locator,
            ChunkLocator::Records {
                first: 1,
                count: 1,
                range: 26..32
            }
        );
        assert!(chunks.iter().all(|c| c.payload.len() <= 10));
    }
}
