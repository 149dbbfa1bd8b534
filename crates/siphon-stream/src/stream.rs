use crate::chunk::{Chunk, ChunkBody, ChunkLocator};
use crate::progress::{ProgressObserver, StreamProgress};
use crate::reader::{ChunkReader, ReaderKind};
use siphon_core::{CancellationToken, ExtractError, FileRef};
use std::sync::Arc;
use std::time::Instant;

/// Cooperative controls checked between chunks.
#[derive(Clone, Default)]
pub struct StreamOptions {
    pub cancel: CancellationToken,
    pub deadline: Option<Instant>,
    pub observer: Option<ProgressObserver>,
}

impl StreamOptions {
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_observer(mut self, observer: ProgressObserver) -> Self {
        self.observer = Some(observer);
        self
    }
}

impl std::fmt::Debug for StreamOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamOptions")
            .field("cancelled", &self.cancel.is_cancelled())
            .field("deadline", &self.deadline)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

/// A lazy, finite, non-restartable sequence of [`Chunk`]s over one file.
///
/// Exactly one chunk carries `is_final`, and it is the last one yielded. The
/// underlying handle is released exactly once: after the final chunk, on the
/// first error, on cancellation, or when the stream is dropped early. A read
/// error is reported by the call after the last good chunk; chunks already
/// yielded stay valid.
pub struct ChunkStream {
    file: FileRef,
    kind: ReaderKind,
    reader: Option<Box<dyn ChunkReader>>,
    // One body of read-ahead, so the final chunk can be flagged.
    lookahead: Option<ChunkBody>,
    deferred_error: Option<ExtractError>,
    next_sequence: u64,
    done: bool,
    opened_at: Instant,
    progress: Arc<StreamProgress>,
    options: StreamOptions,
}

impl std::fmt::Debug for ChunkStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkStream")
            .field("file", &self.file)
            .field("kind", &self.kind)
            .field("next_sequence", &self.next_sequence)
            .field("done", &self.done)
            .field("released", &self.is_released())
            .finish()
    }
}

impl ChunkStream {
    pub(crate) fn new(
        file: FileRef,
        kind: ReaderKind,
        reader: Box<dyn ChunkReader>,
        total: Option<u64>,
        options: StreamOptions,
    ) -> Self {
        Self {
            file,
            kind,
            reader: Some(reader),
            lookahead: None,
            deferred_error: None,
            next_sequence: 0,
            done: false,
            opened_at: Instant::now(),
            progress: Arc::new(StreamProgress::new(total)),
            options,
        }
    }

    pub fn file(&self) -> &FileRef {
        &self.file
    }

    /// Reader family in use, after any signature fallback.
    pub fn reader_kind(&self) -> ReaderKind {
        self.kind
    }

    pub fn progress(&self) -> Arc<StreamProgress> {
        Arc::clone(&self.progress)
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.options.cancel
    }

    /// The final chunk was yielded, or the stream failed.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// The underlying handle has been dropped.
    pub fn is_released(&self) -> bool {
        self.reader.is_none()
    }

    /// Yield the next chunk; `Ok(None)` once the final chunk has been yielded.
    ///
    /// Cancellation and the deadline are checked here, between chunks.
    pub fn next_chunk(&mut self) -> Result<Option<Chunk>, ExtractError> {
        if self.done {
            return Ok(None);
        }
        if self.options.cancel.is_cancelled() {
            return Err(self.fail(ExtractError::Cancelled, "cancelled"));
        }
        if let Some(deadline) = self.options.deadline {
            if Instant::now() >= deadline {
                let elapsed = self.opened_at.elapsed();
                return Err(self.fail(ExtractError::DeadlineExceeded(elapsed), "deadline"));
            }
        }
        if let Some(err) = self.deferred_error.take() {
            return Err(self.fail(err, "error"));
        }

        let current = match self.lookahead.take() {
            Some(body) => body,
            None => match self.pull() {
                Ok(Some(body)) => body,
                // Empty input still yields one (empty) final chunk.
                Ok(None) => ChunkBody {
                    locator: ChunkLocator::Bytes { range: 0..0 },
                    payload: Vec::new(),
                },
                Err(err) => return Err(self.fail(err, "error")),
            },
        };

        let is_final = match self.pull() {
            Ok(Some(next)) => {
                self.lookahead = Some(next);
                false
            }
            Ok(None) => true,
            Err(err) => {
                self.deferred_error = Some(err);
                false
            }
        };

        let chunk = Chunk {
            sequence: self.next_sequence,
            payload: current.payload,
            locator: current.locator,
            is_final,
        };
        self.next_sequence += 1;

        let update = self.progress.advance(
            chunk.payload.len() as u64,
            chunk.locator.completed_records(),
            is_final,
        );
        if let Some(observer) = &self.options.observer {
            observer(&update);
        }

        if is_final {
            self.done = true;
            self.release("complete");
        }
        Ok(Some(chunk))
    }

    /// Drain the remaining chunks, calling `f` on each.
    pub fn for_each_chunk<F>(mut self, mut f: F) -> Result<u64, ExtractError>
    where
        F: FnMut(Chunk) -> Result<(), ExtractError>,
    {
        let mut count = 0;
        while let Some(chunk) = self.next_chunk()? {
            f(chunk)?;
            count += 1;
        }
        Ok(count)
    }

    fn pull(&mut self) -> Result<Option<ChunkBody>, ExtractError> {
        match self.reader.as_mut() {
            Some(reader) => reader.next_chunk(),
            None => Ok(None),
        }
    }

    fn fail(&mut self, err: ExtractError, outcome: &'static str) -> ExtractError {
        self.done = true;
        self.lookahead = None;
        tracing::debug!(
            target = "siphon.stream",
            file = %self.file,
            sequence = self.next_sequence,
            error = %err,
            "chunk stream terminated"
        );
        self.release(outcome);
        err
    }

    fn release(&mut self, outcome: &'static str) {
        if let Some(reader) = self.reader.take() {
            drop(reader);
            tracing::trace!(
                target = "siphon.stream",
                file = %self.file,
                outcome,
                chunks = self.next_sequence,
                bytes = self.progress.bytes_consumed(),
                "chunk stream released"
            );
        }
    }
}

impl Iterator for ChunkStream {
    type Item = Result<Chunk, ExtractError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_chunk().transpose()
    }
}

impl std::iter::FusedIterator for ChunkStream {}

impl Drop for ChunkStream {
    fn drop(&mut self) {
        self.lookahead = None;
        self.release("abandoned");
    }
}
