//! Frame decoding for the server-push event stream.
//!
//! The backend writes newline-delimited lines of the form `data: <json>`.
//! Chunks arrive with no alignment to line boundaries, so the decoder keeps
//! the unterminated tail of the previous chunk and prepends it to the next.

use std::collections::VecDeque;

use futures_util::{Stream, StreamExt};
use tracing::{debug, trace};

use crate::error::SessionError;

/// Line prefix carrying a payload
pub const DATA_PREFIX: &str = "data:";

/// Payload reserved for normal end of stream
pub const DONE_SENTINEL: &str = "[DONE]";

/// One logical protocol unit extracted from the byte stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A JSON payload line (prefix stripped)
    Data(String),
    /// The `[DONE]` sentinel
    Done,
}

/// Incremental line decoder.
///
/// Holds at most one partial line between calls. Once the sentinel has been
/// seen every further byte is discarded.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    pending: Vec<u8>,
    /// Prefix of `pending` already searched for a newline
    scanned: usize,
    finished: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the sentinel has been decoded
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feed one chunk and return every frame it completes, in order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Frame> {
        if self.finished {
            return Vec::new();
        }

        self.pending.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut start = 0;
        let mut scan_from = self.scanned;
        while let Some(offset) = self.pending[scan_from..].iter().position(|&b| b == b'\n') {
            let end = scan_from + offset;
            let frame = parse_line(&self.pending[start..end]);
            start = end + 1;
            scan_from = start;

            if let Some(frame) = frame {
                let done = frame == Frame::Done;
                frames.push(frame);
                if done {
                    self.finish_early();
                    return frames;
                }
            }
        }

        self.pending.drain(..start);
        self.scanned = self.pending.len();
        frames
    }

    /// Flush the unterminated remainder once the source is exhausted.
    pub fn finish(&mut self) -> Option<Frame> {
        if self.finished {
            return None;
        }
        self.finished = true;
        self.scanned = 0;
        let rest = std::mem::take(&mut self.pending);
        parse_line(&rest)
    }

    fn finish_early(&mut self) {
        if !self.pending.is_empty() {
            trace!("Discarding {} bytes after end-of-stream sentinel", self.pending.len());
        }
        self.pending = Vec::new();
        self.scanned = 0;
        self.finished = true;
    }
}

/// Classify a single line. Lines without the data prefix are comments or
/// keep-alives and yield nothing.
fn parse_line(raw: &[u8]) -> Option<Frame> {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    let line = String::from_utf8_lossy(raw);

    let rest = line.strip_prefix(DATA_PREFIX)?;
    let payload = rest.strip_prefix(' ').unwrap_or(rest);

    if payload.trim() == DONE_SENTINEL {
        return Some(Frame::Done);
    }
    if payload.trim().is_empty() {
        return None;
    }
    Some(Frame::Data(payload.to_string()))
}

/// Lazy frame sequence over an asynchronous byte source.
///
/// Each call to [`FrameStream::next_frame`] reads from the source only when no
/// decoded frame is ready. After the sentinel or a read error the source is
/// dropped, which closes the transport read side.
pub struct FrameStream<S> {
    source: Option<S>,
    decoder: FrameDecoder,
    ready: VecDeque<Frame>,
}

impl<S> FrameStream<S>
where
    S: Stream<Item = Result<Vec<u8>, SessionError>> + Unpin,
{
    pub fn new(source: S) -> Self {
        Self {
            source: Some(source),
            decoder: FrameDecoder::new(),
            ready: VecDeque::new(),
        }
    }

    /// Whether the underlying byte source is still open
    pub fn is_open(&self) -> bool {
        self.source.is_some()
    }

    /// Next decoded frame, `None` once the sequence is exhausted.
    pub async fn next_frame(&mut self) -> Option<Result<Frame, SessionError>> {
        loop {
            if let Some(frame) = self.ready.pop_front() {
                return Some(Ok(frame));
            }

            let source = self.source.as_mut()?;
            let next = source.next().await;

            match next {
                Some(Ok(chunk)) => {
                    self.ready.extend(self.decoder.feed(&chunk));
                    if self.decoder.is_finished() {
                        debug!("End-of-stream sentinel received, closing byte source");
                        self.source = None;
                    }
                }
                Some(Err(err)) => {
                    self.source = None;
                    return Some(Err(err));
                }
                None => {
                    self.source = None;
                    if let Some(frame) = self.decoder.finish() {
                        self.ready.push_back(frame);
                    }
                }
            }
        }
    }
}
