//! Line-oriented frame protocol for the streaming answer connection.
//!
//! The server answers `/api/ask` with newline-delimited records of the form
//! `data: <JSON>`. This module turns arbitrarily sized byte chunks into an
//! ordered sequence of [`Frame`]s and guarantees that consumers always
//! observe a terminal frame, even when the connection is cut short or fails
//! mid-read.

use bytes::Bytes;
use futures::{Stream, StreamExt, stream};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::pin::Pin;
use tracing::{debug, warn};

/// Marker that qualifies a line as a frame record. Lines without it (SSE
/// comments, keep-alives, blank separators) are skipped silently.
const RECORD_PREFIX: &str = "data: ";

/// Message carried by the terminal frame synthesized when the stream ends
/// before `done` or `error` was seen.
const TRUNCATED_MESSAGE: &str = "stream ended unexpectedly";

/// A quoted source passage backing part of an answer. Immutable once received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub text: String,
}

/// One decoded unit of the streaming answer protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A chunk of answer text.
    Token(String),
    /// Citation ids for the answer, with the quoted passages when provided.
    Sources {
        ids: Vec<String>,
        positions: Vec<Position>,
    },
    /// The answer finished successfully. Terminal.
    Done,
    /// The answer failed. Terminal, like `Done`.
    Error { message: String },
}

impl Frame {
    /// Whether this frame ends the exchange.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Frame::Done | Frame::Error { .. })
    }
}

/// Serde-side mirror of the wire records. Unknown `type` values fail to
/// parse and are skipped by the decoder, which keeps the decoder core
/// untouched when the server grows new record types.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum WireFrame {
    Token {
        data: String,
    },
    Sources {
        data: Vec<String>,
        #[serde(default)]
        positions: Vec<Position>,
    },
    Done,
    Error {
        data: String,
    },
}

impl From<WireFrame> for Frame {
    fn from(wire: WireFrame) -> Self {
        match wire {
            WireFrame::Token { data } => Frame::Token(data),
            WireFrame::Sources { data, positions } => Frame::Sources {
                ids: data,
                positions,
            },
            WireFrame::Done => Frame::Done,
            WireFrame::Error { data } => Frame::Error { message: data },
        }
    }
}

/// Incremental decoder bound to one streaming response body.
///
/// Chunks are appended to a byte buffer and split on newline boundaries; any
/// trailing partial line is retained for the next chunk, so records and
/// multi-byte UTF-8 sequences split across chunks are never parsed
/// prematurely. A single malformed record is logged and skipped without
/// aborting the rest of the stream.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    saw_terminal: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk and returns every frame it completes, in stream order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line);
            if let Some(frame) = parse_record(line.trim_end_matches(['\n', '\r'])) {
                self.saw_terminal |= frame.is_terminal();
                frames.push(frame);
            }
        }
        frames
    }

    /// Whether a `done` or `error` frame has been decoded.
    pub fn saw_terminal(&self) -> bool {
        self.saw_terminal
    }

    /// Consumes the decoder at stream end, synthesizing the terminal error
    /// frame if the stream was cut short.
    pub fn finish(self) -> Option<Frame> {
        if self.saw_terminal {
            None
        } else {
            Some(Frame::Error {
                message: TRUNCATED_MESSAGE.to_string(),
            })
        }
    }
}

fn parse_record(line: &str) -> Option<Frame> {
    let payload = line.strip_prefix(RECORD_PREFIX)?;
    match serde_json::from_str::<WireFrame>(payload) {
        Ok(wire) => Some(wire.into()),
        Err(e) => {
            warn!(error = %e, "Skipping malformed frame record");
            None
        }
    }
}

/// A raw response body: ordered byte chunks until the connection ends.
pub type ByteStream = Pin<Box<dyn Stream<Item = anyhow::Result<Bytes>> + Send>>;

/// An order-preserving sequence of decoded frames; always ends with a
/// terminal frame.
pub type FrameStream = Pin<Box<dyn Stream<Item = Frame> + Send>>;

/// Binds a fresh decoder to one response body.
///
/// A transport error mid-read becomes an `error` frame carrying its message,
/// so downstream consumers never have to inspect the transport to learn that
/// an exchange ended badly.
pub fn frame_stream(body: ByteStream) -> FrameStream {
    struct DecodeState {
        body: ByteStream,
        decoder: Option<FrameDecoder>,
        pending: VecDeque<Frame>,
    }

    let state = DecodeState {
        body,
        decoder: Some(FrameDecoder::new()),
        pending: VecDeque::new(),
    };

    Box::pin(stream::unfold(state, |mut state| async move {
        loop {
            if let Some(frame) = state.pending.pop_front() {
                return Some((frame, state));
            }
            state.decoder.as_ref()?;
            match state.body.next().await {
                Some(Ok(chunk)) => {
                    if let Some(decoder) = state.decoder.as_mut() {
                        state.pending.extend(decoder.feed(&chunk));
                    }
                }
                Some(Err(e)) => {
                    debug!(error = %e, "Streaming body failed mid-read");
                    if let Some(decoder) = state.decoder.take() {
                        if !decoder.saw_terminal() {
                            state.pending.push_back(Frame::Error {
                                message: e.to_string(),
                            });
                        }
                    }
                }
                None => {
                    if let Some(decoder) = state.decoder.take() {
                        state.pending.extend(decoder.finish());
                    }
                }
            }
        }
    }))
}
