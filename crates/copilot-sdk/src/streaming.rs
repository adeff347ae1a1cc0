//! Streaming responses.
//!
//! [`MessageStream`] wraps the transport's raw byte stream for an SSE body
//! and yields typed [`StreamEvent`]s. It is a lazy, single-pass sequence:
//! consuming it exhausts the underlying connection, and dropping it early
//! (breaking out of a loop) drops the transport handle, which closes the
//! connection. No background work survives the stream.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::errors::{CopilotError, Result};
use crate::utils::sse::{EventParser, LineOutcome};

/// Type of a streaming event.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamEventType {
    MessageStart,
    /// Also the fallback for unrecognized event types, so unknown events are
    /// still visible in the transcript rather than silently dropped.
    ContentDelta,
    MessageEnd,
    ToolUse,
    ToolResult,
    Error,
    Ping,
}

impl StreamEventType {
    pub fn from_wire(value: &str) -> Self {
        match value {
            "message_start" => Self::MessageStart,
            "content_delta" => Self::ContentDelta,
            "message_end" => Self::MessageEnd,
            "tool_use" => Self::ToolUse,
            "tool_result" => Self::ToolResult,
            "error" => Self::Error,
            "ping" => Self::Ping,
            _ => Self::ContentDelta,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MessageStart => "message_start",
            Self::ContentDelta => "content_delta",
            Self::MessageEnd => "message_end",
            Self::ToolUse => "tool_use",
            Self::ToolResult => "tool_result",
            Self::Error => "error",
            Self::Ping => "ping",
        }
    }
}

/// A single event in a streaming response.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StreamEvent {
    pub event_type: StreamEventType,
    pub data: Map<String, Value>,
    /// The most recently seen message id at the time this event was parsed.
    pub message_id: Option<String>,
}

impl StreamEvent {
    /// Delta text for `content_delta` events, `None` for everything else.
    pub fn content(&self) -> Option<&str> {
        if self.event_type != StreamEventType::ContentDelta {
            return None;
        }
        Some(
            self.data
                .get("delta")
                .and_then(|delta| delta.get("text"))
                .and_then(Value::as_str)
                .unwrap_or(""),
        )
    }

    /// Error message for `error` events, `None` for everything else.
    pub fn error(&self) -> Option<&str> {
        if self.event_type != StreamEventType::Error {
            return None;
        }
        Some(
            self.data
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("Unknown error"),
        )
    }

    /// Whether this event ends the message (`message_end` or `error`).
    ///
    /// Informational for callers that want to stop early; iteration itself
    /// does not stop here.
    pub fn is_final(&self) -> bool {
        matches!(
            self.event_type,
            StreamEventType::MessageEnd | StreamEventType::Error
        )
    }
}

/// The assembled message after a stream has been fully drained.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FinalMessage {
    pub message_id: Option<String>,
    pub content: String,
    /// Payload of the `message_end` event; empty if the transport closed
    /// before one arrived (which is not an error).
    pub data: Map<String, Value>,
}

/// Boxed byte source, as produced by [`MessageStream::from_response`].
pub type EventSource = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Streaming response consumer.
///
/// Implements [`futures::Stream`] over [`StreamEvent`]s. The underlying
/// transport handle is owned exclusively and dropped as soon as the stream
/// terminator arrives.
pub struct MessageStream<S> {
    source: Option<S>,
    parser: EventParser,
    line_buffer: BytesMut,
    pending: VecDeque<StreamEvent>,
}

impl MessageStream<EventSource> {
    /// Wrap a streaming HTTP response.
    pub fn from_response(response: reqwest::Response) -> Self {
        let source: EventSource = Box::pin(
            response
                .bytes_stream()
                .map(|chunk| chunk.map_err(CopilotError::from)),
        );
        Self::new(source)
    }
}

impl<S> MessageStream<S>
where
    S: Stream<Item = Result<Bytes>> + Unpin,
{
    pub fn new(source: S) -> Self {
        Self {
            source: Some(source),
            parser: EventParser::new(),
            line_buffer: BytesMut::new(),
            pending: VecDeque::new(),
        }
    }

    /// The message id seen so far, if any.
    pub fn message_id(&self) -> Option<&str> {
        self.parser.message_id()
    }

    /// Content accumulated so far, without consuming the stream.
    pub fn content_so_far(&self) -> &str {
        self.parser.content()
    }

    /// Drain the remaining events and return the complete accumulated text.
    ///
    /// Idempotent once the stream is drained: the accumulated state is
    /// retained, so calling this again returns the same string. If it is
    /// interleaved with partial manual iteration it returns everything seen
    /// so far plus the rest, not just the remainder.
    pub async fn accumulated_content(&mut self) -> Result<String> {
        while let Some(event) = self.next().await {
            event?;
        }
        Ok(self.parser.content().to_string())
    }

    /// Drain the stream and return the assembled final message.
    ///
    /// The first `error` event aborts with [`CopilotError::Stream`] carrying
    /// the server-reported message; no partial message is returned in that
    /// case. A stream that ends without a `message_end` event still yields a
    /// message with the accumulated content and message id.
    pub async fn final_message(&mut self) -> Result<FinalMessage> {
        while let Some(event) = self.next().await {
            let event = event?;
            if let Some(message) = event.error() {
                return Err(CopilotError::Stream(message.to_string()));
            }
        }

        Ok(FinalMessage {
            message_id: self.parser.message_id().map(str::to_string),
            content: self.parser.content().to_string(),
            data: self.parser.message_end().cloned().unwrap_or_default(),
        })
    }

    // Buffers raw bytes and decodes only complete lines, so a multi-byte
    // UTF-8 character split across transport chunks is reassembled intact.
    fn feed_chunk(&mut self, chunk: &[u8]) {
        self.line_buffer.extend_from_slice(chunk);

        while let Some(pos) = self.line_buffer.iter().position(|&byte| byte == b'\n') {
            let line = self.line_buffer.split_to(pos + 1);
            let line = String::from_utf8_lossy(&line);
            self.feed_line(line.trim_end_matches(['\r', '\n']));
            if self.parser.is_done() {
                self.line_buffer.clear();
                break;
            }
        }
    }

    fn feed_line(&mut self, line: &str) {
        match self.parser.process_line(line) {
            LineOutcome::Event(event) => self.pending.push_back(event),
            LineOutcome::Skip | LineOutcome::Done => {}
        }
    }
}

impl<S> Stream for MessageStream<S>
where
    S: Stream<Item = Result<Bytes>> + Unpin,
{
    type Item = Result<StreamEvent>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(event) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(event)));
            }

            let Some(source) = this.source.as_mut() else {
                return Poll::Ready(None);
            };

            match source.poll_next_unpin(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(Ok(chunk))) => {
                    this.feed_chunk(&chunk);
                    if this.parser.is_done() {
                        // Terminator seen; release the connection now.
                        this.source = None;
                    }
                }
                Poll::Ready(Some(Err(error))) => {
                    this.source = None;
                    return Poll::Ready(Some(Err(error)));
                }
                Poll::Ready(None) => {
                    debug!("transport closed without stream terminator");
                    this.source = None;
                    let trailing = std::mem::take(&mut this.line_buffer);
                    if !trailing.is_empty() {
                        let line = String::from_utf8_lossy(&trailing);
                        this.feed_line(line.trim_end_matches(['\r', '\n']));
                    }
                }
            }
        }
    }
}
