//! Line-level SSE event parser.
//!
//! Turns `data: `-prefixed lines into [`StreamEvent`]s while tracking the
//! running transcript and the most recently seen message id. Anything that
//! is not a data line (blank keep-alives, `:` comments) is skipped, as are
//! data lines that fail to decode; partial or interleaved frames are
//! expected on some transports and must never abort the stream.

use serde_json::Value;
use tracing::{debug, warn};

use crate::streaming::{StreamEvent, StreamEventType};

const DATA_PREFIX: &str = "data: ";
const DONE_SENTINEL: &str = "[DONE]";

/// Outcome of feeding one line to the parser.
#[derive(Debug)]
pub(crate) enum LineOutcome {
    Event(StreamEvent),
    Skip,
    Done,
}

#[derive(Debug, Default)]
pub(crate) struct EventParser {
    content: String,
    message_id: Option<String>,
    message_end: Option<serde_json::Map<String, Value>>,
    done: bool,
}

impl EventParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text accumulated from `content_delta` events so far.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Most recently seen message id; once set it never reverts.
    pub fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }

    /// Payload of the `message_end` event, if one arrived.
    pub fn message_end(&self) -> Option<&serde_json::Map<String, Value>> {
        self.message_end.as_ref()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn process_line(&mut self, line: &str) -> LineOutcome {
        let Some(data) = line.strip_prefix(DATA_PREFIX) else {
            return LineOutcome::Skip;
        };

        if data == DONE_SENTINEL {
            debug!("stream terminator received");
            self.done = true;
            return LineOutcome::Done;
        }

        let Ok(Value::Object(payload)) = serde_json::from_str::<Value>(data) else {
            warn!("skipping malformed stream line");
            return LineOutcome::Skip;
        };

        let event_type = payload
            .get("type")
            .and_then(Value::as_str)
            .map(StreamEventType::from_wire)
            .unwrap_or(StreamEventType::ContentDelta);

        if let Some(id) = payload
            .get("message_id")
            .or_else(|| payload.get("id"))
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
        {
            self.message_id = Some(id.to_string());
        }

        if event_type == StreamEventType::ContentDelta {
            if let Some(text) = payload
                .get("delta")
                .and_then(|delta| delta.get("text"))
                .and_then(Value::as_str)
            {
                self.content.push_str(text);
            }
        }

        if event_type == StreamEventType::MessageEnd {
            self.message_end = Some(payload.clone());
        }

        LineOutcome::Event(StreamEvent {
            event_type,
            data: payload,
            message_id: self.message_id.clone(),
        })
    }
}
