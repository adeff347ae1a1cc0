//! Client core for the CoPilot conversational-AI service.
//!
//! This crate implements the transport-independent parts of the client:
//! the retry/backoff policy and the SSE streaming consumer. The HTTP layer
//! itself (request builders, resource endpoints) lives above this crate and
//! calls in through two seams:
//!
//! - any fallible async operation can be wrapped by
//!   [`RetryPolicy::execute`] (or the [`with_retry`] helper);
//! - any byte stream carrying an SSE body can be wrapped by
//!   [`MessageStream::new`] ([`MessageStream::from_response`] binds a
//!   streaming [`reqwest::Response`] directly).
//!
//! Blocking equivalents of both live in [`blocking`].

pub mod blocking;
pub mod errors;
pub mod retry;
pub mod streaming;

mod utils;

pub use errors::{CopilotError, ErrorKind, Result};
pub use retry::{RetryPolicy, RetryState, with_retry, with_retry_observed};
pub use streaming::{EventSource, FinalMessage, MessageStream, StreamEvent, StreamEventType};
