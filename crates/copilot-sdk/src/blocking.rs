//! Blocking adapters over the async core.
//!
//! The retry loop and stream consumer are implemented once, as async code.
//! These adapters drive them to completion on a private current-thread
//! tokio runtime, so blocking callers get the same behavior without a
//! second implementation.

use std::future;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};

use crate::errors::{CopilotError, Result};
use crate::retry::RetryPolicy;
use crate::streaming::{FinalMessage, StreamEvent};

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| CopilotError::Other(format!("failed to start blocking runtime: {err}")))
}

/// Run a blocking operation with retries under `policy`.
pub fn execute<F, T>(policy: &RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    runtime()?.block_on(policy.execute(|| future::ready(operation())))
}

/// Like [`execute`], invoking `on_retry(attempt, error, delay)` before each
/// backoff sleep.
pub fn execute_with_observer<F, T, C>(
    policy: &RetryPolicy,
    mut operation: F,
    on_retry: C,
) -> Result<T>
where
    F: FnMut() -> Result<T>,
    C: FnMut(u32, &CopilotError, Duration),
{
    runtime()?.block_on(policy.execute_with_observer(|| future::ready(operation()), on_retry))
}

/// Blocking wrapper around [`crate::streaming::MessageStream`].
///
/// Owns its runtime; each call drives the async consumer until the next
/// event (or the end of the stream) is available.
pub struct MessageStream<S> {
    runtime: tokio::runtime::Runtime,
    inner: crate::streaming::MessageStream<S>,
}

impl<S> MessageStream<S>
where
    S: Stream<Item = Result<Bytes>> + Unpin,
{
    pub fn new(source: S) -> Result<Self> {
        Ok(Self {
            runtime: runtime()?,
            inner: crate::streaming::MessageStream::new(source),
        })
    }

    pub fn message_id(&self) -> Option<&str> {
        self.inner.message_id()
    }

    pub fn content_so_far(&self) -> &str {
        self.inner.content_so_far()
    }

    /// Drain the remaining events and return the complete accumulated text.
    pub fn accumulated_content(&mut self) -> Result<String> {
        let Self { runtime, inner } = self;
        runtime.block_on(inner.accumulated_content())
    }

    /// Drain the stream and return the assembled final message.
    pub fn final_message(&mut self) -> Result<FinalMessage> {
        let Self { runtime, inner } = self;
        runtime.block_on(inner.final_message())
    }
}

impl<S> Iterator for MessageStream<S>
where
    S: Stream<Item = Result<Bytes>> + Unpin,
{
    type Item = Result<StreamEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        let Self { runtime, inner } = self;
        runtime.block_on(inner.next())
    }
}
