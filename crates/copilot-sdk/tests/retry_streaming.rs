//! End-to-end behaviors across the retry and streaming layers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use copilot_sdk::{
    CopilotError, ErrorKind, MessageStream, Result, RetryPolicy, StreamEventType, with_retry,
};
use futures::stream;

fn fast_policy() -> RetryPolicy {
    RetryPolicy::default()
        .with_delays(Duration::from_millis(1), Duration::from_millis(10))
        .with_jitter(false)
}

fn sse_source(body: &str) -> impl futures::Stream<Item = Result<Bytes>> + Unpin {
    stream::iter(vec![Ok(Bytes::from(body.to_string()))])
}

#[tokio::test(flavor = "current_thread")]
async fn retried_stream_open_yields_full_transcript() {
    let body = concat!(
        "data: {\"type\":\"message_start\",\"message_id\":\"msg-7\"}\n",
        "data: {\"type\":\"content_delta\",\"delta\":{\"text\":\"Hello, \"}}\n",
        "data: {\"type\":\"content_delta\",\"delta\":{\"text\":\"world\"}}\n",
        "data: {\"type\":\"message_end\",\"finish_reason\":\"stop\"}\n",
        "data: [DONE]\n",
    );

    // The stream-open request fails twice with rate limiting before the
    // server accepts it.
    let attempts = AtomicUsize::new(0);
    let mut stream = with_retry(&fast_policy(), || {
        let n = attempts.fetch_add(1, Ordering::SeqCst);
        async move {
            if n < 2 {
                Err(CopilotError::RateLimited {
                    message: "busy".to_string(),
                    retry_after: None,
                })
            } else {
                Ok(MessageStream::new(sse_source(body)))
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(attempts.load(Ordering::SeqCst), 3);

    let message = stream.final_message().await.unwrap();
    assert_eq!(message.content, "Hello, world");
    assert_eq!(message.message_id.as_deref(), Some("msg-7"));
    assert_eq!(
        message.data.get("finish_reason").and_then(|v| v.as_str()),
        Some("stop")
    );
}

#[tokio::test(flavor = "current_thread")]
async fn observer_count_matches_retries_taken() {
    for (failures, max_retries, expected_notifications) in
        [(0usize, 3u32, 0usize), (2, 3, 2), (5, 3, 3)]
    {
        let attempts = AtomicUsize::new(0);
        let notifications = AtomicUsize::new(0);
        let policy = fast_policy().with_max_retries(max_retries);
        let result = policy
            .execute_with_observer(
                || {
                    let n = attempts.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n < failures {
                            Err(CopilotError::Server {
                                status: 502,
                                message: "bad gateway".to_string(),
                            })
                        } else {
                            Ok(())
                        }
                    }
                },
                |_, _, _| {
                    notifications.fetch_add(1, Ordering::SeqCst);
                },
            )
            .await;

        assert_eq!(
            notifications.load(Ordering::SeqCst),
            expected_notifications,
            "failures={failures} max_retries={max_retries}"
        );
        if failures > max_retries as usize {
            assert!(result.is_err());
        } else {
            assert!(result.is_ok());
        }
    }
}

#[tokio::test(flavor = "current_thread")]
async fn early_break_stops_consumption() {
    use futures::StreamExt;

    let body = concat!(
        "data: {\"type\":\"content_delta\",\"delta\":{\"text\":\"first\"}}\n",
        "data: {\"type\":\"content_delta\",\"delta\":{\"text\":\"second\"}}\n",
        "data: [DONE]\n",
    );
    let mut stream = MessageStream::new(sse_source(body));

    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.content(), Some("first"));
    assert_eq!(stream.content_so_far(), "firstsecond");
    drop(stream);
}

#[tokio::test(flavor = "current_thread")]
async fn stream_error_has_the_server_reported_text() {
    let body = concat!(
        "data: {\"type\":\"content_delta\",\"delta\":{\"text\":\"almost\"}}\n",
        "data: {\"type\":\"error\",\"error\":\"model overloaded\"}\n",
        "data: [DONE]\n",
    );
    let err = MessageStream::new(sse_source(body))
        .final_message()
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "stream error: model overloaded");
    assert_eq!(err.kind(), ErrorKind::Stream);
}

#[test]
fn blocking_adapters_match_async_results() {
    let body = concat!(
        "data: {\"type\":\"content_delta\",\"delta\":{\"text\":\"same\"}}\n",
        "data: {\"type\":\"message_end\"}\n",
        "data: [DONE]\n",
    );

    let mut blocking_stream = copilot_sdk::blocking::MessageStream::new(sse_source(body)).unwrap();
    let blocking_message = blocking_stream.final_message().unwrap();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap();
    let async_message = runtime
        .block_on(MessageStream::new(sse_source(body)).final_message())
        .unwrap();

    assert_eq!(blocking_message, async_message);
    assert_eq!(blocking_message.content, "same");
}

#[tokio::test(flavor = "current_thread")]
async fn unknown_events_surface_as_content() {
    use futures::StreamExt;

    let body = concat!(
        "data: {\"type\":\"experimental_annotation\",\"note\":\"x\"}\n",
        "data: [DONE]\n",
    );
    let mut stream = MessageStream::new(sse_source(body));
    let event = stream.next().await.unwrap().unwrap();
    assert_eq!(event.event_type, StreamEventType::ContentDelta);
    assert_eq!(event.content(), Some(""));
}
