use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use axum::http::HeaderValue;
use axum::response::sse::Event;
use axum::response::{IntoResponse, Response, Sse};
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::{Mutex, mpsc};
use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::error::GatewayError;
use crate::providers::streaming::ChunkStream;
use crate::providers::types::{FileWarning, StreamChunk, Usage};
use crate::server::request_state::{RequestState, RequestTracker};

const FRAME_BUFFER: usize = 32;

/// One `data:` event on the client stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEvent {
    pub content: String,
    pub is_complete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_truncated: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_validation_warnings: Option<Vec<FileWarning>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
}

impl StreamEvent {
    fn from_chunk(chunk: StreamChunk) -> Self {
        Self {
            content: chunk.content_delta,
            is_complete: chunk.is_complete,
            usage: chunk.usage,
            is_truncated: chunk.is_truncated,
            stop_reason: chunk.stop_reason,
            file_validation_warnings: chunk.warnings.filter(|w| !w.is_empty()),
            error: None,
        }
    }

    fn from_error(err: &GatewayError) -> Self {
        let category = err.category();
        Self {
            content: category.user_message().to_string(),
            is_complete: true,
            usage: None,
            is_truncated: None,
            stop_reason: None,
            file_validation_warnings: None,
            error: Some(category.key()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Event(StreamEvent),
    KeepAlive,
    Done,
}

impl Frame {
    pub fn into_sse(self) -> Event {
        match self {
            Frame::Event(ev) => Event::default().json_data(&ev).unwrap_or_else(|e| {
                tracing::error!("failed to encode stream event: {}", e);
                Event::default().data(r#"{"content":"","isComplete":true,"error":"unknown"}"#)
            }),
            Frame::KeepAlive => Event::default().comment("keep-alive"),
            Frame::Done => Event::default().data("[DONE]"),
        }
    }
}

type SharedSender = Arc<Mutex<Option<mpsc::Sender<Frame>>>>;

/// Milliseconds since the multiplexer started, shared by both tasks.
#[derive(Clone)]
struct Activity {
    origin: Instant,
    last_ms: Arc<AtomicU64>,
}

impl Activity {
    fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_ms: Arc::new(AtomicU64::new(0)),
        }
    }

    fn touch(&self) {
        let now = self.origin.elapsed().as_millis() as u64;
        self.last_ms.store(now, Ordering::Release);
    }

    fn deadline(&self, interval: Duration) -> Instant {
        self.origin + Duration::from_millis(self.last_ms.load(Ordering::Acquire)) + interval
    }
}

/// Wraps an adapter's chunk stream with heartbeats, first-chunk warnings and exactly one
/// terminal marker.
#[derive(Debug, Clone, Copy)]
pub struct StreamMultiplexer {
    heartbeat: Duration,
}

impl StreamMultiplexer {
    pub fn new(heartbeat: Duration) -> Self {
        Self { heartbeat }
    }

    pub fn spawn(
        &self,
        chunks: ChunkStream,
        warnings: Vec<FileWarning>,
        tracker: RequestTracker,
    ) -> FrameStream {
        let (tx, rx) = mpsc::channel(FRAME_BUFFER);
        let sender: SharedSender = Arc::new(Mutex::new(Some(tx)));
        let activity = Activity::new();

        let forwarder = tokio::spawn(forward(
            chunks,
            warnings,
            tracker,
            sender.clone(),
            activity.clone(),
        ));
        let ticker = tokio::spawn(heartbeat(self.heartbeat, sender, activity));

        FrameStream {
            rx,
            tasks: vec![forwarder.abort_handle(), ticker.abort_handle()],
        }
    }

    /// SSE response for a spawned stream.
    pub fn respond(
        &self,
        chunks: ChunkStream,
        warnings: Vec<FileWarning>,
        tracker: RequestTracker,
    ) -> Response {
        let frames = self.spawn(chunks, warnings, tracker);
        let events = frames.map(|f| Ok::<_, Infallible>(f.into_sse()));
        let mut resp = Sse::new(events).into_response();
        resp.headers_mut()
            .insert("X-Accel-Buffering", HeaderValue::from_static("no"));
        resp
    }
}

async fn send(sender: &SharedSender, frame: Frame) -> bool {
    let guard = sender.lock().await;
    match guard.as_ref() {
        Some(tx) => tx.send(frame).await.is_ok(),
        None => false,
    }
}

async fn forward(
    mut chunks: ChunkStream,
    warnings: Vec<FileWarning>,
    mut tracker: RequestTracker,
    sender: SharedSender,
    activity: Activity,
) {
    tracker.advance(RequestState::Streaming);
    let mut pending_warnings = Some(warnings).filter(|w| !w.is_empty());
    let mut forwarded = 0usize;
    let mut final_usage = None;
    let mut failed = false;

    while let Some(item) = chunks.next().await {
        let (mut event, complete) = match item {
            Ok(chunk) => {
                let complete = chunk.is_complete;
                if chunk.usage.is_some() {
                    final_usage = chunk.usage;
                }
                (StreamEvent::from_chunk(chunk), complete)
            }
            Err(e) => {
                tracing::error!(request_id = %tracker.id(), "upstream stream failed: {}", e);
                failed = true;
                (StreamEvent::from_error(&e), true)
            }
        };
        if let Some(w) = pending_warnings.take() {
            event.file_validation_warnings = Some(w);
        }
        if !send(&sender, Frame::Event(event)).await {
            tracing::info!(request_id = %tracker.id(), "client went away after {} chunks", forwarded);
            tracker.fail();
            return;
        }
        activity.touch();
        forwarded += 1;
        if complete {
            break;
        }
    }

    // 发送 [DONE] 后立即收回 sender，心跳不可能再写入
    {
        let mut guard = sender.lock().await;
        if let Some(tx) = guard.take() {
            let _ = tx.send(Frame::Done).await;
        }
    }

    if failed {
        tracker.fail();
    } else {
        tracker.advance(RequestState::Completed);
    }
    let usage = final_usage.unwrap_or_default();
    tracing::info!(
        request_id = %tracker.id(),
        "stream finished in {} ms: {} events, prompt {} / completion {} tokens",
        tracker.elapsed_ms(),
        forwarded,
        usage.prompt_tokens,
        usage.completion_tokens
    );
}

async fn heartbeat(interval: Duration, sender: SharedSender, activity: Activity) {
    loop {
        tokio::time::sleep_until(activity.deadline(interval)).await;
        if Instant::now() < activity.deadline(interval) {
            continue;
        }
        if !send(&sender, Frame::KeepAlive).await {
            return;
        }
        activity.touch();
    }
}

/// Client side of a multiplexed stream. Dropping it stops both tasks and, with them, the
/// upstream request.
pub struct FrameStream {
    rx: mpsc::Receiver<Frame>,
    tasks: Vec<AbortHandle>,
}

impl Stream for FrameStream {
    type Item = Frame;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Frame>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for FrameStream {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
