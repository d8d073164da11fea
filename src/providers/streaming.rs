use std::collections::VecDeque;
use std::pin::Pin;

use futures_util::{StreamExt, stream};
use reqwest_eventsource::{Event, EventSource};
use tokio_stream::Stream;

use crate::config::ProviderKind;
use crate::error::{GatewayError, Result};
use crate::providers::types::StreamChunk;
use crate::server::util::upstream_error_message;

/// Pull-based, finite chunk sequence of one generation. Dropping it cancels the upstream call.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

/// What one upstream SSE event turned into.
#[derive(Debug, Default)]
pub struct DecodeStep {
    pub chunks: Vec<StreamChunk>,
    /// Upstream signalled the end of the generation.
    pub done: bool,
}

impl DecodeStep {
    pub fn chunk(chunk: StreamChunk) -> Self {
        Self {
            chunks: vec![chunk],
            done: false,
        }
    }

    pub fn done() -> Self {
        Self {
            chunks: Vec::new(),
            done: true,
        }
    }
}

/// Per-provider translation of SSE events into canonical chunks.
///
/// The decoder accumulates usage and stop reason as events arrive; [`SseDecoder::finish`] then
/// yields the single terminal chunk.
pub trait SseDecoder: Send + 'static {
    fn decode(&mut self, event: &str, data: &str) -> Result<DecodeStep>;
    fn finish(&mut self) -> StreamChunk;
}

struct DriveState<D> {
    es: EventSource,
    decoder: D,
    provider: ProviderKind,
    pending: VecDeque<StreamChunk>,
    finished: bool,
}

impl<D: SseDecoder> DriveState<D> {
    fn complete(&mut self) {
        let last = self.decoder.finish();
        self.pending.push_back(last);
        self.finished = true;
        self.es.close();
    }
}

async fn map_event_source_error(provider: ProviderKind, err: reqwest_eventsource::Error) -> GatewayError {
    match err {
        reqwest_eventsource::Error::InvalidStatusCode(status, resp) => {
            let body = resp.text().await.unwrap_or_default();
            GatewayError::Upstream {
                provider,
                status: status.as_u16(),
                message: upstream_error_message(&body),
            }
        }
        reqwest_eventsource::Error::InvalidContentType(_, resp) => {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            GatewayError::Upstream {
                provider,
                status,
                message: upstream_error_message(&body),
            }
        }
        reqwest_eventsource::Error::Transport(e) => GatewayError::Http(e),
        other => GatewayError::Stream(other.to_string()),
    }
}

/// Drives an event source to completion through a decoder.
///
/// Emits the decoder's chunks in arrival order, then exactly one terminal chunk; an upstream
/// failure ends the sequence with a single `Err`.
pub fn drive_event_source<D: SseDecoder>(
    mut es: EventSource,
    provider: ProviderKind,
    decoder: D,
) -> ChunkStream {
    es.set_retry_policy(Box::new(reqwest_eventsource::retry::Never));
    let state = DriveState {
        es,
        decoder,
        provider,
        pending: VecDeque::new(),
        finished: false,
    };

    let s = stream::unfold(state, |mut st| async move {
        loop {
            if let Some(chunk) = st.pending.pop_front() {
                return Some((Ok(chunk), st));
            }
            if st.finished {
                return None;
            }
            match st.es.next().await {
                Some(Ok(Event::Open)) => {}
                Some(Ok(Event::Message(m))) => {
                    if m.data.trim() == "[DONE]" {
                        st.complete();
                        continue;
                    }
                    match st.decoder.decode(&m.event, &m.data) {
                        Ok(step) => {
                            st.pending.extend(step.chunks);
                            if step.done {
                                st.complete();
                            }
                        }
                        Err(e) => {
                            st.finished = true;
                            st.es.close();
                            return Some((Err(e), st));
                        }
                    }
                }
                Some(Err(reqwest_eventsource::Error::StreamEnded)) | None => st.complete(),
                Some(Err(e)) => {
                    st.finished = true;
                    st.es.close();
                    let err = map_event_source_error(st.provider, e).await;
                    return Some((Err(err), st));
                }
            }
        }
    });
    Box::pin(s)
}
