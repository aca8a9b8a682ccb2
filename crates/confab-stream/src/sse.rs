//! SSE transport for chat completion streams

use async_stream::stream;
use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::{
    decoder::{Frame, FrameDecoder},
    error::{Error, Result},
    event::{StreamEvent, StreamEventStream},
};

/// One turn of prior context on the wire
#[derive(Debug, Clone, Serialize)]
pub struct WireTurn {
    pub role: &'static str,
    pub content: String,
}

impl WireTurn {
    pub fn new(role: &'static str, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [WireTurn],
    stream: bool,
}

/// HTTP client for a chat-completions endpoint that streams SSE frames
#[derive(Debug)]
pub struct SseClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl SseClient {
    /// Create a new client against a base URL
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(Error::InvalidApiKey);
        }
        Ok(Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
        })
    }

    /// Open a completion stream and decode it with the given frame decoder.
    ///
    /// The returned stream ends on the decoder's terminal frame, on transport
    /// failure, or when `cancel` fires. A connection that closes without an
    /// explicit terminal yields an implicit `Done` so accumulated text is
    /// never discarded.
    pub fn stream(
        &self,
        model: &str,
        messages: Vec<WireTurn>,
        decoder: Arc<dyn FrameDecoder>,
        cancel: CancellationToken,
    ) -> Result<StreamEventStream> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let request = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&CompletionRequest {
                model,
                messages: &messages,
                stream: true,
            });

        let mut source = EventSource::new(request)
            .map_err(|e| Error::Sse(format!("failed to open event source: {}", e)))?;

        Ok(Box::pin(stream! {
            loop {
                let event = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        source.close();
                        return;
                    }
                    event = source.next() => event,
                };

                match event {
                    Some(Ok(Event::Open)) => {}
                    Some(Ok(Event::Message(message))) => match decoder.decode(&message.data) {
                        Frame::Delta(text) => yield StreamEvent::Delta { text },
                        Frame::Done => {
                            source.close();
                            yield StreamEvent::Done;
                            return;
                        }
                        Frame::Error(message) => {
                            source.close();
                            yield StreamEvent::Error { message };
                            return;
                        }
                        Frame::Skip => {}
                    },
                    Some(Err(reqwest_eventsource::Error::StreamEnded)) | None => break,
                    Some(Err(e)) => {
                        source.close();
                        yield StreamEvent::Error {
                            message: format!("transport error: {}", e),
                        };
                        return;
                    }
                }
            }
            // Closed without an explicit terminal frame
            yield StreamEvent::Done;
        }))
    }
}
