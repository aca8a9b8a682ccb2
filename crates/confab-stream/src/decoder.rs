//! Frame decoders for provider-specific wire formats
//!
//! Each upstream provider frames its chunked response slightly differently.
//! A [`FrameDecoder`] collapses one raw frame payload into a [`Frame`]; the
//! decoder is picked once when a session opens and the rest of the pipeline
//! never branches on the provider again.

use async_stream::stream;
use futures::StreamExt;
use serde::Deserialize;
use std::sync::Arc;
use tokio_stream::Stream;

use crate::event::{StreamEvent, StreamEventStream};

/// The prefix marking a data frame in an SSE-style line transport
pub const DATA_PREFIX: &str = "data:";

/// What a single decoded frame contributes to the reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Incremental text
    Delta(String),
    /// Explicit end of the reply
    Done,
    /// Upstream failure; terminal
    Error(String),
    /// Frame carried nothing usable (keepalive, metadata, or corruption)
    Skip,
}

/// Decodes one raw frame payload into a [`Frame`].
///
/// Implementations must treat unparsable payloads as [`Frame::Skip`]:
/// isolated corruption must not kill an otherwise good response.
pub trait FrameDecoder: Send + Sync {
    fn decode(&self, raw: &str) -> Frame;
}

/// Decoder for the OpenAI chat-completions chunk format
#[derive(Debug, Default)]
pub struct OpenAiDecoder;

#[derive(Debug, Deserialize)]
struct OpenAiChunk {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    error: Option<OpenAiError>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    delta: OpenAiDelta,
}

#[derive(Debug, Deserialize)]
struct OpenAiDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiError {
    message: String,
}

impl FrameDecoder for OpenAiDecoder {
    fn decode(&self, raw: &str) -> Frame {
        if raw.trim() == "[DONE]" {
            return Frame::Done;
        }
        let chunk: OpenAiChunk = match serde_json::from_str(raw) {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::debug!("skipping malformed frame: {}", e);
                return Frame::Skip;
            }
        };
        if let Some(error) = chunk.error {
            return Frame::Error(error.message);
        }
        match chunk
            .choices
            .first()
            .and_then(|c| c.delta.content.as_deref())
        {
            Some(text) if !text.is_empty() => Frame::Delta(text.to_string()),
            _ => Frame::Skip,
        }
    }
}

/// Decoder for the Anthropic messages event format
#[derive(Debug, Default)]
pub struct AnthropicDecoder;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicFrame {
    ContentBlockDelta { delta: AnthropicDelta },
    MessageStop,
    Error { error: AnthropicError },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicDelta {
    TextDelta { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    message: String,
}

impl FrameDecoder for AnthropicDecoder {
    fn decode(&self, raw: &str) -> Frame {
        let frame: AnthropicFrame = match serde_json::from_str(raw) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!("skipping malformed frame: {}", e);
                return Frame::Skip;
            }
        };
        match frame {
            AnthropicFrame::ContentBlockDelta {
                delta: AnthropicDelta::TextDelta { text },
            } if !text.is_empty() => Frame::Delta(text),
            AnthropicFrame::MessageStop => Frame::Done,
            AnthropicFrame::Error { error } => Frame::Error(error.message),
            _ => Frame::Skip,
        }
    }
}

/// Strip the frame marker from raw transport lines, dropping everything else.
///
/// Lines not carrying the `data:` marker (comments, event names, blanks) are
/// ignored rather than treated as errors.
pub fn frame_payloads<S>(lines: S) -> impl Stream<Item = String> + Send
where
    S: Stream<Item = String> + Send + 'static,
{
    lines.filter_map(|line| async move {
        line.strip_prefix(DATA_PREFIX)
            .map(|payload| payload.trim_start().to_string())
    })
}

/// Reduce a stream of raw frame payloads to an ordered event sequence.
///
/// The result is lazy, finite, and non-restartable: it ends on the first
/// `Done` or `Error` frame, or when the underlying transport closes. A close
/// without an explicit terminal is an implicit `Done`, so partial output
/// accumulated by the consumer is never discarded.
pub fn decode_frames<S>(payloads: S, decoder: Arc<dyn FrameDecoder>) -> StreamEventStream
where
    S: Stream<Item = String> + Send + 'static,
{
    Box::pin(stream! {
        let mut payloads = std::pin::pin!(payloads);
        while let Some(payload) = payloads.next().await {
            match decoder.decode(&payload) {
                Frame::Delta(text) => yield StreamEvent::Delta { text },
                Frame::Done => {
                    yield StreamEvent::Done;
                    return;
                }
                Frame::Error(message) => {
                    yield StreamEvent::Error { message };
                    return;
                }
                Frame::Skip => {}
            }
        }
        // Transport closed without a terminal frame
        yield StreamEvent::Done;
    })
}
