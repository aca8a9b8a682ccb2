//! confab-stream: chunked completion transport decoding
//!
//! This crate reduces provider-specific streaming wire formats to one ordered
//! sequence of text deltas plus a terminal signal, and provides the SSE
//! client that produces those frames over HTTP.

pub mod decoder;
pub mod error;
pub mod event;
pub mod sse;

pub use decoder::{AnthropicDecoder, Frame, FrameDecoder, OpenAiDecoder, decode_frames, frame_payloads};
pub use error::{Error, Result};
pub use event::{StreamEvent, StreamEventStream, TextAccumulator};
pub use sse::{SseClient, WireTurn};
