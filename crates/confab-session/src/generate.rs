//! Text-generation collaborator seam

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use confab_stream::{FrameDecoder, SseClient, StreamEventStream, WireTurn};

use crate::error::Result;
use crate::types::Role;

/// One prior turn of conversation context
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

/// What the controller hands the text-generation collaborator
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub conversation_id: String,
    pub new_message_text: String,
    /// Durable history preceding the new message, in order
    pub prior_turns: Vec<Turn>,
}

/// Black-box text generation returning a decoded event stream.
///
/// No assumptions about the model or provider are encoded here; cancellation
/// is cooperative via the token.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn stream(
        &self,
        request: GenerateRequest,
        cancel: CancellationToken,
    ) -> Result<StreamEventStream>;
}

/// Generator backed by an SSE chat-completions endpoint.
///
/// The frame decoder is selected once, when the generator is built, and the
/// controller never branches on the provider again.
pub struct SseGenerator {
    client: SseClient,
    model: String,
    decoder: Arc<dyn FrameDecoder>,
}

impl SseGenerator {
    pub fn new(client: SseClient, model: impl Into<String>, decoder: Arc<dyn FrameDecoder>) -> Self {
        Self {
            client,
            model: model.into(),
            decoder,
        }
    }
}

#[async_trait]
impl Generator for SseGenerator {
    async fn stream(
        &self,
        request: GenerateRequest,
        cancel: CancellationToken,
    ) -> Result<StreamEventStream> {
        let mut turns: Vec<WireTurn> = request
            .prior_turns
            .iter()
            .map(|t| WireTurn::new(t.role.as_str(), t.content.clone()))
            .collect();
        turns.push(WireTurn::new(Role::User.as_str(), request.new_message_text));

        let stream = self
            .client
            .stream(&self.model, turns, Arc::clone(&self.decoder), cancel)?;
        Ok(stream)
    }
}
