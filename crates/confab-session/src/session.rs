//! Session controller: the state machine a view layer observes
//!
//! One logical session drives one active conversation. A turn is a saga over
//! three independent collaborators with no shared transaction: the quota
//! ledger, the durable store, and the generation transport. The controller
//! sequences them (quota, persist user message, stream, persist assistant
//! message) and collapses every failure back to `Idle` plus a single
//! human-readable error.

use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;

use confab_stream::{StreamEvent, TextAccumulator};

use crate::error::{Error, Result};
use crate::events::SessionEvent;
use crate::generate::{GenerateRequest, Generator, Turn};
use crate::handle::SessionHandle;
use crate::quota::{QuotaLedger, QuotaSnapshot};
use crate::store::ConversationStore;
use crate::types::{ChatMessage, Conversation, Feedback, Role};

/// Maximum length of a derived conversation title, in characters
pub const TITLE_MAX_CHARS: usize = 40;

/// Where the session currently is in its turn lifecycle.
///
/// Failures are not a phase of their own: they collapse to `Idle` with
/// `last_error` set, so the session can never be left stuck mid-turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Sending,
    Streaming,
}

/// The single object a view layer observes
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    /// Known conversations, newest first
    pub conversations: Vec<Conversation>,
    /// The active conversation, if any (cached copy of the store's)
    pub current: Option<Conversation>,
    /// Ordered message list for the active conversation, durable plus
    /// optimistic
    pub messages: Vec<ChatMessage>,
    /// Latest quota snapshot
    pub quota: Option<QuotaSnapshot>,
    pub phase: Phase,
    pub last_error: Option<String>,
}

/// The session controller
pub struct Session {
    identity: String,
    store: Arc<dyn ConversationStore>,
    ledger: Arc<dyn QuotaLedger>,
    generator: Arc<dyn Generator>,
    state: Mutex<SessionState>,
    event_tx: broadcast::Sender<SessionEvent>,
    handle: SessionHandle,
}

impl Session {
    /// Create a session for one identity over its collaborator seams
    pub fn new(
        identity: impl Into<String>,
        store: Arc<dyn ConversationStore>,
        ledger: Arc<dyn QuotaLedger>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            identity: identity.into(),
            store,
            ledger,
            generator,
            state: Mutex::new(SessionState::default()),
            event_tx,
            handle: SessionHandle::new(),
        }
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Snapshot of the observable state
    pub fn state(&self) -> SessionState {
        self.state.lock().clone()
    }

    /// Get a cloneable handle for observing the session from external code
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// The identity this session belongs to
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Submit a user message and drive one full turn.
    ///
    /// Rejected with [`Error::Busy`] while a turn is in flight; a busy send
    /// is never queued. On any failure the session returns to idle with
    /// `last_error` set and the message list reflecting exactly what was
    /// durably persisted.
    pub async fn send(&self, text: &str) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::EmptyMessage);
        }
        if !self.handle.try_begin() {
            return Err(Error::Busy);
        }

        let result = self.run_turn(text.to_string()).await;

        self.with_state(|s| {
            s.phase = Phase::Idle;
            s.last_error = result.as_ref().err().map(|e| e.to_string());
        });
        self.handle.finish();
        match &result {
            Ok(()) => self.emit(SessionEvent::TurnEnd),
            Err(e) => self.emit(SessionEvent::Error {
                message: e.to_string(),
            }),
        }
        result
    }

    /// Request cancellation of the in-flight stream.
    ///
    /// Valid only while streaming; returns whether a stream was cancelled.
    /// Cancellation is not a failure: the partial reply is persisted, no
    /// error is surfaced, and the consumed quota unit is not refunded.
    pub fn cancel(&self) -> bool {
        let streaming = self.with_state(|s| s.phase == Phase::Streaming);
        if streaming {
            self.handle.abort();
        }
        streaming
    }

    /// Load a conversation and its messages as the active selection
    pub async fn select_conversation(&self, id: &str) -> Result<()> {
        self.ensure_idle()?;
        let (conversation, messages) = self.store.get_conversation(id).await?;
        self.with_state(|s| {
            s.current = Some(conversation);
            s.messages = messages;
        });
        Ok(())
    }

    /// Explicitly start a fresh, untitled conversation
    pub async fn create_conversation(&self) -> Result<Conversation> {
        self.ensure_idle()?;
        let conversation = self.store.create_conversation(&self.identity, None).await?;
        self.adopt_conversation(conversation.clone());
        Ok(conversation)
    }

    /// Delete a conversation; clears the selection if it was active
    pub async fn delete_conversation(&self, id: &str) -> Result<()> {
        self.ensure_idle()?;
        self.store.delete_conversation(id).await?;
        self.with_state(|s| {
            s.conversations.retain(|c| c.id != id);
            if s.current.as_ref().is_some_and(|c| c.id == id) {
                s.current = None;
                s.messages.clear();
            }
        });
        Ok(())
    }

    /// Reload the conversation list from the store
    pub async fn refresh_conversations(&self) -> Result<()> {
        self.ensure_idle()?;
        let conversations = self.store.list_conversations(&self.identity).await?;
        self.with_state(|s| s.conversations = conversations);
        Ok(())
    }

    /// Re-read the quota counter without consuming. Allowed mid-turn.
    pub async fn refresh_quota(&self) -> Result<QuotaSnapshot> {
        let snapshot = self
            .ledger
            .peek(&self.identity)
            .await
            .map_err(|e| Error::QuotaUnavailable(e.to_string()))?;
        self.with_state(|s| s.quota = Some(snapshot.clone()));
        self.emit(SessionEvent::QuotaChanged {
            snapshot: snapshot.clone(),
        });
        Ok(snapshot)
    }

    /// Record end-user feedback on a persisted message
    pub async fn feedback(&self, message_id: &str, feedback: Feedback) -> Result<()> {
        self.store
            .record_feedback(&self.identity, message_id, feedback)
            .await
    }

    // ---- Turn internals ----

    async fn run_turn(&self, text: String) -> Result<()> {
        self.with_state(|s| {
            s.phase = Phase::Sending;
            s.last_error = None;
        });
        self.emit(SessionEvent::TurnStart);

        // Quota first. A backend failure fails closed: it is reported like
        // an exhausted quota, never treated as an allowance.
        let outcome = match self.ledger.check_and_consume(&self.identity).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!("quota backend unreachable, failing closed: {}", e);
                return Err(Error::QuotaUnavailable(e.to_string()));
            }
        };
        self.with_state(|s| s.quota = Some(outcome.snapshot.clone()));
        self.emit(SessionEvent::QuotaChanged {
            snapshot: outcome.snapshot.clone(),
        });
        if !outcome.allowed {
            return Err(Error::QuotaExceeded {
                reset_at: outcome.snapshot.reset_at,
            });
        }

        let conversation = self.ensure_conversation().await?;

        // Durable history before this turn's user message enters the list
        let prior_turns: Vec<Turn> = self.with_state(|s| {
            s.messages
                .iter()
                .map(|m| Turn {
                    role: m.role,
                    content: m.content.clone(),
                })
                .collect()
        });

        // Optimistic user message, persisted then reconciled in place. The
        // quota unit stays consumed if persistence fails: the attempt
        // happened, and a blind retry could duplicate the append.
        let user_message = ChatMessage::optimistic(&conversation.id, Role::User, text.as_str());
        let user_pos = self.with_state(|s| {
            s.messages.push(user_message.clone());
            s.messages.len() - 1
        });
        self.emit(SessionEvent::MessageAppended {
            message: user_message,
        });

        match self
            .store
            .append_message(&conversation.id, Role::User, &text)
            .await
        {
            Ok(committed) => self.commit_at(user_pos, committed),
            Err(e) => {
                // No phantom unsent messages after a failure
                self.with_state(|s| {
                    s.messages.remove(user_pos);
                });
                return Err(e);
            }
        }

        // User persistence happens-before the stream is opened
        let cancel = self.handle.arm_cancel();
        let request = GenerateRequest {
            conversation_id: conversation.id.clone(),
            new_message_text: text.clone(),
            prior_turns,
        };
        let mut stream = self.generator.stream(request, cancel.clone()).await?;

        let assistant_message = ChatMessage::optimistic(&conversation.id, Role::Assistant, "");
        let assistant_pos = self.with_state(|s| {
            s.phase = Phase::Streaming;
            s.messages.push(assistant_message.clone());
            s.messages.len() - 1
        });
        self.emit(SessionEvent::MessageAppended {
            message: assistant_message,
        });

        let mut accumulator = TextAccumulator::new();
        let mut stream_error: Option<String> = None;
        let mut cancelled = false;
        loop {
            // Once cancel is issued, events still in flight are ignored
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                event = stream.next() => event,
            };
            let Some(event) = event else {
                // Transport closed without a terminal: implicit done
                break;
            };
            accumulator.process_event(&event);
            match event {
                StreamEvent::Delta { text } => {
                    self.with_state(|s| s.messages[assistant_pos].content.push_str(&text));
                    self.emit(SessionEvent::AssistantDelta { text });
                }
                StreamEvent::Done => break,
                StreamEvent::Error { message } => {
                    stream_error = Some(message);
                    break;
                }
            }
        }
        drop(stream);

        // Assistant persistence happens-after stream termination. Partial
        // text from an error or cancel is persisted too; a partial answer
        // beats a silently dropped one.
        let assistant_text = accumulator.into_text();
        if assistant_text.trim().is_empty() {
            self.with_state(|s| {
                s.messages.remove(assistant_pos);
            });
        } else {
            match self
                .store
                .append_message(&conversation.id, Role::Assistant, &assistant_text)
                .await
            {
                Ok(committed) => self.commit_at(assistant_pos, committed),
                Err(e) => {
                    self.with_state(|s| {
                        s.messages.remove(assistant_pos);
                    });
                    return Err(e);
                }
            }
            if stream_error.is_none() && !cancelled && conversation.title.is_none() {
                self.persist_derived_title(&conversation.id, &text).await;
            }
        }

        if let Some(message) = stream_error {
            return Err(Error::Generation(message));
        }
        if cancelled {
            tracing::debug!("turn cancelled by user");
        }
        Ok(())
    }

    /// Reconcile an optimistic message to its store-assigned identity.
    /// A single in-place swap keyed by position; consumers never observe a
    /// duplicate insert.
    fn commit_at(&self, pos: usize, committed: ChatMessage) {
        self.with_state(|s| {
            if let Some(slot) = s.messages.get_mut(pos) {
                debug_assert!(slot.id.is_pending());
                *slot = committed;
            }
        });
    }

    /// The active conversation, created lazily on the first send
    async fn ensure_conversation(&self) -> Result<Conversation> {
        if let Some(current) = self.with_state(|s| s.current.clone()) {
            return Ok(current);
        }
        let conversation = self.store.create_conversation(&self.identity, None).await?;
        self.adopt_conversation(conversation.clone());
        Ok(conversation)
    }

    fn adopt_conversation(&self, conversation: Conversation) {
        self.with_state(|s| {
            s.conversations.insert(0, conversation.clone());
            s.current = Some(conversation);
            s.messages.clear();
        });
    }

    /// Title derivation after the first completed exchange. Failure here is
    /// cosmetic; the turn itself already succeeded.
    async fn persist_derived_title(&self, conversation_id: &str, first_message: &str) {
        let title = title_from_message(first_message);
        if title.is_empty() {
            return;
        }
        if let Err(e) = self.store.rename_conversation(conversation_id, &title).await {
            tracing::warn!("failed to persist derived title: {}", e);
            return;
        }
        self.with_state(|s| {
            if let Some(c) = &mut s.current {
                if c.id == conversation_id {
                    c.title = Some(title.clone());
                }
            }
            if let Some(c) = s.conversations.iter_mut().find(|c| c.id == conversation_id) {
                c.title = Some(title.clone());
            }
        });
    }

    fn ensure_idle(&self) -> Result<()> {
        if self.handle.is_running() {
            return Err(Error::Busy);
        }
        Ok(())
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut SessionState) -> T) -> T {
        f(&mut self.state.lock())
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }
}

/// Derive a conversation title from its first user message:
/// whitespace-collapsed and truncated on a char boundary.
pub fn title_from_message(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut chars = collapsed.chars();
    let truncated: String = chars.by_ref().take(TITLE_MAX_CHARS).collect();
    if chars.next().is_some() {
        format!("{}…", truncated.trim_end())
    } else {
        truncated
    }
}
