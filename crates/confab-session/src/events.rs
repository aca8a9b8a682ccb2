//! Session event types

use serde::{Deserialize, Serialize};

use crate::quota::QuotaSnapshot;
use crate::types::ChatMessage;

/// Events emitted while the session processes a turn
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A send was accepted and the turn began
    TurnStart,

    /// A message (optimistic or committed) entered the visible list
    MessageAppended { message: ChatMessage },

    /// Incremental assistant text arrived
    AssistantDelta { text: String },

    /// The quota counter changed or was refreshed
    QuotaChanged { snapshot: QuotaSnapshot },

    /// The turn finished and the session is idle again
    TurnEnd,

    /// A failure collapsed the turn back to idle
    Error { message: String },
}

impl SessionEvent {
    /// Check if this is a terminal event for a turn
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionEvent::TurnEnd | SessionEvent::Error { .. })
    }
}
