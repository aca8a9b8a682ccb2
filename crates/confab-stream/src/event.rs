//! Streaming event types and utilities

use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio_stream::Stream;

/// Events emitted while streaming an assistant reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// An incremental text fragment to append to the in-progress reply
    Delta { text: String },
    /// Terminal marker, no further deltas expected
    Done,
    /// The upstream transport reported a failure; terminal
    Error { message: String },
}

impl StreamEvent {
    /// Check if this is a terminal event (Done or Error)
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done | StreamEvent::Error { .. })
    }
}

/// A stream of reply events
pub type StreamEventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Accumulates the assistant text from a sequence of streaming events
#[derive(Debug, Default)]
pub struct TextAccumulator {
    text: String,
    terminated: bool,
}

impl TextAccumulator {
    /// Create a new accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Process a streaming event, appending any delta text.
    /// Events after a terminal are ignored.
    pub fn process_event(&mut self, event: &StreamEvent) {
        if self.terminated {
            return;
        }
        match event {
            StreamEvent::Delta { text } => self.text.push_str(text),
            StreamEvent::Done | StreamEvent::Error { .. } => self.terminated = true,
        }
    }

    /// Get the text accumulated so far
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Whether any non-whitespace text has been accumulated
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }

    /// Consume the accumulator, returning the final text
    pub fn into_text(self) -> String {
        self.text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulator_appends_in_order() {
        let mut acc = TextAccumulator::new();
        acc.process_event(&StreamEvent::Delta { text: "Hel".into() });
        acc.process_event(&StreamEvent::Delta { text: "lo".into() });
        assert_eq!(acc.text(), "Hello");
    }

    #[test]
    fn test_accumulator_ignores_events_after_terminal() {
        let mut acc = TextAccumulator::new();
        acc.process_event(&StreamEvent::Delta { text: "a".into() });
        acc.process_event(&StreamEvent::Done);
        acc.process_event(&StreamEvent::Delta { text: "b".into() });
        assert_eq!(acc.into_text(), "a");
    }

    #[test]
    fn test_accumulator_empty_is_whitespace_aware() {
        let mut acc = TextAccumulator::new();
        acc.process_event(&StreamEvent::Delta { text: "  \n".into() });
        assert!(acc.is_empty());
    }

    #[test]
    fn test_is_terminal() {
        assert!(StreamEvent::Done.is_terminal());
        assert!(StreamEvent::Error { message: "x".into() }.is_terminal());
        assert!(!StreamEvent::Delta { text: "x".into() }.is_terminal());
    }
}
