//! confab-session: chat session controller
//!
//! This crate orchestrates message submission, daily quota enforcement,
//! optimistic persistence, stream consumption, and cancellation into the
//! single consistent state machine a view layer observes.

pub mod error;
pub mod events;
pub mod generate;
pub mod handle;
pub mod quota;
pub mod session;
pub mod store;
pub mod types;

pub use error::{Error, Result};
pub use events::SessionEvent;
pub use generate::{GenerateRequest, Generator, SseGenerator, Turn};
pub use handle::SessionHandle;
pub use quota::{ConsumeOutcome, DAILY_MESSAGE_LIMIT, MemoryLedger, QuotaLedger, QuotaSnapshot};
pub use session::{Phase, Session, SessionState, title_from_message};
pub use store::ConversationStore;
pub use types::{ChatMessage, Conversation, Feedback, MessageId, Role};
