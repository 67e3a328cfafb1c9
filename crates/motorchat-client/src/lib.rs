//! Client side of the marketplace chat: optimistic send reconciliation,
//! typing debounce and a WebSocket session to the gateway.

pub mod error;
pub mod reconcile;
pub mod session;
pub mod typing;

pub use error::ClientError;
pub use reconcile::{Conversation, PendingMessage, PendingState};
pub use session::ChatSession;
pub use typing::TypingNotifier;
