// Conversation persistence and lifecycle.
// The store is pure data access; branching lives in the orchestrator.

#[cfg(test)]
pub mod memory;
pub mod postgres;
pub mod state;
pub mod store;

pub use postgres::PgConversationStore;
pub use state::{transition, ConversationEvent, ConversationState, InvalidTransition};
pub use store::{AppendOutcome, ConversationStore, StoreError};
