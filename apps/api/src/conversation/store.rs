use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::conversation::{
    ChatMessage, Conversation, NewConversation, ResumeRecord, ValidationError,
};

/// Errors that can occur during conversation persistence.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The resume claim expired and was taken over, or the resume was generated.
    #[error("resume claim for {id} is no longer held")]
    ClaimLost { id: String },

    /// A stored row no longer satisfies the typed model.
    #[error("corrupt record {id}: {source}")]
    Corrupt {
        id: String,
        #[source]
        source: ValidationError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Stored; carries the conversation's message count afterwards.
    Appended { message_count: i64 },
    /// The provider message id was already stored (webhook redelivery).
    Duplicate,
}

/// Per-conversation data access. Implementations must keep message order and
/// must never flip `is_resume_generated` back to false.
///
/// Every mutation is keyed by the provider `conversation_id`.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Returns the record for `conversation_id`, or for the phone number when the
    /// provider opened a new conversation for a known user (the record is rebound
    /// to the new id). Creates it with defaults otherwise.
    async fn find_or_create(&self, new: &NewConversation) -> Result<Conversation, StoreError>;

    async fn get(&self, conversation_id: &str) -> Result<Option<Conversation>, StoreError>;

    /// Appends one message. `external_id` is the provider message id for inbound
    /// messages; a repeated id is reported as `Duplicate` and not stored.
    async fn append_message(
        &self,
        conversation_id: &str,
        message: &ChatMessage,
        external_id: Option<&str>,
    ) -> Result<AppendOutcome, StoreError>;

    /// active → suspended. Returns false when the conversation was already suspended.
    async fn suspend(&self, conversation_id: &str) -> Result<bool, StoreError>;

    async fn record_suspension_notice(
        &self,
        conversation_id: &str,
        message_count: i64,
    ) -> Result<(), StoreError>;

    /// Overwrites the information summary.
    async fn save_summary(&self, conversation_id: &str, summary: &str) -> Result<(), StoreError>;

    async fn save_user_name(&self, conversation_id: &str, user_name: &str)
        -> Result<(), StoreError>;

    async fn add_resume(
        &self,
        conversation_id: &str,
        resume: &ResumeRecord,
    ) -> Result<(), StoreError>;

    /// Compare-and-swap on the pipeline claim. Succeeds only when the resume is not
    /// generated and no claim younger than `stale_after` exists, and returns the
    /// token that identifies the new claim holder.
    async fn try_claim_resume(
        &self,
        conversation_id: &str,
        stale_after: Duration,
    ) -> Result<Option<Uuid>, StoreError>;

    /// Restarts the claim's TTL. Returns false when `claim` is no longer the
    /// current holder or the resume was generated meanwhile.
    async fn refresh_resume_claim(
        &self,
        conversation_id: &str,
        claim: Uuid,
    ) -> Result<bool, StoreError>;

    /// Drops the claim if `claim` still holds it; a superseded token is a no-op.
    async fn release_resume_claim(
        &self,
        conversation_id: &str,
        claim: Uuid,
    ) -> Result<(), StoreError>;

    /// Sets `is_resume_generated` and drops any claim.
    async fn mark_resume_generated(&self, conversation_id: &str) -> Result<(), StoreError>;
}
