//! Conversation state machine.
//!
//! The stored record keeps `status`, `is_resume_generated` and the pipeline claim
//! as separate columns; `ConversationState` is the single view the orchestrator
//! branches on, and `transition` is the table of moves it may make.

use serde::Serialize;
use thiserror::Error;

use crate::models::conversation::ConversationStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    /// Interview in progress; inbound messages get a model turn.
    Active,
    /// End marker seen and a pipeline run holds the claim.
    AwaitingResume,
    /// Resume delivered. Terminal for the interview.
    Completed,
    /// Message limit exceeded. Terminal unless reset outside this system.
    Suspended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationEvent {
    MessageLimitExceeded,
    EndMarkerDetected,
    ResumeDelivered,
    PipelineFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid conversation transition from {from:?} on {event:?}")]
pub struct InvalidTransition {
    pub from: ConversationState,
    pub event: ConversationEvent,
}

impl ConversationState {
    /// Suspension wins over everything else, then completion, then the claim.
    pub fn derive(status: ConversationStatus, is_resume_generated: bool, claimed: bool) -> Self {
        match (status, is_resume_generated, claimed) {
            (ConversationStatus::Suspended, _, _) => ConversationState::Suspended,
            (_, true, _) => ConversationState::Completed,
            (_, false, true) => ConversationState::AwaitingResume,
            (_, false, false) => ConversationState::Active,
        }
    }
}

pub fn transition(
    from: ConversationState,
    event: ConversationEvent,
) -> Result<ConversationState, InvalidTransition> {
    use ConversationEvent::*;
    use ConversationState::*;

    match (from, event) {
        (Active | AwaitingResume | Completed, MessageLimitExceeded) => Ok(Suspended),
        (Active, EndMarkerDetected) => Ok(AwaitingResume),
        (AwaitingResume, ResumeDelivered) => Ok(Completed),
        (AwaitingResume, PipelineFailed) => Ok(Active),
        (from, event) => Err(InvalidTransition { from, event }),
    }
}
