//! Per-message control flow for the interview.
//!
//! Every inbound provider event goes through [`WebhookOrchestrator::handle`]:
//! persist the message, enforce the message limit, then branch on the
//! conversation state (interview turn, resume pipeline, or a fixed notice).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::conversation::{
    transition, AppendOutcome, ConversationEvent, ConversationState, ConversationStore,
};
use crate::errors::AppError;
use crate::jobs::{JobQueue, ResumeJob};
use crate::llm_client::prompts::END_MARKER;
use crate::llm_client::LanguageModel;
use crate::messaging::MessageSender;
use crate::models::conversation::{
    ChatMessage, ContactMethod, Conversation, NewConversation, PhoneNumber,
};
use crate::orchestrator::locks::ConversationLocks;
use crate::orchestrator::pipeline::{PipelineOutcome, ResumePipeline};

/// A validated inbound message event.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Provider message id, used to drop redeliveries.
    pub message_id: String,
    pub conversation_id: String,
    pub author: PhoneNumber,
    pub body: String,
    pub contact_method: ContactMethod,
}

/// What `handle` did with an event. Only used for logging and tests; the
/// provider always gets the same acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Duplicate,
    Suspended,
    SuspensionNoticeSent,
    SuspensionNoticeSkipped,
    Replied,
    ResumeGenerated,
    ResumeQueued,
    ResumeInProgress,
    AlreadyComplete,
}

/// Where the resume pipeline runs once the end marker is seen.
#[derive(Clone)]
pub enum Dispatch {
    /// Inside the webhook request.
    Inline,
    /// On the background worker.
    Queue(Arc<dyn JobQueue>),
}

/// Fixed user-facing texts. None of them are written to the history except the
/// suspension notice.
#[derive(Debug, Clone)]
pub struct Notices {
    pub suspension: String,
    pub completed: String,
    pub in_progress: String,
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Suspend once the stored message count goes above this.
    pub message_limit: i64,
    /// A pipeline claim older than this is considered abandoned.
    pub claim_ttl: Duration,
    pub notices: Notices,
}

pub struct WebhookOrchestrator {
    store: Arc<dyn ConversationStore>,
    model: Arc<dyn LanguageModel>,
    sender: Arc<dyn MessageSender>,
    pipeline: Arc<ResumePipeline>,
    dispatch: Dispatch,
    settings: OrchestratorSettings,
    locks: ConversationLocks,
}

impl WebhookOrchestrator {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        model: Arc<dyn LanguageModel>,
        sender: Arc<dyn MessageSender>,
        pipeline: Arc<ResumePipeline>,
        dispatch: Dispatch,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            store,
            model,
            sender,
            pipeline,
            dispatch,
            settings,
            locks: ConversationLocks::new(),
        }
    }

    pub async fn handle(&self, inbound: InboundMessage) -> Result<Outcome, AppError> {
        // Keyed by the user, since one record can move between provider ids.
        let _guard = self.locks.acquire(inbound.author.as_str()).await;

        let conversation = self
            .store
            .find_or_create(&NewConversation {
                conversation_id: inbound.conversation_id.clone(),
                phone_number: inbound.author.clone(),
                contact_method: inbound.contact_method,
            })
            .await?;
        let conversation_id = conversation.conversation_id.as_str();
        let state = self.current_state(&conversation);

        let appended = self
            .store
            .append_message(
                conversation_id,
                &ChatMessage::user(inbound.body.as_str()),
                Some(&inbound.message_id),
            )
            .await?;
        let message_count = match appended {
            AppendOutcome::Appended { message_count } => message_count,
            AppendOutcome::Duplicate => {
                info!(
                    "Ignoring redelivered message {} for {conversation_id}",
                    inbound.message_id
                );
                return Ok(Outcome::Duplicate);
            }
        };
        debug!("{conversation_id} is {state:?} with {message_count} messages");

        if message_count > self.settings.message_limit && state != ConversationState::Suspended {
            transition(state, ConversationEvent::MessageLimitExceeded)?;
            if self.store.suspend(conversation_id).await? {
                warn!(
                    "Suspended {conversation_id} ({}) after {message_count} messages",
                    conversation.phone_number
                );
            }
            self.send_suspension_notice(&conversation, message_count)
                .await?;
            return Ok(Outcome::Suspended);
        }

        match state {
            ConversationState::Suspended => {
                self.send_suspension_notice(&conversation, message_count)
                    .await
            }
            ConversationState::Completed => {
                self.sender
                    .send(conversation_id, &self.settings.notices.completed)
                    .await?;
                Ok(Outcome::AlreadyComplete)
            }
            ConversationState::AwaitingResume => {
                self.sender
                    .send(conversation_id, &self.settings.notices.in_progress)
                    .await?;
                Ok(Outcome::ResumeInProgress)
            }
            ConversationState::Active => self.interview_turn(conversation_id).await,
        }
    }

    /// Like `Conversation::state`, but a claim past its TTL no longer counts.
    fn current_state(&self, conversation: &Conversation) -> ConversationState {
        let claimed = conversation.resume_claimed_at.is_some_and(|claimed_at| {
            (Utc::now() - claimed_at)
                .to_std()
                .map(|age| age < self.settings.claim_ttl)
                .unwrap_or(true)
        });
        ConversationState::derive(conversation.status, conversation.is_resume_generated, claimed)
    }

    /// Sends the notice unless one was already stored for the current history.
    async fn send_suspension_notice(
        &self,
        conversation: &Conversation,
        message_count: i64,
    ) -> Result<Outcome, AppError> {
        let conversation_id = conversation.conversation_id.as_str();
        if conversation
            .suspension_notice_at
            .is_some_and(|noticed_at| noticed_at >= message_count)
        {
            return Ok(Outcome::SuspensionNoticeSkipped);
        }

        let notice = self.settings.notices.suspension.as_str();
        self.sender.send(conversation_id, notice).await?;
        let noticed_at = match self
            .store
            .append_message(conversation_id, &ChatMessage::assistant(notice), None)
            .await?
        {
            AppendOutcome::Appended { message_count } => message_count,
            AppendOutcome::Duplicate => message_count,
        };
        self.store
            .record_suspension_notice(conversation_id, noticed_at)
            .await?;

        Ok(Outcome::SuspensionNoticeSent)
    }

    async fn interview_turn(&self, conversation_id: &str) -> Result<Outcome, AppError> {
        let conversation = self
            .store
            .get(conversation_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Conversation {conversation_id}")))?;

        let reply = self.model.converse(&conversation.messages).await?;
        self.store
            .append_message(conversation_id, &ChatMessage::assistant(reply.as_str()), None)
            .await?;

        if !reply.contains(END_MARKER) {
            self.sender.send(conversation_id, &reply).await?;
            return Ok(Outcome::Replied);
        }

        let visible = reply.replace(END_MARKER, "");
        let visible = visible.trim();
        if !visible.is_empty() {
            self.sender.send(conversation_id, visible).await?;
        }

        transition(ConversationState::Active, ConversationEvent::EndMarkerDetected)?;
        let Some(claim) = self
            .store
            .try_claim_resume(conversation_id, self.settings.claim_ttl)
            .await?
        else {
            info!("Resume for {conversation_id} is already being generated");
            return Ok(Outcome::ResumeInProgress);
        };
        info!("Interview finished for {conversation_id}, starting resume generation");

        match &self.dispatch {
            Dispatch::Inline => match self.pipeline.run(conversation_id, claim).await? {
                PipelineOutcome::Delivered(_) => Ok(Outcome::ResumeGenerated),
                PipelineOutcome::AlreadyGenerated => Ok(Outcome::AlreadyComplete),
                PipelineOutcome::ConversationMissing => Err(AppError::NotFound(format!(
                    "Conversation {conversation_id}"
                ))),
            },
            Dispatch::Queue(queue) => {
                let snapshot = self
                    .store
                    .get(conversation_id)
                    .await?
                    .unwrap_or(conversation);
                let job = ResumeJob::for_conversation(&snapshot, claim);
                if let Err(e) = queue.enqueue(&job).await {
                    self.store.release_resume_claim(conversation_id, claim).await?;
                    return Err(e.into());
                }
                Ok(Outcome::ResumeQueued)
            }
        }
    }
}
