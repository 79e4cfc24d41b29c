use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::conversation::{transition, ConversationEvent, ConversationStore, StoreError};
use crate::documents::DocumentAssembler;
use crate::errors::AppError;
use crate::jobs::ResumeJob;
use crate::llm_client::LanguageModel;
use crate::messaging::MessageSender;
use crate::models::conversation::{ChatMessage, Conversation, ResumeRecord};
use crate::shortener::LinkShortener;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeDelivery {
    pub user_name: String,
    pub file_name: String,
    pub short_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    Delivered(ResumeDelivery),
    AlreadyGenerated,
    ConversationMissing,
}

/// Summary → name → resume text → document → signed link → short link → notify.
///
/// The caller must hold the conversation's resume claim and pass its token. The
/// claim is refreshed before every slow stage and checked again before the
/// resume is stored, so a run that lost its claim stops before storing or
/// sending anything. On failure the run releases its own claim (never a newer one) and
/// leaves `is_resume_generated` untouched, so the next inbound message can start over.
pub struct ResumePipeline {
    store: Arc<dyn ConversationStore>,
    model: Arc<dyn LanguageModel>,
    sender: Arc<dyn MessageSender>,
    assembler: DocumentAssembler,
    shortener: Arc<dyn LinkShortener>,
}

impl ResumePipeline {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        model: Arc<dyn LanguageModel>,
        sender: Arc<dyn MessageSender>,
        assembler: DocumentAssembler,
        shortener: Arc<dyn LinkShortener>,
    ) -> Self {
        Self {
            store,
            model,
            sender,
            assembler,
            shortener,
        }
    }

    pub async fn run_job(&self, job: &ResumeJob) -> Result<PipelineOutcome, AppError> {
        self.run(&job.conversation_id, job.claim).await
    }

    /// Runs against a fresh read of the conversation; nothing is taken from the caller.
    pub async fn run(
        &self,
        conversation_id: &str,
        claim: Uuid,
    ) -> Result<PipelineOutcome, AppError> {
        let Some(conversation) = self.store.get(conversation_id).await? else {
            return Ok(PipelineOutcome::ConversationMissing);
        };
        if conversation.is_resume_generated {
            return Ok(PipelineOutcome::AlreadyGenerated);
        }

        match self.deliver(&conversation, claim).await {
            Ok(delivery) => Ok(PipelineOutcome::Delivered(delivery)),
            Err(e) => {
                error!("Resume pipeline failed for {conversation_id}: {e}");
                if transition(conversation.state(), ConversationEvent::PipelineFailed).is_ok() {
                    if let Err(release) =
                        self.store.release_resume_claim(conversation_id, claim).await
                    {
                        error!("Failed to release resume claim for {conversation_id}: {release}");
                    }
                }
                Err(e)
            }
        }
    }

    async fn deliver(
        &self,
        conversation: &Conversation,
        claim: Uuid,
    ) -> Result<ResumeDelivery, AppError> {
        let conversation_id = conversation.conversation_id.as_str();
        transition(conversation.state(), ConversationEvent::ResumeDelivered)?;

        info!(
            "Generating resume for {conversation_id} from {} messages",
            conversation.messages.len()
        );

        self.hold_claim(conversation_id, claim).await?;
        let summary = self.model.summarize(&conversation.messages).await?;
        self.store.save_summary(conversation_id, &summary).await?;

        self.hold_claim(conversation_id, claim).await?;
        let user_name = self.model.extract_name(&summary).await?.trim().to_string();
        self.store.save_user_name(conversation_id, &user_name).await?;

        self.hold_claim(conversation_id, claim).await?;
        let content = self
            .model
            .generate_resume(&summary, &conversation.phone_number)
            .await?;

        self.hold_claim(conversation_id, claim).await?;
        let document = self
            .assembler
            .assemble(&user_name, &content, Utc::now().date_naive())
            .await?;
        let short_url = self.shortener.shorten(&document.signed_url).await?;

        // Last check: only the current holder may store a resume.
        self.hold_claim(conversation_id, claim).await?;
        self.store
            .add_resume(
                conversation_id,
                &ResumeRecord::new(content, Some(short_url.clone())),
            )
            .await?;

        let text = ready_message(&user_name, &short_url);
        self.sender.send(conversation_id, &text).await?;
        self.store
            .append_message(conversation_id, &ChatMessage::assistant(text), None)
            .await?;

        self.store.mark_resume_generated(conversation_id).await?;
        info!("Resume {} delivered for {conversation_id}", document.file_name);

        Ok(ResumeDelivery {
            user_name,
            file_name: document.file_name,
            short_url,
        })
    }

    /// Restarts the claim TTL, or fails if another run has taken the claim over.
    async fn hold_claim(&self, conversation_id: &str, claim: Uuid) -> Result<(), StoreError> {
        if self.store.refresh_resume_claim(conversation_id, claim).await? {
            return Ok(());
        }
        warn!("Resume claim {claim} for {conversation_id} was superseded, stopping");
        Err(StoreError::ClaimLost {
            id: conversation_id.to_string(),
        })
    }
}

fn ready_message(user_name: &str, short_url: &str) -> String {
    format!("Hi {user_name}, your resume is ready. Click the link below to download it: {short_url}")
}
