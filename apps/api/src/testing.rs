//! In-memory stand-ins for every external service, plus a `Harness` that wires
//! them into a real `WebhookOrchestrator` and `ResumePipeline`.

use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{
    DEFAULT_COMPLETED_NOTICE, DEFAULT_IN_PROGRESS_NOTICE, DEFAULT_MESSAGE_LIMIT,
    DEFAULT_SIGNED_URL_TTL_SECS, DEFAULT_SUSPENSION_NOTICE, RESUME_CLAIM_TTL,
};
use crate::conversation::memory::MemoryConversationStore;
use crate::conversation::ConversationStore;
use crate::documents::{BlobStore, DocumentAssembler, StorageError};
use crate::jobs::{JobQueue, QueueError, ResumeJob};
use crate::llm_client::{LanguageModel, LlmError};
use crate::messaging::{MessageSender, MessagingError, SendReceipt};
use crate::models::conversation::{
    ChatMessage, ContactMethod, Conversation, NewConversation, PhoneNumber,
};
use crate::orchestrator::{
    Dispatch, InboundMessage, Notices, OrchestratorSettings, ResumePipeline, WebhookOrchestrator,
};
use crate::shortener::{LinkShortener, ShortenerError};

const BLOB_HOST: &str = "https://blobs.test/";

// ────────────────────────────────────────────────────────────────────────────
// Blob store
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryBlobStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    uploaded_paths: Mutex<Vec<PathBuf>>,
    fail_uploads: bool,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every upload fails after the local path has been recorded.
    pub fn failing() -> Self {
        Self {
            fail_uploads: true,
            ..Self::default()
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn uploaded_paths(&self) -> Vec<PathBuf> {
        self.uploaded_paths.lock().unwrap().clone()
    }

    /// Resolves a URL produced by `presign_get` back to the stored bytes.
    pub fn fetch_signed(&self, url: &str) -> Option<Vec<u8>> {
        let rest = url.strip_prefix(BLOB_HOST)?;
        let key = rest.split('?').next()?;
        self.objects.lock().unwrap().get(key).cloned()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload_file(
        &self,
        key: &str,
        path: &Path,
        _content_type: &str,
    ) -> Result<(), StorageError> {
        self.uploaded_paths.lock().unwrap().push(path.to_path_buf());
        if self.fail_uploads {
            return Err(StorageError::S3("simulated upload failure".to_string()));
        }
        let bytes = std::fs::read(path)?;
        self.objects.lock().unwrap().insert(key.to_string(), bytes);
        Ok(())
    }

    async fn presign_get(&self, key: &str, expires_in: Duration) -> Result<String, StorageError> {
        if !self.objects.lock().unwrap().contains_key(key) {
            return Err(StorageError::Presign(format!("no object {key}")));
        }
        Ok(format!("{BLOB_HOST}{key}?expires={}", expires_in.as_secs()))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Language model
// ────────────────────────────────────────────────────────────────────────────

/// Replays queued interview replies and returns fixed pipeline outputs.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<String>>,
    converse_calls: Mutex<Vec<Vec<ChatMessage>>>,
    summarize_calls: AtomicUsize,
    resume_calls: Mutex<Vec<(String, String)>>,
    fail_converse: AtomicBool,
    converse_delay: Mutex<Duration>,
    pub summary: String,
    pub name: String,
    pub resume: String,
}

impl Default for ScriptedModel {
    fn default() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            converse_calls: Mutex::new(Vec::new()),
            summarize_calls: AtomicUsize::new(0),
            resume_calls: Mutex::new(Vec::new()),
            fail_converse: AtomicBool::new(false),
            converse_delay: Mutex::new(Duration::ZERO),
            summary: "Name: Jane Doe. Forklift operator at Acme 2019-2024.".to_string(),
            name: "Jane Doe".to_string(),
            resume: "JANE DOE\n+15551234567\n\nEXPERIENCE\nForklift operator, Acme".to_string(),
        }
    }
}

impl ScriptedModel {
    pub fn push_reply(&self, reply: &str) {
        self.replies.lock().unwrap().push_back(reply.to_string());
    }

    pub fn fail_converse(&self) {
        self.fail_converse.store(true, Ordering::SeqCst);
    }

    /// Each `converse` call waits this long before answering.
    pub fn delay_converse(&self, delay: Duration) {
        *self.converse_delay.lock().unwrap() = delay;
    }

    pub fn converse_calls(&self) -> Vec<Vec<ChatMessage>> {
        self.converse_calls.lock().unwrap().clone()
    }

    pub fn summarize_calls(&self) -> usize {
        self.summarize_calls.load(Ordering::SeqCst)
    }

    pub fn resume_calls(&self) -> Vec<(String, String)> {
        self.resume_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn converse(&self, history: &[ChatMessage]) -> Result<String, LlmError> {
        self.converse_calls.lock().unwrap().push(history.to_vec());
        let delay = *self.converse_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_converse.load(Ordering::SeqCst) {
            return Err(LlmError::Api {
                status: 529,
                message: "overloaded".to_string(),
            });
        }
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(LlmError::EmptyContent)
    }

    async fn summarize(&self, _history: &[ChatMessage]) -> Result<String, LlmError> {
        self.summarize_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.summary.clone())
    }

    async fn generate_resume(
        &self,
        summary: &str,
        phone_number: &PhoneNumber,
    ) -> Result<String, LlmError> {
        self.resume_calls
            .lock()
            .unwrap()
            .push((summary.to_string(), phone_number.to_string()));
        Ok(self.resume.clone())
    }

    async fn extract_name(&self, _summary: &str) -> Result<String, LlmError> {
        Ok(format!(" {}\n", self.name))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Messaging, shortener, queue
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingSender {
    /// Texts sent to one conversation, in order.
    pub fn texts(&self, conversation_id: &str) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(cid, _)| cid == conversation_id)
            .map(|(_, text)| text.clone())
            .collect()
    }
}

#[async_trait]
impl MessageSender for RecordingSender {
    async fn send(&self, conversation_id: &str, text: &str) -> Result<SendReceipt, MessagingError> {
        let mut sent = self.sent.lock().unwrap();
        sent.push((conversation_id.to_string(), text.to_string()));
        Ok(SendReceipt {
            sid: format!("IM{}", sent.len()),
        })
    }
}

#[derive(Default)]
pub struct CountingShortener {
    calls: AtomicUsize,
}

impl CountingShortener {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LinkShortener for CountingShortener {
    async fn shorten(&self, _url: &str) -> Result<String, ShortenerError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("https://tiny.test/{n}"))
    }
}

#[derive(Default)]
pub struct MemoryJobQueue {
    jobs: Mutex<VecDeque<ResumeJob>>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pop(&self) -> Option<ResumeJob> {
        self.jobs.lock().unwrap().pop_front()
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, job: &ResumeJob) -> Result<(), QueueError> {
        self.jobs.lock().unwrap().push_back(job.clone());
        Ok(())
    }

    async fn consume(&self, timeout: Duration) -> Result<Option<ResumeJob>, QueueError> {
        if let Some(job) = self.pop() {
            return Ok(Some(job));
        }
        // Stand in for BLPOP blocking, briefly, so callers yield.
        tokio::time::sleep(timeout.min(Duration::from_millis(5))).await;
        Ok(None)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Harness
// ────────────────────────────────────────────────────────────────────────────

pub fn inbound(message_id: &str, conversation_id: &str, phone: &str, body: &str) -> InboundMessage {
    InboundMessage {
        message_id: message_id.to_string(),
        conversation_id: conversation_id.to_string(),
        author: PhoneNumber::parse(phone).unwrap(),
        body: body.to_string(),
        contact_method: ContactMethod::Sms,
    }
}

pub fn default_notices() -> Notices {
    Notices {
        suspension: DEFAULT_SUSPENSION_NOTICE.to_string(),
        completed: DEFAULT_COMPLETED_NOTICE.to_string(),
        in_progress: DEFAULT_IN_PROGRESS_NOTICE.to_string(),
    }
}

pub struct HarnessBuilder {
    message_limit: i64,
    failing_uploads: bool,
    queued: bool,
}

impl HarnessBuilder {
    pub fn message_limit(mut self, limit: i64) -> Self {
        self.message_limit = limit;
        self
    }

    pub fn failing_uploads(mut self) -> Self {
        self.failing_uploads = true;
        self
    }

    pub fn queued(mut self) -> Self {
        self.queued = true;
        self
    }

    pub fn build(self) -> Harness {
        let store = Arc::new(MemoryConversationStore::new());
        let model = Arc::new(ScriptedModel::default());
        let sender = Arc::new(RecordingSender::default());
        let shortener = Arc::new(CountingShortener::default());
        let queue = Arc::new(MemoryJobQueue::new());
        let blobs = Arc::new(if self.failing_uploads {
            MemoryBlobStore::failing()
        } else {
            MemoryBlobStore::new()
        });

        let assembler = DocumentAssembler::new(
            blobs.clone(),
            Duration::from_secs(DEFAULT_SIGNED_URL_TTL_SECS),
        );
        let pipeline = Arc::new(ResumePipeline::new(
            store.clone(),
            model.clone(),
            sender.clone(),
            assembler,
            shortener.clone(),
        ));
        let dispatch = if self.queued {
            Dispatch::Queue(queue.clone())
        } else {
            Dispatch::Inline
        };
        let orchestrator = Arc::new(WebhookOrchestrator::new(
            store.clone(),
            model.clone(),
            sender.clone(),
            pipeline.clone(),
            dispatch,
            OrchestratorSettings {
                message_limit: self.message_limit,
                claim_ttl: RESUME_CLAIM_TTL,
                notices: default_notices(),
            },
        ));

        Harness {
            store,
            model,
            sender,
            shortener,
            queue,
            blobs,
            pipeline,
            orchestrator,
        }
    }
}

pub struct Harness {
    pub store: Arc<MemoryConversationStore>,
    pub model: Arc<ScriptedModel>,
    pub sender: Arc<RecordingSender>,
    pub shortener: Arc<CountingShortener>,
    pub queue: Arc<MemoryJobQueue>,
    pub blobs: Arc<MemoryBlobStore>,
    pub pipeline: Arc<ResumePipeline>,
    pub orchestrator: Arc<WebhookOrchestrator>,
}

impl Harness {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> HarnessBuilder {
        HarnessBuilder {
            message_limit: DEFAULT_MESSAGE_LIMIT,
            failing_uploads: false,
            queued: false,
        }
    }

    pub fn notices(&self) -> Notices {
        default_notices()
    }

    pub async fn conversation(&self, conversation_id: &str) -> Conversation {
        self.store
            .get(conversation_id)
            .await
            .unwrap()
            .unwrap_or_else(|| panic!("conversation {conversation_id} not stored"))
    }

    async fn create(&self, conversation_id: &str, phone: &str) {
        self.store
            .find_or_create(&NewConversation {
                conversation_id: conversation_id.to_string(),
                phone_number: PhoneNumber::parse(phone).unwrap(),
                contact_method: ContactMethod::Sms,
            })
            .await
            .unwrap();
    }

    /// A conversation whose last assistant turn carried the end marker.
    pub async fn seed_finished_interview(&self, conversation_id: &str, phone: &str) {
        self.create(conversation_id, phone).await;
        for message in [
            ChatMessage::user("My name is Jane Doe"),
            ChatMessage::assistant("Thanks Jane. Where have you worked?"),
            ChatMessage::user("Forklift operator at Acme, 2019 to 2024. That's all."),
            ChatMessage::assistant("Thanks! <END>"),
        ] {
            self.store
                .append_message(conversation_id, &message, None)
                .await
                .unwrap();
        }
    }

    /// `count` alternating user/assistant messages.
    pub async fn seed_history(&self, conversation_id: &str, phone: &str, count: usize) {
        self.create(conversation_id, phone).await;
        for i in 0..count {
            let message = if i % 2 == 0 {
                ChatMessage::user(format!("message {i}"))
            } else {
                ChatMessage::assistant(format!("reply {i}"))
            };
            self.store
                .append_message(conversation_id, &message, None)
                .await
                .unwrap();
        }
    }
}
