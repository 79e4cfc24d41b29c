//! In-memory `ConversationStore` used by unit tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::conversation::store::{AppendOutcome, ConversationStore, StoreError};
use crate::models::conversation::{
    ChatMessage, Conversation, ConversationStatus, NewConversation, ResumeRecord,
};

#[derive(Default)]
pub struct MemoryConversationStore {
    records: Mutex<HashMap<Uuid, Record>>,
}

struct Record {
    conversation: Conversation,
    external_ids: Vec<String>,
    claim: Option<Uuid>,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    fn with_record<T>(
        &self,
        conversation_id: &str,
        f: impl FnOnce(&mut Record) -> T,
    ) -> Result<T, StoreError> {
        let mut records = self.records.lock().unwrap();
        let record = records
            .values_mut()
            .find(|r| r.conversation.conversation_id == conversation_id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "Conversation",
                id: conversation_id.to_string(),
            })?;
        let out = f(record);
        record.conversation.updated_at = Utc::now();
        Ok(out)
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn find_or_create(&self, new: &NewConversation) -> Result<Conversation, StoreError> {
        let mut records = self.records.lock().unwrap();

        if let Some(found) = records
            .values()
            .find(|r| r.conversation.conversation_id == new.conversation_id)
        {
            return Ok(found.conversation.clone());
        }

        if let Some(found) = records
            .values_mut()
            .find(|r| r.conversation.phone_number == new.phone_number)
        {
            found.conversation.conversation_id = new.conversation_id.clone();
            return Ok(found.conversation.clone());
        }

        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4(),
            conversation_id: new.conversation_id.clone(),
            phone_number: new.phone_number.clone(),
            status: ConversationStatus::Active,
            contact_method: new.contact_method,
            is_resume_generated: false,
            messages: Vec::new(),
            information_summary: None,
            resumes: Vec::new(),
            user_name: None,
            resume_claimed_at: None,
            suspension_notice_at: None,
            created_at: now,
            updated_at: now,
        };
        records.insert(
            conversation.id,
            Record {
                conversation: conversation.clone(),
                external_ids: Vec::new(),
                claim: None,
            },
        );
        Ok(conversation)
    }

    async fn get(&self, conversation_id: &str) -> Result<Option<Conversation>, StoreError> {
        let records = self.records.lock().unwrap();
        Ok(records
            .values()
            .find(|r| r.conversation.conversation_id == conversation_id)
            .map(|r| r.conversation.clone()))
    }

    async fn append_message(
        &self,
        conversation_id: &str,
        message: &ChatMessage,
        external_id: Option<&str>,
    ) -> Result<AppendOutcome, StoreError> {
        self.with_record(conversation_id, |record| {
            if let Some(external_id) = external_id {
                if record.external_ids.iter().any(|id| id == external_id) {
                    return AppendOutcome::Duplicate;
                }
                record.external_ids.push(external_id.to_string());
            }
            record.conversation.messages.push(message.clone());
            AppendOutcome::Appended {
                message_count: record.conversation.message_count(),
            }
        })
    }

    async fn suspend(&self, conversation_id: &str) -> Result<bool, StoreError> {
        self.with_record(conversation_id, |record| {
            let was_active = record.conversation.status == ConversationStatus::Active;
            record.conversation.status = ConversationStatus::Suspended;
            was_active
        })
    }

    async fn record_suspension_notice(
        &self,
        conversation_id: &str,
        message_count: i64,
    ) -> Result<(), StoreError> {
        self.with_record(conversation_id, |record| {
            record.conversation.suspension_notice_at = Some(message_count);
        })
    }

    async fn save_summary(&self, conversation_id: &str, summary: &str) -> Result<(), StoreError> {
        self.with_record(conversation_id, |record| {
            record.conversation.information_summary = Some(summary.to_string());
        })
    }

    async fn save_user_name(
        &self,
        conversation_id: &str,
        user_name: &str,
    ) -> Result<(), StoreError> {
        self.with_record(conversation_id, |record| {
            record.conversation.user_name = Some(user_name.to_string());
        })
    }

    async fn add_resume(
        &self,
        conversation_id: &str,
        resume: &ResumeRecord,
    ) -> Result<(), StoreError> {
        self.with_record(conversation_id, |record| {
            record.conversation.resumes.push(resume.clone());
        })
    }

    async fn try_claim_resume(
        &self,
        conversation_id: &str,
        stale_after: Duration,
    ) -> Result<Option<Uuid>, StoreError> {
        let stale_after =
            chrono::Duration::from_std(stale_after).unwrap_or_else(|_| chrono::Duration::days(365));
        self.with_record(conversation_id, |record| {
            let now = Utc::now();
            let free = match record.conversation.resume_claimed_at {
                None => true,
                Some(claimed_at) => now - claimed_at > stale_after,
            };
            if record.conversation.is_resume_generated || !free {
                return None;
            }
            let claim = Uuid::new_v4();
            record.claim = Some(claim);
            record.conversation.resume_claimed_at = Some(now);
            Some(claim)
        })
    }

    async fn refresh_resume_claim(
        &self,
        conversation_id: &str,
        claim: Uuid,
    ) -> Result<bool, StoreError> {
        self.with_record(conversation_id, |record| {
            if record.claim != Some(claim) || record.conversation.is_resume_generated {
                return false;
            }
            record.conversation.resume_claimed_at = Some(Utc::now());
            true
        })
    }

    async fn release_resume_claim(
        &self,
        conversation_id: &str,
        claim: Uuid,
    ) -> Result<(), StoreError> {
        self.with_record(conversation_id, |record| {
            if record.claim == Some(claim) && !record.conversation.is_resume_generated {
                record.claim = None;
                record.conversation.resume_claimed_at = None;
            }
        })
    }

    async fn mark_resume_generated(&self, conversation_id: &str) -> Result<(), StoreError> {
        self.with_record(conversation_id, |record| {
            record.conversation.is_resume_generated = true;
            record.claim = None;
            record.conversation.resume_claimed_at = None;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::conversation::{ContactMethod, PhoneNumber};

    fn new_conversation(conversation_id: &str, phone: &str) -> NewConversation {
        NewConversation {
            conversation_id: conversation_id.to_string(),
            phone_number: PhoneNumber::parse(phone).unwrap(),
            contact_method: ContactMethod::Sms,
        }
    }

    #[tokio::test]
    async fn test_find_or_create_is_idempotent() {
        let store = MemoryConversationStore::new();
        let first = store
            .find_or_create(&new_conversation("CONV1", "+15551234567"))
            .await
            .unwrap();
        let second = store
            .find_or_create(&new_conversation("CONV1", "+15551234567"))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(store.len(), 1);
        assert_eq!(first.status, ConversationStatus::Active);
        assert!(!first.is_resume_generated);
    }

    #[tokio::test]
    async fn test_known_phone_with_new_conversation_id_resolves_to_same_record() {
        let store = MemoryConversationStore::new();
        let original = store
            .find_or_create(&new_conversation("CONV1", "+15551234567"))
            .await
            .unwrap();
        let rebound = store
            .find_or_create(&new_conversation("CONV2", "+15551234567"))
            .await
            .unwrap();

        assert_eq!(original.id, rebound.id);
        assert_eq!(rebound.conversation_id, "CONV2");
        assert!(store.get("CONV1").await.unwrap().is_none());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_external_id_is_not_stored() {
        let store = MemoryConversationStore::new();
        store
            .find_or_create(&new_conversation("CONV1", "+15551234567"))
            .await
            .unwrap();

        let first = store
            .append_message("CONV1", &ChatMessage::user("hello"), Some("IM1"))
            .await
            .unwrap();
        let again = store
            .append_message("CONV1", &ChatMessage::user("hello"), Some("IM1"))
            .await
            .unwrap();

        assert_eq!(first, AppendOutcome::Appended { message_count: 1 });
        assert_eq!(again, AppendOutcome::Duplicate);
        let stored = store.get("CONV1").await.unwrap().unwrap();
        assert_eq!(stored.message_count(), 1);
    }

    #[tokio::test]
    async fn test_claim_is_exclusive_until_released() {
        let store = MemoryConversationStore::new();
        store
            .find_or_create(&new_conversation("CONV1", "+15551234567"))
            .await
            .unwrap();
        let ttl = Duration::from_secs(900);

        let claim = store.try_claim_resume("CONV1", ttl).await.unwrap().unwrap();
        assert!(store.try_claim_resume("CONV1", ttl).await.unwrap().is_none());

        store.release_resume_claim("CONV1", claim).await.unwrap();
        assert!(store.try_claim_resume("CONV1", ttl).await.unwrap().is_some());

        store.mark_resume_generated("CONV1").await.unwrap();
        assert!(store.try_claim_resume("CONV1", ttl).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_superseded_claim_cannot_release_or_refresh() {
        let store = MemoryConversationStore::new();
        store
            .find_or_create(&new_conversation("CONV1", "+15551234567"))
            .await
            .unwrap();
        let ttl = Duration::from_secs(900);

        let first = store.try_claim_resume("CONV1", ttl).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = store
            .try_claim_resume("CONV1", Duration::from_millis(1))
            .await
            .unwrap()
            .unwrap();
        assert_ne!(first, second);

        store.release_resume_claim("CONV1", first).await.unwrap();
        assert!(!store.refresh_resume_claim("CONV1", first).await.unwrap());
        assert!(store.get("CONV1").await.unwrap().unwrap().resume_claimed_at.is_some());
        assert!(store.try_claim_resume("CONV1", ttl).await.unwrap().is_none());

        assert!(store.refresh_resume_claim("CONV1", second).await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_conversation_is_not_found() {
        let store = MemoryConversationStore::new();
        let result = store
            .append_message("missing", &ChatMessage::user("hi"), None)
            .await;
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
    }
}
