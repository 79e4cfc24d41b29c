use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;
use uuid::Uuid;

use crate::conversation::state::ConversationState;

/// Channel prefix Twilio puts in front of WhatsApp author addresses.
const WHATSAPP_PREFIX: &str = "whatsapp:";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Phone number must look like '+999999999' (9 to 15 digits), got '{0}'")]
    InvalidPhoneNumber(String),

    #[error("Unknown message role '{0}'")]
    UnknownRole(String),

    #[error("Unknown conversation status '{0}'")]
    UnknownStatus(String),

    #[error("Contact method must be either 'sms' or 'whatsapp', got '{0}'")]
    UnknownContactMethod(String),
}

// ────────────────────────────────────────────────────────────────────────────
// Enumerations
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl FromStr for Role {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(ValidationError::UnknownRole(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Active,
    Suspended,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationStatus::Active => "active",
            ConversationStatus::Suspended => "suspended",
        }
    }
}

impl FromStr for ConversationStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ConversationStatus::Active),
            "suspended" => Ok(ConversationStatus::Suspended),
            other => Err(ValidationError::UnknownStatus(other.to_string())),
        }
    }
}

/// How the user reaches the service. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactMethod {
    Sms,
    Whatsapp,
}

impl ContactMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContactMethod::Sms => "sms",
            ContactMethod::Whatsapp => "whatsapp",
        }
    }
}

impl FromStr for ContactMethod {
    type Err = ValidationError;

    /// Twilio sends `SMS` / `WHATSAPP`; stored values are lowercase.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sms" => Ok(ContactMethod::Sms),
            "whatsapp" => Ok(ContactMethod::Whatsapp),
            _ => Err(ValidationError::UnknownContactMethod(s.to_string())),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Phone number
// ────────────────────────────────────────────────────────────────────────────

/// A validated phone number: optional `+`, optional leading `1`, then 9 to 15 digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PhoneNumber(String);

impl PhoneNumber {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let trimmed = raw.trim();
        let candidate = trimmed.strip_prefix(WHATSAPP_PREFIX).unwrap_or(trimmed);
        let digits = candidate.strip_prefix('+').unwrap_or(candidate);

        // Optional country-code `1` in front of 9 to 15 digits.
        let significant = match digits.len() {
            16 => digits.strip_prefix('1').unwrap_or(digits),
            _ => digits,
        };
        let valid = (9..=15).contains(&significant.len())
            && digits.bytes().all(|b| b.is_ascii_digit());
        if !valid {
            return Err(ValidationError::InvalidPhoneNumber(raw.to_string()));
        }
        Ok(Self(candidate.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for PhoneNumber {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        PhoneNumber::parse(&value)
    }
}

impl From<PhoneNumber> for String {
    fn from(value: PhoneNumber) -> Self {
        value.0
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Domain records
// ────────────────────────────────────────────────────────────────────────────

/// One turn of the conversation, replayed verbatim to the language model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeRecord {
    pub id: Uuid,
    pub content: String,
    pub file_link: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ResumeRecord {
    pub fn new(content: String, file_link: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            content,
            file_link,
            created_at: Utc::now(),
        }
    }
}

/// Fields needed to create a conversation on first contact.
#[derive(Debug, Clone)]
pub struct NewConversation {
    pub conversation_id: String,
    pub phone_number: PhoneNumber,
    pub contact_method: ContactMethod,
}

/// The full per-user record, with messages and resumes in insertion order.
#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub id: Uuid,
    pub conversation_id: String,
    pub phone_number: PhoneNumber,
    pub status: ConversationStatus,
    pub contact_method: ContactMethod,
    pub is_resume_generated: bool,
    pub messages: Vec<ChatMessage>,
    pub information_summary: Option<String>,
    pub resumes: Vec<ResumeRecord>,
    pub user_name: Option<String>,
    /// Set while a resume pipeline run owns this conversation.
    pub resume_claimed_at: Option<DateTime<Utc>>,
    /// Message count recorded right after the last suspension notice was stored.
    pub suspension_notice_at: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn message_count(&self) -> i64 {
        self.messages.len() as i64
    }

    pub fn state(&self) -> ConversationState {
        ConversationState::derive(
            self.status,
            self.is_resume_generated,
            self.resume_claimed_at.is_some(),
        )
    }

    /// Assembles a domain record from its stored rows, validating every enum column.
    pub fn from_rows(
        row: ConversationRow,
        messages: Vec<MessageRow>,
        resumes: Vec<ResumeRow>,
    ) -> Result<Self, ValidationError> {
        let messages = messages
            .into_iter()
            .map(|m| {
                Ok(ChatMessage {
                    role: m.role.parse()?,
                    content: m.content,
                })
            })
            .collect::<Result<Vec<_>, ValidationError>>()?;

        let resumes = resumes
            .into_iter()
            .map(|r| ResumeRecord {
                id: r.id,
                content: r.content,
                file_link: r.file_link,
                created_at: r.created_at,
            })
            .collect();

        Ok(Self {
            id: row.id,
            conversation_id: row.conversation_id,
            phone_number: PhoneNumber::parse(&row.phone_number)?,
            status: row.status.parse()?,
            contact_method: row.contact_method.parse()?,
            is_resume_generated: row.is_resume_generated,
            messages,
            information_summary: row.information_summary,
            resumes,
            user_name: row.user_name,
            resume_claimed_at: row.resume_claimed_at,
            suspension_notice_at: row.suspension_notice_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Database rows
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, FromRow)]
pub struct ConversationRow {
    pub id: Uuid,
    pub conversation_id: String,
    pub phone_number: String,
    pub status: String,
    pub contact_method: String,
    pub is_resume_generated: bool,
    pub information_summary: Option<String>,
    pub user_name: Option<String>,
    pub resume_claimed_at: Option<DateTime<Utc>>,
    pub suspension_notice_at: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct MessageRow {
    pub id: i64,
    pub conversation_pk: Uuid,
    pub external_id: Option<String>,
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct ResumeRow {
    pub id: Uuid,
    pub conversation_pk: Uuid,
    pub content: String,
    pub file_link: Option<String>,
    pub created_at: DateTime<Utc>,
}
