//! Outbound messaging through the Twilio Conversations REST API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

const TWILIO_CONVERSATIONS_URL: &str = "https://conversations.twilio.com/v1/Conversations";

#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Twilio API error (status {status}): {message}")]
    Api { status: u16, message: String },
}

/// Confirmation returned by the provider for a delivered message.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SendReceipt {
    pub sid: String,
}

/// Delivers text to the participant(s) of a provider conversation.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, conversation_id: &str, text: &str) -> Result<SendReceipt, MessagingError>;
}

#[derive(Debug, Deserialize)]
struct TwilioError {
    message: String,
}

#[derive(Clone)]
pub struct TwilioClient {
    http: Client,
    account_sid: String,
    auth_token: String,
}

impl TwilioClient {
    pub fn new(account_sid: String, auth_token: String) -> Result<Self, MessagingError> {
        let http = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            http,
            account_sid,
            auth_token,
        })
    }

    fn messages_url(conversation_id: &str) -> String {
        format!("{TWILIO_CONVERSATIONS_URL}/{conversation_id}/Messages")
    }
}

#[async_trait]
impl MessageSender for TwilioClient {
    async fn send(&self, conversation_id: &str, text: &str) -> Result<SendReceipt, MessagingError> {
        let response = self
            .http
            .post(Self::messages_url(conversation_id))
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("Body", text)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<TwilioError>(&body)
                .map(|e| e.message)
                .unwrap_or(body);
            return Err(MessagingError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let receipt: SendReceipt = response.json().await?;
        debug!("Sent message {} to conversation {conversation_id}", receipt.sid);
        Ok(receipt)
    }
}
