use axum::{extract::State, Form, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::errors::AppError;
use crate::models::conversation::{ContactMethod, PhoneNumber};
use crate::orchestrator::InboundMessage;
use crate::state::AppState;

/// Twilio Conversations `onMessageAdded` webhook payload.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InboundForm {
    pub message_sid: String,
    pub account_sid: String,
    pub body: String,
    pub conversation_sid: String,
    pub author: String,
    pub source: String,
    #[serde(default)]
    pub date_created: Option<String>,
    #[serde(default)]
    pub retry_count: Option<u32>,
}

impl InboundForm {
    fn into_inbound(self) -> Result<InboundMessage, AppError> {
        let author = PhoneNumber::parse(&self.author)?;
        let contact_method = self.source.parse().unwrap_or_else(|_| {
            warn!(
                "Unknown message source '{}' on {}, treating as SMS",
                self.source, self.message_sid
            );
            ContactMethod::Sms
        });

        Ok(InboundMessage {
            message_id: self.message_sid,
            conversation_id: self.conversation_sid,
            author,
            body: self.body,
            contact_method,
        })
    }
}

/// POST /sms
/// Validates the payload, then acknowledges regardless of how processing went;
/// failures are logged so the provider does not retry into the same error.
pub async fn handle_sms(
    State(state): State<AppState>,
    Form(form): Form<InboundForm>,
) -> Result<Json<Value>, AppError> {
    info!(
        "Inbound message {} on {} (account {}, created {}, retry {})",
        form.message_sid,
        form.conversation_sid,
        form.account_sid,
        form.date_created.as_deref().unwrap_or("-"),
        form.retry_count.unwrap_or(0)
    );

    let inbound = form.into_inbound()?;
    let message_id = inbound.message_id.clone();

    match state.orchestrator.handle(inbound).await {
        Ok(outcome) => info!("Message {message_id} handled: {outcome:?}"),
        Err(e) => error!("Failed to process message {message_id}: {e}"),
    }

    Ok(Json(json!({ "message": "success" })))
}
