use std::sync::Arc;

use crate::orchestrator::WebhookOrchestrator;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<WebhookOrchestrator>,
}
