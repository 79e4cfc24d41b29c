pub mod locks;
pub mod pipeline;
pub mod webhook;

pub use pipeline::ResumePipeline;
pub use webhook::{
    Dispatch, InboundMessage, Notices, OrchestratorSettings, Outcome, WebhookOrchestrator,
};
