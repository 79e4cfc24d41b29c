use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::jobs::{JobQueue, ResumeJob};
use crate::orchestrator::pipeline::{PipelineOutcome, ResumePipeline};

const POLL_TIMEOUT: Duration = Duration::from_secs(5);
const ERROR_BACKOFF: Duration = Duration::from_secs(2);

/// Consumes resume jobs until `shutdown` flips to true. The flag is checked
/// between polls so a popped job is always processed before exiting.
pub async fn run_worker(
    queue: Arc<dyn JobQueue>,
    pipeline: Arc<ResumePipeline>,
    shutdown: watch::Receiver<bool>,
) {
    info!("Resume worker started");
    while !*shutdown.borrow() {
        match queue.consume(POLL_TIMEOUT).await {
            Ok(Some(job)) => process_job(&pipeline, job).await,
            Ok(None) => {}
            Err(e) => {
                error!("Failed to read from resume queue: {e}");
                tokio::time::sleep(ERROR_BACKOFF).await;
            }
        }
    }
    info!("Resume worker stopped");
}

pub async fn process_job(pipeline: &ResumePipeline, job: ResumeJob) {
    info!(
        "Processing resume job for {} ({} messages at enqueue, queued at {})",
        job.conversation_id,
        job.messages.len(),
        job.enqueued_at
    );

    match pipeline.run_job(&job).await {
        Ok(PipelineOutcome::Delivered(delivery)) => info!(
            "Resume delivered to {} for {}",
            job.conversation_id, delivery.user_name
        ),
        Ok(PipelineOutcome::AlreadyGenerated) => {
            info!("Skipping job for {}: resume already generated", job.conversation_id)
        }
        Ok(PipelineOutcome::ConversationMissing) => {
            warn!("Skipping job for {}: conversation not found", job.conversation_id)
        }
        Err(e) => error!("Resume job for {} failed: {e}", job.conversation_id),
    }
}
