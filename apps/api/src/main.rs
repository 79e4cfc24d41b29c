mod config;
mod conversation;
mod db;
mod documents;
mod errors;
mod jobs;
mod llm_client;
mod messaging;
mod models;
mod orchestrator;
mod routes;
mod shortener;
mod state;
#[cfg(test)]
mod testing;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use aws_config::Region;
use aws_sdk_s3::config::Credentials;
use tokio::sync::watch;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{Config, DispatchMode, RESUME_CLAIM_TTL};
use crate::conversation::PgConversationStore;
use crate::db::{create_pool, run_migrations};
use crate::documents::{DocumentAssembler, S3BlobStore};
use crate::jobs::RedisJobQueue;
use crate::llm_client::LlmClient;
use crate::messaging::TwilioClient;
use crate::orchestrator::{Dispatch, OrchestratorSettings, ResumePipeline, WebhookOrchestrator};
use crate::routes::build_router;
use crate::shortener::TinyUrlClient;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_CRATE_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting resume SMS service v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL
    let db = create_pool(&config.database_url).await?;
    run_migrations(&db).await?;
    let store = Arc::new(PgConversationStore::new(db.clone()));

    // Initialize S3 / MinIO
    let s3 = build_s3_client(&config).await;
    info!("S3 client initialized (bucket: {})", config.s3_bucket);
    let assembler = DocumentAssembler::new(
        Arc::new(S3BlobStore::new(s3, config.s3_bucket.clone())),
        config.signed_url_ttl,
    );

    // Initialize outbound clients
    let llm = Arc::new(LlmClient::new(config.anthropic_api_key.clone())?);
    info!("LLM client initialized (model: {})", llm_client::MODEL);
    let sender = Arc::new(TwilioClient::new(
        config.twilio_account_sid.clone(),
        config.twilio_auth_token.clone(),
    )?);
    let shortener = Arc::new(TinyUrlClient::new(config.tinyurl_api_token.clone())?);

    let pipeline = Arc::new(ResumePipeline::new(
        store.clone(),
        llm.clone(),
        sender.clone(),
        assembler,
        shortener,
    ));

    // Resume dispatch: inline in the request, or through the Redis-backed worker
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (dispatch, worker) = match config.dispatch {
        DispatchMode::Inline => (Dispatch::Inline, None),
        DispatchMode::Queue => {
            let redis_url = config
                .redis_url
                .as_deref()
                .context("REDIS_URL is required when RESUME_DISPATCH=queue")?;
            let queue = Arc::new(
                RedisJobQueue::connect(redis_url, config.resume_queue_key.clone()).await?,
            );
            let worker = tokio::spawn(jobs::worker::run_worker(
                queue.clone(),
                pipeline.clone(),
                shutdown_rx,
            ));
            (Dispatch::Queue(queue), Some(worker))
        }
    };
    info!(
        "Resume dispatch mode: {:?} (claim TTL {:?}, slowest model call {:?})",
        config.dispatch,
        RESUME_CLAIM_TTL,
        llm_client::MAX_CALL_DURATION
    );

    let orchestrator = Arc::new(WebhookOrchestrator::new(
        store,
        llm,
        sender,
        pipeline,
        dispatch,
        OrchestratorSettings {
            message_limit: config.message_limit,
            claim_ttl: RESUME_CLAIM_TTL,
            notices: config.notices(),
        },
    ));

    // Build router
    let app = build_router(AppState { orchestrator })
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down");
    shutdown_tx.send(true).ok();
    if let Some(worker) = worker {
        worker.await.ok();
    }
    db.close().await;

    Ok(())
}

/// Constructs an S3 client for AWS, or for MinIO when `S3_ENDPOINT` is set.
async fn build_s3_client(config: &Config) -> aws_sdk_s3::Client {
    let credentials = Credentials::new(
        &config.aws_access_key_id,
        &config.aws_secret_access_key,
        None,
        None,
        "resume-sms-static",
    );

    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new(config.s3_region.clone()))
        .credentials_provider(credentials);
    if let Some(endpoint) = &config.s3_endpoint {
        loader = loader.endpoint_url(endpoint);
    }
    let shared = loader.load().await;

    let s3_config = aws_sdk_s3::config::Builder::from(&shared)
        .force_path_style(config.s3_endpoint.is_some())
        .build();
    aws_sdk_s3::Client::from_conf(s3_config)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
