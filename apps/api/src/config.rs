use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::orchestrator::Notices;

pub const DEFAULT_MESSAGE_LIMIT: i64 = 50;
pub const DEFAULT_SIGNED_URL_TTL_SECS: u64 = 86_400;
pub const DEFAULT_RESUME_QUEUE_KEY: &str = "resume_jobs";
/// A pipeline claim older than this may be taken over by another run. The
/// pipeline refreshes its claim before each stage, so this only has to cover the
/// slowest single stage (one model call with all retries).
pub const RESUME_CLAIM_TTL: Duration = Duration::from_secs(15 * 60);

pub const DEFAULT_SUSPENSION_NOTICE: &str = "You have reached the maximum number of messages \
for this service, so this conversation has been paused. Please contact support if you need \
more help.";
pub const DEFAULT_COMPLETED_NOTICE: &str =
    "Would you like to make any corrections to your resume?";
pub const DEFAULT_IN_PROGRESS_NOTICE: &str =
    "Your resume is being prepared. You will get a download link in a few minutes.";

/// Where resume generation runs after the interview ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    Inline,
    Queue,
}

impl FromStr for DispatchMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inline" => Ok(DispatchMode::Inline),
            "queue" => Ok(DispatchMode::Queue),
            other => bail!("RESUME_DISPATCH must be 'inline' or 'queue', got '{other}'"),
        }
    }
}

/// Application configuration loaded from environment variables.
/// Startup fails if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub s3_bucket: String,
    /// Custom endpoint (MinIO, LocalStack). Unset means AWS.
    pub s3_endpoint: Option<String>,
    pub s3_region: String,
    pub aws_access_key_id: String,
    pub aws_secret_access_key: String,
    pub anthropic_api_key: String,
    pub twilio_account_sid: String,
    pub twilio_auth_token: String,
    pub tinyurl_api_token: String,
    pub port: u16,
    pub rust_log: String,
    pub signed_url_ttl: Duration,
    pub message_limit: i64,
    pub dispatch: DispatchMode,
    /// Only read when `dispatch` is `Queue`.
    pub redis_url: Option<String>,
    pub resume_queue_key: String,
    pub completed_notice: String,
    pub suspension_notice: String,
    pub in_progress_notice: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing
        Self::from_vars(|key| std::env::var(key).ok())
    }

    pub fn from_vars(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let require = |key: &str| {
            get(key)
                .filter(|v| !v.trim().is_empty())
                .with_context(|| format!("Required environment variable '{key}' is not set"))
        };
        let optional = |key: &str| get(key).filter(|v| !v.trim().is_empty());

        let dispatch = optional("RESUME_DISPATCH")
            .map(|v| v.parse::<DispatchMode>())
            .transpose()?
            .unwrap_or(DispatchMode::Inline);
        let redis_url = optional("REDIS_URL");
        if dispatch == DispatchMode::Queue && redis_url.is_none() {
            bail!("REDIS_URL is required when RESUME_DISPATCH=queue");
        }

        let message_limit = optional("MESSAGE_LIMIT")
            .map(|v| v.parse::<i64>())
            .transpose()
            .context("MESSAGE_LIMIT must be an integer")?
            .unwrap_or(DEFAULT_MESSAGE_LIMIT);
        if message_limit < 1 {
            bail!("MESSAGE_LIMIT must be at least 1");
        }

        let signed_url_ttl_secs = optional("SIGNED_URL_TTL_SECS")
            .map(|v| v.parse::<u64>())
            .transpose()
            .context("SIGNED_URL_TTL_SECS must be a number of seconds")?
            .unwrap_or(DEFAULT_SIGNED_URL_TTL_SECS);

        Ok(Config {
            database_url: require("DATABASE_URL")?,
            s3_bucket: require("S3_BUCKET")?,
            s3_endpoint: optional("S3_ENDPOINT"),
            s3_region: optional("S3_REGION").unwrap_or_else(|| "us-east-1".to_string()),
            aws_access_key_id: require("AWS_ACCESS_KEY_ID")?,
            aws_secret_access_key: require("AWS_SECRET_ACCESS_KEY")?,
            anthropic_api_key: require("ANTHROPIC_API_KEY")?,
            twilio_account_sid: require("TWILIO_ACCOUNT_SID")?,
            twilio_auth_token: require("TWILIO_AUTH_TOKEN")?,
            tinyurl_api_token: require("TINYURL_API_TOKEN")?,
            port: optional("PORT")
                .unwrap_or_else(|| "8080".to_string())
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: optional("RUST_LOG").unwrap_or_else(|| "info".to_string()),
            signed_url_ttl: Duration::from_secs(signed_url_ttl_secs),
            message_limit,
            dispatch,
            redis_url,
            resume_queue_key: optional("RESUME_QUEUE_KEY")
                .unwrap_or_else(|| DEFAULT_RESUME_QUEUE_KEY.to_string()),
            completed_notice: optional("COMPLETED_NOTICE")
                .unwrap_or_else(|| DEFAULT_COMPLETED_NOTICE.to_string()),
            suspension_notice: optional("SUSPENSION_NOTICE")
                .unwrap_or_else(|| DEFAULT_SUSPENSION_NOTICE.to_string()),
            in_progress_notice: optional("IN_PROGRESS_NOTICE")
                .unwrap_or_else(|| DEFAULT_IN_PROGRESS_NOTICE.to_string()),
        })
    }

    pub fn notices(&self) -> Notices {
        Notices {
            suspension: self.suspension_notice.clone(),
            completed: self.completed_notice.clone(),
            in_progress: self.in_progress_notice.clone(),
        }
    }
}
