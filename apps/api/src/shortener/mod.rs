//! Link shortening through the TinyURL REST API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

const TINYURL_CREATE_URL: &str = "https://api.tinyurl.com/create";

#[derive(Debug, Error)]
pub enum ShortenerError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("TinyURL API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("TinyURL returned no short link")]
    MissingLink,
}

#[async_trait]
pub trait LinkShortener: Send + Sync {
    async fn shorten(&self, url: &str) -> Result<String, ShortenerError>;
}

#[derive(Debug, Serialize)]
struct CreateRequest<'a> {
    url: &'a str,
    domain: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreateResponse {
    data: Option<CreateData>,
    #[serde(default)]
    errors: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CreateData {
    tiny_url: String,
}

impl CreateResponse {
    fn into_link(self) -> Result<String, ShortenerError> {
        self.data
            .map(|d| d.tiny_url)
            .filter(|url| !url.trim().is_empty())
            .ok_or(ShortenerError::MissingLink)
    }
}

#[derive(Clone)]
pub struct TinyUrlClient {
    http: Client,
    api_token: String,
}

impl TinyUrlClient {
    pub fn new(api_token: String) -> Result<Self, ShortenerError> {
        let http = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self { http, api_token })
    }
}

#[async_trait]
impl LinkShortener for TinyUrlClient {
    async fn shorten(&self, url: &str) -> Result<String, ShortenerError> {
        let response = self
            .http
            .post(TINYURL_CREATE_URL)
            .bearer_auth(&self.api_token)
            .json(&CreateRequest {
                url,
                domain: "tinyurl.com",
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<CreateResponse>(&body)
                .ok()
                .filter(|r| !r.errors.is_empty())
                .map(|r| r.errors.join("; "))
                .unwrap_or(body);
            return Err(ShortenerError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let link = response.json::<CreateResponse>().await?.into_link()?;
        debug!("Shortened link to {link}");
        Ok(link)
    }
}
