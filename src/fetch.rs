use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use url::Url;

use crate::config::DigestConfig;
use crate::digest::FailureReason;

const ACCEPT_HTML: &str = "text/html,application/xhtml+xml;q=0.9,*/*;q=0.8";

/// Bytes of one fetched page, handed straight to the extractor.
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub source_url: Url,
    pub media_type: String,
    pub bytes: Vec<u8>,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out")]
    Timeout,

    #[error("http status {status}")]
    Status { status: u16 },

    #[error("body too large ({0} bytes)")]
    BodyTooLarge(u64),

    #[error("unsupported content-type: {0}")]
    NonHtml(String),

    #[error("read body: {0}")]
    Body(String),
}

impl FetchError {
    /// Transient failures get the single retry; everything else is final.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connect(_) | Self::Timeout | Self::Body(_) => true,
            Self::Status { status } => *status >= 500,
            Self::InvalidUrl(_) | Self::BodyTooLarge(_) | Self::NonHtml(_) => false,
        }
    }

    pub fn reason(&self) -> FailureReason {
        match self {
            Self::Timeout => FailureReason::Timeout,
            Self::NonHtml(_) => FailureReason::NonHtmlContent,
            Self::InvalidUrl(_)
            | Self::Connect(_)
            | Self::Status { .. }
            | Self::BodyTooLarge(_)
            | Self::Body(_) => FailureReason::Unreachable,
        }
    }

    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if let Some(status) = err.status() {
            Self::Status {
                status: status.as_u16(),
            }
        } else if err.is_body() || err.is_decode() {
            Self::Body(err.to_string())
        } else {
            Self::Connect(err.to_string())
        }
    }
}

#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<RawDocument, FetchError>;
}

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub max_body_bytes: u64,
    pub user_agent: String,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self::from_config(&DigestConfig::default())
    }
}

impl FetchSettings {
    pub fn from_config(config: &DigestConfig) -> Self {
        Self {
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            read_timeout: Duration::from_secs(config.read_timeout_secs),
            max_retries: config.max_retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            max_body_bytes: config.max_body_bytes,
            user_agent: config.user_agent.clone(),
        }
    }
}

/// reqwest-backed fetcher. Holds no state besides the connection pool, so one
/// instance is shared by every task of a run.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    settings: FetchSettings,
}

impl HttpFetcher {
    pub fn new(settings: FetchSettings) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.read_timeout)
            .user_agent(settings.user_agent.clone())
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("build article http client")?;
        Ok(Self { client, settings })
    }

    async fn fetch_once(&self, url: &Url) -> Result<RawDocument, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .header(ACCEPT, ACCEPT_HTML)
            .send()
            .await
            .map_err(FetchError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }

        // Checked before the body is read so non-HTML payloads never get buffered.
        let media_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("text/html")
            .to_string();
        if !is_html_media_type(&media_type) {
            return Err(FetchError::NonHtml(media_type));
        }

        if let Some(len) = response.content_length()
            && len > self.settings.max_body_bytes
        {
            return Err(FetchError::BodyTooLarge(len));
        }

        let source_url = response.url().clone();
        let bytes = read_capped(response, self.settings.max_body_bytes).await?;

        Ok(RawDocument {
            source_url,
            media_type,
            bytes,
            fetched_at: Utc::now(),
        })
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    #[tracing::instrument(skip_all, fields(url = %url))]
    async fn fetch(&self, url: &str) -> Result<RawDocument, FetchError> {
        let parsed = Url::parse(url).map_err(|err| FetchError::InvalidUrl(err.to_string()))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(FetchError::InvalidUrl(format!(
                "unsupported scheme: {}",
                parsed.scheme()
            )));
        }

        let mut attempt = 0;
        loop {
            match self.fetch_once(&parsed).await {
                Ok(doc) => return Ok(doc),
                Err(err) if err.is_transient() && attempt < self.settings.max_retries => {
                    attempt += 1;
                    tracing::debug!(?err, attempt, "transient fetch failure; retrying");
                    tokio::time::sleep(self.settings.retry_delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Reads the body chunk by chunk and gives up as soon as it passes `limit`,
/// whether or not the server announced a length.
async fn read_capped(mut response: reqwest::Response, limit: u64) -> Result<Vec<u8>, FetchError> {
    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(FetchError::from_reqwest)? {
        let read = (body.len() + chunk.len()) as u64;
        if read > limit {
            return Err(FetchError::BodyTooLarge(read));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

pub fn is_html_media_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim()
        .to_ascii_lowercase();
    essence == "text/html" || essence == "application/xhtml+xml"
}
