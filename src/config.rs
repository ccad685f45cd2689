//! Run configuration.
//!
//! Every policy constant of the pipeline lives in [`DigestConfig`]. Values are
//! layered: built-in defaults, then an optional YAML file, then environment
//! variables, then command-line flags (applied by the caller).

use std::path::Path;

use anyhow::Context as _;
use serde::Deserialize;

pub const ENV_TOP_POSTS_COUNT: &str = "TOP_POSTS_COUNT";
pub const ENV_ALGOLIA_API: &str = "HN_ALGOLIA_API";
pub const ENV_FIREBASE_API: &str = "HN_FIREBASE_API";
pub const ENV_SMTP_HOST: &str = "SMTP_HOST";
pub const ENV_SMTP_PORT: &str = "SMTP_PORT";
pub const ENV_SENDER_ADDRESS: &str = "GMAIL_ADDRESS";
pub const ENV_SENDER_PASSWORD: &str = "GMAIL_APP_PASSWORD";
pub const ENV_RECIPIENTS: &str = "KINDLE_EMAILS";

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DigestConfig {
    /// Target size of the working set.
    pub story_count: usize,
    /// Fewer survivors than this is reported as `InsufficientStories`.
    pub min_stories: usize,
    /// Listing over-provisioning multiplier applied to `story_count`.
    pub overfetch_factor: usize,
    pub min_points: u32,
    /// Stories younger than this are still settling and are not eligible.
    pub freshness_hours: i64,

    pub max_heading_depth: u8,
    /// Minimum characters of text per block element for a container to be
    /// picked as main content.
    pub min_text_density: f64,
    pub min_blocks: usize,

    pub concurrency: usize,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub task_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub max_body_bytes: u64,
    pub user_agent: String,

    pub algolia_api: String,
    pub firebase_api: String,

    pub book_title: Option<String>,
    pub language: String,

    pub smtp_host: String,
    pub smtp_port: u16,
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self {
            story_count: 10,
            min_stories: 1,
            overfetch_factor: 3,
            min_points: 10,
            freshness_hours: 12,
            max_heading_depth: 3,
            min_text_density: 20.0,
            min_blocks: 1,
            concurrency: 4,
            connect_timeout_secs: 10,
            read_timeout_secs: 15,
            task_timeout_secs: 45,
            max_retries: 1,
            retry_delay_ms: 500,
            max_body_bytes: 5 * 1024 * 1024,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            algolia_api: "https://hn.algolia.com/api/v1".to_string(),
            firebase_api: "https://hacker-news.firebaseio.com/v0".to_string(),
            book_title: None,
            language: "en".to_string(),
            smtp_host: "smtp.gmail.com".to_string(),
            smtp_port: 587,
        }
    }
}

impl DigestConfig {
    /// Defaults, overlaid with `path` (if any), overlaid with the environment.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let config = match path {
            Some(path) => Self::from_yaml_file(path)?,
            None => Self::default(),
        };
        config.with_env(|key| std::env::var(key).ok())
    }

    pub fn from_yaml_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("read config: {}", path.display()))?;
        Self::from_yaml_str(&contents).with_context(|| format!("parse config: {}", path.display()))
    }

    pub fn from_yaml_str(contents: &str) -> anyhow::Result<Self> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(contents).context("deserialize config yaml")?;
        Ok(config)
    }

    /// Applies environment overrides read through `lookup`.
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        if let Some(raw) = lookup(ENV_TOP_POSTS_COUNT) {
            self.story_count = raw
                .trim()
                .parse()
                .with_context(|| format!("parse {ENV_TOP_POSTS_COUNT}={raw:?}"))?;
        }
        if let Some(raw) = lookup(ENV_ALGOLIA_API) {
            self.algolia_api = raw;
        }
        if let Some(raw) = lookup(ENV_FIREBASE_API) {
            self.firebase_api = raw;
        }
        if let Some(raw) = lookup(ENV_SMTP_HOST) {
            self.smtp_host = raw;
        }
        if let Some(raw) = lookup(ENV_SMTP_PORT) {
            self.smtp_port = raw
                .trim()
                .parse()
                .with_context(|| format!("parse {ENV_SMTP_PORT}={raw:?}"))?;
        }
        Ok(self)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.story_count == 0 {
            anyhow::bail!("story_count must be at least 1");
        }
        if self.concurrency == 0 {
            anyhow::bail!("concurrency must be at least 1");
        }
        if self.overfetch_factor == 0 {
            anyhow::bail!("overfetch_factor must be at least 1");
        }
        if !(1..=6).contains(&self.max_heading_depth) {
            anyhow::bail!(
                "max_heading_depth must be within 1..=6, got {}",
                self.max_heading_depth
            );
        }
        if !self.min_text_density.is_finite() || self.min_text_density < 0.0 {
            anyhow::bail!("min_text_density must be a non-negative number");
        }
        if self.freshness_hours < 0 {
            anyhow::bail!("freshness_hours must not be negative");
        }
        if self.task_timeout_secs == 0 {
            anyhow::bail!("task_timeout_secs must be at least 1");
        }
        Ok(())
    }
}

/// Sender account and recipient list for delivery. Read from the environment
/// only when delivery is requested.
#[derive(Clone)]
pub struct DeliveryCredentials {
    pub sender: String,
    pub password: String,
    pub recipients: Vec<String>,
}

impl std::fmt::Debug for DeliveryCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryCredentials")
            .field("sender", &self.sender)
            .field("password", &"<redacted>")
            .field("recipients", &self.recipients)
            .finish()
    }
}

impl DeliveryCredentials {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let sender = non_empty(lookup(ENV_SENDER_ADDRESS))
            .ok_or_else(|| anyhow::anyhow!("{ENV_SENDER_ADDRESS} is not set"))?;
        let password = non_empty(lookup(ENV_SENDER_PASSWORD))
            .ok_or_else(|| anyhow::anyhow!("{ENV_SENDER_PASSWORD} is not set"))?;
        let recipients = parse_recipients(&lookup(ENV_RECIPIENTS).unwrap_or_default());
        if recipients.is_empty() {
            anyhow::bail!("{ENV_RECIPIENTS} is not set");
        }
        Ok(Self {
            sender,
            password,
            recipients,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

pub fn parse_recipients(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}
