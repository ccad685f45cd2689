use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use serde::Deserialize;

use crate::config::DigestConfig;
use crate::formats::ListingRecord;

#[async_trait]
pub trait StoryListing: Send + Sync {
    /// Ranked front-page stories for `as_of`, at most `limit` of them.
    async fn list(&self, as_of: NaiveDate, limit: usize) -> anyhow::Result<Vec<ListingRecord>>;
}

/// Yesterday in UTC unless a day was asked for.
pub fn resolve_as_of(requested: Option<NaiveDate>, now: DateTime<Utc>) -> NaiveDate {
    requested.unwrap_or_else(|| now.date_naive() - TimeDelta::days(1))
}

/// Unix seconds of `[start, end)` for the UTC day.
fn day_bounds(day: NaiveDate) -> (i64, i64) {
    let start = day.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc().timestamp();
    (start, start + 24 * 60 * 60)
}

#[derive(Debug, Deserialize)]
struct AlgoliaResponse {
    #[serde(default)]
    hits: Vec<AlgoliaHit>,
}

#[derive(Debug, Deserialize)]
struct AlgoliaHit {
    #[serde(rename = "objectID")]
    object_id: String,
    title: Option<String>,
    url: Option<String>,
    author: Option<String>,
    points: Option<u32>,
    num_comments: Option<u32>,
    created_at_i: i64,
}

#[derive(Debug, Deserialize)]
struct FirebaseItem {
    id: u64,
    title: Option<String>,
    url: Option<String>,
    by: Option<String>,
    score: Option<u32>,
    descendants: Option<u32>,
    time: i64,
}

/// Front-page listing from the HN Algolia search API, with the official
/// Firebase API as a fallback when the search is down or empty.
#[derive(Debug, Clone)]
pub struct HackerNewsListing {
    client: reqwest::Client,
    algolia_api: String,
    firebase_api: String,
    min_points: u32,
}

impl HackerNewsListing {
    pub fn new(config: &DigestConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.read_timeout_secs))
            .build()
            .context("build listing http client")?;
        Ok(Self {
            client,
            algolia_api: config.algolia_api.trim_end_matches('/').to_owned(),
            firebase_api: config.firebase_api.trim_end_matches('/').to_owned(),
            min_points: config.min_points,
        })
    }

    async fn from_algolia(&self, as_of: NaiveDate, limit: usize) -> anyhow::Result<Vec<ListingRecord>> {
        let (start, end) = day_bounds(as_of);
        let url = format!("{}/search_by_date", self.algolia_api);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("tags", "front_page".to_owned()),
                (
                    "numericFilters",
                    format!("created_at_i>={start},created_at_i<{end}"),
                ),
                ("hitsPerPage", limit.to_string()),
            ])
            .send()
            .await
            .with_context(|| format!("GET {url}"))?
            .error_for_status()
            .with_context(|| format!("GET {url}"))?;
        let body: AlgoliaResponse = response.json().await.context("decode algolia response")?;

        let mut records = Vec::new();
        for hit in body.hits {
            let Some(url) = hit.url.filter(|u| !u.trim().is_empty()) else {
                continue;
            };
            let points = hit.points.unwrap_or(0);
            if points < self.min_points {
                continue;
            }
            let Some(posted_at) = DateTime::from_timestamp(hit.created_at_i, 0) else {
                continue;
            };
            records.push(ListingRecord {
                id: hit.object_id,
                title: hit.title.unwrap_or_else(|| "Untitled".to_owned()),
                url,
                rank: records.len() as u32 + 1,
                posted_at,
                author: hit.author,
                points: Some(points),
                comment_count: hit.num_comments,
            });
            if records.len() >= limit {
                break;
            }
        }
        Ok(records)
    }

    async fn from_firebase(&self, limit: usize) -> anyhow::Result<Vec<ListingRecord>> {
        let url = format!("{}/topstories.json", self.firebase_api);
        let ids: Vec<u64> = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?
            .error_for_status()
            .with_context(|| format!("GET {url}"))?
            .json()
            .await
            .context("decode topstories")?;

        let mut records = Vec::new();
        for (position, id) in ids.into_iter().enumerate() {
            if records.len() >= limit {
                break;
            }
            let item = match self.firebase_item(id).await {
                Ok(Some(item)) => item,
                Ok(None) => continue,
                Err(err) => {
                    tracing::debug!(id, ?err, "skip unreadable item");
                    continue;
                }
            };
            let (Some(url), Some(posted_at)) = (
                item.url.filter(|u| !u.trim().is_empty()),
                DateTime::from_timestamp(item.time, 0),
            ) else {
                continue;
            };
            records.push(ListingRecord {
                id: item.id.to_string(),
                title: item.title.unwrap_or_else(|| "Untitled".to_owned()),
                url,
                rank: position as u32 + 1,
                posted_at,
                author: item.by,
                points: item.score,
                comment_count: item.descendants,
            });
        }
        Ok(records)
    }

    async fn firebase_item(&self, id: u64) -> anyhow::Result<Option<FirebaseItem>> {
        let url = format!("{}/item/{id}.json", self.firebase_api);
        let item = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?
            .error_for_status()
            .with_context(|| format!("GET {url}"))?
            .json()
            .await
            .with_context(|| format!("decode item {id}"))?;
        Ok(item)
    }
}

#[async_trait]
impl StoryListing for HackerNewsListing {
    async fn list(&self, as_of: NaiveDate, limit: usize) -> anyhow::Result<Vec<ListingRecord>> {
        match self.from_algolia(as_of, limit).await {
            Ok(records) if !records.is_empty() => {
                tracing::info!(%as_of, count = records.len(), "listed front page");
                return Ok(records);
            }
            Ok(_) => tracing::warn!(%as_of, "algolia returned no stories; falling back to top stories"),
            Err(err) => tracing::warn!(%as_of, err = %format!("{err:#}"), "algolia failed; falling back to top stories"),
        }

        let records = self.from_firebase(limit).await.context("list top stories")?;
        tracing::info!(count = records.len(), "listed top stories");
        Ok(records)
    }
}
