use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument as _;

use crate::config::DigestConfig;
use crate::document::SemanticDocument;
use crate::extract::{ExtractOptions, extract};
use crate::fetch::Fetch;
use crate::select::StoryRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    Unreachable,
    Timeout,
    NonHtmlContent,
    EmptyContent,
    ParseError,
    Cancelled,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unreachable => "unreachable",
            Self::Timeout => "timeout",
            Self::NonHtmlContent => "non-html content",
            Self::EmptyContent => "empty content",
            Self::ParseError => "parse error",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionOutcome {
    Success(SemanticDocument),
    Failure { reason: FailureReason, detail: String },
}

impl ExtractionOutcome {
    fn failure(reason: FailureReason, detail: impl Into<String>) -> Self {
        Self::Failure {
            reason,
            detail: detail.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

#[derive(Debug, Clone)]
pub struct DigestEntry {
    pub story: StoryRef,
    pub outcome: ExtractionOutcome,
}

/// Rank-ordered outcomes for one working set. Built once by [`assemble`].
#[derive(Debug, Clone)]
pub struct Digest {
    pub date: NaiveDate,
    pub assembled_at: DateTime<Utc>,
    pub entries: Vec<DigestEntry>,
}

impl Digest {
    pub fn successes(&self) -> impl Iterator<Item = (&StoryRef, &SemanticDocument)> {
        self.entries.iter().filter_map(|entry| match &entry.outcome {
            ExtractionOutcome::Success(doc) => Some((&entry.story, doc)),
            ExtractionOutcome::Failure { .. } => None,
        })
    }

    pub fn success_count(&self) -> usize {
        self.successes().count()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AssembleError {
    #[error("all {attempted} stories failed extraction")]
    EmptyDigest { attempted: usize, entries: Vec<DigestEntry> },

    /// Unresolved stories carry a `Cancelled` failure in `entries`.
    #[error("run cancelled with {completed} of {} stories resolved", entries.len())]
    Cancelled {
        completed: usize,
        entries: Vec<DigestEntry>,
    },
}

#[derive(Debug, Clone)]
pub struct AssembleOptions {
    pub concurrency: usize,
    pub task_timeout: Duration,
    pub extract: ExtractOptions,
}

impl Default for AssembleOptions {
    fn default() -> Self {
        Self::from_config(&DigestConfig::default())
    }
}

impl AssembleOptions {
    pub fn from_config(config: &DigestConfig) -> Self {
        Self {
            concurrency: config.concurrency,
            task_timeout: Duration::from_secs(config.task_timeout_secs),
            extract: ExtractOptions::from_config(config),
        }
    }
}

/// Runs fetch then extract for every story on a bounded pool.
///
/// Each story resolves to exactly one outcome; a failing story never affects
/// its siblings. Retries are the fetcher's business, not ours.
pub async fn assemble(
    date: NaiveDate,
    stories: Vec<StoryRef>,
    fetcher: Arc<dyn Fetch>,
    options: &AssembleOptions,
    cancel: CancellationToken,
) -> Result<Digest, AssembleError> {
    let attempted = stories.len();
    let semaphore = Arc::new(Semaphore::new(options.concurrency.max(1)));
    let mut tasks = JoinSet::new();

    for (index, story) in stories.iter().cloned().enumerate() {
        let semaphore = Arc::clone(&semaphore);
        let fetcher = Arc::clone(&fetcher);
        let extract_options = options.extract.clone();
        let task_timeout = options.task_timeout;
        let cancel = cancel.child_token();
        let span = tracing::info_span!("story", story_id = %story.id, rank = story.rank);

        tasks.spawn(
            async move {
                let outcome = tokio::select! {
                    _ = cancel.cancelled() => None,
                    outcome = run_story(&story, semaphore, fetcher, extract_options, task_timeout) => Some(outcome),
                };
                (index, outcome)
            }
            .instrument(span),
        );
    }

    let mut slots: Vec<Option<ExtractionOutcome>> = vec![None; attempted];
    let mut cancelled = false;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, Some(outcome))) => slots[index] = Some(outcome),
            Ok((_, None)) => cancelled = true,
            Err(err) => {
                // Task panicked; its slot stays empty and is reported below.
                tracing::error!(?err, "story task aborted");
            }
        }
    }
    cancelled |= interrupted(&cancel, &slots);

    let completed = slots.iter().filter(|slot| slot.is_some()).count();
    let mut entries = stories
        .into_iter()
        .zip(slots)
        .map(|(story, slot)| {
            let outcome = slot.unwrap_or_else(|| {
                if cancelled {
                    ExtractionOutcome::failure(FailureReason::Cancelled, "run cancelled")
                } else {
                    ExtractionOutcome::failure(FailureReason::ParseError, "extraction task aborted")
                }
            });
            DigestEntry { story, outcome }
        })
        .collect::<Vec<_>>();
    entries.sort_by_key(|entry| entry.story.rank);

    if cancelled {
        tracing::warn!(completed, attempted, "assembly cancelled");
        return Err(AssembleError::Cancelled { completed, entries });
    }

    for entry in &entries {
        if let ExtractionOutcome::Failure { reason, detail } = &entry.outcome {
            tracing::warn!(
                id = %entry.story.id,
                url = %entry.story.url,
                %reason,
                detail = %detail,
                "story skipped"
            );
        }
    }

    if !entries.iter().any(|entry| entry.outcome.is_success()) {
        return Err(AssembleError::EmptyDigest { attempted, entries });
    }

    tracing::info!(
        succeeded = entries.iter().filter(|e| e.outcome.is_success()).count(),
        attempted,
        "digest assembled"
    );
    Ok(Digest {
        date,
        assembled_at: Utc::now(),
        entries,
    })
}

/// A cancel that lands after every story resolved leaves a complete digest.
fn interrupted(cancel: &CancellationToken, slots: &[Option<ExtractionOutcome>]) -> bool {
    cancel.is_cancelled() && slots.iter().any(Option::is_none)
}

async fn run_story(
    story: &StoryRef,
    semaphore: Arc<Semaphore>,
    fetcher: Arc<dyn Fetch>,
    options: ExtractOptions,
    task_timeout: Duration,
) -> ExtractionOutcome {
    let Ok(_permit) = semaphore.acquire_owned().await else {
        return ExtractionOutcome::failure(FailureReason::Cancelled, "worker pool closed");
    };

    let work = async {
        let raw = match fetcher.fetch(&story.url).await {
            Ok(raw) => raw,
            Err(err) => return ExtractionOutcome::failure(err.reason(), err.to_string()),
        };
        tracing::debug!(bytes = raw.bytes.len(), media_type = %raw.media_type, "fetched");

        // Parsing is CPU-bound; keep it off the async workers.
        match tokio::task::spawn_blocking(move || extract(&raw, &options)).await {
            Ok(Ok(doc)) => ExtractionOutcome::Success(doc),
            Ok(Err(err)) => ExtractionOutcome::failure(err.reason(), err.to_string()),
            Err(err) => ExtractionOutcome::failure(
                FailureReason::ParseError,
                format!("extractor panicked: {err}"),
            ),
        }
    };

    match tokio::time::timeout(task_timeout, work).await {
        Ok(outcome) => outcome,
        Err(_) => ExtractionOutcome::failure(
            FailureReason::Timeout,
            format!("exceeded {}s task timeout", task_timeout.as_secs()),
        ),
    }
}
