use std::collections::HashSet;
use std::io::Write as _;
use std::sync::Arc;

use anyhow::Context as _;
use chrono::{DateTime, Duration, Utc};

use crate::cli::StoriesArgs;
use crate::config::DigestConfig;
use crate::listing::{HackerNewsListing, StoryListing, resolve_as_of};

pub use crate::formats::{ListingRecord, StoryRef};

#[derive(Debug, thiserror::Error)]
pub enum SelectError {
    /// Carries whatever did survive so the caller may still go ahead.
    #[error("only {found} eligible stories, need at least {required}")]
    InsufficientStories {
        found: usize,
        required: usize,
        selected: Vec<StoryRef>,
    },
}

#[derive(Debug, Clone)]
pub struct SelectOptions {
    pub target: usize,
    pub min_stories: usize,
    pub freshness: Duration,
}

impl SelectOptions {
    pub fn from_config(config: &DigestConfig) -> Self {
        Self {
            target: config.story_count,
            min_stories: config.min_stories,
            freshness: Duration::hours(config.freshness_hours),
        }
    }
}

/// Narrows an over-provisioned listing to at most `target` settled stories,
/// ordered by listing rank, one per id.
pub fn select(
    records: Vec<ListingRecord>,
    options: &SelectOptions,
    now: DateTime<Utc>,
) -> Result<Vec<StoryRef>, SelectError> {
    let cutoff = now - options.freshness;
    let total = records.len();

    let mut eligible = records
        .into_iter()
        .filter(|record| record.posted_at <= cutoff)
        .collect::<Vec<_>>();
    let settled = eligible.len();
    // Stable: equal ranks keep listing order.
    eligible.sort_by_key(|record| record.rank);

    let mut seen = HashSet::new();
    let selected = eligible
        .into_iter()
        .filter(|record| seen.insert(record.id.clone()))
        .take(options.target)
        .map(StoryRef::from)
        .collect::<Vec<_>>();

    tracing::debug!(total, settled, selected = selected.len(), "selected stories");

    if selected.is_empty() || selected.len() < options.min_stories {
        return Err(SelectError::InsufficientStories {
            found: selected.len(),
            required: options.min_stories.max(1),
            selected,
        });
    }
    Ok(selected)
}

pub async fn run(args: StoriesArgs, mut config: DigestConfig) -> anyhow::Result<()> {
    if let Some(count) = args.count {
        config.story_count = count;
    }
    config.validate().context("validate config")?;

    let as_of = resolve_as_of(args.date, Utc::now());
    let listing: Arc<dyn StoryListing> = Arc::new(HackerNewsListing::new(&config)?);
    let limit = config.story_count * config.overfetch_factor;
    let records = listing
        .list(as_of, limit)
        .await
        .with_context(|| format!("list stories for {as_of}"))?;

    let stories = match select(records, &SelectOptions::from_config(&config), Utc::now()) {
        Ok(stories) => stories,
        Err(SelectError::InsufficientStories {
            found,
            required,
            selected,
        }) if !selected.is_empty() => {
            tracing::warn!(found, required, "fewer stories than requested");
            selected
        }
        Err(err) => return Err(err).context("select stories"),
    };

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for story in &stories {
        serde_json::to_writer(&mut out, story).context("write story json")?;
        out.write_all(b"\n").context("write story json")?;
    }
    out.flush().context("flush stdout")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone as _;

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 2, 12, 0, 0).unwrap()
    }

    fn record(id: &str, rank: u32, age_hours: i64) -> ListingRecord {
        ListingRecord {
            id: id.to_string(),
            title: format!("Title {id}"),
            url: format!("https://example.com/{id}"),
            rank,
            posted_at: now() - Duration::hours(age_hours),
            author: None,
            points: Some(100),
            comment_count: None,
        }
    }

    fn options(target: usize) -> SelectOptions {
        SelectOptions {
            target,
            min_stories: 1,
            freshness: Duration::hours(12),
        }
    }

    fn ids(stories: &[StoryRef]) -> Vec<&str> {
        stories.iter().map(|s| s.id.as_str()).collect()
    }

    #[test]
    fn returns_at_most_target_in_rank_order() {
        let records = vec![
            record("c", 3, 20),
            record("a", 1, 20),
            record("d", 4, 20),
            record("b", 2, 20),
        ];
        let stories = select(records, &options(3), now()).unwrap();
        assert_eq!(ids(&stories), vec!["a", "b", "c"]);
    }

    #[test]
    fn fresh_stories_are_excluded() {
        let records = vec![record("new", 1, 2), record("old", 2, 30)];
        let stories = select(records, &options(5), now()).unwrap();
        assert_eq!(ids(&stories), vec!["old"]);
    }

    #[test]
    fn duplicate_ids_keep_the_best_rank() {
        let records = vec![record("a", 3, 20), record("a", 1, 20), record("b", 2, 20)];
        let stories = select(records, &options(5), now()).unwrap();
        assert_eq!(ids(&stories), vec!["a", "b"]);
        assert_eq!(stories[0].rank, 1);
    }

    #[test]
    fn nothing_settled_is_insufficient() {
        let records = vec![record("a", 1, 1), record("b", 2, 3)];
        let err = select(records, &options(5), now()).unwrap_err();
        match err {
            SelectError::InsufficientStories {
                found, selected, ..
            } => {
                assert_eq!(found, 0);
                assert!(selected.is_empty());
            }
        }
    }

    #[test]
    fn below_minimum_reports_survivors() {
        let records = vec![record("a", 1, 20), record("b", 2, 1)];
        let opts = SelectOptions {
            min_stories: 2,
            ..options(5)
        };
        let err = select(records, &opts, now()).unwrap_err();
        let SelectError::InsufficientStories {
            found,
            required,
            selected,
        } = err;
        assert_eq!((found, required), (1, 2));
        assert_eq!(ids(&selected), vec!["a"]);
    }
}
