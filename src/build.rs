use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::cli::BuildArgs;
use crate::config::{DeliveryCredentials, DigestConfig};
use crate::deliver::{Deliver, SmtpDelivery};
use crate::digest::{AssembleError, AssembleOptions, assemble};
use crate::epub::{BookArtifact, BookOptions, build_book, default_filename, skip_manifest};
use crate::fetch::{Fetch, FetchSettings, HttpFetcher};
use crate::formats::SkipManifest;
use crate::listing::{HackerNewsListing, StoryListing, resolve_as_of};
use crate::select::{SelectError, SelectOptions, select};

pub async fn run(args: BuildArgs, mut config: DigestConfig) -> anyhow::Result<()> {
    if let Some(count) = args.count {
        config.story_count = count;
    }
    if let Some(title) = &args.title {
        config.book_title = Some(title.clone());
    }
    config.validate().context("validate config")?;

    let credentials = if args.skip_send {
        None
    } else {
        Some(DeliveryCredentials::from_env().context("load delivery credentials")?)
    };

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; cancelling run");
            on_interrupt.cancel();
        }
    });

    let result = pipeline(&args, &config, credentials, cancel).await;
    interrupt.abort();
    result
}

async fn pipeline(
    args: &BuildArgs,
    config: &DigestConfig,
    credentials: Option<DeliveryCredentials>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let as_of = resolve_as_of(args.date, Utc::now());
    let out_path = PathBuf::from(
        args.out
            .clone()
            .unwrap_or_else(|| default_filename(as_of)),
    );

    tracing::info!(%as_of, count = config.story_count, "build: list");
    let listing = HackerNewsListing::new(config)?;
    let limit = config.story_count * config.overfetch_factor;
    let records = tokio::select! {
        _ = cancel.cancelled() => anyhow::bail!("cancelled while listing stories"),
        records = listing.list(as_of, limit) => records.with_context(|| format!("list stories for {as_of}"))?,
    };

    tracing::info!(listed = records.len(), "build: select");
    let stories = match select(records, &SelectOptions::from_config(config), Utc::now()) {
        Ok(stories) => stories,
        Err(SelectError::InsufficientStories {
            found,
            required,
            selected,
        }) if !selected.is_empty() => {
            tracing::warn!(found, required, "fewer stories than requested; continuing");
            selected
        }
        Err(err) => return Err(err).context("select stories"),
    };

    tracing::info!(stories = stories.len(), "build: assemble");
    let fetcher: Arc<dyn Fetch> = Arc::new(HttpFetcher::new(FetchSettings::from_config(config))?);
    let digest = match assemble(
        as_of,
        stories,
        fetcher,
        &AssembleOptions::from_config(config),
        cancel.clone(),
    )
    .await
    {
        Ok(digest) => digest,
        Err(err) => {
            if let AssembleError::EmptyDigest { entries, .. } | AssembleError::Cancelled { entries, .. } = &err {
                write_manifest_if_requested(args, &skip_manifest(as_of, entries))?;
            }
            return Err(err).context("assemble digest");
        }
    };

    tracing::info!("build: book");
    let mut book_options = BookOptions::for_date(as_of, config);
    if let Some(name) = out_path.file_name().and_then(|n| n.to_str()) {
        book_options.filename = name.to_owned();
    }
    let (artifact, manifest) = build_book(&digest, &book_options).context("build book")?;
    write_manifest_if_requested(args, &manifest)?;
    write_artifact(&out_path, &artifact)?;
    tracing::info!(
        path = %out_path.display(),
        chapters = artifact.chapter_count,
        skipped = manifest.skipped.len(),
        "book written"
    );

    let Some(credentials) = credentials else {
        tracing::info!(path = %out_path.display(), "skip send; keeping book");
        return Ok(());
    };

    tracing::info!("build: deliver");
    let delivery = SmtpDelivery::new(config, &credentials);
    tokio::select! {
        _ = cancel.cancelled() => anyhow::bail!("cancelled while sending"),
        sent = delivery.deliver(&artifact, &credentials.recipients) => sent.context("deliver book")?,
    }
    tracing::info!(recipients = credentials.recipients.len(), "book delivered");

    if !args.keep_epub {
        std::fs::remove_file(&out_path)
            .with_context(|| format!("remove delivered book: {}", out_path.display()))?;
        tracing::debug!(path = %out_path.display(), "removed delivered book");
    }
    Ok(())
}

/// Writes via a sibling temp file so a partial book never sits at `path`.
fn write_artifact(path: &Path, artifact: &BookArtifact) -> anyhow::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create output dir: {}", parent.display()))?;
            parent
        }
        _ => Path::new("."),
    };

    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("create temp file in {}", parent.display()))?;
    tmp.write_all(&artifact.bytes)
        .with_context(|| format!("write book: {}", path.display()))?;
    tmp.persist(path)
        .map_err(|err| err.error)
        .with_context(|| format!("persist book: {}", path.display()))?;
    Ok(())
}

fn write_manifest_if_requested(args: &BuildArgs, manifest: &SkipManifest) -> anyhow::Result<()> {
    let Some(path) = &args.manifest else {
        return Ok(());
    };
    let json = serde_json::to_string_pretty(manifest).context("serialize skip manifest")?;
    std::fs::write(path, format!("{json}\n"))
        .with_context(|| format!("write skip manifest: {path}"))?;
    Ok(())
}
