use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// YAML file overriding the built-in policy defaults.
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Log at debug level unless `RUST_LOG` says otherwise.
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Select, extract and package the day's stories, then deliver the book.
    Build(BuildArgs),
    /// Print the selected working set as JSON lines.
    Stories(StoriesArgs),
    /// Extract one document and print it as JSON.
    Extract(ExtractArgs),
}

#[derive(Debug, Args)]
pub struct BuildArgs {
    /// Number of stories to include (overrides `TOP_POSTS_COUNT`).
    #[arg(long, short = 'n')]
    pub count: Option<usize>,

    /// Output path for the EPUB (default: `hn_daily_<date>.epub`).
    #[arg(long, short = 'o')]
    pub out: Option<String>,

    /// Build the book but do not send it.
    #[arg(long)]
    pub skip_send: bool,

    /// Keep the EPUB on disk after a successful send.
    #[arg(long)]
    pub keep_epub: bool,

    /// As-of day (YYYY-MM-DD, UTC). Defaults to yesterday.
    #[arg(long)]
    pub date: Option<NaiveDate>,

    /// Book title (default: `HN Daily - <date>`).
    #[arg(long)]
    pub title: Option<String>,

    /// Write the skip manifest as JSON to this path.
    #[arg(long)]
    pub manifest: Option<String>,
}

#[derive(Debug, Args)]
pub struct StoriesArgs {
    /// Number of stories to select (overrides `TOP_POSTS_COUNT`).
    #[arg(long, short = 'n')]
    pub count: Option<usize>,

    /// As-of day (YYYY-MM-DD, UTC). Defaults to yesterday.
    #[arg(long)]
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Args)]
#[group(required = true, multiple = false)]
pub struct ExtractArgs {
    /// Article URL to fetch (must be http/https).
    #[arg(long)]
    pub url: Option<String>,

    /// Local HTML file to extract instead of fetching.
    #[arg(long)]
    pub file: Option<String>,
}
