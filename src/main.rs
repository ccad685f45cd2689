use std::path::Path;
use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    let cli = hndigest::cli::Cli::parse();
    hndigest::logging::init(cli.verbose).context("init logging")?;
    tracing::debug!(?cli, "parsed cli");

    let config = hndigest::config::DigestConfig::load(cli.config.as_deref().map(Path::new))
        .context("load config")?;

    match cli.command {
        hndigest::cli::Command::Build(args) => {
            hndigest::build::run(args, config).await.context("build")?;
        }
        hndigest::cli::Command::Stories(args) => {
            hndigest::select::run(args, config)
                .await
                .context("stories")?;
        }
        hndigest::cli::Command::Extract(args) => {
            hndigest::extract::run(args, &config)
                .await
                .context("extract")?;
        }
    }

    Ok(())
}
