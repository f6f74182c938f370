use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

use pagebinder::cancellation::CancellationToken;
use pagebinder::cli::{Cli, Command};

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    pagebinder::logging::init().context("init logging")?;

    let cli = Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted; stopping after the current page");
            interrupt.cancel();
        }
    });

    // The reader is driven synchronously; keep it off the async workers.
    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        match cli.command {
            Command::Build(args) => {
                let document = pagebinder::build::run(&args, cancel).context("build")?;
                println!("{}", document.path.display());
                Ok(())
            }
            Command::Harvest(args) => {
                let collected = pagebinder::build::harvest(&args, cancel).context("harvest")?;
                if !collected.skipped.is_empty() {
                    tracing::warn!(labels = ?collected.skipped, "pages skipped");
                }
                println!("{} pages stored", collected.stored);
                Ok(())
            }
            Command::Assemble(args) => {
                let document = pagebinder::build::assemble(&args).context("assemble")?;
                println!("{}", document.path.display());
                Ok(())
            }
        }
    })
    .await
    .context("join pipeline task")?
}
