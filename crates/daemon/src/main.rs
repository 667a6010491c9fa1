// kibitzd: read API and push endpoint over project repositories.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use kibitz_daemon::config::GlobalConfig;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "kibitzd", about = "Serve the Kibitz read API over project repositories")]
struct Args {
    /// Directory holding project checkouts. Overrides env and config.
    #[arg(long)]
    projects_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let global = GlobalConfig::load();

    info!("starting kibitzd");
    kibitz_daemon::runtime::serve(global, args.projects_dir.as_deref())
        .await
        .context("kibitzd terminated unexpectedly")
}
