// `kibitz projects-dir`: where project directories live.

use std::path::PathBuf;

use clap::Args;
use kibitz_daemon::config::GlobalConfig;
use kibitz_daemon::runtime;
use serde::Serialize;

use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct ProjectsDirArgs {
    /// Explicit directory; takes precedence over env and config.
    #[arg(long)]
    pub projects_dir: Option<PathBuf>,

    /// Force JSON output.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProjectsDir {
    projects_dir: PathBuf,
}

pub fn run(args: ProjectsDirArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.json);
    let global = GlobalConfig::load();
    let projects_dir = runtime::projects_dir(args.projects_dir.as_deref(), &global)?;
    output::print_output(format, &ProjectsDir { projects_dir }, |p| p.projects_dir.display().to_string())?;
    Ok(())
}
