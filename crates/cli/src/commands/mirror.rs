// `kibitz mirror`: regenerate `.kibitz/api/*.json`.

use clap::Args;
use kibitz_common::mirror::ProjectDocument;
use kibitz_daemon::mirror::ApiMirror;

use super::{block_on, ProjectArgs, ProjectContext};
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct MirrorArgs {
    #[command(flatten)]
    pub project: ProjectArgs,
}

pub fn run(args: MirrorArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.project.json);
    let ctx = ProjectContext::open(&args.project)?;
    let mirror = ApiMirror::for_project(&ctx.root);

    let document = block_on(mirror.rebuild(&ctx.vcs, &ctx.project_id))??;
    output::print_output(format, &document, |d| format_human(d, &mirror))?;
    Ok(())
}

fn format_human(document: &ProjectDocument, mirror: &ApiMirror) -> String {
    format!(
        "Mirror rebuilt in {}: {} branch(es), {} conversation(s), {} uncommitted file(s)",
        mirror.dir().display(),
        document.repository.total_branches,
        document.conversations.len(),
        document.repository.uncommitted_files,
    )
}
