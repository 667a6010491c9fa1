// `kibitz status`: branch, HEAD and uncommitted files.

use clap::Args;
use kibitz_common::types::ChangedFile;
use serde::Serialize;

use super::{block_on, short_hash, ProjectArgs, ProjectContext};
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct StatusArgs {
    #[command(flatten)]
    pub project: ProjectArgs,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub project_id: String,
    pub project_path: String,
    pub branch: Option<String>,
    pub head: Option<String>,
    pub changed_files: Vec<ChangedFile>,
}

pub fn run(args: StatusArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.project.json);
    let ctx = ProjectContext::open(&args.project)?;
    let status = block_on(ctx.vcs.status())??;

    let report = StatusReport {
        project_id: ctx.project_id.clone(),
        project_path: ctx.root.display().to_string(),
        branch: status.branch,
        head: status.head,
        changed_files: status.changed_files,
    };
    output::print_output(format, &report, format_human)?;
    Ok(())
}

fn format_human(report: &StatusReport) -> String {
    let mut lines = Vec::new();
    let branch = report.branch.as_deref().unwrap_or("(detached)");
    match report.head.as_deref() {
        Some(head) => lines.push(format!("On branch {branch} at {}", short_hash(head))),
        None => lines.push(format!("On branch {branch} (no commits yet)")),
    }

    if report.changed_files.is_empty() {
        lines.push("  Working tree clean.".into());
    } else {
        lines.push(format!("  Uncommitted files ({}):", report.changed_files.len()));
        for file in &report.changed_files {
            lines.push(format!("    {} {}", file.kind.marker(), file.path));
        }
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use kibitz_common::types::ChangeKind;

    fn report(files: Vec<ChangedFile>) -> StatusReport {
        StatusReport {
            project_id: "p1".into(),
            project_path: "/work/p1".into(),
            branch: Some("conv-a-step-2".into()),
            head: Some("0123456789abcdef".into()),
            changed_files: files,
        }
    }

    #[test]
    fn human_lists_changed_files_with_markers() {
        let text = format_human(&report(vec![
            ChangedFile::new("src/lib.rs", ChangeKind::Modified),
            ChangedFile::new("notes.md", ChangeKind::Untracked),
        ]));
        assert!(text.starts_with("On branch conv-a-step-2 at 0123456"));
        assert!(text.contains("Uncommitted files (2):"));
        assert!(text.contains("M src/lib.rs"));
        assert!(text.contains("? notes.md"));
    }

    #[test]
    fn human_reports_clean_unborn_tree() {
        let mut clean = report(Vec::new());
        clean.head = None;
        let text = format_human(&clean);
        assert!(text.contains("no commits yet"));
        assert!(text.contains("Working tree clean."));
    }

    #[test]
    fn json_uses_camel_case() {
        let value = serde_json::to_value(report(Vec::new())).unwrap();
        assert_eq!(value["projectId"], "p1");
        assert_eq!(value["changedFiles"], serde_json::json!([]));
    }
}
