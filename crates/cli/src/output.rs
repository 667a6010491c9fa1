// Output format auto-detection for the CLI.
//
// TTY → human-readable text. Piped/redirected → structured JSON.
// `--json` flag forces JSON output regardless of terminal.

use serde::Serialize;
use std::io::{self, IsTerminal, Write};

use crate::exit_code::ExitCode;

const ANSI_RED: &str = "\x1b[31m";
const ANSI_RESET: &str = "\x1b[0m";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Human,
    Json,
}

impl OutputFormat {
    /// JSON if `--json` was passed or stdout is not a TTY.
    pub fn detect(json_flag: bool) -> Self {
        if json_flag {
            return Self::Json;
        }
        Self::detect_from_terminal(io::stdout().is_terminal())
    }

    pub fn detect_from_terminal(is_tty: bool) -> Self {
        if is_tty {
            Self::Human
        } else {
            Self::Json
        }
    }
}

pub fn print_output<T, F>(format: OutputFormat, value: &T, human_fn: F) -> io::Result<()>
where
    T: Serialize,
    F: FnOnce(&T) -> String,
{
    write_output(&mut io::stdout().lock(), format, value, human_fn)
}

pub fn write_output<W, T, F>(writer: &mut W, format: OutputFormat, value: &T, human_fn: F) -> io::Result<()>
where
    W: Write,
    T: Serialize,
    F: FnOnce(&T) -> String,
{
    match format {
        OutputFormat::Human => writeln!(writer, "{}", human_fn(value)),
        OutputFormat::Json => {
            serde_json::to_writer(&mut *writer, value).map_err(io::Error::other)?;
            writeln!(writer)
        }
    }
}

/// Write an error to stderr in the selected format.
pub fn print_error(format: OutputFormat, code: &str, message: &str) {
    let mut err = io::stderr().lock();
    let _ = writeln!(err, "{}", render_error(format, code, message, io::stderr().is_terminal()));
}

/// Print a command failure with its exit-code classification.
pub fn print_anyhow_error(format: OutputFormat, error: &anyhow::Error) {
    let code = ExitCode::from_error(error);
    print_error(format, code.as_str(), &actionable_message(error));
}

fn actionable_message(error: &anyhow::Error) -> String {
    let message = format!("{error:#}");
    let lower = message.to_ascii_lowercase();

    if lower.contains("not a git repository") {
        return format!("{message}\nRun `kibitz commit` or `kibitz turn-end` once to initialize the repository.");
    }
    if lower.contains("could not read username") || lower.contains("authentication failed") {
        return format!("{message}\nPush credentials are missing for this remote.");
    }
    message
}

fn render_error(format: OutputFormat, code: &str, message: &str, is_tty: bool) -> String {
    match format {
        OutputFormat::Human => render_human_stderr_line("error", message, is_tty, ANSI_RED),
        OutputFormat::Json => {
            serde_json::json!({ "error": { "code": code, "message": message } }).to_string()
        }
    }
}

fn render_human_stderr_line(label: &str, message: &str, is_tty: bool, color: &str) -> String {
    if is_tty {
        format!("{color}{label}:{ANSI_RESET} {message}")
    } else {
        format!("{label}: {message}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kibitz_daemon::git::error::VcsError;

    #[test]
    fn detect_tty_returns_human() {
        assert_eq!(OutputFormat::detect_from_terminal(true), OutputFormat::Human);
    }

    #[test]
    fn detect_pipe_returns_json() {
        assert_eq!(OutputFormat::detect_from_terminal(false), OutputFormat::Json);
    }

    #[test]
    fn detect_json_flag_overrides_tty() {
        assert_eq!(OutputFormat::detect(true), OutputFormat::Json);
    }

    #[test]
    fn write_output_human_format() {
        #[derive(Serialize)]
        struct Info {
            branch: String,
        }
        let info = Info { branch: "main".into() };
        let mut buf = Vec::new();
        write_output(&mut buf, OutputFormat::Human, &info, |i| format!("On branch {}", i.branch)).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "On branch main\n");
    }

    #[test]
    fn write_output_json_does_not_call_human_fn() {
        #[derive(Serialize)]
        struct Info {
            committed: bool,
        }
        let mut buf = Vec::new();
        write_output(&mut buf, OutputFormat::Json, &Info { committed: true }, |_| {
            unreachable!("human_fn should not be called in JSON mode")
        })
        .unwrap();
        let output = String::from_utf8(buf).unwrap();
        assert!(output.ends_with('\n'));
        let parsed: serde_json::Value = serde_json::from_str(output.trim()).unwrap();
        assert_eq!(parsed["committed"], true);
    }

    #[test]
    fn json_error_carries_code() {
        let line = render_error(OutputFormat::Json, "NOT_FOUND", "branch `x` not found", false);
        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["error"]["code"], "NOT_FOUND");
        assert_eq!(parsed["error"]["message"], "branch `x` not found");
    }

    #[test]
    fn human_error_uses_color_only_on_tty() {
        let colored = render_error(OutputFormat::Human, "ERROR", "boom", true);
        assert!(colored.contains(ANSI_RED));
        let plain = render_error(OutputFormat::Human, "ERROR", "boom", false);
        assert_eq!(plain, "error: boom");
    }

    #[test]
    fn not_a_repository_gets_a_hint() {
        let err = anyhow::Error::new(VcsError::command_failed(
            "git status --porcelain",
            "fatal: not a git repository (or any of the parent directories): .git",
        ));
        assert!(actionable_message(&err).contains("kibitz commit"));
    }

    #[test]
    fn plain_messages_pass_through() {
        let err = anyhow::anyhow!("something else");
        assert_eq!(actionable_message(&err), "something else");
    }
}
