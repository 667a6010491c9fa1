// kibitz CLI entry point.

use clap::Parser;

mod commands;
mod exit_code;
mod output;

#[derive(Parser)]
#[command(name = "kibitz", about = "Version control for agent-driven projects")]
struct Cli {
    #[command(subcommand)]
    command: commands::Command,
}

fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let format = output::OutputFormat::detect(cli.command.json_flag());
    match commands::run(cli.command) {
        Ok(()) => exit_code::ExitCode::Success.into(),
        Err(error) => {
            if !exit_code::is_reported(&error) {
                output::print_anyhow_error(format, &error);
            }
            exit_code::ExitCode::from_error(&error).into()
        }
    }
}
