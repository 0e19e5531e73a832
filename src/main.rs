use clap::{Parser, Subcommand};

mod commands;
mod output;
mod tty;

use commands::{sync, verify, GlobalArgs};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Without a subcommand, runs the full sync: health check, type generation,
/// commit and push.
#[derive(Parser)]
#[command(name = "relsync")]
#[command(version = VERSION)]
#[command(about = "Unattended release sync: health check, type generation, commit and push")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    sync: sync::SyncArgs,

    #[command(flatten)]
    global: GlobalArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Check credentials against the live service and code host
    VerifyCreds(verify::VerifyArgs),
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let (json_result, exit_code) = commands::run_json(cli.command, cli.sync, &cli.global);

    if let Err(err) = output::print_json_result(json_result) {
        relsync::log_error!("{}", err.message);
        return std::process::ExitCode::from(exit_code_to_u8(1));
    }

    std::process::ExitCode::from(exit_code_to_u8(exit_code))
}

fn exit_code_to_u8(code: i32) -> u8 {
    if code <= 0 {
        0
    } else if code >= 255 {
        255
    } else {
        code as u8
    }
}
