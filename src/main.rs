use clap::error::ErrorKind;
use clap::{Parser, Subcommand};

use commands::GlobalArgs;

mod commands;
mod output;
mod tty;

use commands::{addresses, deploy};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "airlift")]
#[command(version = VERSION)]
#[command(about = "Relay locally built images to a remote host through an SSH-tunnelled registry")]
struct Cli {
    /// Print step-by-step progress to stdout
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build, relay and apply the stack on a target host
    Deploy(deploy::DeployArgs),
    /// Show local interfaces and the address a deploy would relay from
    Addresses(addresses::AddressesArgs),
}

fn main() -> std::process::ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => match e.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => e.exit(),
            _ => {
                let _ = e.print();
                return std::process::ExitCode::from(exit_code_to_u8(1));
            }
        },
    };

    airlift::debug::set_enabled(cli.debug);
    let global = GlobalArgs {};

    let (json_result, exit_code) = commands::run_json(cli.command, &global);
    let _ = output::print_json_result(json_result);

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
