use clap::{CommandFactory, Parser, Subcommand};

use commands::GlobalArgs;

mod commands;
mod output;
mod tty;

use commands::{build, deploy};
use etlpack::cancel::CancellationToken;
use etlpack::utils::args;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "etlpack")]
#[command(version = VERSION)]
#[command(about = "Build and deploy ETL project packages")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a package from a project file
    Build(build::BuildArgs),
    /// Deploy a package to a catalog server
    Deploy(deploy::DeployArgs),
}

fn main() -> std::process::ExitCode {
    let argv = args::normalize_legacy_switches(std::env::args().collect());

    let cli = match Cli::try_parse_from(argv) {
        Ok(cli) => cli,
        Err(e) if !e.use_stderr() => e.exit(),
        Err(e) => {
            // Parse errors already carry their usage line.
            let _ = e.print();
            return std::process::ExitCode::from(1);
        }
    };

    let config = match etlpack::defaults::load_config() {
        Ok(config) => config,
        Err(err) => {
            let _ = output::print_result::<serde_json::Value>(Err(err));
            return std::process::ExitCode::from(1);
        }
    };

    let cancel = CancellationToken::new();
    let handler_token = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || handler_token.cancel()) {
        tty::status(&format!("Ctrl-C handling unavailable: {}", e));
    }

    let global = GlobalArgs { config, cancel };
    let (json_result, exit_code) = commands::run_json(cli.command, &global);

    if let Err(err) = &json_result {
        if err.code.is_validation() {
            eprintln!("error: {}", err.message);
            eprintln!();
            eprintln!("{}", Cli::command().render_usage());
        }
    }

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
