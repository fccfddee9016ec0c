//! zr CLI entry point.

mod cli;
mod commands;
mod tracing;

use crate::cli::{CacheCommands, Commands};
use zr_core::Error;

/// Exit code for configuration and graph errors, per the host convention
/// (0 = success, 1 = task failure, 2 = config/graph error, 130 = signal).
const CONFIG_ERROR_EXIT: i32 = 2;

#[tokio::main]
async fn main() {
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("zr panicked: {panic_info}");
        eprintln!("run with RUST_LOG=debug for more information");
    }));

    crate::tracing::init();

    match run().await {
        Ok(code) => std::process::exit(code),
        Err(error) => {
            let report = miette::Report::msg(error.to_string());
            eprintln!("{report:?}");
            std::process::exit(exit_code_for(&error));
        }
    }
}

async fn run() -> zr_core::Result<i32> {
    let cli = cli::parse();
    let use_color = commands::use_color(cli.color);
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Run {
            tasks,
            jobs,
            no_fail_fast,
            no_cache,
            inherit_stdio,
            no_monitor,
        } => {
            commands::run::execute(
                config_path,
                commands::run::RunArgs {
                    tasks,
                    jobs,
                    no_fail_fast,
                    no_cache,
                    inherit_stdio,
                    no_monitor,
                    use_color,
                },
            )
            .await
        }
        Commands::List => commands::list::execute(config_path),
        Commands::History { limit, json } => commands::history::execute(limit, json),
        Commands::Cache {
            command: CacheCommands::Clear,
        } => commands::cache::clear(),
    }
}

fn exit_code_for(error: &Error) -> i32 {
    match error {
        Error::Cancelled => 130,
        _ => CONFIG_ERROR_EXIT,
    }
}
