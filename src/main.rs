use clap::{Parser, Subcommand};
use std::process::ExitCode;

mod commands;

use commands::run;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "liftoff")]
#[command(version = VERSION)]
#[command(about = "CLI for single-host SSH deployment automation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Perform a production deployment
    Run(run::RunArgs),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run(args) => run::run(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report(&err);
            ExitCode::from(1)
        }
    }
}

fn report(err: &liftoff::Error) {
    eprintln!("{}", err.message);

    let stderr = err.detail_stderr();
    if !stderr.trim().is_empty() {
        eprintln!("{}", stderr.trim_end());
    }

    for hint in &err.hints {
        eprintln!("hint: {}", hint.message);
    }
}
