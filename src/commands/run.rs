use clap::Args;
use liftoff::pipeline::{self, DeployOptions};
use liftoff::ssh::{SecretSource, PASSWORD_ENV};
use liftoff::{config, tty};

#[derive(Args)]
pub struct RunArgs {
    /// Project directory containing liftoff.json and the sources to deploy
    #[arg(short, long, default_value = ".")]
    pub dir: String,

    /// Show verbose debug messages
    #[arg(short, long)]
    pub verbose: bool,
}

pub fn run(args: RunArgs) -> liftoff::Result<()> {
    let project_dir = std::fs::canonicalize(&args.dir).map_err(|e| {
        liftoff::Error::validation_invalid_argument(
            "dir",
            format!("cannot resolve project directory '{}': {}", args.dir, e),
        )
    })?;

    let config = config::load(&project_dir)?;

    // The secret channel is decided exactly once, before connecting.
    let secret = SecretSource::from_env(PASSWORD_ENV)?;

    let mut prompt = tty::StdinPassphrase;
    pipeline::run(
        &config,
        &secret,
        &mut prompt,
        &DeployOptions {
            project_dir,
            verbose: args.verbose,
        },
    )
}
