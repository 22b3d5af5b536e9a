//! Deployment pipeline: fixed-order orchestration of a single run.

use crate::archive;
use crate::config::Config;
use crate::error::Result;
use crate::provision;
use crate::service;
use crate::ssh::{DebugSink, PassphrasePrompt, RemoteExec, RemoteSession, SecretSource};
use std::path::{Path, PathBuf};

pub struct DeployOptions {
    pub project_dir: PathBuf,
    pub verbose: bool,
}

/// Run one deployment end to end. The session is the one shared resource;
/// it is created here, handed to every step, and disposed on every exit
/// path, success or failure.
pub fn run(
    config: &Config,
    secret: &SecretSource,
    prompt: &mut dyn PassphrasePrompt,
    opts: &DeployOptions,
) -> Result<()> {
    let sink = DebugSink::new(opts.verbose);
    sink.line("Executing 'run' command...");

    let session = RemoteSession::connect(config, secret, prompt)?;
    let outcome = execute(&session, config, &opts.project_dir, &sink);
    session.dispose();
    outcome
}

/// The sequenced body of a run, driven against the execution seam so the
/// whole flow is testable without a live server. Strictly sequential: every
/// step depends on state produced by the previous one.
pub fn execute(
    exec: &dyn RemoteExec,
    config: &Config,
    project_dir: &Path,
    sink: &DebugSink,
) -> Result<()> {
    provision::install_apt_updates(exec, sink)?;
    provision::install_node(exec, sink)?;
    provision::install_yarn(exec, sink)?;
    provision::install_pm2(exec, sink)?;

    provision::ensure_target_directory(exec, &config.target_dir, sink)?;

    let manifest = archive::resolve_sources(&config.sources, project_dir)?;
    let archive_path = archive::build(&manifest, project_dir)?;
    archive::upload(exec, &archive_path, &config.target_dir, sink)?;
    archive::extract_and_cleanup(exec, &config.target_dir, sink)?;

    provision::install_dependencies(exec, &config.target_dir, sink)?;

    let name = config.service_name(project_dir);
    service::ensure_running(exec, &config.target_dir, &name, sink)?;

    archive::remove_local(&archive_path)?;
    Ok(())
}
