//! Idempotent service lifecycle against the remote pm2 process manager.
//!
//! Always issuing "start" duplicates registrations on every redeploy, and
//! always issuing "restart" fails the very first deployment to a fresh
//! host, so the current registration is checked first.

use crate::error::Result;
use crate::runner;
use crate::ssh::{DebugSink, RemoteExec};
use crate::utils::shell;

/// Whether a pm2 registration with the target name currently exists.
/// Derived fresh on every run; never cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Absent,
    Present,
}

/// pm2 wording for a missing process varies across versions; both known
/// variants live here and nowhere else.
const ABSENT_MARKERS: &[&str] = &["doesn't exist", "not found"];

/// Classify a `pm2 show` outcome. Output containing an absent marker means
/// the service is unregistered; any other failure counts as Present so the
/// pipeline falls back to a restart attempt instead of aborting.
pub fn classify_state(stdout: &str, stderr: &str) -> ServiceState {
    let absent = ABSENT_MARKERS
        .iter()
        .any(|marker| stdout.contains(marker) || stderr.contains(marker));
    if absent {
        ServiceState::Absent
    } else {
        ServiceState::Present
    }
}

fn query_state(exec: &dyn RemoteExec, name: &str, sink: &DebugSink) -> ServiceState {
    let query = format!("pm2 show {}", shell::quote_arg(name));
    match runner::run(exec, &query, None, sink) {
        Ok(result) => {
            let state = classify_state(&result.stdout, &result.stderr);
            if state == ServiceState::Present && result.exit_code != 0 {
                log_status!(
                    "service",
                    "Could not determine state of '{}' (exit {}); attempting restart",
                    name,
                    result.exit_code
                );
            }
            state
        }
        Err(err) => {
            log_status!(
                "service",
                "Service query for '{}' failed ({}); attempting restart",
                name,
                err
            );
            ServiceState::Present
        }
    }
}

/// Start the service on first deployment, restart it on every later one.
pub fn ensure_running(
    exec: &dyn RemoteExec,
    target_dir: &str,
    name: &str,
    sink: &DebugSink,
) -> Result<()> {
    log_status!("service", "Restarting services...");

    let cmds = match query_state(exec, name, sink) {
        ServiceState::Absent => vec![format!(
            "cd {} && pm2 start yarn --name \"{}\" -- start",
            shell::quote_path(target_dir),
            name
        )],
        ServiceState::Present => vec![format!("pm2 restart {}", shell::quote_arg(name))],
    };

    runner::run_chain(exec, &cmds, sink).map_err(|err| {
        log_status!("service", "Failed to restart services on target server.");
        err
    })?;

    log_status!("service", "Services have been restarted.");
    Ok(())
}
