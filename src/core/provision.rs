//! Remote host provisioning: apt packages, node via nvm, yarn, pm2.
//!
//! Each step drives one command chain and is independently fatal, except
//! where the benign-noise table below applies.

use crate::error::{Error, Result};
use crate::runner;
use crate::ssh::{DebugSink, RemoteExec};
use crate::utils::shell;

const NVM_INSTALL_URL: &str =
    "https://raw.githubusercontent.com/nvm-sh/nvm/v0.34.0/install.sh";

/// Known-benign stderr fragments, keyed by the tool that emits them. nvm
/// reports an already-satisfied install and a successful checksum
/// verification on stderr as if they were errors. This contract is against
/// external tool output and is deliberately narrow; widen it here only.
const BENIGN_NOISE: &[(&str, &str)] = &[
    ("nvm", "is already installed"),
    ("nvm", "Checksums matched!"),
];

pub fn is_benign_noise(tool: &str, output: &str) -> bool {
    BENIGN_NOISE
        .iter()
        .any(|(t, needle)| *t == tool && output.contains(needle))
}

fn to_chain(cmds: &[&str]) -> Vec<String> {
    cmds.iter().map(|c| c.to_string()).collect()
}

/// Install apt package updates.
pub fn install_apt_updates(exec: &dyn RemoteExec, sink: &DebugSink) -> Result<()> {
    log_status!("provision", "Installing apt package updates...");

    let cmds = to_chain(&[
        "sudo apt-get update",
        "sudo apt-get install -y curl unzip wget",
        "sudo DEBIAN_FRONTEND=noninteractive apt-get upgrade -y",
        "sudo apt-get autoremove -y",
    ]);

    runner::run_chain(exec, &cmds, sink).map_err(|err| {
        log_status!("provision", "Failed to install apt package upgrades.");
        err
    })?;

    log_status!(
        "provision",
        "Latest apt package versions have been installed on target server."
    );
    Ok(())
}

/// Install node on the target server via nvm.
pub fn install_node(exec: &dyn RemoteExec, sink: &DebugSink) -> Result<()> {
    log_status!("provision", "Installing node on target server...");

    let cmds = vec![
        format!("wget -qO- {} | bash", NVM_INSTALL_URL),
        "nvm install stable".to_string(),
    ];

    match runner::run_chain(exec, &cmds, sink) {
        Ok(result) => {
            // nvm reports some successful outcomes on stderr
            if !result.stderr.is_empty() && !is_benign_noise("nvm", &result.stderr) {
                log_status!("provision", "Failed to install node on target server.");
                return Err(Error::remote_command_failed(
                    "nvm install stable",
                    result.exit_code,
                    result.stdout,
                    result.stderr,
                ));
            }
        }
        Err(err) => {
            if !is_benign_noise("nvm", err.detail_stderr()) {
                log_status!("provision", "Failed to install node on target server.");
                return Err(err);
            }
        }
    }

    log_status!(
        "provision",
        "Latest version of node has been installed on target server."
    );
    Ok(())
}

/// Install yarn on the target server.
pub fn install_yarn(exec: &dyn RemoteExec, sink: &DebugSink) -> Result<()> {
    log_status!("provision", "Installing yarn on target server...");

    let cmds = to_chain(&[
        "curl -sS https://dl.yarnpkg.com/debian/pubkey.gpg | \
         APT_KEY_DONT_WARN_ON_DANGEROUS_USAGE=1 sudo apt-key add -",
        "echo \"deb https://dl.yarnpkg.com/debian/ stable main\" | \
         sudo tee /etc/apt/sources.list.d/yarn.list",
        "sudo apt-get update",
        "sudo apt-get install -y yarn",
    ]);

    runner::run_chain(exec, &cmds, sink).map_err(|err| {
        log_status!("provision", "Failed to install yarn on target server.");
        err
    })?;

    log_status!(
        "provision",
        "Latest version of yarn has been installed on target server."
    );
    Ok(())
}

/// Install pm2 globally, then let it self-update.
pub fn install_pm2(exec: &dyn RemoteExec, sink: &DebugSink) -> Result<()> {
    log_status!("provision", "Installing pm2 on target server...");

    let cmds = to_chain(&["npm install -g pm2", "pm2 update"]);

    runner::run_chain(exec, &cmds, sink).map_err(|err| {
        log_status!("provision", "Failed to install pm2 on target server.");
        err
    })?;

    log_status!("provision", "pm2 is installed on target server.");
    Ok(())
}

/// Ensure the remote target directory exists.
pub fn ensure_target_directory(
    exec: &dyn RemoteExec,
    target_dir: &str,
    sink: &DebugSink,
) -> Result<()> {
    log_status!("provision", "Ensuring target directory {} exists...", target_dir);

    let cmds = vec![format!("mkdir -p {}", shell::quote_path(target_dir))];
    runner::run_chain(exec, &cmds, sink).map_err(|err| {
        log_status!("provision", "Failed to create target directory on server.");
        err
    })?;

    log_status!("provision", "Target directory exists.");
    Ok(())
}

/// Install the application's npm dependencies inside the target directory.
pub fn install_dependencies(
    exec: &dyn RemoteExec,
    target_dir: &str,
    sink: &DebugSink,
) -> Result<()> {
    log_status!("provision", "Installing npm dependencies...");

    let cmds = vec![format!(
        "cd {} && yarn install --pure-lockfile --ignore-optional",
        shell::quote_path(target_dir)
    )];
    runner::run_chain(exec, &cmds, sink).map_err(|err| {
        log_status!("provision", "Failed to install npm dependencies.");
        err
    })?;

    log_status!("provision", "All npm dependencies installed.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::ssh::client::fake::FakeExec;
    use crate::ssh::{DebugSink, ExecOutput};

    fn sink() -> DebugSink {
        DebugSink::new(false)
    }

    #[test]
    fn benign_noise_is_tool_scoped() {
        assert!(is_benign_noise("nvm", "v20.1.0 is already installed."));
        assert!(is_benign_noise("nvm", "Checksums matched!"));
        assert!(!is_benign_noise("apt", "v20.1.0 is already installed."));
        assert!(!is_benign_noise("nvm", "EACCES: permission denied"));
    }

    #[test]
    fn node_install_swallows_already_installed_noise() {
        let exec = FakeExec::new("/home/deploy");
        exec.rule(
            "nvm install stable",
            ExecOutput {
                stdout: "/home/deploy\n".to_string(),
                stderr: "v20.1.0 is already installed.\n".to_string(),
                exit_code: 0,
                signal: None,
            },
        );

        assert!(install_node(&exec, &sink()).is_ok());
    }

    #[test]
    fn node_install_swallows_checksum_noise_on_failure() {
        let exec = FakeExec::new("/home/deploy");
        exec.rule(
            "nvm install stable",
            FakeExec::failed(1, "Checksums matched!\n"),
        );

        assert!(install_node(&exec, &sink()).is_ok());
    }

    #[test]
    fn node_install_fails_on_real_stderr() {
        let exec = FakeExec::new("/home/deploy");
        exec.rule(
            "nvm install stable",
            ExecOutput {
                stdout: "/home/deploy\n".to_string(),
                stderr: "EACCES: permission denied\n".to_string(),
                exit_code: 0,
                signal: None,
            },
        );

        let err = install_node(&exec, &sink()).unwrap_err();
        assert_eq!(err.code, ErrorCode::RemoteCommandFailed);
    }

    #[test]
    fn apt_updates_install_expected_packages() {
        let exec = FakeExec::new("/home/deploy");
        install_apt_updates(&exec, &sink()).unwrap();

        let issued = exec.issued();
        assert_eq!(issued.len(), 4);
        assert!(issued[1].contains("apt-get install -y curl unzip wget"));
        assert!(issued[2].contains("DEBIAN_FRONTEND=noninteractive apt-get upgrade -y"));
    }

    #[test]
    fn apt_failure_is_fatal() {
        let exec = FakeExec::new("/home/deploy");
        exec.rule("apt-get update", FakeExec::failed(100, "dpkg lock held"));

        let err = install_apt_updates(&exec, &sink()).unwrap_err();
        assert_eq!(err.code, ErrorCode::RemoteCommandFailed);
        assert_eq!(exec.issued().len(), 1);
    }

    #[test]
    fn dependency_install_uses_frozen_lockfile() {
        let exec = FakeExec::new("/var/www/app");
        install_dependencies(&exec, "/var/www/app", &sink()).unwrap();

        let issued = exec.issued();
        assert_eq!(issued.len(), 1);
        assert!(issued[0]
            .contains("cd '/var/www/app' && yarn install --pure-lockfile --ignore-optional"));
    }
}
