//! Remote command execution primitives.
//!
//! Provisioning is a sequence of independent shell invocations that must
//! behave as if typed one after another in an interactive shell, directory
//! persistence included. Every issued command therefore gets a trailing
//! `pwd`, and the directory it reports is fed to the next link of a chain.

use crate::error::{Error, Result};
use crate::ssh::{DebugSink, ExecOutput, RemoteExec};
use crate::utils::shell;

/// Sourced in front of every command so nvm-managed binaries resolve.
/// Failure to source is ignored; the script does not exist until the node
/// provisioning step has run once.
const NVM_INIT: &str = ". ~/.nvm/nvm.sh > /dev/null 2>&1 || true";

/// Outcome of one remote command (or an aggregated chain).
#[derive(Debug, Clone, Default)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub signal: Option<String>,
    /// Directory the remote shell ended in. Only trustworthy when the
    /// command line completed (the trailing pwd actually ran).
    pub cwd: Option<String>,
}

pub(crate) fn wrap_command(cmd: &str, cwd: Option<&str>) -> String {
    let body = format!("{}; {} && pwd", NVM_INIT, cmd);
    match cwd {
        Some(dir) => format!("cd {} && {}", shell::quote_path(dir), body),
        None => body,
    }
}

/// Run a single command. A non-zero exit is reported in the result, not as
/// an error; chains and callers decide what is fatal.
pub fn run(
    exec: &dyn RemoteExec,
    cmd: &str,
    cwd: Option<&str>,
    sink: &DebugSink,
) -> Result<CommandResult> {
    sink.line(cmd);
    let output = exec.exec(&wrap_command(cmd, cwd), sink)?;
    Ok(split_cwd(output))
}

/// Run an ordered chain of commands against one session.
///
/// The working directory reported by link *i* becomes the working directory
/// of link *i+1*; stdout and stderr aggregate in append order. The first
/// non-zero link aborts the chain, and the error carries the partial
/// aggregate collected so far. No retry happens at this layer.
pub fn run_chain(exec: &dyn RemoteExec, cmds: &[String], sink: &DebugSink) -> Result<CommandResult> {
    let mut aggregate = CommandResult::default();

    for cmd in cmds {
        let result = run(exec, cmd, aggregate.cwd.as_deref(), sink)?;

        aggregate.stdout.push_str(&result.stdout);
        aggregate.stderr.push_str(&result.stderr);
        aggregate.exit_code = result.exit_code;
        aggregate.signal = result.signal.clone();

        if result.exit_code != 0 {
            return Err(Error::remote_command_failed(
                cmd.as_str(),
                result.exit_code,
                aggregate.stdout,
                aggregate.stderr,
            ));
        }

        if result.cwd.is_some() {
            aggregate.cwd = result.cwd;
        }
    }

    Ok(aggregate)
}

/// Split the trailing pwd line off stdout. The line only exists when the
/// command line completed, so a non-zero exit leaves stdout untouched and
/// the cwd unknown.
fn split_cwd(output: ExecOutput) -> CommandResult {
    if output.exit_code != 0 {
        return CommandResult {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: output.exit_code,
            signal: output.signal,
            cwd: None,
        };
    }

    let (stdout, cwd) = strip_trailing_line(&output.stdout);
    CommandResult {
        stdout,
        stderr: output.stderr,
        exit_code: output.exit_code,
        signal: output.signal,
        cwd,
    }
}

fn strip_trailing_line(stdout: &str) -> (String, Option<String>) {
    let trimmed = stdout.trim_end_matches('\n');
    if trimmed.is_empty() {
        return (String::new(), None);
    }
    match trimmed.rsplit_once('\n') {
        Some((rest, last)) => {
            let body = if rest.is_empty() {
                String::new()
            } else {
                format!("{}\n", rest)
            };
            (body, Some(last.trim().to_string()))
        }
        None => (String::new(), Some(trimmed.trim().to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::ssh::client::fake::FakeExec;

    fn sink() -> DebugSink {
        DebugSink::new(false)
    }

    #[test]
    fn wrap_appends_pwd_and_sources_nvm() {
        let wrapped = wrap_command("apt-get update", None);
        assert!(wrapped.starts_with(". ~/.nvm/nvm.sh > /dev/null 2>&1 || true; "));
        assert!(wrapped.ends_with("apt-get update && pwd"));
    }

    #[test]
    fn wrap_prefixes_threaded_cwd() {
        let wrapped = wrap_command("ls", Some("/var/www/app"));
        assert!(wrapped.starts_with("cd '/var/www/app' && "));
        assert!(wrapped.ends_with("ls && pwd"));
    }

    #[test]
    fn run_parses_cwd_off_last_stdout_line() {
        let exec = FakeExec::new("/home/deploy");
        exec.rule("echo hi", FakeExec::ok("hi\n", "/home/deploy"));

        let result = run(&exec, "echo hi", None, &sink()).unwrap();
        assert_eq!(result.stdout, "hi\n");
        assert_eq!(result.cwd.as_deref(), Some("/home/deploy"));
        assert_eq!(result.exit_code, 0);
    }

    #[test]
    fn run_leaves_cwd_unknown_on_failure() {
        let exec = FakeExec::new("/home/deploy");
        exec.rule("broken", FakeExec::failed(127, "command not found"));

        let result = run(&exec, "broken", None, &sink()).unwrap();
        assert_eq!(result.exit_code, 127);
        assert!(result.cwd.is_none());
        assert_eq!(result.stderr, "command not found");
    }

    #[test]
    fn chain_threads_cwd_from_previous_link() {
        let exec = FakeExec::new("/home/deploy");
        exec.rule("cd one", FakeExec::ok("", "/tmp/one"));
        exec.rule("cd two", FakeExec::ok("", "/tmp/two"));

        let cmds = vec![
            "cd one".to_string(),
            "cd two".to_string(),
            "ls".to_string(),
        ];
        run_chain(&exec, &cmds, &sink()).unwrap();

        let issued = exec.issued();
        assert_eq!(issued.len(), 3);
        // First link starts with no threaded directory
        assert!(!issued[0].starts_with("cd '"));
        // Third link runs in the directory reported after the second
        assert!(issued[2].starts_with("cd '/tmp/two' && "));
    }

    #[test]
    fn chain_aggregates_output_in_order() {
        let exec = FakeExec::new("/home/deploy");
        exec.rule(
            "first",
            ExecOutput {
                stdout: "one\n/home/deploy\n".to_string(),
                stderr: "warning: one\n".to_string(),
                exit_code: 0,
                signal: None,
            },
        );
        exec.rule(
            "second",
            ExecOutput {
                stdout: "two\n/home/deploy\n".to_string(),
                stderr: "warning: two\n".to_string(),
                exit_code: 0,
                signal: None,
            },
        );

        let cmds = vec!["first".to_string(), "second".to_string()];
        let result = run_chain(&exec, &cmds, &sink()).unwrap();
        assert_eq!(result.stdout, "one\ntwo\n");
        assert_eq!(result.stderr, "warning: one\nwarning: two\n");
    }

    #[test]
    fn chain_aborts_on_nonzero_link() {
        let exec = FakeExec::new("/home/deploy");
        exec.rule("first", FakeExec::ok("one\n", "/home/deploy"));
        exec.rule("second", FakeExec::failed(100, "dpkg lock held\n"));

        let cmds = vec![
            "first".to_string(),
            "second".to_string(),
            "third".to_string(),
        ];
        let err = run_chain(&exec, &cmds, &sink()).unwrap_err();

        assert_eq!(err.code, ErrorCode::RemoteCommandFailed);
        // The error carries the partial aggregate up to the failing link
        assert_eq!(err.details["stdout"], "one\n");
        assert_eq!(err.detail_stderr(), "dpkg lock held\n");
        // The third link never executed
        assert_eq!(exec.issued().len(), 2);
    }

    #[test]
    fn strip_trailing_line_handles_bare_pwd() {
        assert_eq!(
            strip_trailing_line("/var/www/app\n"),
            (String::new(), Some("/var/www/app".to_string()))
        );
        assert_eq!(strip_trailing_line(""), (String::new(), None));
    }
}
