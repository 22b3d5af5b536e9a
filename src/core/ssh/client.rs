use crate::config::Config;
use crate::error::{Error, Result};
use base64::Engine as _;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::Path;
use std::time::Duration;

/// Environment channel for a preshared remote-login password, base64 encoded.
pub const PASSWORD_ENV: &str = "LIFTOFF_PW";

const SSH_PORT: u16 = 22;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// libssh2 session error codes involved in auth classification
const LIBSSH2_ERROR_FILE: i32 = -16;
const LIBSSH2_ERROR_AUTHENTICATION_FAILED: i32 = -18;
const LIBSSH2_ERROR_PUBLICKEY_UNVERIFIED: i32 = -19;

/// Where the authentication secret comes from. Decided once at the start of
/// a run and passed down; connection code never reads the environment.
#[derive(Debug, Clone)]
pub enum SecretSource {
    /// Private key passphrase, prompted from the operator.
    Interactive,
    /// Remote-login password supplied out of band (already decoded).
    Preshared(String),
}

impl SecretSource {
    pub fn from_env(var: &str) -> Result<Self> {
        match std::env::var(var) {
            Ok(encoded) if !encoded.trim().is_empty() => {
                Ok(Self::Preshared(decode_password(encoded.trim())?))
            }
            _ => Ok(Self::Interactive),
        }
    }
}

pub(crate) fn decode_password(encoded: &str) -> Result<String> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| {
            Error::validation_invalid_argument("password", format!("not valid base64: {}", e))
        })?;
    String::from_utf8(bytes).map_err(|_| {
        Error::validation_invalid_argument("password", "decoded password is not valid UTF-8")
    })
}

/// Supplies private key passphrases for connection attempts.
pub trait PassphrasePrompt {
    fn ask(&mut self) -> Result<String>;
}

/// Line-oriented debug output for verbose mode.
pub struct DebugSink {
    verbose: bool,
}

impl DebugSink {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    pub fn enabled(&self) -> bool {
        self.verbose
    }

    pub fn line(&self, msg: &str) {
        if self.verbose {
            eprintln!("{}", msg);
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub signal: Option<String>,
}

/// Execution surface of an established session. The seam exists so command
/// orchestration can run against a scripted stand-in in tests.
pub trait RemoteExec {
    fn exec(&self, command: &str, sink: &DebugSink) -> Result<ExecOutput>;
    fn upload(&self, local: &Path, remote: &str, sink: &DebugSink) -> Result<()>;
}

#[derive(Debug)]
pub(crate) enum ConnectFailure {
    /// The private key could not be decrypted or parsed.
    BadPassphrase,
    /// The server rejected every offered authentication method.
    AuthRejected(String),
    /// Everything else: unreachable host, handshake failure, timeouts.
    Network(String),
}

pub(crate) enum RetryDecision {
    Reprompt,
    Fatal(Error),
}

/// Single place where the retry policy lives: a rejected passphrase is only
/// retried when there is someone to re-prompt.
pub(crate) fn retry_decision(
    failure: ConnectFailure,
    secret: &SecretSource,
    host: &str,
) -> RetryDecision {
    match (failure, secret) {
        (ConnectFailure::BadPassphrase, SecretSource::Interactive) => RetryDecision::Reprompt,
        (ConnectFailure::BadPassphrase, SecretSource::Preshared(_)) => RetryDecision::Fatal(
            Error::ssh_auth_failed("Private key passphrase rejected with a non-interactive secret"),
        ),
        (ConnectFailure::AuthRejected(msg), SecretSource::Preshared(_)) => RetryDecision::Fatal(
            Error::ssh_auth_failed(format!(
                "Unable to connect with the {} password: {}",
                PASSWORD_ENV, msg
            ))
            .with_hint(
                "You either provided an invalid password or need to set PasswordAuthentication \
                 to 'yes' in the server's /etc/ssh/sshd_config",
            ),
        ),
        (ConnectFailure::AuthRejected(msg), SecretSource::Interactive) => RetryDecision::Fatal(
            Error::ssh_auth_failed(format!("All configured authentication methods failed: {}", msg)),
        ),
        (ConnectFailure::Network(msg), _) => {
            RetryDecision::Fatal(Error::ssh_connect_failed(host, msg))
        }
    }
}

/// Map a libssh2 auth-stage failure onto the taxonomy. A malformed or
/// undecryptable key must never be conflated with a server-side rejection.
pub(crate) fn classify_auth_failure(code: i32, message: &str) -> ConnectFailure {
    match code {
        LIBSSH2_ERROR_FILE | LIBSSH2_ERROR_PUBLICKEY_UNVERIFIED => ConnectFailure::BadPassphrase,
        LIBSSH2_ERROR_AUTHENTICATION_FAILED => ConnectFailure::AuthRejected(message.to_string()),
        _ if message.contains("Unable to extract public key") => ConnectFailure::BadPassphrase,
        _ => ConnectFailure::Network(message.to_string()),
    }
}

enum Credential<'a> {
    Password(&'a str),
    Key { path: &'a str, passphrase: &'a str },
}

fn attempt(
    config: &Config,
    credential: &Credential<'_>,
) -> std::result::Result<ssh2::Session, ConnectFailure> {
    let ip: std::net::IpAddr = config
        .host
        .parse()
        .map_err(|_| ConnectFailure::Network(format!("invalid host address '{}'", config.host)))?;
    let tcp = TcpStream::connect_timeout(&SocketAddr::new(ip, SSH_PORT), CONNECT_TIMEOUT)
        .map_err(|e| ConnectFailure::Network(e.to_string()))?;

    let mut session =
        ssh2::Session::new().map_err(|e| ConnectFailure::Network(e.message().to_string()))?;
    session.set_tcp_stream(tcp);
    session
        .handshake()
        .map_err(|e| ConnectFailure::Network(e.message().to_string()))?;

    let auth = match *credential {
        Credential::Password(password) => session.userauth_password(&config.user, password),
        Credential::Key { path, passphrase } => {
            session.userauth_pubkey_file(&config.user, None, Path::new(path), Some(passphrase))
        }
    };
    if let Err(err) = auth {
        return Err(match err.code() {
            ssh2::ErrorCode::Session(code) => classify_auth_failure(code, err.message()),
            _ => ConnectFailure::Network(err.message().to_string()),
        });
    }
    if !session.authenticated() {
        return Err(ConnectFailure::AuthRejected(
            "server rejected the supplied credentials".to_string(),
        ));
    }

    Ok(session)
}

/// Obtain the next passphrase from the operator. Once a passphrase has been
/// rejected, a prompt failure means no replacement can be supplied and the
/// rejection itself is the reportable outcome.
fn next_passphrase(prompt: &mut dyn PassphrasePrompt, rejected: u32) -> Result<String> {
    match prompt.ask() {
        Ok(passphrase) => Ok(passphrase),
        Err(err) if rejected > 0 => Err(Error::ssh_passphrase_rejected()
            .with_hint(format!("No replacement passphrase could be obtained: {}", err))),
        Err(err) => Err(err),
    }
}

/// One authenticated connection to the target server.
///
/// At most one exists per deployment run; it is owned by the pipeline and
/// disposed on every exit path. The resolved secret is consumed by the
/// connect loop and not retained once the session has authenticated.
pub struct RemoteSession {
    session: ssh2::Session,
    pub host: String,
    /// Monotonic count of passphrase attempts the connect loop made before
    /// authenticating. Stays 0 on the preshared-password path.
    pub passphrase_attempts: u32,
}

impl RemoteSession {
    pub fn connect(
        config: &Config,
        secret: &SecretSource,
        prompt: &mut dyn PassphrasePrompt,
    ) -> Result<Self> {
        // With a preshared password the private key is skipped entirely,
        // validation included.
        let identity_file = match secret {
            SecretSource::Interactive => Some(config.identity_file()?),
            SecretSource::Preshared(_) => None,
        };

        let mut passphrase_attempts: u32 = 0;
        loop {
            let passphrase;
            let credential = match secret {
                SecretSource::Preshared(password) => Credential::Password(password),
                SecretSource::Interactive => {
                    passphrase = next_passphrase(prompt, passphrase_attempts)?;
                    passphrase_attempts += 1;
                    Credential::Key {
                        path: identity_file.as_deref().unwrap_or_default(),
                        passphrase: &passphrase,
                    }
                }
            };

            log_status!("ssh", "Connecting to {}...", config.host);
            match attempt(config, &credential) {
                Ok(session) => {
                    log_status!("ssh", "Connected to {}", config.host);
                    return Ok(Self {
                        session,
                        host: config.host.clone(),
                        passphrase_attempts,
                    });
                }
                Err(failure) => match retry_decision(failure, secret, &config.host) {
                    RetryDecision::Reprompt => {
                        log_status!(
                            "ssh",
                            "Wrong private SSH key passphrase (attempt {}). Try again.",
                            passphrase_attempts
                        );
                    }
                    RetryDecision::Fatal(err) => {
                        log_status!("ssh", "Could not connect to remote server.");
                        return Err(err);
                    }
                },
            }
        }
    }

    pub fn dispose(self) {
        let _ = self.session.disconnect(None, "deployment finished", None);
    }
}

impl RemoteExec for RemoteSession {
    fn exec(&self, command: &str, sink: &DebugSink) -> Result<ExecOutput> {
        let mut channel = self
            .session
            .channel_session()
            .map_err(|e| Error::remote_exec_error(command, e.message()))?;
        channel
            .exec(command)
            .map_err(|e| Error::remote_exec_error(command, e.message()))?;

        // Non-blocking reads let both streams reach the debug sink as lines
        // arrive while the full output is buffered for the result.
        self.session.set_blocking(false);
        let drained = drain_channel(&mut channel, sink);
        self.session.set_blocking(true);
        let (stdout, stderr) = drained.map_err(|e| Error::remote_exec_error(command, e))?;

        let _ = channel.wait_close();
        let exit_code = channel.exit_status().unwrap_or(-1);
        let signal = channel.exit_signal().ok().and_then(|sig| sig.exit_signal);

        Ok(ExecOutput {
            stdout,
            stderr,
            exit_code,
            signal,
        })
    }

    fn upload(&self, local: &Path, remote: &str, sink: &DebugSink) -> Result<()> {
        let mut local_file = std::fs::File::open(local).map_err(|e| {
            Error::archive_upload_failed(format!("cannot open {}: {}", local.display(), e))
        })?;
        let total = local_file.metadata().map(|m| m.len()).unwrap_or(0);

        let sftp = self
            .session
            .sftp()
            .map_err(|e| Error::archive_upload_failed(e.message()))?;
        let mut remote_file = sftp
            .open_mode(
                Path::new(remote),
                ssh2::OpenFlags::WRITE | ssh2::OpenFlags::CREATE | ssh2::OpenFlags::TRUNCATE,
                0o644,
                ssh2::OpenType::File,
            )
            .map_err(|e| {
                Error::archive_upload_failed(format!("cannot create {}: {}", remote, e.message()))
            })?;

        // One chunked stream per archive; a transfer never races with itself.
        let mut sent: u64 = 0;
        let mut buf = [0u8; 32 * 1024];
        loop {
            let n = local_file
                .read(&mut buf)
                .map_err(|e| Error::archive_upload_failed(e.to_string()))?;
            if n == 0 {
                break;
            }
            remote_file
                .write_all(&buf[..n])
                .map_err(|e| Error::archive_upload_failed(e.to_string()))?;
            sent += n as u64;
            sink.line(&format!("uploaded {}/{} bytes", sent, total));
        }

        Ok(())
    }
}

fn drain_channel(
    channel: &mut ssh2::Channel,
    sink: &DebugSink,
) -> std::result::Result<(String, String), String> {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut stdout_lines = LineBuffer::default();
    let mut stderr_lines = LineBuffer::default();

    loop {
        let mut progressed = false;
        let mut buf = [0u8; 8192];

        match channel.read(&mut buf) {
            Ok(n) if n > 0 => {
                stdout.extend_from_slice(&buf[..n]);
                stdout_lines.push(&buf[..n], sink);
                progressed = true;
            }
            Ok(_) => {}
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(err) => return Err(format!("stdout read failed: {}", err)),
        }

        match channel.stderr().read(&mut buf) {
            Ok(n) if n > 0 => {
                stderr.extend_from_slice(&buf[..n]);
                stderr_lines.push(&buf[..n], sink);
                progressed = true;
            }
            Ok(_) => {}
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(err) => return Err(format!("stderr read failed: {}", err)),
        }

        if channel.eof() {
            break;
        }
        if !progressed {
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    stdout_lines.flush(sink);
    stderr_lines.flush(sink);

    Ok((
        String::from_utf8_lossy(&stdout).to_string(),
        String::from_utf8_lossy(&stderr).to_string(),
    ))
}

#[derive(Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, chunk: &[u8], sink: &DebugSink) {
        if !sink.enabled() {
            return;
        }
        self.pending.extend_from_slice(chunk);
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line);
            sink.line(text.trim_end_matches(|c| c == '\r' || c == '\n'));
        }
    }

    fn flush(&mut self, sink: &DebugSink) {
        if sink.enabled() && !self.pending.is_empty() {
            let text = String::from_utf8_lossy(&self.pending);
            sink.line(text.trim_end_matches(|c| c == '\r' || c == '\n'));
            self.pending.clear();
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn decode_password_roundtrip() {
        // "some_password" in base64
        assert_eq!(
            decode_password("c29tZV9wYXNzd29yZA==").unwrap(),
            "some_password"
        );
    }

    #[test]
    fn decode_password_rejects_garbage() {
        let err = decode_password("!!not-base64!!").unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationInvalidArgument);
    }

    #[test]
    fn secret_source_defaults_to_interactive() {
        let source = SecretSource::from_env("LIFTOFF_TEST_UNSET_VAR").unwrap();
        assert!(matches!(source, SecretSource::Interactive));
    }

    #[test]
    fn classify_bad_key_material() {
        assert!(matches!(
            classify_auth_failure(-16, "Unable to extract public key from private key file"),
            ConnectFailure::BadPassphrase
        ));
        assert!(matches!(
            classify_auth_failure(-19, "Callback returned error"),
            ConnectFailure::BadPassphrase
        ));
    }

    #[test]
    fn classify_rejected_auth_distinct_from_bad_key() {
        assert!(matches!(
            classify_auth_failure(-18, "Authentication failed (username/password)"),
            ConnectFailure::AuthRejected(_)
        ));
    }

    #[test]
    fn classify_other_errors_as_network() {
        assert!(matches!(
            classify_auth_failure(-7, "Unable to send data on socket"),
            ConnectFailure::Network(_)
        ));
    }

    #[test]
    fn bad_passphrase_reprompts_only_interactively() {
        let interactive = SecretSource::Interactive;
        let preshared = SecretSource::Preshared("pw".to_string());

        assert!(matches!(
            retry_decision(ConnectFailure::BadPassphrase, &interactive, "10.0.0.5"),
            RetryDecision::Reprompt
        ));
        match retry_decision(ConnectFailure::BadPassphrase, &preshared, "10.0.0.5") {
            RetryDecision::Fatal(err) => assert_eq!(err.code, ErrorCode::SshAuthFailed),
            RetryDecision::Reprompt => panic!("non-interactive secret must not re-prompt"),
        }
    }

    #[test]
    fn rejected_auth_is_always_fatal() {
        for secret in [
            SecretSource::Interactive,
            SecretSource::Preshared("pw".to_string()),
        ] {
            match retry_decision(
                ConnectFailure::AuthRejected("denied".to_string()),
                &secret,
                "10.0.0.5",
            ) {
                RetryDecision::Fatal(err) => assert_eq!(err.code, ErrorCode::SshAuthFailed),
                RetryDecision::Reprompt => panic!("rejected auth must not re-prompt"),
            }
        }
    }

    struct FailingPrompt;

    impl PassphrasePrompt for FailingPrompt {
        fn ask(&mut self) -> Result<String> {
            Err(Error::internal_io("stdin closed", None))
        }
    }

    #[test]
    fn prompt_failure_after_rejection_surfaces_rejected_passphrase() {
        let mut prompt = FailingPrompt;
        let err = next_passphrase(&mut prompt, 1).unwrap_err();
        assert_eq!(err.code, ErrorCode::SshPassphraseRejected);
        assert_eq!(err.retryable, Some(true));
        assert!(!err.hints.is_empty());
    }

    #[test]
    fn prompt_failure_before_any_attempt_propagates_as_is() {
        let mut prompt = FailingPrompt;
        let err = next_passphrase(&mut prompt, 0).unwrap_err();
        assert_eq!(err.code, ErrorCode::InternalIoError);
    }

    #[test]
    fn network_failures_are_fatal_connect_errors() {
        match retry_decision(
            ConnectFailure::Network("no route to host".to_string()),
            &SecretSource::Interactive,
            "10.0.0.5",
        ) {
            RetryDecision::Fatal(err) => {
                assert_eq!(err.code, ErrorCode::SshConnectFailed);
                assert!(err.message.contains("10.0.0.5"));
            }
            RetryDecision::Reprompt => panic!("network failures must not re-prompt"),
        }
    }
}
