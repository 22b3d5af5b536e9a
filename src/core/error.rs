use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigNotFound,
    ConfigInvalidJson,
    ConfigInvalidValue,

    ValidationInvalidArgument,

    SshIdentityFileNotFound,
    SshPassphraseRejected,
    SshAuthFailed,
    SshConnectFailed,

    RemoteCommandFailed,

    ArchiveBuildFailed,
    ArchiveUploadFailed,

    InternalIoError,
    InternalJsonError,
    InternalUnexpected,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigNotFound => "config.not_found",
            ErrorCode::ConfigInvalidJson => "config.invalid_json",
            ErrorCode::ConfigInvalidValue => "config.invalid_value",

            ErrorCode::ValidationInvalidArgument => "validation.invalid_argument",

            ErrorCode::SshIdentityFileNotFound => "ssh.identity_file_not_found",
            ErrorCode::SshPassphraseRejected => "ssh.passphrase_rejected",
            ErrorCode::SshAuthFailed => "ssh.auth_failed",
            ErrorCode::SshConnectFailed => "ssh.connect_failed",

            ErrorCode::RemoteCommandFailed => "remote.command_failed",

            ErrorCode::ArchiveBuildFailed => "archive.build_failed",
            ErrorCode::ArchiveUploadFailed => "archive.upload_failed",

            ErrorCode::InternalIoError => "internal.io_error",
            ErrorCode::InternalJsonError => "internal.json_error",
            ErrorCode::InternalUnexpected => "internal.unexpected",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidValueDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub problem: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidArgumentDetails {
    pub field: String,
    pub problem: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCommandFailedDetails {
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalIoErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub details: Value,
    pub hints: Vec<Hint>,
    pub retryable: Option<bool>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>, details: Value) -> Self {
        Self {
            code,
            message: message.into(),
            details,
            hints: Vec::new(),
            retryable: None,
        }
    }

    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::ConfigNotFound,
            "Unable to find configuration file",
            serde_json::json!({ "path": path.into() }),
        )
        .with_hint("Create a liftoff.json in the project directory")
    }

    pub fn config_invalid_json(path: impl Into<String>, err: serde_json::Error) -> Self {
        Self::new(
            ErrorCode::ConfigInvalidJson,
            "Invalid JSON in configuration",
            serde_json::json!({ "path": path.into(), "error": err.to_string() }),
        )
    }

    pub fn config_invalid_value(
        key: impl Into<String>,
        value: Option<String>,
        problem: impl Into<String>,
    ) -> Self {
        let details = serde_json::to_value(ConfigInvalidValueDetails {
            key: key.into(),
            value,
            problem: problem.into(),
        })
        .unwrap_or_else(|_| Value::Object(serde_json::Map::new()));

        Self::new(
            ErrorCode::ConfigInvalidValue,
            "Invalid configuration value",
            details,
        )
    }

    pub fn validation_invalid_argument(
        field: impl Into<String>,
        problem: impl Into<String>,
    ) -> Self {
        let details = serde_json::to_value(InvalidArgumentDetails {
            field: field.into(),
            problem: problem.into(),
        })
        .unwrap_or_else(|_| Value::Object(serde_json::Map::new()));

        Self::new(
            ErrorCode::ValidationInvalidArgument,
            "Invalid argument",
            details,
        )
    }

    pub fn ssh_identity_file_not_found(identity_file: impl Into<String>) -> Self {
        let identity_file = identity_file.into();
        Self::new(
            ErrorCode::SshIdentityFileNotFound,
            format!("Can't find private SSH key in {}", identity_file),
            serde_json::json!({ "identityFile": identity_file }),
        )
        .with_hint("Set private_key_path in liftoff.json to the key you use for this server")
    }

    pub fn ssh_passphrase_rejected() -> Self {
        let mut err = Self::new(
            ErrorCode::SshPassphraseRejected,
            "Wrong private SSH key passphrase provided",
            Value::Object(serde_json::Map::new()),
        );
        err.retryable = Some(true);
        err
    }

    pub fn ssh_auth_failed(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::SshAuthFailed,
            message,
            Value::Object(serde_json::Map::new()),
        )
    }

    pub fn ssh_connect_failed(host: impl Into<String>, error: impl Into<String>) -> Self {
        let host = host.into();
        Self::new(
            ErrorCode::SshConnectFailed,
            format!("Could not connect to remote server {}", host),
            serde_json::json!({ "host": host, "error": error.into() }),
        )
    }

    pub fn remote_command_failed(
        command: impl Into<String>,
        exit_code: i32,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) -> Self {
        let command = command.into();
        let details = serde_json::to_value(RemoteCommandFailedDetails {
            command: command.clone(),
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        })
        .unwrap_or_else(|_| Value::Object(serde_json::Map::new()));

        Self::new(
            ErrorCode::RemoteCommandFailed,
            format!("Remote command failed (exit {}): {}", exit_code, command),
            details,
        )
    }

    pub fn remote_exec_error(command: impl Into<String>, error: impl Into<String>) -> Self {
        let command = command.into();
        Self::new(
            ErrorCode::RemoteCommandFailed,
            format!("Remote command could not be executed: {}", command),
            serde_json::json!({ "command": command, "error": error.into() }),
        )
    }

    pub fn archive_build_failed(problem: impl Into<String>) -> Self {
        let problem = problem.into();
        Self::new(
            ErrorCode::ArchiveBuildFailed,
            format!("Failed to build deployment archive: {}", problem),
            serde_json::json!({ "problem": problem }),
        )
    }

    pub fn archive_upload_failed(problem: impl Into<String>) -> Self {
        let problem = problem.into();
        Self::new(
            ErrorCode::ArchiveUploadFailed,
            format!("Failed to upload deployment archive: {}", problem),
            serde_json::json!({ "problem": problem }),
        )
    }

    pub fn internal_io(error: impl Into<String>, context: Option<String>) -> Self {
        let details = serde_json::to_value(InternalIoErrorDetails {
            error: error.into(),
            context,
        })
        .unwrap_or_else(|_| Value::Object(serde_json::Map::new()));

        Self::new(ErrorCode::InternalIoError, "IO error", details)
    }

    pub fn internal_json(error: impl Into<String>, context: Option<String>) -> Self {
        Self::new(
            ErrorCode::InternalJsonError,
            "JSON error",
            serde_json::json!({ "error": error.into(), "context": context }),
        )
    }

    pub fn internal_unexpected(error: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::InternalUnexpected,
            "Unexpected error",
            serde_json::json!({ "error": error.into() }),
        )
    }

    pub fn with_hint(mut self, message: impl Into<String>) -> Self {
        self.hints.push(Hint {
            message: message.into(),
        });
        self
    }

    /// Stderr captured into the error details, if the error carries any.
    pub fn detail_stderr(&self) -> &str {
        self.details
            .get("stderr")
            .and_then(|v| v.as_str())
            .unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_command_failed_carries_partial_output() {
        let err = Error::remote_command_failed("apt-get update", 100, "partial out", "partial err");
        assert_eq!(err.code, ErrorCode::RemoteCommandFailed);
        assert_eq!(err.details["exitCode"], 100);
        assert_eq!(err.detail_stderr(), "partial err");
        assert!(err.message.contains("apt-get update"));
    }

    #[test]
    fn passphrase_rejection_is_retryable() {
        let err = Error::ssh_passphrase_rejected();
        assert_eq!(err.retryable, Some(true));
        assert_eq!(Error::ssh_auth_failed("nope").retryable, None);
    }

    #[test]
    fn error_codes_are_stable_strings() {
        assert_eq!(ErrorCode::SshConnectFailed.as_str(), "ssh.connect_failed");
        assert_eq!(ErrorCode::ArchiveBuildFailed.as_str(), "archive.build_failed");
    }
}
