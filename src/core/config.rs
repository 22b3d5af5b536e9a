use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration file name, looked up in the project directory.
pub const CONFIG_FILE: &str = "liftoff.json";

/// Service name used when neither the config nor package.json supplies one.
const DEFAULT_SERVICE_NAME: &str = "app";

fn default_private_key_path() -> String {
    "~/.ssh/id_rsa".to_string()
}

/// Deployment configuration for a single target server.
///
/// Immutable for the lifetime of one deployment run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub host: String,
    pub user: String,
    #[serde(default = "default_private_key_path")]
    pub private_key_path: String,
    pub sources: Vec<String>,
    pub target_dir: String,
    #[serde(default)]
    pub name: Option<String>,
}

pub fn load(project_dir: &Path) -> Result<Config> {
    let path = project_dir.join(CONFIG_FILE);
    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::config_not_found(path.to_string_lossy()));
        }
        Err(err) => {
            return Err(Error::internal_io(
                err.to_string(),
                Some(format!("read {}", path.display())),
            ));
        }
    };

    if raw.trim().is_empty() {
        return Err(Error::config_invalid_value(
            "file",
            Some(path.to_string_lossy().to_string()),
            "Configuration file is empty",
        ));
    }

    let config: Config = serde_json::from_str(&raw)
        .map_err(|e| Error::config_invalid_json(path.to_string_lossy(), e))?;
    config.validate()?;
    Ok(config)
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.host.parse::<std::net::IpAddr>().is_err() {
            return Err(Error::config_invalid_value(
                "host",
                Some(self.host.clone()),
                "must be a valid IP and cannot be empty",
            ));
        }
        if self.user.is_empty() {
            return Err(Error::config_invalid_value(
                "user",
                None,
                "must be a string and cannot be empty",
            ));
        }
        if !self.target_dir.starts_with('/') {
            return Err(Error::config_invalid_value(
                "target_dir",
                Some(self.target_dir.clone()),
                "must be an absolute remote path",
            ));
        }
        if self.sources.is_empty() {
            return Err(Error::config_invalid_value(
                "sources",
                None,
                "must be an array of file paths and cannot be empty",
            ));
        }
        Ok(())
    }

    /// Expand and validate the private key path.
    ///
    /// Only called on the key+passphrase auth path; skipped entirely when a
    /// preshared password is in play.
    pub fn identity_file(&self) -> Result<String> {
        let expanded = shellexpand::tilde(&self.private_key_path).to_string();
        if !Path::new(&expanded).exists() {
            return Err(Error::ssh_identity_file_not_found(expanded));
        }
        Ok(expanded)
    }

    /// Logical service name: explicit config value, else the local
    /// package.json name, else a fixed fallback.
    pub fn service_name(&self, project_dir: &Path) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        package_name(project_dir).unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string())
    }
}

fn package_name(project_dir: &Path) -> Option<String> {
    let raw = std::fs::read_to_string(project_dir.join("package.json")).ok()?;
    let value: serde_json::Value = serde_json::from_str(&raw).ok()?;
    value
        .get("name")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}
