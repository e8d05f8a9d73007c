//! Server definitions
//!
//! A `ServerConfig` describes one remote sshfs mount. Records are stored as
//! flat `KEY="value"` files so they stay readable by line-based tools.

pub mod parser;

use crate::error::{Error, Result};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

pub use parser::parse_config;

/// Default check interval in minutes
pub const DEFAULT_CHECK_INTERVAL: u32 = 5;

/// Keys understood in a server config file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    ServerName,
    SshKey,
    UserHost,
    RemotePath,
    MountPoint,
    CheckInterval,
}

impl ConfigKey {
    /// All keys in file order
    pub fn all() -> &'static [ConfigKey] {
        &[
            ConfigKey::ServerName,
            ConfigKey::SshKey,
            ConfigKey::UserHost,
            ConfigKey::RemotePath,
            ConfigKey::MountPoint,
            ConfigKey::CheckInterval,
        ]
    }

    /// Key as written in the file
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigKey::ServerName => "SERVER_NAME",
            ConfigKey::SshKey => "SSH_KEY",
            ConfigKey::UserHost => "USER_HOST",
            ConfigKey::RemotePath => "REMOTE_PATH",
            ConfigKey::MountPoint => "MOUNT_POINT",
            ConfigKey::CheckInterval => "CHECK_INTERVAL",
        }
    }

    /// Look up a key by its file spelling
    pub fn from_name(name: &str) -> Option<Self> {
        Self::all().iter().copied().find(|k| k.as_str() == name)
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Check whether a server name matches `[A-Za-z0-9_-]+`
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// One registered remote mount
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerConfig {
    /// Unique identifier
    pub name: String,
    /// Private key handed to ssh as IdentityFile
    pub ssh_key: PathBuf,
    /// Remote endpoint in `user@host` form
    pub user_host: String,
    /// Directory on the remote side
    pub remote_path: String,
    /// Local attach point (absolute)
    pub mount_point: PathBuf,
    /// Minutes between scheduled checks
    pub check_interval: u32,
}

impl ServerConfig {
    /// Create a config with the default check interval
    pub fn new(
        name: impl Into<String>,
        ssh_key: impl Into<PathBuf>,
        user_host: impl Into<String>,
        remote_path: impl Into<String>,
        mount_point: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            ssh_key: ssh_key.into(),
            user_host: user_host.into(),
            remote_path: remote_path.into(),
            mount_point: mount_point.into(),
            check_interval: DEFAULT_CHECK_INTERVAL,
        }
    }

    /// Set the check interval in minutes
    pub fn with_interval(mut self, minutes: u32) -> Self {
        self.check_interval = minutes;
        self
    }

    /// `user@host:/remote/path` as passed to sshfs
    pub fn remote_spec(&self) -> String {
        format!("{}:{}", self.user_host, self.remote_path)
    }

    /// Validate every record invariant
    pub fn validate(&self) -> Result<()> {
        if !is_valid_name(&self.name) {
            return Err(Error::InvalidName(self.name.clone()));
        }

        let fields = [
            (ConfigKey::SshKey, self.ssh_key.to_string_lossy()),
            (ConfigKey::UserHost, self.user_host.as_str().into()),
            (ConfigKey::RemotePath, self.remote_path.as_str().into()),
            (ConfigKey::MountPoint, self.mount_point.to_string_lossy()),
        ];
        for (key, value) in &fields {
            if value.trim().is_empty() {
                return Err(Error::EmptyField(key.as_str()));
            }
            check_storable(*key, value)?;
        }

        match self.user_host.split_once('@') {
            Some((user, host)) if !user.is_empty() && !host.is_empty() && !host.contains('@') => {}
            _ => {
                return Err(Error::InvalidField {
                    field: ConfigKey::UserHost.as_str(),
                    message: format!("expected user@host, got '{}'", self.user_host),
                });
            }
        }

        // sshfs splits `-o` on commas, so the key path must not carry one
        if self.ssh_key.to_string_lossy().contains(',') {
            return Err(Error::InvalidField {
                field: ConfigKey::SshKey.as_str(),
                message: format!(
                    "must not contain ',', got '{}'",
                    self.ssh_key.display()
                ),
            });
        }

        if !self.mount_point.is_absolute() {
            return Err(Error::InvalidField {
                field: ConfigKey::MountPoint.as_str(),
                message: format!(
                    "must be an absolute path, got '{}'",
                    self.mount_point.display()
                ),
            });
        }

        if self.check_interval == 0 {
            return Err(Error::InvalidField {
                field: ConfigKey::CheckInterval.as_str(),
                message: "must be at least 1 minute".into(),
            });
        }

        Ok(())
    }

    /// Render the record in config file syntax
    pub fn to_file_contents(&self) -> String {
        let mut content = String::new();
        content.push_str(&format!(
            "# sshfs-sentry server definition for {}\n",
            self.name
        ));
        content.push_str("# Managed by `sshfs-sentry add` / `sshfs-sentry edit`.\n");
        for key in ConfigKey::all() {
            let value = match key {
                ConfigKey::ServerName => self.name.clone(),
                ConfigKey::SshKey => self.ssh_key.display().to_string(),
                ConfigKey::UserHost => self.user_host.clone(),
                ConfigKey::RemotePath => self.remote_path.clone(),
                ConfigKey::MountPoint => self.mount_point.display().to_string(),
                ConfigKey::CheckInterval => self.check_interval.to_string(),
            };
            content.push_str(&format!("{}=\"{}\"\n", key, value));
        }
        content
    }
}

/// Reject characters that cannot round-trip through the quoted file format
fn check_storable(key: ConfigKey, value: &str) -> Result<()> {
    if let Some(bad) = value
        .chars()
        .find(|c| matches!(c, '"' | '\\' | '$' | '`' | '\n' | '\r'))
    {
        return Err(Error::InvalidField {
            field: key.as_str(),
            message: format!("character {:?} is not allowed", bad),
        });
    }
    Ok(())
}

/// Read and validate a server config file
pub fn load(path: &Path) -> Result<ServerConfig> {
    let content = fs::read_to_string(path).map_err(|e| Error::ConfigRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let config = parse_config(&content, path)?;
    config.validate()?;
    Ok(config)
}
