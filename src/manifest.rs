//! Global settings for sshfs-sentry
//!
//! Parses the optional `sentry.toml` settings file using serde. A missing
//! file is not an error: every field has a default.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Default location of the settings file
pub const DEFAULT_SETTINGS_PATH: &str = "/etc/sshfs-sentry/sentry.toml";

/// Prefix shared by every generated artifact (units, cron entries, logrotate policy)
pub const ARTIFACT_PREFIX: &str = "sshfs-sentry";

/// Load settings from a file, falling back to defaults when it does not exist
pub fn load(path: &Path) -> Result<Settings> {
    if !path.exists() {
        return Ok(Settings::default());
    }

    let content = fs::read_to_string(path).map_err(|e| Error::SettingsRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let settings: Settings = toml::from_str(&content)?;
    settings.validate()?;

    Ok(settings)
}

/// Root settings structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Directory layout
    #[serde(default)]
    pub layout: Layout,

    /// Mount client configuration
    #[serde(default)]
    pub mount: MountSettings,

    /// Scheduler backend selection
    #[serde(default)]
    pub scheduler: SchedulerSettings,

    /// Release check configuration
    #[serde(default)]
    pub update: UpdateSettings,
}

impl Settings {
    /// Validate the settings
    pub fn validate(&self) -> Result<()> {
        let dirs = [
            ("layout.config_dir", &self.layout.config_dir),
            ("layout.log_dir", &self.layout.log_dir),
            ("layout.bin_dir", &self.layout.bin_dir),
            ("layout.unit_dir", &self.layout.unit_dir),
            ("layout.cron_dir", &self.layout.cron_dir),
            ("layout.logrotate_dir", &self.layout.logrotate_dir),
            ("layout.mount_root", &self.layout.mount_root),
        ];
        for (key, dir) in dirs {
            if !dir.is_absolute() {
                return Err(Error::SettingsValidation(format!(
                    "{} must be an absolute path, got '{}'",
                    key,
                    dir.display()
                )));
            }
        }

        if self.mount.sshfs.trim().is_empty() {
            return Err(Error::SettingsValidation(
                "mount.sshfs must name the mount client binary".into(),
            ));
        }

        if self.update.retry.max_attempts == 0 {
            return Err(Error::SettingsValidation(
                "update.retry.max_attempts must be at least 1".into(),
            ));
        }

        Ok(())
    }
}

/// Directories the tool reads from and writes to
///
/// Every component receives the layout at construction instead of reaching
/// for fixed system paths, so tests can point it at a temporary directory.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Layout {
    /// Server definitions live under `<config_dir>/servers`
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,

    /// Per-server event logs
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Generated check scripts
    #[serde(default = "default_bin_dir")]
    pub bin_dir: PathBuf,

    /// systemd unit directory
    #[serde(default = "default_unit_dir")]
    pub unit_dir: PathBuf,

    /// cron.d directory
    #[serde(default = "default_cron_dir")]
    pub cron_dir: PathBuf,

    /// logrotate policy directory
    #[serde(default = "default_logrotate_dir")]
    pub logrotate_dir: PathBuf,

    /// Parent directory of default mount points
    #[serde(default = "default_mount_root")]
    pub mount_root: PathBuf,

    /// Lock files guarding against overlapping checks
    #[serde(default = "default_lock_dir")]
    pub lock_dir: Option<PathBuf>,
}

fn default_config_dir() -> PathBuf {
    PathBuf::from("/etc/sshfs-sentry")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("/var/log/sshfs-sentry")
}

fn default_bin_dir() -> PathBuf {
    PathBuf::from("/usr/local/lib/sshfs-sentry")
}

fn default_unit_dir() -> PathBuf {
    PathBuf::from("/etc/systemd/system")
}

fn default_cron_dir() -> PathBuf {
    PathBuf::from("/etc/cron.d")
}

fn default_logrotate_dir() -> PathBuf {
    PathBuf::from("/etc/logrotate.d")
}

fn default_mount_root() -> PathBuf {
    PathBuf::from("/mnt")
}

fn default_lock_dir() -> Option<PathBuf> {
    Some(PathBuf::from("/run/sshfs-sentry"))
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            config_dir: default_config_dir(),
            log_dir: default_log_dir(),
            bin_dir: default_bin_dir(),
            unit_dir: default_unit_dir(),
            cron_dir: default_cron_dir(),
            logrotate_dir: default_logrotate_dir(),
            mount_root: default_mount_root(),
            lock_dir: default_lock_dir(),
        }
    }
}

impl Layout {
    /// Build a layout with every directory under `root`
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            config_dir: root.join("etc/sshfs-sentry"),
            log_dir: root.join("var/log/sshfs-sentry"),
            bin_dir: root.join("usr/local/lib/sshfs-sentry"),
            unit_dir: root.join("etc/systemd/system"),
            cron_dir: root.join("etc/cron.d"),
            logrotate_dir: root.join("etc/logrotate.d"),
            mount_root: root.join("mnt"),
            lock_dir: Some(root.join("run/sshfs-sentry")),
        }
    }

    /// Directory holding one `.conf` file per server
    pub fn servers_dir(&self) -> PathBuf {
        self.config_dir.join("servers")
    }

    /// Config file for a server
    pub fn config_path(&self, name: &str) -> PathBuf {
        self.servers_dir().join(format!("{}.conf", name))
    }

    /// Event log for a server
    pub fn log_path(&self, name: &str) -> PathBuf {
        self.log_dir.join(format!("{}.log", name))
    }

    /// Generated check script for a server
    pub fn script_path(&self, name: &str) -> PathBuf {
        self.bin_dir.join(format!("check-{}.sh", name))
    }

    /// Base name of the systemd units for a server
    pub fn unit_name(&self, name: &str) -> String {
        format!("{}-{}", ARTIFACT_PREFIX, name)
    }

    /// systemd service unit path
    pub fn service_path(&self, name: &str) -> PathBuf {
        self.unit_dir.join(format!("{}.service", self.unit_name(name)))
    }

    /// systemd timer unit path
    pub fn timer_path(&self, name: &str) -> PathBuf {
        self.unit_dir.join(format!("{}.timer", self.unit_name(name)))
    }

    /// cron.d entry path (cron ignores files with dots in their names)
    pub fn cron_path(&self, name: &str) -> PathBuf {
        self.cron_dir.join(format!("{}-{}", ARTIFACT_PREFIX, name))
    }

    /// Shared logrotate policy
    pub fn logrotate_path(&self) -> PathBuf {
        self.logrotate_dir.join(ARTIFACT_PREFIX)
    }

    /// Lock file guarding a server's checks
    pub fn lock_path(&self, name: &str) -> Option<PathBuf> {
        self.lock_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.lock", name)))
    }

    /// Default mount point for a server
    pub fn default_mount_point(&self, name: &str) -> PathBuf {
        self.mount_root.join(name)
    }
}

fn default_sshfs() -> String {
    "sshfs".into()
}

fn default_mount_options() -> Vec<String> {
    vec![
        "reconnect".into(),
        "ServerAliveInterval=15".into(),
        "ServerAliveCountMax=3".into(),
        "StrictHostKeyChecking=accept-new".into(),
    ]
}

fn default_allow_other() -> bool {
    true
}

fn default_settle_secs() -> u64 {
    2
}

/// Mount client configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MountSettings {
    /// sshfs binary (name on PATH or absolute path)
    #[serde(default = "default_sshfs")]
    pub sshfs: String,

    /// Extra `-o` options passed to sshfs
    #[serde(default = "default_mount_options")]
    pub options: Vec<String>,

    /// Add `allow_other` so non-root users can read the mount
    #[serde(default = "default_allow_other")]
    pub allow_other: bool,

    /// Delay after each forced or lazy unmount, in seconds
    #[serde(default = "default_settle_secs")]
    pub settle_secs: u64,
}

impl Default for MountSettings {
    fn default() -> Self {
        Self {
            sshfs: default_sshfs(),
            options: default_mount_options(),
            allow_other: default_allow_other(),
            settle_secs: default_settle_secs(),
        }
    }
}

/// Periodic trigger backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerBackend {
    /// systemd service + timer units
    #[default]
    Systemd,
    /// /etc/cron.d entry
    Cron,
}

impl std::fmt::Display for SchedulerBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerBackend::Systemd => write!(f, "systemd"),
            SchedulerBackend::Cron => write!(f, "cron"),
        }
    }
}

/// Scheduler settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerSettings {
    /// Backend used when `add` does not pick one explicitly
    #[serde(default)]
    pub backend: SchedulerBackend,
}

fn default_api_url() -> String {
    "https://api.github.com/repos/sshfs-sentry/sshfs-sentry/releases/latest".into()
}

/// Release check settings
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateSettings {
    /// Endpoint returning the latest release as JSON
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Retry/backoff for the HTTP request
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for UpdateSettings {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            retry: RetryConfig::default(),
        }
    }
}

// Retry configuration defaults
fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    5000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_attempts() -> u8 {
    3
}

fn default_jitter_factor() -> f64 {
    0.25
}

/// Retry/backoff configuration for HTTP operations
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Base delay in milliseconds before first retry
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum delay in milliseconds between retries
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Multiplier for exponential backoff
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Maximum number of attempts
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u8,

    /// Jitter factor (0.0-1.0) to randomize delays
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            max_attempts: default_max_attempts(),
            jitter_factor: default_jitter_factor(),
        }
    }
}
