//! Unified error types for sshfs-sentry

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for sshfs-sentry operations
#[derive(Error, Debug)]
pub enum Error {
    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // Settings errors
    #[error("Failed to read settings file '{path}': {source}")]
    SettingsRead { path: PathBuf, source: io::Error },

    #[error("Failed to parse settings: {0}")]
    SettingsParse(#[from] toml::de::Error),

    #[error("Settings validation failed: {0}")]
    SettingsValidation(String),

    // Server config errors
    #[error("Failed to read server config '{path}': {source}")]
    ConfigRead { path: PathBuf, source: io::Error },

    #[error("{path}:{line}: {message}")]
    ConfigParse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("Missing required field {0}")]
    MissingField(&'static str),

    #[error("Field {0} must not be empty")]
    EmptyField(&'static str),

    #[error("Invalid value for {field}: {message}")]
    InvalidField {
        field: &'static str,
        message: String,
    },

    // Registry errors
    #[error("Invalid server name '{0}': only letters, digits, '-' and '_' are allowed")]
    InvalidName(String),

    #[error("Server '{0}' already exists")]
    DuplicateName(String),

    #[error("Server '{0}' not found")]
    NotFound(String),

    // System errors
    #[error("Command '{command}' failed: {message}")]
    CommandFailed { command: String, message: String },

    #[error("'{0}' must be run as root (try sudo)")]
    PermissionDenied(String),

    #[error("Invalid version format: {0}")]
    InvalidVersion(String),

    // Rendering errors
    #[error("Template '{template}' is missing variable '{variable}'")]
    TemplateRender { template: String, variable: String },

    // Update check errors
    #[error("Update check failed: {0}")]
    UpdateCheck(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Checker state machine
    #[error("Invalid check transition: {0}")]
    Transition(String),

    #[error("Aborted by user")]
    Aborted,
}

/// Result type alias for sshfs-sentry operations
pub type Result<T> = std::result::Result<T, Error>;
