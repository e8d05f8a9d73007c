//! Release check
//!
//! Fetches the latest release from the configured API and compares its tag
//! with the running binary. Retries with exponential backoff.

use crate::error::{Error, Result};
use crate::manifest::{RetryConfig, UpdateSettings};
use crate::sys::Version;
use chrono_machines::{BackoffStrategy, ExponentialBackoff};
use rand::rng;
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::Duration;

/// Create backoff strategy from RetryConfig
fn backoff_from_config(config: &RetryConfig) -> ExponentialBackoff {
    ExponentialBackoff::new()
        .base_delay_ms(config.base_delay_ms)
        .max_delay_ms(config.max_delay_ms)
        .multiplier(config.multiplier)
        .max_attempts(config.max_attempts)
        .jitter_factor(config.jitter_factor)
}

/// Subset of the release API response we use
#[derive(Debug, Clone, Deserialize)]
pub struct Release {
    pub tag_name: String,
    pub html_url: String,
}

/// Comparison of the running and latest versions
#[derive(Debug, Clone, Serialize)]
pub struct UpdateStatus {
    pub current: String,
    pub latest: String,
    pub update_available: bool,
    pub url: String,
}

impl UpdateStatus {
    /// Compare `current` with a fetched release
    pub fn compare(current: Version, release: &Release) -> Result<Self> {
        let latest = Version::parse(&release.tag_name)?;
        Ok(Self {
            current: current.to_string(),
            latest: latest.to_string(),
            update_available: latest > current,
            url: release.html_url.clone(),
        })
    }
}

/// Fetch the latest release JSON
pub fn fetch_latest(url: &str, retry_config: &RetryConfig) -> Result<Release> {
    let backoff = backoff_from_config(retry_config);
    let mut rng = rng();
    let mut attempt: u8 = 0;

    let response = loop {
        attempt += 1;
        let request = ureq::get(url)
            .header("User-Agent", concat!("sshfs-sentry/", env!("CARGO_PKG_VERSION")))
            .header("Accept", "application/vnd.github+json");

        match request.call() {
            Ok(resp) => break resp,
            Err(e) => {
                if let Some(delay_ms) = backoff.delay(attempt, &mut rng) {
                    tracing::debug!(attempt, delay_ms, error = %e, "release check failed, retrying");
                    thread::sleep(Duration::from_millis(delay_ms));
                } else {
                    return Err(Error::UpdateCheck(format!(
                        "request to {} failed after {} attempts: {}",
                        url, attempt, e
                    )));
                }
            }
        }
    };

    let body = response
        .into_body()
        .read_to_string()
        .map_err(|e| Error::UpdateCheck(format!("failed to read response: {}", e)))?;

    parse_release(&body)
}

/// Parse a release API response body
pub fn parse_release(body: &str) -> Result<Release> {
    serde_json::from_str(body)
        .map_err(|e| Error::UpdateCheck(format!("unexpected release response: {}", e)))
}

/// Fetch the latest release and compare it with this binary
pub fn check(settings: &UpdateSettings) -> Result<UpdateStatus> {
    let release = fetch_latest(&settings.api_url, &settings.retry)?;
    UpdateStatus::compare(Version::current()?, &release)
}
