//! Live view of registered servers for `list` and `status`

use crate::journal;
use crate::manifest::Layout;
use crate::mount::{self, MountProbe};
use crate::server::ServerConfig;
use serde::Serialize;

/// Mount state of one server at the time of the query
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    pub name: String,
    pub remote: String,
    pub mount_point: String,
    pub interval_minutes: u32,
    pub trigger: Option<String>,
    pub mounted: bool,
    /// Accessibility when mounted (`None` when not mounted)
    pub access: Option<String>,
    pub last_log: Option<String>,
}

impl ServerStatus {
    /// Probe `config`'s mount point and read its last log line
    ///
    /// `deep` also runs the accessibility check, which can block on a
    /// stuck mount.
    pub fn probe(
        config: &ServerConfig,
        layout: &Layout,
        probe: &dyn MountProbe,
        trigger: Option<String>,
        deep: bool,
    ) -> Self {
        let mounted = probe.is_mounted(&config.mount_point).unwrap_or(false);

        let access = if mounted && deep {
            Some(match mount::check_access(probe, &config.mount_point) {
                Ok(a) => a.to_string(),
                Err(e) => format!("unknown ({})", e),
            })
        } else {
            None
        };

        let last_log = if deep {
            journal::last_line(&layout.log_path(&config.name))
                .ok()
                .flatten()
        } else {
            None
        };

        Self {
            name: config.name.clone(),
            remote: config.remote_spec(),
            mount_point: config.mount_point.display().to_string(),
            interval_minutes: config.check_interval,
            trigger,
            mounted,
            access,
            last_log,
        }
    }

    /// Short state label for tables
    pub fn state(&self) -> &str {
        match (self.mounted, self.access.as_deref()) {
            (false, _) => "unmounted",
            (true, None) | (true, Some("accessible")) => "mounted",
            (true, Some(_)) => "stale",
        }
    }
}
