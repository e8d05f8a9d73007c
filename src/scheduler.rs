//! Periodic triggers for the check scripts
//!
//! Two backends:
//! - systemd: a oneshot service plus a timer, activated through `systemctl`
//! - cron: a `cron.d` entry picked up by the cron daemon on its own

use crate::error::{Error, Result};
use crate::manifest::{Layout, SchedulerBackend};
use crate::render;
use crate::server::ServerConfig;
use std::fs;
use std::path::Path;
use std::process::Command;

/// Installs and removes the periodic trigger for one server
pub trait Scheduler {
    /// Which backend this is
    fn backend(&self) -> SchedulerBackend;

    /// Render the trigger without writing anything
    fn validate(&self, config: &ServerConfig, script: &Path) -> Result<()>;

    /// Install (or replace) the trigger running `script`
    fn install(&self, config: &ServerConfig, script: &Path) -> Result<()>;

    /// Remove the trigger; a missing trigger is not an error
    fn remove(&self, name: &str) -> Result<()>;

    /// Whether a trigger for `name` is present
    fn is_installed(&self, name: &str) -> bool;

    /// Human-readable description of the trigger
    fn describe(&self, name: &str) -> String;
}

/// Service manager control
pub trait ServiceManager {
    fn daemon_reload(&self) -> Result<()>;
    fn enable_now(&self, unit: &str) -> Result<()>;
    fn disable_now(&self, unit: &str) -> Result<()>;
}

/// `systemctl` on the host
#[derive(Debug, Default, Clone, Copy)]
pub struct Systemctl;

impl Systemctl {
    fn run(&self, args: &[&str]) -> Result<()> {
        tracing::debug!(?args, "running systemctl");
        let output = Command::new("systemctl")
            .args(args)
            .output()
            .map_err(|e| Error::CommandFailed {
                command: format!("systemctl {}", args.join(" ")),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(Error::CommandFailed {
                command: format!("systemctl {}", args.join(" ")),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

impl ServiceManager for Systemctl {
    fn daemon_reload(&self) -> Result<()> {
        self.run(&["daemon-reload"])
    }

    fn enable_now(&self, unit: &str) -> Result<()> {
        self.run(&["enable", "--now", unit])
    }

    fn disable_now(&self, unit: &str) -> Result<()> {
        self.run(&["disable", "--now", unit])
    }
}

/// Writes units without touching the running service manager
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopServiceManager;

impl ServiceManager for NoopServiceManager {
    fn daemon_reload(&self) -> Result<()> {
        Ok(())
    }

    fn enable_now(&self, unit: &str) -> Result<()> {
        tracing::info!(unit, "not activating unit");
        Ok(())
    }

    fn disable_now(&self, _unit: &str) -> Result<()> {
        Ok(())
    }
}

/// systemd service + timer backend
pub struct SystemdScheduler<'a> {
    layout: Layout,
    manager: &'a dyn ServiceManager,
}

impl<'a> SystemdScheduler<'a> {
    pub fn new(layout: &Layout, manager: &'a dyn ServiceManager) -> Self {
        Self {
            layout: layout.clone(),
            manager,
        }
    }

    fn timer_unit(&self, name: &str) -> String {
        format!("{}.timer", self.layout.unit_name(name))
    }
}

impl Scheduler for SystemdScheduler<'_> {
    fn backend(&self) -> SchedulerBackend {
        SchedulerBackend::Systemd
    }

    fn validate(&self, config: &ServerConfig, script: &Path) -> Result<()> {
        render::service_unit(config, script)?;
        render::timer_unit(&self.layout, config)?;
        Ok(())
    }

    fn install(&self, config: &ServerConfig, script: &Path) -> Result<()> {
        let service = render::service_unit(config, script)?;
        let timer = render::timer_unit(&self.layout, config)?;

        render::write_artifact(&self.layout.service_path(&config.name), &service, 0o644)?;
        render::write_artifact(&self.layout.timer_path(&config.name), &timer, 0o644)?;

        self.manager.daemon_reload()?;
        self.manager.enable_now(&self.timer_unit(&config.name))?;
        tracing::debug!(server = %config.name, "systemd timer installed");
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<()> {
        let service = self.layout.service_path(name);
        let timer = self.layout.timer_path(name);

        if !timer.exists() && !service.exists() {
            return Ok(());
        }

        if timer.exists() {
            self.manager.disable_now(&self.timer_unit(name))?;
        }
        remove_if_exists(&timer)?;
        remove_if_exists(&service)?;
        self.manager.daemon_reload()
    }

    fn is_installed(&self, name: &str) -> bool {
        self.layout.timer_path(name).exists()
    }

    fn describe(&self, name: &str) -> String {
        format!("systemd timer {}", self.timer_unit(name))
    }
}

/// cron.d entry backend
pub struct CronScheduler {
    layout: Layout,
}

impl CronScheduler {
    pub fn new(layout: &Layout) -> Self {
        Self {
            layout: layout.clone(),
        }
    }
}

impl Scheduler for CronScheduler {
    fn backend(&self) -> SchedulerBackend {
        SchedulerBackend::Cron
    }

    fn validate(&self, config: &ServerConfig, script: &Path) -> Result<()> {
        render::cron_entry(config, script).map(|_| ())
    }

    fn install(&self, config: &ServerConfig, script: &Path) -> Result<()> {
        let entry = render::cron_entry(config, script)?;
        render::write_artifact(&self.layout.cron_path(&config.name), &entry, 0o644)?;
        tracing::debug!(server = %config.name, "cron entry installed");
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<()> {
        remove_if_exists(&self.layout.cron_path(name))
    }

    fn is_installed(&self, name: &str) -> bool {
        self.layout.cron_path(name).exists()
    }

    fn describe(&self, name: &str) -> String {
        format!("cron entry {}", self.layout.cron_path(name).display())
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Service manager recording every call, for tests
#[cfg(test)]
pub mod recording {
    use super::ServiceManager;
    use crate::error::{Error, Result};
    use std::cell::RefCell;

    #[derive(Default)]
    pub struct RecordingServiceManager {
        pub calls: RefCell<Vec<String>>,
        pub fail_enable: bool,
    }

    impl RecordingServiceManager {
        pub fn failing_enable() -> Self {
            Self {
                fail_enable: true,
                ..Self::default()
            }
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.borrow().clone()
        }
    }

    impl ServiceManager for RecordingServiceManager {
        fn daemon_reload(&self) -> Result<()> {
            self.calls.borrow_mut().push("daemon-reload".into());
            Ok(())
        }

        fn enable_now(&self, unit: &str) -> Result<()> {
            self.calls.borrow_mut().push(format!("enable --now {}", unit));
            if self.fail_enable {
                return Err(Error::CommandFailed {
                    command: format!("systemctl enable --now {}", unit),
                    message: "Unit not found".into(),
                });
            }
            Ok(())
        }

        fn disable_now(&self, unit: &str) -> Result<()> {
            self.calls.borrow_mut().push(format!("disable --now {}", unit));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::recording::RecordingServiceManager;
    use super::*;

    fn plex() -> ServerConfig {
        ServerConfig::new("plex-media", "/k", "u@h", "/r", "/mnt/plex-media").with_interval(10)
    }

    #[test]
    fn test_systemd_install_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::rooted_at(dir.path());
        let manager = RecordingServiceManager::default();
        let scheduler = SystemdScheduler::new(&layout, &manager);
        let script = layout.script_path("plex-media");

        scheduler.install(&plex(), &script).unwrap();

        assert!(scheduler.is_installed("plex-media"));
        let timer = fs::read_to_string(layout.timer_path("plex-media")).unwrap();
        assert!(timer.contains("OnUnitActiveSec=10min"));
        let service = fs::read_to_string(layout.service_path("plex-media")).unwrap();
        assert!(service.contains(&format!("ExecStart={}", script.display())));
        assert_eq!(
            manager.calls(),
            vec!["daemon-reload", "enable --now sshfs-sentry-plex-media.timer"]
        );

        scheduler.remove("plex-media").unwrap();

        assert!(!scheduler.is_installed("plex-media"));
        assert!(!layout.service_path("plex-media").exists());
        assert_eq!(
            manager.calls()[2..],
            ["disable --now sshfs-sentry-plex-media.timer", "daemon-reload"]
        );
    }

    #[test]
    fn test_systemd_remove_missing_skips_disable() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::rooted_at(dir.path());
        let manager = RecordingServiceManager::default();

        SystemdScheduler::new(&layout, &manager)
            .remove("ghost")
            .unwrap();

        assert!(manager.calls().is_empty());
    }

    #[test]
    fn test_cron_install_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::rooted_at(dir.path());
        let scheduler = CronScheduler::new(&layout);
        let config = plex().with_interval(5);

        scheduler
            .install(&config, &layout.script_path("plex-media"))
            .unwrap();

        let path = layout.cron_path("plex-media");
        let entry = fs::read_to_string(&path).unwrap();
        assert!(entry.contains("*/5 * * * * root "));
        assert!(entry.ends_with("check-plex-media.sh\n"));
        assert!(scheduler.describe("plex-media").contains("sshfs-sentry-plex-media"));

        scheduler.remove("plex-media").unwrap();
        assert!(!path.exists());
        scheduler.remove("plex-media").unwrap();
    }

    #[test]
    fn test_cron_rejects_unschedulable_interval() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::rooted_at(dir.path());
        let scheduler = CronScheduler::new(&layout);

        let config = plex().with_interval(90);
        assert!(scheduler.validate(&config, Path::new("/x.sh")).is_err());

        let err = scheduler.install(&config, Path::new("/x.sh")).unwrap_err();
        assert!(matches!(err, Error::InvalidField { field: "CHECK_INTERVAL", .. }));
        assert!(!scheduler.is_installed("plex-media"));
    }
}
