//! Server provisioning
//!
//! Ties the registry, renderer and scheduler together for the operator
//! commands:
//! - `add` writes the record, check script, logrotate policy and trigger,
//!   rolling everything back if a step fails
//! - `edit` rewrites the record and regenerates its artifacts, restoring
//!   the previous record and trigger if the new ones cannot be installed
//! - `remove` deletes the record and tears down everything derived from it
//! - `uninstall` removes every server and the tool's own directories

use crate::error::Result;
use crate::manifest::{DEFAULT_SETTINGS_PATH, Layout, SchedulerBackend};
use crate::mount::{MountProbe, Unmounter};
use crate::registry::Registry;
use crate::render;
use crate::scheduler::{CronScheduler, Scheduler, ServiceManager, SystemdScheduler};
use crate::server::ServerConfig;
use std::fs;
use std::path::{Path, PathBuf};

/// Provisioner for server artifacts
pub struct Provisioner<'a> {
    layout: Layout,
    registry: Registry,
    /// Every backend, so triggers left by a previous backend can be found
    schedulers: Vec<Box<dyn Scheduler + 'a>>,
    /// Backend new triggers are installed with
    active: SchedulerBackend,
    probe: &'a dyn MountProbe,
    unmounter: &'a dyn Unmounter,
    /// Binary the generated check scripts exec
    exe: PathBuf,
    /// Settings file the generated check scripts pass to `check`
    settings: PathBuf,
}

impl<'a> Provisioner<'a> {
    /// Create a provisioner over `layout`
    pub fn new(
        layout: &Layout,
        manager: &'a dyn ServiceManager,
        probe: &'a dyn MountProbe,
        unmounter: &'a dyn Unmounter,
        exe: impl Into<PathBuf>,
    ) -> Self {
        let schedulers: Vec<Box<dyn Scheduler + 'a>> = vec![
            Box::new(SystemdScheduler::new(layout, manager)),
            Box::new(CronScheduler::new(layout)),
        ];

        Self {
            layout: layout.clone(),
            registry: Registry::new(layout),
            schedulers,
            active: SchedulerBackend::default(),
            probe,
            unmounter,
            exe: exe.into(),
            settings: PathBuf::from(DEFAULT_SETTINGS_PATH),
        }
    }

    /// Select the backend for new triggers
    pub fn backend(mut self, backend: SchedulerBackend) -> Self {
        self.active = backend;
        self
    }

    /// Settings file baked into generated check scripts
    pub fn settings(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings = path.into();
        self
    }

    /// The underlying registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Description of the trigger installed for `name`, if any
    pub fn trigger(&self, name: &str) -> Option<String> {
        self.schedulers
            .iter()
            .find(|s| s.is_installed(name))
            .map(|s| s.describe(name))
    }

    /// Backend whose trigger is installed for `name`, if any
    pub fn installed_backend(&self, name: &str) -> Option<SchedulerBackend> {
        self.schedulers
            .iter()
            .find(|s| s.is_installed(name))
            .map(|s| s.backend())
    }

    /// Register a server and install its artifacts
    pub fn add(&self, config: &ServerConfig) -> Result<ServerConfig> {
        self.preflight(config, self.active)?;
        let config = self.registry.create(config)?;

        if let Err(e) = self.deploy(&config, self.active) {
            tracing::warn!(server = %config.name, error = %e, "provisioning failed, rolling back");
            self.teardown(&config.name);
            if let Err(err) = self.registry.delete(&config.name) {
                tracing::warn!(server = %config.name, error = %err, "could not delete record during rollback");
            }
            if self.registry.names().map(|n| n.is_empty()).unwrap_or(false) {
                remove_file_logged(&self.layout.logrotate_path());
            }
            return Err(e);
        }

        tracing::info!(server = %config.name, "server added");
        Ok(config)
    }

    /// Replace a server's settings and regenerate its artifacts
    ///
    /// Every artifact is rendered before anything is written. If installing
    /// the new trigger still fails, the previous record is written back and
    /// its trigger reinstalled with the backend it had.
    pub fn edit(&self, name: &str, config: &ServerConfig) -> Result<ServerConfig> {
        let previous = self.registry.read(name)?;
        let previous_backend = self.installed_backend(name);
        self.preflight(config, self.active)?;

        let updated = self.registry.update(name, config)?;
        if let Err(e) = self.deploy(&updated, self.active) {
            tracing::warn!(server = %name, error = %e, "redeploy failed, restoring previous settings");
            self.restore(name, &previous, previous_backend);
            return Err(e);
        }

        if previous.mount_point != updated.mount_point {
            self.release_mount(&previous.mount_point);
        }

        tracing::info!(server = %name, "server updated");
        Ok(updated)
    }

    /// Put back a record and the trigger it was deployed with
    fn restore(&self, name: &str, previous: &ServerConfig, backend: Option<SchedulerBackend>) {
        if let Err(e) = self.registry.update(name, previous) {
            tracing::warn!(server = %name, error = %e, "could not restore previous record");
            return;
        }

        let result = match backend {
            Some(backend) => self.deploy(previous, backend),
            None => {
                self.remove_triggers(name);
                self.deploy_script(previous).map(drop)
            }
        };
        if let Err(e) = result {
            tracing::warn!(server = %name, error = %e, "could not restore previous trigger");
        }
    }

    /// Delete a server and everything derived from it
    ///
    /// Returns the removed record, or `None` if it could no longer be parsed.
    pub fn remove(&self, name: &str) -> Result<Option<ServerConfig>> {
        let removed = self.registry.delete(name)?;
        self.teardown(name);

        if let Some(config) = &removed {
            self.release_mount(&config.mount_point);
        }

        tracing::info!(server = %name, "server removed");
        Ok(removed)
    }

    /// Remove every server, the settings file and the tool's directories
    ///
    /// Returns the names of the servers removed.
    pub fn uninstall(&self, settings_path: &Path) -> Result<Vec<String>> {
        let names = self.registry.names()?;
        for name in &names {
            self.remove(name)?;
        }

        remove_file_logged(&self.layout.logrotate_path());
        remove_file_logged(settings_path);

        let mut dirs = vec![
            self.layout.servers_dir(),
            self.layout.config_dir.clone(),
            self.layout.log_dir.clone(),
            self.layout.bin_dir.clone(),
        ];
        if let Some(lock_dir) = &self.layout.lock_dir {
            dirs.push(lock_dir.clone());
        }
        for dir in dirs {
            remove_empty_dir(&dir);
        }

        tracing::info!(count = names.len(), "uninstalled");
        Ok(names)
    }

    /// Render every artifact for `config` without writing any of them
    fn preflight(&self, config: &ServerConfig, backend: SchedulerBackend) -> Result<()> {
        let script = self.layout.script_path(&config.name);
        render::check_script(&self.layout, config, &self.exe, &self.settings)?;
        render::logrotate(&self.layout)?;

        for scheduler in self.schedulers.iter().filter(|s| s.backend() == backend) {
            scheduler.validate(config, &script)?;
        }
        Ok(())
    }

    /// Write the check script, log dir, logrotate policy and trigger
    ///
    /// The trigger for `backend` is installed before triggers left by other
    /// backends are removed.
    fn deploy(&self, config: &ServerConfig, backend: SchedulerBackend) -> Result<()> {
        let script = self.deploy_script(config)?;

        for scheduler in self.schedulers.iter().filter(|s| s.backend() == backend) {
            scheduler.install(config, &script)?;
        }
        for scheduler in self.schedulers.iter().filter(|s| s.backend() != backend) {
            if scheduler.is_installed(&config.name) {
                scheduler.remove(&config.name)?;
            }
        }
        Ok(())
    }

    /// Write the check script, log dir and logrotate policy
    fn deploy_script(&self, config: &ServerConfig) -> Result<PathBuf> {
        let script = self.layout.script_path(&config.name);
        let contents = render::check_script(&self.layout, config, &self.exe, &self.settings)?;
        render::write_artifact(&script, &contents, 0o755)?;

        fs::create_dir_all(&self.layout.log_dir)?;
        render::write_artifact(
            &self.layout.logrotate_path(),
            &render::logrotate(&self.layout)?,
            0o644,
        )?;
        Ok(script)
    }

    /// Best-effort removal of every backend's trigger for `name`
    fn remove_triggers(&self, name: &str) {
        for scheduler in &self.schedulers {
            if let Err(e) = scheduler.remove(name) {
                tracing::warn!(server = %name, backend = %scheduler.backend(), error = %e, "could not remove trigger");
            }
        }
    }

    /// Best-effort removal of every artifact derived from `name`
    fn teardown(&self, name: &str) {
        self.remove_triggers(name);

        remove_file_logged(&self.layout.script_path(name));
        remove_file_logged(&self.layout.log_path(name));
        if let Some(lock) = self.layout.lock_path(name) {
            remove_file_logged(&lock);
        }

        for rotated in self.rotated_logs(name) {
            remove_file_logged(&rotated);
        }
    }

    /// Rotated generations of a server log (`<name>.log.1`, `<name>.log.2.gz`, ...)
    fn rotated_logs(&self, name: &str) -> Vec<PathBuf> {
        let prefix = format!("{}.log.", name);
        let Ok(entries) = fs::read_dir(&self.layout.log_dir) else {
            return Vec::new();
        };

        entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(&prefix))
            })
            .collect()
    }

    /// Lazily detach `mount_point` if it is still mounted
    fn release_mount(&self, mount_point: &Path) {
        match self.probe.is_mounted(mount_point) {
            Ok(true) => {
                if let Err(e) = self.unmounter.lazy_unmount(mount_point) {
                    tracing::warn!(mount_point = %mount_point.display(), error = %e, "could not unmount");
                }
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(mount_point = %mount_point.display(), error = %e, "could not read mount table");
            }
        }
    }
}

fn remove_file_logged(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "could not remove"),
    }
}

fn remove_empty_dir(path: &Path) {
    if let Err(e) = fs::remove_dir(path)
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::debug!(path = %path.display(), error = %e, "left directory in place");
    }
}
