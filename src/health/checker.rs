//! Mount health check-and-repair procedure
//!
//! One run per invocation, with no state carried between runs:
//! 1. Load the server config (missing or invalid ends the run)
//! 2. Ask the mount table whether the mount point is mounted
//! 3. If mounted, check it is still listed, a directory, and listable;
//!    a healthy mount ends the run, a stuck one is force- then lazy-unmounted
//! 4. Create the mount point if needed and mount it once
//!
//! Retrying is left to the scheduler invoking the check again.

use crate::error::{Error, Result};
use crate::health::guard::{self, CheckGuard, GuardStatus};
use crate::health::outcome::MountCheckOutcome;
use crate::health::state::{CheckRun, Phase};
use crate::journal::Journal;
use crate::manifest::Layout;
use crate::mount::{self, MountProbe, Mounter, Unmounter};
use crate::server::{self, ServerConfig};
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

/// Files a single check invocation works against
#[derive(Debug, Clone)]
pub struct CheckTarget {
    /// Server config file
    pub config_path: PathBuf,
    /// Append-only event log
    pub log_path: PathBuf,
    /// Directory for the overlap lock (no lock when unset)
    pub lock_dir: Option<PathBuf>,
}

impl CheckTarget {
    /// Target paths for a registered server
    pub fn for_server(layout: &Layout, name: &str) -> Self {
        Self {
            config_path: layout.config_path(name),
            log_path: layout.log_path(name),
            lock_dir: layout.lock_dir.clone(),
        }
    }
}

/// What a run concluded and how it got there
#[derive(Debug, Clone)]
pub struct CheckReport {
    pub outcome: MountCheckOutcome,
    pub phases: Vec<Phase>,
}

/// Log a check that could not start because its settings failed to load
///
/// The run goes straight from `Start` to `Done` with `ConfigInvalid`, and
/// nothing is mounted or unmounted.
pub fn settings_failure(
    log_path: &Path,
    settings_path: &Path,
    error: &Error,
) -> Result<CheckReport> {
    let mut journal = Journal::open(log_path)?;
    let mut run = CheckRun::new();
    let outcome = MountCheckOutcome::ConfigInvalid;

    journal.record(&format!(
        "Could not load settings {}: {}",
        settings_path.display(),
        error
    ))?;
    run.finish()?;
    journal.record(&format!("Outcome: {}", outcome))?;

    Ok(CheckReport {
        outcome,
        phases: run.history().to_vec(),
    })
}

/// Health checker driving the mount capabilities
pub struct HealthChecker<'a> {
    probe: &'a dyn MountProbe,
    mounter: &'a dyn Mounter,
    unmounter: &'a dyn Unmounter,
    /// Pause after each forced/lazy unmount
    settle: Duration,
}

impl<'a> HealthChecker<'a> {
    /// Create a checker with the default 2 second settle delay
    pub fn new(
        probe: &'a dyn MountProbe,
        mounter: &'a dyn Mounter,
        unmounter: &'a dyn Unmounter,
    ) -> Self {
        Self {
            probe,
            mounter,
            unmounter,
            settle: Duration::from_secs(2),
        }
    }

    /// Set the delay after each unmount strategy
    pub fn settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Run the procedure once against `target`
    ///
    /// Errors are returned only when the log itself cannot be written;
    /// every other failure is an outcome.
    pub fn run(&self, target: &CheckTarget) -> Result<CheckReport> {
        let mut journal = Journal::open(&target.log_path)?;
        let mut run = CheckRun::new();

        let outcome = self.execute(target, &mut journal, &mut run)?;
        run.finish()?;
        journal.record(&format!("Outcome: {}", outcome))?;

        Ok(CheckReport {
            outcome,
            phases: run.history().to_vec(),
        })
    }

    fn execute(
        &self,
        target: &CheckTarget,
        journal: &mut Journal,
        run: &mut CheckRun,
    ) -> Result<MountCheckOutcome> {
        let config = match self.load_config(&target.config_path, journal)? {
            Ok(config) => config,
            Err(outcome) => return Ok(outcome),
        };
        run.load()?;

        let _guard = match self.acquire_guard(target, &config, journal)? {
            Some(guard) => guard,
            None => return Ok(MountCheckOutcome::AlreadyRunning),
        };

        let mount_point = config.mount_point.as_path();
        let mounted = match self.probe.is_mounted(mount_point) {
            Ok(mounted) => mounted,
            Err(e) => {
                journal.record(&format!(
                    "Could not read mount table ({}), treating {} as not mounted",
                    e,
                    mount_point.display()
                ))?;
                false
            }
        };

        let repairing = if mounted {
            run.present()?;
            let access = match mount::check_access(self.probe, mount_point) {
                Ok(access) => access,
                Err(e) => mount::Accessibility::ListFailed(e.to_string()),
            };

            if access.is_accessible() {
                journal.record(&format!(
                    "{} is mounted and accessible",
                    mount_point.display()
                ))?;
                run.pass()?;
                return Ok(MountCheckOutcome::AlreadyHealthy);
            }

            journal.record(&format!(
                "{} is mounted but not accessible ({}), forcing unmount",
                mount_point.display(),
                access
            ))?;
            run.fail()?;
            self.detach(mount_point);
            true
        } else {
            journal.record(&format!("{} is not mounted", mount_point.display()))?;
            run.absent()?;
            false
        };

        let (success, failure) = if repairing {
            (
                MountCheckOutcome::RepairedAndMounted,
                MountCheckOutcome::RepairAttemptedButFailed,
            )
        } else {
            (
                MountCheckOutcome::MountedFresh,
                MountCheckOutcome::MountFailed,
            )
        };

        if self.attempt_mount(&config, journal)? {
            run.repair()?;
            Ok(success)
        } else {
            run.falter()?;
            Ok(failure)
        }
    }

    /// Load the config, mapping missing/invalid files to their outcomes
    fn load_config(
        &self,
        path: &Path,
        journal: &mut Journal,
    ) -> Result<std::result::Result<ServerConfig, MountCheckOutcome>> {
        if !path.exists() {
            journal.record(&format!("Config file {} not found", path.display()))?;
            return Ok(Err(MountCheckOutcome::ConfigMissing));
        }

        match server::load(path) {
            Ok(config) => Ok(Ok(config)),
            Err(e) => {
                journal.record(&format!("Invalid config {}: {}", path.display(), e))?;
                Ok(Err(MountCheckOutcome::ConfigInvalid))
            }
        }
    }

    /// Take the overlap lock; `None` means another check is running
    ///
    /// A lock that cannot be created is logged and the check runs unguarded.
    fn acquire_guard(
        &self,
        target: &CheckTarget,
        config: &ServerConfig,
        journal: &mut Journal,
    ) -> Result<Option<Option<CheckGuard>>> {
        let Some(dir) = &target.lock_dir else {
            return Ok(Some(None));
        };

        let path = dir.join(format!("{}.lock", config.name));
        match guard::try_acquire(&path) {
            Ok(GuardStatus::Acquired(guard)) => Ok(Some(Some(guard))),
            Ok(GuardStatus::Busy) => {
                journal.record(&format!(
                    "Check already running for {}, skipping",
                    config.name
                ))?;
                Ok(None)
            }
            Err(e) => {
                tracing::warn!(lock = %path.display(), error = %e, "running check without overlap guard");
                Ok(Some(None))
            }
        }
    }

    /// Forced unmount, then lazy unmount; failures are not fatal
    fn detach(&self, mount_point: &Path) {
        if let Err(e) = self.unmounter.force_unmount(mount_point) {
            tracing::debug!(mount_point = %mount_point.display(), error = %e, "forced unmount failed");
        }
        thread::sleep(self.settle);

        if let Err(e) = self.unmounter.lazy_unmount(mount_point) {
            tracing::debug!(mount_point = %mount_point.display(), error = %e, "lazy unmount failed");
        }
        thread::sleep(self.settle);
    }

    /// Create the mount point and mount once; returns whether it worked
    fn attempt_mount(&self, config: &ServerConfig, journal: &mut Journal) -> Result<bool> {
        let mount_point = config.mount_point.as_path();

        if let Err(e) = fs::create_dir_all(mount_point) {
            journal.record(&format!(
                "Failed to create mount point {}: {}",
                mount_point.display(),
                e
            ))?;
            return Ok(false);
        }

        journal.record(&format!(
            "Attempting to mount {} to {}",
            config.remote_spec(),
            mount_point.display()
        ))?;

        match self.mounter.mount(config) {
            Ok(()) => {
                journal.record(&format!(
                    "Successfully mounted {} to {}",
                    config.remote_spec(),
                    mount_point.display()
                ))?;
                Ok(true)
            }
            Err(e) => {
                journal.record(&format!(
                    "Failed to mount {} to {}: {}",
                    config.remote_spec(),
                    mount_point.display(),
                    e
                ))?;
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mount::MountProbe;
    use crate::registry::Registry;
    use std::cell::{Cell, RefCell};
    use std::io;

    /// Fake OS recording every call made through the three capabilities
    struct FakeSystem {
        mounted: Cell<bool>,
        directory: bool,
        listable: bool,
        mount_ok: bool,
        calls: RefCell<Vec<String>>,
        mounted_with: RefCell<Option<ServerConfig>>,
    }

    impl FakeSystem {
        fn new(mounted: bool, listable: bool, mount_ok: bool) -> Self {
            Self {
                mounted: Cell::new(mounted),
                directory: true,
                listable,
                mount_ok,
                calls: RefCell::new(Vec::new()),
                mounted_with: RefCell::new(None),
            }
        }

        fn not_directory(mut self) -> Self {
            self.directory = false;
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.borrow().clone()
        }

        fn changes(&self) -> Vec<String> {
            self.calls()
                .into_iter()
                .filter(|c| c == "mount" || c.ends_with("unmount"))
                .collect()
        }
    }

    impl MountProbe for FakeSystem {
        fn is_mounted(&self, _path: &Path) -> Result<bool> {
            self.calls.borrow_mut().push("is_mounted".into());
            Ok(self.mounted.get())
        }

        fn is_directory(&self, _path: &Path) -> bool {
            self.calls.borrow_mut().push("is_directory".into());
            self.directory
        }

        fn list_dir(&self, _path: &Path) -> io::Result<usize> {
            self.calls.borrow_mut().push("list_dir".into());
            if self.listable {
                Ok(3)
            } else {
                Err(io::Error::new(
                    io::ErrorKind::NotConnected,
                    "Transport endpoint is not connected",
                ))
            }
        }
    }

    impl Mounter for FakeSystem {
        fn mount(&self, config: &ServerConfig) -> Result<()> {
            self.calls.borrow_mut().push("mount".into());
            *self.mounted_with.borrow_mut() = Some(config.clone());
            if self.mount_ok {
                self.mounted.set(true);
                Ok(())
            } else {
                Err(Error::CommandFailed {
                    command: "sshfs".into(),
                    message: "Connection reset by peer".into(),
                })
            }
        }
    }

    impl Unmounter for FakeSystem {
        fn force_unmount(&self, _path: &Path) -> Result<()> {
            self.calls.borrow_mut().push("force_unmount".into());
            Err(Error::CommandFailed {
                command: "umount2".into(),
                message: "Device or resource busy".into(),
            })
        }

        fn lazy_unmount(&self, _path: &Path) -> Result<()> {
            self.calls.borrow_mut().push("lazy_unmount".into());
            self.mounted.set(false);
            Ok(())
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        layout: Layout,
        config: ServerConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let layout = Layout::rooted_at(dir.path());
            let config = ServerConfig::new(
                "plex-media",
                "/k",
                "u@h",
                "/r",
                layout.default_mount_point("plex-media"),
            );
            Self {
                dir,
                layout,
                config,
            }
        }

        fn registered(self) -> Self {
            Registry::new(&self.layout).create(&self.config).unwrap();
            self
        }

        fn target(&self) -> CheckTarget {
            CheckTarget::for_server(&self.layout, &self.config.name)
        }

        fn run(&self, system: &FakeSystem) -> CheckReport {
            HealthChecker::new(system, system, system)
                .settle(Duration::ZERO)
                .run(&self.target())
                .unwrap()
        }

        fn log(&self) -> String {
            fs::read_to_string(self.layout.log_path(&self.config.name)).unwrap()
        }
    }

    #[test]
    fn test_healthy_mount_is_left_alone() {
        let fixture = Fixture::new().registered();
        let system = FakeSystem::new(true, true, true);

        let report = fixture.run(&system);

        assert_eq!(report.outcome, MountCheckOutcome::AlreadyHealthy);
        assert_eq!(report.outcome.exit_code(), 0);
        assert!(system.changes().is_empty());
        assert_eq!(
            report.phases,
            vec![
                Phase::Start,
                Phase::ConfigLoaded,
                Phase::Mounted,
                Phase::Healthy,
                Phase::Done
            ]
        );
        assert!(fixture.log().contains("is mounted and accessible"));
    }

    #[test]
    fn test_stuck_mount_is_repaired() {
        let fixture = Fixture::new().registered();
        let system = FakeSystem::new(true, false, true);

        let report = fixture.run(&system);

        assert_eq!(report.outcome, MountCheckOutcome::RepairedAndMounted);
        assert_eq!(report.outcome.exit_code(), 0);
        assert_eq!(
            system.changes(),
            vec!["force_unmount", "lazy_unmount", "mount"]
        );
        assert_eq!(report.phases[3], Phase::Unhealthy);
        assert_eq!(report.phases[4], Phase::Repaired);
        assert!(fixture.log().contains("not accessible"));
    }

    #[test]
    fn test_mount_point_not_a_directory_is_repaired() {
        let fixture = Fixture::new().registered();
        let system = FakeSystem::new(true, true, true).not_directory();

        let report = fixture.run(&system);

        assert_eq!(report.outcome, MountCheckOutcome::RepairedAndMounted);
        assert_eq!(
            system.changes(),
            vec!["force_unmount", "lazy_unmount", "mount"]
        );
        assert!(!system.calls().contains(&"list_dir".to_string()));
        assert!(fixture.log().contains("not accessible (not a directory)"));
    }

    #[test]
    fn test_stuck_mount_repair_fails() {
        let fixture = Fixture::new().registered();
        let system = FakeSystem::new(true, false, false);

        let report = fixture.run(&system);

        assert_eq!(report.outcome, MountCheckOutcome::RepairAttemptedButFailed);
        assert_eq!(report.outcome.exit_code(), 1);
        assert_eq!(
            system.changes(),
            vec!["force_unmount", "lazy_unmount", "mount"]
        );
        assert!(fixture.log().contains("Connection reset by peer"));
    }

    #[test]
    fn test_unmounted_goes_straight_to_mount() {
        let fixture = Fixture::new().registered();
        let system = FakeSystem::new(false, true, true);

        let report = fixture.run(&system);

        assert_eq!(report.outcome, MountCheckOutcome::MountedFresh);
        assert_eq!(system.changes(), vec!["mount"]);
        assert!(!system.calls().contains(&"list_dir".to_string()));
    }

    #[test]
    fn test_unmounted_mount_fails() {
        let fixture = Fixture::new().registered();
        let system = FakeSystem::new(false, true, false);

        let report = fixture.run(&system);

        assert_eq!(report.outcome, MountCheckOutcome::MountFailed);
        assert_eq!(report.outcome.exit_code(), 1);
        assert_eq!(system.changes(), vec!["mount"]);
    }

    #[test]
    fn test_missing_config() {
        let fixture = Fixture::new();
        let system = FakeSystem::new(false, true, true);

        let report = fixture.run(&system);

        assert_eq!(report.outcome, MountCheckOutcome::ConfigMissing);
        assert_eq!(report.outcome.exit_code(), 1);
        assert!(system.calls().is_empty());
        assert_eq!(report.phases, vec![Phase::Start, Phase::Done]);
        assert!(fixture.log().contains("Outcome: config-missing"));
    }

    #[test]
    fn test_empty_user_host_is_invalid() {
        let fixture = Fixture::new().registered();
        let path = fixture.layout.config_path("plex-media");
        let content = fs::read_to_string(&path)
            .unwrap()
            .replace("USER_HOST=\"u@h\"", "USER_HOST=\"\"");
        fs::write(&path, content).unwrap();
        let system = FakeSystem::new(false, true, true);

        let report = fixture.run(&system);

        assert_eq!(report.outcome, MountCheckOutcome::ConfigInvalid);
        assert_eq!(report.outcome.exit_code(), 1);
        assert!(system.calls().is_empty());
        assert!(fixture.log().contains("USER_HOST"));
    }

    #[test]
    fn test_settings_failure_is_logged() {
        let fixture = Fixture::new();
        let log_path = fixture.layout.log_path("plex-media");
        let error = Error::InvalidField {
            field: "settle_secs",
            message: "expected an integer".into(),
        };

        let report =
            settings_failure(&log_path, Path::new("/etc/sshfs-sentry/sentry.toml"), &error)
                .unwrap();

        assert_eq!(report.outcome, MountCheckOutcome::ConfigInvalid);
        assert_eq!(report.outcome.exit_code(), 1);
        assert_eq!(report.phases, vec![Phase::Start, Phase::Done]);
        let log = fixture.log();
        assert!(log.contains("Could not load settings /etc/sshfs-sentry/sentry.toml"));
        assert!(log.contains("settle_secs"));
        assert!(log.contains("Outcome: config-invalid"));
        assert!(log.lines().all(|l| &l[19..22] == " - "));
    }

    #[test]
    fn test_overlapping_check_skips() {
        let fixture = Fixture::new().registered();
        let lock = fixture
            .layout
            .lock_path("plex-media")
            .unwrap();
        let _held = match guard::try_acquire(&lock).unwrap() {
            GuardStatus::Acquired(g) => g,
            GuardStatus::Busy => panic!("lock unexpectedly busy"),
        };
        let system = FakeSystem::new(false, true, true);

        let report = fixture.run(&system);

        assert_eq!(report.outcome, MountCheckOutcome::AlreadyRunning);
        assert_eq!(report.outcome.exit_code(), 0);
        assert!(system.calls().is_empty());
        assert!(fixture.log().contains("already running"));
    }

    #[test]
    fn test_end_to_end_fresh_mount() {
        let fixture = Fixture::new().registered();
        let mount_point = fixture.config.mount_point.clone();
        assert!(!mount_point.exists());
        let system = FakeSystem::new(false, true, true);

        let report = fixture.run(&system);

        assert_eq!(report.outcome, MountCheckOutcome::MountedFresh);
        assert!(mount_point.is_dir());
        assert_eq!(system.mounted_with.borrow().as_ref(), Some(&fixture.config));

        let log = fixture.log();
        let attempt = format!("Attempting to mount u@h:/r to {}", mount_point.display());
        assert_eq!(log.matches(&attempt).count(), 1);
        assert_eq!(log.matches("Successfully mounted").count(), 1);
        assert!(log.lines().all(|l| l.len() > 22 && &l[19..22] == " - "));
        assert!(fixture.dir.path().exists());
    }
}
