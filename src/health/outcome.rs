//! Outcome of one health check invocation

use serde::Serialize;
use std::fmt;

/// What a single check run concluded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MountCheckOutcome {
    /// Mounted and accessible, nothing done
    AlreadyHealthy,
    /// Was stuck, unmounted and mounted again
    RepairedAndMounted,
    /// Was stuck, unmounted, but the mount attempt failed
    RepairAttemptedButFailed,
    /// Was not mounted, mounted now
    MountedFresh,
    /// Was not mounted and the mount attempt failed
    MountFailed,
    /// Config file does not exist
    ConfigMissing,
    /// Config file is malformed or incomplete
    ConfigInvalid,
    /// Another check for the same server holds the lock
    AlreadyRunning,
}

impl MountCheckOutcome {
    /// Whether the invocation counts as a success
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            MountCheckOutcome::AlreadyHealthy
                | MountCheckOutcome::RepairedAndMounted
                | MountCheckOutcome::MountedFresh
                | MountCheckOutcome::AlreadyRunning
        )
    }

    /// Process exit code reported to the scheduler
    pub fn exit_code(&self) -> i32 {
        if self.is_success() { 0 } else { 1 }
    }
}

impl fmt::Display for MountCheckOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MountCheckOutcome::AlreadyHealthy => "already-healthy",
            MountCheckOutcome::RepairedAndMounted => "repaired-and-mounted",
            MountCheckOutcome::RepairAttemptedButFailed => "repair-attempted-but-failed",
            MountCheckOutcome::MountedFresh => "mounted-fresh",
            MountCheckOutcome::MountFailed => "mount-failed",
            MountCheckOutcome::ConfigMissing => "config-missing",
            MountCheckOutcome::ConfigInvalid => "config-invalid",
            MountCheckOutcome::AlreadyRunning => "already-running",
        };
        write!(f, "{}", s)
    }
}
