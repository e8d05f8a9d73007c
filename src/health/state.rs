//! Check run state machine
//!
//! One machine per invocation, using the state-machines crate in dynamic
//! dispatch mode. The checker drives it with the event matching each
//! observation, so an impossible sequence (mounting a healthy mount,
//! finishing mid-repair) fails loudly instead of producing a wrong outcome.

use crate::error::Error;
use state_machines::state_machine;

state_machine! {
    name: CheckMachine,
    dynamic: true,
    initial: Start,
    states: [Start, ConfigLoaded, Mounted, Unmounted, Healthy, Unhealthy, Repaired, RepairFailed, Done],
    events {
        load {
            transition: { from: Start, to: ConfigLoaded }
        }
        present {
            transition: { from: ConfigLoaded, to: Mounted }
        }
        absent {
            transition: { from: ConfigLoaded, to: Unmounted }
        }
        pass {
            transition: { from: Mounted, to: Healthy }
        }
        fail {
            transition: { from: Mounted, to: Unhealthy }
        }
        repair {
            transition: { from: [Unmounted, Unhealthy], to: Repaired }
        }
        falter {
            transition: { from: [Unmounted, Unhealthy], to: RepairFailed }
        }
        finish {
            transition: { from: [Start, ConfigLoaded, Healthy, Repaired, RepairFailed], to: Done }
        }
    }
}

/// Phase of a check run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Start,
    ConfigLoaded,
    Mounted,
    Unmounted,
    Healthy,
    Unhealthy,
    Repaired,
    RepairFailed,
    Done,
}

impl Phase {
    /// Parse phase from the machine's state name
    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "Start" => Some(Phase::Start),
            "ConfigLoaded" => Some(Phase::ConfigLoaded),
            "Mounted" => Some(Phase::Mounted),
            "Unmounted" => Some(Phase::Unmounted),
            "Healthy" => Some(Phase::Healthy),
            "Unhealthy" => Some(Phase::Unhealthy),
            "Repaired" => Some(Phase::Repaired),
            "RepairFailed" => Some(Phase::RepairFailed),
            "Done" => Some(Phase::Done),
            _ => None,
        }
    }
}

/// A single check run's position in the state machine
pub struct CheckRun {
    machine: DynamicCheckMachine<()>,
    history: Vec<Phase>,
}

impl Default for CheckRun {
    fn default() -> Self {
        Self::new()
    }
}

impl CheckRun {
    pub fn new() -> Self {
        Self {
            machine: CheckMachine::new(()).into_dynamic(),
            history: vec![Phase::Start],
        }
    }

    /// Current phase
    pub fn phase(&self) -> Phase {
        Phase::from_name(self.machine.current_state()).unwrap_or(Phase::Start)
    }

    /// Every phase visited so far, starting with `Start`
    pub fn history(&self) -> &[Phase] {
        &self.history
    }

    /// Config was read and validated
    pub fn load(&mut self) -> crate::error::Result<()> {
        self.apply(CheckMachineEvent::Load, "load")
    }

    /// Mount point found in the mount table
    pub fn present(&mut self) -> crate::error::Result<()> {
        self.apply(CheckMachineEvent::Present, "present")
    }

    /// Mount point absent from the mount table
    pub fn absent(&mut self) -> crate::error::Result<()> {
        self.apply(CheckMachineEvent::Absent, "absent")
    }

    /// Accessibility check passed
    pub fn pass(&mut self) -> crate::error::Result<()> {
        self.apply(CheckMachineEvent::Pass, "pass")
    }

    /// Accessibility check failed
    pub fn fail(&mut self) -> crate::error::Result<()> {
        self.apply(CheckMachineEvent::Fail, "fail")
    }

    /// Mount attempt succeeded
    pub fn repair(&mut self) -> crate::error::Result<()> {
        self.apply(CheckMachineEvent::Repair, "repair")
    }

    /// Mount attempt failed
    pub fn falter(&mut self) -> crate::error::Result<()> {
        self.apply(CheckMachineEvent::Falter, "falter")
    }

    /// Run is over
    pub fn finish(&mut self) -> crate::error::Result<()> {
        self.apply(CheckMachineEvent::Finish, "finish")
    }

    fn apply(&mut self, event: CheckMachineEvent, label: &str) -> crate::error::Result<()> {
        let from = self.machine.current_state().to_string();
        self.machine
            .handle(event)
            .map_err(|e| Error::Transition(format!("{} from {}: {:?}", label, from, e)))?;
        self.history.push(self.phase());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let machine = CheckMachine::new(()).into_dynamic();
        assert_eq!(machine.current_state(), "Start");
    }

    #[test]
    fn test_healthy_path() {
        let mut run = CheckRun::new();
        run.load().unwrap();
        run.present().unwrap();
        run.pass().unwrap();
        run.finish().unwrap();
        assert_eq!(
            run.history(),
            &[
                Phase::Start,
                Phase::ConfigLoaded,
                Phase::Mounted,
                Phase::Healthy,
                Phase::Done
            ]
        );
    }

    #[test]
    fn test_repair_path() {
        let mut run = CheckRun::new();
        run.load().unwrap();
        run.present().unwrap();
        run.fail().unwrap();
        run.repair().unwrap();
        assert_eq!(run.phase(), Phase::Repaired);
        run.finish().unwrap();
        assert_eq!(run.phase(), Phase::Done);
    }

    #[test]
    fn test_fresh_mount_failure_path() {
        let mut run = CheckRun::new();
        run.load().unwrap();
        run.absent().unwrap();
        run.falter().unwrap();
        assert_eq!(run.phase(), Phase::RepairFailed);
    }

    #[test]
    fn test_config_failure_finishes_from_start() {
        let mut run = CheckRun::new();
        run.finish().unwrap();
        assert_eq!(run.history(), &[Phase::Start, Phase::Done]);
    }

    #[test]
    fn test_healthy_mount_cannot_be_repaired() {
        let mut run = CheckRun::new();
        run.load().unwrap();
        run.present().unwrap();
        run.pass().unwrap();
        assert!(matches!(run.repair(), Err(Error::Transition(_))));
        assert_eq!(run.phase(), Phase::Healthy);
    }

    #[test]
    fn test_cannot_finish_mid_repair() {
        let mut run = CheckRun::new();
        run.load().unwrap();
        run.absent().unwrap();
        assert!(run.finish().is_err());
    }
}
