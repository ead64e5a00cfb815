//! Phases and bookkeeping of an automation run

use std::collections::HashMap;
use std::fmt;

use uuid::Uuid;

/// Where the run currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Setup,
    InitialShare {
        pair: usize,
    },
    Switch {
        index: usize,
    },
    Post {
        index: usize,
        pair: usize,
    },
    Cooldown,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Idle => write!(f, "idle"),
            Phase::Setup => write!(f, "setup"),
            Phase::InitialShare { pair } => write!(f, "initial share, pair {}", pair + 1),
            Phase::Switch { index } => write!(f, "switching to account #{}", index + 1),
            Phase::Post { index, pair } => {
                write!(f, "account #{}, posting pair {}", index + 1, pair + 1)
            }
            Phase::Cooldown => write!(f, "cooldown"),
        }
    }
}

/// Which account the devices are on while posting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Whatever account was logged in when the run started
    InitialShare,
    Account(usize),
}

/// Outcome of one pair posted across devices
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairRecord {
    pub stage: Stage,
    pub pair: usize,
    pub posted: Vec<String>,
    /// `(serial, reason)`
    pub failures: Vec<(String, String)>,
}

impl PairRecord {
    /// A pair counts once any device posted it
    pub fn success(&self) -> bool {
        !self.posted.is_empty()
    }
}

/// Outcome of one switching round
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchRecord {
    pub index: usize,
    pub switched: Vec<String>,
    pub failures: Vec<(String, String)>,
}

/// Mutable state of a run, reset at the start of each run
#[derive(Debug, Default)]
pub struct CycleState {
    /// Account index each device is currently on
    pub account_index: HashMap<String, usize>,
    pub pairs: Vec<PairRecord>,
    pub switches: Vec<SwitchRecord>,
    pub cancelled: bool,
}

impl CycleState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_switch(&mut self, record: SwitchRecord) {
        for serial in &record.switched {
            self.account_index.insert(serial.clone(), record.index);
        }
        self.switches.push(record);
    }

    pub fn record_pair(&mut self, record: PairRecord) {
        self.pairs.push(record);
    }

    pub fn into_report(self, run_id: Uuid, devices: Vec<String>) -> CycleReport {
        CycleReport {
            run_id,
            devices,
            pairs: self.pairs,
            switches: self.switches,
            cancelled: self.cancelled,
        }
    }
}

/// Summary of a finished (or cancelled) run
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub run_id: Uuid,
    /// Devices that answered the responsiveness check
    pub devices: Vec<String>,
    pub pairs: Vec<PairRecord>,
    pub switches: Vec<SwitchRecord>,
    pub cancelled: bool,
}

impl CycleReport {
    pub fn successful_pairs(&self) -> usize {
        self.pairs.iter().filter(|p| p.success()).count()
    }

    pub fn device_failures(&self) -> usize {
        self.pairs.iter().map(|p| p.failures.len()).sum::<usize>()
            + self
                .switches
                .iter()
                .map(|s| s.failures.len())
                .sum::<usize>()
    }
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = if self.cancelled { "cancelled" } else { "finished" };
        write!(
            f,
            "Automation {}: {}/{} posts successful on {} device(s), {} device failure(s)",
            verb,
            self.successful_pairs(),
            self.pairs.len(),
            self.devices.len(),
            self.device_failures()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_success_needs_one_device() {
        let record = PairRecord {
            stage: Stage::Account(0),
            pair: 0,
            posted: vec!["a".into(), "b".into()],
            failures: vec![("c".into(), "Command timed out.".into())],
        };
        assert!(record.success());

        let failed = PairRecord {
            posted: vec![],
            ..record.clone()
        };
        assert!(!failed.success());
    }

    #[test]
    fn test_report_summary() {
        let mut state = CycleState::new();
        state.record_switch(SwitchRecord {
            index: 0,
            switched: vec!["a".into()],
            failures: vec![("b".into(), "Element not found: bob".into())],
        });
        state.record_pair(PairRecord {
            stage: Stage::Account(0),
            pair: 0,
            posted: vec!["a".into()],
            failures: vec![],
        });
        assert_eq!(state.account_index.get("a"), Some(&0));

        let report = state.into_report(Uuid::nil(), vec!["a".into(), "b".into()]);
        assert_eq!(
            report.to_string(),
            "Automation finished: 1/1 posts successful on 2 device(s), 1 device failure(s)"
        );
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(
            Phase::Post { index: 0, pair: 1 }.to_string(),
            "account #1, posting pair 2"
        );
    }
}
