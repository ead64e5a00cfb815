//! Multi-account posting automation
//!
//! - `accounts`: per-device account lists
//! - `state`: run phases and the report
//! - `cycle`: the run itself

mod accounts;
mod cycle;
mod state;

pub use accounts::AccountSet;
pub use cycle::AutomationCycle;
pub use state::{CycleReport, CycleState, PairRecord, Phase, Stage, SwitchRecord};
