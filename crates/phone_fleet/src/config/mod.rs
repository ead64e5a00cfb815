//! Configuration module for phone_fleet
//!
//! This module contains:
//! - `apps`: Known app packages and launch activities
//! - `timing`: Timeouts, polling and pacing, overridable through the environment
//! - `automation`: The JSON-backed automation run configuration

mod apps;
mod automation;
mod timing;

pub use apps::{get_app, list_known_apps, resolve_package, AppTarget, APP_TARGETS};
pub use automation::{Affordance, AutomationConfig, PostPair, SwipeSpec};
pub use timing::{
    CommandTimingConfig, LiveTimingConfig, PoolConfig, TimingConfig, TIMING_CONFIG,
};
