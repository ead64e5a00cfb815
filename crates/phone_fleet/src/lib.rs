//! phone_fleet: drive a fleet of Android devices over adb
//!
//! This library provides:
//! - A bounded dispatch pool that runs one command on many devices at once
//!   and reports per-device outcomes
//! - Live view of one device with pointer gestures broadcast to the fleet
//! - UI element search through `uiautomator` dumps
//! - A multi-account posting cycle with per-device failure isolation
//!
//! Everything in flight can be stopped through the shared
//! [`ExecutionContext`]; [`Fleet::stop_all`] cancels, drains and resets.
//!
//! # Example
//!
//! ```no_run
//! use phone_fleet::{CommandRunner, Fleet, TextStrategy};
//!
//! #[tokio::main]
//! async fn main() -> phone_fleet::Result<()> {
//!     let fleet = Fleet::new(CommandRunner::default());
//!     let serials = fleet.discover().await?;
//!     println!("{} device(s)", serials.len());
//!
//!     let report = fleet.tap(540, 1200).await?;
//!     println!("{}", report);
//!
//!     fleet.send_text("hello fleet", TextStrategy::WholeString).await?;
//!     fleet.tap_element("Post").await?;
//!     Ok(())
//! }
//! ```

// Core modules
pub mod context;
pub mod error;

// Configuration module
pub mod config;

// Device bridge
pub mod adb;

// Core functionality
pub mod automation;
pub mod dispatch;
pub mod fleet;
pub mod live;
pub mod locator;

#[cfg(test)]
pub(crate) mod testing;

pub use context::ExecutionContext;
pub use error::{FleetError, Result};

// Config re-exports
pub use config::{
    get_app, list_known_apps, resolve_package, Affordance, AppTarget, AutomationConfig, PostPair,
    SwipeSpec, TimingConfig, TIMING_CONFIG,
};

// ADB re-exports
pub use adb::{
    CommandOutput, CommandRunner, Device, DeviceCommand, DeviceRegistry, KeyCode, Resolution,
    ScrollDirection, TextStrategy,
};

pub use automation::{AutomationCycle, CycleReport, Phase};
pub use dispatch::{BatchReport, CommandOptions, CommandSource, DispatchOutcome, DispatchPool};
pub use fleet::{ConfirmationCallback, Fleet};
pub use live::{FrameRecorder, FrameSink, GestureConfig, LiveView, Scheduler, TokioScheduler};
pub use locator::ElementLocator;
