//! Device discovery and the live device set

use std::sync::{Arc, RwLock};

use lazy_static::lazy_static;
use regex::Regex;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::device;
use super::runner::{CommandRunner, DeviceCommand};
use crate::config::TIMING_CONFIG;
use crate::error::{FleetError, Result};

/// Native pixel size of a device screen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// A device reported ready by the latest scan
#[derive(Debug)]
pub struct Device {
    pub serial: String,
    resolution: OnceCell<Resolution>,
}

impl Device {
    pub fn new(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            resolution: OnceCell::new(),
        }
    }

    /// Resolution if it has already been queried
    pub fn cached_resolution(&self) -> Option<Resolution> {
        self.resolution.get().copied()
    }

    /// Native resolution, queried once through `wm size` and cached
    pub async fn resolution(
        &self,
        runner: &CommandRunner,
        token: &CancellationToken,
    ) -> Result<Resolution> {
        self.resolution
            .get_or_try_init(|| async {
                let command = DeviceCommand::new(&self.serial, device::window_size());
                let output = runner.run(&command, token).await?;
                let resolution = parse_wm_size(&output.text()).ok_or_else(|| {
                    FleetError::Parse(format!("no size in wm output for {}", self.serial))
                })?;
                debug!(
                    "Resolution of {}: {}x{}",
                    self.serial, resolution.width, resolution.height
                );
                Ok(resolution)
            })
            .await
            .copied()
    }
}

/// Parse `adb devices` output into ready serials.
///
/// The header is skipped and only lines whose second field is `device` count;
/// `offline`, `unauthorized` and other states are ignored.
pub fn parse_devices(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|line| !line.starts_with("List of devices"))
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            match (fields.next(), fields.next()) {
                (Some(serial), Some("device")) => Some(serial.to_string()),
                _ => None,
            }
        })
        .collect()
}

lazy_static! {
    static ref WM_SIZE_PATTERN: Regex =
        Regex::new(r"(\d+)x(\d+)").expect("valid size pattern");
}

/// Parse `wm size` output. With an override active both the physical and the
/// override size are printed; the last one wins.
pub fn parse_wm_size(output: &str) -> Option<Resolution> {
    output
        .lines()
        .filter_map(|line| WM_SIZE_PATTERN.captures(line))
        .filter_map(|caps| {
            Some(Resolution {
                width: caps[1].parse().ok()?,
                height: caps[2].parse().ok()?,
            })
        })
        .last()
}

/// The set of devices from the most recent scan.
///
/// Each scan builds a new list and swaps it in; readers hold on to the
/// snapshot they took and never observe a half-updated set.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: RwLock<Arc<Vec<Arc<Device>>>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run discovery and replace the device set.
    pub async fn scan(
        &self,
        runner: &CommandRunner,
        token: &CancellationToken,
    ) -> Result<Vec<String>> {
        let output = runner
            .run_host(
                &["devices".to_string()],
                TIMING_CONFIG.command.discovery(),
                token,
            )
            .await?;
        let serials = parse_devices(&output.text());
        self.replace(&serials);
        info!("Discovered {} device(s)", serials.len());
        Ok(serials)
    }

    /// Swap in a new set, keeping cached data for serials that are still present.
    pub fn replace(&self, serials: &[String]) {
        let previous = self.snapshot();
        let next: Vec<Arc<Device>> = serials
            .iter()
            .map(|serial| {
                previous
                    .iter()
                    .find(|d| &d.serial == serial)
                    .cloned()
                    .unwrap_or_else(|| Arc::new(Device::new(serial.clone())))
            })
            .collect();

        let mut guard = match self.devices.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Arc::new(next);
    }

    pub fn snapshot(&self) -> Arc<Vec<Arc<Device>>> {
        match self.devices.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn serials(&self) -> Vec<String> {
        self.snapshot().iter().map(|d| d.serial.clone()).collect()
    }

    pub fn get(&self, serial: &str) -> Option<Arc<Device>> {
        self.snapshot().iter().find(|d| d.serial == serial).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Resolution of a device from the current set
    pub async fn resolution(
        &self,
        serial: &str,
        runner: &CommandRunner,
        token: &CancellationToken,
    ) -> Result<Resolution> {
        let device = self
            .get(serial)
            .ok_or_else(|| FleetError::UnknownDevice(serial.to_string()))?;
        device.resolution(runner, token).await
    }
}
