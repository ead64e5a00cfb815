//! UI element search on a device: dump, pull, parse, find, tap

mod ui_tree;

pub use ui_tree::{find_center, parse_hierarchy, Bounds, UiNode};

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adb::{device, CommandRunner, DeviceCommand};
use crate::config::{SwipeSpec, TIMING_CONFIG};
use crate::error::{FleetError, Result};

const REMOTE_DUMP: &str = "/sdcard/window_dump.xml";

/// Finds on-screen elements by content description or visible text
#[derive(Debug, Clone)]
pub struct ElementLocator {
    runner: CommandRunner,
    remote_path: String,
    timeout: Duration,
    /// Swipe used between attempts when the element is off screen
    scroll: SwipeSpec,
    attempts: usize,
}

impl ElementLocator {
    pub fn new(runner: CommandRunner) -> Self {
        Self {
            runner,
            remote_path: REMOTE_DUMP.to_string(),
            timeout: TIMING_CONFIG.command.dump(),
            scroll: SwipeSpec::default(),
            attempts: 3,
        }
    }

    pub fn with_scroll(mut self, scroll: SwipeSpec, attempts: usize) -> Self {
        self.scroll = scroll;
        self.attempts = attempts.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Center of the first element labelled `label` on the current screen.
    ///
    /// A missing element is `ElementNotFound`; a malformed dump is `Parse`.
    pub async fn locate(
        &self,
        serial: &str,
        label: &str,
        token: &CancellationToken,
    ) -> Result<(i32, i32)> {
        let dump = DeviceCommand::new(
            serial,
            vec![
                "shell".into(),
                "uiautomator".into(),
                "dump".into(),
                self.remote_path.clone(),
            ],
        )
        .with_timeout(self.timeout);
        self.runner.run(&dump, token).await?;

        // The directory and the pulled file go away when `scratch` drops,
        // whichever way this function returns.
        let scratch = tempfile::tempdir()?;
        let local = scratch.path().join("window_dump.xml");
        let pull = DeviceCommand::new(
            serial,
            vec![
                "pull".into(),
                self.remote_path.clone(),
                local.to_string_lossy().into_owned(),
            ],
        )
        .with_timeout(self.timeout);
        self.runner.run(&pull, token).await?;

        let raw = tokio::fs::read(&local).await?;
        let xml = String::from_utf8(raw)
            .map_err(|e| FleetError::Parse(format!("UI dump is not UTF-8: {e}")))?;
        let point = find_center(&xml, label)?;
        debug!("Located {:?} on {} at {:?}", label, serial, point);
        Ok(point)
    }

    /// `locate`, scrolling down and retrying while the element is missing
    pub async fn locate_with_scroll(
        &self,
        serial: &str,
        label: &str,
        token: &CancellationToken,
    ) -> Result<(i32, i32)> {
        let mut attempt = 1;
        loop {
            match self.locate(serial, label, token).await {
                Ok(point) => return Ok(point),
                Err(e) if e.is_locate_miss() && attempt < self.attempts => {
                    match &e {
                        FleetError::Parse(reason) => {
                            warn!("Unreadable UI dump on {}: {}", serial, reason)
                        }
                        _ => debug!("{:?} not on screen on {}, scrolling", label, serial),
                    }
                    let scroll = DeviceCommand::new(serial, self.scroll.args());
                    self.runner.run(&scroll, token).await?;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Find `label` (scrolling if needed) and tap its center
    pub async fn tap(
        &self,
        serial: &str,
        label: &str,
        token: &CancellationToken,
    ) -> Result<(i32, i32)> {
        let (x, y) = self.locate_with_scroll(serial, label, token).await?;
        self.runner
            .run(&DeviceCommand::new(serial, device::tap(x, y)), token)
            .await?;
        info!("Tapped {:?} on {} at ({}, {})", label, serial, x, y);
        Ok((x, y))
    }
}
