//! Latest-frame slot and the per-device capture loop

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adb::{self, CommandRunner};
use crate::config::TIMING_CONFIG;
use crate::error::FleetError;

/// Raw captured image bytes
#[derive(Debug, Clone)]
pub struct Frame {
    pub bytes: Vec<u8>,
    pub seq: u64,
    pub captured_at: Instant,
}

/// Single-slot holder: a new frame replaces an unconsumed one, never queues
#[derive(Debug, Default)]
pub struct FrameSlot {
    frame: Mutex<Option<Frame>>,
    seq: AtomicU64,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a frame; returns true when an unconsumed frame was dropped
    pub fn put(&self, bytes: Vec<u8>) -> bool {
        let frame = Frame {
            bytes,
            seq: self.seq.fetch_add(1, Ordering::Relaxed) + 1,
            captured_at: Instant::now(),
        };
        self.lock().replace(frame).is_some()
    }

    pub fn take(&self) -> Option<Frame> {
        self.lock().take()
    }

    pub fn clear(&self) {
        self.lock().take();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Frame>> {
        match self.frame.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Capturing,
}

/// Why a capture loop ended
#[derive(Debug)]
pub enum CaptureExit {
    Stopped,
    Failed(FleetError),
}

/// Cloneable stop switch shared by the capture task and the render step
#[derive(Debug, Clone)]
pub struct CaptureControl {
    stop: CancellationToken,
    running: Arc<AtomicBool>,
}

impl CaptureControl {
    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop was requested, directly or through the global token
    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    pub fn state(&self) -> CaptureState {
        if self.is_running() {
            CaptureState::Capturing
        } else {
            CaptureState::Idle
        }
    }
}

#[derive(Debug)]
pub struct CaptureHandle {
    control: CaptureControl,
    task: JoinHandle<CaptureExit>,
}

impl CaptureHandle {
    /// Start capturing `serial` into `slot`.
    ///
    /// The loop stops on `stop`, on cancellation of `global`, or on the first
    /// capture error. A timed-out capture is skipped and the loop carries on.
    pub fn spawn(
        runner: CommandRunner,
        serial: String,
        slot: Arc<FrameSlot>,
        global: &CancellationToken,
    ) -> Self {
        let control = CaptureControl {
            stop: global.child_token(),
            running: Arc::new(AtomicBool::new(true)),
        };

        let task_control = control.clone();
        let task = tokio::spawn(async move {
            info!("Capture started for {}", serial);
            let exit = capture_loop(&runner, &serial, &slot, &task_control.stop).await;
            task_control.running.store(false, Ordering::Release);
            match &exit {
                CaptureExit::Stopped => info!("Capture stopped for {}", serial),
                CaptureExit::Failed(e) => warn!("Capture failed for {}: {}", serial, e),
            }
            exit
        });

        Self { control, task }
    }

    pub fn control(&self) -> CaptureControl {
        self.control.clone()
    }

    pub fn stop(&self) {
        self.control.stop();
    }

    pub fn is_running(&self) -> bool {
        self.control.is_running()
    }

    /// Wait for the loop to end
    pub async fn join(self) -> CaptureExit {
        match self.task.await {
            Ok(exit) => exit,
            Err(_) => CaptureExit::Stopped,
        }
    }
}

async fn capture_loop(
    runner: &CommandRunner,
    serial: &str,
    slot: &FrameSlot,
    stop: &CancellationToken,
) -> CaptureExit {
    loop {
        if stop.is_cancelled() {
            return CaptureExit::Stopped;
        }
        match adb::capture(runner, serial, stop).await {
            Ok(bytes) => {
                // A capture that finished as the session stopped belongs to
                // nobody; the slot may already have been cleared.
                if stop.is_cancelled() {
                    return CaptureExit::Stopped;
                }
                if slot.put(bytes) {
                    debug!("Dropped an unrendered frame for {}", serial);
                }
            }
            Err(FleetError::Timeout) => {
                debug!("Capture timed out for {}, retrying", serial);
                tokio::select! {
                    _ = tokio::time::sleep(TIMING_CONFIG.command.poll_interval()) => {}
                    _ = stop.cancelled() => return CaptureExit::Stopped,
                }
            }
            Err(FleetError::Cancelled) => return CaptureExit::Stopped,
            Err(e) => return CaptureExit::Failed(e),
        }
    }
}
