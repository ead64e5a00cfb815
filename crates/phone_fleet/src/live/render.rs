//! Cooperative render step: drain the latest frame, fit it, present it

use std::sync::{Arc, Mutex};
use std::time::Duration;

use image::DynamicImage;
use tracing::{debug, warn};

use super::frame::{CaptureControl, FrameSlot};
use super::mapper::{Letterbox, Size};
use crate::adb::{decode_frame, resize_frame};
use crate::error::{FleetError, Result};

/// Deferred execution, standing in for a UI event loop timer
pub trait Scheduler: Send + Sync {
    fn schedule_after(&self, delay: Duration, task: Box<dyn FnOnce() + Send>);
}

/// Runs scheduled tasks on a tokio runtime
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: tokio::runtime::Handle,
}

impl TokioScheduler {
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Scheduler for the runtime this is called from
    pub fn current() -> Result<Self> {
        tokio::runtime::Handle::try_current()
            .map(Self::new)
            .map_err(|e| FleetError::Config(format!("no tokio runtime: {e}")))
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_after(&self, delay: Duration, task: Box<dyn FnOnce() + Send>) {
        self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            task();
        });
    }
}

/// Queue of tasks run only when the owner asks, for driving render steps by hand
#[derive(Default)]
pub struct ManualScheduler {
    queue: Mutex<Vec<(Duration, Box<dyn FnOnce() + Send>)>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    /// Run every queued task once; tasks they schedule wait for the next call.
    /// Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let tasks: Vec<_> = std::mem::take(&mut *self.lock());
        let count = tasks.len();
        for (_, task) in tasks {
            task();
        }
        count
    }

    /// Delay of the oldest queued task
    pub fn next_delay(&self) -> Option<Duration> {
        self.lock().first().map(|(delay, _)| *delay)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(Duration, Box<dyn FnOnce() + Send>)>> {
        match self.queue.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_after(&self, delay: Duration, task: Box<dyn FnOnce() + Send>) {
        self.lock().push((delay, task));
    }
}

/// Where rendered frames go; the presentation layer implements this
pub trait FrameSink: Send + Sync {
    /// Current drawable area for the device's view
    fn viewport(&self, serial: &str) -> Size;

    /// Show a frame already resized to `letterbox.display_size()`
    fn present(&self, serial: &str, image: DynamicImage, letterbox: Letterbox);
}

/// One device's render pipeline
pub struct Renderer {
    serial: String,
    slot: Arc<FrameSlot>,
    capture: CaptureControl,
    sink: Arc<dyn FrameSink>,
    scheduler: Arc<dyn Scheduler>,
    interval: Duration,
    /// Native size of the last presented frame
    frame_size: Arc<Mutex<Option<Size>>>,
}

impl Renderer {
    pub fn new(
        serial: String,
        slot: Arc<FrameSlot>,
        capture: CaptureControl,
        sink: Arc<dyn FrameSink>,
        scheduler: Arc<dyn Scheduler>,
        interval: Duration,
        frame_size: Arc<Mutex<Option<Size>>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            serial,
            slot,
            capture,
            sink,
            scheduler,
            interval,
            frame_size,
        })
    }

    pub fn start(self: &Arc<Self>) {
        self.schedule();
    }

    fn schedule(self: &Arc<Self>) {
        let renderer = Arc::clone(self);
        self.scheduler
            .schedule_after(self.interval, Box::new(move || renderer.step()));
    }

    /// Render the newest frame if one arrived, then reschedule while capture runs.
    pub fn step(self: Arc<Self>) {
        if self.capture.is_stopped() {
            self.slot.clear();
            debug!("Render loop for {} finished", self.serial);
            return;
        }
        if let Some(frame) = self.slot.take() {
            match decode_frame(&frame.bytes) {
                Ok(image) => self.present(image),
                Err(e) => {
                    warn!("Dropping live view for {}: {}", self.serial, e);
                    self.capture.stop();
                    return;
                }
            }
        }

        if self.capture.is_running() {
            self.schedule();
        } else {
            debug!("Render loop for {} finished", self.serial);
        }
    }

    fn present(&self, image: DynamicImage) {
        let native = Size::new(image.width(), image.height());
        let letterbox = Letterbox::compute(self.sink.viewport(&self.serial), native);
        let display = letterbox.display_size();
        let fitted = resize_frame(&image, display.width, display.height);

        match self.frame_size.lock() {
            Ok(mut size) => *size = Some(native),
            Err(poisoned) => *poisoned.into_inner() = Some(native),
        }
        self.sink.present(&self.serial, fitted, letterbox);
    }
}
