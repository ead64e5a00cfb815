//! Live view of one selected device, with pointer input broadcast to the fleet

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info};

use super::frame::{CaptureHandle, CaptureState, FrameSlot};
use super::gesture::{GestureConfig, GestureEvent, PointerSample};
use super::mapper::{Letterbox, Size};
use super::render::{FrameSink, Renderer, Scheduler};
use crate::config::TIMING_CONFIG;
use crate::dispatch::{BatchReport, CommandOptions, CommandSource};
use crate::error::{FleetError, Result};
use crate::fleet::Fleet;

/// Everything the live view keeps for one serial
#[derive(Debug)]
pub struct DeviceSession {
    pub serial: String,
    slot: Arc<FrameSlot>,
    capture: Option<CaptureHandle>,
    pending_press: Option<PointerSample>,
    frame_size: Arc<Mutex<Option<Size>>>,
}

impl DeviceSession {
    fn new(serial: &str) -> Self {
        Self {
            serial: serial.to_string(),
            slot: Arc::new(FrameSlot::new()),
            capture: None,
            pending_press: None,
            frame_size: Arc::new(Mutex::new(None)),
        }
    }

    pub fn state(&self) -> CaptureState {
        match &self.capture {
            Some(handle) if handle.is_running() => CaptureState::Capturing,
            _ => CaptureState::Idle,
        }
    }

    /// Native size of the last frame shown for this device
    pub fn frame_size(&self) -> Option<Size> {
        match self.frame_size.lock() {
            Ok(size) => *size,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn stop(&mut self) {
        if let Some(handle) = self.capture.take() {
            handle.stop();
        }
        self.slot.clear();
        self.pending_press = None;
    }
}

/// Mirrors one device at a time and turns pointer gestures on it into
/// commands for every device in the fleet.
pub struct LiveView {
    fleet: Arc<Fleet>,
    sink: Arc<dyn FrameSink>,
    scheduler: Arc<dyn Scheduler>,
    gestures: GestureConfig,
    sessions: Mutex<HashMap<String, DeviceSession>>,
    selected: Mutex<Option<String>>,
}

impl LiveView {
    pub fn new(fleet: Arc<Fleet>, sink: Arc<dyn FrameSink>, scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            fleet,
            sink,
            scheduler,
            gestures: GestureConfig::default(),
            sessions: Mutex::new(HashMap::new()),
            selected: Mutex::new(None),
        }
    }

    pub fn with_gestures(mut self, gestures: GestureConfig) -> Self {
        self.gestures = gestures;
        self
    }

    pub fn selected(&self) -> Option<String> {
        lock(&self.selected).clone()
    }

    pub fn state(&self, serial: &str) -> CaptureState {
        lock(&self.sessions)
            .get(serial)
            .map(DeviceSession::state)
            .unwrap_or(CaptureState::Idle)
    }

    /// Start mirroring `serial`, stopping whatever was mirrored before.
    ///
    /// Selecting the device that already failed restarts its capture.
    pub fn select(&self, serial: &str) -> Result<()> {
        if self.fleet.registry().get(serial).is_none() {
            return Err(FleetError::UnknownDevice(serial.to_string()));
        }

        let mut selected = lock(&self.selected);
        let mut sessions = lock(&self.sessions);

        if let Some(previous) = selected.take() {
            if let Some(session) = sessions.get_mut(&previous) {
                session.stop();
            }
        }

        let session = sessions
            .entry(serial.to_string())
            .or_insert_with(|| DeviceSession::new(serial));
        session.stop();
        // Each capture gets its own slot so a frame from the previous loop
        // can never reach the new renderer.
        session.slot = Arc::new(FrameSlot::new());

        let capture = CaptureHandle::spawn(
            self.fleet.runner().clone(),
            serial.to_string(),
            session.slot.clone(),
            &self.fleet.context().token(),
        );
        Renderer::new(
            serial.to_string(),
            session.slot.clone(),
            capture.control(),
            self.sink.clone(),
            self.scheduler.clone(),
            TIMING_CONFIG.live.render_interval(),
            session.frame_size.clone(),
        )
        .start();
        session.capture = Some(capture);

        *selected = Some(serial.to_string());
        info!("Live view on {}", serial);
        Ok(())
    }

    /// Stop mirroring; the view goes back to idle
    pub fn stop(&self) {
        let mut selected = lock(&self.selected);
        if let Some(serial) = selected.take() {
            if let Some(session) = lock(&self.sessions).get_mut(&serial) {
                session.stop();
            }
            info!("Live view on {} stopped", serial);
        }
    }

    /// Pointer went down on the selected device's view
    pub fn press(&self, x: f64, y: f64) {
        self.press_sample(PointerSample::now(x, y));
    }

    pub fn press_sample(&self, sample: PointerSample) {
        let Some(serial) = self.selected() else {
            return;
        };
        if let Some(session) = lock(&self.sessions).get_mut(&serial) {
            session.pending_press = Some(sample);
        }
    }

    /// Pointer came up: classify, map and send to every device.
    ///
    /// Returns `None` when there was no press, no frame to map against, or a
    /// point fell outside the image.
    pub async fn release(&self, x: f64, y: f64) -> Result<Option<BatchReport>> {
        self.release_sample(PointerSample::now(x, y)).await
    }

    pub async fn release_sample(&self, end: PointerSample) -> Result<Option<BatchReport>> {
        let Some(serial) = self.selected() else {
            return Ok(None);
        };

        let (start, frame_size) = {
            let mut sessions = lock(&self.sessions);
            let Some(session) = sessions.get_mut(&serial) else {
                return Ok(None);
            };
            (session.pending_press.take(), session.frame_size())
        };
        let (Some(start), Some(frame_size)) = (start, frame_size) else {
            return Ok(None);
        };

        let device: Size = self
            .fleet
            .registry()
            .resolution(&serial, self.fleet.runner(), &self.fleet.context().token())
            .await?
            .into();
        let letterbox = Letterbox::compute(self.sink.viewport(&serial), frame_size);

        let event = GestureEvent::new(start, end);
        let Some(gesture) = event.resolve(&self.gestures, &letterbox, device) else {
            debug!("Gesture outside the image on {}, dropped", serial);
            return Ok(None);
        };

        let report = self
            .fleet
            .broadcast(
                gesture.name(),
                CommandSource::Single(gesture.args()),
                CommandOptions::default(),
            )
            .await?;
        Ok(Some(report))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
