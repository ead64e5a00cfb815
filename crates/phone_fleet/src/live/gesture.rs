//! Press/release classification into tap, long press and swipe

use std::time::{Duration, Instant};

use crate::adb::device;

use super::mapper::{Letterbox, Size};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GestureConfig {
    /// Movement beyond this many viewport pixels makes a swipe
    pub drag_threshold: f64,
    /// Holding longer than this makes a long press
    pub long_press: Duration,
    pub swipe_ms: u32,
    pub long_press_ms: u32,
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            drag_threshold: 20.0,
            long_press: Duration::from_millis(500),
            swipe_ms: device::SWIPE_MS,
            long_press_ms: device::LONG_PRESS_MS,
        }
    }
}

/// A pointer position in viewport coordinates and when it was seen
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerSample {
    pub x: f64,
    pub y: f64,
    pub at: Instant,
}

impl PointerSample {
    pub fn new(x: f64, y: f64, at: Instant) -> Self {
        Self { x, y, at }
    }

    pub fn now(x: f64, y: f64) -> Self {
        Self::new(x, y, Instant::now())
    }

    fn distance(&self, other: &PointerSample) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GestureEvent {
    pub start: PointerSample,
    pub end: PointerSample,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GestureKind {
    Tap,
    LongPress,
    Swipe,
}

impl GestureEvent {
    pub fn new(start: PointerSample, end: PointerSample) -> Self {
        Self { start, end }
    }

    pub fn classify(&self, config: &GestureConfig) -> GestureKind {
        if self.start.distance(&self.end) > config.drag_threshold {
            GestureKind::Swipe
        } else if self.end.at.saturating_duration_since(self.start.at) > config.long_press {
            GestureKind::LongPress
        } else {
            GestureKind::Tap
        }
    }

    /// Classify and map into device pixels. Any endpoint in the letterbox bars
    /// drops the whole gesture.
    pub fn resolve(
        &self,
        config: &GestureConfig,
        letterbox: &Letterbox,
        device: Size,
    ) -> Option<Gesture> {
        let start = letterbox.map(self.start.x, self.start.y, device)?;
        match self.classify(config) {
            GestureKind::Swipe => {
                let end = letterbox.map(self.end.x, self.end.y, device)?;
                Some(Gesture::Swipe {
                    from: start,
                    to: end,
                    duration_ms: config.swipe_ms,
                })
            }
            GestureKind::LongPress => Some(Gesture::LongPress {
                at: start,
                duration_ms: config.long_press_ms,
            }),
            GestureKind::Tap => Some(Gesture::Tap { at: start }),
        }
    }
}

/// A gesture in device pixels, ready to send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gesture {
    Tap {
        at: (i32, i32),
    },
    LongPress {
        at: (i32, i32),
        duration_ms: u32,
    },
    Swipe {
        from: (i32, i32),
        to: (i32, i32),
        duration_ms: u32,
    },
}

impl Gesture {
    pub fn args(&self) -> Vec<String> {
        match *self {
            Gesture::Tap { at: (x, y) } => device::tap(x, y),
            Gesture::LongPress {
                at: (x, y),
                duration_ms,
            } => device::long_press(x, y, duration_ms),
            Gesture::Swipe {
                from: (x1, y1),
                to: (x2, y2),
                duration_ms,
            } => device::swipe(x1, y1, x2, y2, duration_ms),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Gesture::Tap { .. } => "Tap",
            Gesture::LongPress { .. } => "Long press",
            Gesture::Swipe { .. } => "Swipe",
        }
    }
}
