//! Live view pipeline
//!
//! - `frame`: latest-frame slot and the capture loop
//! - `render`: scheduler and sink seams plus the render step
//! - `mapper`: aspect-fit geometry
//! - `gesture`: press/release classification
//! - `session`: per-device sessions and the fleet-wide live view
//! - `recorder`: sink that writes frames to disk

mod frame;
mod gesture;
mod mapper;
mod recorder;
mod render;
mod session;

pub use frame::{CaptureControl, CaptureExit, CaptureHandle, CaptureState, Frame, FrameSlot};
pub use gesture::{Gesture, GestureConfig, GestureEvent, GestureKind, PointerSample};
pub use mapper::{map_point, Letterbox, Size};
pub use recorder::FrameRecorder;
pub use render::{FrameSink, ManualScheduler, Renderer, Scheduler, TokioScheduler};
pub use session::{DeviceSession, LiveView};
