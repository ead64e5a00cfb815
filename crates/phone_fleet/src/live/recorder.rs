//! Headless frame sink that writes presented frames to disk

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Local};
use image::{DynamicImage, ImageFormat};
use tracing::{debug, info, warn};

use super::mapper::{Letterbox, Size};
use super::render::FrameSink;
use crate::error::Result;

/// Persists frames with timestamped directories and filenames
#[derive(Debug)]
pub struct FrameRecorder {
    /// Session directory (created at session start with timestamp)
    session_dir: PathBuf,
    viewport: Size,
    /// Frame counter for ordering files
    frame_count: AtomicUsize,
}

impl FrameRecorder {
    /// Create a recorder with a session subdirectory `yyyy-mm-dd_HH-MM-SS-mmm`
    /// under `base_dir`; frames are fitted into `viewport`.
    pub fn new(base_dir: impl AsRef<Path>, viewport: Size) -> Result<Self> {
        let session_start: DateTime<Local> = Local::now();
        let session_name = session_start.format("%Y-%m-%d_%H-%M-%S-%3f").to_string();
        let session_dir = base_dir.as_ref().join(session_name);

        std::fs::create_dir_all(&session_dir)?;
        info!("Frame session directory: {}", session_dir.display());

        Ok(Self {
            session_dir,
            viewport,
            frame_count: AtomicUsize::new(0),
        })
    }

    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count.load(Ordering::Relaxed)
    }

    /// Filename format: `frame_NNN_yyyy-mm-dd_HH-MM-SS-mmm.png`
    fn save(&self, image: &DynamicImage) -> Result<PathBuf> {
        let n = self.frame_count.fetch_add(1, Ordering::Relaxed) + 1;
        let now: DateTime<Local> = Local::now();
        let filename = format!("frame_{:03}_{}.png", n, now.format("%Y-%m-%d_%H-%M-%S-%3f"));
        let path = self.session_dir.join(filename);

        image.save_with_format(&path, ImageFormat::Png)?;
        debug!("Saved frame: {}", path.display());
        Ok(path)
    }
}

impl FrameSink for FrameRecorder {
    fn viewport(&self, _serial: &str) -> Size {
        self.viewport
    }

    fn present(&self, serial: &str, image: DynamicImage, _letterbox: Letterbox) {
        if let Err(e) = self.save(&image) {
            warn!("Failed to save frame from {}: {}", serial, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_recorder_creates_session_dir() {
        let temp_dir = tempdir().unwrap();
        let recorder = FrameRecorder::new(temp_dir.path(), Size::new(360, 640)).unwrap();

        assert!(recorder.session_dir().exists());
        assert_eq!(recorder.frame_count(), 0);
        assert_eq!(recorder.viewport("any"), Size::new(360, 640));
    }

    #[test]
    fn test_present_writes_numbered_png() {
        let temp_dir = tempdir().unwrap();
        let recorder = FrameRecorder::new(temp_dir.path(), Size::new(360, 640)).unwrap();
        let image = DynamicImage::new_rgb8(36, 64);
        let letterbox = Letterbox::compute(Size::new(360, 640), Size::new(36, 64));

        recorder.present("a", image.clone(), letterbox);
        recorder.present("a", image, letterbox);

        assert_eq!(recorder.frame_count(), 2);
        let mut names: Vec<_> = std::fs::read_dir(recorder.session_dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert!(names[0].starts_with("frame_001_"));
        assert!(names[1].starts_with("frame_002_"));
        assert!(names.iter().all(|n| n.ends_with(".png")));
    }
}
