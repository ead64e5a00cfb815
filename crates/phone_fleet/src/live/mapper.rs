//! Aspect-fit geometry between a viewport and device pixels

use crate::adb::Resolution;

/// Width and height of a drawable area or an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl From<Resolution> for Size {
    fn from(r: Resolution) -> Self {
        Self::new(r.width, r.height)
    }
}

/// Placement of an aspect-fitted image inside a viewport.
///
/// `width`/`height` are the largest size that fits the viewport while keeping
/// the image aspect ratio; the offsets center it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub width: f64,
    pub height: f64,
    pub offset_x: f64,
    pub offset_y: f64,
}

impl Letterbox {
    /// Fit `image` into `viewport`. Degenerate sizes yield an empty box.
    pub fn compute(viewport: Size, image: Size) -> Self {
        if viewport.width == 0 || viewport.height == 0 || image.width == 0 || image.height == 0 {
            return Self {
                width: 0.0,
                height: 0.0,
                offset_x: 0.0,
                offset_y: 0.0,
            };
        }

        let (vw, vh) = (viewport.width as f64, viewport.height as f64);
        let (iw, ih) = (image.width as f64, image.height as f64);

        let (width, height) = if vw / vh > iw / ih {
            (vh * iw / ih, vh)
        } else {
            (vw, vw * ih / iw)
        };

        Self {
            width,
            height,
            offset_x: (vw - width) / 2.0,
            offset_y: (vh - height) / 2.0,
        }
    }

    /// Integer size to resize the frame to before presenting it
    pub fn display_size(&self) -> Size {
        Size::new(
            (self.width.round() as u32).max(1),
            (self.height.round() as u32).max(1),
        )
    }

    /// Map a viewport point into device pixels; `None` when it falls in the bars.
    pub fn map(&self, x: f64, y: f64, device: Size) -> Option<(i32, i32)> {
        let local_x = x - self.offset_x;
        let local_y = y - self.offset_y;

        if !(0.0..self.width).contains(&local_x) || !(0.0..self.height).contains(&local_y) {
            return None;
        }

        let device_x = local_x * device.width as f64 / self.width;
        let device_y = local_y * device.height as f64 / self.height;
        Some((device_x as i32, device_y as i32))
    }
}

/// One-shot form: fit, then map
pub fn map_point(viewport: Size, image: Size, device: Size, x: f64, y: f64) -> Option<(i32, i32)> {
    Letterbox::compute(viewport, image).map(x, y, device)
}
