//! Screen capture for the live view

use image::imageops::FilterType;
use image::DynamicImage;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::runner::{CommandRunner, DeviceCommand};
use crate::config::TIMING_CONFIG;
use crate::error::{FleetError, Result};

/// `exec-out` streams the PNG straight to stdout, no pull step needed
pub fn capture_args() -> Vec<String> {
    ["exec-out", "screencap", "-p"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Capture one frame as opaque image bytes, bounded by the capture timeout
pub async fn capture(
    runner: &CommandRunner,
    serial: &str,
    token: &CancellationToken,
) -> Result<Vec<u8>> {
    let command = DeviceCommand::new(serial, capture_args())
        .with_timeout(TIMING_CONFIG.command.capture());
    let output = runner.run(&command, token).await?;

    if output.stdout.is_empty() {
        return Err(FleetError::Parse(format!("empty capture from {serial}")));
    }

    debug!("Captured {} bytes from {}", output.stdout.len(), serial);
    Ok(output.stdout)
}

pub fn decode_frame(bytes: &[u8]) -> Result<DynamicImage> {
    Ok(image::load_from_memory(bytes)?)
}

/// Resize to exactly `width`x`height`; the caller supplies an aspect-preserving size
pub fn resize_frame(image: &DynamicImage, width: u32, height: u32) -> DynamicImage {
    if image.width() == width && image.height() == height {
        return image.clone();
    }
    image.resize_exact(width.max(1), height.max(1), FilterType::Triangle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, ImageFormat, Rgb};
    use std::io::Cursor;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img: ImageBuffer<Rgb<u8>, Vec<u8>> =
            ImageBuffer::from_pixel(width, height, Rgb([10, 20, 30]));
        let mut buffer = Vec::new();
        img.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
            .unwrap();
        buffer
    }

    #[test]
    fn test_decode_and_resize() {
        let image = decode_frame(&png(40, 80)).unwrap();
        assert_eq!((image.width(), image.height()), (40, 80));

        let resized = resize_frame(&image, 20, 40);
        assert_eq!((resized.width(), resized.height()), (20, 40));
    }

    #[test]
    fn test_decode_garbage_is_error() {
        assert!(matches!(
            decode_frame(b"not an image"),
            Err(FleetError::Image(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_capture_reads_stdout_bytes() {
        use crate::testing::FakeBridge;

        let bridge = FakeBridge::new(r#"[ "$3" = "exec-out" ] && printf 'PNGDATA'"#);
        let bytes = capture(&bridge.runner(), "serial-1", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(bytes, b"PNGDATA");
    }
}
