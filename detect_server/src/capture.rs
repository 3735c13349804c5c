//! Decoding of captured stills.
//!
use image::RgbImage;
use thiserror::Error;

/// Reasons why a capture cannot be passed on to the detector.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CaptureError {
    #[error("captured frame is empty")]
    Empty,
    #[error("failed to decode captured frame: {0}")]
    Decode(String),
    #[error("captured frame has no pixels")]
    NoPixels,
}

/// Decode the encoded bytes of a captured still into an RGB frame.
pub fn decode_capture(bytes: &[u8]) -> Result<RgbImage, CaptureError> {
    if bytes.is_empty() {
        return Err(CaptureError::Empty);
    }

    let frame = decode_bytes(bytes)?;
    if frame.width() == 0 || frame.height() == 0 {
        return Err(CaptureError::NoPixels);
    }

    log::debug!(
        "Decoded capture of {} bytes to {}x{}",
        bytes.len(),
        frame.width(),
        frame.height()
    );

    Ok(frame)
}

#[cfg(not(feature = "turbojpeg"))]
fn decode_bytes(bytes: &[u8]) -> Result<RgbImage, CaptureError> {
    decode_with_image(bytes)
}

#[cfg(feature = "turbojpeg")]
fn decode_bytes(bytes: &[u8]) -> Result<RgbImage, CaptureError> {
    // JPEG start-of-image marker
    if bytes.starts_with(&[0xFF, 0xD8]) {
        turbojpeg::decompress_image(bytes).map_err(|err| CaptureError::Decode(err.to_string()))
    } else {
        decode_with_image(bytes)
    }
}

fn decode_with_image(bytes: &[u8]) -> Result<RgbImage, CaptureError> {
    image::load_from_memory(bytes)
        .map(|image| image.to_rgb8())
        .map_err(|err| CaptureError::Decode(err.to_string()))
}
