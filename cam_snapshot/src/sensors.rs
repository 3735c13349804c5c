//! Sensors module.
//!
use std::{fs, path::PathBuf};

use simple_error::simple_error;

use crate::Error;

/// Where a still image comes from.
#[derive(Debug, Clone)]
pub enum CaptureSource {
    /// Encoded image on disk.
    File(PathBuf),
    /// Video device on a Linux machine and the pixel format to request from it.
    #[cfg(feature = "v4l")]
    Camera { device: String, format: String },
}

/// Capture one encoded still.
pub fn capture_still(source: &CaptureSource) -> Result<Vec<u8>, Error> {
    match source {
        CaptureSource::File(path) => {
            let data = fs::read(path)?;
            if data.is_empty() {
                return Err(simple_error!("{} is empty", path.display()).into());
            }
            log::info!("Read {} bytes from {}", data.len(), path.display());
            Ok(data)
        }
        #[cfg(feature = "v4l")]
        CaptureSource::Camera { device, format } => linux::capture_still_linux(device, format),
    }
}

#[cfg(feature = "v4l")]
mod linux {
    use rscam::{Camera, Config};
    use simple_error::simple_error;

    use crate::Error;

    /// Frames thrown away before the still, so exposure can settle.
    const WARMUP_FRAMES: usize = 5;

    /// Capture one still from a video device at its highest resolution.
    pub fn capture_still_linux(device_name: &str, format: &str) -> Result<Vec<u8>, Error> {
        let mut cam = Camera::new(device_name)?;
        log_supported_formats(&cam, format);
        let format = format.as_bytes();

        log::info!("Using camera {}", device_name);

        let resolution = get_max_resolution(&cam, format)?;
        let frame_rate = get_max_frame_rate(&cam, format, resolution)?;

        cam.start(&Config {
            interval: frame_rate,
            resolution,
            format,
            ..Default::default()
        })?;

        let mut still = None;
        for _ in 0..=WARMUP_FRAMES {
            still = Some(cam.capture()?);
        }

        let still = still.ok_or_else(|| simple_error!("No frame captured"))?;
        log::info!(
            "Captured {}x{} still of {} bytes",
            resolution.0,
            resolution.1,
            still.len()
        );

        Ok(still[..].to_vec())
    }

    /// Get the maximum supported resolution for the given format.
    pub(super) fn get_max_resolution(cam: &Camera, format: &[u8]) -> Result<(u32, u32), Error> {
        let resolution_info = cam.resolutions(format)?;
        log::debug!("Found resolutions: {:?}", &resolution_info);
        match resolution_info {
            rscam::ResolutionInfo::Discretes(resolutions) => resolutions
                .iter()
                // Map to iterator over ((width, height) num_pixels)
                .map(|res| (res, res.0 * res.1))
                // Get the highest resolution in terms of number of pixels
                .max_by(|a, b| a.1.cmp(&b.1))
                // Extract width and height values
                .map(|res| *res.0),
            rscam::ResolutionInfo::Stepwise {
                min: _,
                max,
                step: _,
            } => Some(max),
        }
        .ok_or_else(|| simple_error!("No resolution found").into())
    }

    /// Get the maximum supported frame rate for the given format and resolution.
    fn get_max_frame_rate(
        cam: &Camera,
        format: &[u8],
        resolution: (u32, u32),
    ) -> Result<(u32, u32), Error> {
        let interval_info = cam.intervals(format, resolution)?;
        log::debug!("Found frame rates: {:?}", &interval_info);
        match interval_info {
            rscam::IntervalInfo::Discretes(frame_rates) => frame_rates
                .iter()
                // Map discrete values to real frame rate
                .map(|(denominator, numerator)| ((denominator, numerator), numerator / denominator))
                // Get the highest frame rate
                .max_by(|a, b| a.1.cmp(&b.1))
                // Extract denominator and numerator
                .map(|((&d, &n), _)| (d, n)),
            rscam::IntervalInfo::Stepwise {
                min: _,
                max,
                step: _,
            } => Some(max),
        }
        .ok_or_else(|| simple_error!("No frame rate found").into())
    }

    fn log_supported_formats(cam: &Camera, format: &str) {
        let formats: Vec<_> = cam.formats().filter_map(|fmt| fmt.ok()).collect();
        log::debug!(
            "Supported formats: {:?}, using format {:?}",
            formats,
            format
        );
    }
}
