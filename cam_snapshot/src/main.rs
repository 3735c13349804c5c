use std::path::PathBuf;

use cam_snapshot::{
    client::{annotated_jpeg, format_report, DetectClient},
    sensors::{capture_still, CaptureSource},
    Error,
};
use clap::Parser;
use common::protocol::{Thresholds, DEFAULT_CONFIDENCE, DEFAULT_IOU};
use env_logger::TimestampPrecision;
use simple_error::simple_error;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Address of the detect server
    #[clap(long, default_value = "127.0.0.1:3000")]
    address: String,

    /// Analyse an encoded image from disk instead of capturing from a camera
    #[clap(long)]
    image: Option<PathBuf>,

    /// Video device to capture from
    #[cfg(feature = "v4l")]
    #[clap(long, default_value = "/dev/video0")]
    device: String,

    /// Pixel format requested from the video device
    #[cfg(feature = "v4l")]
    #[clap(long, default_value = "MJPG")]
    format: String,

    /// Minimum confidence of reported detections
    #[clap(long, default_value_t = DEFAULT_CONFIDENCE)]
    confidence: f32,

    /// Overlap above which weaker boxes are suppressed
    #[clap(long, default_value_t = DEFAULT_IOU)]
    iou: f32,

    /// Write the annotated JPEG to this path
    #[clap(long)]
    output: Option<PathBuf>,
}

impl Args {
    fn source(&self) -> Result<CaptureSource, Error> {
        if let Some(image) = &self.image {
            return Ok(CaptureSource::File(image.clone()));
        }

        #[cfg(feature = "v4l")]
        return Ok(CaptureSource::Camera {
            device: self.device.clone(),
            format: self.format.clone(),
        });

        #[cfg(not(feature = "v4l"))]
        Err(simple_error!("No camera support compiled in, pass --image").into())
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    let args = Args::parse();
    let thresholds = Thresholds::new(args.confidence, args.iou);
    let client = DetectClient::new(&args.address);

    let status = client.status().await?;
    if let Some(err) = status.error {
        return Err(simple_error!("Model {} could not be loaded: {}", status.model, err).into());
    }

    let source = args.source()?;
    let still =
        tokio::task::spawn_blocking(move || capture_still(&source).map_err(|e| e.to_string()))
            .await?
            .map_err(|e| simple_error!("Capture failed: {}", e))?;

    log::info!("Sending {} bytes to {}", still.len(), client.base_url());
    let report = match client.detect(still, thresholds).await? {
        Some(report) => report,
        None => {
            println!("The server could not decode the still, nothing to show");
            return Ok(());
        }
    };

    print!("{}", format_report(&report));

    if let Some(output) = &args.output {
        match annotated_jpeg(&report)? {
            Some(jpeg) => {
                tokio::fs::write(output, jpeg).await?;
                log::info!("Wrote annotated image to {}", output.display());
            }
            None => log::warn!("Report carries no annotated image"),
        }
    }

    Ok(())
}
