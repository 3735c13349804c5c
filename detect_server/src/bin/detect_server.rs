//! Detect server binary.
//!
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Result;
use clap::Parser;
use detect_server::{
    build_router,
    context::AppContext,
    meter::spawn_meter_logger,
    nn::{ModelOptions, DEFAULT_INPUT_SIZE, DEFAULT_MODEL_PATH},
    registry::ModelRegistry,
};
use env_logger::TimestampPrecision;

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    /// Address to serve the page on
    #[clap(long, default_value = "127.0.0.1:3000")]
    server_address: String,

    /// YOLOv5 weights exported to ONNX
    #[clap(long, default_value = DEFAULT_MODEL_PATH)]
    model: PathBuf,

    /// File with one class name per line, COCO names if not given
    #[clap(long)]
    labels: Option<PathBuf>,

    /// TrueType font for box captions, bundled DejaVu Sans Mono if not given
    #[clap(long)]
    font: Option<PathBuf>,

    /// Side length of the square network input
    #[clap(long, default_value_t = DEFAULT_INPUT_SIZE)]
    input_size: u32,

    /// Seconds between two activity log lines
    #[clap(long, default_value_t = 30)]
    meter_interval_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logger
    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    // The model is loaded on the first request that needs it
    let registry = ModelRegistry::yolov5(ModelOptions {
        input_size: args.input_size,
        labels: args.labels,
        font: args.font,
    });
    let ctx = Arc::new(AppContext::new(registry, args.model));

    spawn_meter_logger(Duration::from_secs(args.meter_interval_secs.max(1)));

    // Build HTTP server with endpoints
    let app = build_router(ctx);

    // Serve HTTP server
    let addr: SocketAddr = args.server_address.parse()?;
    log::info!("Serving on http://{addr}");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
