use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use tokio::{task::JoinHandle, time::interval};

pub static METER: Meter = Meter::new();

#[derive(Default)]
pub struct Meter {
    captures: AtomicU64,
    inferences: AtomicU64,
    inference_micros: AtomicU64,
}

impl Meter {
    pub const fn new() -> Meter {
        Meter {
            captures: AtomicU64::new(0),
            inferences: AtomicU64::new(0),
            inference_micros: AtomicU64::new(0),
        }
    }

    pub fn tick_capture(&self) {
        self.captures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tick_inference(&self, elapsed: Duration) {
        self.inferences.fetch_add(1, Ordering::Relaxed);
        self.inference_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn get_reset_captures(&self) -> u64 {
        self.captures.swap(0, Ordering::Relaxed)
    }

    /// Number of inferences and their summed duration in microseconds.
    pub fn get_reset_inferences(&self) -> (u64, u64) {
        (
            self.inferences.swap(0, Ordering::Relaxed),
            self.inference_micros.swap(0, Ordering::Relaxed),
        )
    }
}

pub fn spawn_meter_logger(period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut log_interval = interval(period);
        log_interval.tick().await;

        loop {
            let start = Instant::now();
            log_interval.tick().await;

            let captures = METER.get_reset_captures();
            let (inferences, inference_micros) = METER.get_reset_inferences();
            let elapsed = start.elapsed().as_secs_f32();

            if captures > 0 {
                log::info!("Captures received: {captures} in {elapsed:.0}s")
            }
            if inferences > 0 {
                let mean_ms = inference_micros as f32 / inferences as f32 / 1000.0;
                log::info!("Inferences: {inferences}, mean duration {mean_ms:.1} ms")
            }
        }
    })
}
