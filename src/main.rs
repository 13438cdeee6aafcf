//! Sp3ctra standalone: stream an image through the synthesis core.
//!
//! Usage: `sp3ctra [config.json] [image file]` — both optional. With an
//! image, its rows are fed through the pipeline as simulated sensor lines
//! (top to bottom, looping); without one a synthetic sweep keeps the
//! oscillator bank busy. MIDI input, when a port exists, drives the
//! polyphonic and photowave engines.

use std::time::{Duration, Instant};

use sp3ctra::config::RuntimeConfig;
use sp3ctra::runtime::SynthesisCore;

/// Simulated sensor line rate.
const LINES_PER_SECOND: u64 = 250;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut config_path = None;
    let mut image_path = None;
    for arg in std::env::args().skip(1) {
        if arg.ends_with(".json") {
            config_path = Some(arg);
        } else {
            image_path = Some(arg);
        }
    }

    let cfg = match &config_path {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            serde_json::from_str::<RuntimeConfig>(&text)?
        }
        None => RuntimeConfig::default(),
    };
    let n_pixels = cfg.n_pixels();

    let core = SynthesisCore::new(cfg)?;
    log::info!("synthesis core running, {n_pixels} pixels per line");

    let rows = match &image_path {
        Some(path) => {
            let img = image::open(path)?.to_rgb8();
            log::info!("streaming {} ({}x{})", path, img.width(), img.height());
            Some(img)
        }
        None => {
            log::info!("no image given, streaming a synthetic sweep");
            None
        }
    };

    let line_period = Duration::from_micros(1_000_000 / LINES_PER_SECOND);
    let mut r = vec![0u8; n_pixels];
    let mut g = vec![0u8; n_pixels];
    let mut b = vec![0u8; n_pixels];
    let mut row_index = 0u32;
    let mut last_status = Instant::now();

    loop {
        match &rows {
            Some(img) => {
                let y = row_index % img.height();
                let width = img.width() as usize;
                for x in 0..n_pixels {
                    let src = (x * width / n_pixels) as u32;
                    let pixel = img.get_pixel(src, y);
                    r[x] = pixel[0];
                    g[x] = pixel[1];
                    b[x] = pixel[2];
                }
            }
            None => synthetic_sweep(row_index, &mut r, &mut g, &mut b),
        }
        core.publish_image_line(&r, &g, &b);
        row_index = row_index.wrapping_add(1);

        if last_status.elapsed() >= Duration::from_secs(1) {
            last_status = Instant::now();
            let snap = core.status();
            log::info!(
                "status: dropped={} misses={:?} starved={} anomalies={} underruns={}",
                snap.frames_dropped,
                snap.buffer_misses,
                snap.voices_starved,
                snap.numeric_anomalies,
                snap.underruns
            );
        }
        std::thread::sleep(line_period);
    }
}

/// A dark line with one bright spot wandering across the sensor, plus a
/// slow color tilt so the stereo image moves.
fn synthetic_sweep(step: u32, r: &mut [u8], g: &mut [u8], b: &mut [u8]) {
    let n = r.len();
    r.fill(255);
    g.fill(255);
    b.fill(255);

    let center = ((step as usize) * 7) % n;
    let tilt = (step / 64) % 2 == 0;
    for offset in 0..32usize {
        let x = (center + offset) % n;
        let fade = (offset as f32 / 32.0 * 255.0) as u8;
        r[x] = if tilt { fade } else { 0 };
        g[x] = fade / 2;
        b[x] = if tilt { 0 } else { fade };
    }
}
