//! End-to-end scenarios across preprocessor, line bus, additive engine and
//! mixer, run single-threaded so every hand-off is observable.

use std::sync::Arc;

use sp3ctra::config::RuntimeConfig;
use sp3ctra::image::{ImagePreprocessor, PreprocessedLine};
use sp3ctra::params::{LiveParams, ParamInbox};
use sp3ctra::rt::line_bus::{LineBus, LinePublisher};
use sp3ctra::rt::scratch::{block_ring, AudioBlock};
use sp3ctra::rt::status::{EngineId, StatusCounters};
use sp3ctra::synth::additive::AdditiveEngine;

struct Pipeline {
    cfg: RuntimeConfig,
    preprocessor: ImagePreprocessor,
    publisher: LinePublisher,
    bus: Arc<LineBus>,
    engine: AdditiveEngine,
    status: Arc<StatusCounters>,
}

fn pipeline(mutate: impl FnOnce(&mut RuntimeConfig)) -> Pipeline {
    let mut cfg = RuntimeConfig::default();
    mutate(&mut cfg);
    cfg.validate().expect("test config must be valid");
    let status = Arc::new(StatusCounters::new());
    let (publisher, bus) = LineBus::new(cfg.n_pixels(), cfg.n_notes());
    Pipeline {
        preprocessor: ImagePreprocessor::new(&cfg),
        publisher,
        bus: Arc::clone(&bus),
        engine: AdditiveEngine::new(&cfg, Arc::clone(&status)),
        status,
        cfg,
    }
}

impl Pipeline {
    fn publish_rgb(&mut self, r: &[u8], g: &[u8], b: &[u8]) {
        let preprocessor = &self.preprocessor;
        self.publisher
            .publish_with(|line| preprocessor.process_into(r, g, b, line));
    }

    fn render_block(&mut self, frames: usize) -> AudioBlock {
        let mut block = AudioBlock::new(frames);
        self.engine.prepare_block(&self.bus);
        self.engine.render(&mut block);
        block
    }
}

/// DFT probe at one frequency.
fn goertzel_power(signal: &[f32], frequency: f32, sample_rate: f32) -> f32 {
    let omega = std::f32::consts::TAU * frequency / sample_rate;
    let coeff = 2.0 * omega.cos();
    let (mut s1, mut s2) = (0.0f32, 0.0f32);
    for &x in signal {
        let s0 = x + coeff * s1 - s2;
        s2 = s1;
        s1 = s0;
    }
    s1 * s1 + s2 * s2 - coeff * s1 * s2
}

#[test]
fn silence_in_silence_out() {
    // All-white sensor line under inversion: every oscillator target is
    // zero, the noise gate pins the output, and the result is bit-exact.
    let mut p = pipeline(|cfg| {
        cfg.synthesis.sensor_dpi = 400;
        cfg.synthesis.invert_intensity = true;
        cfg.stereo.stereo_mode_enabled = false;
    });
    let n = p.cfg.n_pixels();
    let white = vec![255u8; n];
    p.publish_rgb(&white, &white, &white);

    for _ in 0..4 {
        let block = p.render_block(512);
        assert!(block.left.iter().all(|&s| s == 0.0));
        assert!(block.right.iter().all(|&s| s == 0.0));
    }
}

#[test]
fn single_bright_comma_dominates_the_spectrum() {
    let mut p = pipeline(|cfg| {
        cfg.synthesis.sensor_dpi = 400;
        cfg.synthesis.invert_intensity = true;
        cfg.stereo.stereo_mode_enabled = false;
    });
    let n = p.cfg.n_pixels();
    let target_note = 864;

    // White background, one black pixel: only oscillator 864 sounds.
    let mut r = vec![255u8; n];
    let mut g = vec![255u8; n];
    let mut b = vec![255u8; n];
    r[target_note] = 0;
    g[target_note] = 0;
    b[target_note] = 0;
    p.publish_rgb(&r, &g, &b);

    // Let the attack settle (tau_up is 2 ms), then analyze a full window.
    for _ in 0..2 {
        p.render_block(2_048);
    }
    let block = p.render_block(4_096);
    let mono: Vec<f32> = block
        .left
        .iter()
        .zip(&block.right)
        .map(|(l, r)| l + r)
        .collect();

    let sr = p.cfg.audio.sampling_frequency as f32;
    let grid = p.engine.grid();
    let peak_hz = grid.effective_freq_hz(target_note, sr);
    let peak_power = goertzel_power(&mono, peak_hz, sr);

    // Probes away from the peak: other grid notes and half/double pitch.
    for probe in [
        grid.effective_freq_hz(200, sr),
        grid.effective_freq_hz(1_600, sr),
        grid.effective_freq_hz(2_800, sr),
        peak_hz * 0.5,
        peak_hz * 2.0,
    ] {
        let off_power = goertzel_power(&mono, probe, sr);
        assert!(
            peak_power > off_power * 10.0,
            "peak {peak_hz} Hz ({peak_power}) vs probe {probe} Hz ({off_power})"
        );
    }
}

#[test]
fn engine_tracks_a_new_line_at_the_next_block() {
    let mut p = pipeline(|cfg| {
        cfg.synthesis.sensor_dpi = 200;
    });
    let n = p.cfg.n_pixels();

    let white = vec![255u8; n];
    p.publish_rgb(&white, &white, &white);
    p.render_block(512);
    let seq_a = p.engine.line_seq();

    let black = vec![0u8; n];
    p.publish_rgb(&black, &black, &black);
    p.render_block(512);
    assert_eq!(p.engine.line_seq(), seq_a + 1);
    // The black line (inverted: full intensity) must already drive targets.
    assert!(p.engine.targets().iter().any(|&t| t > 0.0));
}

#[test]
fn stalled_feed_keeps_the_previous_line_sounding() {
    let mut p = pipeline(|cfg| {
        cfg.synthesis.sensor_dpi = 200;
    });
    let n = p.cfg.n_pixels();
    let black = vec![0u8; n];
    p.publish_rgb(&black, &black, &black);

    // Feed stops; the engine keeps rendering from its snapshot.
    let mut peak = 0.0f32;
    for _ in 0..10 {
        let block = p.render_block(512);
        peak = peak.max(block.left.iter().fold(0.0f32, |m, s| m.max(s.abs())));
    }
    assert!(peak > 0.0, "output must continue across a feed stall");

    // Resumption: a white line silences the targets within two blocks.
    let white = vec![255u8; n];
    p.publish_rgb(&white, &white, &white);
    p.render_block(512);
    p.render_block(512);
    assert!(p.engine.targets().iter().all(|&t| t == 0.0));
}

#[test]
fn delayed_producers_cost_misses_never_corruption() {
    let cfg = RuntimeConfig::default();
    let frames = cfg.audio.audio_buffer_size;
    let (mut additive_producer, additive_consumer) = block_ring(frames);
    let (_poly_producer, poly_consumer) = block_ring(frames);
    let (_photo_producer, photo_consumer) = block_ring(frames);
    let (_inbox, view) = ParamInbox::new(LiveParams::from_config(&cfg));
    let status = Arc::new(StatusCounters::new());
    let running = Arc::new(std::sync::atomic::AtomicBool::new(true));

    let mut mixer = sp3ctra::audio::mixer::Mixer::new(
        &cfg,
        additive_consumer,
        poly_consumer,
        photo_consumer,
        view,
        Arc::clone(&status),
        Arc::new(sp3ctra::rt::capture::CaptureRing::new(1 << 12)),
        running,
    );

    let mut left = vec![0.0f32; frames];
    let mut right = vec![0.0f32; frames];
    for i in 0..10 {
        // The additive producer keeps up only every other block.
        if i % 2 == 0 {
            assert!(additive_producer.try_fill(|b| {
                b.left.fill(0.5);
                b.right.fill(0.5);
            }));
        }
        mixer.render(&mut left, &mut right);
        assert!(left.iter().all(|s| s.is_finite() && s.abs() <= 1.0));
    }

    let snap = status.snapshot();
    assert_eq!(snap.buffer_misses_for(EngineId::Additive), 5);
    assert_eq!(snap.buffer_misses_for(EngineId::Polyphonic), 10);
    assert_eq!(snap.buffer_misses_for(EngineId::Photowave), 10);
    assert_eq!(snap.underruns, 0);
}

#[test]
fn preprocessed_line_is_never_torn_under_load() {
    // Writer races readers across the bus while each reader checks the
    // internal consistency of every snapshot it takes.
    let cfg = {
        let mut cfg = RuntimeConfig::default();
        cfg.synthesis.sensor_dpi = 200;
        cfg
    };
    let (mut publisher, bus) = LineBus::new(cfg.n_pixels(), cfg.n_notes());
    let n = cfg.n_pixels();

    let writer = std::thread::spawn(move || {
        for i in 0..5_000u64 {
            let value = (i % 255) as f32 / 255.0;
            publisher.publish_with(|line| {
                line.gray.fill(value);
                line.contrast = value;
            });
        }
    });

    let readers: Vec<_> = (0..3)
        .map(|_| {
            let bus = Arc::clone(&bus);
            std::thread::spawn(move || {
                let mut local = PreprocessedLine::new(n, n);
                for _ in 0..5_000 {
                    if bus.snapshot_into(&mut local) == 0 {
                        continue;
                    }
                    let first = local.gray[0];
                    assert!(local.gray.iter().all(|&v| v == first), "torn line copy");
                    assert_eq!(local.contrast, first);
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
}
