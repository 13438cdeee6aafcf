//! The synthesis core: ownership, threads, and the outside interfaces.
//!
//! `SynthesisCore` owns every long-lived structure (line bus, scratch
//! rings, parameter inbox, counters) and the worker threads: the preprocess
//! thread blocking on incoming frames, and one non-blocking producer thread
//! per engine. The audio device pulls from the mixer; a single `running`
//! flag winds everything down at the next loop boundary.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Sender};
use parking_lot::{Condvar, Mutex};
use thiserror::Error;
use triple_buffer::TripleBuffer;

use crate::audio::mixer::Mixer;
use crate::audio::output::{AudioError, AudioOutput};
use crate::config::{ConfigError, RuntimeConfig};
use crate::image::{DmxZoneMeans, ImageLine, ImagePreprocessor};
use crate::midi::{MidiEvent, MidiHandler};
use crate::params::{LiveParams, ParamId, ParamInbox, ParamView};
use crate::rt::capture::CaptureRing;
use crate::rt::line_bus::LineBus;
use crate::rt::scratch::{block_ring, AudioBlock, BlockProducer};
use crate::rt::status::{StatusCounters, StatusSnapshot};
use crate::synth::additive::AdditiveEngine;
use crate::synth::photowave::PhotowaveEngine;
use crate::synth::poly::PolyphonicEngine;

/// Capacity of each engine's MIDI event queue.
const MIDI_QUEUE_CAPACITY: usize = 1024;

/// Capacity of the volume capture ring.
const CAPTURE_CAPACITY: usize = 1 << 14;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Audio(#[from] AudioError),
    #[error("failed to spawn {0} thread: {1}")]
    Thread(&'static str, std::io::Error),
}

#[derive(Debug, Clone, Copy)]
pub struct CoreOptions {
    /// Open the audio device; without it the host pulls via [`SynthesisCore::render`].
    pub audio: bool,
    /// Connect to the first MIDI input port if one exists.
    pub midi: bool,
}

impl Default for CoreOptions {
    fn default() -> Self {
        Self {
            audio: true,
            midi: true,
        }
    }
}

impl CoreOptions {
    /// No device I/O; used by hosts that drive the callback themselves.
    pub fn headless() -> Self {
        Self {
            audio: false,
            midi: false,
        }
    }
}

/// Hand-off point between the network receiver and the preprocess thread.
/// Latest frame wins; an unconsumed frame that gets replaced counts as
/// dropped.
struct RawLineMailbox {
    slot: Mutex<Option<ImageLine>>,
    available: Condvar,
}

pub struct SynthesisCore {
    n_pixels: usize,
    running: Arc<AtomicBool>,
    status: Arc<StatusCounters>,
    capture: Arc<CaptureRing>,
    mailbox: Arc<RawLineMailbox>,
    inbox: ParamInbox,
    midi_senders: Vec<Sender<MidiEvent>>,
    dmx_out: Mutex<triple_buffer::Output<DmxZoneMeans>>,
    /// Present only in headless mode; otherwise the audio callback owns it.
    mixer: Option<Mixer>,
    threads: Vec<JoinHandle<()>>,
    _audio: Option<AudioOutput>,
    _midi: Option<MidiHandler>,
}

impl SynthesisCore {
    pub fn new(cfg: RuntimeConfig) -> Result<Self, CoreError> {
        Self::with_options(cfg, CoreOptions::default())
    }

    pub fn with_options(cfg: RuntimeConfig, options: CoreOptions) -> Result<Self, CoreError> {
        cfg.validate()?;

        let running = Arc::new(AtomicBool::new(true));
        let status = Arc::new(StatusCounters::new());
        let capture = Arc::new(CaptureRing::new(CAPTURE_CAPACITY));
        let mailbox = Arc::new(RawLineMailbox {
            slot: Mutex::new(None),
            available: Condvar::new(),
        });

        let (publisher, bus) = LineBus::new(cfg.n_pixels(), cfg.n_notes());
        let (inbox, view) = ParamInbox::new(LiveParams::from_config(&cfg));

        let (poly_tx, poly_rx) = bounded(MIDI_QUEUE_CAPACITY);
        let (photo_tx, photo_rx) = bounded(MIDI_QUEUE_CAPACITY);
        let midi_senders = vec![poly_tx, photo_tx];

        let additive = AdditiveEngine::new(&cfg, Arc::clone(&status));
        let poly = PolyphonicEngine::new(&cfg, Some(poly_rx), Arc::clone(&status));
        let photowave = PhotowaveEngine::new(&cfg, Some(photo_rx), Arc::clone(&status));

        let frames = cfg.audio.audio_buffer_size;
        let (additive_producer, additive_consumer) = block_ring(frames);
        let (poly_producer, poly_consumer) = block_ring(frames);
        let (photo_producer, photo_consumer) = block_ring(frames);

        let mixer = Mixer::new(
            &cfg,
            additive_consumer,
            poly_consumer,
            photo_consumer,
            view.clone(),
            Arc::clone(&status),
            Arc::clone(&capture),
            Arc::clone(&running),
        );

        let (dmx_in, dmx_out) = TripleBuffer::new(&DmxZoneMeans::default()).split();

        let mut threads = Vec::new();
        threads.push(spawn_preprocess(
            &cfg,
            publisher,
            Arc::clone(&mailbox),
            Arc::clone(&running),
            dmx_in,
        )?);

        let block_period = Duration::from_secs_f64(frames as f64 / cfg.audio.sampling_frequency as f64);
        threads.push(spawn_producer(
            "additive_producer",
            Arc::clone(&running),
            additive_producer,
            producer_loop(additive, Arc::clone(&bus), view.clone()),
            None,
        )?);
        threads.push(spawn_producer(
            "poly_producer",
            Arc::clone(&running),
            poly_producer,
            producer_loop(poly, Arc::clone(&bus), view.clone()),
            None,
        )?);
        threads.push(spawn_producer(
            "photowave_producer",
            Arc::clone(&running),
            photo_producer,
            producer_loop(photowave, Arc::clone(&bus), view.clone()),
            Some(block_period * 2),
        )?);

        let (audio, mixer) = if options.audio {
            (
                Some(AudioOutput::start(mixer, &cfg.audio, Arc::clone(&status))?),
                None,
            )
        } else {
            (None, Some(mixer))
        };

        let midi = if options.midi {
            match MidiHandler::connect(midi_senders.clone()) {
                Ok(handler) => Some(handler),
                Err(e) => {
                    log::warn!("MIDI input unavailable: {e}");
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            n_pixels: cfg.n_pixels(),
            running,
            status,
            capture,
            mailbox,
            inbox,
            midi_senders,
            dmx_out: Mutex::new(dmx_out),
            mixer,
            threads,
            _audio: audio,
            _midi: midi,
        })
    }

    /// Upstream entry for the network layer: hand over one reassembled
    /// line. Malformed frames are dropped and counted; a frame arriving
    /// before the previous one was consumed replaces it (and counts too).
    pub fn publish_image_line(&self, r: &[u8], g: &[u8], b: &[u8]) {
        if r.len() != self.n_pixels || g.len() != self.n_pixels || b.len() != self.n_pixels {
            self.status.note_frame_dropped();
            log::warn!(
                "dropping malformed frame: lengths {}/{}/{}, expected {}",
                r.len(),
                g.len(),
                b.len(),
                self.n_pixels
            );
            return;
        }
        let line = ImageLine {
            r: r.to_vec(),
            g: g.to_vec(),
            b: b.to_vec(),
        };
        {
            let mut slot = self.mailbox.slot.lock();
            if slot.replace(line).is_some() {
                self.status.note_frame_dropped();
            }
        }
        self.mailbox.available.notify_one();
    }

    /// Upstream entry for the MIDI layer (and tests): enqueue one logical
    /// event for both MIDI-driven engines.
    pub fn enqueue_midi_event(&self, event: MidiEvent) {
        for sender in &self.midi_senders {
            if sender.try_send(event).is_err() {
                log::debug!("MIDI queue full, dropping {event:?}");
            }
        }
    }

    /// Upstream entry for the control surface: update one live scalar.
    pub fn push_parameter(&mut self, id: ParamId, value: f32) {
        self.inbox.push(id, value);
    }

    /// Downstream pull interface, used directly when the core runs
    /// headless. With the audio device attached the device callback owns
    /// the mixer and this renders silence.
    pub fn render(&mut self, out_left: &mut [f32], out_right: &mut [f32]) {
        match &mut self.mixer {
            Some(mixer) => mixer.render(out_left, out_right),
            None => {
                out_left.fill(0.0);
                out_right.fill(0.0);
            }
        }
    }

    /// Latest per-zone mean RGB for the lighting stage.
    pub fn dmx_zone_means(&self) -> DmxZoneMeans {
        *self.dmx_out.lock().read()
    }

    pub fn status(&self) -> StatusSnapshot {
        self.status.snapshot()
    }

    /// Read side of the parameter inbox, for observers.
    pub fn params(&self) -> &LiveParams {
        self.inbox.current()
    }

    /// Drain the mixer's volume capture ring.
    pub fn drain_capture(&self, out: &mut Vec<f32>) -> usize {
        self.capture.drain(out)
    }

    /// Stop producers and the preprocess thread, then release the device.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        self.mailbox.available.notify_all();
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                log::error!("worker thread panicked during shutdown");
            }
        }
    }
}

impl Drop for SynthesisCore {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_preprocess(
    cfg: &RuntimeConfig,
    mut publisher: crate::rt::line_bus::LinePublisher,
    mailbox: Arc<RawLineMailbox>,
    running: Arc<AtomicBool>,
    mut dmx_in: triple_buffer::Input<DmxZoneMeans>,
) -> Result<JoinHandle<()>, CoreError> {
    let preprocessor = ImagePreprocessor::new(cfg);
    std::thread::Builder::new()
        .name("preprocess".into())
        .spawn(move || {
            while running.load(Ordering::Relaxed) {
                let frame = {
                    let mut slot = mailbox.slot.lock();
                    if slot.is_none() {
                        mailbox
                            .available
                            .wait_for(&mut slot, Duration::from_millis(100));
                    }
                    slot.take()
                };
                let Some(line) = frame else { continue };
                let mut zones = DmxZoneMeans::default();
                publisher.publish_with(|out| {
                    preprocessor.process_into(&line.r, &line.g, &line.b, out);
                    zones = out.zones;
                });
                dmx_in.write(zones);
            }
        })
        .map_err(|e| CoreError::Thread("preprocess", e))
}

/// Per-block work of one producer: adopt live parameters, refresh the local
/// line snapshot, render.
fn producer_loop<E>(
    mut engine: E,
    bus: Arc<LineBus>,
    view: ParamView,
) -> impl FnMut(&mut AudioBlock) + Send + 'static
where
    E: EngineBlock + Send + 'static,
{
    move |block| {
        engine.apply_params(&view.read());
        engine.prepare_block(&bus);
        engine.render(block);
    }
}

/// The uniform surface the producer threads drive.
trait EngineBlock {
    fn apply_params(&mut self, live: &LiveParams);
    fn prepare_block(&mut self, bus: &LineBus);
    fn render(&mut self, block: &mut AudioBlock);
}

impl EngineBlock for AdditiveEngine {
    fn apply_params(&mut self, live: &LiveParams) {
        AdditiveEngine::apply_params(self, live);
    }
    fn prepare_block(&mut self, bus: &LineBus) {
        AdditiveEngine::prepare_block(self, bus);
    }
    fn render(&mut self, block: &mut AudioBlock) {
        AdditiveEngine::render(self, block);
    }
}

impl EngineBlock for PolyphonicEngine {
    fn apply_params(&mut self, live: &LiveParams) {
        PolyphonicEngine::apply_params(self, live);
    }
    fn prepare_block(&mut self, bus: &LineBus) {
        PolyphonicEngine::prepare_block(self, bus);
    }
    fn render(&mut self, block: &mut AudioBlock) {
        PolyphonicEngine::render(self, block);
    }
}

impl EngineBlock for PhotowaveEngine {
    fn apply_params(&mut self, live: &LiveParams) {
        PhotowaveEngine::apply_params(self, live);
    }
    fn prepare_block(&mut self, bus: &LineBus) {
        PhotowaveEngine::prepare_block(self, bus);
    }
    fn render(&mut self, block: &mut AudioBlock) {
        PhotowaveEngine::render(self, block);
    }
}

/// Spin-fill loop shared by the three producers. `wait_cap` bounds how long
/// the thread spins on a busy ring before it logs the dropped block and
/// starts a fresh wait window (the photowave producer uses this).
fn spawn_producer(
    name: &'static str,
    running: Arc<AtomicBool>,
    mut producer: BlockProducer,
    mut fill_block: impl FnMut(&mut AudioBlock) + Send + 'static,
    wait_cap: Option<Duration>,
) -> Result<JoinHandle<()>, CoreError> {
    std::thread::Builder::new()
        .name(name.into())
        .spawn(move || {
            let mut wait_start: Option<Instant> = None;
            while running.load(Ordering::Relaxed) {
                if producer.try_fill(&mut fill_block) {
                    wait_start = None;
                    continue;
                }
                if let Some(cap) = wait_cap {
                    let start = *wait_start.get_or_insert_with(Instant::now);
                    if start.elapsed() > cap {
                        log::debug!("{name}: scratch ring busy past {cap:?}, block dropped");
                        wait_start = None;
                    }
                }
                std::hint::spin_loop();
                std::thread::yield_now();
            }
        })
        .map_err(|e| CoreError::Thread(name, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headless_core() -> SynthesisCore {
        let mut cfg = RuntimeConfig::default();
        cfg.synthesis.sensor_dpi = 200;
        SynthesisCore::with_options(cfg, CoreOptions::headless()).expect("core must start")
    }

    #[test]
    fn invalid_config_refuses_construction() {
        let mut cfg = RuntimeConfig::default();
        cfg.audio.audio_buffer_size = 1;
        let err = SynthesisCore::with_options(cfg, CoreOptions::headless());
        assert!(matches!(err, Err(CoreError::Config(_))));
    }

    #[test]
    fn malformed_frames_are_counted_not_published() {
        let core = headless_core();
        core.publish_image_line(&[0, 1, 2], &[0, 1, 2], &[0, 1, 2]);
        assert_eq!(core.status().frames_dropped, 1);
        core.shutdown();
    }

    #[test]
    fn headless_core_renders_and_shuts_down() {
        let mut core = headless_core();
        let n = 1_728;
        let white = vec![255u8; n];
        core.publish_image_line(&white, &white, &white);
        core.enqueue_midi_event(MidiEvent::NoteOn {
            channel: 0,
            note: 60,
            velocity: 100,
        });
        core.push_parameter(ParamId::ReverbMix, 0.2);

        let mut left = vec![0.0f32; 512];
        let mut right = vec![0.0f32; 512];
        for _ in 0..20 {
            core.render(&mut left, &mut right);
            std::thread::sleep(Duration::from_millis(2));
        }
        // The pull path always yields a full, bounded block.
        assert!(left.iter().all(|s| s.is_finite() && s.abs() <= 1.0));
        core.shutdown();
    }

    #[test]
    fn dmx_zone_means_reflect_the_published_line() {
        let core = headless_core();
        let n = 1_728;
        core.publish_image_line(&vec![200u8; n], &vec![10u8; n], &vec![10u8; n]);
        // Give the preprocess thread a moment to publish.
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            let zones = core.dmx_zone_means();
            if zones.count > 0 && (zones.means[0][0] - 200.0).abs() < 1.0 {
                break;
            }
            assert!(Instant::now() < deadline, "preprocess thread never published");
            std::thread::sleep(Duration::from_millis(5));
        }
        core.shutdown();
    }
}
