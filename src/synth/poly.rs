//! Polyphonic voice engine.
//!
//! MIDI notes become voices whose harmonic content is sampled from the
//! current preprocessed line at note-on: every grayscale bin above the
//! audibility floor contributes one integer harmonic, gamma-shaped and
//! normalized. Each voice runs two ADSRs (volume and filter), a one-pole
//! low-pass, and shares a global vibrato LFO. Voice allocation is strictly
//! deterministic so the same event sequence always lands on the same voices.

use std::sync::Arc;

use crossbeam_channel::Receiver;

use crate::config::RuntimeConfig;
use crate::dsp::envelope::{Envelope, EnvelopeStage};
use crate::dsp::filter::OnePoleLowpass;
use crate::dsp::lfo::Lfo;
use crate::image::PreprocessedLine;
use crate::midi::MidiEvent;
use crate::params::{AdsrKnobs, LiveParams};
use crate::rt::line_bus::LineBus;
use crate::rt::scratch::AudioBlock;
use crate::rt::status::StatusCounters;

use std::f32::consts::TAU;

/// CC number releasing every active voice.
const CC_ALL_NOTES_OFF: u8 = 123;

#[derive(Debug, Clone, Copy, Default)]
struct Harmonic {
    multiplier: f32,
    amplitude: f32,
    phase: f32,
}

struct Voice {
    note: u8,
    velocity: f32,
    active: bool,
    trigger_order: u64,
    fundamental_hz: f32,

    volume_env: Envelope,
    filter_env: Envelope,
    filter: OnePoleLowpass,

    harmonics: Vec<Harmonic>,
    harmonic_count: usize,
    /// 1 / sum of harmonic amplitudes, so a dense line does not get louder
    /// than a sparse one.
    harmonic_norm: f32,
}

impl Voice {
    fn new(cfg: &RuntimeConfig) -> Self {
        let sample_rate = cfg.audio.sampling_frequency as f32;
        let p = &cfg.polyphonic;
        Self {
            note: 0,
            velocity: 0.0,
            active: false,
            trigger_order: 0,
            fundamental_hz: 0.0,
            volume_env: Envelope::new(sample_rate, adsr_knobs(&p.volume_adsr)),
            filter_env: Envelope::new(sample_rate, adsr_knobs(&p.filter_adsr)),
            filter: OnePoleLowpass::new(sample_rate, p.filter_cutoff_hz),
            harmonics: vec![Harmonic::default(); p.max_harmonics_per_voice],
            harmonic_count: 0,
            harmonic_norm: 1.0,
        }
    }

    fn start(&mut self, note: u8, velocity: u8, order: u64) {
        self.note = note;
        self.velocity = velocity as f32 / 127.0;
        self.active = true;
        self.trigger_order = order;
        self.fundamental_hz = midi_note_hz(note);
        for h in &mut self.harmonics {
            h.phase = 0.0;
        }
        self.filter.reset();
        self.volume_env.reset();
        self.filter_env.reset();
        self.volume_env.trigger();
        self.filter_env.trigger();
    }

    fn release(&mut self) {
        self.volume_env.release();
        self.filter_env.release();
    }
}

fn adsr_knobs(adsr: &crate::config::AdsrConfig) -> AdsrKnobs {
    AdsrKnobs {
        attack_ms: adsr.attack_ms,
        decay_ms: adsr.decay_ms,
        sustain_level: adsr.sustain_level,
        release_ms: adsr.release_ms,
    }
}

/// Equal temperament around A4 = 440 Hz.
pub fn midi_note_hz(note: u8) -> f32 {
    440.0 * ((note as f32 - 69.0) / 12.0).exp2()
}

pub struct PolyphonicEngine {
    sample_rate: f32,
    voices: Vec<Voice>,
    trigger_counter: u64,
    lfo: Lfo,

    midi_rx: Option<Receiver<MidiEvent>>,

    line: PreprocessedLine,
    line_seq: u64,

    // Frozen configuration.
    max_harmonics: usize,
    min_audible: f32,
    amplitude_gamma: f32,
    harmonic_limit_hz: f32,

    // Live knobs, refreshed at block boundaries.
    volume_knobs: AdsrKnobs,
    filter_knobs: AdsrKnobs,
    lfo_depth_semitones: f32,
    base_cutoff_hz: f32,
    filter_env_depth_hz: f32,
    master_volume: f32,

    status: Arc<StatusCounters>,
}

impl PolyphonicEngine {
    pub fn new(
        cfg: &RuntimeConfig,
        midi_rx: Option<Receiver<MidiEvent>>,
        status: Arc<StatusCounters>,
    ) -> Self {
        let p = &cfg.polyphonic;
        Self {
            sample_rate: cfg.audio.sampling_frequency as f32,
            voices: (0..p.num_voices).map(|_| Voice::new(cfg)).collect(),
            trigger_counter: 0,
            lfo: Lfo::new(cfg.audio.sampling_frequency as f32, p.lfo_rate_hz),
            midi_rx,
            line: PreprocessedLine::new(cfg.n_pixels(), cfg.n_notes()),
            line_seq: 0,
            max_harmonics: p.max_harmonics_per_voice,
            min_audible: p.min_audible_amplitude,
            amplitude_gamma: p.amplitude_gamma,
            harmonic_limit_hz: p.high_freq_harmonic_limit_hz,
            volume_knobs: adsr_knobs(&p.volume_adsr),
            filter_knobs: adsr_knobs(&p.filter_adsr),
            lfo_depth_semitones: p.lfo_depth_semitones,
            base_cutoff_hz: p.filter_cutoff_hz,
            filter_env_depth_hz: p.filter_env_depth_hz,
            master_volume: p.master_volume,
            status,
        }
    }

    /// Adopt the live knob bundle; envelopes pick the change up without
    /// moving their current output level.
    pub fn apply_params(&mut self, live: &LiveParams) {
        self.volume_knobs = live.poly_volume_adsr;
        self.filter_knobs = live.poly_filter_adsr;
        self.lfo.set_rate(live.poly_lfo_rate_hz);
        self.lfo_depth_semitones = live.poly_lfo_depth_semitones;
        self.base_cutoff_hz = live.poly_filter_cutoff_hz;
        self.filter_env_depth_hz = live.poly_filter_env_depth_hz;
        self.master_volume = live.poly_master_volume;
        for voice in &mut self.voices {
            voice.volume_env.set_knobs(&self.volume_knobs);
            voice.filter_env.set_knobs(&self.filter_knobs);
        }
    }

    /// Refresh the engine-local copy of the preprocessed line.
    pub fn prepare_block(&mut self, bus: &LineBus) {
        let latest = bus.latest_seq();
        if latest != 0 && latest != self.line_seq {
            self.line_seq = bus.snapshot_into(&mut self.line);
        }
    }

    pub fn handle_event(&mut self, event: MidiEvent) {
        match event {
            MidiEvent::NoteOn { note, velocity, .. } => {
                if velocity == 0 {
                    self.note_off(note);
                } else {
                    self.note_on(note, velocity);
                }
            }
            MidiEvent::NoteOff { note, .. } => self.note_off(note),
            MidiEvent::ControlChange { controller, .. } if controller == CC_ALL_NOTES_OFF => {
                self.all_notes_off();
            }
            MidiEvent::ControlChange { .. } => {}
        }
    }

    pub fn note_on(&mut self, note: u8, velocity: u8) {
        if velocity == 0 {
            self.note_off(note);
            return;
        }
        let slot = self.allocate_voice();
        let order = self.trigger_counter;
        self.trigger_counter += 1;

        let voice = &mut self.voices[slot];
        voice.start(note, velocity, order);
        derive_harmonics(
            &self.line.gray,
            voice,
            self.min_audible,
            self.amplitude_gamma,
            self.harmonic_limit_hz,
            self.max_harmonics,
        );
    }

    pub fn note_off(&mut self, note: u8) {
        for voice in &mut self.voices {
            if voice.active && voice.note == note {
                voice.release();
            }
        }
    }

    pub fn all_notes_off(&mut self) {
        for voice in &mut self.voices {
            if voice.active {
                voice.release();
            }
        }
    }

    /// Deterministic three-tier voice allocation: an idle voice first, then
    /// the oldest voice not already releasing, then the quietest releasing
    /// voice. Voice 0 is the last-resort fallback.
    fn allocate_voice(&mut self) -> usize {
        if let Some(i) = self.voices.iter().position(|v| !v.active) {
            return i;
        }

        let oldest = self
            .voices
            .iter()
            .enumerate()
            .filter(|(_, v)| v.volume_env.stage() != EnvelopeStage::Release)
            .min_by_key(|(_, v)| v.trigger_order)
            .map(|(i, _)| i);
        if let Some(i) = oldest {
            return i;
        }

        let quietest = self
            .voices
            .iter()
            .enumerate()
            .filter(|(_, v)| v.volume_env.stage() == EnvelopeStage::Release)
            .fold(None::<(usize, f32)>, |best, (i, v)| {
                let level = v.volume_env.level();
                match best {
                    Some((_, b)) if b <= level => best,
                    _ => Some((i, level)),
                }
            })
            .map(|(i, _)| i);
        if let Some(i) = quietest {
            return i;
        }

        self.status.note_voice_starved();
        log::debug!("voice allocation starved, stealing voice 0");
        0
    }

    /// Drain pending MIDI, then render one stereo block.
    pub fn render(&mut self, block: &mut AudioBlock) {
        if let Some(rx) = self.midi_rx.take() {
            while let Ok(event) = rx.try_recv() {
                self.handle_event(event);
            }
            self.midi_rx = Some(rx);
        }

        let frames = block.frames();
        let nyquist = self.sample_rate * 0.5;
        for frame in 0..frames {
            let vibrato = self.lfo.step();
            let pitch_factor = (vibrato * self.lfo_depth_semitones / 12.0).exp2();

            let mut mix = 0.0f32;
            let mut active = 0u32;
            for voice in &mut self.voices {
                if !voice.active {
                    continue;
                }
                let vol = voice.volume_env.step();
                if voice.volume_env.is_idle() {
                    voice.active = false;
                    continue;
                }
                let filt = voice.filter_env.step();
                let cutoff =
                    (self.base_cutoff_hz + filt * self.filter_env_depth_hz).clamp(20.0, nyquist);
                voice.filter.set_cutoff(cutoff);

                let f0 = voice.fundamental_hz * pitch_factor;
                let mut sum = 0.0f32;
                for h in voice.harmonics[..voice.harmonic_count].iter_mut() {
                    sum += h.amplitude * (TAU * h.phase).sin();
                    h.phase += f0 * h.multiplier / self.sample_rate;
                    if h.phase >= 1.0 {
                        h.phase -= 1.0;
                    }
                }
                let shaped = voice.filter.process(sum * voice.harmonic_norm);
                mix += shaped * vol * voice.velocity;
                active += 1;
            }

            if active > 1 {
                mix /= (active as f32).sqrt();
            }
            let out = (mix * self.master_volume).clamp(-1.0, 1.0);
            block.left[frame] = out;
            block.right[frame] = out;
        }
    }

    pub fn active_voices(&self) -> usize {
        self.voices.iter().filter(|v| v.active).count()
    }

    /// Voice index currently sounding `note`, for allocation tests.
    pub fn voice_of(&self, note: u8) -> Option<usize> {
        self.voices
            .iter()
            .position(|v| v.active && v.note == note)
    }

    /// (note, trigger order) per active voice, for determinism tests.
    pub fn assignments(&self) -> Vec<(usize, u8, u64)> {
        self.voices
            .iter()
            .enumerate()
            .filter(|(_, v)| v.active)
            .map(|(i, v)| (i, v.note, v.trigger_order))
            .collect()
    }
}

/// Sample the grayscale line into a harmonic series: the k-th bin above the
/// audibility floor becomes harmonic k (integer multiple of the
/// fundamental), gamma-shaped and normalized to the strongest bin. An empty
/// line falls back to a pure fundamental so a note is never silent.
fn derive_harmonics(
    gray: &[f32],
    voice: &mut Voice,
    min_audible: f32,
    gamma: f32,
    limit_hz: f32,
    max_harmonics: usize,
) {
    let mut count = 0;
    let mut peak = 0.0f32;
    for &bin in gray {
        if count == max_harmonics {
            break;
        }
        if bin <= min_audible {
            continue;
        }
        let multiplier = (count + 1) as f32;
        if voice.fundamental_hz * multiplier > limit_hz {
            break;
        }
        let amplitude = bin.powf(gamma);
        voice.harmonics[count] = Harmonic {
            multiplier,
            amplitude,
            phase: 0.0,
        };
        peak = peak.max(amplitude);
        count += 1;
    }

    if count == 0 {
        voice.harmonics[0] = Harmonic {
            multiplier: 1.0,
            amplitude: 1.0,
            phase: 0.0,
        };
        voice.harmonic_count = 1;
        voice.harmonic_norm = 1.0;
        return;
    }

    let mut total = 0.0;
    for h in &mut voice.harmonics[..count] {
        h.amplitude /= peak;
        total += h.amplitude;
    }
    voice.harmonic_count = count;
    voice.harmonic_norm = 1.0 / total.max(1.0e-6);
}
