//! Photowave engine: the image line as a single-cycle wavetable.
//!
//! Every voice scans the current grayscale line at a MIDI-derived rate,
//! left-to-right, right-to-left, or ping-pong, with linear or Catmull-Rom
//! interpolation. Voices carry the same ADSR pair and one-pole filter as the
//! polyphonic engine and share a single vibrato LFO; scan mode, amplitude
//! and interpolation are playable live over MIDI CC.

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
use crate::synth::poly::midi_note_hz;

const CC_SCAN_MODE: u8 = 1;
const CC_AMPLITUDE: u8 = 7;
const CC_INTERP_MODE: u8 = 74;
const CC_ALL_NOTES_OFF: u8 = 123;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    LeftToRight,
    RightToLeft,
    /// Ping-pong: out and back in one cycle, phase increment doubled so the
    /// apparent pitch is preserved.
    Dual,
}

impl ScanMode {
    pub fn from_index(index: u8) -> Self {
        match index {
            0 => ScanMode::LeftToRight,
            1 => ScanMode::RightToLeft,
            _ => ScanMode::Dual,
        }
    }

    /// CC value split into thirds.
    fn from_cc(value: u8) -> Self {
        match value {
            0..=42 => ScanMode::LeftToRight,
            43..=85 => ScanMode::RightToLeft,
            _ => ScanMode::Dual,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpMode {
    Linear,
    Cubic,
}

impl InterpMode {
    pub fn from_index(index: u8) -> Self {
        if index == 0 {
            InterpMode::Linear
        } else {
            InterpMode::Cubic
        }
    }
}

/// Read the wavetable at normalized phase `φ ∈ [0, 1)`, mapped onto the
/// pixel axis by the scan mode, and rescale the [0, 1] grayscale to a
/// signed sample.
pub fn sample_wavetable(gray: &[f32], phase: f32, scan: ScanMode, interp: InterpMode) -> f32 {
    let span = (gray.len() - 1) as f32;
    let position = match scan {
        ScanMode::LeftToRight => phase * span,
        ScanMode::RightToLeft => (1.0 - phase) * span,
        ScanMode::Dual => {
            if phase < 0.5 {
                2.0 * phase * span
            } else {
                (1.0 - phase) * 2.0 * span
            }
        }
    };
    let value = match interp {
        InterpMode::Linear => interp_linear(gray, position),
        InterpMode::Cubic => interp_catmull_rom(gray, position),
    };
    value * 2.0 - 1.0
}

fn interp_linear(gray: &[f32], position: f32) -> f32 {
    let i0 = (position.floor() as usize).min(gray.len() - 1);
    let i1 = (i0 + 1).min(gray.len() - 1);
    let frac = position - position.floor();
    gray[i0] * (1.0 - frac) + gray[i1] * frac
}

/// Catmull-Rom with the end points clamped to the line boundary.
fn interp_catmull_rom(gray: &[f32], position: f32) -> f32 {
    let last = gray.len() - 1;
    let i1 = (position.floor() as usize).min(last);
    let i0 = i1.saturating_sub(1);
    let i2 = (i1 + 1).min(last);
    let i3 = (i1 + 2).min(last);
    let t = position - position.floor();

    let (p0, p1, p2, p3) = (gray[i0], gray[i1], gray[i2], gray[i3]);
    let t2 = t * t;
    let t3 = t2 * t;
    0.5 * ((2.0 * p1)
        + (-p0 + p2) * t
        + (2.0 * p0 - 5.0 * p1 + 4.0 * p2 - p3) * t2
        + (-p0 + 3.0 * p1 - 3.0 * p2 + p3) * t3)
}

struct PhotowaveVoice {
    note: u8,
    velocity: f32,
    active: bool,
    trigger_order: u64,
    frequency_hz: f32,
    phase: f32,

    volume_env: Envelope,
    filter_env: Envelope,
    filter: OnePoleLowpass,
}

impl PhotowaveVoice {
    fn new(cfg: &RuntimeConfig) -> Self {
        let sample_rate = cfg.audio.sampling_frequency as f32;
        let p = &cfg.polyphonic;
        Self {
            note: 0,
            velocity: 0.0,
            active: false,
            trigger_order: 0,
            frequency_hz: 0.0,
            phase: 0.0,
            volume_env: Envelope::new(
                sample_rate,
                AdsrKnobs {
                    attack_ms: p.volume_adsr.attack_ms,
                    decay_ms: p.volume_adsr.decay_ms,
                    sustain_level: p.volume_adsr.sustain_level,
                    release_ms: p.volume_adsr.release_ms,
                },
            ),
            filter_env: Envelope::new(
                sample_rate,
                AdsrKnobs {
                    attack_ms: p.filter_adsr.attack_ms,
                    decay_ms: p.filter_adsr.decay_ms,
                    sustain_level: p.filter_adsr.sustain_level,
                    release_ms: p.filter_adsr.release_ms,
                },
            ),
            filter: OnePoleLowpass::new(sample_rate, p.filter_cutoff_hz),
        }
    }
}

pub struct PhotowaveEngine {
    sample_rate: f32,
    voices: Vec<PhotowaveVoice>,
    trigger_counter: u64,
    lfo: Lfo,
    lfo_depth_semitones: f32,

    scan_mode: ScanMode,
    interp_mode: InterpMode,
    amplitude: f32,
    continuous: bool,
    min_frequency: f32,
    max_frequency: f32,

    base_cutoff_hz: f32,
    filter_env_depth_hz: f32,

    midi_rx: Option<Receiver<MidiEvent>>,
    line: PreprocessedLine,
    line_seq: u64,

    status: Arc<StatusCounters>,
}

impl PhotowaveEngine {
    pub fn new(
        cfg: &RuntimeConfig,
        midi_rx: Option<Receiver<MidiEvent>>,
        status: Arc<StatusCounters>,
    ) -> Self {
        let sample_rate = cfg.audio.sampling_frequency as f32;
        let p = &cfg.photowave;
        Self {
            sample_rate,
            voices: (0..p.num_voices).map(|_| PhotowaveVoice::new(cfg)).collect(),
            trigger_counter: 0,
            lfo: Lfo::new(sample_rate, cfg.polyphonic.lfo_rate_hz),
            lfo_depth_semitones: cfg.polyphonic.lfo_depth_semitones,
            scan_mode: ScanMode::from_index(p.scan_mode),
            interp_mode: InterpMode::from_index(p.interp_mode),
            amplitude: p.amplitude,
            continuous: p.continuous_mode,
            min_frequency: sample_rate / cfg.n_pixels() as f32,
            max_frequency: p.max_frequency,
            base_cutoff_hz: cfg.polyphonic.filter_cutoff_hz,
            filter_env_depth_hz: cfg.polyphonic.filter_env_depth_hz,
            midi_rx,
            line: PreprocessedLine::new(cfg.n_pixels(), cfg.n_notes()),
            line_seq: 0,
            status,
        }
    }

    pub fn apply_params(&mut self, live: &LiveParams) {
        self.amplitude = live.photowave_amplitude;
        self.lfo.set_rate(live.poly_lfo_rate_hz);
        self.lfo_depth_semitones = live.poly_lfo_depth_semitones;
    }

    /// Refresh the wavetable from the bus. In continuous mode the table
    /// always follows the live feed; otherwise it holds still while any
    /// voice is sounding so a sustained note keeps its timbre.
    pub fn prepare_block(&mut self, bus: &LineBus) {
        if !self.continuous && self.voices.iter().any(|v| v.active) {
            return;
        }
        let latest = bus.latest_seq();
        if latest != 0 && latest != self.line_seq {
            self.line_seq = bus.snapshot_into(&mut self.line);
        }
    }

    /// Note pitch clamped so one wavetable pass never outruns the line and
    /// never exceeds the configured ceiling.
    pub fn note_frequency(&self, note: u8) -> f32 {
        midi_note_hz(note).clamp(self.min_frequency, self.max_frequency)
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
            MidiEvent::ControlChange {
                controller, value, ..
            } => self.control_change(controller, value),
        }
    }

    fn control_change(&mut self, controller: u8, value: u8) {
        match controller {
            CC_SCAN_MODE => self.scan_mode = ScanMode::from_cc(value),
            CC_AMPLITUDE => self.amplitude = value as f32 / 127.0,
            CC_INTERP_MODE => {
                self.interp_mode = if value < 64 {
                    InterpMode::Linear
                } else {
                    InterpMode::Cubic
                }
            }
            CC_ALL_NOTES_OFF => self.all_notes_off(),
            _ => {}
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

        let frequency = self.note_frequency(note);
        let voice = &mut self.voices[slot];
        voice.note = note;
        voice.velocity = velocity as f32 / 127.0;
        voice.active = true;
        voice.trigger_order = order;
        voice.frequency_hz = frequency;
        voice.phase = 0.0;
        voice.filter.reset();
        voice.volume_env.reset();
        voice.filter_env.reset();
        voice.volume_env.trigger();
        voice.filter_env.trigger();
    }

    pub fn note_off(&mut self, note: u8) {
        for voice in &mut self.voices {
            if voice.active && voice.note == note {
                voice.volume_env.release();
                voice.filter_env.release();
            }
        }
    }

    pub fn all_notes_off(&mut self) {
        for voice in &mut self.voices {
            if voice.active {
                voice.volume_env.release();
                voice.filter_env.release();
            }
        }
    }

    /// Same three-tier steal priority as the polyphonic engine.
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
        log::debug!("photowave voice allocation starved, stealing voice 0");
        0
    }

    pub fn render(&mut self, block: &mut AudioBlock) {
        if let Some(rx) = self.midi_rx.take() {
            while let Ok(event) = rx.try_recv() {
                self.handle_event(event);
            }
            self.midi_rx = Some(rx);
        }

        let frames = block.frames();
        let nyquist = self.sample_rate * 0.5;
        let inc_factor = if self.scan_mode == ScanMode::Dual { 2.0 } else { 1.0 };

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

                let raw =
                    sample_wavetable(&self.line.gray, voice.phase, self.scan_mode, self.interp_mode);
                let shaped = voice.filter.process(raw);
                mix += shaped * vol * voice.velocity;
                active += 1;

                voice.phase +=
                    voice.frequency_hz * pitch_factor * inc_factor / self.sample_rate;
                while voice.phase >= 1.0 {
                    voice.phase -= 1.0;
                }
            }

            if active > 1 {
                mix /= (active as f32).sqrt();
            }
            let out = (mix * self.amplitude).clamp(-1.0, 1.0);
            block.left[frame] = out;
            block.right[frame] = out;
        }
    }

    pub fn active_voices(&self) -> usize {
        self.voices.iter().filter(|v| v.active).count()
    }

    pub fn scan_mode(&self) -> ScanMode {
        self.scan_mode
    }

    pub fn interp_mode(&self) -> InterpMode {
        self.interp_mode
    }

    pub fn amplitude(&self) -> f32 {
        self.amplitude
    }
}
