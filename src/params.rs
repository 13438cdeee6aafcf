//! MIDI-bound live parameters.
//!
//! [`RuntimeConfig`](crate::config::RuntimeConfig) is frozen at start-up;
//! the handful of scalars a control surface keeps moving afterwards (send
//! levels, ADSR knobs, LFO depth, reverb mix, volumes) travel through a
//! single-writer sequence lock instead. Producers and the mixer copy the
//! whole bundle out once per audio block, so a knob turn lands at the next
//! block boundary and never mid-buffer.

use std::sync::Arc;

use crate::config::RuntimeConfig;
use crate::rt::seq_lock::SeqLock;

/// ADSR knob group shared by the MIDI-driven engines.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdsrKnobs {
    pub attack_ms: f32,
    pub decay_ms: f32,
    pub sustain_level: f32,
    pub release_ms: f32,
}

/// The complete live bundle. Copied out atomically; keep it `Copy`-cheap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiveParams {
    /// Global volume applied to the additive oscillator targets.
    pub master_volume: f32,

    // Per-engine dry levels into the mix.
    pub additive_level: f32,
    pub poly_level: f32,
    pub photowave_level: f32,

    // Per-engine sends into the shared reverb.
    pub additive_reverb_send: f32,
    pub poly_reverb_send: f32,
    pub photowave_reverb_send: f32,

    pub reverb_room_size: f32,
    pub reverb_damping: f32,
    pub reverb_mix: f32,

    pub poly_volume_adsr: AdsrKnobs,
    pub poly_filter_adsr: AdsrKnobs,
    pub poly_lfo_rate_hz: f32,
    pub poly_lfo_depth_semitones: f32,
    pub poly_filter_cutoff_hz: f32,
    pub poly_filter_env_depth_hz: f32,
    pub poly_master_volume: f32,

    pub photowave_amplitude: f32,
}

impl LiveParams {
    /// Seed the live bundle from the frozen configuration.
    pub fn from_config(cfg: &RuntimeConfig) -> Self {
        let p = &cfg.polyphonic;
        Self {
            master_volume: 1.0,
            additive_level: 1.0,
            poly_level: 1.0,
            photowave_level: 1.0,
            additive_reverb_send: 0.0,
            poly_reverb_send: 0.0,
            photowave_reverb_send: 0.0,
            reverb_room_size: 0.5,
            reverb_damping: 0.5,
            reverb_mix: 0.0,
            poly_volume_adsr: AdsrKnobs {
                attack_ms: p.volume_adsr.attack_ms,
                decay_ms: p.volume_adsr.decay_ms,
                sustain_level: p.volume_adsr.sustain_level,
                release_ms: p.volume_adsr.release_ms,
            },
            poly_filter_adsr: AdsrKnobs {
                attack_ms: p.filter_adsr.attack_ms,
                decay_ms: p.filter_adsr.decay_ms,
                sustain_level: p.filter_adsr.sustain_level,
                release_ms: p.filter_adsr.release_ms,
            },
            poly_lfo_rate_hz: p.lfo_rate_hz,
            poly_lfo_depth_semitones: p.lfo_depth_semitones,
            poly_filter_cutoff_hz: p.filter_cutoff_hz,
            poly_filter_env_depth_hz: p.filter_env_depth_hz,
            poly_master_volume: p.master_volume,
            photowave_amplitude: cfg.photowave.amplitude,
        }
    }
}

/// Identifier of one live scalar, the unit `push_parameter` speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamId {
    MasterVolume,
    AdditiveLevel,
    PolyLevel,
    PhotowaveLevel,
    AdditiveReverbSend,
    PolyReverbSend,
    PhotowaveReverbSend,
    ReverbRoomSize,
    ReverbDamping,
    ReverbMix,
    PolyAttackMs,
    PolyDecayMs,
    PolySustain,
    PolyReleaseMs,
    PolyFilterAttackMs,
    PolyFilterDecayMs,
    PolyFilterSustain,
    PolyFilterReleaseMs,
    PolyLfoRateHz,
    PolyLfoDepthSemitones,
    PolyFilterCutoffHz,
    PolyFilterEnvDepthHz,
    PolyMasterVolume,
    PhotowaveAmplitude,
}

/// Shared read side of the inbox; one per consuming thread is fine, the
/// copy-out is lock-free.
#[derive(Clone)]
pub struct ParamView {
    shared: Arc<SeqLock<LiveParams>>,
}

impl ParamView {
    pub fn read(&self) -> LiveParams {
        self.shared.read()
    }
}

/// Unique write side of the inbox, owned by the control thread.
pub struct ParamInbox {
    shared: Arc<SeqLock<LiveParams>>,
    current: LiveParams,
}

impl ParamInbox {
    pub fn new(initial: LiveParams) -> (Self, ParamView) {
        let shared = Arc::new(SeqLock::new(initial));
        (
            Self {
                shared: Arc::clone(&shared),
                current: initial,
            },
            ParamView { shared },
        )
    }

    /// Apply one scalar update and publish the whole bundle. Values are
    /// clamped into their valid range here so consumers never re-validate.
    pub fn push(&mut self, id: ParamId, value: f32) {
        let c = &mut self.current;
        match id {
            ParamId::MasterVolume => c.master_volume = unit(value),
            ParamId::AdditiveLevel => c.additive_level = unit(value),
            ParamId::PolyLevel => c.poly_level = unit(value),
            ParamId::PhotowaveLevel => c.photowave_level = unit(value),
            ParamId::AdditiveReverbSend => c.additive_reverb_send = unit(value),
            ParamId::PolyReverbSend => c.poly_reverb_send = unit(value),
            ParamId::PhotowaveReverbSend => c.photowave_reverb_send = unit(value),
            ParamId::ReverbRoomSize => c.reverb_room_size = unit(value),
            ParamId::ReverbDamping => c.reverb_damping = unit(value),
            ParamId::ReverbMix => c.reverb_mix = unit(value),
            ParamId::PolyAttackMs => c.poly_volume_adsr.attack_ms = time_ms(value),
            ParamId::PolyDecayMs => c.poly_volume_adsr.decay_ms = time_ms(value),
            ParamId::PolySustain => c.poly_volume_adsr.sustain_level = unit(value),
            ParamId::PolyReleaseMs => c.poly_volume_adsr.release_ms = time_ms(value),
            ParamId::PolyFilterAttackMs => c.poly_filter_adsr.attack_ms = time_ms(value),
            ParamId::PolyFilterDecayMs => c.poly_filter_adsr.decay_ms = time_ms(value),
            ParamId::PolyFilterSustain => c.poly_filter_adsr.sustain_level = unit(value),
            ParamId::PolyFilterReleaseMs => c.poly_filter_adsr.release_ms = time_ms(value),
            ParamId::PolyLfoRateHz => c.poly_lfo_rate_hz = value.clamp(0.01, 20.0),
            ParamId::PolyLfoDepthSemitones => {
                c.poly_lfo_depth_semitones = value.clamp(0.0, 12.0)
            }
            ParamId::PolyFilterCutoffHz => c.poly_filter_cutoff_hz = value.clamp(20.0, 20_000.0),
            ParamId::PolyFilterEnvDepthHz => {
                c.poly_filter_env_depth_hz = value.clamp(-10_000.0, 10_000.0)
            }
            ParamId::PolyMasterVolume => c.poly_master_volume = unit(value),
            ParamId::PhotowaveAmplitude => c.photowave_amplitude = unit(value),
        }
        self.shared.write(self.current);
    }

    pub fn current(&self) -> &LiveParams {
        &self.current
    }
}

fn unit(value: f32) -> f32 {
    value.clamp(0.0, 1.0)
}

fn time_ms(value: f32) -> f32 {
    value.clamp(1.0, 10_000.0)
}
