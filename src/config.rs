//! Immutable-after-start runtime configuration.
//!
//! `RuntimeConfig` is the value bundle assembled by the external INI/CLI
//! loader before the synthesis core starts. Construction of the core refuses
//! an invalid bundle and reports every violation in one batch; after that the
//! bundle is never mutated — live, MIDI-bound scalars travel through the
//! parameter inbox instead (see [`crate::params`]).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Pixels per line for a 200 DPI contact image sensor.
pub const PIXELS_200_DPI: usize = 1728;
/// Pixels per line for a 400 DPI contact image sensor.
pub const PIXELS_400_DPI: usize = 3456;

pub const SEMITONES_PER_OCTAVE: f32 = 12.0;

/// Upper bound on DMX zones carried in a preprocessed line.
pub const MAX_DMX_ZONES: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sampling_frequency: u32, // {22050, 44100, 48000, 96000}
    pub audio_buffer_size: usize, // frames per callback, 16 to 2048
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sampling_frequency: 48_000,
            audio_buffer_size: 512,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    pub low_frequency: f32,  // Hz, bottom of the oscillator grid
    pub high_frequency: f32, // Hz, top of the grid, must stay below Nyquist
    pub sensor_dpi: u32,     // {200, 400}, selects pixels per line
    pub pixels_per_note: usize, // contiguous pixels driving one oscillator
    pub invert_intensity: bool, // dark-loud (scanned documents) vs light-loud
    pub non_linear_mapping: bool, // gamma-correct pixel values before use
    pub gamma_value: f32,    // exponent applied when non_linear_mapping is on
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            low_frequency: 65.41,     // C2
            high_frequency: 16_744.04, // C10, eight octaves above
            sensor_dpi: 400,
            pixels_per_note: 1,
            invert_intensity: true,
            non_linear_mapping: true,
            gamma_value: 1.8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContrastConfig {
    pub adjustment_power: f32, // exponent on the measured dynamic range
    pub min: f32,              // floor of the contrast scalar, (0, 1]
    pub stride: usize,         // pixel stride when scanning min/max
}

impl Default for ContrastConfig {
    fn default() -> Self {
        Self {
            adjustment_power: 1.5,
            min: 0.12,
            stride: 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvelopeSlewConfig {
    pub tau_up_base_ms: f32,   // attack time constant
    pub tau_down_base_ms: f32, // release time constant at the reference pitch
    pub decay_freq_ref_hz: f32, // pitch at which the release weight is 1.0
    pub decay_freq_beta: f32,  // exponent of the frequency weighting
    pub instant_attack: bool,  // short-circuit the upward slew
}

impl Default for EnvelopeSlewConfig {
    fn default() -> Self {
        Self {
            tau_up_base_ms: 2.0,
            tau_down_base_ms: 60.0,
            decay_freq_ref_hz: 440.0,
            decay_freq_beta: -0.5,
            instant_attack: false,
        }
    }
}

/// Hard ceilings on the slew time constants, milliseconds.
pub const TAU_UP_MAX_MS: f32 = 500.0;
pub const TAU_DOWN_MAX_MS: f32 = 4_000.0;

/// Clamp range for the frequency-dependent release weight.
pub const DECAY_WEIGHT_MIN: f32 = 0.25;
pub const DECAY_WEIGHT_MAX: f32 = 4.0;

/// Floor on the per-sample slew coefficient, keeps amplitudes out of the
/// denormal range.
pub const ALPHA_MIN: f32 = 1.0e-4;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StereoConfig {
    pub stereo_mode_enabled: bool,
    pub temperature_amplification: f32, // gain on the raw opponent-axis value
    pub blue_red_weight: f32,
    pub cyan_yellow_weight: f32,
    pub temperature_curve_exponent: f32, // >1 concentrates energy at center
}

impl Default for StereoConfig {
    fn default() -> Self {
        Self {
            stereo_mode_enabled: true,
            temperature_amplification: 2.0,
            blue_red_weight: 0.7,
            cyan_yellow_weight: 0.3,
            temperature_curve_exponent: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummationConfig {
    pub volume_weighting_exponent: f32, // <1 lets strong oscillators dominate
    pub response_exponent: f32,         // >1 compresses the mix, <1 expands
    pub noise_gate_threshold: f32,      // below this the sample is forced to 0
    pub soft_limit_threshold: f32,      // onset of the output limiter
    pub soft_limit_knee: f32,           // headroom above the threshold
}

impl Default for SummationConfig {
    fn default() -> Self {
        Self {
            volume_weighting_exponent: 0.6,
            response_exponent: 1.0,
            noise_gate_threshold: 1.0e-4,
            soft_limit_threshold: 0.85,
            soft_limit_knee: 0.12,
        }
    }
}

/// Constant added to the weight sum so a near-empty line does not divide by
/// a vanishing normalizer.
pub const SUMMATION_BASE_LEVEL: f32 = 1.0e-3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhotowaveConfig {
    pub scan_mode: u8,   // 0 = left-to-right, 1 = right-to-left, 2 = dual
    pub interp_mode: u8, // 0 = linear, 1 = Catmull-Rom cubic
    pub amplitude: f32,  // 0.0 to 1.0
    pub continuous_mode: bool, // follow the live line while notes sound
    pub num_voices: usize,
    pub max_frequency: f32, // Hz, ceiling on the note-derived pitch
}

impl Default for PhotowaveConfig {
    fn default() -> Self {
        Self {
            scan_mode: 0,
            interp_mode: 0,
            amplitude: 0.8,
            continuous_mode: true,
            num_voices: 6,
            max_frequency: 8_000.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdsrConfig {
    pub attack_ms: f32,
    pub decay_ms: f32,
    pub sustain_level: f32, // 0.0 to 1.0
    pub release_ms: f32,
}

impl Default for AdsrConfig {
    fn default() -> Self {
        Self {
            attack_ms: 10.0,
            decay_ms: 80.0,
            sustain_level: 0.7,
            release_ms: 200.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolyphonicConfig {
    pub num_voices: usize,
    pub max_oscillators: usize, // global cap: num_voices * max_harmonics
    pub max_harmonics_per_voice: usize,
    pub high_freq_harmonic_limit_hz: f32,
    pub amplitude_gamma: f32,      // shaping of line-derived harmonic levels
    pub min_audible_amplitude: f32, // bins below this never become harmonics
    pub master_volume: f32,
    pub volume_adsr: AdsrConfig,
    pub filter_adsr: AdsrConfig,
    pub lfo_rate_hz: f32,
    pub lfo_depth_semitones: f32,
    pub filter_cutoff_hz: f32,
    pub filter_env_depth_hz: f32,
}

impl Default for PolyphonicConfig {
    fn default() -> Self {
        Self {
            num_voices: 8,
            max_oscillators: 256,
            max_harmonics_per_voice: 16,
            high_freq_harmonic_limit_hz: 12_000.0,
            amplitude_gamma: 1.2,
            min_audible_amplitude: 0.02,
            master_volume: 0.8,
            volume_adsr: AdsrConfig::default(),
            filter_adsr: AdsrConfig {
                attack_ms: 5.0,
                decay_ms: 120.0,
                sustain_level: 0.4,
                release_ms: 150.0,
            },
            lfo_rate_hz: 5.5,
            lfo_depth_semitones: 0.0,
            filter_cutoff_hz: 2_000.0,
            filter_env_depth_hz: 3_000.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DmxConfig {
    pub zone_count: usize, // equal-width bands across the line
}

impl Default for DmxConfig {
    fn default() -> Self {
        Self { zone_count: 16 }
    }
}

/// The complete parameter bundle consumed by every component.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub audio: AudioConfig,
    pub synthesis: SynthesisConfig,
    pub contrast: ContrastConfig,
    pub envelope_slew: EnvelopeSlewConfig,
    pub stereo: StereoConfig,
    pub summation: SummationConfig,
    pub photowave: PhotowaveConfig,
    pub polyphonic: PolyphonicConfig,
    pub dmx: DmxConfig,
}

impl RuntimeConfig {
    /// Pixels per sensor line, decided once from the DPI setting.
    pub fn n_pixels(&self) -> usize {
        if self.synthesis.sensor_dpi == 200 {
            PIXELS_200_DPI
        } else {
            PIXELS_400_DPI
        }
    }

    /// Note slots (and oscillators) on the additive grid.
    pub fn n_notes(&self) -> usize {
        self.n_pixels() / self.synthesis.pixels_per_note.max(1)
    }

    /// Pitch subdivisions of a semitone, derived so one pixel maps to
    /// exactly one comma across the configured frequency span.
    pub fn commas_per_semitone(&self) -> f32 {
        let octaves = (self.synthesis.high_frequency / self.synthesis.low_frequency).log2();
        self.n_pixels() as f32 / (octaves * SEMITONES_PER_OCTAVE)
    }

    /// Check every recognized option and report all violations at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut violations = Vec::new();
        let mut bad = |msg: String| violations.push(msg);

        let sr = self.audio.sampling_frequency;
        if !matches!(sr, 22_050 | 44_100 | 48_000 | 96_000) {
            bad(format!(
                "audio.sampling_frequency = {sr} (expected one of 22050, 44100, 48000, 96000)"
            ));
        }
        let frames = self.audio.audio_buffer_size;
        if !(16..=2048).contains(&frames) {
            bad(format!(
                "audio.audio_buffer_size = {frames} (expected 16..=2048)"
            ));
        }

        let s = &self.synthesis;
        if !matches!(s.sensor_dpi, 200 | 400) {
            bad(format!(
                "synthesis.sensor_dpi = {} (expected 200 or 400)",
                s.sensor_dpi
            ));
        }
        if !(s.low_frequency > 0.0) {
            bad(format!(
                "synthesis.low_frequency = {} (must be positive)",
                s.low_frequency
            ));
        }
        if !(s.high_frequency > s.low_frequency) {
            bad(format!(
                "synthesis.high_frequency = {} (must exceed low_frequency)",
                s.high_frequency
            ));
        }
        if s.high_frequency >= sr as f32 / 2.0 {
            bad(format!(
                "synthesis.high_frequency = {} (must stay below Nyquist, {} Hz)",
                s.high_frequency,
                sr as f32 / 2.0
            ));
        }
        if s.pixels_per_note == 0 || self.n_pixels() % s.pixels_per_note != 0 {
            bad(format!(
                "synthesis.pixels_per_note = {} (must divide the {}-pixel line)",
                s.pixels_per_note,
                self.n_pixels()
            ));
        }
        if s.non_linear_mapping && !(s.gamma_value > 0.0) {
            bad(format!(
                "synthesis.gamma_value = {} (must be positive)",
                s.gamma_value
            ));
        }

        let c = &self.contrast;
        if !(c.adjustment_power > 0.0) {
            bad(format!(
                "contrast.adjustment_power = {} (must be positive)",
                c.adjustment_power
            ));
        }
        if !(c.min > 0.0 && c.min <= 1.0) {
            bad(format!("contrast.min = {} (expected (0, 1])", c.min));
        }
        if c.stride == 0 || c.stride > self.n_pixels() {
            bad(format!(
                "contrast.stride = {} (expected 1..={})",
                c.stride,
                self.n_pixels()
            ));
        }

        let e = &self.envelope_slew;
        if !(e.tau_up_base_ms > 0.0 && e.tau_up_base_ms <= TAU_UP_MAX_MS) {
            bad(format!(
                "envelope_slew.tau_up_base_ms = {} (expected (0, {TAU_UP_MAX_MS}])",
                e.tau_up_base_ms
            ));
        }
        if !(e.tau_down_base_ms > 0.0 && e.tau_down_base_ms <= TAU_DOWN_MAX_MS) {
            bad(format!(
                "envelope_slew.tau_down_base_ms = {} (expected (0, {TAU_DOWN_MAX_MS}])",
                e.tau_down_base_ms
            ));
        }
        if !(e.decay_freq_ref_hz > 0.0) {
            bad(format!(
                "envelope_slew.decay_freq_ref_hz = {} (must be positive)",
                e.decay_freq_ref_hz
            ));
        }

        let st = &self.stereo;
        if !(st.temperature_amplification > 0.0) {
            bad(format!(
                "stereo_processing.stereo_temperature_amplification = {} (must be positive)",
                st.temperature_amplification
            ));
        }
        if !(st.temperature_curve_exponent > 0.0) {
            bad(format!(
                "stereo_processing.stereo_temperature_curve_exponent = {} (must be positive)",
                st.temperature_curve_exponent
            ));
        }

        let m = &self.summation;
        if !(m.volume_weighting_exponent > 0.0) {
            bad(format!(
                "summation_normalization.volume_weighting_exponent = {} (must be positive)",
                m.volume_weighting_exponent
            ));
        }
        if !(m.response_exponent > 0.0) {
            bad(format!(
                "summation_normalization.summation_response_exponent = {} (must be positive)",
                m.response_exponent
            ));
        }
        if !(m.noise_gate_threshold >= 0.0) {
            bad(format!(
                "summation_normalization.noise_gate_threshold = {} (must be non-negative)",
                m.noise_gate_threshold
            ));
        }
        if !(m.soft_limit_threshold > 0.0 && m.soft_limit_threshold <= 1.0) {
            bad(format!(
                "summation_normalization.soft_limit_threshold = {} (expected (0, 1])",
                m.soft_limit_threshold
            ));
        }
        if !(m.soft_limit_knee > 0.0) {
            bad(format!(
                "summation_normalization.soft_limit_knee = {} (must be positive)",
                m.soft_limit_knee
            ));
        }

        let p = &self.photowave;
        if p.scan_mode > 2 {
            bad(format!("photowave.scan_mode = {} (expected 0..=2)", p.scan_mode));
        }
        if p.interp_mode > 1 {
            bad(format!(
                "photowave.interp_mode = {} (expected 0 or 1)",
                p.interp_mode
            ));
        }
        if !(0.0..=1.0).contains(&p.amplitude) {
            bad(format!(
                "photowave.amplitude = {} (expected 0..=1)",
                p.amplitude
            ));
        }
        if p.num_voices == 0 {
            bad("photowave.num_voices = 0 (need at least one voice)".to_string());
        }
        if !(p.max_frequency > 0.0) {
            bad(format!(
                "photowave.max_frequency = {} (must be positive)",
                p.max_frequency
            ));
        }

        let v = &self.polyphonic;
        if v.num_voices == 0 {
            bad("polyphonic.num_voices = 0 (need at least one voice)".to_string());
        }
        if v.max_harmonics_per_voice == 0 {
            bad("polyphonic.max_harmonics_per_voice = 0 (need at least one)".to_string());
        }
        if v.num_voices * v.max_harmonics_per_voice > v.max_oscillators {
            bad(format!(
                "polyphonic.max_oscillators = {} (num_voices * max_harmonics_per_voice = {})",
                v.max_oscillators,
                v.num_voices * v.max_harmonics_per_voice
            ));
        }
        if !(v.amplitude_gamma > 0.0) {
            bad(format!(
                "polyphonic.amplitude_gamma = {} (must be positive)",
                v.amplitude_gamma
            ));
        }
        if !(v.min_audible_amplitude >= 0.0) {
            bad(format!(
                "polyphonic.min_audible_amplitude = {} (must be non-negative)",
                v.min_audible_amplitude
            ));
        }
        if !(0.0..=1.0).contains(&v.master_volume) {
            bad(format!(
                "polyphonic.master_volume = {} (expected 0..=1)",
                v.master_volume
            ));
        }
        for (name, adsr) in [("volume", &v.volume_adsr), ("filter", &v.filter_adsr)] {
            if !(adsr.attack_ms > 0.0 && adsr.decay_ms > 0.0 && adsr.release_ms > 0.0) {
                bad(format!(
                    "polyphonic.{name}_adsr times must be positive (got {}/{}/{} ms)",
                    adsr.attack_ms, adsr.decay_ms, adsr.release_ms
                ));
            }
            if !(0.0..=1.0).contains(&adsr.sustain_level) {
                bad(format!(
                    "polyphonic.{name}_adsr sustain = {} (expected 0..=1)",
                    adsr.sustain_level
                ));
            }
        }
        if !(v.lfo_rate_hz > 0.0) {
            bad(format!(
                "polyphonic.lfo_rate_hz = {} (must be positive)",
                v.lfo_rate_hz
            ));
        }
        if !(v.lfo_depth_semitones >= 0.0) {
            bad(format!(
                "polyphonic.lfo_depth_semitones = {} (must be non-negative)",
                v.lfo_depth_semitones
            ));
        }
        if !(v.filter_cutoff_hz >= 20.0 && v.filter_cutoff_hz < sr as f32 / 2.0) {
            bad(format!(
                "polyphonic.filter_cutoff_hz = {} (expected 20 Hz to Nyquist)",
                v.filter_cutoff_hz
            ));
        }

        let d = &self.dmx;
        if d.zone_count == 0 || d.zone_count > MAX_DMX_ZONES {
            bad(format!(
                "dmx.zone_count = {} (expected 1..={MAX_DMX_ZONES})",
                d.zone_count
            ));
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(ConfigError { violations })
        }
    }
}

/// Batch of configuration violations; construction is refused until the
/// bundle is clean.
#[derive(Debug, Error)]
#[error("invalid configuration ({} violation(s)):\n  {}", .violations.len(), .violations.join("\n  "))]
pub struct ConfigError {
    pub violations: Vec<String>,
}
