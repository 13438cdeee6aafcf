//! Additive oscillator bank.
//!
//! One slewed sinusoid per note slot, up to one per pixel. Each block the
//! engine copies the latest preprocessed line, derives a target amplitude
//! per oscillator from its pixels, and lets every amplitude follow its
//! target with separate attack and release time constants — release is
//! frequency-weighted so highs and lows decay comparably. The weighted sum
//! is normalized, response-shaped, gated and soft-limited into the output
//! block. No allocation happens during render.

pub mod grid;

use std::sync::Arc;

use crate::config::{
    RuntimeConfig, ALPHA_MIN, DECAY_WEIGHT_MAX, DECAY_WEIGHT_MIN, SUMMATION_BASE_LEVEL,
    TAU_DOWN_MAX_MS, TAU_UP_MAX_MS,
};
use crate::dsp::sine_table::SineTableBank;
use crate::image::PreprocessedLine;
use crate::params::LiveParams;
use crate::rt::line_bus::LineBus;
use crate::rt::scratch::AudioBlock;
use crate::rt::status::StatusCounters;
use crate::synth::additive::grid::FrequencyGrid;

/// Amplitudes below this flush to exactly zero, ending the exponential tail.
const AMP_FLUSH: f32 = 1.0e-9;

pub struct AdditiveEngine {
    grid: FrequencyGrid,
    /// Shared sine table handle per oscillator; many point at the same table.
    tables: Vec<Arc<[f32]>>,

    phase: Vec<u32>,
    amp: Vec<f32>,
    target: Vec<f32>,
    pan_left: Vec<f32>,
    pan_right: Vec<f32>,

    alpha_up: f32,
    alpha_down: Vec<f32>,
    instant_attack: bool,

    line: PreprocessedLine,
    line_seq: u64,

    pixels_per_note: usize,
    non_linear: bool,
    gamma: f32,

    weighting_exponent: f32,
    response_exponent: f32,
    noise_gate: f32,
    soft_threshold: f32,
    soft_knee: f32,

    volume: f32,
    status: Arc<StatusCounters>,
}

impl AdditiveEngine {
    pub fn new(cfg: &RuntimeConfig, status: Arc<StatusCounters>) -> Self {
        let sample_rate = cfg.audio.sampling_frequency as f32;
        let grid = FrequencyGrid::build(cfg);
        let n = grid.len();

        let mut bank = SineTableBank::build(grid.area_size.iter().copied());
        let tables: Vec<Arc<[f32]>> = grid
            .area_size
            .iter()
            .map(|&area| bank.get_or_build(area))
            .collect();

        let slew = &cfg.envelope_slew;
        let dt = 1.0 / sample_rate;
        let alpha_up = slew_alpha(dt, slew.tau_up_base_ms.min(TAU_UP_MAX_MS));
        let alpha_down = grid
            .freq_hz
            .iter()
            .map(|&freq| {
                let weight = (freq / slew.decay_freq_ref_hz)
                    .powf(slew.decay_freq_beta)
                    .clamp(DECAY_WEIGHT_MIN, DECAY_WEIGHT_MAX);
                let tau_ms = (slew.tau_down_base_ms * weight).min(TAU_DOWN_MAX_MS);
                slew_alpha(dt, tau_ms)
            })
            .collect();

        Self {
            tables,
            phase: vec![0; n],
            amp: vec![0.0; n],
            target: vec![0.0; n],
            pan_left: vec![std::f32::consts::FRAC_PI_4.cos(); n],
            pan_right: vec![std::f32::consts::FRAC_PI_4.cos(); n],
            alpha_up,
            alpha_down,
            instant_attack: slew.instant_attack,
            line: PreprocessedLine::new(cfg.n_pixels(), cfg.n_notes()),
            line_seq: 0,
            pixels_per_note: cfg.synthesis.pixels_per_note.max(1),
            non_linear: cfg.synthesis.non_linear_mapping,
            gamma: cfg.synthesis.gamma_value,
            weighting_exponent: cfg.summation.volume_weighting_exponent,
            response_exponent: cfg.summation.response_exponent,
            noise_gate: cfg.summation.noise_gate_threshold,
            soft_threshold: cfg.summation.soft_limit_threshold,
            soft_knee: cfg.summation.soft_limit_knee,
            volume: 1.0,
            status,
            grid,
        }
    }

    /// Live parameters land at block boundaries only.
    pub fn apply_params(&mut self, live: &LiveParams) {
        self.volume = live.master_volume;
    }

    /// Pull the newest line (if any) and refresh every oscillator's target
    /// amplitude and pan for the coming block.
    pub fn prepare_block(&mut self, bus: &LineBus) {
        let latest = bus.latest_seq();
        if latest != 0 && latest != self.line_seq {
            self.line_seq = bus.snapshot_into(&mut self.line);
        }
        self.refresh_targets();
    }

    fn refresh_targets(&mut self) {
        let gain = self.volume * self.line.contrast;
        for note in 0..self.grid.len() {
            let start = note * self.pixels_per_note;
            let mut sum = 0.0;
            for px in start..start + self.pixels_per_note {
                sum += self.line.gray[px];
            }
            let gray = sum / self.pixels_per_note as f32;
            let mapped = if self.non_linear {
                gray.powf(self.gamma)
            } else {
                gray
            };
            self.target[note] = mapped * gain;
        }
        self.pan_left.copy_from_slice(&self.line.pan_left);
        self.pan_right.copy_from_slice(&self.line.pan_right);
    }

    /// Render one stereo block. Amplitude slew, table lookup, weighted
    /// summation and output shaping, all allocation-free.
    pub fn render(&mut self, block: &mut AudioBlock) {
        let n = self.grid.len();
        let frames = block.frames();
        let mut anomalies = 0u32;

        for frame in 0..frames {
            let mut sum_left = 0.0f32;
            let mut sum_right = 0.0f32;
            let mut weight_sum = 0.0f32;

            for i in 0..n {
                let target = self.target[i];
                let mut amp = self.amp[i];

                if self.instant_attack && target > amp {
                    amp = target;
                } else {
                    let alpha = if target > amp {
                        self.alpha_up
                    } else {
                        self.alpha_down[i]
                    };
                    amp += alpha * (target - amp);
                }
                if !amp.is_finite() {
                    amp = 0.0;
                    anomalies += 1;
                }
                if amp < AMP_FLUSH {
                    amp = if target > 0.0 { amp.max(0.0) } else { 0.0 };
                }
                self.amp[i] = amp;

                if amp == 0.0 {
                    continue;
                }

                let table = &self.tables[i];
                let sample = table[self.phase[i] as usize];
                let mut next = self.phase[i] + self.grid.octave_coeff[i];
                let len = table.len() as u32;
                while next >= len {
                    next -= len;
                }
                self.phase[i] = next;

                let weight = amp.powf(self.weighting_exponent);
                let contribution = sample * amp * weight;
                sum_left += contribution * self.pan_left[i];
                sum_right += contribution * self.pan_right[i];
                weight_sum += weight;
            }

            let norm = weight_sum + SUMMATION_BASE_LEVEL;
            let left = self.shape(sum_left / norm, &mut anomalies);
            let right = self.shape(sum_right / norm, &mut anomalies);
            block.left[frame] = left;
            block.right[frame] = right;
        }

        for _ in 0..anomalies {
            self.status.note_numeric_anomaly();
        }
    }

    /// Response curve, noise gate and soft limiter on one output sample.
    fn shape(&self, x: f32, anomalies: &mut u32) -> f32 {
        let mut y = if (self.response_exponent - 1.0).abs() > 1.0e-6 {
            x.signum() * x.abs().powf(self.response_exponent)
        } else {
            x
        };
        if y.abs() < self.noise_gate {
            y = 0.0;
        }
        y = soft_limit(y, self.soft_threshold, self.soft_knee);
        if !y.is_finite() {
            *anomalies += 1;
            return 0.0;
        }
        y
    }

    pub fn grid(&self) -> &FrequencyGrid {
        &self.grid
    }

    /// Current slewed amplitude of each oscillator.
    pub fn amplitudes(&self) -> &[f32] {
        &self.amp
    }

    /// Current per-block target of each oscillator.
    pub fn targets(&self) -> &[f32] {
        &self.target
    }

    pub fn line_seq(&self) -> u64 {
        self.line_seq
    }
}

fn slew_alpha(dt: f32, tau_ms: f32) -> f32 {
    let tau_s = (tau_ms / 1_000.0).max(1.0e-6);
    (1.0 - (-dt / tau_s).exp()).max(ALPHA_MIN)
}

/// Asymptotic limiter: unity below the threshold, the excess compresses
/// into at most `knee` of extra headroom above it.
fn soft_limit(x: f32, threshold: f32, knee: f32) -> f32 {
    let mag = x.abs();
    if mag <= threshold {
        x
    } else {
        x.signum() * (threshold + knee * (1.0 - (-(mag - threshold) / knee).exp()))
    }
}
