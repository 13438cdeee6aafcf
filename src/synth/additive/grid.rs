//! The oscillator frequency grid.
//!
//! One oscillator per note slot, pitched so that one pixel advances the grid
//! by exactly one comma. Every oscillator folds into its base octave: the
//! wavetable period is computed from the folded-down fundamental and the
//! integer phase advances by the octave coefficient, so oscillators an
//! octave apart share the same table. All arrays are read-only after
//! construction.

use crate::config::{RuntimeConfig, SEMITONES_PER_OCTAVE};

pub struct FrequencyGrid {
    /// Target pitch of each oscillator, strictly increasing.
    pub freq_hz: Vec<f32>,
    /// Pitch folded into the base octave; the wavetable is cut to this.
    pub base_freq_hz: Vec<f32>,
    /// Wavetable period in samples, `round(sample_rate / base_freq)`.
    pub area_size: Vec<u32>,
    /// Integer phase step through the shared table, `2^octave`.
    pub octave_coeff: Vec<u32>,
    /// Normalized per-step phase increment, `1 / area_size`.
    pub phase_inc: Vec<f32>,
}

impl FrequencyGrid {
    pub fn build(cfg: &RuntimeConfig) -> Self {
        let n_notes = cfg.n_notes();
        let pixels_per_note = cfg.synthesis.pixels_per_note.max(1) as f32;
        let commas_per_octave = cfg.commas_per_semitone() * SEMITONES_PER_OCTAVE;
        let low = cfg.synthesis.low_frequency;
        let sample_rate = cfg.audio.sampling_frequency as f32;

        let mut grid = Self {
            freq_hz: Vec::with_capacity(n_notes),
            base_freq_hz: Vec::with_capacity(n_notes),
            area_size: Vec::with_capacity(n_notes),
            octave_coeff: Vec::with_capacity(n_notes),
            phase_inc: Vec::with_capacity(n_notes),
        };

        for note in 0..n_notes {
            let comma = note as f32 * pixels_per_note;
            let freq = low * (comma / commas_per_octave).exp2();
            let octave = (comma / commas_per_octave).floor() as u32;
            let coeff = 1u32 << octave.min(31);
            let base = freq / coeff as f32;
            let area = (sample_rate / base).round().max(2.0) as u32;

            grid.freq_hz.push(freq);
            grid.base_freq_hz.push(base);
            grid.area_size.push(area);
            grid.octave_coeff.push(coeff);
            grid.phase_inc.push(1.0 / area as f32);
        }
        grid
    }

    pub fn len(&self) -> usize {
        self.freq_hz.len()
    }

    pub fn is_empty(&self) -> bool {
        self.freq_hz.is_empty()
    }

    /// The pitch actually rendered once the period is rounded to an integer
    /// sample count; differs from `freq_hz` by well under a DFT bin.
    pub fn effective_freq_hz(&self, note: usize, sample_rate: f32) -> f32 {
        self.octave_coeff[note] as f32 * sample_rate / self.area_size[note] as f32
    }
}
