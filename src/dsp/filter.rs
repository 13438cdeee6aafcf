//! One-pole low-pass filter used per voice.
//!
//! `y[n] = y[n-1] + a * (x[n] - y[n-1])` with `a = 1 - exp(-2π fc / sr)`.
//! The cutoff moves every sample under envelope modulation, so the
//! coefficient update avoids recomputing when the target did not change.

use std::f32::consts::TAU;

pub struct OnePoleLowpass {
    sample_rate: f32,
    cutoff_hz: f32,
    coeff: f32,
    state: f32,
}

impl OnePoleLowpass {
    pub fn new(sample_rate: f32, cutoff_hz: f32) -> Self {
        let mut filter = Self {
            sample_rate,
            cutoff_hz: 0.0,
            coeff: 1.0,
            state: 0.0,
        };
        filter.set_cutoff(cutoff_hz);
        filter
    }

    pub fn set_cutoff(&mut self, cutoff_hz: f32) {
        let clamped = cutoff_hz.clamp(20.0, self.sample_rate * 0.5);
        if clamped != self.cutoff_hz {
            self.cutoff_hz = clamped;
            self.coeff = 1.0 - (-TAU * clamped / self.sample_rate).exp();
        }
    }

    pub fn cutoff(&self) -> f32 {
        self.cutoff_hz
    }

    #[inline]
    pub fn process(&mut self, input: f32) -> f32 {
        self.state += self.coeff * (input - self.state);
        self.state
    }

    pub fn reset(&mut self) {
        self.state = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cutoff_is_clamped_to_the_audible_band() {
        let mut filter = OnePoleLowpass::new(48_000.0, 1.0);
        assert_eq!(filter.cutoff(), 20.0);
        filter.set_cutoff(1.0e6);
        assert_eq!(filter.cutoff(), 24_000.0);
    }

    #[test]
    fn dc_passes_through() {
        let mut filter = OnePoleLowpass::new(48_000.0, 1_000.0);
        let mut out = 0.0;
        for _ in 0..48_000 {
            out = filter.process(1.0);
        }
        assert!((out - 1.0).abs() < 1.0e-3);
    }

    #[test]
    fn lower_cutoff_attenuates_more() {
        // Alternate +1/-1 (Nyquist-rate content) and compare residual swing.
        let swing = |cutoff: f32| {
            let mut filter = OnePoleLowpass::new(48_000.0, cutoff);
            let mut max = 0.0f32;
            for i in 0..4_096 {
                let x = if i % 2 == 0 { 1.0 } else { -1.0 };
                let y = filter.process(x);
                if i > 2_048 {
                    max = max.max(y.abs());
                }
            }
            max
        };
        assert!(swing(100.0) < swing(8_000.0));
    }
}
