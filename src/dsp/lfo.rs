//! Sine low-frequency oscillator for vibrato.

use std::f32::consts::TAU;

pub struct Lfo {
    sample_rate: f32,
    phase: f32,
    rate_hz: f32,
}

impl Lfo {
    pub fn new(sample_rate: f32, rate_hz: f32) -> Self {
        Self {
            sample_rate,
            phase: 0.0,
            rate_hz: rate_hz.clamp(0.01, 20.0),
        }
    }

    pub fn set_rate(&mut self, rate_hz: f32) {
        self.rate_hz = rate_hz.clamp(0.01, 20.0);
    }

    /// Next sample in [-1, 1].
    pub fn step(&mut self) -> f32 {
        let out = (TAU * self.phase).sin();
        self.phase += self.rate_hz / self.sample_rate;
        if self.phase >= 1.0 {
            self.phase -= 1.0;
        }
        out
    }

    pub fn reset(&mut self) {
        self.phase = 0.0;
    }
}
