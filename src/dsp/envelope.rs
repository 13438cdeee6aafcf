//! ADSR envelope generator.
//!
//! Linear segments with sample-rate-aware increments. Stage transitions fire
//! on either the level threshold or the segment's sample count, whichever
//! comes first, and knob changes only recompute increments — the current
//! output level is preserved so a moving knob never clicks.

use crate::params::AdsrKnobs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeStage {
    Idle,
    Attack,
    Decay,
    Sustain,
    Release,
}

pub struct Envelope {
    sample_rate: f32,
    stage: EnvelopeStage,
    level: f32,

    knobs: AdsrKnobs,

    attack_increment: f32,
    decay_decrement: f32,
    release_decrement: f32,

    /// Level when the release was triggered; the release ramp scales from
    /// here so a note released mid-attack fades from where it actually was.
    release_start: f32,

    /// Samples spent in the current stage, bounded by `stage_total`.
    stage_elapsed: u32,
    stage_total: u32,
}

impl Envelope {
    pub fn new(sample_rate: f32, knobs: AdsrKnobs) -> Self {
        let mut env = Self {
            sample_rate,
            stage: EnvelopeStage::Idle,
            level: 0.0,
            knobs,
            attack_increment: 0.0,
            decay_decrement: 0.0,
            release_decrement: 0.0,
            release_start: 0.0,
            stage_elapsed: 0,
            stage_total: 0,
        };
        env.update_increments();
        env
    }

    /// Adopt new knob values. Increments are recomputed in place; the
    /// current level and stage are untouched.
    pub fn set_knobs(&mut self, knobs: &AdsrKnobs) {
        if self.knobs != *knobs {
            self.knobs = *knobs;
            self.update_increments();
            if self.stage == EnvelopeStage::Release {
                // Re-derive the release slope from the original start level
                // with the new time; the ramp continues from `level`.
                self.release_decrement =
                    self.release_start / samples(self.knobs.release_ms, self.sample_rate) as f32;
            }
            self.stage_total = self.total_for(self.stage);
        }
    }

    fn update_increments(&mut self) {
        self.attack_increment = 1.0 / samples(self.knobs.attack_ms, self.sample_rate) as f32;
        self.decay_decrement = (1.0 - self.knobs.sustain_level)
            / samples(self.knobs.decay_ms, self.sample_rate) as f32;
        self.release_decrement = 1.0 / samples(self.knobs.release_ms, self.sample_rate) as f32;
    }

    fn total_for(&self, stage: EnvelopeStage) -> u32 {
        match stage {
            EnvelopeStage::Attack => samples(self.knobs.attack_ms, self.sample_rate),
            EnvelopeStage::Decay => samples(self.knobs.decay_ms, self.sample_rate),
            EnvelopeStage::Release => samples(self.knobs.release_ms, self.sample_rate),
            EnvelopeStage::Idle | EnvelopeStage::Sustain => u32::MAX,
        }
    }

    pub fn trigger(&mut self) {
        self.stage = EnvelopeStage::Attack;
        self.stage_elapsed = 0;
        self.stage_total = self.total_for(EnvelopeStage::Attack);
        // Level is kept so a retrigger continues from where it was.
    }

    pub fn release(&mut self) {
        if self.stage != EnvelopeStage::Idle && self.stage != EnvelopeStage::Release {
            self.release_start = self.level;
            self.release_decrement =
                self.release_start / samples(self.knobs.release_ms, self.sample_rate) as f32;
            self.stage = EnvelopeStage::Release;
            self.stage_elapsed = 0;
            self.stage_total = self.total_for(EnvelopeStage::Release);
        }
    }

    /// Hard reset to silence, used when a voice is recycled.
    pub fn reset(&mut self) {
        self.stage = EnvelopeStage::Idle;
        self.level = 0.0;
        self.stage_elapsed = 0;
    }

    /// Advance one sample and return the new output level.
    pub fn step(&mut self) -> f32 {
        match self.stage {
            EnvelopeStage::Idle => {
                self.level = 0.0;
            }
            EnvelopeStage::Attack => {
                self.level += self.attack_increment;
                self.stage_elapsed += 1;
                if self.level >= 1.0 || self.stage_elapsed >= self.stage_total {
                    self.level = 1.0;
                    self.enter(EnvelopeStage::Decay);
                }
            }
            EnvelopeStage::Decay => {
                self.level -= self.decay_decrement;
                self.stage_elapsed += 1;
                if self.level <= self.knobs.sustain_level
                    || self.stage_elapsed >= self.stage_total
                {
                    self.level = self.knobs.sustain_level;
                    self.enter(EnvelopeStage::Sustain);
                }
            }
            EnvelopeStage::Sustain => {
                self.level = self.knobs.sustain_level;
            }
            EnvelopeStage::Release => {
                self.level -= self.release_decrement;
                self.stage_elapsed += 1;
                if self.level <= 0.0 || self.stage_elapsed >= self.stage_total {
                    self.level = 0.0;
                    self.enter(EnvelopeStage::Idle);
                }
            }
        }
        self.level
    }

    fn enter(&mut self, stage: EnvelopeStage) {
        self.stage = stage;
        self.stage_elapsed = 0;
        self.stage_total = self.total_for(stage);
    }

    pub fn stage(&self) -> EnvelopeStage {
        self.stage
    }

    pub fn is_idle(&self) -> bool {
        self.stage == EnvelopeStage::Idle
    }

    pub fn level(&self) -> f32 {
        self.level
    }
}

fn samples(ms: f32, sample_rate: f32) -> u32 {
    ((ms.max(0.001) / 1_000.0) * sample_rate).max(1.0) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const SR: f32 = 48_000.0;

    fn knobs() -> AdsrKnobs {
        AdsrKnobs {
            attack_ms: 10.0,
            decay_ms: 50.0,
            sustain_level: 0.6,
            release_ms: 100.0,
        }
    }

    #[test]
    fn starts_idle_and_silent() {
        let mut env = Envelope::new(SR, knobs());
        assert_eq!(env.stage(), EnvelopeStage::Idle);
        assert_eq!(env.step(), 0.0);
    }

    #[test]
    fn attack_reaches_peak_within_its_sample_budget() {
        let mut env = Envelope::new(SR, knobs());
        env.trigger();
        let budget = (0.010 * SR) as usize + 2;
        let mut peaked = false;
        for _ in 0..budget {
            if env.step() >= 1.0 {
                peaked = true;
                break;
            }
        }
        assert!(peaked, "attack must peak inside its nominal duration");
        assert_eq!(env.stage(), EnvelopeStage::Decay);
    }

    #[test]
    fn decay_settles_on_the_sustain_level() {
        let mut env = Envelope::new(SR, knobs());
        env.trigger();
        for _ in 0..(0.065 * SR) as usize {
            env.step();
        }
        assert_eq!(env.stage(), EnvelopeStage::Sustain);
        assert_relative_eq!(env.level(), 0.6, epsilon = 1.0e-5);
    }

    #[test]
    fn release_fades_to_idle_from_the_release_level() {
        let mut env = Envelope::new(SR, knobs());
        env.trigger();
        for _ in 0..(0.100 * SR) as usize {
            env.step();
        }
        env.release();
        assert_eq!(env.stage(), EnvelopeStage::Release);
        for _ in 0..(0.101 * SR) as usize {
            env.step();
        }
        assert!(env.is_idle());
        assert_eq!(env.level(), 0.0);
    }

    #[test]
    fn release_during_attack_starts_from_the_current_level() {
        let mut env = Envelope::new(SR, knobs());
        env.trigger();
        for _ in 0..(0.002 * SR) as usize {
            env.step();
        }
        let before = env.level();
        assert!(before < 1.0);
        env.release();
        let after = env.step();
        assert!(after <= before, "release must not jump upward");
    }

    #[test]
    fn knob_change_preserves_the_current_level() {
        let mut env = Envelope::new(SR, knobs());
        env.trigger();
        for _ in 0..(0.020 * SR) as usize {
            env.step();
        }
        let before = env.level();
        let mut faster = knobs();
        faster.decay_ms = 5.0;
        faster.sustain_level = 0.2;
        env.set_knobs(&faster);
        let after = env.step();
        assert!(
            (after - before).abs() < 0.01,
            "knob change moved the level from {before} to {after}"
        );
    }

    #[test]
    fn zero_sustain_still_terminates_decay() {
        let mut k = knobs();
        k.sustain_level = 0.0;
        let mut env = Envelope::new(SR, k);
        env.trigger();
        for _ in 0..(0.070 * SR) as usize {
            env.step();
        }
        assert_eq!(env.stage(), EnvelopeStage::Sustain);
        assert_eq!(env.level(), 0.0);
    }
}
