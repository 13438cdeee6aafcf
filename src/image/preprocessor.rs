//! RGB line preprocessing.
//!
//! One pass over the raw channel planes produces everything downstream:
//! perceptual grayscale (optionally inverted so ink is loud), a contrast
//! scalar summarizing the line's dynamic range, a constant-power stereo pan
//! pair per note slot driven by the line's color temperature, and per-zone
//! mean RGB for the lighting stage.

use std::f32::consts::FRAC_PI_4;

use thiserror::Error;

use crate::config::RuntimeConfig;
use crate::image::PreprocessedLine;

/// Perceptual luminance weights.
const LUMA_R: f32 = 0.299;
const LUMA_G: f32 = 0.587;
const LUMA_B: f32 = 0.114;

/// Below this |temperature| the center-compensation boost fades in.
const CENTER_BAND: f32 = 0.1;
/// Peak of the perceptual center boost.
const CENTER_BOOST: f32 = 0.02;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PreprocessError {
    #[error("channel length mismatch: r={r} g={g} b={b}, expected {expected}")]
    BadLength {
        r: usize,
        g: usize,
        b: usize,
        expected: usize,
    },
}

pub struct ImagePreprocessor {
    n_pixels: usize,
    n_notes: usize,
    pixels_per_note: usize,
    zone_count: usize,
    invert: bool,
    non_linear: bool,
    contrast_power: f32,
    contrast_min: f32,
    contrast_stride: usize,
    stereo_enabled: bool,
    temp_amplification: f32,
    blue_red_weight: f32,
    cyan_yellow_weight: f32,
    temp_curve_exponent: f32,
}

impl ImagePreprocessor {
    pub fn new(cfg: &RuntimeConfig) -> Self {
        Self {
            n_pixels: cfg.n_pixels(),
            n_notes: cfg.n_notes(),
            pixels_per_note: cfg.synthesis.pixels_per_note.max(1),
            zone_count: cfg.dmx.zone_count,
            invert: cfg.synthesis.invert_intensity,
            non_linear: cfg.synthesis.non_linear_mapping,
            contrast_power: cfg.contrast.adjustment_power,
            contrast_min: cfg.contrast.min,
            contrast_stride: cfg.contrast.stride.max(1),
            stereo_enabled: cfg.stereo.stereo_mode_enabled,
            temp_amplification: cfg.stereo.temperature_amplification,
            blue_red_weight: cfg.stereo.blue_red_weight,
            cyan_yellow_weight: cfg.stereo.cyan_yellow_weight,
            temp_curve_exponent: cfg.stereo.temperature_curve_exponent,
        }
    }

    /// Check a raw frame before it is allowed anywhere near the bus.
    pub fn check_frame(&self, r: &[u8], g: &[u8], b: &[u8]) -> Result<(), PreprocessError> {
        if r.len() != self.n_pixels || g.len() != self.n_pixels || b.len() != self.n_pixels {
            return Err(PreprocessError::BadLength {
                r: r.len(),
                g: g.len(),
                b: b.len(),
                expected: self.n_pixels,
            });
        }
        Ok(())
    }

    /// Build the full preprocessed form of one validated frame into `out`.
    pub fn process_into(&self, r: &[u8], g: &[u8], b: &[u8], out: &mut PreprocessedLine) {
        debug_assert_eq!(r.len(), self.n_pixels);
        debug_assert_eq!(out.n_pixels(), self.n_pixels);

        for i in 0..self.n_pixels {
            let luma =
                (LUMA_R * r[i] as f32 + LUMA_G * g[i] as f32 + LUMA_B * b[i] as f32) / 255.0;
            out.gray[i] = if self.invert { 1.0 - luma } else { luma };
        }

        out.contrast = self.contrast_of(&out.gray);
        self.fill_pan(r, g, b, out);
        self.fill_zones(r, g, b, out);
    }

    /// Dynamic range of the grayscale line, strided for cheapness, shaped
    /// and clamped. Pinned to 1 when non-linear mapping is off.
    fn contrast_of(&self, gray: &[f32]) -> f32 {
        if !self.non_linear {
            return 1.0;
        }
        let mut min = f32::MAX;
        let mut max = f32::MIN;
        let mut i = 0;
        while i < gray.len() {
            let v = gray[i];
            min = min.min(v);
            max = max.max(v);
            i += self.contrast_stride;
        }
        let range = (max - min).max(0.0);
        range.powf(self.contrast_power).clamp(self.contrast_min, 1.0)
    }

    /// Color temperature → constant-power pan, one pair per note slot.
    fn fill_pan(&self, r: &[u8], g: &[u8], b: &[u8], out: &mut PreprocessedLine) {
        for note in 0..self.n_notes {
            let start = note * self.pixels_per_note;
            let end = start + self.pixels_per_note;
            let t = if self.stereo_enabled {
                let n = self.pixels_per_note as f32;
                let (mut rs, mut gs, mut bs) = (0.0f32, 0.0f32, 0.0f32);
                for i in start..end {
                    rs += r[i] as f32;
                    gs += g[i] as f32;
                    bs += b[i] as f32;
                }
                let (rm, gm, bm) = (rs / n, gs / n, bs / n);
                self.temperature(rm, gm, bm)
            } else {
                0.0
            };

            let angle = (t + 1.0) * FRAC_PI_4;
            let mut left = angle.cos();
            let mut right = angle.sin();
            // Perceptual compensation: sources panned dead center read a
            // touch quieter than hard-panned ones under the cos/sin law.
            if t.abs() < CENTER_BAND {
                let boost = 1.0 + CENTER_BOOST * (1.0 - t.abs() / CENTER_BAND);
                left *= boost;
                right *= boost;
            }
            out.pan_left[note] = left;
            out.pan_right[note] = right;
        }
    }

    /// Opponent-axis color temperature in [-1, 1]; negative leans left.
    fn temperature(&self, r: f32, g: f32, b: f32) -> f32 {
        let blue_red = (b - r) / 255.0;
        let cyan_yellow = ((g + b) * 0.5 - r) / 255.0;
        let raw = self.temp_amplification
            * (self.blue_red_weight * blue_red + self.cyan_yellow_weight * cyan_yellow);
        let shaped = raw.signum() * raw.abs().powf(self.temp_curve_exponent);
        shaped.clamp(-1.0, 1.0)
    }

    fn fill_zones(&self, r: &[u8], g: &[u8], b: &[u8], out: &mut PreprocessedLine) {
        let width = self.n_pixels / self.zone_count;
        out.zones.count = self.zone_count;
        for zone in 0..self.zone_count {
            let start = zone * width;
            // Last zone absorbs the remainder pixels.
            let end = if zone + 1 == self.zone_count {
                self.n_pixels
            } else {
                start + width
            };
            let n = (end - start) as f32;
            let (mut rs, mut gs, mut bs) = (0.0f32, 0.0f32, 0.0f32);
            for i in start..end {
                rs += r[i] as f32;
                gs += g[i] as f32;
                bs += b[i] as f32;
            }
            out.zones.means[zone] = [rs / n, gs / n, bs / n];
        }
    }
}
