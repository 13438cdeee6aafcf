//! Line payloads: the raw RGB scan and its preprocessed form.

use crate::config::MAX_DMX_ZONES;

/// One raw sensor line as reassembled by the network layer: three parallel
/// channel planes of equal length. Replaced wholesale on each new frame,
/// never mutated after hand-off.
#[derive(Debug, Clone)]
pub struct ImageLine {
    pub r: Vec<u8>,
    pub g: Vec<u8>,
    pub b: Vec<u8>,
}

impl ImageLine {
    pub fn new(n_pixels: usize) -> Self {
        Self {
            r: vec![0; n_pixels],
            g: vec![0; n_pixels],
            b: vec![0; n_pixels],
        }
    }

    pub fn len(&self) -> usize {
        self.r.len()
    }

    pub fn is_empty(&self) -> bool {
        self.r.is_empty()
    }
}

/// Per-DMX-zone mean RGB, fixed capacity so the type stays `Copy` for the
/// lock-free handoff to the lighting stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DmxZoneMeans {
    pub means: [[f32; 3]; MAX_DMX_ZONES],
    pub count: usize,
}

impl Default for DmxZoneMeans {
    fn default() -> Self {
        Self {
            means: [[0.0; 3]; MAX_DMX_ZONES],
            count: 0,
        }
    }
}

impl DmxZoneMeans {
    pub fn zones(&self) -> &[[f32; 3]] {
        &self.means[..self.count]
    }
}

/// Everything the engines need from one sensor line, derived in a single
/// preprocessing pass. Immutable once published on the line bus.
#[derive(Debug, Clone)]
pub struct PreprocessedLine {
    /// Normalized grayscale, one value in [0, 1] per pixel.
    pub gray: Vec<f32>,
    /// Constant-power pan gains, one pair per note slot.
    pub pan_left: Vec<f32>,
    pub pan_right: Vec<f32>,
    /// Dynamic-range summary of the line, (0, 1].
    pub contrast: f32,
    /// Mean RGB per lighting zone.
    pub zones: DmxZoneMeans,
}

impl PreprocessedLine {
    /// Allocate a line with all storage in place; pan gains start centered.
    pub fn new(n_pixels: usize, n_notes: usize) -> Self {
        let center = std::f32::consts::FRAC_PI_4.cos();
        Self {
            gray: vec![0.0; n_pixels],
            pan_left: vec![center; n_notes],
            pan_right: vec![center; n_notes],
            contrast: 1.0,
            zones: DmxZoneMeans::default(),
        }
    }

    pub fn n_pixels(&self) -> usize {
        self.gray.len()
    }

    pub fn n_notes(&self) -> usize {
        self.pan_left.len()
    }

    /// Overwrite `self` with `other`; both sides must come from the same
    /// configuration so the storage sizes match.
    pub fn copy_from(&mut self, other: &Self) {
        self.gray.copy_from_slice(&other.gray);
        self.pan_left.copy_from_slice(&other.pan_left);
        self.pan_right.copy_from_slice(&other.pan_right);
        self.contrast = other.contrast;
        self.zones = other.zones;
    }
}
