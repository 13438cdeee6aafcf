//! Shared send reverb.
//!
//! Classic Schroeder topology: eight parallel lowpass-damped comb filters
//! into four series allpasses per channel, with slightly longer right-side
//! delays for stereo decorrelation. The mixer feeds it the pre-reverb send
//! sum of all engines and adds the wet return on top of the dry mix. All
//! delay lines are allocated at construction; `process` never allocates.

/// Comb delays in samples at 44.1 kHz, prime-ish to avoid modal stacking.
const COMB_TUNINGS: [usize; 8] = [1116, 1188, 1277, 1356, 1422, 1491, 1557, 1617];
const ALLPASS_TUNINGS: [usize; 4] = [556, 441, 341, 225];

/// Right channel runs this many samples longer than the left.
const STEREO_SPREAD: usize = 23;

/// Input attenuation keeping the comb bank out of self-oscillation.
const INPUT_GAIN: f32 = 0.015;

const ROOM_SCALE: f32 = 0.28;
const ROOM_OFFSET: f32 = 0.7;
const DAMP_SCALE: f32 = 0.4;

struct Comb {
    buffer: Vec<f32>,
    index: usize,
    feedback: f32,
    damping: f32,
    lowpass_state: f32,
}

impl Comb {
    fn new(size: usize) -> Self {
        Self {
            buffer: vec![0.0; size.max(1)],
            index: 0,
            feedback: 0.5,
            damping: 0.2,
            lowpass_state: 0.0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let output = self.buffer[self.index];
        self.lowpass_state = output * (1.0 - self.damping) + self.lowpass_state * self.damping;
        self.buffer[self.index] = input + self.lowpass_state * self.feedback;
        self.index += 1;
        if self.index == self.buffer.len() {
            self.index = 0;
        }
        output
    }

    fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.lowpass_state = 0.0;
        self.index = 0;
    }
}

struct Allpass {
    buffer: Vec<f32>,
    index: usize,
}

impl Allpass {
    fn new(size: usize) -> Self {
        Self {
            buffer: vec![0.0; size.max(1)],
            index: 0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let delayed = self.buffer[self.index];
        self.buffer[self.index] = input + delayed * 0.5;
        self.index += 1;
        if self.index == self.buffer.len() {
            self.index = 0;
        }
        delayed - input
    }

    fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.index = 0;
    }
}

pub struct SendReverb {
    comb_l: [Comb; 8],
    comb_r: [Comb; 8],
    allpass_l: [Allpass; 4],
    allpass_r: [Allpass; 4],
    room_size: f32,
    damping: f32,
}

impl SendReverb {
    pub fn new(sample_rate: f32) -> Self {
        let scale = sample_rate / 44_100.0;
        let sized = |base: usize| (base as f32 * scale) as usize;
        let mut reverb = Self {
            comb_l: std::array::from_fn(|i| Comb::new(sized(COMB_TUNINGS[i]))),
            comb_r: std::array::from_fn(|i| Comb::new(sized(COMB_TUNINGS[i] + STEREO_SPREAD))),
            allpass_l: std::array::from_fn(|i| Allpass::new(sized(ALLPASS_TUNINGS[i]))),
            allpass_r: std::array::from_fn(|i| {
                Allpass::new(sized(ALLPASS_TUNINGS[i] + STEREO_SPREAD))
            }),
            room_size: 0.5,
            damping: 0.5,
        };
        reverb.update();
        reverb
    }

    pub fn set_room_size(&mut self, room_size: f32) {
        let clamped = room_size.clamp(0.0, 1.0);
        if clamped != self.room_size {
            self.room_size = clamped;
            self.update();
        }
    }

    pub fn set_damping(&mut self, damping: f32) {
        let clamped = damping.clamp(0.0, 1.0);
        if clamped != self.damping {
            self.damping = clamped;
            self.update();
        }
    }

    fn update(&mut self) {
        let feedback = ROOM_OFFSET + self.room_size * ROOM_SCALE;
        let damp = self.damping * DAMP_SCALE;
        for comb in self.comb_l.iter_mut().chain(self.comb_r.iter_mut()) {
            comb.feedback = feedback;
            comb.damping = damp;
        }
    }

    /// Feed one mono send sample, get the wet stereo return.
    #[inline]
    pub fn process(&mut self, send: f32) -> (f32, f32) {
        let input = send * INPUT_GAIN;
        let mut out_l = 0.0;
        let mut out_r = 0.0;
        for comb in &mut self.comb_l {
            out_l += comb.process(input);
        }
        for comb in &mut self.comb_r {
            out_r += comb.process(input);
        }
        for allpass in &mut self.allpass_l {
            out_l = allpass.process(out_l);
        }
        for allpass in &mut self.allpass_r {
            out_r = allpass.process(out_r);
        }
        (out_l, out_r)
    }

    pub fn clear(&mut self) {
        for comb in self.comb_l.iter_mut().chain(self.comb_r.iter_mut()) {
            comb.clear();
        }
        for allpass in self.allpass_l.iter_mut().chain(self.allpass_r.iter_mut()) {
            allpass.clear();
        }
    }
}
