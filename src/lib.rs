//! Sp3ctra — real-time synthesis core.
//!
//! Turns a streaming RGB line-scan feed into sound through three concurrent
//! engines (additive oscillator bank, polyphonic voice synth, photowave
//! wavetable synth) mixed down on a hard real-time audio callback. The
//! network, MIDI transport and audio device live at the edges; everything in
//! between communicates through lock-free single-writer structures so the
//! audio callback never blocks.

pub mod audio;
pub mod config;
pub mod dsp;
pub mod image;
pub mod midi;
pub mod params;
pub mod rt;
pub mod runtime;
pub mod synth;
