//! MIDI input boundary.

pub mod handler;

pub use handler::{MidiEvent, MidiHandler};
