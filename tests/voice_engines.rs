//! MIDI-driven behavior of the polyphonic and photowave engines, events
//! delivered through their real queues.

use std::sync::Arc;

use crossbeam_channel::bounded;
use sp3ctra::config::RuntimeConfig;
use sp3ctra::midi::MidiEvent;
use sp3ctra::rt::line_bus::LineBus;
use sp3ctra::rt::scratch::AudioBlock;
use sp3ctra::rt::status::StatusCounters;
use sp3ctra::synth::photowave::{InterpMode, PhotowaveEngine, ScanMode};
use sp3ctra::synth::poly::PolyphonicEngine;

fn cfg() -> RuntimeConfig {
    let mut cfg = RuntimeConfig::default();
    cfg.synthesis.sensor_dpi = 200;
    cfg.polyphonic.num_voices = 4;
    cfg.photowave.num_voices = 4;
    cfg
}

fn note_on(note: u8, velocity: u8) -> MidiEvent {
    MidiEvent::NoteOn {
        channel: 0,
        note,
        velocity,
    }
}

fn note_off(note: u8) -> MidiEvent {
    MidiEvent::NoteOff { channel: 0, note }
}

fn rms(block: &AudioBlock) -> f32 {
    (block.left.iter().map(|s| s * s).sum::<f32>() / block.left.len() as f32).sqrt()
}

#[test]
fn queued_events_are_processed_in_fifo_order_at_block_start() {
    let cfg = cfg();
    let (tx, rx) = bounded(64);
    let mut engine = PolyphonicEngine::new(&cfg, Some(rx), Arc::new(StatusCounters::new()));

    // On and immediately off again, plus a note that stays: if order were
    // violated, note 60 would still be sounding.
    tx.send(note_on(60, 100)).unwrap();
    tx.send(note_off(60)).unwrap();
    tx.send(note_on(64, 100)).unwrap();

    let mut block = AudioBlock::new(64);
    engine.render(&mut block);
    assert_eq!(engine.voice_of(64), Some(1));
    assert_eq!(engine.voice_of(60), None, "note 60 must be released");
}

#[test]
fn fifth_note_steals_the_first_and_silences_its_pitch() {
    let cfg = cfg();
    let sr = cfg.audio.sampling_frequency as usize;
    let (tx, rx) = bounded(64);
    let mut engine = PolyphonicEngine::new(&cfg, Some(rx), Arc::new(StatusCounters::new()));

    for note in [60u8, 62, 64, 65] {
        tx.send(note_on(note, 100)).unwrap();
    }
    let mut block = AudioBlock::new(1_024);
    engine.render(&mut block);
    assert_eq!(engine.active_voices(), 4);

    tx.send(note_on(72, 100)).unwrap();
    engine.render(&mut block);
    // Voice 0 (the oldest trigger) now carries the new pitch; the first
    // pitch is gone instantly, well inside release + 10 ms.
    assert_eq!(engine.voice_of(72), Some(0));
    assert_eq!(engine.voice_of(60), None);

    // And the engine still renders the surviving chord cleanly.
    let mut tail = AudioBlock::new(sr / 10);
    engine.render(&mut tail);
    assert!(rms(&tail) > 0.0);
    assert!(tail.left.iter().all(|s| s.is_finite()));
}

#[test]
fn replaying_a_midi_sequence_gives_identical_assignments() {
    let cfg = cfg();
    let sequence: Vec<MidiEvent> = vec![
        note_on(60, 100),
        note_on(63, 90),
        note_off(60),
        note_on(67, 80),
        note_on(70, 70),
        note_on(72, 60),
        note_on(74, 50), // steal
    ];
    let run = || {
        let (tx, rx) = bounded(64);
        let mut engine =
            PolyphonicEngine::new(&cfg, Some(rx), Arc::new(StatusCounters::new()));
        let mut block = AudioBlock::new(256);
        for event in &sequence {
            tx.send(*event).unwrap();
            engine.render(&mut block);
        }
        engine.assignments()
    };
    assert_eq!(run(), run());
}

#[test]
fn photowave_ccs_change_modes_through_the_queue() {
    let cfg = cfg();
    let (tx, rx) = bounded(64);
    let mut engine = PhotowaveEngine::new(&cfg, Some(rx), Arc::new(StatusCounters::new()));

    for (controller, value) in [(1u8, 120u8), (7, 64), (74, 127)] {
        tx.send(MidiEvent::ControlChange {
            channel: 0,
            controller,
            value,
        })
        .unwrap();
    }
    let mut block = AudioBlock::new(64);
    engine.render(&mut block);

    assert_eq!(engine.scan_mode(), ScanMode::Dual);
    assert_eq!(engine.interp_mode(), InterpMode::Cubic);
    assert!((engine.amplitude() - 64.0 / 127.0).abs() < 1.0e-4);
}

#[test]
fn photowave_note_sounds_and_releases_through_the_queue() {
    let cfg = cfg();
    let sr = cfg.audio.sampling_frequency as usize;
    let (tx, rx) = bounded(64);
    let mut engine = PhotowaveEngine::new(&cfg, Some(rx), Arc::new(StatusCounters::new()));

    // Give the wavetable some content first.
    let (mut publisher, bus) = LineBus::new(cfg.n_pixels(), cfg.n_notes());
    publisher.publish_with(|line| {
        for (i, g) in line.gray.iter_mut().enumerate() {
            *g = if (i / 64) % 2 == 0 { 0.9 } else { 0.1 };
        }
    });
    engine.prepare_block(&bus);

    tx.send(note_on(69, 127)).unwrap();
    let mut block = AudioBlock::new(sr / 10);
    engine.render(&mut block);
    assert!(rms(&block) > 0.005, "note should be audible: {}", rms(&block));

    tx.send(note_off(69)).unwrap();
    engine.render(&mut block); // release (200 ms default) runs out here
    engine.render(&mut block);
    engine.render(&mut block);
    let mut quiet = AudioBlock::new(sr / 10);
    engine.render(&mut quiet);
    assert!(rms(&quiet) < 1.0e-4, "note should have faded: {}", rms(&quiet));
    assert_eq!(engine.active_voices(), 0);
}

#[test]
fn both_engines_share_one_event_stream_fanned_out() {
    let cfg = cfg();
    let (poly_tx, poly_rx) = bounded(64);
    let (photo_tx, photo_rx) = bounded(64);
    let mut poly = PolyphonicEngine::new(&cfg, Some(poly_rx), Arc::new(StatusCounters::new()));
    let mut photo =
        PhotowaveEngine::new(&cfg, Some(photo_rx), Arc::new(StatusCounters::new()));

    let event = note_on(60, 100);
    for tx in [&poly_tx, &photo_tx] {
        tx.try_send(event).unwrap();
    }
    let mut block = AudioBlock::new(64);
    poly.render(&mut block);
    photo.render(&mut block);
    assert_eq!(poly.active_voices(), 1);
    assert_eq!(photo.active_voices(), 1);
}
