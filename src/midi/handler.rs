//! MIDI input: byte parsing and fan-out to the engines.
//!
//! The midir callback parses raw bytes into logical [`MidiEvent`]s and
//! pushes them onto bounded channels, one per consuming engine, without
//! blocking. Engines drain their queue at the start of each audio block so
//! event order is preserved and rendering stays sample-accurate.

use crossbeam_channel::Sender;
use midir::{MidiInput, MidiInputConnection};
use thiserror::Error;

/// Logical MIDI events; everything below this level (running status, sysex,
/// cable numbers) stays in the transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiEvent {
    NoteOn { channel: u8, note: u8, velocity: u8 },
    NoteOff { channel: u8, note: u8 },
    ControlChange { channel: u8, controller: u8, value: u8 },
}

#[derive(Debug, Error)]
pub enum MidiError {
    #[error("failed to initialize MIDI input: {0}")]
    Init(String),
    #[error("failed to connect to MIDI port: {0}")]
    Connect(String),
}

pub struct MidiHandler {
    _connection: Option<MidiInputConnection<()>>,
}

impl MidiHandler {
    /// Connect to the first available input port and fan incoming events
    /// out to every sender. With no port present the handler is inert,
    /// which is fine — MIDI is optional.
    pub fn connect(senders: Vec<Sender<MidiEvent>>) -> Result<Self, MidiError> {
        let midi_in =
            MidiInput::new("sp3ctra midi input").map_err(|e| MidiError::Init(e.to_string()))?;
        let ports = midi_in.ports();

        let connection = match ports.first() {
            Some(port) => {
                let port_name = midi_in
                    .port_name(port)
                    .unwrap_or_else(|_| "<unnamed>".to_string());
                log::info!("connecting to MIDI port: {port_name}");
                let connection = midi_in
                    .connect(
                        port,
                        "sp3ctra-input",
                        move |_timestamp, message, _| {
                            if let Some(event) = parse_midi_message(message) {
                                for sender in &senders {
                                    if sender.try_send(event).is_err() {
                                        log::debug!("MIDI queue full, dropping {event:?}");
                                    }
                                }
                            }
                        },
                        (),
                    )
                    .map_err(|e| MidiError::Connect(e.to_string()))?;
                Some(connection)
            }
            None => {
                log::info!("no MIDI input ports available");
                None
            }
        };

        Ok(Self {
            _connection: connection,
        })
    }

    /// Names of the available input ports, for diagnostics.
    pub fn list_ports() -> Result<Vec<String>, MidiError> {
        let midi_in =
            MidiInput::new("sp3ctra midi input").map_err(|e| MidiError::Init(e.to_string()))?;
        let ports = midi_in.ports();
        Ok(ports
            .iter()
            .filter_map(|p| midi_in.port_name(p).ok())
            .collect())
    }
}

/// Parse one raw message. Note-on with velocity 0 is note-off, per the MIDI
/// spec and relied upon by both voice engines.
pub fn parse_midi_message(message: &[u8]) -> Option<MidiEvent> {
    if message.len() < 3 {
        return None;
    }
    let status = message[0];
    let channel = status & 0x0F;
    match status & 0xF0 {
        0x90 => {
            let (note, velocity) = (message[1], message[2]);
            if velocity == 0 {
                Some(MidiEvent::NoteOff { channel, note })
            } else {
                Some(MidiEvent::NoteOn {
                    channel,
                    note,
                    velocity,
                })
            }
        }
        0x80 => Some(MidiEvent::NoteOff {
            channel,
            note: message[1],
        }),
        0xB0 => Some(MidiEvent::ControlChange {
            channel,
            controller: message[1],
            value: message[2],
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_note_on() {
        assert_eq!(
            parse_midi_message(&[0x90, 60, 100]),
            Some(MidiEvent::NoteOn {
                channel: 0,
                note: 60,
                velocity: 100
            })
        );
    }

    #[test]
    fn note_on_with_zero_velocity_becomes_note_off() {
        assert_eq!(
            parse_midi_message(&[0x93, 60, 0]),
            Some(MidiEvent::NoteOff {
                channel: 3,
                note: 60
            })
        );
    }

    #[test]
    fn parses_note_off_and_control_change() {
        assert_eq!(
            parse_midi_message(&[0x81, 64, 0]),
            Some(MidiEvent::NoteOff {
                channel: 1,
                note: 64
            })
        );
        assert_eq!(
            parse_midi_message(&[0xB2, 74, 127]),
            Some(MidiEvent::ControlChange {
                channel: 2,
                controller: 74,
                value: 127
            })
        );
    }

    #[test]
    fn short_and_unknown_messages_are_ignored() {
        assert_eq!(parse_midi_message(&[0x90]), None);
        assert_eq!(parse_midi_message(&[0xE0, 0, 64]), None); // pitch bend
        assert_eq!(parse_midi_message(&[0xF8, 0, 0]), None); // clock
    }

    #[test]
    fn channel_is_preserved() {
        for channel in 0..16u8 {
            let event = parse_midi_message(&[0x90 | channel, 60, 10]);
            assert_eq!(
                event,
                Some(MidiEvent::NoteOn {
                    channel,
                    note: 60,
                    velocity: 10
                })
            );
        }
    }

    #[test]
    fn fan_out_reaches_every_queue() {
        let (tx_a, rx_a) = crossbeam_channel::bounded(4);
        let (tx_b, rx_b) = crossbeam_channel::bounded(4);
        let senders = vec![tx_a, tx_b];
        let event = parse_midi_message(&[0x90, 72, 90]).unwrap();
        for sender in &senders {
            sender.try_send(event).unwrap();
        }
        assert_eq!(rx_a.try_recv().unwrap(), event);
        assert_eq!(rx_b.try_recv().unwrap(), event);
    }
}
