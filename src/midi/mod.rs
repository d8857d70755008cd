//! MIDI utilities and message types
//!
//! Status byte constants, a decoded message view used for diagnostics,
//! the streaming byte parser and the input port layer.

pub mod parser;
pub mod port;

pub use parser::{MidiEventSink, MidiParser};
pub use port::{open_port, MidiSource, PortKind, PortRequest};

use std::fmt;

/// Channel voice status nibbles
pub mod status {
    pub const NOTE_OFF: u8 = 0x80;
    pub const NOTE_ON: u8 = 0x90;
    pub const POLY_PRESSURE: u8 = 0xA0;
    pub const CONTROL_CHANGE: u8 = 0xB0;
    pub const PROGRAM_CHANGE: u8 = 0xC0;
    pub const CHANNEL_PRESSURE: u8 = 0xD0;
    pub const PITCH_BEND: u8 = 0xE0;

    pub const SYSEX: u8 = 0xF0;
    pub const SYSEX_END: u8 = 0xF7;

    /// System real-time
    pub const TIMING_CLOCK: u8 = 0xF8;
    pub const START: u8 = 0xFA;
    pub const CONTINUE: u8 = 0xFB;
    pub const STOP: u8 = 0xFC;
    pub const ACTIVE_SENSING: u8 = 0xFE;
    pub const RESET: u8 = 0xFF;
}

/// Number of data bytes following a status byte, `None` for bytes that
/// do not start a fixed-length message (sysex, undefined, data bytes).
pub fn data_len(status: u8) -> Option<usize> {
    match status {
        0x80..=0xBF | 0xE0..=0xEF => Some(2),
        0xC0..=0xDF => Some(1),
        0xF1 | 0xF3 => Some(1),
        0xF2 => Some(2),
        0xF6 | 0xF8..=0xFF => Some(0),
        _ => None,
    }
}

/// Decoded MIDI message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MidiMessage {
    NoteOff { channel: u8, note: u8, velocity: u8 },
    NoteOn { channel: u8, note: u8, velocity: u8 },
    PolyPressure { channel: u8, note: u8, pressure: u8 },
    ControlChange { channel: u8, cc: u8, value: u8 },
    ProgramChange { channel: u8, program: u8 },
    ChannelPressure { channel: u8, pressure: u8 },
    /// Pitch Bend: 14-bit value, 8192 is center
    PitchBend { channel: u8, value: u16 },
    MidiTimeCode { data: u8 },
    SongPosition { position: u16 },
    SongSelect { song: u8 },
    TuneRequest,
    TimingClock,
    Start,
    Continue,
    Stop,
    ActiveSensing,
    SystemReset,
}

impl MidiMessage {
    /// Decode one complete message as delivered by [`MidiParser`].
    ///
    /// Running status has already been resolved by the parser, so the
    /// first byte is always a status byte here.
    pub fn parse(data: &[u8]) -> Option<Self> {
        let (&status_byte, rest) = data.split_first()?;
        if status_byte < 0x80 || rest.len() < data_len(status_byte)? {
            return None;
        }

        let channel = status_byte & 0x0F;
        let d1 = rest.first().map(|b| b & 0x7F).unwrap_or(0);
        let d2 = rest.get(1).map(|b| b & 0x7F).unwrap_or(0);

        let msg = match status_byte & 0xF0 {
            status::NOTE_OFF => MidiMessage::NoteOff { channel, note: d1, velocity: d2 },
            status::NOTE_ON => MidiMessage::NoteOn { channel, note: d1, velocity: d2 },
            status::POLY_PRESSURE => MidiMessage::PolyPressure { channel, note: d1, pressure: d2 },
            status::CONTROL_CHANGE => MidiMessage::ControlChange { channel, cc: d1, value: d2 },
            status::PROGRAM_CHANGE => MidiMessage::ProgramChange { channel, program: d1 },
            status::CHANNEL_PRESSURE => MidiMessage::ChannelPressure { channel, pressure: d1 },
            status::PITCH_BEND => MidiMessage::PitchBend {
                channel,
                value: ((d2 as u16) << 7) | d1 as u16,
            },
            _ => match status_byte {
                0xF1 => MidiMessage::MidiTimeCode { data: d1 },
                0xF2 => MidiMessage::SongPosition {
                    position: ((d2 as u16) << 7) | d1 as u16,
                },
                0xF3 => MidiMessage::SongSelect { song: d1 },
                0xF6 => MidiMessage::TuneRequest,
                status::TIMING_CLOCK => MidiMessage::TimingClock,
                status::START => MidiMessage::Start,
                status::CONTINUE => MidiMessage::Continue,
                status::STOP => MidiMessage::Stop,
                status::ACTIVE_SENSING => MidiMessage::ActiveSensing,
                status::RESET => MidiMessage::SystemReset,
                _ => return None,
            },
        };
        Some(msg)
    }
}

impl fmt::Display for MidiMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            MidiMessage::NoteOff { channel, note, velocity } => {
                write!(f, "NoteOff ch:{} n:{} v:{}", channel + 1, note, velocity)
            }
            MidiMessage::NoteOn { channel, note, velocity } => {
                write!(f, "NoteOn ch:{} n:{} v:{}", channel + 1, note, velocity)
            }
            MidiMessage::PolyPressure { channel, note, pressure } => {
                write!(f, "PolyPressure ch:{} n:{} p:{}", channel + 1, note, pressure)
            }
            MidiMessage::ControlChange { channel, cc, value } => {
                write!(f, "CC ch:{} cc:{} v:{}", channel + 1, cc, value)
            }
            MidiMessage::ProgramChange { channel, program } => {
                write!(f, "ProgramChange ch:{} p:{}", channel + 1, program)
            }
            MidiMessage::ChannelPressure { channel, pressure } => {
                write!(f, "ChannelPressure ch:{} p:{}", channel + 1, pressure)
            }
            MidiMessage::PitchBend { channel, value } => {
                write!(f, "PitchBend ch:{} v:{}", channel + 1, value)
            }
            _ => write!(f, "{:?}", self),
        }
    }
}

/// Format MIDI bytes as hex string for debugging
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Format a decoded message for sniffer output
pub fn format_sniffer(timestamp_ms: u64, port: &str, data: &[u8]) -> String {
    let hex = format_hex(data);
    let message = MidiMessage::parse(data)
        .map(|m| format!(" => {}", m))
        .unwrap_or_default();

    format!("[{:08}ms] IN  {} | {}{}", timestamp_ms, port, hex, message)
}
