//! Streaming MIDI byte parser
//!
//! Reassembles complete messages from an arbitrary chunking of the raw
//! byte stream and hands each one to a [`MidiEventSink`]. Decoding is done
//! by [`midly::stream::MidiStream`]:
//!
//! - Running status: data bytes following a completed channel message
//!   reuse the last channel status byte.
//! - Real-time bytes are delivered immediately, even in the middle of
//!   another message.
//! - System common messages cancel running status.
//!
//! System exclusive data and undefined status bytes never reach the sink.

use midly::live::{LiveEvent, SystemCommon, SystemRealtime};
use midly::stream::MidiStream;

/// Consumer of decoded MIDI messages.
///
/// `msg` always starts with a status byte and carries exactly the data
/// bytes that status requires.
pub trait MidiEventSink {
    fn on_midi(&mut self, msg: &[u8]);
}

impl<F: FnMut(&[u8])> MidiEventSink for F {
    fn on_midi(&mut self, msg: &[u8]) {
        self(msg)
    }
}

pub struct MidiParser {
    stream: MidiStream,
    buf: Vec<u8>,
}

impl Default for MidiParser {
    fn default() -> Self {
        Self::new()
    }
}

impl MidiParser {
    pub fn new() -> Self {
        Self {
            stream: MidiStream::new(),
            buf: Vec::with_capacity(3),
        }
    }

    /// Drop any partial message and running status.
    pub fn reset(&mut self) {
        self.stream = MidiStream::new();
    }

    /// Feed raw bytes, invoking `sink` once per completed message.
    pub fn feed<S: MidiEventSink + ?Sized>(&mut self, bytes: &[u8], sink: &mut S) {
        let Self { stream, buf } = self;
        stream.feed(bytes, |event| {
            if !is_forwarded(&event) {
                return;
            }
            buf.clear();
            if event.write(buf).is_ok() {
                sink.on_midi(buf);
            }
        });
    }
}

fn is_forwarded(event: &LiveEvent<'_>) -> bool {
    !matches!(
        event,
        LiveEvent::Common(SystemCommon::SysEx(_))
            | LiveEvent::Common(SystemCommon::Undefined(..))
            | LiveEvent::Realtime(SystemRealtime::Undefined(_))
    )
}
