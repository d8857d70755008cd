//! MIDI event -> OSC dispatch
//!
//! Resolves decoded MIDI messages against the binding table and sends the
//! resulting OSC messages. Unbound clock/start/stop bytes fall back to the
//! fixed transport addresses.

use parking_lot::RwLock;
use rosc::OscType;
use std::fmt::Write;
use std::sync::Arc;
use tracing::{trace, warn};

use crate::bindings::{binding_key, BindingTable, EventInfo, EventKind, ValueStyle};
use crate::curve::position_to_gain;
use crate::midi::{status, MidiEventSink};
use crate::osc::OscEndpoint;

/// Binding table shared between the façade (writer) and the ingest thread (reader)
pub type SharedBindings = Arc<RwLock<BindingTable>>;

pub const MIDI_START_ADDR: &str = "/sl/midi_start";
pub const MIDI_STOP_ADDR: &str = "/sl/midi_stop";
pub const MIDI_TICK_ADDR: &str = "/sl/midi_tick";

pub struct Dispatcher {
    bindings: SharedBindings,
    endpoint: Arc<dyn OscEndpoint>,
    /// Reused address buffer, owned by the dispatching thread
    addr: String,
}

impl Dispatcher {
    pub fn new(bindings: SharedBindings, endpoint: Arc<dyn OscEndpoint>) -> Self {
        Self {
            bindings,
            endpoint,
            addr: String::with_capacity(64),
        }
    }

    /// Translate one MIDI message. Returns the number of OSC messages sent.
    pub fn dispatch(&mut self, chcmd: u8, param: u8, val: u8) -> usize {
        let key = binding_key(chcmd, param);
        let Self {
            bindings,
            endpoint,
            addr,
        } = self;

        let table = bindings.read();
        if let Some(events) = table.get(key) {
            let mut sent = 0;
            for info in events {
                let mut value = info.scale(val);
                if info.style == ValueStyle::Gain {
                    value = position_to_gain(value);
                }
                trace!("binding {:04X} -> {} {}", key, info.command, value);
                if send_event(endpoint.as_ref(), addr, info, value as f32) {
                    sent += 1;
                }
            }
            return sent;
        }
        drop(table);

        let transport = match chcmd {
            status::START => MIDI_START_ADDR,
            status::STOP => MIDI_STOP_ADDR,
            status::TIMING_CLOCK => MIDI_TICK_ADDR,
            _ => return 0,
        };
        send_logged(endpoint.as_ref(), transport, Vec::new()) as usize
    }
}

impl MidiEventSink for Dispatcher {
    fn on_midi(&mut self, msg: &[u8]) {
        let chcmd = msg.first().copied().unwrap_or(0);
        let param = msg.get(1).copied().unwrap_or(0);
        let val = msg.get(2).copied().unwrap_or(0);
        self.dispatch(chcmd, param, val);
    }
}

fn send_event(endpoint: &dyn OscEndpoint, addr: &mut String, info: &EventInfo, value: f32) -> bool {
    let (suffix, args) = match &info.kind {
        EventKind::Set => (
            "set",
            vec![OscType::String(info.command.clone()), OscType::Float(value)],
        ),
        EventKind::Note => {
            let suffix = if value > 0.0 { "down" } else { "up" };
            (suffix, vec![OscType::String(info.command.clone())])
        }
        EventKind::Command(kind) => (kind.as_str(), vec![OscType::String(info.command.clone())]),
    };

    addr.clear();
    // Writing into a String cannot fail
    let _ = write!(addr, "/sl/{}/{}", info.instance, suffix);
    send_logged(endpoint, addr, args)
}

fn send_logged(endpoint: &dyn OscEndpoint, addr: &str, args: Vec<OscType>) -> bool {
    match endpoint.send(addr, args) {
        Ok(()) => true,
        Err(e) => {
            warn!("OSC error: {}", e);
            false
        }
    }
}
