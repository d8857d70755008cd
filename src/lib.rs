//! MIDI to OSC bridge for SooperLooper
//!
//! Incoming MIDI messages are looked up in a table of user bindings and
//! translated into OSC control messages (`/sl/<loop>/set`, `/sl/<loop>/down`,
//! ...). MIDI clock, start and stop are forwarded as transport messages.
//!
//! ```no_run
//! use sooper_midi_bridge::{Bridge, PortKind, PortRequest};
//!
//! let port = PortRequest::new(PortKind::Alsa, "/dev/snd/midiC1D0", "sooperlooper");
//! let bridge = Bridge::new("sooperlooper", "osc.udp://localhost:9951/", &port)?;
//! bridge.load_bindings("default.slb")?;
//! # Ok::<(), sooper_midi_bridge::Error>(())
//! ```

#[cfg(not(unix))]
compile_error!("sooper-midi-bridge requires a Unix platform (poll, socketpair, mkfifo)");

pub mod bindings;
pub mod bridge;
pub mod cli;
pub mod config;
pub mod curve;
pub mod dispatch;
pub mod error;
pub mod ingest;
pub mod midi;
pub mod osc;
pub mod paths;
pub mod sniffer;

pub use bindings::{BindingTable, EventInfo, EventKind, ValueStyle};
pub use bridge::Bridge;
pub use curve::{gain_to_position, position_to_gain};
pub use dispatch::Dispatcher;
pub use error::{Error, Result};
pub use midi::{PortKind, PortRequest};
pub use osc::{OscEndpoint, UdpEndpoint};
