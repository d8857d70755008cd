//! Error types for the bridge.
//!
//! Each collaborator gets its own enum so callers can decide locally
//! whether a failure is fatal; [`Error`] wraps them for the façade.

use std::path::PathBuf;
use thiserror::Error;

/// Binding file errors. Line-level variants are produced per row and are
/// never fatal to a load pass.
#[derive(Error, Debug)]
pub enum BindingError {
    #[error("could not open binding file {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("binding file not found: {0}")]
    NotFound(String),

    #[error("read error: {0}")]
    Read(#[from] std::io::Error),

    #[error("line {line}: not valid UTF-8")]
    InvalidUtf8 { line: usize },

    #[error("line {line}: expected at least 5 fields, found {found}")]
    MissingFields { line: usize, found: usize },

    #[error("line {line}: invalid midi type str: {token}")]
    UnknownCommand { line: usize, token: String },

    #[error("line {line}: {what} {value} out of range")]
    OutOfRange {
        line: usize,
        what: &'static str,
        value: i64,
    },
}

/// Outbound OSC endpoint errors.
#[derive(Error, Debug)]
pub enum EndpointError {
    #[error("invalid OSC url: {0}")]
    InvalidUrl(String),

    #[error("unsupported OSC protocol '{0}' (only udp is supported)")]
    UnsupportedProtocol(String),

    #[error("could not resolve {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("OSC encode error: {0}")]
    Encode(String),

    #[error("OSC send to {addr} failed: {source}")]
    Send {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

impl From<rosc::OscError> for EndpointError {
    fn from(e: rosc::OscError) -> Self {
        EndpointError::Encode(e.to_string())
    }
}

/// MIDI input port errors.
#[derive(Error, Debug)]
pub enum PortError {
    #[error("MIDI input port '{0}' not found")]
    NotFound(String),

    #[error("could not open MIDI device {device}: {source}")]
    Open {
        device: String,
        #[source]
        source: std::io::Error,
    },

    #[error("MIDI port error: {0}")]
    Midir(String),

    #[error("MIDI port '{0}' has no selectable descriptor")]
    NotSelectable(String),

    #[error("virtual MIDI ports are not supported on this platform")]
    VirtualUnsupported,
}

impl From<midir::InitError> for PortError {
    fn from(e: midir::InitError) -> Self {
        PortError::Midir(e.to_string())
    }
}

impl From<midir::ConnectError<midir::MidiInput>> for PortError {
    fn from(e: midir::ConnectError<midir::MidiInput>) -> Self {
        PortError::Midir(e.to_string())
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Binding(#[from] BindingError),

    #[error(transparent)]
    Endpoint(#[from] EndpointError),

    #[error(transparent)]
    Port(#[from] PortError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
