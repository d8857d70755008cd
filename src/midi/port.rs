//! MIDI input ports
//!
//! Every input is exposed as a [`MidiSource`]: a non-blocking byte reader
//! with a pollable descriptor. Raw devices and FIFOs are read directly;
//! midir ports forward their callback bytes into a socketpair so the
//! ingest loop can wait on them the same way.

use midir::{Ignore, MidiInput, MidiInputConnection, MidiInputPort};
use serde::{Deserialize, Serialize};
use std::ffi::CString;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, trace, warn};

use crate::error::PortError;

/// A MIDI byte source the ingest loop can wait on.
pub trait MidiSource: Send {
    /// Human readable port name
    fn name(&self) -> &str;

    /// Non-blocking read. Returns `ErrorKind::WouldBlock` when no data is pending.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Descriptor that becomes readable when data is pending.
    fn selectable(&self) -> Option<RawFd>;
}

/// Kind of MIDI input to open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PortKind {
    /// Raw MIDI character device (e.g. /dev/snd/midiC1D0)
    Alsa,
    /// Named pipe, created on demand
    Fifo,
    /// midir input matched by name substring
    #[default]
    Midir,
    /// midir virtual input other applications connect to
    Virtual,
}

impl FromStr for PortKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "alsa" | "raw" => Ok(PortKind::Alsa),
            "fifo" => Ok(PortKind::Fifo),
            "midir" | "port" => Ok(PortKind::Midir),
            "virtual" => Ok(PortKind::Virtual),
            other => Err(format!("unknown port kind '{}'", other)),
        }
    }
}

impl fmt::Display for PortKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PortKind::Alsa => "alsa",
            PortKind::Fifo => "fifo",
            PortKind::Midir => "midir",
            PortKind::Virtual => "virtual",
        };
        f.write_str(s)
    }
}

/// Description of the MIDI input to open
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct PortRequest {
    #[serde(default)]
    pub kind: PortKind,
    /// Device path, FIFO path, or port name substring depending on `kind`
    #[serde(default)]
    pub device: String,
    /// Name under which the port is registered (midir client / virtual port)
    #[serde(default = "default_tag")]
    pub tag: String,
}

fn default_tag() -> String {
    "sooperlooper".to_string()
}

impl PortRequest {
    pub fn new(kind: PortKind, device: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            kind,
            device: device.into(),
            tag: tag.into(),
        }
    }
}

/// Open the requested input.
pub fn open_port(req: &PortRequest) -> Result<Box<dyn MidiSource>, PortError> {
    match req.kind {
        PortKind::Alsa => Ok(Box::new(RawMidiPort::open(&req.device)?)),
        PortKind::Fifo => Ok(Box::new(RawMidiPort::open_fifo(&req.device)?)),
        PortKind::Midir => Ok(Box::new(ForwardedPort::connect(&req.device, &req.tag)?)),
        PortKind::Virtual => Ok(Box::new(ForwardedPort::create_virtual(&req.tag)?)),
    }
}

/// Raw MIDI device or FIFO opened non-blocking
pub struct RawMidiPort {
    name: String,
    file: File,
}

impl RawMidiPort {
    /// Open a raw MIDI character device read-only.
    pub fn open(device: &str) -> Result<Self, PortError> {
        let file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(device)
            .map_err(|source| PortError::Open {
                device: device.to_string(),
                source,
            })?;

        info!("Opened raw MIDI device: {}", device);
        Ok(Self {
            name: device.to_string(),
            file,
        })
    }

    /// Open (creating if needed) a named pipe.
    ///
    /// The FIFO is opened read-write so a writer disconnecting never leaves
    /// the descriptor in a permanent hang-up state.
    pub fn open_fifo(path: &str) -> Result<Self, PortError> {
        if !Path::new(path).exists() {
            mkfifo(path).map_err(|source| PortError::Open {
                device: path.to_string(),
                source,
            })?;
            debug!("Created MIDI FIFO: {}", path);
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
            .map_err(|source| PortError::Open {
                device: path.to_string(),
                source,
            })?;

        info!("Opened MIDI FIFO: {}", path);
        Ok(Self {
            name: path.to_string(),
            file,
        })
    }
}

fn mkfifo(path: &str) -> io::Result<()> {
    let c_path = CString::new(Path::new(path).as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    // SAFETY: c_path is a valid NUL-terminated string for the duration of the call
    let rc = unsafe { libc::mkfifo(c_path.as_ptr(), 0o666) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

impl MidiSource for RawMidiPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }

    fn selectable(&self) -> Option<RawFd> {
        Some(self.file.as_raw_fd())
    }
}

impl Drop for RawMidiPort {
    fn drop(&mut self) {
        debug!("Closing MIDI device: {}", self.name);
    }
}

/// midir input whose callback bytes are forwarded into a socketpair
pub struct ForwardedPort {
    name: String,
    reader: UnixStream,
    _connection: MidiInputConnection<()>,
}

impl ForwardedPort {
    /// Connect to the first midir input whose name contains `pattern`.
    pub fn connect(pattern: &str, client_name: &str) -> Result<Self, PortError> {
        let midi_in = new_input(client_name)?;

        let (port, port_name) = find_port_by_substring(&midi_in, pattern)
            .ok_or_else(|| PortError::NotFound(pattern.to_string()))?;

        let (reader, writer) = forwarding_pair()?;
        let connection = midi_in.connect(
            &port,
            client_name,
            forward_to(writer, port_name.clone()),
            (),
        )?;

        info!("Connected MIDI input port: {}", port_name);
        Ok(Self {
            name: port_name,
            reader,
            _connection: connection,
        })
    }

    /// Create a virtual input port other applications can connect to.
    #[cfg(not(target_os = "ios"))]
    pub fn create_virtual(port_name: &str) -> Result<Self, PortError> {
        use midir::os::unix::VirtualInput;

        let midi_in = new_input(port_name)?;
        let (reader, writer) = forwarding_pair()?;
        let connection = midi_in
            .create_virtual(port_name, forward_to(writer, port_name.to_string()), ())
            .map_err(|e| PortError::Midir(e.to_string()))?;

        info!("Created virtual MIDI input: {}", port_name);
        Ok(Self {
            name: port_name.to_string(),
            reader,
            _connection: connection,
        })
    }

    #[cfg(target_os = "ios")]
    pub fn create_virtual(_port_name: &str) -> Result<Self, PortError> {
        Err(PortError::VirtualUnsupported)
    }
}

impl MidiSource for ForwardedPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }

    fn selectable(&self) -> Option<RawFd> {
        Some(self.reader.as_raw_fd())
    }
}

fn new_input(client_name: &str) -> Result<MidiInput, PortError> {
    let mut midi_in = MidiInput::new(client_name)?;
    // Keep clock/start/stop, the bridge maps them to transport messages
    midi_in.ignore(Ignore::Sysex);
    Ok(midi_in)
}

fn forwarding_pair() -> Result<(UnixStream, UnixStream), PortError> {
    let open_err = |source| PortError::Open {
        device: "socketpair".to_string(),
        source,
    };
    let (reader, writer) = UnixStream::pair().map_err(open_err)?;
    reader.set_nonblocking(true).map_err(open_err)?;
    Ok((reader, writer))
}

fn forward_to(
    mut writer: UnixStream,
    port_name: String,
) -> impl FnMut(u64, &[u8], &mut ()) + Send + 'static {
    move |_timestamp, data, _| {
        trace!("{} <- {} bytes", port_name, data.len());
        if let Err(e) = writer.write_all(data) {
            warn!("Dropping MIDI from {}: {}", port_name, e);
        }
    }
}

/// Find an input port by case-insensitive substring match
pub fn find_port_by_substring(
    midi_in: &MidiInput,
    pattern: &str,
) -> Option<(MidiInputPort, String)> {
    let pattern = pattern.to_lowercase();
    for port in midi_in.ports() {
        if let Ok(name) = midi_in.port_name(&port) {
            if name.to_lowercase().contains(&pattern) {
                debug!("Found port '{}' matching pattern '{}'", name, pattern);
                return Some((port, name));
            }
        }
    }
    None
}

/// List available midir input port names
pub fn list_input_ports() -> Result<Vec<String>, PortError> {
    let midi_in = MidiInput::new("sooperlooper-scanner")?;
    Ok(midi_in
        .ports()
        .iter()
        .filter_map(|port| midi_in.port_name(port).ok())
        .collect())
}
