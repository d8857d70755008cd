//! MIDI ingest worker
//!
//! One thread waits (no timeout) on two descriptors: the control channel
//! and the MIDI source. Readable MIDI data is drained into a
//! [`MidiParser`] that hands each complete message to the sink. The
//! control channel carries shutdown requests from the owner; closing
//! every owner handle ends the loop as well.
//!
//! The loop never restarts itself. Any fatal condition ends it, drops the
//! source and clears the shared liveness flag.

use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, trace, warn};

use crate::error::{PortError, Result};
use crate::midi::{MidiEventSink, MidiParser, MidiSource};

/// Bytes read from the source per call
pub const READ_BUF_SIZE: usize = 512;

const SHUTDOWN: u8 = b'q';

/// Why the loop ended
#[derive(Debug)]
pub enum LoopExit {
    /// Owner requested shutdown
    Shutdown,
    /// Control channel reported only hang-up/error, or its writer vanished
    ControlError,
    /// poll() failed with something other than EINTR
    PollError(io::Error),
    /// MIDI read failed with something other than would-block
    ReadError(io::Error),
    /// MIDI descriptor hung up with nothing left to read
    HangUp,
}

impl LoopExit {
    pub fn is_fatal(&self) -> bool {
        !matches!(self, LoopExit::Shutdown)
    }
}

/// Writer side of the control channel. Cheap to clone.
#[derive(Clone)]
pub struct ControlHandle {
    tx: Arc<UnixStream>,
}

impl ControlHandle {
    /// Ask the loop to exit. Fails if the loop is already gone.
    pub fn shutdown(&self) -> io::Result<()> {
        (&*self.tx).write_all(&[SHUTDOWN])
    }
}

fn control_channel() -> io::Result<(ControlHandle, UnixStream)> {
    let (tx, rx) = UnixStream::pair()?;
    tx.set_nonblocking(true)?;
    rx.set_nonblocking(true)?;
    Ok((ControlHandle { tx: Arc::new(tx) }, rx))
}

/// Read every pending control byte. Returns `Some(exit)` if the loop must stop.
fn process_control(rx: &mut UnixStream) -> Option<LoopExit> {
    let mut buf = [0u8; 16];
    loop {
        match rx.read(&mut buf) {
            Ok(0) => return Some(LoopExit::ControlError),
            Ok(n) => {
                if buf[..n].contains(&SHUTDOWN) {
                    return Some(LoopExit::Shutdown);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return None,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!("Control channel read failed: {}", e);
                return Some(LoopExit::ControlError);
            }
        }
    }
}

/// Drain the source for one wake cycle.
///
/// A full buffer keeps draining. A short read, a zero read or would-block
/// ends the cycle. Interrupted reads are retried; any other error is returned.
pub fn drain<S: MidiEventSink + ?Sized>(
    source: &mut dyn MidiSource,
    parser: &mut MidiParser,
    sink: &mut S,
    buf: &mut [u8],
) -> io::Result<usize> {
    let mut total = 0;
    loop {
        match source.read(buf) {
            Ok(n) => {
                trace!("{} bytes from {}", n, source.name());
                parser.feed(&buf[..n], sink);
                total += n;
                if n < buf.len() {
                    return Ok(total);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(total),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Block until either descriptor is ready, retrying on EINTR.
fn wait(fds: &mut [libc::pollfd; 2]) -> io::Result<()> {
    loop {
        for fd in fds.iter_mut() {
            fd.revents = 0;
        }
        // SAFETY: fds points at two initialized pollfd structs owned by the caller
        let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, -1) };
        if rc >= 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

const EXCEPTIONAL: libc::c_short = libc::POLLHUP | libc::POLLERR | libc::POLLNVAL;

pub struct IngestLoop<S> {
    source: Box<dyn MidiSource>,
    source_fd: RawFd,
    control_rx: UnixStream,
    control: ControlHandle,
    parser: MidiParser,
    sink: S,
    alive: Arc<AtomicBool>,
}

impl<S: MidiEventSink + Send + 'static> IngestLoop<S> {
    /// Prepare a loop over `source`. The source must expose a pollable descriptor.
    pub fn new(source: Box<dyn MidiSource>, sink: S) -> Result<Self> {
        let source_fd = source
            .selectable()
            .ok_or_else(|| PortError::NotSelectable(source.name().to_string()))?;
        let (control, control_rx) = control_channel()?;

        Ok(Self {
            source,
            source_fd,
            control_rx,
            control,
            parser: MidiParser::new(),
            sink,
            alive: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Share an existing liveness flag instead of the loop's own.
    pub fn with_alive(mut self, alive: Arc<AtomicBool>) -> Self {
        alive.store(true, Ordering::SeqCst);
        self.alive = alive;
        self
    }

    pub fn alive(&self) -> Arc<AtomicBool> {
        self.alive.clone()
    }

    /// Writer for the control channel. Once every handle is dropped the
    /// loop exits with [`LoopExit::ControlError`].
    pub fn control(&self) -> ControlHandle {
        self.control.clone()
    }

    /// Run the loop on a dedicated thread.
    pub fn spawn(self) -> io::Result<IngestHandle> {
        let control = self.control.clone();
        let worker = thread::Builder::new()
            .name("midi-ingest".into())
            .spawn(move || self.run())?;
        Ok(IngestHandle {
            control,
            worker: Some(worker),
        })
    }

    /// Run the loop on the calling thread until it exits.
    pub fn run(self) -> LoopExit {
        let Self {
            mut source,
            source_fd,
            mut control_rx,
            control,
            mut parser,
            mut sink,
            alive,
        } = self;
        // Only owners keep the writer open, so their departure is visible
        drop(control);

        info!("MIDI ingest started on {}", source.name());
        let exit = event_loop(
            source.as_mut(),
            source_fd,
            &mut control_rx,
            &mut parser,
            &mut sink,
        );
        alive.store(false, Ordering::SeqCst);

        match &exit {
            LoopExit::Shutdown => info!("MIDI ingest on {} stopped", source.name()),
            other => error!("MIDI ingest on {} failed: {:?}", source.name(), other),
        }
        drop(source);
        exit
    }
}

fn event_loop<S: MidiEventSink + ?Sized>(
    source: &mut dyn MidiSource,
    source_fd: RawFd,
    control_rx: &mut UnixStream,
    parser: &mut MidiParser,
    sink: &mut S,
) -> LoopExit {
    let mut buf = [0u8; READ_BUF_SIZE];
    let mut fds = [
        libc::pollfd {
            fd: control_rx.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        },
        libc::pollfd {
            fd: source_fd,
            events: libc::POLLIN,
            revents: 0,
        },
    ];

    loop {
        if let Err(e) = wait(&mut fds) {
            return LoopExit::PollError(e);
        }

        let ctl = fds[0].revents;
        if ctl & libc::POLLIN != 0 {
            if let Some(exit) = process_control(control_rx) {
                return exit;
            }
        } else if ctl & EXCEPTIONAL != 0 {
            return LoopExit::ControlError;
        }

        let midi = fds[1].revents;
        if midi & libc::POLLIN != 0 {
            match drain(source, parser, sink, &mut buf) {
                Ok(0) if midi & EXCEPTIONAL != 0 => return LoopExit::HangUp,
                Ok(_) => {}
                Err(e) => return LoopExit::ReadError(e),
            }
        } else if midi & EXCEPTIONAL != 0 {
            return LoopExit::HangUp;
        }
    }
}

/// Owner's handle on a spawned loop
pub struct IngestHandle {
    control: ControlHandle,
    worker: Option<JoinHandle<LoopExit>>,
}

impl IngestHandle {
    pub fn is_finished(&self) -> bool {
        self.worker.as_ref().map_or(true, |w| w.is_finished())
    }

    /// Request shutdown and wait for the worker to exit.
    pub fn stop(mut self) -> Option<LoopExit> {
        let worker = self.worker.take()?;
        if let Err(e) = self.control.shutdown() {
            // The loop already exited on its own
            debug!("Shutdown request not delivered: {}", e);
        }
        match worker.join() {
            Ok(exit) => Some(exit),
            Err(_) => {
                error!("MIDI ingest thread panicked");
                None
            }
        }
    }
}
