//! MIDI sniffer for debugging binding files
//!
//! Runs the ingest loop with a printing sink instead of the dispatcher, so
//! what is shown is exactly what the bridge would dispatch.

use anyhow::{Context, Result};
use colored::*;
use std::time::Instant;
use tracing::info;

use crate::ingest::{IngestHandle, IngestLoop};
use crate::midi::{format_hex, format_sniffer, open_port, status, MidiEventSink, MidiMessage, PortRequest};

/// Prints every decoded message with a timestamp
pub struct SnifferSink {
    port: String,
    start: Instant,
    color: bool,
    show_realtime: bool,
}

impl SnifferSink {
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            start: Instant::now(),
            color: true,
            show_realtime: false,
        }
    }

    pub fn with_color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    /// Also print clock and active sensing bytes
    pub fn with_realtime(mut self, show: bool) -> Self {
        self.show_realtime = show;
        self
    }

    fn accepts(&self, msg: &[u8]) -> bool {
        self.show_realtime
            || !matches!(msg.first(), Some(&status::TIMING_CLOCK) | Some(&status::ACTIVE_SENSING))
    }

    /// One output line for `msg`, or None if it is filtered out
    pub fn format(&self, msg: &[u8]) -> Option<String> {
        if !self.accepts(msg) {
            return None;
        }
        let timestamp_ms = self.start.elapsed().as_millis() as u64;
        if !self.color {
            return Some(format_sniffer(timestamp_ms, &self.port, msg));
        }

        let port = if self.port.chars().count() > 20 {
            format!("{}...", self.port.chars().take(17).collect::<String>())
        } else {
            self.port.clone()
        };
        let message = MidiMessage::parse(msg);
        let hex = format_hex(msg);
        let hex_colored = match message {
            Some(MidiMessage::NoteOn { .. }) => hex.bright_green(),
            Some(MidiMessage::NoteOff { .. }) => hex.bright_red(),
            Some(MidiMessage::ControlChange { .. }) => hex.bright_yellow(),
            Some(MidiMessage::ProgramChange { .. }) => hex.bright_cyan(),
            Some(MidiMessage::Start | MidiMessage::Stop | MidiMessage::TimingClock) => {
                hex.bright_magenta()
            }
            Some(_) => hex.normal(),
            None => hex.bright_black(),
        };
        let parsed = message
            .map(|m| format!(" => {}", m.to_string().bright_blue()))
            .unwrap_or_default();

        Some(format!(
            "[{}ms] {} {:20} | {}{}",
            format!("{:08}", timestamp_ms).dimmed(),
            "IN ".green(),
            port.white(),
            hex_colored,
            parsed
        ))
    }
}

impl MidiEventSink for SnifferSink {
    fn on_midi(&mut self, msg: &[u8]) {
        if let Some(line) = self.format(msg) {
            println!("{}", line);
        }
    }
}

/// Open the requested input and start printing its messages.
pub fn start(req: &PortRequest, show_realtime: bool) -> Result<IngestHandle> {
    let source = open_port(req)
        .with_context(|| format!("Failed to open MIDI input ({} {})", req.kind, req.device))?;
    let name = source.name().to_string();

    println!("{}", "=== MIDI Sniffer ===".bold().cyan());
    println!("Monitoring {} (Ctrl+C to exit)", name.bright_white());
    println!("{}", "Format: [timestamp] DIR PORT | HEX => PARSED".dimmed());
    println!("{}\n", "─".repeat(80).dimmed());

    let sink = SnifferSink::new(name.clone()).with_realtime(show_realtime);
    let handle = IngestLoop::new(source, sink)?.spawn()?;
    info!("Sniffer started on {}", name);
    Ok(handle)
}

/// List midir input ports in a formatted way
pub fn list_ports_formatted() {
    println!("\n{}", "=== Available MIDI Input Ports ===".bold().cyan());

    match crate::midi::port::list_input_ports() {
        Ok(inputs) if inputs.is_empty() => {
            println!("  {}", "No input ports found".dimmed());
        }
        Ok(inputs) => {
            for (idx, name) in inputs.iter().enumerate() {
                println!("  {} {}", format!("[{}]", idx).yellow(), name);
            }
        }
        Err(e) => {
            println!("  {} {}", "Could not enumerate ports:".red(), e);
        }
    }

    println!(
        "\n{}",
        "Raw devices (alsa) and FIFOs are given by path, e.g. /dev/snd/midiC1D0".dimmed()
    );
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_format() {
        let sink = SnifferSink::new("pipe").with_color(false);
        let line = sink.format(&[0xB0, 7, 100]).unwrap();
        assert!(line.starts_with('['));
        assert!(line.ends_with("IN  pipe | B0 07 64 => CC ch:1 cc:7 v:100"));
    }

    #[test]
    fn test_clock_filtered_by_default() {
        let sink = SnifferSink::new("pipe").with_color(false);
        assert!(sink.format(&[status::TIMING_CLOCK]).is_none());
        assert!(sink.format(&[status::ACTIVE_SENSING]).is_none());
        assert!(sink.format(&[status::START]).is_some());

        let sink = sink.with_realtime(true);
        assert!(sink.format(&[status::TIMING_CLOCK]).is_some());
    }

    #[test]
    fn test_colored_format_does_not_panic() {
        let sink = SnifferSink::new("a very long port name indeed, longer than twenty");
        assert!(sink.format(&[0x90, 60, 1]).is_some());
        assert!(sink.format(&[0xF6]).is_some());
    }
}
