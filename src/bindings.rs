//! Binding table
//!
//! Maps an encoded MIDI event key to the list of OSC events it triggers.
//! Binding files are line oriented:
//!
//! ```text
//! # ch cmd param  type  ctrl      [instance lbound ubound [style]]
//! 0    n   48     note  record
//! 1    cc  7      set   volume    2  0.0  1.0  gain
//! ```
//!
//! `cmd` is one of `cc` (control change), `n` (note) or `pc` (program
//! change). The lookup key is `((cmd + ch) << 8) | param`.

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;
use std::str::FromStr;
use tracing::{info, warn};

use crate::error::BindingError;
use crate::midi::status;

/// Lookup key: `(status_byte << 8) | data1`
pub type BindingKey = u16;

/// Build the lookup key for a status byte and first data byte.
pub fn binding_key(status_byte: u8, param: u8) -> BindingKey {
    ((status_byte as u16) << 8) | param as u16
}

/// MIDI command a binding listens to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandType {
    ControlChange,
    Note,
    ProgramChange,
}

impl CommandType {
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "cc" => Some(CommandType::ControlChange),
            "n" => Some(CommandType::Note),
            "pc" => Some(CommandType::ProgramChange),
            _ => None,
        }
    }

    pub fn from_status(status_byte: u8) -> Option<Self> {
        match status_byte & 0xF0 {
            status::CONTROL_CHANGE => Some(CommandType::ControlChange),
            status::NOTE_ON => Some(CommandType::Note),
            status::PROGRAM_CHANGE => Some(CommandType::ProgramChange),
            _ => None,
        }
    }

    pub fn token(self) -> &'static str {
        match self {
            CommandType::ControlChange => "cc",
            CommandType::Note => "n",
            CommandType::ProgramChange => "pc",
        }
    }

    /// Status nibble for channel 0
    pub fn status(self) -> u8 {
        match self {
            CommandType::ControlChange => status::CONTROL_CHANGE,
            CommandType::Note => status::NOTE_ON,
            CommandType::ProgramChange => status::PROGRAM_CHANGE,
        }
    }
}

/// Shape of the outbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// `/sl/<i>/set (command, value)`
    Set,
    /// `/sl/<i>/down` or `/sl/<i>/up` depending on the value
    Note,
    /// Any other type string, sent as `/sl/<i>/<type> (command)`
    Command(String),
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::Set => "set",
            EventKind::Note => "note",
            EventKind::Command(s) => s,
        }
    }
}

impl From<&str> for EventKind {
    fn from(s: &str) -> Self {
        match s {
            "set" => EventKind::Set,
            "note" => EventKind::Note,
            other => EventKind::Command(other.to_string()),
        }
    }
}

/// Value scaling mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValueStyle {
    #[default]
    Normal,
    /// Scaled value is passed through the fader gain curve
    Gain,
}

impl ValueStyle {
    fn from_token(token: &str) -> Self {
        if token.starts_with('g') {
            ValueStyle::Gain
        } else {
            ValueStyle::Normal
        }
    }

    fn token(self) -> &'static str {
        match self {
            ValueStyle::Normal => "norm",
            ValueStyle::Gain => "gain",
        }
    }
}

/// One bound OSC event
#[derive(Debug, Clone, PartialEq)]
pub struct EventInfo {
    pub kind: EventKind,
    pub command: String,
    /// Target loop, -1 addresses all loops
    pub instance: i32,
    pub lower_bound: f32,
    pub upper_bound: f32,
    pub style: ValueStyle,
}

impl EventInfo {
    pub fn new(kind: impl Into<EventKind>, command: impl Into<String>, instance: i32) -> Self {
        Self {
            kind: kind.into(),
            command: command.into(),
            instance,
            lower_bound: 0.0,
            upper_bound: 1.0,
            style: ValueStyle::Normal,
        }
    }

    pub fn with_bounds(mut self, lower: f32, upper: f32) -> Self {
        self.lower_bound = lower;
        self.upper_bound = upper;
        self
    }

    pub fn with_style(mut self, style: ValueStyle) -> Self {
        self.style = style;
        self
    }

    /// Linear map of a 7-bit MIDI value into `[lower_bound, upper_bound]`.
    pub fn scale(&self, value: u8) -> f64 {
        let lower = self.lower_bound as f64;
        let upper = self.upper_bound as f64;
        lower + (value as f64 / 127.0) * (upper - lower)
    }
}

impl From<String> for EventKind {
    fn from(s: String) -> Self {
        EventKind::from(s.as_str())
    }
}

/// A successfully parsed binding line
#[derive(Debug, Clone, PartialEq)]
pub struct BindingRow {
    pub channel: u8,
    pub command: CommandType,
    pub param: u8,
    pub event: EventInfo,
}

impl BindingRow {
    pub fn key(&self) -> BindingKey {
        binding_key(self.command.status() + self.channel, self.param)
    }

    /// Parse one line. Blank and `#` comment lines yield `Ok(None)`.
    ///
    /// The first five fields are mandatory. Optional trailing fields are
    /// taken in order until one fails to parse; the rest keep defaults.
    pub fn parse(line_no: usize, line: &str) -> Result<Option<Self>, BindingError> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }

        let mut fields = line.split_whitespace();
        let missing = |found| BindingError::MissingFields {
            line: line_no,
            found,
        };

        let channel: i64 = parse_next(&mut fields).ok_or_else(|| missing(0))?;
        let cmd_token = fields.next().ok_or_else(|| missing(1))?;
        let param: i64 = parse_next(&mut fields).ok_or_else(|| missing(2))?;
        let kind = fields.next().ok_or_else(|| missing(3))?;
        let ctrl = fields.next().ok_or_else(|| missing(4))?;

        let command = CommandType::from_token(cmd_token).ok_or_else(|| {
            BindingError::UnknownCommand {
                line: line_no,
                token: cmd_token.to_string(),
            }
        })?;

        if !(0..=15).contains(&channel) {
            return Err(BindingError::OutOfRange {
                line: line_no,
                what: "channel",
                value: channel,
            });
        }
        if !(0..=127).contains(&param) {
            return Err(BindingError::OutOfRange {
                line: line_no,
                what: "param",
                value: param,
            });
        }

        let mut event = EventInfo::new(kind, ctrl, -1);
        if let Some(instance) = parse_next(&mut fields) {
            event.instance = instance;
            if let Some(lower) = parse_next(&mut fields) {
                event.lower_bound = lower;
                if let Some(upper) = parse_next(&mut fields) {
                    event.upper_bound = upper;
                    if let Some(style) = fields.next() {
                        event.style = ValueStyle::from_token(style);
                    }
                }
            }
        }

        Ok(Some(Self {
            channel: channel as u8,
            command,
            param: param as u8,
            event,
        }))
    }
}

fn parse_next<'a, T: FromStr>(fields: &mut impl Iterator<Item = &'a str>) -> Option<T> {
    fields.next().and_then(|f| f.parse().ok())
}

impl fmt::Display for BindingRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ev = &self.event;
        write!(
            f,
            "{} {} {} {} {} {} {} {} {}",
            self.channel,
            self.command.token(),
            self.param,
            ev.kind.as_str(),
            ev.command,
            ev.instance,
            ev.lower_bound,
            ev.upper_bound,
            ev.style.token()
        )
    }
}

/// Result of one load pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub added: usize,
    pub rejected: usize,
}

/// Multi-valued map from [`BindingKey`] to bound events, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct BindingTable {
    bindings: HashMap<BindingKey, Vec<EventInfo>>,
}

impl BindingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.bindings.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Total number of bound events
    pub fn len(&self) -> usize {
        self.bindings.values().map(Vec::len).sum()
    }

    pub fn get(&self, key: BindingKey) -> Option<&[EventInfo]> {
        self.bindings.get(&key).map(Vec::as_slice)
    }

    /// Append an event under `key`, keeping existing entries.
    pub fn insert(&mut self, key: BindingKey, event: EventInfo) {
        self.bindings.entry(key).or_default().push(event);
    }

    pub fn insert_row(&mut self, row: BindingRow) {
        let key = row.key();
        self.insert(key, row.event);
    }

    /// Append every binding of `other`, after the existing ones per key.
    pub fn merge(&mut self, other: BindingTable) {
        for (key, events) in other.bindings {
            self.bindings.entry(key).or_default().extend(events);
        }
    }

    /// Load bindings from a line-oriented reader, appending to the table.
    ///
    /// Malformed lines, including ones that are not valid UTF-8, are
    /// reported and skipped; only a read failure aborts the pass.
    pub fn load_from<R: BufRead>(&mut self, reader: R) -> Result<LoadSummary, BindingError> {
        let mut summary = LoadSummary::default();

        for (idx, chunk) in reader.split(b'\n').enumerate() {
            let buf = chunk?;
            let line_no = idx + 1;
            let raw = buf.strip_suffix(b"\r").unwrap_or(buf.as_slice());
            let line = match std::str::from_utf8(raw) {
                Ok(line) => line,
                Err(_) => {
                    let e = BindingError::InvalidUtf8 { line: line_no };
                    let lossy = String::from_utf8_lossy(raw);
                    warn!("invalid binding: {} ({:?})", e, lossy.trim());
                    summary.rejected += 1;
                    continue;
                }
            };
            match BindingRow::parse(line_no, line) {
                Ok(Some(row)) => {
                    info!(
                        "added binding: {} {} {} {} {}",
                        row.event.kind.as_str(),
                        row.event.command,
                        row.event.instance,
                        row.event.lower_bound,
                        row.event.upper_bound
                    );
                    self.insert_row(row);
                    summary.added += 1;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("invalid binding: {} ({:?})", e, line.trim());
                    summary.rejected += 1;
                }
            }
        }

        Ok(summary)
    }

    /// Load bindings from a file, appending to the table.
    pub fn load_file(&mut self, path: &Path) -> Result<LoadSummary, BindingError> {
        let file = File::open(path).map_err(|source| BindingError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        self.load_from(BufReader::new(file))
    }

    /// Bindings as rows, ordered by key then insertion order.
    pub fn rows(&self) -> Vec<BindingRow> {
        let mut keys: Vec<_> = self.bindings.keys().copied().collect();
        keys.sort_unstable();

        let mut rows = Vec::with_capacity(self.len());
        for key in keys {
            let status_byte = (key >> 8) as u8;
            // Keys only ever come from parsed rows, so the command always resolves
            let Some(command) = CommandType::from_status(status_byte) else {
                continue;
            };
            for event in &self.bindings[&key] {
                rows.push(BindingRow {
                    channel: status_byte & 0x0F,
                    command,
                    param: (key & 0xFF) as u8,
                    event: event.clone(),
                });
            }
        }
        rows
    }

    /// Write the table in binding file format.
    pub fn write_to<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writeln!(writer, "# ch cmd param type ctrl instance lbound ubound style")?;
        for row in self.rows() {
            writeln!(writer, "{}", row)?;
        }
        writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn load(text: &str) -> (BindingTable, LoadSummary) {
        let mut table = BindingTable::new();
        let summary = table.load_from(Cursor::new(text)).unwrap();
        (table, summary)
    }

    #[test]
    fn test_key_encoding() {
        assert_eq!(binding_key(0xB1, 7), 0xB107);
        let row = BindingRow::parse(1, "1 cc 7 set volume").unwrap().unwrap();
        assert_eq!(row.key(), 0xB107);
        let row = BindingRow::parse(1, "3 pc 12 set sync").unwrap().unwrap();
        assert_eq!(row.key(), 0xC30C);
    }

    #[test]
    fn test_full_line() {
        let row = BindingRow::parse(1, "1 cc 7 set volume 2 0.0 1.0 g")
            .unwrap()
            .unwrap();
        assert_eq!(row.channel, 1);
        assert_eq!(row.command, CommandType::ControlChange);
        assert_eq!(row.param, 7);
        assert_eq!(row.event.kind, EventKind::Set);
        assert_eq!(row.event.command, "volume");
        assert_eq!(row.event.instance, 2);
        assert_eq!(row.event.style, ValueStyle::Gain);
    }

    #[test]
    fn test_defaults() {
        let row = BindingRow::parse(1, "0 n 48 note record").unwrap().unwrap();
        assert_eq!(row.event, EventInfo::new(EventKind::Note, "record", -1));
        assert_eq!(row.event.lower_bound, 0.0);
        assert_eq!(row.event.upper_bound, 1.0);
        assert_eq!(row.event.style, ValueStyle::Normal);
    }

    #[test]
    fn test_partial_optional_fields() {
        let row = BindingRow::parse(1, "0 cc 1 set feedback 3 0.25")
            .unwrap()
            .unwrap();
        assert_eq!(row.event.instance, 3);
        assert_eq!(row.event.lower_bound, 0.25);
        assert_eq!(row.event.upper_bound, 1.0);

        // parsing stops at the first bad optional field
        let row = BindingRow::parse(1, "0 cc 1 set feedback x 0.5 0.6")
            .unwrap()
            .unwrap();
        assert_eq!(row.event.instance, -1);
        assert_eq!(row.event.lower_bound, 0.0);
    }

    #[test]
    fn test_style_token() {
        let row = BindingRow::parse(1, "0 cc 1 set wet -1 0 1 gain").unwrap().unwrap();
        assert_eq!(row.event.style, ValueStyle::Gain);
        let row = BindingRow::parse(1, "0 cc 1 set wet -1 0 1 linear").unwrap().unwrap();
        assert_eq!(row.event.style, ValueStyle::Normal);
    }

    #[test]
    fn test_comments_and_blank_lines() {
        assert!(BindingRow::parse(1, "").unwrap().is_none());
        assert!(BindingRow::parse(1, "   \t").unwrap().is_none());
        assert!(BindingRow::parse(1, "# 0 n 48 note record").unwrap().is_none());
    }

    #[test]
    fn test_malformed_lines_rejected() {
        assert!(matches!(
            BindingRow::parse(4, "0 n 48 note"),
            Err(BindingError::MissingFields { line: 4, found: 4 })
        ));
        assert!(matches!(
            BindingRow::parse(1, "zero n 48 note record"),
            Err(BindingError::MissingFields { found: 0, .. })
        ));
        assert!(matches!(
            BindingRow::parse(2, "0 xx 48 note record"),
            Err(BindingError::UnknownCommand { line: 2, .. })
        ));
        assert!(matches!(
            BindingRow::parse(1, "16 cc 1 set wet"),
            Err(BindingError::OutOfRange { what: "channel", .. })
        ));
        assert!(matches!(
            BindingRow::parse(1, "0 cc 128 set wet"),
            Err(BindingError::OutOfRange { what: "param", .. })
        ));
    }

    #[test]
    fn test_bad_lines_do_not_abort_load() {
        let (table, summary) = load(
            "# test bindings\n\
             0 n 48 note record\n\
             0 n 49\n\
             0 zz 50 note overdub\n\
             \n\
             0 n 51 note redo\n",
        );
        assert_eq!(summary, LoadSummary { added: 2, rejected: 2 });
        assert_eq!(table.len(), 2);
        assert!(table.get(binding_key(0x90, 48)).is_some());
        assert!(table.get(binding_key(0x90, 50)).is_none());
        assert!(table.get(binding_key(0x90, 51)).is_some());
    }

    #[test]
    fn test_non_utf8_line_is_rejected_not_fatal() {
        let bytes = &b"0 n 48 note record\n# caf\xE9\n0 n 49 note overdub\n"[..];
        let mut table = BindingTable::new();
        let summary = table.load_from(Cursor::new(bytes)).unwrap();

        assert_eq!(summary, LoadSummary { added: 2, rejected: 1 });
        assert!(table.get(binding_key(0x90, 48)).is_some());
        assert!(table.get(binding_key(0x90, 49)).is_some());
    }

    #[test]
    fn test_crlf_line_endings() {
        let (table, summary) = load("0 cc 7 set wet\r\n0 cc 8 set dry 1\r\n");
        assert_eq!(summary, LoadSummary { added: 2, rejected: 0 });
        let events = table.get(binding_key(0xB0, 8)).unwrap();
        assert_eq!(events[0].command, "dry");
        assert_eq!(events[0].instance, 1);
    }

    #[test]
    fn test_shared_key_keeps_insertion_order() {
        let (mut table, _) = load("0 cc 1 set wet\n0 cc 1 set dry\n");
        let (other, _) = load("0 cc 1 set feedback\n");
        table.merge(other);

        let events = table.get(binding_key(0xB0, 1)).unwrap();
        let names: Vec<_> = events.iter().map(|e| e.command.as_str()).collect();
        assert_eq!(names, vec!["wet", "dry", "feedback"]);
    }

    #[test]
    fn test_clear() {
        let (mut table, _) = load("0 n 48 note record\n");
        assert!(!table.is_empty());
        table.clear();
        assert!(table.is_empty());
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_scale() {
        let ev = EventInfo::new("set", "rate", -1).with_bounds(0.5, 2.0);
        assert_eq!(ev.scale(0), 0.5);
        assert_eq!(ev.scale(127), 2.0);
    }

    #[test]
    fn test_write_then_reload() {
        let (table, _) = load(
            "2 cc 74 set dry 0 0.0 0.5\n\
             0 n 48 note record\n\
             1 cc 7 set volume 2 0.0 1.0 gain\n\
             0 pc 3 hit trigger 1\n",
        );

        let mut out = Vec::new();
        table.write_to(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("1 cc 7 set volume 2 0 1 gain"));

        let (reloaded, summary) = load(&text);
        assert_eq!(summary.rejected, 0);
        assert_eq!(reloaded.rows(), table.rows());
    }

    #[test]
    fn test_missing_file() {
        let mut table = BindingTable::new();
        let err = table.load_file(Path::new("/nonexistent/bindings.slb")).unwrap_err();
        assert!(matches!(err, BindingError::Open { .. }));
    }
}
