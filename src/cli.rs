//! Interactive console
//!
//! Lets the user load, clear and save bindings on a running bridge.

use anyhow::Result;
use colored::*;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::fmt::Write;
use std::sync::Arc;

use crate::bridge::Bridge;

const HELP: &str = "\
Commands:
  load <file>   append bindings from a file
  clear         remove all bindings
  save <file>   write current bindings to a file
  list          show current bindings
  status        show bridge status
  help          show this help
  quit          exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Load(String),
    Clear,
    Save(String),
    List,
    Status,
    Help,
    Quit,
}

impl Command {
    /// Parse one console line. Empty lines yield `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let mut parts = line.split_whitespace();
        let Some(name) = parts.next() else {
            return Ok(None);
        };
        let arg = parts.collect::<Vec<_>>().join(" ");

        let needs_arg = |cmd: fn(String) -> Command| {
            if arg.is_empty() {
                Err(format!("usage: {} <file>", name))
            } else {
                Ok(Some(cmd(arg.clone())))
            }
        };

        match name {
            "load" | "l" => needs_arg(Command::Load),
            "save" | "s" => needs_arg(Command::Save),
            "clear" => Ok(Some(Command::Clear)),
            "list" | "ls" => Ok(Some(Command::List)),
            "status" => Ok(Some(Command::Status)),
            "help" | "?" => Ok(Some(Command::Help)),
            "quit" | "exit" | "q" => Ok(Some(Command::Quit)),
            other => Err(format!("unknown command '{}' (try 'help')", other)),
        }
    }
}

/// Run a command against the bridge, returning the text to print.
pub fn execute(bridge: &Bridge, command: &Command) -> String {
    match command {
        Command::Load(file) => match bridge.load_bindings(file) {
            Ok(summary) => format!(
                "loaded {} binding(s), {} rejected",
                summary.added, summary.rejected
            ),
            Err(e) => format!("{} {}", "error:".red(), e),
        },
        Command::Clear => {
            bridge.clear_bindings();
            "bindings cleared".to_string()
        }
        Command::Save(file) => match bridge.save_bindings(file) {
            Ok(()) => format!("saved to {}", file),
            Err(e) => format!("{} {}", "error:".red(), e),
        },
        Command::List => {
            let rows = bridge.bindings().rows();
            if rows.is_empty() {
                return "no bindings".dimmed().to_string();
            }
            let mut out = String::new();
            for row in rows {
                let _ = writeln!(out, "  {:04X}  {}", row.key(), row);
            }
            out.trim_end().to_string()
        }
        Command::Status => {
            let state = if bridge.is_alive() {
                "running".green()
            } else {
                "stopped".red()
            };
            format!(
                "{}: {} | input: {} | osc: {} | bindings: {}",
                bridge.name(),
                state,
                bridge.input_name().unwrap_or("<none>"),
                bridge.osc_url(),
                bridge.bindings().len()
            )
        }
        Command::Help => HELP.to_string(),
        Command::Quit => String::new(),
    }
}

/// Blocking read-eval loop. Returns when the user quits or closes stdin.
pub fn run_repl(bridge: Arc<Bridge>) -> Result<()> {
    let mut rl = DefaultEditor::new()?;
    let prompt = format!("{}> ", bridge.name());

    loop {
        let line = match rl.readline(&prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };

        match Command::parse(&line) {
            Ok(Some(Command::Quit)) => break,
            Ok(Some(command)) => {
                let _ = rl.add_history_entry(line.as_str());
                println!("{}", execute(&bridge, &command));
            }
            Ok(None) => {}
            Err(msg) => println!("{}", msg.yellow()),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::osc::testing::RecordingEndpoint;
    use tempfile::TempDir;

    fn idle_bridge() -> Bridge {
        Bridge::with_endpoint("test", Arc::new(RecordingEndpoint::new()), None).unwrap()
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("  "), Ok(None));
        assert_eq!(
            Command::parse("load my bindings.slb"),
            Ok(Some(Command::Load("my bindings.slb".into())))
        );
        assert_eq!(Command::parse("ls"), Ok(Some(Command::List)));
        assert_eq!(Command::parse("exit"), Ok(Some(Command::Quit)));
        assert!(Command::parse("save").is_err());
        assert!(Command::parse("frobnicate").is_err());
    }

    #[test]
    fn test_load_list_clear() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.slb");
        std::fs::write(&path, "0 cc 7 set volume\n").unwrap();
        let bridge = idle_bridge();

        let out = execute(&bridge, &Command::Load(path.display().to_string()));
        assert!(out.contains("loaded 1 binding(s)"));

        let out = execute(&bridge, &Command::List);
        assert!(out.contains("B007"));
        assert!(out.contains("0 cc 7 set volume -1 0 1 norm"));

        execute(&bridge, &Command::Clear);
        assert!(bridge.bindings().is_empty());
    }

    #[test]
    fn test_errors_are_reported() {
        let bridge = idle_bridge();
        let out = execute(&bridge, &Command::Load("/nonexistent/file.slb".into()));
        assert!(out.contains("not found"));
    }

    #[test]
    fn test_status() {
        let bridge = idle_bridge();
        let out = execute(&bridge, &Command::Status);
        assert!(out.contains("input: <none>"));
        assert!(out.contains("bindings: 0"));
    }
}
