use super::*;
use crate::curve::position_to_gain;
use crate::error::{EndpointError, Error, PortError};
use crate::ingest::testing::{PipeSource, ScriptedSource};
use crate::osc::testing::RecordingEndpoint;
use rosc::{OscMessage, OscType};
use std::io::Write;
use std::os::unix::net::UnixStream;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

struct Fixture {
    bridge: Bridge,
    endpoint: Arc<RecordingEndpoint>,
    feeder: UnixStream,
    dir: TempDir,
}

fn fixture() -> Fixture {
    let (source, feeder) = PipeSource::new();
    let endpoint = Arc::new(RecordingEndpoint::new());
    let dir = TempDir::new().unwrap();
    let bridge = Bridge::with_endpoint("test", endpoint.clone(), Some(Box::new(source)))
        .unwrap()
        .with_search_dirs(vec![dir.path().to_path_buf()]);
    Fixture {
        bridge,
        endpoint,
        feeder,
        dir,
    }
}

fn write_file(dir: &TempDir, name: &str, text: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, text).unwrap();
    path
}

fn wait_for(endpoint: &RecordingEndpoint, count: usize) -> Vec<OscMessage> {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let sent = endpoint.sent();
        if sent.len() >= count {
            return sent;
        }
        assert!(Instant::now() < deadline, "timed out waiting for OSC messages");
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn test_midi_in_osc_out() {
    let mut f = fixture();
    let path = write_file(
        &f.dir,
        "test.slb",
        "# volume on channel 1\n1 cc 7 set volume 2 0.0 1.0 g\n0 n 48 note record\n",
    );
    let summary = f.bridge.load_bindings(&path).unwrap();
    assert_eq!(summary.added, 2);

    f.feeder.write_all(&[0xB1, 7, 127, 0x90, 48, 100]).unwrap();
    // Running status note-on with velocity 0
    f.feeder.write_all(&[48, 0]).unwrap();

    let sent = wait_for(&f.endpoint, 3);
    assert_eq!(
        sent,
        vec![
            OscMessage {
                addr: "/sl/2/set".into(),
                args: vec![
                    OscType::String("volume".into()),
                    OscType::Float(position_to_gain(1.0) as f32)
                ],
            },
            OscMessage {
                addr: "/sl/-1/down".into(),
                args: vec![OscType::String("record".into())],
            },
            OscMessage {
                addr: "/sl/-1/up".into(),
                args: vec![OscType::String("record".into())],
            },
        ]
    );
}

#[test]
fn test_transport_without_bindings() {
    let mut f = fixture();
    f.feeder.write_all(&[0xFA, 0xF8, 0xFC]).unwrap();

    let addrs: Vec<_> = wait_for(&f.endpoint, 3)
        .into_iter()
        .map(|m| m.addr)
        .collect();
    assert_eq!(addrs, vec!["/sl/midi_start", "/sl/midi_tick", "/sl/midi_stop"]);
}

#[test]
fn test_relative_path_uses_search_dirs() {
    let f = fixture();
    write_file(&f.dir, "default.slb", "0 cc 1 set wet\n");

    f.bridge.load_bindings("default.slb").unwrap();
    assert_eq!(f.bridge.bindings().len(), 1);
}

#[test]
fn test_loads_are_additive() {
    let f = fixture();
    let a = write_file(&f.dir, "a.slb", "0 cc 74 set wet\n");
    let b = write_file(&f.dir, "b.slb", "0 cc 74 set dry\n0 n 60 note trigger\n");

    f.bridge.load_bindings(&a).unwrap();
    f.bridge.load_bindings(&b).unwrap();

    let table = f.bridge.bindings();
    assert_eq!(table.len(), 3);
    let commands: Vec<_> = table
        .get(0xB04A)
        .unwrap()
        .iter()
        .map(|e| e.command.as_str())
        .collect();
    assert_eq!(commands, vec!["wet", "dry"]);
}

#[test]
fn test_missing_file_keeps_bindings() {
    let f = fixture();
    let a = write_file(&f.dir, "a.slb", "0 cc 74 set wet\n");
    f.bridge.load_bindings(&a).unwrap();

    let err = f.bridge.load_bindings("missing.slb").unwrap_err();
    assert!(matches!(err, Error::Binding(BindingError::NotFound(_))));
    assert_eq!(f.bridge.bindings().len(), 1);
    assert!(f.bridge.is_alive());
}

#[test]
fn test_malformed_lines_skipped() {
    let f = fixture();
    let path = write_file(
        &f.dir,
        "bad.slb",
        "0 cc 7\n0 xx 7 set volume\n0 cc 8 set feedback\n",
    );

    let summary = f.bridge.load_bindings(&path).unwrap();
    assert_eq!(summary.added, 1);
    assert_eq!(summary.rejected, 2);
}

#[test]
fn test_non_utf8_comment_does_not_block_load() {
    let f = fixture();
    let path = f.dir.path().join("latin1.slb");
    std::fs::write(&path, b"0 n 48 note record\n# caf\xE9\n0 n 49 note overdub\n").unwrap();

    let summary = f.bridge.load_bindings(&path).unwrap();
    assert_eq!(summary, LoadSummary { added: 2, rejected: 1 });
    assert_eq!(f.bridge.bindings().len(), 2);
}

#[test]
fn test_replace_bindings_swaps_table() {
    let mut f = fixture();
    let a = write_file(&f.dir, "a.slb", "0 cc 1 set wet\n0 n 48 note record\n");
    let b = write_file(&f.dir, "b.slb", "0 cc 2 set dry\n");
    f.bridge.load_bindings(&a).unwrap();

    let summary = f
        .bridge
        .replace_bindings(&[b, f.dir.path().join("missing.slb")]);
    assert_eq!(summary, LoadSummary { added: 1, rejected: 0 });

    {
        let table = f.bridge.bindings();
        assert_eq!(table.len(), 1);
        assert!(table.get(0xB001).is_none());
        assert!(table.get(0xB002).is_some());
    }

    f.feeder.write_all(&[0xB0, 1, 64, 0xB0, 2, 127]).unwrap();
    let sent = wait_for(&f.endpoint, 1);
    thread::sleep(Duration::from_millis(20));
    assert_eq!(f.endpoint.sent().len(), 1);
    assert_eq!(sent[0].addr, "/sl/-1/set");
    assert_eq!(sent[0].args[0], OscType::String("dry".into()));
}

#[test]
fn test_replace_with_nothing_loadable_clears() {
    let f = fixture();
    let a = write_file(&f.dir, "a.slb", "0 cc 1 set wet\n");
    f.bridge.load_bindings(&a).unwrap();

    let summary = f.bridge.replace_bindings(&["missing.slb"]);
    assert_eq!(summary, LoadSummary::default());
    assert!(f.bridge.bindings().is_empty());
}

#[test]
fn test_clear_stops_bound_dispatch() {
    let mut f = fixture();
    let path = write_file(&f.dir, "a.slb", "0 cc 1 set wet\n");
    f.bridge.load_bindings(&path).unwrap();
    f.bridge.clear_bindings();
    assert!(f.bridge.bindings().is_empty());

    // The bound CC is now ignored; start still goes through
    f.feeder.write_all(&[0xB0, 1, 64, 0xFA]).unwrap();
    let sent = wait_for(&f.endpoint, 1);
    thread::sleep(Duration::from_millis(20));
    assert_eq!(f.endpoint.sent().len(), 1);
    assert_eq!(sent[0].addr, "/sl/midi_start");
}

#[test]
fn test_save_and_reload() {
    let f = fixture();
    let src = write_file(
        &f.dir,
        "src.slb",
        "1 cc 7 set volume 2 0.0 1.0 g\n0 n 48 note record\n0 cc 7 set wet 1 0.25 0.75\n",
    );
    f.bridge.load_bindings(&src).unwrap();

    let saved = f.dir.path().join("saved.slb");
    f.bridge.save_bindings(&saved).unwrap();

    let mut reloaded = BindingTable::new();
    reloaded.load_file(&saved).unwrap();
    assert_eq!(reloaded.rows(), f.bridge.bindings().rows());
}

#[test]
fn test_stop_is_idempotent() {
    let f = fixture();
    assert!(f.bridge.is_alive());

    assert!(matches!(f.bridge.stop(), Some(LoopExit::Shutdown)));
    assert!(!f.bridge.is_alive());
    assert!(f.bridge.stop().is_none());
}

#[test]
fn test_drop_releases_input() {
    let Fixture {
        bridge, mut feeder, ..
    } = fixture();
    drop(bridge);

    // Worker has exited and dropped its end of the pair
    assert!(feeder.write_all(&[0xFA]).is_err());
}

#[test]
fn test_input_hangup_marks_not_alive() {
    let Fixture {
        bridge, feeder, ..
    } = fixture();
    drop(feeder);

    let deadline = Instant::now() + Duration::from_secs(5);
    while bridge.is_alive() {
        assert!(Instant::now() < deadline, "bridge still alive after hang-up");
        thread::sleep(Duration::from_millis(5));
    }
    assert!(matches!(bridge.stop(), Some(LoopExit::HangUp)));
}

#[test]
fn test_without_input() {
    let endpoint = Arc::new(RecordingEndpoint::new());
    let dir = TempDir::new().unwrap();
    let bridge = Bridge::with_endpoint("idle", endpoint, None).unwrap();

    assert!(!bridge.has_input());
    assert!(!bridge.is_alive());
    assert_eq!(bridge.osc_url(), "osc.udp://test:0/");

    let path = write_file(&dir, "a.slb", "0 cc 1 set wet\n");
    bridge.load_bindings(&path).unwrap();
    assert_eq!(bridge.bindings().len(), 1);
    assert!(bridge.stop().is_none());
}

#[test]
fn test_unselectable_input_rejected() {
    let endpoint = Arc::new(RecordingEndpoint::new());
    let result = Bridge::with_endpoint(
        "test",
        endpoint,
        Some(Box::new(ScriptedSource::unselectable())),
    );
    assert!(matches!(
        result,
        Err(Error::Port(PortError::NotSelectable(_)))
    ));
}

#[test]
fn test_unresolvable_destination_keeps_running() {
    let port = PortRequest::new(
        crate::midi::PortKind::Alsa,
        "/nonexistent/midi",
        "test",
    );
    let bridge = Bridge::new("test", "osc.udp://no-such-host.invalid:9951/", &port).unwrap();
    assert_eq!(bridge.osc_url(), "osc.udp://no-such-host.invalid:9951/");

    let (source, mut feeder) = PipeSource::new();
    let endpoint = Arc::new(UdpEndpoint::resolve("osc.udp://no-such-host.invalid:9951/").unwrap());
    let dir = TempDir::new().unwrap();
    let bridge = Bridge::with_endpoint("test", endpoint, Some(Box::new(source))).unwrap();
    let path = write_file(&dir, "a.slb", "0 cc 1 set wet\n");
    bridge.load_bindings(&path).unwrap();

    // Every send fails to resolve; the worker logs and keeps going
    feeder.write_all(&[0xB0, 1, 64, 0xFA, 0xB0, 1, 32]).unwrap();
    thread::sleep(Duration::from_millis(50));
    assert!(bridge.is_alive());
    assert!(matches!(bridge.stop(), Some(LoopExit::Shutdown)));
}

#[test]
fn test_malformed_destination_rejected() {
    let port = PortRequest::new(
        crate::midi::PortKind::Alsa,
        "/nonexistent/midi",
        "test",
    );
    assert!(matches!(
        Bridge::new("test", "not a url", &port),
        Err(Error::Endpoint(EndpointError::InvalidUrl(_)))
    ));
    assert!(matches!(
        Bridge::new("test", "osc.tcp://localhost:9951/", &port),
        Err(Error::Endpoint(EndpointError::UnsupportedProtocol(_)))
    ));
}

#[test]
fn test_unopenable_input_is_not_fatal() {
    let port = PortRequest::new(
        crate::midi::PortKind::Alsa,
        "/nonexistent/midi",
        "test",
    );
    let bridge = Bridge::new("test", "osc.udp://127.0.0.1:9951/", &port).unwrap();
    assert!(!bridge.has_input());
    assert!(!bridge.is_alive());
}
