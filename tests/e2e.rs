//! End-to-end protocol scenarios against a loopback socket standing in for
//! the execution engine, matching the teacher's `tests/sync_transaction.rs`
//! convention of one `tests/` file per behavioral surface. Each test here
//! corresponds to one of the literal end-to-end scenarios in spec §8.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use eeipc::{Coordinator, CrashReport, Driver, DriverConfig, Error, ExportActionOutcome, LaunchMode};
use pretty_assertions::assert_eq;

struct NoopCoordinator;

impl Coordinator for NoopCoordinator {
    fn next_dependency(&mut self, _dependency_id: u32) -> Option<Vec<u8>> {
        None
    }
    fn on_crash(&mut self, _report: &CrashReport) {}
}

struct RecordingCoordinator {
    served: Vec<u32>,
    crashed: Option<CrashReport>,
}

impl Coordinator for RecordingCoordinator {
    fn next_dependency(&mut self, dependency_id: u32) -> Option<Vec<u8>> {
        self.served.push(dependency_id);
        match dependency_id {
            1 => Some(vec![0xCDu8; 128]),
            _ => None,
        }
    }

    fn on_crash(&mut self, report: &CrashReport) {
        self.crashed = Some(report.clone());
    }
}

/// Binds a loopback listener and returns it plus the config a `Driver`
/// would use to connect to it (spec's "External" launch mode — the
/// supervisor does not spawn anything, it just connects to an
/// already-agreed port, spec §4.3).
fn fake_ee_listener() -> (TcpListener, DriverConfig) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback listener");
    let port = listener.local_addr().expect("local addr").port();
    let config = DriverConfig {
        launch_mode: LaunchMode::External { port },
        ..Default::default()
    };
    (listener, config)
}

fn connect(listener: &TcpListener) -> TcpStream {
    listener.accept().expect("accept fake EE connection").0
}

#[test]
fn tick_produces_the_exact_wire_bytes_from_spec_scenario_one() {
    let (listener, config) = fake_ee_listener();
    let mut driver = Driver::connect(config, NoopCoordinator).expect("connect");

    let server = thread::spawn(move || {
        let mut sock = connect(&listener);
        let mut frame = [0u8; 24];
        sock.read_exact(&mut frame).expect("read tick frame");
        sock.write_all(&[0]).expect("write success status");
        frame
    });

    driver.tick(1_700_000_000_000, 42).expect("tick succeeds");
    let frame = server.join().expect("server thread");

    assert_eq!(
        frame,
        [
            0x00, 0x00, 0x00, 0x18, // total length = 24
            0x00, 0x00, 0x00, 0x04, // command code = Tick
            0x00, 0x00, 0x00, 0x00, 0x65, 0x85, 0xDB, 0xE8, 0x00, // time
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x2A, // lastCommittedTxnId
        ]
    );
}

#[test]
fn plan_fragment_serves_two_dependency_callbacks_mid_reply() {
    let (listener, config) = fake_ee_listener();
    let coordinator = RecordingCoordinator {
        served: Vec::new(),
        crashed: None,
    };
    let mut driver = Driver::connect(config, coordinator).expect("connect");

    let server = thread::spawn(move || {
        let mut sock = connect(&listener);

        // Discard the outbound PlanFragment frame; its shape is covered by
        // the unit-level dispatcher tests, not this scenario.
        let mut header = [0u8; 4];
        sock.read_exact(&mut header).expect("read frame length");
        let total_len = u32::from_be_bytes(header) as usize;
        let mut rest = vec![0u8; total_len - 4];
        sock.read_exact(&mut rest).expect("read frame body");

        // First RETRIEVE_DEPENDENCY for id 1: expect DEPENDENCY_FOUND + 128 bytes.
        sock.write_all(&[100]).expect("write retrieve status");
        sock.write_all(&1u32.to_be_bytes()).expect("write dep id 1");
        let mut found = [0u8; 1];
        sock.read_exact(&mut found).expect("read found byte");
        assert_eq!(found[0], 101);
        let mut len = [0u8; 4];
        sock.read_exact(&mut len).expect("read len");
        assert_eq!(u32::from_be_bytes(len), 128);
        let mut body = vec![0u8; 128];
        sock.read_exact(&mut body).expect("read body");
        assert_eq!(body, vec![0xCDu8; 128]);

        // Second RETRIEVE_DEPENDENCY for id 2: expect DEPENDENCY_NOT_FOUND.
        sock.write_all(&[100]).expect("write retrieve status 2");
        sock.write_all(&2u32.to_be_bytes()).expect("write dep id 2");
        let mut not_found = [0u8; 1];
        sock.read_exact(&mut not_found).expect("read not found byte");
        assert_eq!(not_found[0], 102);

        // Final reply: SUCCESS, then a DependencySet: dirty=0, n=1, (dep=7, 3-byte table).
        sock.write_all(&[0]).expect("write success");
        sock.write_all(&[0]).expect("write dirty flag");
        sock.write_all(&1u32.to_be_bytes()).expect("write n");
        sock.write_all(&7u32.to_be_bytes()).expect("write dep id");
        sock.write_all(&3u32.to_be_bytes()).expect("write table len");
        sock.write_all(&[9, 9, 9]).expect("write table body");
    });

    let dependency_set = driver
        .plan_fragment(100, 99, 50, 7, 1, 2, &[])
        .expect("plan_fragment succeeds");

    server.join().expect("server thread");
    assert!(!dependency_set.dirty);
    assert_eq!(dependency_set.dependencies, vec![(7, vec![9, 9, 9])]);
    assert_eq!(driver.coordinator_mut().served, vec![1, 2]);
}

#[test]
fn crash_status_terminates_the_call_and_notifies_the_coordinator() {
    let (listener, config) = fake_ee_listener();
    let coordinator = RecordingCoordinator {
        served: Vec::new(),
        crashed: None,
    };
    let mut driver = Driver::connect(config, coordinator).expect("connect");

    let server = thread::spawn(move || {
        let mut sock = connect(&listener);
        let mut header = [0u8; 4];
        sock.read_exact(&mut header).expect("read frame length");
        let total_len = u32::from_be_bytes(header) as usize;
        let mut rest = vec![0u8; total_len - 4];
        sock.read_exact(&mut rest).expect("read frame body");

        let mut body = Vec::new();
        for field in [b"boom".as_slice(), b"ee.cc".as_slice()] {
            body.extend_from_slice(&(field.len() as u32).to_be_bytes());
            body.extend_from_slice(field);
        }
        body.extend_from_slice(&123i32.to_be_bytes());
        body.extend_from_slice(&2u32.to_be_bytes());
        for trace in ["frame_a", "frame_b"] {
            body.extend_from_slice(&(trace.len() as u32).to_be_bytes());
            body.extend_from_slice(trace.as_bytes());
        }

        sock.write_all(&[104]).expect("write crash status");
        sock.write_all(&(body.len() as u32).to_be_bytes()).expect("write msg len");
        sock.write_all(&body).expect("write crash body");
    });

    let err = driver.quiesce(99).expect_err("crash is a terminal error");
    server.join().expect("server thread");

    match err {
        Error::EeCrash(report) => {
            assert_eq!(report.reason, "boom");
            assert_eq!(report.file, "ee.cc");
            assert_eq!(report.line, 123);
            assert_eq!(report.traces, vec!["frame_a", "frame_b"]);
        }
        other => panic!("expected EeCrash, got {other:?}"),
    }
    assert!(driver.coordinator_mut().crashed.is_some());
}

#[test]
fn load_catalog_past_the_initial_buffer_capacity_still_frames_correctly() {
    let (listener, config) = fake_ee_listener();
    let mut driver = Driver::connect(config, NoopCoordinator).expect("connect");

    // Comfortably past the 10 MiB initial frame buffer (spec §4.1, §8
    // boundary behavior, §8 end-to-end scenario 4).
    let catalog = "x".repeat(15 * 1024 * 1024);
    let expected_len = catalog.as_bytes().len();

    let server = thread::spawn(move || {
        let mut sock = connect(&listener);
        let mut header = [0u8; 4];
        sock.read_exact(&mut header).expect("read frame length");
        let total_len = u32::from_be_bytes(header) as usize;
        let mut rest = vec![0u8; total_len - 4];
        sock.read_exact(&mut rest).expect("read frame body");
        sock.write_all(&[0]).expect("write success");
        (total_len, rest)
    });

    driver.load_catalog(&catalog).expect("load_catalog succeeds");
    let (total_len, rest) = server.join().expect("server thread");

    // total_len counts itself: 4 (self) + 4 (command code) + catalog + nul.
    assert_eq!(total_len, 4 + 4 + expected_len + 1);
    assert_eq!(&rest[4..4 + expected_len], catalog.as_bytes());
    assert_eq!(rest[4 + expected_len], 0x00);
}

#[test]
fn not_implemented_commands_never_touch_the_socket() {
    let (listener, config) = fake_ee_listener();
    let mut driver = Driver::connect(config, NoopCoordinator).expect("connect");
    let mut sock = connect(&listener);
    sock.set_read_timeout(Some(Duration::from_millis(50)))
        .expect("set read timeout");

    let err = driver
        .anti_cache_initialize()
        .expect_err("anti-caching is not implemented over IPC");
    assert!(matches!(err, Error::NotImplemented(_)));

    // A blocking read with a short timeout that returns WouldBlock/TimedOut
    // proves the driver never wrote anything for us to read instead.
    let mut probe = [0u8; 1];
    let result = sock.read(&mut probe);
    match result {
        Ok(0) => {}
        Err(err) => assert!(matches!(
            err.kind(),
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
        )),
        Ok(n) => panic!("expected no bytes from a NotImplemented command, read {n}"),
    }
}

#[test]
fn export_action_has_no_leading_status_byte() {
    let (listener, config) = fake_ee_listener();
    let mut driver = Driver::connect(config, NoopCoordinator).expect("connect");

    let server = thread::spawn(move || {
        let mut sock = connect(&listener);
        let mut header = [0u8; 4];
        sock.read_exact(&mut header).expect("read frame length");
        let total_len = u32::from_be_bytes(header) as usize;
        let mut rest = vec![0u8; total_len - 4];
        sock.read_exact(&mut rest).expect("read frame body");

        // Reply is a bare i64 offset followed directly by polled data —
        // no status byte at all (spec §9 redesign flag).
        sock.write_all(&7i64.to_be_bytes()).expect("write offset");
        sock.write_all(&3u32.to_be_bytes()).expect("write poll size");
        sock.write_all(&[1, 2, 3]).expect("write polled bytes");
    });

    let outcome = driver
        .export_action(true, true, false, false, 0, 0, 5)
        .expect("export_action succeeds");
    server.join().expect("server thread");

    match outcome {
        ExportActionOutcome::Offset { offset, polled_data } => {
            assert_eq!(offset, 7);
            assert_eq!(polled_data, Some(vec![1, 2, 3]));
        }
        ExportActionOutcome::Error => panic!("expected a non-negative offset"),
    }
}
