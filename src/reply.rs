//! Reply Reader: the mid-reply dependency callback loop, and the
//! per-command reply shapes (`ResultTableSet`, `DependencySet`) that sit on
//! top of it. This is the protocol's one unusual construct — modeled on the
//! teacher's `Query::step` / `Action::{NeedPacket,Finished}` state machine,
//! collapsed into a single iterative loop (SPEC_FULL §4.5): this driver owns
//! both ends of the exchange, so there is no need to suspend the state
//! machine and hand an `Action` back across an async/sync boundary the way
//! the teacher's callers do.

use crate::coordinator::Coordinator;
use crate::error::{Error, Result};
use crate::transport::Transport;
use crate::wire::{self, status};

/// A fully decoded crash report (spec §3, §4.6).
#[derive(Debug, Clone)]
pub struct CrashReport {
    pub reason: String,
    pub file: String,
    pub line: i32,
    pub traces: Vec<String>,
}

/// Returned for query fragments dispatched via `QueryPlanFragments`: a
/// dirty flag and one opaque table body per expected output (spec §3,
/// §4.4 table).
#[derive(Debug, Clone)]
pub struct ResultTableSet {
    pub dirty: bool,
    pub tables: Vec<Vec<u8>>,
}

/// Returned for a single plan fragment dispatched via `PlanFragment`: a
/// dirty flag and `n` (dependency id, table) pairs (spec §3).
#[derive(Debug, Clone)]
pub struct DependencySet {
    pub dirty: bool,
    pub dependencies: Vec<(u32, Vec<u8>)>,
}

/// Drives the mid-reply callback loop to completion. On `SUCCESS`, returns
/// with the reply's status consumed and nothing else read. On any other
/// terminal status, returns `Err` with the decoded exception or crash —
/// the driver is left unusable for further calls (spec §7 propagation
/// policy; see [`Error::is_fatal`]).
///
/// Must never recurse: the EE can request arbitrarily many dependencies
/// for one fragment, and this loop bounds stack depth regardless (spec
/// §4.5, §9).
pub fn read_reply<C: Coordinator>(transport: &mut Transport, coordinator: &mut C) -> Result<()> {
    loop {
        let s = transport.read_status()?;
        match s {
            status::SUCCESS => return Ok(()),
            status::RETRIEVE_DEPENDENCY => {
                let dependency_id = transport.read_u32_be()?;
                match coordinator.next_dependency(dependency_id) {
                    Some(bytes) => {
                        transport.write_raw_u8(status::DEPENDENCY_FOUND)?;
                        // Dependency tables stay within u32 bounds on this wire.
                        transport.write_raw_u32_be(bytes.len() as u32)?;
                        transport.write_raw(&bytes)?;
                    }
                    None => {
                        transport.write_raw_u8(status::DEPENDENCY_NOT_FOUND)?;
                    }
                }
            }
            status::CRASH => {
                let report = decode_crash(transport)?;
                coordinator.on_crash(&report);
                return Err(Error::EeCrash(report));
            }
            _ => return Err(decode_exception(transport, s)?),
        }
    }
}

/// Decodes the trailing exception blob for any non-`SUCCESS`,
/// non-`CRASH` status (spec §4.6).
fn decode_exception(transport: &mut Transport, status: u8) -> Result<Error> {
    let len = transport.read_u32_be()?;
    if len == 0 {
        return Ok(Error::GenericEeError { status });
    }
    let body = transport.read_exact(len as usize)?;
    // Re-prepend the length so the (opaque, external) exception
    // deserializer sees the same self-describing blob it would on a live
    // wire, per spec §4.6.
    let mut payload = Vec::with_capacity(4 + body.len());
    wire::write_u32_be(&mut payload, len);
    payload.extend_from_slice(&body);
    Ok(Error::EeException { status, payload })
}

/// Decodes a `CRASH` reply: total message length, then reason, file,
/// line, and `n` stack-trace strings, each individually length-prefixed
/// (spec §3, §4.6, §8 scenario 3). The message length sits outside the
/// ordinary exception-length framing.
fn decode_crash(transport: &mut Transport) -> Result<CrashReport> {
    let msg_len = transport.read_u32_be()?;
    let body = transport.read_exact(msg_len as usize)?;
    let mut cursor = body.as_slice();

    let reason = take_len_prefixed_string(&mut cursor)?;
    let file = take_len_prefixed_string(&mut cursor)?;
    let line = take_i32(&mut cursor)?;
    let n = take_u32(&mut cursor)?;

    let n = usize::try_from(n)
        .map_err(|_| Error::ProtocolViolation("crash trace count overflowed usize".to_string()))?;
    let mut traces = Vec::with_capacity(n);
    for _ in 0..n {
        traces.push(take_len_prefixed_string(&mut cursor)?);
    }

    Ok(CrashReport {
        reason,
        file,
        line,
        traces,
    })
}

fn take_bytes<'a>(cursor: &mut &'a [u8], n: usize) -> Result<&'a [u8]> {
    if cursor.len() < n {
        return Err(Error::ProtocolViolation(
            "crash payload shorter than its framed fields".to_string(),
        ));
    }
    let (head, rest) = cursor.split_at(n);
    *cursor = rest;
    Ok(head)
}

fn take_u32(cursor: &mut &[u8]) -> Result<u32> {
    let bytes: [u8; 4] = take_bytes(cursor, 4)?
        .try_into()
        .map_err(|_| Error::ProtocolViolation("malformed u32 in crash payload".to_string()))?;
    Ok(wire::be_u32(bytes))
}

fn take_i32(cursor: &mut &[u8]) -> Result<i32> {
    take_u32(cursor).map(|v| i32::from_ne_bytes(v.to_ne_bytes()))
}

fn take_len_prefixed_string(cursor: &mut &[u8]) -> Result<String> {
    let len = take_u32(cursor)?;
    let len = usize::try_from(len)
        .map_err(|_| Error::ProtocolViolation("string length overflowed usize".to_string()))?;
    let bytes = take_bytes(cursor, len)?;
    String::from_utf8(bytes.to_vec())
        .map_err(|_| Error::ProtocolViolation("crash payload string was not valid UTF-8".to_string()))
}

/// Reads one opaque, length-prefixed serialized table body off the wire —
/// the convention spec §3 states explicitly for dependency tables and
/// which this crate applies uniformly to every table-shaped reply field
/// (see DESIGN.md for the grounding of this extension).
fn read_table_body(transport: &mut Transport) -> Result<Vec<u8>> {
    let len = transport.read_u32_be()?;
    transport.read_exact(len as usize)
}

/// Reads a `ResultTableSet` for `expected_tables` outputs: a dirty flag,
/// then for each table a dependency count (must equal 1), a dependency id
/// (ignored), and the table body (spec §3, §4.4 `QueryPlanFragments`/
/// `CustomPlanFragment` rows).
pub fn read_result_table_set(transport: &mut Transport, expected_tables: u32) -> Result<ResultTableSet> {
    let dirty = wire::read_bool_flag(transport.read_u8()?);
    let mut tables = Vec::with_capacity(expected_tables as usize);
    for _ in 0..expected_tables {
        let dependency_count = transport.read_u32_be()?;
        if dependency_count != 1 {
            return Err(Error::ProtocolViolation(format!(
                "expected exactly one dependency per result table, got {dependency_count}"
            )));
        }
        let _dependency_id = transport.read_u32_be()?; // ignored per spec §3
        tables.push(read_table_body(transport)?);
    }
    Ok(ResultTableSet { dirty, tables })
}

/// Reads a `DependencySet`: a dirty flag, `n`, then `n` x (dep-id, table)
/// pairs (spec §3, §4.4 `PlanFragment` row).
pub fn read_dependency_set(transport: &mut Transport) -> Result<DependencySet> {
    let dirty = wire::read_bool_flag(transport.read_u8()?);
    let n = transport.read_u32_be()?;
    let mut dependencies = Vec::with_capacity(n as usize);
    for _ in 0..n {
        let dependency_id = transport.read_u32_be()?;
        let table = read_table_body(transport)?;
        dependencies.push((dependency_id, table));
    }
    Ok(DependencySet { dirty, dependencies })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    struct RecordingCoordinator {
        served: Vec<u32>,
        crashes: Vec<CrashReport>,
    }

    impl Coordinator for RecordingCoordinator {
        fn next_dependency(&mut self, dependency_id: u32) -> Option<Vec<u8>> {
            self.served.push(dependency_id);
            match dependency_id {
                1 => Some(vec![0xAB; 128]),
                _ => None,
            }
        }

        fn on_crash(&mut self, report: &CrashReport) {
            self.crashes.push(report.clone());
        }
    }

    fn loopback_pair() -> (TcpStream, Transport) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback listener");
        let addr = listener.local_addr().expect("local addr");
        let server = thread::spawn(move || listener.accept().expect("accept").0);
        let transport = Transport::connect(addr.port()).expect("connect");
        (server.join().expect("server thread"), transport)
    }

    #[test]
    fn dependency_callback_loop_serves_one_then_reports_not_found() {
        use std::io::Write as _;

        let (mut server, mut transport) = loopback_pair();
        let writer = thread::spawn(move || {
            server.write_all(&[status::RETRIEVE_DEPENDENCY]).expect("write status");
            server.write_all(&1u32.to_be_bytes()).expect("write dep id 1");
            // Expect driver to reply DEPENDENCY_FOUND + len + bytes; read and discard.
            let mut found = [0u8; 1];
            std::io::Read::read_exact(&mut server, &mut found).expect("read found byte");
            assert_eq!(found[0], status::DEPENDENCY_FOUND);
            let mut len_bytes = [0u8; 4];
            std::io::Read::read_exact(&mut server, &mut len_bytes).expect("read len");
            assert_eq!(u32::from_be_bytes(len_bytes), 128);
            let mut body = vec![0u8; 128];
            std::io::Read::read_exact(&mut server, &mut body).expect("read body");

            server.write_all(&[status::RETRIEVE_DEPENDENCY]).expect("write status 2");
            server.write_all(&2u32.to_be_bytes()).expect("write dep id 2");
            let mut not_found = [0u8; 1];
            std::io::Read::read_exact(&mut server, &mut not_found).expect("read not found byte");
            assert_eq!(not_found[0], status::DEPENDENCY_NOT_FOUND);

            server.write_all(&[status::SUCCESS]).expect("write success");
        });

        let mut coordinator = RecordingCoordinator {
            served: Vec::new(),
            crashes: Vec::new(),
        };
        read_reply(&mut transport, &mut coordinator).expect("read_reply success");
        writer.join().expect("writer thread");
        assert_eq!(coordinator.served, vec![1, 2]);
    }

    #[test]
    fn crash_status_decodes_report_and_notifies_coordinator() {
        use std::io::Write as _;

        let (mut server, mut transport) = loopback_pair();
        let writer = thread::spawn(move || {
            let mut body = Vec::new();
            wire::write_u32_be(&mut body, 4);
            body.extend_from_slice(b"boom");
            wire::write_u32_be(&mut body, 6);
            body.extend_from_slice(b"ee.cc");
            wire::write_u32_be(&mut body, 123);
            wire::write_u32_be(&mut body, 2);
            for trace in ["frame_a", "frame_b"] {
                wire::write_u32_be(&mut body, trace.len() as u32);
                body.extend_from_slice(trace.as_bytes());
            }

            server.write_all(&[status::CRASH]).expect("write crash status");
            server.write_all(&(body.len() as u32).to_be_bytes()).expect("write msg len");
            server.write_all(&body).expect("write body");
        });

        let mut coordinator = RecordingCoordinator {
            served: Vec::new(),
            crashes: Vec::new(),
        };
        let err = read_reply(&mut transport, &mut coordinator).expect_err("crash is an error");
        writer.join().expect("writer thread");
        assert!(matches!(err, Error::EeCrash(_)));
        assert_eq!(coordinator.crashes.len(), 1);
        assert_eq!(coordinator.crashes[0].reason, "boom");
        assert_eq!(coordinator.crashes[0].file, "ee.cc");
        assert_eq!(coordinator.crashes[0].line, 123);
        assert_eq!(coordinator.crashes[0].traces, vec!["frame_a", "frame_b"]);
    }

    #[test]
    fn zero_length_exception_is_generic_error_not_corruption() {
        use std::io::Write as _;

        let (mut server, mut transport) = loopback_pair();
        let writer = thread::spawn(move || {
            server.write_all(&[status::GENERIC_ERROR]).expect("write status");
            server.write_all(&0u32.to_be_bytes()).expect("write zero length");
        });

        let mut coordinator = RecordingCoordinator {
            served: Vec::new(),
            crashes: Vec::new(),
        };
        let err = read_reply(&mut transport, &mut coordinator).expect_err("non-success is an error");
        writer.join().expect("writer thread");
        assert!(matches!(
            err,
            Error::GenericEeError {
                status: status::GENERIC_ERROR
            }
        ));
    }
}
