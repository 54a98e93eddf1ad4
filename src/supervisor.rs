//! EE Process Supervisor: optionally spawns the EE (directly, or wrapped by
//! a memory checker), reads its combined output on a dedicated reader
//! thread, recognizes the PID line and the "listening" handshake, parses
//! memory-checker diagnostics into the process-wide instrumentation error
//! list, and joins/awaits on shutdown (spec §4.3).
//!
//! The teacher's `Stream` module owns one socket per connection and no
//! child process; this component has no direct teacher analogue, so its
//! shared-state pattern (a `LazyLock<Mutex<..>>` for process-wide state) is
//! grounded instead on the teacher's `buffer_pool::GLOBAL_BUFFER_POOL`.

use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{mpsc, LazyLock, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use crate::config::{DriverConfig, LaunchMode};
use crate::error::{Error, Result};

const STARTING_PORT: u32 = 21214;

static NEXT_PORT: AtomicU32 = AtomicU32::new(STARTING_PORT);

static GLOBAL_INSTRUMENTATION_ERRORS: LazyLock<Mutex<Vec<String>>> =
    LazyLock::new(|| Mutex::new(Vec::new()));

fn lock_global_errors() -> MutexGuard<'static, Vec<String>> {
    match GLOBAL_INSTRUMENTATION_ERRORS.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// A snapshot of every diagnostic any instrumented child has reported in
/// this process so far (spec §4.3, §5: "process-wide ... instrumentation
/// error list").
pub fn instrumentation_errors() -> Vec<String> {
    lock_global_errors().clone()
}

fn push_instrumentation_error(message: String) {
    lock_global_errors().push(message);
}

fn allocate_port() -> u16 {
    let port = NEXT_PORT.fetch_add(1, Ordering::SeqCst);
    // 21214 + any realistic number of instrumented instances in one
    // process run never overflows a u16.
    port as u16
}

/// Owns the (optional) child EE process and its dedicated reader thread.
pub struct EeSupervisor {
    port: u16,
    child: Option<Child>,
    reader_handle: Option<JoinHandle<()>>,
    instrumented: bool,
}

impl EeSupervisor {
    /// Brings up the EE per `config.launch_mode` and blocks until either
    /// the "listening" handshake line is seen or the child's output closes
    /// first (spec §4.3: "only after the handshake does the supervisor
    /// permit the transport to connect").
    pub fn launch(config: &DriverConfig) -> Result<Self> {
        match &config.launch_mode {
            LaunchMode::External { port } => Ok(Self {
                port: *port,
                child: None,
                reader_handle: None,
                instrumented: false,
            }),
            LaunchMode::DirectChild { binary_path } => {
                let port = allocate_port();
                let mut command = Command::new(binary_path);
                command.arg(port.to_string());
                Self::spawn_and_wait_for_handshake(command, port, false, config.site_id)
            }
            LaunchMode::Instrumented { binary_path } => {
                let port = allocate_port();
                let mut command = Command::new("valgrind");
                command
                    .arg("--leak-check=full")
                    .arg("--show-reachable=yes")
                    .arg("--num-callers=32")
                    .arg("--error-exitcode=1")
                    .arg(binary_path)
                    .arg(port.to_string());
                Self::spawn_and_wait_for_handshake(command, port, true, config.site_id)
            }
        }
    }

    fn spawn_and_wait_for_handshake(
        mut command: Command,
        port: u16,
        instrumented: bool,
        site_id: u32,
    ) -> Result<Self> {
        command.stdout(Stdio::piped()).stderr(Stdio::piped());
        let mut child = command
            .spawn()
            .map_err(|err| Error::SupervisorStartupFailed(err.to_string()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::SupervisorStartupFailed("child stdout was not piped".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::SupervisorStartupFailed("child stderr was not piped".to_string()))?;

        // Inherit stderr onto stdout (spec §4.3) as two independently piped
        // streams forwarded into one merged channel, rather than a single
        // OS-level pipe — `std::process::Command` has no portable way to
        // dup2 one child fd onto another before exec.
        let (lines_tx, lines_rx) = mpsc::channel::<String>();
        let stdout_tx = lines_tx.clone();
        let stdout_reader = thread::spawn(move || forward_lines(stdout, &stdout_tx));
        let stderr_reader = thread::spawn(move || forward_lines(stderr, &lines_tx));

        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
        let reader_handle = thread::spawn(move || {
            recognize_output(lines_rx, &ready_tx, instrumented, site_id);
            let _ = stdout_reader.join();
            let _ = stderr_reader.join();
        });

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(err),
            Err(_) => {
                return Err(Error::SupervisorStartupFailed(
                    "reader thread exited before the handshake or a failure was reported"
                        .to_string(),
                ))
            }
        }

        Ok(Self {
            port,
            child: Some(child),
            reader_handle: Some(reader_handle),
            instrumented,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_instrumented(&self) -> bool {
        self.instrumented
    }

    /// Closes down the child (if any) and joins the reader thread. The
    /// socket itself is closed by the caller first (spec §6: "closing the
    /// socket is the EE shutdown signal"); this only reaps the process.
    pub fn shutdown(&mut self) -> Result<()> {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            child.wait().map_err(Error::TransportClosed)?;
        }
        if let Some(handle) = self.reader_handle.take() {
            let _ = handle.join();
        }
        Ok(())
    }
}

impl Drop for EeSupervisor {
    /// Best-effort cleanup if `shutdown()` was never called — the
    /// idiomatic substitute for "install a shutdown hook that terminates
    /// the child" (spec §4.3): abrupt process termination by signal still
    /// won't run this, which is the documented limitation of the approach.
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

fn forward_lines(stream: impl Read, tx: &mpsc::Sender<String>) {
    let reader = BufReader::new(stream);
    for line in reader.lines() {
        match line {
            Ok(line) => {
                if tx.send(line).is_err() {
                    break;
                }
            }
            Err(_) => break,
        }
    }
}

/// The dedicated reader's recognition logic: first line is the PID
/// identifier, subsequent lines are echoed to the coordinator's log (via
/// `tracing`) and watched for the handshake and, in instrumented mode, for
/// memory-checker diagnostics (spec §4.3).
fn recognize_output(
    lines_rx: mpsc::Receiver<String>,
    ready_tx: &mpsc::Sender<Result<()>>,
    instrumented: bool,
    site_id: u32,
) {
    let span = tracing::info_span!("ee_child", site_id);
    let _entered = span.enter();

    let mut pid: Option<u32> = None;
    let mut saw_listening = false;
    let mut saw_clean_exit = false;
    let mut ready_sent = false;

    for line in &lines_rx {
        if pid.is_none() {
            if let Some(parsed) = parse_pid_line(&line) {
                pid = Some(parsed);
                tracing::info!(pid = parsed, "execution engine process started");
                continue;
            }
        }

        tracing::info!(line = %line, "execution engine output");

        if !saw_listening && line.contains("listening") {
            saw_listening = true;
            if ready_tx.send(Ok(())).is_ok() {
                ready_sent = true;
            }
        }

        if instrumented {
            if let Some(pid) = pid {
                let marker = format!("=={pid}==");
                if line.contains(&marker) {
                    if let Some(error_count) = parse_error_summary(&line) {
                        if error_count != 0 {
                            tracing::warn!(line = %line, "memory checker reported errors");
                            push_instrumentation_error(line.clone());
                        }
                    }
                    if line.contains("All heap blocks were freed") {
                        saw_clean_exit = true;
                    }
                }
            }
        }
    }

    if !ready_sent {
        let _ = ready_tx.send(Err(Error::SupervisorStartupFailed(
            "child closed its output before emitting the listening handshake".to_string(),
        )));
    }
    if instrumented && !saw_clean_exit {
        push_instrumentation_error("Not all heap blocks were freed".to_string());
    }
}

/// Parses a PID identifier of the form `...=<pid>=...` out of the child's
/// first output line.
fn parse_pid_line(line: &str) -> Option<u32> {
    line.split('=').find_map(|segment| segment.trim().parse::<u32>().ok())
}

/// Parses `ERROR SUMMARY: N ...` out of a memory-checker diagnostic line.
fn parse_error_summary(line: &str) -> Option<u32> {
    const MARKER: &str = "ERROR SUMMARY:";
    let start = line.find(MARKER)? + MARKER.len();
    line[start..].split_whitespace().next()?.parse::<u32>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pid_from_equals_delimited_line() {
        assert_eq!(parse_pid_line("VOLTDB=54321=READY"), Some(54_321));
        assert_eq!(parse_pid_line("no pid here"), None);
    }

    #[test]
    fn parses_nonzero_error_summary() {
        assert_eq!(
            parse_error_summary("==54321== ERROR SUMMARY: 3 errors from 3 contexts"),
            Some(3)
        );
        assert_eq!(
            parse_error_summary("==54321== ERROR SUMMARY: 0 errors from 0 contexts"),
            Some(0)
        );
    }

    #[test]
    fn instrumentation_errors_accumulate_across_calls() {
        let before = instrumentation_errors().len();
        push_instrumentation_error("a test diagnostic".to_string());
        let after = instrumentation_errors();
        assert_eq!(after.len(), before + 1);
        assert_eq!(after.last().map(String::as_str), Some("a test diagnostic"));
    }

    #[test]
    fn allocate_port_is_monotonically_increasing() {
        let first = allocate_port();
        let second = allocate_port();
        assert!(second > first);
    }
}
