use std::fmt;

use crate::reply::CrashReport;

pub type Result<T> = core::result::Result<T, Error>;

/// Errors produced by the driver's protocol engine.
///
/// Every variant other than [`Error::NotImplemented`] and
/// [`Error::InstrumentationError`] leaves the driver in a state where the
/// caller must not issue further commands on it (see the propagation
/// policy described on [`crate::driver::Driver`]).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Socket closed or failed mid-frame. Fatal to the driver.
    #[error("transport to the execution engine closed or failed: {0}")]
    TransportClosed(#[from] std::io::Error),

    /// A status byte, length field, or dependency count broke the wire
    /// contract. Fatal to the driver.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// `status != SUCCESS` with a non-empty exception payload. The payload
    /// bytes are opaque to this crate (the exception deserializer is an
    /// external collaborator per spec §1); `payload` carries the bytes
    /// with their length prefix re-prepended, exactly as read off the wire.
    #[error("execution engine raised a typed exception (status {status})")]
    EeException { status: u8, payload: Vec<u8> },

    /// `status != SUCCESS` with a zero-length exception payload — only the
    /// status code identifies the error.
    #[error("execution engine reported a generic error (status {status})")]
    GenericEeError { status: u8 },

    /// The execution engine reported an intentional crash. Non-recoverable;
    /// the coordinator has already been notified via
    /// [`crate::coordinator::Coordinator::on_crash`] by the time this is
    /// returned.
    #[error("execution engine crashed: {0}")]
    EeCrash(CrashReport),

    /// Diagnostics collected from the memory-checker wrapping an
    /// instrumented child, consulted at `release()` rather than raised
    /// synchronously from any single call.
    #[error("instrumentation reported {} diagnostic(s): {}", .0.len(), .0.join("; "))]
    InstrumentationError(Vec<String>),

    /// The supervisor could not bring the child execution engine to a
    /// ready state (e.g. it closed its output before the handshake line).
    #[error("execution engine failed to start: {0}")]
    SupervisorStartupFailed(String),

    /// A command intentionally unsupported over this IPC boundary. Raised
    /// before any socket I/O is attempted.
    #[error("{0} is not implemented over this IPC protocol")]
    NotImplemented(&'static str),
}

impl Error {
    /// Whether this error leaves the driver unusable for further calls.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Error::NotImplemented(_) | Error::InstrumentationError(_)
        )
    }
}

impl fmt::Display for CrashReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}:{}", self.reason, self.file, self.line)
    }
}
