//! Host-side IPC driver for an out-of-process Execution Engine.
//!
//! This crate is the protocol engine only: command framing, the nested
//! mid-reply dependency callback, crash-report capture, buffer growth, and
//! the EE child-process lifecycle. The catalog data model, the query
//! planner, the coordinator's transaction scheduler and its own logging
//! subsystem are external collaborators this crate calls through
//! [`Coordinator`] rather than implements.

mod config;
mod coordinator;
mod driver;
mod error;
mod frame;
mod reply;
mod supervisor;
mod transport;
mod wire;

pub use config::{DriverConfig, LaunchMode};
pub use coordinator::Coordinator;
pub use driver::{Driver, ExportActionOutcome, SerializeMoreOutcome};
pub use error::{Error, Result};
pub use reply::{CrashReport, DependencySet, ResultTableSet};
pub use supervisor::instrumentation_errors;
