//! Driver configuration: where the EE binary lives, how it is launched, and
//! the identity fields the coordinator assigns to this partition executor.
//! Modeled on the teacher's `Opts` (`Default` impl, plain struct, no
//! config-file format — SPEC_FULL §9).

use std::env;
use std::path::PathBuf;

const EE_BINARY_PATH_VAR: &str = "EE_BINARY_PATH";
const DEFAULT_EE_BINARY: &str = "./voltdbipc";

bitflags::bitflags! {
    /// The `logLevels` bitfield `Initialize` and `SetLogLevels` carry
    /// opaquely as a `u64` on the wire. This crate's own `tracing`
    /// instrumentation decodes it only to report what was requested —
    /// the EE is the sole interpreter of these bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LogLevels: u64 {
        const SQL = 1 << 0;
        const STORAGE = 1 << 1;
        const EXECUTOR = 1 << 2;
        const NETWORK = 1 << 3;
        const RECOVERY = 1 << 4;
    }
}

/// How the supervisor is to obtain a running EE process (spec §4.3).
#[derive(Debug, Clone)]
pub enum LaunchMode {
    /// The EE is already running (or will be started by an operator);
    /// the driver only connects.
    External { port: u16 },
    /// Spawn the EE binary directly, passing the chosen port as its sole
    /// argument.
    DirectChild { binary_path: PathBuf },
    /// Spawn the EE binary under a memory checker (leak check full,
    /// show-reachable yes, caller depth >= 32, fail-on-error exit code).
    Instrumented { binary_path: PathBuf },
}

/// Configuration for one `Driver` instance (spec §3 "Driver instance",
/// §6 "Environment variables").
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub cluster_idx: u32,
    pub site_id: u32,
    pub partition_id: u32,
    pub host_id: u32,
    pub hostname: String,
    pub log_levels: LogLevels,
    pub launch_mode: LaunchMode,
}

impl DriverConfig {
    /// Resolves the EE binary path: the `EE_BINARY_PATH` environment
    /// variable if set, otherwise the documented default `./voltdbipc`
    /// (spec §6).
    pub fn resolve_binary_path() -> PathBuf {
        env::var(EE_BINARY_PATH_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_EE_BINARY))
    }

    /// Whether the memory checker should stream its output inline rather
    /// than write to `--log-file=site_<siteId>.log` — true exactly when
    /// `EE_BINARY_PATH` was explicitly set (spec §6).
    pub fn memory_checker_streams_inline() -> bool {
        env::var(EE_BINARY_PATH_VAR).is_ok()
    }

    pub fn memory_checker_log_file(&self) -> String {
        format!("site_{}.log", self.site_id)
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            cluster_idx: 0,
            site_id: 0,
            partition_id: 0,
            host_id: 0,
            hostname: String::new(),
            log_levels: LogLevels::empty(),
            launch_mode: LaunchMode::Instrumented {
                binary_path: Self::resolve_binary_path(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_checker_log_file_names_by_site() {
        let cfg = DriverConfig {
            site_id: 7,
            ..Default::default()
        };
        assert_eq!(cfg.memory_checker_log_file(), "site_7.log");
    }
}
