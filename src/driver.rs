//! Command Dispatcher: the public `Driver` type and its one method per
//! wire command (spec §4.4). Every method resets the frame buffer, writes
//! the command code and fields in the documented fixed order, flushes via
//! the transport, and delegates to the Reply Reader for the command's
//! reply shape.

use crate::config::{DriverConfig, LogLevels};
use crate::coordinator::Coordinator;
use crate::error::{Error, Result};
use crate::frame::FrameBuffer;
use crate::reply::{self, DependencySet, ResultTableSet};
use crate::supervisor::{self, EeSupervisor};
use crate::transport::Transport;
use crate::wire::{self, Command};

/// Outcome of `TableStreamSerializeMore`: the EE reports this as a single
/// signed length rather than a status byte plus payload, so it is modeled
/// as a value, not a `Result::Err` (spec §4.4, §8 invariant list).
#[derive(Debug, Clone)]
pub enum SerializeMoreOutcome {
    /// The EE reported an error (-1).
    Error,
    /// No more tuple data remains (0).
    Eof,
    /// `capacity`-bounded tuple data bytes.
    Data(Vec<u8>),
}

/// Outcome of `ExportAction`, whose reply has no status byte at all
/// (SPEC_FULL §10 redesign flag, preserved exactly).
#[derive(Debug, Clone)]
pub enum ExportActionOutcome {
    /// The EE returned a negative result offset.
    Error,
    /// A non-negative result offset, with polled data attached only when
    /// `poll` was requested in the call.
    Offset { offset: i64, polled_data: Option<Vec<u8>> },
}

/// One driver instance per EE (spec §3). Created by the coordinator once
/// per partition executor; destroyed by `release()`.
pub struct Driver<C: Coordinator> {
    config: DriverConfig,
    supervisor: EeSupervisor,
    transport: Transport,
    frame: FrameBuffer,
    coordinator: C,
}

impl<C: Coordinator> Driver<C> {
    /// Launches (or connects to) the EE per `config.launch_mode` and opens
    /// the stream transport. Does not itself send `Initialize` — that is
    /// the first command the caller issues, like every other command.
    pub fn connect(config: DriverConfig, coordinator: C) -> Result<Self> {
        let supervisor = EeSupervisor::launch(&config)?;
        let transport = Transport::connect(supervisor.port())?;
        Ok(Self {
            config,
            supervisor,
            transport,
            frame: FrameBuffer::new(),
            coordinator,
        })
    }

    pub fn coordinator_mut(&mut self) -> &mut C {
        &mut self.coordinator
    }

    fn begin(&mut self, command: Command) {
        self.frame.reset();
        wire::write_u32_be(self.frame.payload_mut(), command.code());
    }

    fn flush_and_await_status(&mut self) -> Result<()> {
        let frame = self.frame.finalize();
        self.transport.write_frame(frame)?;
        reply::read_reply(&mut self.transport, &mut self.coordinator)
    }

    /// clusterIdx u32, siteId u32, partitionId u32, hostId u32,
    /// logLevels u64, hostnameLen u16, hostname utf8 -> status
    pub fn initialize(
        &mut self,
        cluster_idx: u32,
        site_id: u32,
        partition_id: u32,
        host_id: u32,
        log_levels: LogLevels,
        hostname: &str,
    ) -> Result<()> {
        self.begin(Command::Initialize);
        let buf = self.frame.payload_mut();
        wire::write_u32_be(buf, cluster_idx);
        wire::write_u32_be(buf, site_id);
        wire::write_u32_be(buf, partition_id);
        wire::write_u32_be(buf, host_id);
        wire::write_u64_be(buf, log_levels.bits());
        wire::write_str_u16(buf, hostname);
        self.flush_and_await_status()
    }

    /// catalogBytes utf8, 0x00 terminator -> status
    pub fn load_catalog(&mut self, catalog: &str) -> Result<()> {
        self.begin(Command::LoadCatalog);
        wire::write_cstr_utf8_nul(self.frame.payload_mut(), catalog);
        self.flush_and_await_status()
    }

    /// catalogVersion u32, diffBytes utf8, 0x00 -> status
    pub fn update_catalog(&mut self, catalog_version: u32, diff: &str) -> Result<()> {
        self.begin(Command::UpdateCatalog);
        let buf = self.frame.payload_mut();
        wire::write_u32_be(buf, catalog_version);
        wire::write_cstr_utf8_nul(buf, diff);
        self.flush_and_await_status()
    }

    /// time u64, lastCommittedTxnId u64 -> status
    pub fn tick(&mut self, time: u64, last_committed_txn_id: u64) -> Result<()> {
        self.begin(Command::Tick);
        let buf = self.frame.payload_mut();
        wire::write_u64_be(buf, time);
        wire::write_u64_be(buf, last_committed_txn_id);
        self.flush_and_await_status()
    }

    /// lastCommittedTxnId u64 -> status
    pub fn quiesce(&mut self, last_committed_txn_id: u64) -> Result<()> {
        self.begin(Command::Quiesce);
        wire::write_u64_be(self.frame.payload_mut(), last_committed_txn_id);
        self.flush_and_await_status()
    }

    /// txnId u64, lastCommittedTxnId u64, undoToken u64, planFragmentId u64,
    /// outputDepId u32, inputDepId u32, serializedParameterSet
    /// -> status + DependencySet
    #[expect(clippy::too_many_arguments, reason = "mirrors the fixed wire layout exactly, one field per argument")]
    pub fn plan_fragment(
        &mut self,
        txn_id: u64,
        last_committed_txn_id: u64,
        undo_token: u64,
        plan_fragment_id: u64,
        output_dep_id: u32,
        input_dep_id: u32,
        serialized_parameter_set: &[u8],
    ) -> Result<DependencySet> {
        self.begin(Command::PlanFragment);
        let buf = self.frame.payload_mut();
        wire::write_u64_be(buf, txn_id);
        wire::write_u64_be(buf, last_committed_txn_id);
        wire::write_u64_be(buf, undo_token);
        wire::write_u64_be(buf, plan_fragment_id);
        wire::write_u32_be(buf, output_dep_id);
        wire::write_u32_be(buf, input_dep_id);
        wire::write_bytes(buf, serialized_parameter_set);
        self.flush_and_await_status()?;
        reply::read_dependency_set(&mut self.transport)
    }

    /// txnId u64, lastCommittedTxnId u64, undoToken u64, outputDepId u32,
    /// inputDepId u32, serializedPlanString -> status + result table set (n=1)
    #[expect(clippy::too_many_arguments, reason = "mirrors the fixed wire layout exactly, one field per argument")]
    pub fn custom_plan_fragment(
        &mut self,
        txn_id: u64,
        last_committed_txn_id: u64,
        undo_token: u64,
        output_dep_id: u32,
        input_dep_id: u32,
        serialized_plan: &str,
    ) -> Result<ResultTableSet> {
        self.begin(Command::CustomPlanFragment);
        let buf = self.frame.payload_mut();
        wire::write_u64_be(buf, txn_id);
        wire::write_u64_be(buf, last_committed_txn_id);
        wire::write_u64_be(buf, undo_token);
        wire::write_u32_be(buf, output_dep_id);
        wire::write_u32_be(buf, input_dep_id);
        wire::write_bytes(buf, serialized_plan.as_bytes());
        self.flush_and_await_status()?;
        reply::read_result_table_set(&mut self.transport, 1)
    }

    /// txnId u64, lastCommittedTxnId u64, undoToken u64, numFragmentIds u32,
    /// numParameterSets u32, planFragmentIds u64xN, inputDepIds u32xN,
    /// outputDepIds u32xN, concatenated serialized ParameterSets
    /// -> status + N-table result set
    #[expect(clippy::too_many_arguments, reason = "mirrors the fixed wire layout exactly, one field per argument")]
    pub fn query_plan_fragments(
        &mut self,
        txn_id: u64,
        last_committed_txn_id: u64,
        undo_token: u64,
        num_parameter_sets: u32,
        plan_fragment_ids: &[u64],
        input_dep_ids: &[u32],
        output_dep_ids: &[u32],
        concatenated_parameter_sets: &[u8],
    ) -> Result<ResultTableSet> {
        if plan_fragment_ids.len() != input_dep_ids.len() || plan_fragment_ids.len() != output_dep_ids.len() {
            return Err(Error::ProtocolViolation(
                "plan_fragment_ids, input_dep_ids and output_dep_ids must be the same length".to_string(),
            ));
        }
        self.begin(Command::QueryPlanFragments);
        let buf = self.frame.payload_mut();
        wire::write_u64_be(buf, txn_id);
        wire::write_u64_be(buf, last_committed_txn_id);
        wire::write_u64_be(buf, undo_token);
        wire::write_u32_be(buf, plan_fragment_ids.len() as u32);
        wire::write_u32_be(buf, num_parameter_sets);
        for id in plan_fragment_ids {
            wire::write_u64_be(buf, *id);
        }
        for id in input_dep_ids {
            wire::write_u32_be(buf, *id);
        }
        for id in output_dep_ids {
            wire::write_u32_be(buf, *id);
        }
        wire::write_bytes(buf, concatenated_parameter_sets);
        self.flush_and_await_status()?;
        reply::read_result_table_set(&mut self.transport, plan_fragment_ids.len() as u32)
    }

    /// tableId u32, txnId u64, lastCommittedTxnId u64, undoToken u64,
    /// allowExport u16, table-bytes -> status
    #[expect(clippy::too_many_arguments, reason = "mirrors the fixed wire layout exactly, one field per argument")]
    pub fn load_table(
        &mut self,
        table_id: u32,
        txn_id: u64,
        last_committed_txn_id: u64,
        undo_token: u64,
        allow_export: bool,
        table_bytes: &[u8],
    ) -> Result<()> {
        self.begin(Command::LoadTable);
        let buf = self.frame.payload_mut();
        wire::write_u32_be(buf, table_id);
        wire::write_u64_be(buf, txn_id);
        wire::write_u64_be(buf, last_committed_txn_id);
        wire::write_u64_be(buf, undo_token);
        wire::write_u16_be(buf, u16::from(allow_export));
        wire::write_bytes(buf, table_bytes);
        self.flush_and_await_status()
    }

    /// selectorOrdinal u32, intervalFlag u8, now u64, numLocators u32,
    /// locators u32xM -> status + u32-prefixed message containing a single
    /// serialized table
    pub fn get_stats(
        &mut self,
        selector_ordinal: u32,
        interval_flag: bool,
        now: u64,
        locators: &[u32],
    ) -> Result<Vec<u8>> {
        self.begin(Command::GetStats);
        let buf = self.frame.payload_mut();
        wire::write_u32_be(buf, selector_ordinal);
        wire::write_u8(buf, u8::from(interval_flag));
        wire::write_u64_be(buf, now);
        wire::write_u32_be(buf, locators.len() as u32);
        for locator in locators {
            wire::write_u32_be(buf, *locator);
        }
        self.flush_and_await_status()?;
        let message_len = self.transport.read_u32_be()?;
        self.transport.read_exact(message_len as usize)
    }

    /// undoToken u64 -> status
    pub fn release_undo_token(&mut self, undo_token: u64) -> Result<()> {
        self.begin(Command::ReleaseUndoToken);
        wire::write_u64_be(self.frame.payload_mut(), undo_token);
        self.flush_and_await_status()
    }

    /// undoToken u64 -> status
    pub fn undo_undo_token(&mut self, undo_token: u64) -> Result<()> {
        self.begin(Command::UndoUndoToken);
        wire::write_u64_be(self.frame.payload_mut(), undo_token);
        self.flush_and_await_status()
    }

    /// logLevels u64 -> status
    pub fn set_log_levels(&mut self, log_levels: LogLevels) -> Result<()> {
        self.begin(Command::SetLogLevels);
        wire::write_u64_be(self.frame.payload_mut(), log_levels.bits());
        self.flush_and_await_status()
    }

    /// tableId u32, streamTypeOrdinal u32 -> status
    pub fn activate_table_stream(&mut self, table_id: u32, stream_type_ordinal: u32) -> Result<()> {
        self.begin(Command::ActivateTableStream);
        let buf = self.frame.payload_mut();
        wire::write_u32_be(buf, table_id);
        wire::write_u32_be(buf, stream_type_ordinal);
        self.flush_and_await_status()
    }

    /// tableId u32, streamTypeOrdinal u32, capacity u32 -> status + u32
    /// length + that many bytes of tuple data (-1 error, 0 eof)
    pub fn table_stream_serialize_more(
        &mut self,
        table_id: u32,
        stream_type_ordinal: u32,
        capacity: u32,
    ) -> Result<SerializeMoreOutcome> {
        self.begin(Command::TableStreamSerializeMore);
        let buf = self.frame.payload_mut();
        wire::write_u32_be(buf, table_id);
        wire::write_u32_be(buf, stream_type_ordinal);
        wire::write_u32_be(buf, capacity);
        self.flush_and_await_status()?;

        let raw = self.transport.read_u32_be()?;
        let signed = i32::from_ne_bytes(raw.to_ne_bytes());
        match signed {
            -1 => Ok(SerializeMoreOutcome::Error),
            0 => Ok(SerializeMoreOutcome::Eof),
            n if n > 0 => {
                let bytes = self.transport.read_exact(n as usize)?;
                Ok(SerializeMoreOutcome::Data(bytes))
            }
            other => Err(Error::ProtocolViolation(format!(
                "TableStreamSerializeMore returned an impossible length {other}"
            ))),
        }
    }

    /// ack u32, poll u32, reset u32, sync u32, ackOffset u64, seqNo u64,
    /// mTableId u64 -> status-less: i64 result_offset (negative = error);
    /// if non-negative and poll requested, u32 size + size bytes.
    ///
    /// No call to `reply::read_reply` here — this is the one command whose
    /// reply has no leading status byte at all (SPEC_FULL §10).
    #[expect(clippy::too_many_arguments, reason = "mirrors the fixed wire layout exactly, one field per argument")]
    pub fn export_action(
        &mut self,
        ack: bool,
        poll: bool,
        reset: bool,
        sync: bool,
        ack_offset: u64,
        seq_no: u64,
        table_id: u64,
    ) -> Result<ExportActionOutcome> {
        self.begin(Command::ExportAction);
        let buf = self.frame.payload_mut();
        wire::write_u32_be(buf, u32::from(ack));
        wire::write_u32_be(buf, u32::from(poll));
        wire::write_u32_be(buf, u32::from(reset));
        wire::write_u32_be(buf, u32::from(sync));
        wire::write_u64_be(buf, ack_offset);
        wire::write_u64_be(buf, seq_no);
        wire::write_u64_be(buf, table_id);
        let frame = self.frame.finalize();
        self.transport.write_frame(frame)?;

        let result_offset = self.transport.read_i64_be()?;
        if result_offset < 0 {
            return Ok(ExportActionOutcome::Error);
        }
        let polled_data = if poll {
            let size = self.transport.read_u32_be()?;
            Some(self.transport.read_exact(size as usize)?)
        } else {
            None
        };
        Ok(ExportActionOutcome::Offset {
            offset: result_offset,
            polled_data,
        })
    }

    /// size u32, bytes -> status
    pub fn recovery_message(&mut self, bytes: &[u8]) -> Result<()> {
        self.begin(Command::RecoveryMessage);
        let buf = self.frame.payload_mut();
        wire::write_u32_be(buf, bytes.len() as u32);
        wire::write_bytes(buf, bytes);
        self.flush_and_await_status()
    }

    /// tableId u32 -> status + u64 hash
    pub fn table_hash_code(&mut self, table_id: u32) -> Result<u64> {
        self.begin(Command::TableHashCode);
        wire::write_u32_be(self.frame.payload_mut(), table_id);
        self.flush_and_await_status()?;
        self.transport.read_u64_be()
    }

    /// partitionCount u32, serialized single-value ParameterSet
    /// -> status + u32 partition
    pub fn hashinate(&mut self, partition_count: u32, serialized_single_value_parameter_set: &[u8]) -> Result<u32> {
        self.begin(Command::Hashinate);
        let buf = self.frame.payload_mut();
        wire::write_u32_be(buf, partition_count);
        wire::write_bytes(buf, serialized_single_value_parameter_set);
        self.flush_and_await_status()?;
        self.transport.read_u32_be()
    }

    // -- Commands rejected over this IPC boundary (spec §7). Each fails
    // before any socket I/O, matching the teacher's fail-fast pattern for
    // a feature-gated method whose feature is absent.

    /// Anti-caching is a coordinator-side collaborator out of scope for
    /// this IPC boundary (spec §1, §8 scenario 5).
    pub fn anti_cache_initialize(&mut self) -> Result<()> {
        Err(Error::NotImplemented("Anti-Caching disabled for IPC"))
    }

    pub fn anti_cache_read_block(&mut self, _table_id: u32, _block_id: u64) -> Result<Vec<u8>> {
        Err(Error::NotImplemented("anti-caching is disabled for IPC"))
    }

    pub fn mmap_memory(&mut self) -> Result<()> {
        Err(Error::NotImplemented("MMAP tables are not supported over IPC"))
    }

    pub fn aries_recover(&mut self) -> Result<()> {
        Err(Error::NotImplemented("ARIES recovery is not supported over IPC"))
    }

    pub fn set_read_write_set_tracking(&mut self, _enabled: bool) -> Result<()> {
        Err(Error::NotImplemented("read/write-set tracking is not supported over IPC"))
    }

    pub fn load_table_from_file(&mut self, _path: &str) -> Result<()> {
        Err(Error::NotImplemented("loading tables from file is not supported over IPC"))
    }

    /// Shuts down the socket (the EE shutdown signal, spec §6), awaits the
    /// child, and in instrumented mode validates the process-wide
    /// instrumentation error list is empty.
    pub fn release(mut self) -> Result<()> {
        self.transport.shutdown()?;
        self.supervisor.shutdown()?;
        if self.supervisor.is_instrumented() {
            let errors = supervisor::instrumentation_errors();
            if !errors.is_empty() {
                return Err(Error::InstrumentationError(errors));
            }
        }
        Ok(())
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }
}
