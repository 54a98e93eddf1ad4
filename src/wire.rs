//! Wire-level primitives: the `Command` enum, reply status constants, and
//! the big-endian read/write helpers used by every dispatcher method.
//!
//! All multi-byte integers on the wire are big-endian (spec §6); this
//! module is the single place that knows that, so the rest of the crate
//! never calls `to_be_bytes`/`from_be_bytes` directly.

use zerocopy::byteorder::big_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Tagged command identifiers, in wire order. Values are never observed by
/// callers; only `driver::Driver` writes them onto the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Command {
    Initialize = 1,
    LoadCatalog = 2,
    UpdateCatalog = 3,
    Tick = 4,
    Quiesce = 5,
    PlanFragment = 6,
    QueryPlanFragments = 7,
    CustomPlanFragment = 8,
    LoadTable = 9,
    GetStats = 10,
    ReleaseUndoToken = 11,
    UndoUndoToken = 12,
    SetLogLevels = 13,
    ActivateTableStream = 14,
    TableStreamSerializeMore = 15,
    ExportAction = 16,
    RecoveryMessage = 17,
    TableHashCode = 18,
    Hashinate = 19,
}

impl Command {
    pub fn code(self) -> u32 {
        self as u32
    }
}

/// Reply status byte values (spec §3).
pub mod status {
    pub const SUCCESS: u8 = 0;
    pub const GENERIC_ERROR: u8 = 1;
    pub const RETRIEVE_DEPENDENCY: u8 = 100;
    pub const DEPENDENCY_FOUND: u8 = 101;
    pub const DEPENDENCY_NOT_FOUND: u8 = 102;
    pub const CRASH: u8 = 104;
}

/// The frame length prefix: a single big-endian `u32` counting its own four
/// bytes plus everything that follows. Mirrors the teacher's `PacketHeader`
/// — a fixed-size zero-copy struct read/written in place rather than via
/// `to_be_bytes`/`from_be_bytes` at the one spot it matters (the reserved
/// prefix slot in the frame buffer).
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct FrameHeader {
    total_length: U32,
}

impl FrameHeader {
    pub fn new(total_length: u32) -> Self {
        Self {
            total_length: U32::new(total_length),
        }
    }

    pub fn total_length(&self) -> u32 {
        self.total_length.get()
    }

    pub const SIZE: usize = core::mem::size_of::<Self>();
}

/// Reads an 8-bit boolean flag as used by `readResultTables` (dirty flag is
/// the raw byte compared against zero) and by `readDependencies` (dirty
/// flag derived from `>0`). Both source forms collapse to the same
/// semantics: any non-zero byte means dirty. See SPEC_FULL §10.
pub fn read_bool_flag(byte: u8) -> bool {
    byte != 0
}

/// The canonical write-side encoding for a dirty flag: exactly 0 or 1,
/// never some other non-zero value, so a byte written by this crate is
/// unambiguous to a reader using either of the two legacy interpretations.
pub fn write_bool_flag(flag: bool) -> u8 {
    u8::from(flag)
}

/// Appends a big-endian `u8` to `buf`.
pub fn write_u8(buf: &mut Vec<u8>, v: u8) {
    buf.push(v);
}

/// Appends a big-endian `u16` to `buf`.
pub fn write_u16_be(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_be_bytes());
}

/// Appends a big-endian `u32` to `buf`.
pub fn write_u32_be(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_be_bytes());
}

/// Appends a big-endian `u64` to `buf`.
pub fn write_u64_be(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_be_bytes());
}

/// Appends a big-endian `i64` to `buf`.
pub fn write_i64_be(buf: &mut Vec<u8>, v: i64) {
    buf.extend_from_slice(&v.to_be_bytes());
}

/// Appends raw bytes verbatim.
pub fn write_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(bytes);
}

/// Writes a UTF-8 string preceded by its `u16` byte length. Callers are
/// responsible for keeping the string within `u16::MAX` bytes.
pub fn write_str_u16(buf: &mut Vec<u8>, s: &str) {
    write_u16_be(buf, s.len() as u16);
    write_bytes(buf, s.as_bytes());
}

/// Writes a UTF-8 string followed by a single `0x00` terminator byte, the
/// layout `LoadCatalog`/`UpdateCatalog` use for their payloads.
pub fn write_cstr_utf8_nul(buf: &mut Vec<u8>, s: &str) {
    write_bytes(buf, s.as_bytes());
    write_u8(buf, 0x00);
}

pub fn be_u16(bytes: [u8; 2]) -> u16 {
    u16::from_be_bytes(bytes)
}

pub fn be_u32(bytes: [u8; 4]) -> u32 {
    u32::from_be_bytes(bytes)
}

pub fn be_u64(bytes: [u8; 8]) -> u64 {
    u64::from_be_bytes(bytes)
}

pub fn be_i64(bytes: [u8; 8]) -> i64 {
    i64::from_be_bytes(bytes)
}
