//! The Frame Buffer: a single reusable `Vec<u8>` with a reserved 4-byte
//! length-prefix slot, modeled on the teacher's `BufferSet::new_write_buffer`
//! (clear, then push a placeholder header before the dispatcher writes any
//! payload bytes).

const DEFAULT_CAPACITY: usize = 10 * 1024 * 1024;
const GROWTH_MARGIN: usize = 4096;

/// Owns the single outbound buffer a `Driver` reuses for every command.
///
/// The first [`wire::FrameHeader::SIZE`](crate::wire::FrameHeader::SIZE)
/// bytes are always reserved for the length prefix; the dispatcher never
/// writes there directly (spec §3 invariant: "the frame buffer's first four
/// bytes are never written by the dispatcher").
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let mut buf = Vec::with_capacity(capacity);
        buf.resize(crate::wire::FrameHeader::SIZE, 0);
        Self { buf }
    }

    /// Resets the buffer to just the reserved prefix slot, ready for a new
    /// command's payload.
    pub fn reset(&mut self) {
        self.buf.truncate(crate::wire::FrameHeader::SIZE);
    }

    /// Bytes written after the prefix so far.
    pub fn payload_len(&self) -> usize {
        self.buf.len() - crate::wire::FrameHeader::SIZE
    }

    /// Appends bytes after the current payload, growing the backing
    /// allocation (by reallocate + copy, never shrinking) if the new
    /// length would exceed capacity.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.reserve_additional(bytes.len());
        self.buf.extend_from_slice(bytes);
    }

    /// Ensures at least `additional` more bytes can be appended without a
    /// second reallocation inside a single command's serialization.
    pub fn reserve_additional(&mut self, additional: usize) {
        let needed = self.buf.len() + additional;
        if needed > self.buf.capacity() {
            let mut grown = Vec::with_capacity(needed + GROWTH_MARGIN);
            grown.extend_from_slice(&self.buf);
            self.buf = grown;
        }
    }

    /// Writes the length prefix from the bytes actually produced and
    /// returns the complete frame (prefix included) ready for
    /// `Transport::write_raw`.
    pub fn finalize(&mut self) -> &[u8] {
        // A single command frame never approaches u32::MAX bytes.
        let total_length = self.buf.len() as u32;
        let header = crate::wire::FrameHeader::new(total_length);
        self.buf[..crate::wire::FrameHeader::SIZE].copy_from_slice(header.as_bytes());
        &self.buf
    }

    /// A mutable handle to the payload region (after the reserved prefix),
    /// for callers writing fields with the free functions in `wire`.
    pub fn payload_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
