//! Stream Transport: a blocking TCP connection to the EE, providing
//! exact-length read/write with EOF detection and the low-level
//! `write_frame` primitive. Modeled on the teacher's `sync::stream::Stream`,
//! collapsed to a single TCP variant (no TLS, no Unix socket — Non-goals).

use std::io::{self, Read, Write};
use std::net::TcpStream;

use crate::error::{Error, Result};

/// Owns the socket to a single EE process. Exclusively owned by one
/// `Driver` (spec §5): no cloning, no sharing.
pub struct Transport {
    stream: TcpStream,
}

impl Transport {
    /// Connects to the EE's port on localhost, enabling `TCP_NODELAY`
    /// (latency dominates over throughput at the small-request boundary,
    /// spec §4.2).
    pub fn connect(port: u16) -> Result<Self> {
        let stream = TcpStream::connect(("127.0.0.1", port))?;
        stream.set_nodelay(true)?;
        Ok(Self { stream })
    }

    /// Writes the already-finalized frame (length prefix included) atomically
    /// with respect to partial writes — retries until the whole frame is on
    /// the wire.
    pub fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        self.stream.write_all(frame)?;
        Ok(())
    }

    /// Writes raw bytes with no framing, used for the dependency sub-reply
    /// messages (spec §4.5: "written using the raw socket, not the frame
    /// buffer").
    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream.write_all(bytes)?;
        Ok(())
    }

    pub fn write_raw_u8(&mut self, v: u8) -> Result<()> {
        self.write_raw(&[v])
    }

    pub fn write_raw_u32_be(&mut self, v: u32) -> Result<()> {
        self.write_raw(&v.to_be_bytes())
    }

    /// Reads exactly `n` bytes or fails with `TransportClosed`.
    pub fn read_exact(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        self.read_exact_into(&mut buf)?;
        Ok(buf)
    }

    pub fn read_exact_into(&mut self, buf: &mut [u8]) -> Result<()> {
        match self.stream.read_exact(buf) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
                Err(Error::TransportClosed(err))
            }
            Err(err) => Err(Error::TransportClosed(err)),
        }
    }

    /// Reads a single status byte; fails on EOF (spec §4.2).
    pub fn read_status(&mut self) -> Result<u8> {
        let mut byte = [0u8; 1];
        self.read_exact_into(&mut byte)?;
        Ok(byte[0])
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.read_status()
    }

    pub fn read_u16_be(&mut self) -> Result<u16> {
        let mut bytes = [0u8; 2];
        self.read_exact_into(&mut bytes)?;
        Ok(u16::from_be_bytes(bytes))
    }

    pub fn read_u32_be(&mut self) -> Result<u32> {
        let mut bytes = [0u8; 4];
        self.read_exact_into(&mut bytes)?;
        Ok(u32::from_be_bytes(bytes))
    }

    pub fn read_u64_be(&mut self) -> Result<u64> {
        let mut bytes = [0u8; 8];
        self.read_exact_into(&mut bytes)?;
        Ok(u64::from_be_bytes(bytes))
    }

    pub fn read_i64_be(&mut self) -> Result<i64> {
        let mut bytes = [0u8; 8];
        self.read_exact_into(&mut bytes)?;
        Ok(i64::from_be_bytes(bytes))
    }

    /// Shuts down both halves of the socket, the EE shutdown signal
    /// (spec §6). Any blocked read/write on the peer side observes EOF.
    pub fn shutdown(&mut self) -> Result<()> {
        self.stream.shutdown(std::net::Shutdown::Both)?;
        Ok(())
    }
}
