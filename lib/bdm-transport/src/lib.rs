//! USB transport for the BDM probe (C1).
//!
//! Owns the single 256-byte command/response buffer for the life of the
//! process. The buffer is deliberately never cleared between commands:
//! the probe firmware reads past the declared payload length of some
//! commands and depends on the trailing bytes holding the previous
//! response's leftover data, not zeros. Every caller above this layer
//! reaches the buffer only through [`Transport::buffer_mut`], which
//! hands out the same backing storage every time rather than a fresh
//! allocation.

use std::time::Duration;

mod fake;
mod rusb_transport;

pub use fake::FakeTransport;
pub use rusb_transport::RusbTransport;

/// Every AA-class USB transfer, in or out, is exactly this many bytes.
pub const FRAME_LEN: usize = 256;

/// Default timeout for AA-class command/response exchanges.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
/// Timeout used while polling for BDM freeze/halt status.
pub const FREEZE_POLL_TIMEOUT: Duration = Duration::from_millis(500);
/// Timeout for a BB-class bulk upload and its status response.
pub const BULK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("USB device not found (vid={vid:#06x}, pid={pid:#06x})")]
    DeviceNotFound { vid: u16, pid: u16 },
    #[error("USB I/O error: {0}")]
    Usb(#[from] rusb::Error),
    #[error("short write: wrote {actual} of {expected} bytes")]
    ShortWrite { expected: usize, actual: usize },
    #[error("short read: wanted up to {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },
}

pub type Result<T> = core::result::Result<T, Error>;

/// Abstraction over the probe's USB link. Extracted as a trait so the
/// wire-protocol layer and everything above it can be exercised against
/// [`FakeTransport`] without a physical probe attached.
pub trait Transport {
    /// Send exactly [`FRAME_LEN`] bytes on the bulk OUT endpoint.
    fn send(&mut self, frame: &[u8; FRAME_LEN]) -> Result<()>;

    /// Send an already-framed BB-class payload of arbitrary length.
    /// Large uploads are expected to be pre-chunked by the caller (see
    /// `bdm-proto`'s bulk-upload helper); this just pushes bytes out.
    fn send_bulk(&mut self, data: &[u8]) -> Result<()>;

    /// Receive up to [`FRAME_LEN`] bytes into the persistent buffer and
    /// return the filled slice. Bytes beyond what was actually received
    /// are untouched leftovers from a previous exchange.
    fn recv(&mut self, timeout: Duration) -> Result<&[u8]>;

    /// Mutable access to the persistent 256-byte buffer, for the
    /// wire-protocol command builder to write header/payload fields
    /// into without disturbing the rest.
    fn buffer_mut(&mut self) -> &mut [u8; FRAME_LEN];

    /// Read-only view of the persistent buffer (e.g. to inspect a
    /// previous response after a later partial overwrite).
    fn buffer(&self) -> &[u8; FRAME_LEN];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_transport_round_trips_a_frame() {
        let mut t = FakeTransport::new();
        t.push_response(vec![0x99, 0x66, 0x00, 0x03, 0xEE]);
        let frame = [0u8; FRAME_LEN];
        t.send(&frame).unwrap();
        let resp = t.recv(DEFAULT_TIMEOUT).unwrap();
        assert_eq!(resp, &[0x99, 0x66, 0x00, 0x03, 0xEE]);
        assert_eq!(t.sent.len(), 1);
    }

    #[test]
    fn buffer_is_never_cleared_by_recv() {
        let mut t = FakeTransport::new();
        t.buffer_mut()[200] = 0xAB;
        t.push_response(vec![0x99, 0x66, 0x00, 0x01, 0xEE]);
        let _ = t.recv(DEFAULT_TIMEOUT).unwrap();
        assert_eq!(t.buffer()[200], 0xAB);
    }
}
