//! Function code handlers
//!
//! One module per function-code family. Every handler receives the request
//! PDU starting at the function code byte and a [`PduWriter`] that already
//! carries the echoed function code; on failure it returns the exception
//! code and the dispatcher builds the exception response.
//!
//! [`PduWriter`]: crate::pdu::PduWriter

pub(crate) mod bits;
pub(crate) mod diagnostics;
pub(crate) mod files;
pub(crate) mod regs;
pub(crate) mod serial;

/// Parse a big-endian word at `offset`
///
/// Callers validate the request length first; this helper assumes it.
pub(crate) fn be16(data: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([data[offset], data[offset + 1]])
}
