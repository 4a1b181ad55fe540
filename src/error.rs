//! Error handling for the host-facing API
//!
//! Wire-level failures never surface here: a malformed frame is dropped and an
//! invalid PDU becomes a Modbus exception response, both per protocol. This
//! error type covers what the host can get wrong around the engine, mainly
//! descriptor table configuration and transport I/O in the example host.

use thiserror::Error;

/// Result type alias for host-facing Modbus operations
pub type ModbusResult<T> = Result<T, ModbusError>;

/// Host-facing error conditions
#[derive(Error, Debug, Clone)]
pub enum ModbusError {
    /// I/O related errors (network, serial)
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Instance or descriptor table configuration errors
    ///
    /// Raised by [`ModbusSlave::validate`](crate::ModbusSlave::validate) when
    /// a table violates the sorting invariants the lookup relies on, or when
    /// the serial configuration is out of range.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Address range validation failures
    #[error("Invalid address: start={start}, count={count}")]
    InvalidAddress { start: u16, count: u16 },

    /// Invalid data value
    #[error("Invalid data: {message}")]
    InvalidData { message: String },
}

impl ModbusError {
    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io { message: message.into() }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Create an invalid address error
    pub fn invalid_address(start: u16, count: u16) -> Self {
        Self::InvalidAddress { start, count }
    }

    /// Create an invalid data error
    pub fn invalid_data<S: Into<String>>(message: S) -> Self {
        Self::InvalidData { message: message.into() }
    }
}

impl From<std::io::Error> for ModbusError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}
