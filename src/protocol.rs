//! Modbus protocol definitions shared by the PDU engine and the framing layers
//!
//! Function codes, exception codes, diagnostic sub-functions, the
//! communication-event byte layout and the frame size limits all live here.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Modbus address type (0-65535)
pub type ModbusAddress = u16;

/// Modbus slave/unit identifier (1-247)
pub type SlaveId = u8;

/// Maximum PDU data size (PDU minus the function code byte)
pub const MAX_PDU_DATA_SIZE: usize = 252;

/// Maximum PDU size (function code + data)
pub const MAX_PDU_SIZE: usize = 1 + MAX_PDU_DATA_SIZE;

/// Minimum RTU ADU size: `[addr][fc][crc16]`
pub const MIN_RTU_FRAME_SIZE: usize = 4;

/// Maximum RTU ADU size: `[addr][pdu:253][crc16]`
pub const MAX_RTU_FRAME_SIZE: usize = 256;

/// Minimum ASCII ADU size in characters
pub const MIN_ASCII_FRAME_SIZE: usize = 11;

/// Maximum ASCII ADU size in characters: `[:][hex addr+pdu+lrc][CR][delim]`
pub const MAX_ASCII_FRAME_SIZE: usize = 513;

/// Minimum TCP ADU size: MBAP header + function code
pub const MIN_TCP_FRAME_SIZE: usize = 8;

/// Maximum TCP ADU size: MBAP header + PDU
pub const MAX_TCP_FRAME_SIZE: usize = 260;

/// MBAP header size in bytes
pub const MBAP_HEADER_SIZE: usize = 7;

/// Broadcast slave address: all slaves act, none reply
pub const BROADCAST_ADDRESS: u8 = 0;

/// Non-standard "default response" address, answered only when enabled.
/// Useful for identifying devices on a bus with unknown addressing.
pub const DEFAULT_RESPONSE_ADDRESS: u8 = 0xF8;

/// Lowest valid configured slave address
pub const MIN_SLAVE_ADDRESS: u8 = 1;

/// Highest valid configured slave address
pub const MAX_SLAVE_ADDRESS: u8 = 247;

/// Maximum number of coils in a single read request (FC 0x01/0x02)
pub const MAX_COILS_PER_READ: u16 = 2000;

/// Maximum number of coils in a single write request (FC 0x0F)
pub const MAX_COILS_PER_WRITE: u16 = 1968;

/// Maximum number of registers in a single read request (FC 0x03/0x04)
pub const MAX_REGISTERS_PER_READ: u16 = 125;

/// Maximum number of registers in a single write request (FC 0x10)
pub const MAX_REGISTERS_PER_WRITE: u16 = 123;

/// Maximum number of registers written by FC 0x17 (the read side uses the read limit)
pub const MAX_REGISTERS_PER_READ_WRITE: u16 = 121;

/// Error flag OR-ed onto the function code in an exception response
pub const EXCEPTION_FLAG: u8 = 0x80;

/// Modbus function codes routed by the PDU dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ModbusFunction {
    /// Read Coils (0x01)
    ReadCoils = 0x01,
    /// Read Discrete Inputs (0x02)
    ReadDiscreteInputs = 0x02,
    /// Read Holding Registers (0x03)
    ReadHoldingRegisters = 0x03,
    /// Read Input Registers (0x04)
    ReadInputRegisters = 0x04,
    /// Write Single Coil (0x05)
    WriteSingleCoil = 0x05,
    /// Write Single Register (0x06)
    WriteSingleRegister = 0x06,
    /// Read Exception Status (0x07, serial only)
    ReadExceptionStatus = 0x07,
    /// Diagnostics (0x08, serial only)
    Diagnostics = 0x08,
    /// Get Comm Event Counter (0x0B, serial only)
    CommEventCounter = 0x0B,
    /// Get Comm Event Log (0x0C, serial only)
    CommEventLog = 0x0C,
    /// Write Multiple Coils (0x0F)
    WriteMultipleCoils = 0x0F,
    /// Write Multiple Registers (0x10)
    WriteMultipleRegisters = 0x10,
    /// Report Slave ID (0x11, left to the custom function fallback)
    ReportSlaveId = 0x11,
    /// Read File Record (0x14)
    ReadFileRecord = 0x14,
    /// Write File Record (0x15)
    WriteFileRecord = 0x15,
    /// Mask Write Register (0x16)
    MaskWriteRegister = 0x16,
    /// Read/Write Multiple Registers (0x17)
    ReadWriteMultipleRegisters = 0x17,
}

impl ModbusFunction {
    /// Convert from a raw function code byte
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(ModbusFunction::ReadCoils),
            0x02 => Some(ModbusFunction::ReadDiscreteInputs),
            0x03 => Some(ModbusFunction::ReadHoldingRegisters),
            0x04 => Some(ModbusFunction::ReadInputRegisters),
            0x05 => Some(ModbusFunction::WriteSingleCoil),
            0x06 => Some(ModbusFunction::WriteSingleRegister),
            0x07 => Some(ModbusFunction::ReadExceptionStatus),
            0x08 => Some(ModbusFunction::Diagnostics),
            0x0B => Some(ModbusFunction::CommEventCounter),
            0x0C => Some(ModbusFunction::CommEventLog),
            0x0F => Some(ModbusFunction::WriteMultipleCoils),
            0x10 => Some(ModbusFunction::WriteMultipleRegisters),
            0x11 => Some(ModbusFunction::ReportSlaveId),
            0x14 => Some(ModbusFunction::ReadFileRecord),
            0x15 => Some(ModbusFunction::WriteFileRecord),
            0x16 => Some(ModbusFunction::MaskWriteRegister),
            0x17 => Some(ModbusFunction::ReadWriteMultipleRegisters),
            _ => None,
        }
    }

    /// Convert to the raw function code byte
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for ModbusFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModbusFunction::ReadCoils => "Read Coils",
            ModbusFunction::ReadDiscreteInputs => "Read Discrete Inputs",
            ModbusFunction::ReadHoldingRegisters => "Read Holding Registers",
            ModbusFunction::ReadInputRegisters => "Read Input Registers",
            ModbusFunction::WriteSingleCoil => "Write Single Coil",
            ModbusFunction::WriteSingleRegister => "Write Single Register",
            ModbusFunction::ReadExceptionStatus => "Read Exception Status",
            ModbusFunction::Diagnostics => "Diagnostics",
            ModbusFunction::CommEventCounter => "Get Comm Event Counter",
            ModbusFunction::CommEventLog => "Get Comm Event Log",
            ModbusFunction::WriteMultipleCoils => "Write Multiple Coils",
            ModbusFunction::WriteMultipleRegisters => "Write Multiple Registers",
            ModbusFunction::ReportSlaveId => "Report Slave ID",
            ModbusFunction::ReadFileRecord => "Read File Record",
            ModbusFunction::WriteFileRecord => "Write File Record",
            ModbusFunction::MaskWriteRegister => "Mask Write Register",
            ModbusFunction::ReadWriteMultipleRegisters => "Read/Write Multiple Registers",
        };
        write!(f, "{} (0x{:02X})", name, *self as u8)
    }
}

/// Modbus exception codes
///
/// Handlers report failures as `Err(ExceptionCode)`; the dispatcher maps the
/// code straight into byte 1 of the exception response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ExceptionCode {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    ServerDeviceFailure = 0x04,
    Acknowledge = 0x05,
    ServerDeviceBusy = 0x06,
    NegativeAcknowledge = 0x07,
    MemoryParityError = 0x08,
}

/// Result of a PDU handler: `Ok(())` on success, otherwise the exception code
/// to put on the wire.
pub type PduResult = Result<(), ExceptionCode>;

impl ExceptionCode {
    /// Convert from the raw exception code byte
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(ExceptionCode::IllegalFunction),
            0x02 => Some(ExceptionCode::IllegalDataAddress),
            0x03 => Some(ExceptionCode::IllegalDataValue),
            0x04 => Some(ExceptionCode::ServerDeviceFailure),
            0x05 => Some(ExceptionCode::Acknowledge),
            0x06 => Some(ExceptionCode::ServerDeviceBusy),
            0x07 => Some(ExceptionCode::NegativeAcknowledge),
            0x08 => Some(ExceptionCode::MemoryParityError),
            _ => None,
        }
    }

    /// Convert to the raw exception code byte
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Get human-readable description
    pub fn description(self) -> &'static str {
        match self {
            ExceptionCode::IllegalFunction => "Function code is not recognized or allowed",
            ExceptionCode::IllegalDataAddress => "Data address of some or all the required entities is not allowed or does not exist",
            ExceptionCode::IllegalDataValue => "A value in the query data field is not an allowable value",
            ExceptionCode::ServerDeviceFailure => "Unrecoverable error occurred while performing the requested action",
            ExceptionCode::Acknowledge => "Request accepted, processing requires a long duration of time",
            ExceptionCode::ServerDeviceBusy => "Server is engaged in processing a long-duration command",
            ExceptionCode::NegativeAcknowledge => "Server cannot perform the programming function",
            ExceptionCode::MemoryParityError => "Server detected a parity error in memory",
        }
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Modbus exception 0x{:02X}: {}", self.to_u8(), self.description())
    }
}

/// Diagnostics (FC 0x08) sub-function codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum DiagSubFunction {
    /// Return Query Data (loopback)
    ReturnQueryData = 0x0000,
    /// Restart Communications Option
    RestartCommsOption = 0x0001,
    /// Return Diagnostic Register
    ReturnDiagnosticRegister = 0x0002,
    /// Change ASCII Input Delimiter
    ChangeAsciiDelimiter = 0x0003,
    /// Force Listen Only Mode
    ForceListenOnlyMode = 0x0004,
    /// Clear Counters and Diagnostic Register
    ClearCountersAndDiagRegister = 0x000A,
    /// Return Bus Message Count
    ReturnBusMessageCount = 0x000B,
    /// Return Bus Communication Error Count
    ReturnBusCommErrorCount = 0x000C,
    /// Return Bus Exception Error Count
    ReturnBusExceptionCount = 0x000D,
    /// Return Server Message Count
    ReturnServerMessageCount = 0x000E,
    /// Return Server No Response Count
    ReturnServerNoResponseCount = 0x000F,
    /// Return Server NAK Count
    ReturnServerNakCount = 0x0010,
    /// Return Server Busy Count
    ReturnServerBusyCount = 0x0011,
    /// Return Bus Character Overrun Count
    ReturnBusCharOverrunCount = 0x0012,
    /// Clear Overrun Counter and Flag
    ClearOverrunCounter = 0x0014,
}

impl DiagSubFunction {
    /// Convert from the raw sub-function word
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0000 => Some(DiagSubFunction::ReturnQueryData),
            0x0001 => Some(DiagSubFunction::RestartCommsOption),
            0x0002 => Some(DiagSubFunction::ReturnDiagnosticRegister),
            0x0003 => Some(DiagSubFunction::ChangeAsciiDelimiter),
            0x0004 => Some(DiagSubFunction::ForceListenOnlyMode),
            0x000A => Some(DiagSubFunction::ClearCountersAndDiagRegister),
            0x000B => Some(DiagSubFunction::ReturnBusMessageCount),
            0x000C => Some(DiagSubFunction::ReturnBusCommErrorCount),
            0x000D => Some(DiagSubFunction::ReturnBusExceptionCount),
            0x000E => Some(DiagSubFunction::ReturnServerMessageCount),
            0x000F => Some(DiagSubFunction::ReturnServerNoResponseCount),
            0x0010 => Some(DiagSubFunction::ReturnServerNakCount),
            0x0011 => Some(DiagSubFunction::ReturnServerBusyCount),
            0x0012 => Some(DiagSubFunction::ReturnBusCharOverrunCount),
            0x0014 => Some(DiagSubFunction::ClearOverrunCounter),
            _ => None,
        }
    }
}

/// Communication event log byte layout
///
/// Receive events carry [`IS_RECV`](comm_event::IS_RECV) (bit 7); send events
/// carry [`IS_SEND`](comm_event::IS_SEND) (bit 6) with bit 7 clear. The two
/// marker bytes `COMM_RESTART` and `ENTERED_LISTEN_ONLY` have neither flag.
pub mod comm_event {
    /// Event log ring buffer capacity
    pub const LOG_LEN: usize = 64;

    /// Receive event marker
    pub const IS_RECV: u8 = 1 << 7;
    /// Communication error (CRC/LRC mismatch) on receive
    pub const RECV_COMM_ERR: u8 = 1 << 1;
    /// Character overrun on receive
    pub const RECV_CHAR_OVERRUN: u8 = 1 << 4;
    /// Device was in listen-only mode on receive
    pub const RECV_LISTEN_MODE: u8 = 1 << 5;
    /// Broadcast received
    pub const RECV_BROADCAST: u8 = 1 << 6;

    /// Send event marker, requires bit 7 to be clear
    pub const IS_SEND: u8 = 1 << 6;
    /// Read exception sent (exception codes 1-3)
    pub const SEND_READ_EX: u8 = 1 << 0;
    /// Server abort exception sent (exception code 4)
    pub const SEND_ABORT_EX: u8 = 1 << 1;
    /// Server busy exception sent (exception codes 5-6)
    pub const SEND_BUSY_EX: u8 = 1 << 2;
    /// Server NAK exception sent (exception code 7)
    pub const SEND_NAK_EX: u8 = 1 << 3;
    /// Write timeout error occurred
    pub const SEND_WRITE_TIMEOUT: u8 = 1 << 4;
    /// Device was in listen-only mode
    pub const SEND_LISTEN_ONLY: u8 = 1 << 5;

    /// Communications restarted
    pub const COMM_RESTART: u8 = 0x00;
    /// Device entered listen-only mode
    pub const ENTERED_LISTEN_ONLY: u8 = 0x04;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_conversion() {
        assert_eq!(ModbusFunction::from_u8(0x03), Some(ModbusFunction::ReadHoldingRegisters));
        assert_eq!(ModbusFunction::ReadHoldingRegisters.to_u8(), 0x03);
        assert_eq!(ModbusFunction::from_u8(0x16), Some(ModbusFunction::MaskWriteRegister));
        assert_eq!(ModbusFunction::from_u8(0x62), None);
    }

    #[test]
    fn test_exception_conversion() {
        assert_eq!(ExceptionCode::from_u8(0x02), Some(ExceptionCode::IllegalDataAddress));
        assert_eq!(ExceptionCode::IllegalDataAddress.to_u8(), 0x02);
        assert_eq!(ExceptionCode::from_u8(0x09), None);
    }

    #[test]
    fn test_diag_sub_function_conversion() {
        assert_eq!(DiagSubFunction::from_u16(0x0001), Some(DiagSubFunction::RestartCommsOption));
        assert_eq!(DiagSubFunction::from_u16(0x0005), None); // reserved
        assert_eq!(DiagSubFunction::from_u16(0x0013), None); // reserved
    }

    #[test]
    fn test_event_bit_layout() {
        // A send exception event must never look like a receive event
        let ev = comm_event::IS_SEND | comm_event::SEND_READ_EX;
        assert_eq!(ev & comm_event::IS_RECV, 0);
        assert_eq!(ev, 0x41);
        assert_eq!(comm_event::IS_RECV | comm_event::RECV_BROADCAST, 0xC0);
    }
}
