//! # Voltage Modbus Slave - Embedded-Style Modbus Server Engine
//!
//! **Author:** Evan Liu <evan.liu@voltageenergy.com>
//! **License:** MIT
//!
//! A transport-agnostic Modbus server (slave) engine in pure Rust. The host
//! transport delivers complete framed ADUs and sends back the produced
//! response buffer; the engine does the rest: framing validation (RTU, ASCII
//! and TCP/MBAP), PDU dispatch against a user-declared descriptor data model,
//! and the diagnostic counters plus communication event log the serial-line
//! function codes read back.
//!
//! ## Design
//!
//! - **Descriptor data model**: coils, discrete inputs, holding/input
//!   registers and file records are described by sorted tables the host
//!   declares once. Bindings are typed sums: fixed value, cell reference,
//!   block of cells, or callback, with optional lock predicates and
//!   post-write hooks.
//! - **Deterministic request path**: one fixed response buffer per call, no
//!   allocation while serving a request, multiple independent instances.
//! - **Single-owner instances**: an instance is driven by one executor at a
//!   time; descriptor tables are plain borrows, not synchronized handles.
//!
//! ## Supported Function Codes
//!
//! | Code | Function | Notes |
//! |------|----------|-------|
//! | 0x01 | Read Coils | |
//! | 0x02 | Read Discrete Inputs | |
//! | 0x03 | Read Holding Registers | |
//! | 0x04 | Read Input Registers | optional word-order swap |
//! | 0x05 | Write Single Coil | |
//! | 0x06 | Write Single Register | |
//! | 0x07 | Read Exception Status | via host callback |
//! | 0x08 | Diagnostics | sub-functions 0x00-0x04, 0x0A-0x12, 0x14 |
//! | 0x0B | Get Comm Event Counter | |
//! | 0x0C | Get Comm Event Log | |
//! | 0x0F | Write Multiple Coils | |
//! | 0x10 | Write Multiple Registers | |
//! | 0x11 | Report Slave ID | via `handle_fn` fallback |
//! | 0x14 | Read File Record | |
//! | 0x15 | Write File Record | |
//! | 0x16 | Mask Write Register | |
//! | 0x17 | Read/Write Multiple Registers | |
//!
//! ## Quick Start
//!
//! ```rust
//! use std::cell::Cell;
//! use voltage_modbus_slave::{
//!     ModbusSlave, RegisterDescriptor, RegisterRead, RegisterStorage, RegisterType,
//!     RegisterWrite,
//! };
//!
//! let setpoint = Cell::new(1500u16);
//! let registers = [RegisterDescriptor {
//!     address: 0x006B,
//!     ty: RegisterType::U16,
//!     read: RegisterRead::Ptr(RegisterStorage::U16(&setpoint)),
//!     write: RegisterWrite::Ptr(RegisterStorage::U16(&setpoint)),
//!     ..Default::default()
//! }];
//!
//! let mut slave = ModbusSlave::new();
//! slave.serial.slave_address = 17;
//! slave.holding_registers = Some(&registers);
//! slave.validate().unwrap();
//!
//! // Read Holding Registers, addr 0x006B, quantity 1, over RTU
//! let mut request = vec![0x11, 0x03, 0x00, 0x6B, 0x00, 0x01];
//! let crc = voltage_modbus_slave::crc16(&request);
//! request.extend_from_slice(&crc.to_le_bytes());
//!
//! let mut response = [0u8; 256];
//! let len = slave.handle_rtu_frame(&request, &mut response);
//! assert_eq!(&response[..3], &[0x11, 0x03, 0x02]);
//! assert_eq!(&response[3..5], &[0x05, 0xDC]); // 1500
//! # assert!(len > 0);
//! ```

pub mod ascii;
pub mod coil;
pub mod error;
pub mod file;
mod handlers;
pub mod instance;
pub mod pdu;
pub mod protocol;
pub mod register;
pub mod rtu;
pub mod tcp;
pub mod utils;

// Re-export main types for convenience
pub use ascii::calc_lrc;
pub use coil::{find_coil, CoilDescriptor, CoilRead, CoilReadState, CoilWrite, LockFn, PostWriteFn};
pub use error::{ModbusError, ModbusResult};
pub use file::{find_file, FileDescriptor, FileReadStatus};
pub use instance::{DiagnosticCounters, HandleFnCallback, ModbusSlave, SerialConfig};
pub use pdu::PduWriter;
pub use protocol::{
    comm_event, DiagSubFunction, ExceptionCode, ModbusFunction, PduResult,
    BROADCAST_ADDRESS, DEFAULT_RESPONSE_ADDRESS, MAX_ASCII_FRAME_SIZE, MAX_PDU_SIZE,
    MAX_RTU_FRAME_SIZE, MAX_TCP_FRAME_SIZE,
};
pub use register::{
    find_register, RegisterDescriptor, RegisterRead, RegisterReadOutcome, RegisterStorage,
    RegisterType, RegisterValue, RegisterWrite,
};
pub use rtu::crc16;

/// Descriptor tables longer than this are searched with binary search;
/// shorter ones scan linearly. Both yield identical results on sorted tables.
pub const BSEARCH_THRESHOLD: usize = 16;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
