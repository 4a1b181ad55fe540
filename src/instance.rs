//! Modbus slave instance
//!
//! The instance ties the user-declared descriptor tables, the host callbacks
//! and the per-device diagnostic state together. It is the single mutable
//! entity in the engine: descriptor tables are borrowed immutably for the
//! instance lifetime, and one request is processed at a time.

use crate::coil::CoilDescriptor;
use crate::error::{ModbusError, ModbusResult};
use crate::file::FileDescriptor;
use crate::pdu::PduWriter;
use crate::protocol::{
    comm_event, PduResult, SlaveId, MAX_SLAVE_ADDRESS, MIN_SLAVE_ADDRESS,
};
use crate::register::RegisterDescriptor;

/// Custom function-code fallback
///
/// Invoked for function codes the engine does not handle itself (e.g. 0x11
/// Report Slave ID) or whose descriptor table is absent. Receives the full
/// request PDU (function code first) and the response writer positioned after
/// the echoed function code.
pub type HandleFnCallback<'a> = Box<dyn Fn(&[u8], &mut PduWriter<'_>) -> PduResult + 'a>;

/// Serial-line configuration and host hooks
pub struct SerialConfig<'a> {
    /// Slave address of this device on the bus, 1-247
    pub slave_address: SlaveId,
    /// Also answer requests to the non-standard default response address 0xF8
    pub respond_to_default_address: bool,
    /// FC 0x07 source; the function code is only served when present
    pub read_exception_status: Option<Box<dyn Fn() -> u8 + 'a>>,
    /// Diagnostic register source for FC 0x08 sub 0x02
    pub read_diagnostic_register: Option<Box<dyn Fn() -> u16 + 'a>>,
    /// Diagnostic register reset hook for FC 0x08 sub 0x0A
    pub reset_diagnostic_register: Option<Box<dyn Fn() + 'a>>,
    /// Restart request hook for FC 0x08 sub 0x01. The restart should be
    /// queued; the response is sent before the device goes down.
    pub request_restart: Option<Box<dyn Fn() + 'a>>,
}

impl Default for SerialConfig<'_> {
    fn default() -> Self {
        Self {
            slave_address: MIN_SLAVE_ADDRESS,
            respond_to_default_address: false,
            read_exception_status: None,
            read_diagnostic_register: None,
            reset_diagnostic_register: None,
            request_restart: None,
        }
    }
}

/// Per-device diagnostic state: counters, status word, event ring buffer
pub(crate) struct DiagnosticState {
    pub is_listen_only: bool,
    pub status: u16,
    pub comm_event_counter: u16,

    pub event_log: [u8; comm_event::LOG_LEN],
    pub event_log_write_pos: usize,
    pub event_log_count: usize,

    pub bus_msg_counter: u16,
    pub bus_comm_err_counter: u16,
    pub exception_counter: u16,
    pub msg_counter: u16,
    pub no_resp_counter: u16,
    pub nak_counter: u16,
    pub busy_counter: u16,
    pub bus_char_overrun_counter: u16,

    /// ASCII end-of-frame character, set through FC 0x08 sub 0x03
    pub ascii_delimiter: u8,
}

impl Default for DiagnosticState {
    fn default() -> Self {
        Self {
            is_listen_only: false,
            status: 0,
            comm_event_counter: 0,
            event_log: [0; comm_event::LOG_LEN],
            event_log_write_pos: 0,
            event_log_count: 0,
            bus_msg_counter: 0,
            bus_comm_err_counter: 0,
            exception_counter: 0,
            msg_counter: 0,
            no_resp_counter: 0,
            nak_counter: 0,
            busy_counter: 0,
            bus_char_overrun_counter: 0,
            ascii_delimiter: b'\n',
        }
    }
}

/// Snapshot of the diagnostic counters, as read back by FC 0x08
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiagnosticCounters {
    pub bus_message_count: u16,
    pub bus_comm_error_count: u16,
    pub exception_count: u16,
    pub server_message_count: u16,
    pub no_response_count: u16,
    pub nak_count: u16,
    pub busy_count: u16,
    pub bus_char_overrun_count: u16,
    pub comm_event_count: u16,
}

/// A Modbus slave device instance
///
/// Descriptor tables may be absent (`None`); the matching function codes are
/// then routed to the `handle_fn` fallback or answered with Illegal Function.
/// All tables must obey the sorting invariants checked by
/// [`validate`](Self::validate).
#[derive(Default)]
pub struct ModbusSlave<'a> {
    /// Read/write single-bit values, FC 0x01/0x05/0x0F
    pub coils: Option<&'a [CoilDescriptor<'a>]>,
    /// Read-only single-bit values, FC 0x02
    pub discrete_inputs: Option<&'a [CoilDescriptor<'a>]>,
    /// Read/write 16-bit values, FC 0x03/0x06/0x10/0x16/0x17
    pub holding_registers: Option<&'a [RegisterDescriptor<'a>]>,
    /// Read-only 16-bit values, FC 0x04
    pub input_registers: Option<&'a [RegisterDescriptor<'a>]>,
    /// File records, FC 0x14/0x15
    pub files: Option<&'a [FileDescriptor<'a>]>,

    /// Serial-line configuration and diagnostic hooks
    pub serial: SerialConfig<'a>,

    /// Emit multi-word *input* register values with swapped 16-bit word
    /// order, for legacy masters. Holding registers are never swapped.
    pub swap_words: bool,
    /// Accept file record numbers above 0x270F
    pub allow_extended_records: bool,

    /// Fallback for unhandled function codes
    pub handle_fn: Option<HandleFnCallback<'a>>,
    /// Invoked once after all coil writes of a request have succeeded
    pub commit_coils_write: Option<Box<dyn Fn() + 'a>>,
    /// Invoked once after all register writes of a request have succeeded
    pub commit_regs_write: Option<Box<dyn Fn() + 'a>>,

    pub(crate) state: DiagnosticState,
}

impl<'a> ModbusSlave<'a> {
    /// Create an empty instance with default state
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the device is currently in listen-only mode
    pub fn is_listen_only(&self) -> bool {
        self.state.is_listen_only
    }

    /// Device status word reported by FC 0x0B/0x0C
    pub fn status(&self) -> u16 {
        self.state.status
    }

    /// Set the device status word reported by FC 0x0B/0x0C
    pub fn set_status(&mut self, status: u16) {
        self.state.status = status;
    }

    /// Current ASCII end-of-frame delimiter
    pub fn ascii_delimiter(&self) -> u8 {
        self.state.ascii_delimiter
    }

    /// Record a receive character overrun reported by the host transport
    ///
    /// Feeds the counter behind diagnostics sub-function 0x12.
    pub fn note_char_overrun(&mut self) {
        self.state.bus_char_overrun_counter = self.state.bus_char_overrun_counter.wrapping_add(1);
    }

    /// Snapshot the diagnostic counters
    pub fn diagnostic_counters(&self) -> DiagnosticCounters {
        DiagnosticCounters {
            bus_message_count: self.state.bus_msg_counter,
            bus_comm_error_count: self.state.bus_comm_err_counter,
            exception_count: self.state.exception_counter,
            server_message_count: self.state.msg_counter,
            no_response_count: self.state.no_resp_counter,
            nak_count: self.state.nak_counter,
            busy_count: self.state.busy_counter,
            bus_char_overrun_count: self.state.bus_char_overrun_counter,
            comm_event_count: self.state.comm_event_counter,
        }
    }

    /// Communication event bytes, newest first
    pub fn comm_event_log(&self) -> Vec<u8> {
        let state = &self.state;
        (0..state.event_log_count)
            .map(|i| {
                let ix = (state.event_log_write_pos + comm_event::LOG_LEN - 1 - i)
                    % comm_event::LOG_LEN;
                state.event_log[ix]
            })
            .collect()
    }

    /// Append an event byte to the communication event ring buffer
    pub(crate) fn add_comm_event(&mut self, event: u8) {
        let state = &mut self.state;
        state.event_log[state.event_log_write_pos] = event;
        state.event_log_write_pos = (state.event_log_write_pos + 1) % comm_event::LOG_LEN;
        if state.event_log_count < comm_event::LOG_LEN {
            state.event_log_count += 1;
        }
    }

    /// Zero every diagnostic counter
    pub(crate) fn reset_comm_counters(&mut self) {
        let state = &mut self.state;
        state.comm_event_counter = 0;
        state.bus_msg_counter = 0;
        state.bus_comm_err_counter = 0;
        state.exception_counter = 0;
        state.msg_counter = 0;
        state.no_resp_counter = 0;
        state.nak_counter = 0;
        state.busy_counter = 0;
        state.bus_char_overrun_counter = 0;
    }

    /// Whether a received slave/unit address selects this device
    pub(crate) fn accepts_address(&self, addr: u8) -> bool {
        addr == self.serial.slave_address
            || addr == crate::protocol::BROADCAST_ADDRESS
            || (self.serial.respond_to_default_address
                && addr == crate::protocol::DEFAULT_RESPONSE_ADDRESS)
    }

    /// Check the configuration invariants the engine relies on
    ///
    /// Tables must be sorted ascending without duplicate keys, multi-word
    /// registers must not be overlapped by their neighbours, the slave
    /// address must be in 1-247 and the ASCII delimiter in 0-127. The request
    /// path does not re-check any of this.
    pub fn validate(&self) -> ModbusResult<()> {
        if self.serial.slave_address < MIN_SLAVE_ADDRESS
            || self.serial.slave_address > MAX_SLAVE_ADDRESS
        {
            return Err(ModbusError::configuration(format!(
                "slave address {} outside 1-247",
                self.serial.slave_address
            )));
        }
        if self.state.ascii_delimiter > 0x7F {
            return Err(ModbusError::configuration("ASCII delimiter above 0x7F"));
        }

        if let Some(coils) = self.coils {
            validate_coil_table("coils", coils)?;
        }
        if let Some(inputs) = self.discrete_inputs {
            validate_coil_table("discrete inputs", inputs)?;
        }
        if let Some(regs) = self.holding_registers {
            validate_register_table("holding registers", regs)?;
        }
        if let Some(regs) = self.input_registers {
            validate_register_table("input registers", regs)?;
        }
        if let Some(files) = self.files {
            let mut prev: Option<u16> = None;
            for file in files {
                if prev.is_some_and(|p| p >= file.file_number) {
                    return Err(ModbusError::configuration(format!(
                        "file table not sorted at file {}",
                        file.file_number
                    )));
                }
                prev = Some(file.file_number);
                validate_register_table(
                    &format!("file {} records", file.file_number),
                    file.records,
                )?;
            }
        }

        Ok(())
    }
}

fn validate_coil_table(name: &str, coils: &[CoilDescriptor<'_>]) -> ModbusResult<()> {
    let mut prev: Option<u16> = None;
    for coil in coils {
        if prev.is_some_and(|p| p >= coil.address) {
            return Err(ModbusError::configuration(format!(
                "{} table not sorted at address {}",
                name, coil.address
            )));
        }
        prev = Some(coil.address);
    }
    Ok(())
}

fn validate_register_table(name: &str, regs: &[RegisterDescriptor<'_>]) -> ModbusResult<()> {
    let mut next_free: Option<u32> = None;
    for reg in regs {
        if next_free.is_some_and(|free| u32::from(reg.address) < free) {
            return Err(ModbusError::configuration(format!(
                "{} table not sorted or overlapping at address {}",
                name, reg.address
            )));
        }
        next_free = Some(u32::from(reg.address) + reg.word_span() as u32);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register::{RegisterRead, RegisterType, RegisterValue};

    #[test]
    fn test_event_ring_wraps_and_saturates() {
        let mut slave = ModbusSlave::new();
        for i in 0..70u8 {
            slave.add_comm_event(i);
        }

        let log = slave.comm_event_log();
        assert_eq!(log.len(), comm_event::LOG_LEN);
        // Newest first: 69, 68, ... down to 6
        assert_eq!(log[0], 69);
        assert_eq!(log[63], 6);
    }

    #[test]
    fn test_counters_reset() {
        let mut slave = ModbusSlave::new();
        slave.state.msg_counter = 3;
        slave.note_char_overrun();
        slave.reset_comm_counters();
        assert_eq!(slave.diagnostic_counters(), DiagnosticCounters::default());
    }

    #[test]
    fn test_address_filter() {
        let mut slave = ModbusSlave::new();
        slave.serial.slave_address = 17;
        assert!(slave.accepts_address(17));
        assert!(slave.accepts_address(0)); // broadcast
        assert!(!slave.accepts_address(0xF8));
        slave.serial.respond_to_default_address = true;
        assert!(slave.accepts_address(0xF8));
    }

    #[test]
    fn test_validate_rejects_unsorted_registers() {
        let regs = [
            RegisterDescriptor {
                address: 10,
                ty: RegisterType::U32,
                read: RegisterRead::Value(RegisterValue::U32(0)),
                ..Default::default()
            },
            // Overlaps the two words of the U32 above
            RegisterDescriptor {
                address: 11,
                ty: RegisterType::U16,
                read: RegisterRead::Value(RegisterValue::U16(0)),
                ..Default::default()
            },
        ];

        let slave = ModbusSlave { holding_registers: Some(&regs), ..Default::default() };
        assert!(slave.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_slave_address() {
        let mut slave = ModbusSlave::new();
        slave.serial.slave_address = 0;
        assert!(slave.validate().is_err());
        slave.serial.slave_address = 248;
        assert!(slave.validate().is_err());
        slave.serial.slave_address = 247;
        assert!(slave.validate().is_ok());
    }
}
