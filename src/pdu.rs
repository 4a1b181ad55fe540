//! PDU dispatcher
//!
//! Routes a request PDU on its function code, runs the handler, and turns a
//! handler failure into the wire exception response. Maintains the
//! diagnostic counters and the communication event log while doing so.

use log::debug;

use crate::handlers;
use crate::instance::ModbusSlave;
use crate::protocol::{
    comm_event, DiagSubFunction, ExceptionCode, ModbusFunction, PduResult, EXCEPTION_FLAG,
    MAX_PDU_SIZE,
};

/// Response PDU under construction
///
/// Wraps the caller's response buffer with a write position. Handlers append
/// through it; the custom function fallback receives it to build vendor
/// responses. Writes beyond the buffer capacity panic, so hosts must respect
/// [`MAX_PDU_SIZE`].
pub struct PduWriter<'b> {
    buf: &'b mut [u8],
    len: usize,
}

impl<'b> PduWriter<'b> {
    /// Wrap an empty response buffer
    pub fn new(buf: &'b mut [u8]) -> Self {
        Self { buf, len: 0 }
    }

    /// Append a single byte
    pub fn push(&mut self, byte: u8) {
        self.buf[self.len] = byte;
        self.len += 1;
    }

    /// Append a big-endian word
    pub fn push_u16(&mut self, value: u16) {
        self.extend_from_slice(&value.to_be_bytes());
    }

    /// Append a run of bytes
    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        self.buf[self.len..self.len + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
    }

    /// Number of bytes written so far
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether nothing has been written yet
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The bytes written so far
    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Rewind (or fast-forward) the write position
    pub(crate) fn set_len(&mut self, len: usize) {
        self.len = len;
    }

    /// Overwrite an already-written byte
    pub(crate) fn set_byte(&mut self, ix: usize, byte: u8) {
        self.buf[ix] = byte;
    }

    /// OR bits into an already-written byte
    pub(crate) fn or_byte(&mut self, ix: usize, mask: u8) {
        self.buf[ix] |= mask;
    }

    /// The unwritten tail of the buffer
    pub(crate) fn remaining_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.len..]
    }

    /// Mark `n` bytes of the tail as written
    pub(crate) fn advance(&mut self, n: usize) {
        self.len += n;
    }
}

impl<'a> ModbusSlave<'a> {
    /// Process one request PDU and build the response PDU
    ///
    /// `req` starts at the function code byte; `res` must hold at least
    /// [`MAX_PDU_SIZE`] bytes. Returns the response length, or 0 when no
    /// response shall be sent (listen-only mode, malformed call).
    pub fn handle_request(&mut self, req: &[u8], res: &mut [u8]) -> usize {
        if req.is_empty() || req.len() > MAX_PDU_SIZE || res.len() < MAX_PDU_SIZE {
            return 0;
        }

        let mut send_event = comm_event::IS_SEND;

        let is_restart = req[0] == ModbusFunction::Diagnostics.to_u8()
            && req.len() >= 3
            && DiagSubFunction::from_u16(u16::from_be_bytes([req[1], req[2]]))
                == Some(DiagSubFunction::RestartCommsOption);

        // In listen-only mode nothing but a communications restart is handled
        if self.state.is_listen_only && !is_restart {
            send_event |= comm_event::SEND_LISTEN_ONLY;
            self.add_comm_event(send_event);
            return 0;
        }

        // Count of messages addressed to this device; not incremented for
        // requests swallowed by listen-only mode above
        self.state.msg_counter = self.state.msg_counter.wrapping_add(1);

        let was_listen_only = self.state.is_listen_only;

        let (status, ok_len) = {
            let mut writer = PduWriter::new(&mut res[..MAX_PDU_SIZE]);
            writer.push(req[0]); // echo the function code
            let status = self.dispatch(req, &mut writer);
            (status, writer.len())
        };

        let response_len = match status {
            Ok(()) => ok_len,
            Err(code) => {
                res[0] = req[0] | EXCEPTION_FLAG;
                res[1] = code.to_u8();

                if matches!(
                    code,
                    ExceptionCode::IllegalFunction
                        | ExceptionCode::IllegalDataAddress
                        | ExceptionCode::IllegalDataValue
                ) {
                    send_event |= comm_event::SEND_READ_EX;
                }
                if code == ExceptionCode::ServerDeviceFailure {
                    send_event |= comm_event::SEND_ABORT_EX;
                }
                if matches!(code, ExceptionCode::Acknowledge | ExceptionCode::ServerDeviceBusy) {
                    send_event |= comm_event::SEND_BUSY_EX;
                }
                if code == ExceptionCode::NegativeAcknowledge {
                    send_event |= comm_event::SEND_NAK_EX;
                }
                debug!("FC 0x{:02X} rejected: {}", req[0], code);
                2
            }
        };

        // Listen-only mode changes take effect after the reply, so the event
        // reports the state as of before this request
        if was_listen_only {
            send_event |= comm_event::SEND_LISTEN_ONLY;
        }

        // A restart that cleared the event log leaves it cleared
        let cleared_log = is_restart
            && status.is_ok()
            && req.len() >= 5
            && u16::from_be_bytes([req[3], req[4]]) == 0xFF00;
        if !cleared_log {
            self.add_comm_event(send_event);
        }

        // Diagnostic counters
        if status.is_ok()
            && !matches!(req[0], 0x08 | 0x0B | 0x0C)
        {
            self.state.comm_event_counter = self.state.comm_event_counter.wrapping_add(1);
        }
        match status {
            Ok(()) => {}
            Err(code) => {
                self.state.exception_counter = self.state.exception_counter.wrapping_add(1);
                if code == ExceptionCode::NegativeAcknowledge {
                    self.state.nak_counter = self.state.nak_counter.wrapping_add(1);
                }
                if code == ExceptionCode::ServerDeviceBusy {
                    self.state.busy_counter = self.state.busy_counter.wrapping_add(1);
                }
            }
        }

        // A device that is (or was, before this request) in listen-only mode
        // stays silent. The exception is a successful restart: it has already
        // brought the device out of listen-only mode and is acknowledged.
        if (was_listen_only || self.state.is_listen_only) && !(is_restart && status.is_ok()) {
            return 0;
        }

        response_len
    }

    /// Route a request to its function handler
    fn dispatch(&mut self, req: &[u8], res: &mut PduWriter<'_>) -> PduResult {
        let handled: Option<PduResult> = match ModbusFunction::from_u8(req[0]) {
            Some(ModbusFunction::ReadCoils) => {
                self.coils.map(|coils| handlers::bits::read_bits(coils, req, res))
            }
            Some(ModbusFunction::ReadDiscreteInputs) => self
                .discrete_inputs
                .map(|inputs| handlers::bits::read_bits(inputs, req, res)),
            Some(ModbusFunction::ReadHoldingRegisters) => self
                .holding_registers
                .map(|regs| handlers::regs::read_registers(self, regs, req, res)),
            Some(ModbusFunction::ReadInputRegisters) => self
                .input_registers
                .map(|regs| handlers::regs::read_registers(self, regs, req, res)),
            Some(ModbusFunction::WriteSingleCoil) => {
                self.coils.map(|coils| handlers::bits::write_bit(self, coils, req, res))
            }
            Some(ModbusFunction::WriteSingleRegister) => self
                .holding_registers
                .map(|regs| handlers::regs::write_register(self, regs, req, res)),
            Some(ModbusFunction::ReadExceptionStatus) => {
                if self.serial.read_exception_status.is_some() {
                    Some(handlers::serial::read_exception_status(self, req, res))
                } else {
                    None
                }
            }
            Some(ModbusFunction::Diagnostics) => {
                Some(handlers::diagnostics::diagnostics(self, req, res))
            }
            Some(ModbusFunction::CommEventCounter) => {
                Some(handlers::diagnostics::comm_event_counter(self, req, res))
            }
            Some(ModbusFunction::CommEventLog) => {
                Some(handlers::diagnostics::comm_event_log(self, req, res))
            }
            Some(ModbusFunction::WriteMultipleCoils) => {
                self.coils.map(|coils| handlers::bits::write_bits(self, coils, req, res))
            }
            Some(ModbusFunction::WriteMultipleRegisters) => self
                .holding_registers
                .map(|regs| handlers::regs::write_registers(self, regs, req, res)),
            Some(ModbusFunction::ReadFileRecord) => {
                self.files.map(|files| handlers::files::read_file_record(self, files, req, res))
            }
            Some(ModbusFunction::WriteFileRecord) => {
                self.files.map(|files| handlers::files::write_file_record(self, files, req, res))
            }
            Some(ModbusFunction::MaskWriteRegister) => self
                .holding_registers
                .map(|regs| handlers::regs::mask_write_register(self, regs, req, res)),
            Some(ModbusFunction::ReadWriteMultipleRegisters) => self
                .holding_registers
                .map(|regs| handlers::regs::read_write_registers(self, regs, req, res)),
            // Report Slave ID carries device-specific payloads
            Some(ModbusFunction::ReportSlaveId) | None => None,
        };

        match handled {
            Some(status) => status,
            None => match &self.handle_fn {
                Some(fallback) => fallback(req, res),
                None => Err(ExceptionCode::IllegalFunction),
            },
        }
    }
}
