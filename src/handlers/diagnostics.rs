//! Diagnostic function handlers: FC 0x08, 0x0B, 0x0C

use super::be16;
use crate::instance::ModbusSlave;
use crate::pdu::PduWriter;
use crate::protocol::{comm_event, DiagSubFunction, ExceptionCode, PduResult};

/// FC 0x08 Diagnostics
///
/// The function code and sub-function are always echoed; each sub-function
/// appends its data word. Every sub-function except the loopback requires a
/// 5-byte PDU.
pub(crate) fn diagnostics(
    inst: &mut ModbusSlave<'_>,
    req: &[u8],
    res: &mut PduWriter<'_>,
) -> PduResult {
    if req.len() < 3 {
        return Err(ExceptionCode::IllegalDataValue);
    }

    // Echo the sub-function code (the function code is already in place)
    res.push(req[1]);
    res.push(req[2]);

    let Some(sub) = DiagSubFunction::from_u16(be16(req, 1)) else {
        return Err(ExceptionCode::IllegalFunction);
    };

    match sub {
        DiagSubFunction::ReturnQueryData => {
            // Echo the entire request PDU byte for byte
            res.set_len(0);
            res.extend_from_slice(req);
            Ok(())
        }
        DiagSubFunction::RestartCommsOption => restart_comms(inst, req, res),
        DiagSubFunction::ReturnDiagnosticRegister => {
            expect_data(req, 0x0000)?;
            let value = match &inst.serial.read_diagnostic_register {
                Some(read) => read(),
                None => 0,
            };
            res.push_u16(value);
            Ok(())
        }
        DiagSubFunction::ChangeAsciiDelimiter => {
            if req.len() != 5 {
                return Err(ExceptionCode::IllegalDataValue);
            }
            if req[3] > 127 || req[4] != 0 {
                return Err(ExceptionCode::IllegalDataValue);
            }
            inst.state.ascii_delimiter = req[3];
            res.push(req[3]);
            res.push(0);
            Ok(())
        }
        DiagSubFunction::ForceListenOnlyMode => {
            expect_data(req, 0x0000)?;
            inst.state.is_listen_only = true;
            inst.add_comm_event(comm_event::ENTERED_LISTEN_ONLY);
            // No data word; the dispatcher squelches the response anyway
            Ok(())
        }
        DiagSubFunction::ClearCountersAndDiagRegister => {
            expect_data(req, 0x0000)?;
            inst.reset_comm_counters();
            if let Some(reset) = &inst.serial.reset_diagnostic_register {
                reset();
            }
            res.push_u16(0x0000);
            Ok(())
        }
        DiagSubFunction::ReturnBusMessageCount => {
            read_counter(inst.state.bus_msg_counter, req, res)
        }
        DiagSubFunction::ReturnBusCommErrorCount => {
            read_counter(inst.state.bus_comm_err_counter, req, res)
        }
        DiagSubFunction::ReturnBusExceptionCount => {
            read_counter(inst.state.exception_counter, req, res)
        }
        DiagSubFunction::ReturnServerMessageCount => {
            read_counter(inst.state.msg_counter, req, res)
        }
        DiagSubFunction::ReturnServerNoResponseCount => {
            read_counter(inst.state.no_resp_counter, req, res)
        }
        DiagSubFunction::ReturnServerNakCount => read_counter(inst.state.nak_counter, req, res),
        DiagSubFunction::ReturnServerBusyCount => read_counter(inst.state.busy_counter, req, res),
        DiagSubFunction::ReturnBusCharOverrunCount => {
            read_counter(inst.state.bus_char_overrun_counter, req, res)
        }
        DiagSubFunction::ClearOverrunCounter => {
            expect_data(req, 0x0000)?;
            inst.state.bus_char_overrun_counter = 0;
            res.push_u16(0x0000);
            Ok(())
        }
    }
}

/// 0x01 Restart Communications Option
///
/// Leaves listen-only mode, resets every counter, and with data 0xFF00 also
/// clears the event log. Any queued restart happens after the reply.
fn restart_comms(inst: &mut ModbusSlave<'_>, req: &[u8], res: &mut PduWriter<'_>) -> PduResult {
    if req.len() != 5 {
        return Err(ExceptionCode::IllegalDataValue);
    }

    let data = be16(req, 3);
    if data != 0x0000 && data != 0xFF00 {
        return Err(ExceptionCode::IllegalDataValue);
    }

    if let Some(restart) = &inst.serial.request_restart {
        restart();
    }
    inst.state.is_listen_only = false;
    inst.reset_comm_counters();

    if data == 0xFF00 {
        inst.state.event_log_write_pos = 0;
        inst.state.event_log_count = 0;
    } else {
        inst.add_comm_event(comm_event::COMM_RESTART);
    }

    res.push_u16(data);
    Ok(())
}

/// Shared tail of the counter-returning sub-functions
fn read_counter(value: u16, req: &[u8], res: &mut PduWriter<'_>) -> PduResult {
    expect_data(req, 0x0000)?;
    res.push_u16(value);
    Ok(())
}

/// Require a 5-byte PDU whose data word equals `expected`
fn expect_data(req: &[u8], expected: u16) -> PduResult {
    if req.len() != 5 || be16(req, 3) != expected {
        return Err(ExceptionCode::IllegalDataValue);
    }
    Ok(())
}

/// FC 0x0B Get Comm Event Counter
pub(crate) fn comm_event_counter(
    inst: &ModbusSlave<'_>,
    req: &[u8],
    res: &mut PduWriter<'_>,
) -> PduResult {
    if req.len() != 1 {
        return Err(ExceptionCode::IllegalDataValue);
    }

    res.push_u16(inst.state.status);
    res.push_u16(inst.state.comm_event_counter);
    Ok(())
}

/// FC 0x0C Get Comm Event Log
///
/// Status, event counter and bus message counter followed by the event
/// bytes, newest first.
pub(crate) fn comm_event_log(
    inst: &ModbusSlave<'_>,
    req: &[u8],
    res: &mut PduWriter<'_>,
) -> PduResult {
    if req.len() != 1 {
        return Err(ExceptionCode::IllegalDataValue);
    }

    let state = &inst.state;
    res.push(6 + state.event_log_count as u8);
    res.push_u16(state.status);
    res.push_u16(state.comm_event_counter);
    res.push_u16(state.bus_msg_counter);

    for i in 0..state.event_log_count {
        let ix = (state.event_log_write_pos + comm_event::LOG_LEN - 1 - i) % comm_event::LOG_LEN;
        res.push(state.event_log[ix]);
    }

    Ok(())
}
