//! Integration tests for the Modbus slave engine
//!
//! Drives the engine through the public entry points (PDU, RTU, ASCII and
//! TCP framing) against a small reference data model, including the
//! wire-level examples from the Modbus specification.

use std::cell::Cell;

use voltage_modbus_slave::{
    calc_lrc, comm_event, crc16, CoilDescriptor, CoilRead, CoilWrite, FileDescriptor,
    ModbusSlave, RegisterDescriptor, RegisterRead, RegisterStorage, RegisterType, RegisterValue,
    RegisterWrite,
};

/// Shared storage behind the test data model; leaked so tests can keep the
/// instance and the cells side by side without self-references
struct TestData {
    holding: &'static [Cell<u16>],
    coil_byte: &'static Cell<u8>,
    file3: &'static [Cell<u16>],
    file4: &'static [Cell<u16>],
}

/// A slave at address 17 with:
/// - writable holding registers 0x0010-0x0012 (cells, initially 0)
/// - constant holding registers 0x006B-0x006D reading 0x4242
/// - one input register 0x0000 reading 0x5678
/// - writable coils 0x0001, 0x0002 and 0x00AC (bits of one byte cell)
/// - one discrete input 0x0000, fixed ON
/// - file 3 with records 9, 10 and file 4 with records 1, 2
fn test_slave() -> (ModbusSlave<'static>, TestData) {
    let holding: &'static [Cell<u16>] =
        Box::leak(vec![Cell::new(0), Cell::new(0), Cell::new(0)].into_boxed_slice());
    let coil_byte: &'static Cell<u8> = Box::leak(Box::new(Cell::new(0)));
    let file3: &'static [Cell<u16>] =
        Box::leak(vec![Cell::new(0xDEAD), Cell::new(0xBEEF)].into_boxed_slice());
    let file4: &'static [Cell<u16>] =
        Box::leak(vec![Cell::new(0x1234), Cell::new(0xABCD)].into_boxed_slice());

    let mut holding_regs: Vec<RegisterDescriptor<'static>> = Vec::new();
    for (i, cell) in holding.iter().enumerate() {
        holding_regs.push(RegisterDescriptor {
            address: 0x0010 + i as u16,
            ty: RegisterType::U16,
            read: RegisterRead::Ptr(RegisterStorage::U16(cell)),
            write: RegisterWrite::Ptr(RegisterStorage::U16(cell)),
            ..Default::default()
        });
    }
    for addr in 0x006B..=0x006D {
        holding_regs.push(RegisterDescriptor {
            address: addr,
            ty: RegisterType::U16,
            read: RegisterRead::Value(RegisterValue::U16(0x4242)),
            ..Default::default()
        });
    }

    let input_regs: Vec<RegisterDescriptor<'static>> = vec![RegisterDescriptor {
        address: 0x0000,
        ty: RegisterType::U16,
        read: RegisterRead::Value(RegisterValue::U16(0x5678)),
        ..Default::default()
    }];

    let mut coils: Vec<CoilDescriptor<'static>> = Vec::new();
    for (bit, addr) in [(0u8, 0x0001u16), (1, 0x0002), (2, 0x00AC)] {
        coils.push(CoilDescriptor {
            address: addr,
            read: CoilRead::Bit { cell: coil_byte, bit },
            write: CoilWrite::Bit { cell: coil_byte, bit },
            ..Default::default()
        });
    }

    let discrete: Vec<CoilDescriptor<'static>> = vec![CoilDescriptor {
        address: 0x0000,
        read: CoilRead::Value(true),
        ..Default::default()
    }];

    fn file_records(cells: &'static [Cell<u16>], base: u16) -> Vec<RegisterDescriptor<'static>> {
        cells
            .iter()
            .enumerate()
            .map(|(i, cell)| RegisterDescriptor {
                address: base + i as u16,
                ty: RegisterType::U16,
                read: RegisterRead::Ptr(RegisterStorage::U16(cell)),
                write: RegisterWrite::Ptr(RegisterStorage::U16(cell)),
                ..Default::default()
            })
            .collect()
    }

    let files: Vec<FileDescriptor<'static>> = vec![
        FileDescriptor {
            file_number: 3,
            records: Box::leak(file_records(file3, 9).into_boxed_slice()),
        },
        FileDescriptor {
            file_number: 4,
            records: Box::leak(file_records(file4, 1).into_boxed_slice()),
        },
    ];

    let mut slave = ModbusSlave::new();
    slave.serial.slave_address = 17;
    slave.holding_registers = Some(Box::leak(holding_regs.into_boxed_slice()));
    slave.input_registers = Some(Box::leak(input_regs.into_boxed_slice()));
    slave.coils = Some(Box::leak(coils.into_boxed_slice()));
    slave.discrete_inputs = Some(Box::leak(discrete.into_boxed_slice()));
    slave.files = Some(Box::leak(files.into_boxed_slice()));
    slave.validate().unwrap();

    (slave, TestData { holding, coil_byte, file3, file4 })
}

fn rtu_frame(body: &[u8]) -> Vec<u8> {
    let mut frame = body.to_vec();
    frame.extend_from_slice(&crc16(body).to_le_bytes());
    frame
}

#[test]
fn rtu_read_holding_registers_reference_frame() {
    let (mut slave, _) = test_slave();

    // Reference frame from the Modbus specification: slave 17, read 3
    // holding registers from 0x006B
    let request = [0x11, 0x03, 0x00, 0x6B, 0x00, 0x03, 0x76, 0x87];
    let mut response = [0u8; 256];
    let len = slave.handle_rtu_frame(&request, &mut response);

    assert_eq!(len, 11);
    assert_eq!(&response[..3], &[0x11, 0x03, 0x06]);
    assert_eq!(&response[3..9], &[0x42; 6]);
    assert_eq!(&response[9..11], crc16(&response[..9]).to_le_bytes());
    assert_eq!(slave.diagnostic_counters().bus_message_count, 1);
    assert_eq!(slave.diagnostic_counters().server_message_count, 1);
}

#[test]
fn rtu_crc_mismatch_counts_bus_error_and_stays_silent() {
    let (mut slave, _) = test_slave();

    let mut request = rtu_frame(&[0x11, 0x03, 0x00, 0x6B, 0x00, 0x03]);
    request[3] ^= 0xFF; // corrupt the body, keep the trailer

    let mut response = [0u8; 256];
    assert_eq!(slave.handle_rtu_frame(&request, &mut response), 0);

    let counters = slave.diagnostic_counters();
    assert_eq!(counters.bus_message_count, 1);
    assert_eq!(counters.bus_comm_error_count, 1);
    assert_eq!(counters.server_message_count, 0);
    assert_eq!(
        slave.comm_event_log(),
        vec![comm_event::IS_RECV | comm_event::RECV_COMM_ERR]
    );
}

#[test]
fn rtu_other_slave_address_is_ignored() {
    let (mut slave, _) = test_slave();

    let request = rtu_frame(&[0x16, 0x03, 0x00, 0x6B, 0x00, 0x03]);
    let mut response = [0u8; 256];
    assert_eq!(slave.handle_rtu_frame(&request, &mut response), 0);

    let counters = slave.diagnostic_counters();
    assert_eq!(counters.bus_message_count, 1);
    assert_eq!(counters.server_message_count, 0);
}

#[test]
fn rtu_broadcast_is_processed_but_never_answered() {
    let (mut slave, data) = test_slave();

    // Broadcast Write Single Coil 0x0001 = ON
    let request = rtu_frame(&[0x00, 0x05, 0x00, 0x01, 0xFF, 0x00]);
    let mut response = [0u8; 256];
    assert_eq!(slave.handle_rtu_frame(&request, &mut response), 0);

    assert_eq!(data.coil_byte.get() & 0x01, 0x01); // the write happened
    let counters = slave.diagnostic_counters();
    assert_eq!(counters.no_response_count, 1);
    assert_eq!(counters.server_message_count, 1);
    // The receive event records the broadcast
    assert!(slave
        .comm_event_log()
        .contains(&(comm_event::IS_RECV | comm_event::RECV_BROADCAST)));
}

#[test]
fn rtu_framing_is_transparent_to_the_pdu() {
    let (mut slave, _) = test_slave();

    // Diagnostics loopback echoes the PDU byte for byte
    let pdu = [0x08, 0x00, 0x00, 0x12, 0x34];
    let request = rtu_frame(&[&[0x11u8][..], &pdu[..]].concat());
    let mut response = [0u8; 256];
    let len = slave.handle_rtu_frame(&request, &mut response);

    assert_eq!(len, 1 + pdu.len() + 2);
    assert_eq!(response[0], 0x11);
    assert_eq!(&response[1..1 + pdu.len()], &pdu);
}

#[test]
fn tcp_write_single_coil_reference_frame() {
    let (mut slave, data) = test_slave();

    // Reference frame from the Modbus specification: txn 1, unit 0x11,
    // write coil 0x00AC to ON
    let request = [0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x11, 0x05, 0x00, 0xAC, 0xFF, 0x00];
    let mut response = [0u8; 260];
    let len = slave.handle_tcp_frame(&request, &mut response);

    assert_eq!(&response[..len], &request); // echoed byte for byte
    assert_eq!(data.coil_byte.get() & 0x04, 0x04);
}

#[test]
fn tcp_rejects_bad_protocol_and_length() {
    let (mut slave, _) = test_slave();

    let mut response = [0u8; 260];

    // Wrong protocol id
    let request = [0x00, 0x01, 0x00, 0x01, 0x00, 0x06, 0x11, 0x05, 0x00, 0xAC, 0xFF, 0x00];
    assert_eq!(slave.handle_tcp_frame(&request, &mut response), 0);

    // Length field disagrees with the byte count
    let request = [0x00, 0x01, 0x00, 0x00, 0x00, 0x07, 0x11, 0x05, 0x00, 0xAC, 0xFF, 0x00];
    assert_eq!(slave.handle_tcp_frame(&request, &mut response), 0);

    // Both count as bus traffic, neither as a served message
    let counters = slave.diagnostic_counters();
    assert_eq!(counters.bus_message_count, 2);
    assert_eq!(counters.server_message_count, 0);
}

#[test]
fn ascii_read_holding_registers_reference_frame() {
    let (mut slave, _) = test_slave();

    let request = b":1103006B00037E\r\n";
    let mut response = [0u8; 513];
    let len = slave.handle_ascii_frame(request, &mut response);

    assert!(len > 0);
    let response = &response[..len];

    // ':' + hex(11 03 06 42x6) + hex LRC + CR LF
    assert_eq!(&response[..7], b":110306");
    assert_eq!(&response[7..19], b"424242424242");
    assert_eq!(&response[len - 2..], b"\r\n");

    // The trailer is the LRC of the binary payload
    let binary = [0x11, 0x03, 0x06, 0x42, 0x42, 0x42, 0x42, 0x42, 0x42];
    let lrc = calc_lrc(&binary);
    let expected = format!("{lrc:02X}");
    assert_eq!(&response[19..21], expected.as_bytes());
}

#[test]
fn ascii_delimiter_is_configurable() {
    let (mut slave, _) = test_slave();

    // Change the delimiter to ';' through diagnostics sub 0x03
    let pdu = [0x08, 0x00, 0x03, b';', 0x00];
    let mut response = [0u8; 253];
    let len = slave.handle_request(&pdu, &mut response);
    assert_eq!(&response[..len], &pdu);
    assert_eq!(slave.ascii_delimiter(), b';');

    // Frames ending in the old delimiter are dropped, new ones accepted
    let mut response = [0u8; 513];
    assert_eq!(slave.handle_ascii_frame(b":1103006B00037E\r\n", &mut response), 0);
    let len = slave.handle_ascii_frame(b":1103006B00037E\r;", &mut response);
    assert!(len > 0);
    assert_eq!(response[len - 1], b';');
}

#[test]
fn pdu_read_file_record_reference_frame() {
    let (mut slave, _) = test_slave();

    // Two sub-requests: file 4 records 1-2, file 3 records 9-10
    let request = [
        0x14, 0x0E, 0x06, 0x00, 0x04, 0x00, 0x01, 0x00, 0x02, 0x06, 0x00, 0x03, 0x00, 0x09,
        0x00, 0x02,
    ];
    let expected = [
        0x14, 0x0C, 0x05, 0x06, 0x12, 0x34, 0xAB, 0xCD, 0x05, 0x06, 0xDE, 0xAD, 0xBE, 0xEF,
    ];

    let mut response = [0u8; 253];
    let len = slave.handle_request(&request, &mut response);
    assert_eq!(&response[..len], &expected);
}

#[test]
fn pdu_write_file_record_echoes_and_applies() {
    let (mut slave, data) = test_slave();

    // Write 0x0102 0x0304 to file 4 records 1-2
    let request = [
        0x15, 0x0B, 0x06, 0x00, 0x04, 0x00, 0x01, 0x00, 0x02, 0x01, 0x02, 0x03, 0x04,
    ];
    let mut response = [0u8; 253];
    let len = slave.handle_request(&request, &mut response);

    assert_eq!(&response[..len], &request);
    assert_eq!(data.file4[0].get(), 0x0102);
    assert_eq!(data.file4[1].get(), 0x0304);
    assert_eq!(data.file3[0].get(), 0xDEAD); // untouched
}

#[test]
fn restart_with_clear_in_listen_only_mode() {
    let (mut slave, _) = test_slave();

    // Force listen-only mode; the request is processed but not answered
    let mut response = [0u8; 253];
    assert_eq!(slave.handle_request(&[0x08, 0x00, 0x04, 0x00, 0x00], &mut response), 0);
    assert!(slave.is_listen_only());

    // Anything else is ignored without touching the message counter
    let before = slave.diagnostic_counters().server_message_count;
    assert_eq!(slave.handle_request(&[0x03, 0x00, 0x6B, 0x00, 0x01], &mut response), 0);
    assert_eq!(slave.diagnostic_counters().server_message_count, before);
    assert_eq!(
        slave.comm_event_log()[0],
        comm_event::IS_SEND | comm_event::SEND_LISTEN_ONLY
    );

    // Restart with event log clear: leaves listen-only, answers, wipes state
    let restart = [0x08, 0x00, 0x01, 0xFF, 0x00];
    let len = slave.handle_request(&restart, &mut response);
    assert_eq!(&response[..len], &restart);
    assert!(!slave.is_listen_only());
    assert_eq!(slave.diagnostic_counters().server_message_count, 0);

    // The following event log read reports an empty log
    let len = slave.handle_request(&[0x0C], &mut response);
    assert_eq!(len, 8);
    assert_eq!(response[0], 0x0C);
    assert_eq!(response[1], 6); // byte count: status + counters only, no events
}

#[test]
fn write_multiple_registers_is_atomic_against_missing_targets() {
    let (mut slave, data) = test_slave();

    data.holding[2].set(0x7777);

    // Registers 0x0011, 0x0012 exist, 0x0013 does not
    let request = [
        0x10, 0x00, 0x11, 0x00, 0x03, 0x06, 0xAA, 0xAA, 0xBB, 0xBB, 0xCC, 0xCC,
    ];
    let mut response = [0u8; 253];
    let len = slave.handle_request(&request, &mut response);

    assert_eq!(&response[..len], &[0x90, 0x02]); // ILLEGAL_DATA_ADDR
    assert_eq!(data.holding[1].get(), 0); // nothing was written
    assert_eq!(data.holding[2].get(), 0x7777);
}

#[test]
fn write_then_read_round_trip() {
    let (mut slave, _) = test_slave();
    let mut response = [0u8; 253];

    // FC 0x06 write 0xBEEF to 0x0010, echoed
    let write = [0x06, 0x00, 0x10, 0xBE, 0xEF];
    let len = slave.handle_request(&write, &mut response);
    assert_eq!(&response[..len], &write);

    // FC 0x03 reads the value back
    let len = slave.handle_request(&[0x03, 0x00, 0x10, 0x00, 0x01], &mut response);
    assert_eq!(&response[..len], &[0x03, 0x02, 0xBE, 0xEF]);
}

#[test]
fn mask_write_register() {
    let (mut slave, data) = test_slave();
    let mut response = [0u8; 253];

    // Worked example from the Modbus specification: value 0x12, and 0xF2,
    // or 0x25 -> 0x17
    data.holding[0].set(0x0012);
    let request = [0x16, 0x00, 0x10, 0x00, 0xF2, 0x00, 0x25];
    let len = slave.handle_request(&request, &mut response);
    assert_eq!(&response[..len], &request);
    assert_eq!(data.holding[0].get(), 0x0017);

    // and=0xFFFF, or=0x0000 is the identity
    let request = [0x16, 0x00, 0x10, 0xFF, 0xFF, 0x00, 0x00];
    let len = slave.handle_request(&request, &mut response);
    assert_eq!(&response[..len], &request);
    assert_eq!(data.holding[0].get(), 0x0017);
}

#[test]
fn read_write_multiple_registers_writes_before_reading() {
    let (mut slave, _) = test_slave();
    let mut response = [0u8; 253];

    // Read 1 register at 0x0010 while writing 0x0D0A to it
    let request = [
        0x17, 0x00, 0x10, 0x00, 0x01, 0x00, 0x10, 0x00, 0x01, 0x02, 0x0D, 0x0A,
    ];
    let len = slave.handle_request(&request, &mut response);
    assert_eq!(&response[..len], &[0x17, 0x02, 0x0D, 0x0A]);
}

#[test]
fn unknown_function_code_without_fallback() {
    let (mut slave, _) = test_slave();
    let mut response = [0u8; 253];

    let len = slave.handle_request(&[0x62, 0x01, 0x02], &mut response);
    assert_eq!(&response[..len], &[0xE2, 0x01]);
    assert_eq!(slave.diagnostic_counters().exception_count, 1);
}

#[test]
fn report_slave_id_through_fallback() {
    let (mut slave, _) = test_slave();
    slave.handle_fn = Some(Box::new(|req, res| {
        if req[0] != 0x11 {
            return Err(voltage_modbus_slave::ExceptionCode::IllegalFunction);
        }
        res.push(2); // byte count
        res.push(0x42); // slave id
        res.push(0xFF); // run indicator
        Ok(())
    }));

    let mut response = [0u8; 253];
    let len = slave.handle_request(&[0x11], &mut response);
    assert_eq!(&response[..len], &[0x11, 0x02, 0x42, 0xFF]);
}

#[test]
fn diagnostics_counters_read_back() {
    let (mut slave, _) = test_slave();
    let mut response = [0u8; 256];

    // Two addressed RTU frames, one of them corrupted
    let good = rtu_frame(&[0x11, 0x03, 0x00, 0x6B, 0x00, 0x01]);
    assert!(slave.handle_rtu_frame(&good, &mut response) > 0);
    let mut bad = good.clone();
    bad[1] ^= 0x40;
    assert_eq!(slave.handle_rtu_frame(&bad, &mut response), 0);

    // Return Bus Message Count
    let len = slave.handle_request(&[0x08, 0x00, 0x0B, 0x00, 0x00], &mut response);
    assert_eq!(&response[..len], &[0x08, 0x00, 0x0B, 0x00, 0x02]);

    // Return Bus Communication Error Count
    let len = slave.handle_request(&[0x08, 0x00, 0x0C, 0x00, 0x00], &mut response);
    assert_eq!(&response[..len], &[0x08, 0x00, 0x0C, 0x00, 0x01]);
}

#[test]
fn comm_event_counter_tracks_completed_operations() {
    let (mut slave, _) = test_slave();
    let mut response = [0u8; 253];

    // A successful read increments the counter, diagnostics do not
    slave.handle_request(&[0x03, 0x00, 0x6B, 0x00, 0x01], &mut response);
    slave.handle_request(&[0x08, 0x00, 0x00, 0x00, 0x00], &mut response);

    let len = slave.handle_request(&[0x0B], &mut response);
    assert_eq!(len, 5);
    assert_eq!(&response[..1], &[0x0B]);
    assert_eq!(&response[3..5], &[0x00, 0x01]); // one completed operation
}

#[test]
fn read_discrete_inputs_and_input_registers() {
    let (mut slave, _) = test_slave();
    let mut response = [0u8; 253];

    let len = slave.handle_request(&[0x02, 0x00, 0x00, 0x00, 0x01], &mut response);
    assert_eq!(&response[..len], &[0x02, 0x01, 0x01]);

    let len = slave.handle_request(&[0x04, 0x00, 0x00, 0x00, 0x01], &mut response);
    assert_eq!(&response[..len], &[0x04, 0x02, 0x56, 0x78]);
}

#[test]
fn read_coils_zero_pads_gaps_after_the_first() {
    let (mut slave, data) = test_slave();
    data.coil_byte.set(0b0000_0011); // coils 0x0001 and 0x0002 ON

    // 0x0001..0x0004: two known coils, two gaps
    let mut response = [0u8; 253];
    let len = slave.handle_request(&[0x01, 0x00, 0x01, 0x00, 0x04], &mut response);
    assert_eq!(&response[..len], &[0x01, 0x01, 0b0000_0011]);

    // A missing first coil is an addressing error
    let len = slave.handle_request(&[0x01, 0x00, 0x03, 0x00, 0x02], &mut response);
    assert_eq!(&response[..len], &[0x81, 0x02]);
}

#[test]
fn quantity_limits_are_enforced() {
    let (mut slave, _) = test_slave();
    let mut response = [0u8; 253];

    // 126 holding registers is one too many
    let len = slave.handle_request(&[0x03, 0x00, 0x00, 0x00, 0x7E], &mut response);
    assert_eq!(&response[..len], &[0x83, 0x03]);

    // 2001 coils is one too many
    let len = slave.handle_request(&[0x01, 0x00, 0x00, 0x07, 0xD1], &mut response);
    assert_eq!(&response[..len], &[0x81, 0x03]);
}
