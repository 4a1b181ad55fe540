//! Coil and discrete input function handlers: FC 0x01, 0x02, 0x05, 0x0F

use super::be16;
use crate::coil::{find_coil, CoilDescriptor, CoilReadState};
use crate::instance::ModbusSlave;
use crate::pdu::PduWriter;
use crate::protocol::{ExceptionCode, PduResult, MAX_COILS_PER_READ, MAX_COILS_PER_WRITE};

/// Coil value encodings on the wire (FC 0x05)
const COIL_ON: u16 = 0xFF00;
const COIL_OFF: u16 = 0x0000;

/// FC 0x01 Read Coils / FC 0x02 Read Discrete Inputs
///
/// Bits are packed LSB-first per address. A missing or unreadable coil after
/// the first reads as 0; a missing first coil is an addressing error.
pub(crate) fn read_bits(
    coils: &[CoilDescriptor<'_>],
    req: &[u8],
    res: &mut PduWriter<'_>,
) -> PduResult {
    if req.len() != 5 {
        return Err(ExceptionCode::IllegalDataValue);
    }

    let start_addr = be16(req, 1);
    let quantity = be16(req, 3);

    if quantity == 0 || quantity > MAX_COILS_PER_READ {
        return Err(ExceptionCode::IllegalDataValue);
    }
    if find_coil(coils, start_addr).is_none() {
        return Err(ExceptionCode::IllegalDataAddress);
    }

    let byte_count = quantity.div_ceil(8) as usize;
    res.push(byte_count as u8);
    let bits_base = res.len();
    for _ in 0..byte_count {
        res.push(0);
    }

    for i in 0..quantity {
        let addr = start_addr.wrapping_add(i);
        let Some(coil) = find_coil(coils, addr) else {
            continue; // gap after the first coil reads as 0
        };
        match coil.read() {
            CoilReadState::On => res.or_byte(bits_base + (i / 8) as usize, 1 << (i % 8)),
            CoilReadState::Off | CoilReadState::NoAccess => {}
            CoilReadState::Locked => return Err(ExceptionCode::IllegalDataAddress),
            CoilReadState::DeviceFailure => return Err(ExceptionCode::ServerDeviceFailure),
        }
    }

    Ok(())
}

/// FC 0x05 Write Single Coil
pub(crate) fn write_bit(
    inst: &ModbusSlave<'_>,
    coils: &[CoilDescriptor<'_>],
    req: &[u8],
    res: &mut PduWriter<'_>,
) -> PduResult {
    if req.len() != 5 {
        return Err(ExceptionCode::IllegalDataValue);
    }

    let addr = be16(req, 1);
    let value = be16(req, 3);

    if value != COIL_ON && value != COIL_OFF {
        return Err(ExceptionCode::IllegalDataValue);
    }

    let Some(coil) = find_coil(coils, addr) else {
        return Err(ExceptionCode::IllegalDataAddress);
    };
    if !coil.write_allowed() {
        return Err(ExceptionCode::IllegalDataAddress);
    }

    coil.write(value == COIL_ON)?;

    if let Some(hook) = &coil.post_write {
        hook();
    }
    if let Some(commit) = &inst.commit_coils_write {
        commit();
    }

    res.extend_from_slice(&req[1..5]); // echo the request
    Ok(())
}

/// FC 0x0F Write Multiple Coils
///
/// Every target coil must exist and be writable before anything is written.
pub(crate) fn write_bits(
    inst: &ModbusSlave<'_>,
    coils: &[CoilDescriptor<'_>],
    req: &[u8],
    res: &mut PduWriter<'_>,
) -> PduResult {
    // fc + addr + quantity + byte count + at least one data byte
    if req.len() < 7 {
        return Err(ExceptionCode::IllegalDataValue);
    }

    let start_addr = be16(req, 1);
    let quantity = be16(req, 3);
    let byte_count = req[5];

    if quantity == 0 || quantity > MAX_COILS_PER_WRITE {
        return Err(ExceptionCode::IllegalDataValue);
    }
    if u16::from(byte_count) != quantity.div_ceil(8) {
        return Err(ExceptionCode::IllegalDataValue);
    }
    if req.len() != 6 + byte_count as usize {
        return Err(ExceptionCode::IllegalDataValue);
    }

    // Ensure every coil exists and is writable before writing anything
    for i in 0..quantity {
        let addr = start_addr.wrapping_add(i);
        match find_coil(coils, addr) {
            Some(coil) if coil.write_allowed() => {}
            _ => return Err(ExceptionCode::IllegalDataAddress),
        }
    }

    for i in 0..quantity {
        let addr = start_addr.wrapping_add(i);
        let coil = find_coil(coils, addr).ok_or(ExceptionCode::ServerDeviceFailure)?;

        let value = req[6 + (i / 8) as usize] & (1 << (i % 8)) != 0;
        coil.write(value)?;

        if let Some(hook) = &coil.post_write {
            hook();
        }
    }

    if let Some(commit) = &inst.commit_coils_write {
        commit();
    }

    res.push_u16(start_addr);
    res.push_u16(quantity);
    Ok(())
}
