//! Register function handlers: FC 0x03, 0x04, 0x06, 0x10, 0x16, 0x17

use super::be16;
use crate::instance::ModbusSlave;
use crate::pdu::PduWriter;
use crate::protocol::{
    ExceptionCode, ModbusFunction, PduResult, MAX_REGISTERS_PER_READ,
    MAX_REGISTERS_PER_READ_WRITE, MAX_REGISTERS_PER_WRITE,
};
use crate::register::{find_register, RegisterDescriptor, RegisterReadOutcome};

/// Read a run of `quantity` registers starting at `start_addr`
///
/// With `res: None` this is a dry run that validates access without
/// producing output. A missing or unreadable register after the first is
/// emitted as a zero word; a locked one is an addressing error.
fn read_run(
    regs: &[RegisterDescriptor<'_>],
    start_addr: u16,
    quantity: u16,
    mut res: Option<&mut PduWriter<'_>>,
    swap_words: bool,
) -> PduResult {
    if quantity == 0 || quantity > MAX_REGISTERS_PER_READ {
        return Err(ExceptionCode::IllegalDataValue);
    }
    if find_register(regs, start_addr).is_none() {
        return Err(ExceptionCode::IllegalDataAddress);
    }

    if let Some(res) = res.as_deref_mut() {
        res.push((quantity * 2) as u8); // byte count
    }

    let mut offset: u16 = 0;
    while offset < quantity {
        let addr = start_addr.wrapping_add(offset);
        let remaining = (quantity - offset) as usize;

        let Some(reg) = find_register(regs, addr) else {
            if let Some(res) = res.as_deref_mut() {
                res.push_u16(0x0000);
            }
            offset += 1;
            continue;
        };

        let outcome = match res.as_deref_mut() {
            Some(res) => {
                let outcome = reg.read(addr, remaining, Some(res.remaining_mut()), swap_words);
                if let RegisterReadOutcome::Words(n) = outcome {
                    res.advance(n * 2);
                }
                outcome
            }
            None => reg.read(addr, remaining, None, swap_words),
        };

        match outcome {
            RegisterReadOutcome::Words(n) => offset += n as u16,
            RegisterReadOutcome::NoAccess => {
                if let Some(res) = res.as_deref_mut() {
                    res.push_u16(0x0000);
                }
                offset += 1;
            }
            RegisterReadOutcome::Locked => return Err(ExceptionCode::IllegalDataAddress),
            RegisterReadOutcome::DeviceFailure => return Err(ExceptionCode::ServerDeviceFailure),
        }
    }

    Ok(())
}

/// Write a run of `quantity` registers; every target is validated before any
/// write happens
fn write_run(
    inst: &ModbusSlave<'_>,
    regs: &[RegisterDescriptor<'_>],
    start_addr: u16,
    quantity: u16,
    byte_count: u8,
    data: &[u8],
    res: Option<&mut PduWriter<'_>>,
) -> PduResult {
    if quantity == 0 || quantity > MAX_REGISTERS_PER_WRITE {
        return Err(ExceptionCode::IllegalDataValue);
    }
    if quantity * 2 != u16::from(byte_count) {
        return Err(ExceptionCode::IllegalDataValue);
    }

    // Ensure every register exists and accepts this write before writing
    // anything; advances by each descriptor's actual word count
    let mut offset: u16 = 0;
    while offset < quantity {
        let addr = start_addr.wrapping_add(offset);
        let Some(reg) = find_register(regs, addr) else {
            return Err(ExceptionCode::IllegalDataAddress);
        };
        let n = reg.write_allowed(addr, (quantity - offset) as usize);
        if n == 0 {
            return Err(ExceptionCode::IllegalDataAddress);
        }
        offset += n as u16;
    }

    let mut offset: u16 = 0;
    while offset < quantity {
        let addr = start_addr.wrapping_add(offset);
        let reg = find_register(regs, addr).ok_or(ExceptionCode::ServerDeviceFailure)?;

        let n = reg.write(addr, (quantity - offset) as usize, &data[offset as usize * 2..])?;
        if n == 0 {
            return Err(ExceptionCode::ServerDeviceFailure);
        }

        if let Some(hook) = &reg.post_write {
            hook();
        }
        offset += n as u16;
    }

    if let Some(commit) = &inst.commit_regs_write {
        commit();
    }

    if let Some(res) = res {
        res.push_u16(start_addr);
        res.push_u16(quantity);
    }
    Ok(())
}

/// FC 0x03 Read Holding Registers / FC 0x04 Read Input Registers
pub(crate) fn read_registers(
    inst: &ModbusSlave<'_>,
    regs: &[RegisterDescriptor<'_>],
    req: &[u8],
    res: &mut PduWriter<'_>,
) -> PduResult {
    if req.len() != 5 {
        return Err(ExceptionCode::IllegalDataValue);
    }

    let start_addr = be16(req, 1);
    let quantity = be16(req, 3);

    // Word-order swapping is a legacy accommodation for input registers only
    let swap_words =
        inst.swap_words && req[0] == ModbusFunction::ReadInputRegisters.to_u8();

    read_run(regs, start_addr, quantity, Some(res), swap_words)
}

/// FC 0x06 Write Single Register
pub(crate) fn write_register(
    inst: &ModbusSlave<'_>,
    regs: &[RegisterDescriptor<'_>],
    req: &[u8],
    res: &mut PduWriter<'_>,
) -> PduResult {
    if req.len() != 5 {
        return Err(ExceptionCode::IllegalDataValue);
    }

    let addr = be16(req, 1);

    let Some(reg) = find_register(regs, addr) else {
        return Err(ExceptionCode::IllegalDataAddress);
    };
    if reg.write_allowed(addr, 1) != 1 {
        return Err(ExceptionCode::IllegalDataAddress);
    }

    let n = reg.write(addr, 1, &req[3..5])?;
    if n != 1 {
        return Err(ExceptionCode::ServerDeviceFailure);
    }

    if let Some(hook) = &reg.post_write {
        hook();
    }
    if let Some(commit) = &inst.commit_regs_write {
        commit();
    }

    res.extend_from_slice(&req[1..5]); // echo the request
    Ok(())
}

/// FC 0x10 Write Multiple Registers
pub(crate) fn write_registers(
    inst: &ModbusSlave<'_>,
    regs: &[RegisterDescriptor<'_>],
    req: &[u8],
    res: &mut PduWriter<'_>,
) -> PduResult {
    // fc + addr + quantity + byte count
    if req.len() < 6 {
        return Err(ExceptionCode::IllegalDataValue);
    }

    let start_addr = be16(req, 1);
    let quantity = be16(req, 3);
    let byte_count = req[5];

    if req.len() - 6 != byte_count as usize {
        return Err(ExceptionCode::IllegalDataValue);
    }

    write_run(inst, regs, start_addr, quantity, byte_count, &req[6..], Some(res))
}

/// FC 0x16 Mask Write Register
///
/// `value' = (value & and_mask) | (or_mask & !and_mask)`; the register must
/// be both readable and writable.
pub(crate) fn mask_write_register(
    inst: &ModbusSlave<'_>,
    regs: &[RegisterDescriptor<'_>],
    req: &[u8],
    res: &mut PduWriter<'_>,
) -> PduResult {
    if req.len() != 7 {
        return Err(ExceptionCode::IllegalDataValue);
    }

    let addr = be16(req, 1);
    let and_mask = be16(req, 3);
    let or_mask = be16(req, 5);

    let Some(reg) = find_register(regs, addr) else {
        return Err(ExceptionCode::IllegalDataAddress);
    };
    if reg.write_allowed(addr, 1) != 1 {
        return Err(ExceptionCode::IllegalDataAddress);
    }

    let mut current = [0u8; 2];
    match reg.read(addr, 1, Some(&mut current), false) {
        RegisterReadOutcome::Words(1) => {}
        RegisterReadOutcome::Words(_) | RegisterReadOutcome::Locked | RegisterReadOutcome::NoAccess => {
            return Err(ExceptionCode::IllegalDataAddress)
        }
        RegisterReadOutcome::DeviceFailure => return Err(ExceptionCode::ServerDeviceFailure),
    }

    let value = u16::from_be_bytes(current);
    let masked = (value & and_mask) | (or_mask & !and_mask);

    let n = reg.write(addr, 1, &masked.to_be_bytes())?;
    if n != 1 {
        return Err(ExceptionCode::ServerDeviceFailure);
    }

    if let Some(hook) = &reg.post_write {
        hook();
    }
    if let Some(commit) = &inst.commit_regs_write {
        commit();
    }

    res.extend_from_slice(&req[1..7]); // echo the request
    Ok(())
}

/// FC 0x17 Read/Write Multiple Registers
///
/// The write is performed before the read; the read is validated up front so
/// a locked or missing read range rejects the request before any write.
pub(crate) fn read_write_registers(
    inst: &ModbusSlave<'_>,
    regs: &[RegisterDescriptor<'_>],
    req: &[u8],
    res: &mut PduWriter<'_>,
) -> PduResult {
    // fc + read addr + read qty + write addr + write qty + write byte count
    if req.len() < 10 {
        return Err(ExceptionCode::IllegalDataValue);
    }

    let read_start = be16(req, 1);
    let read_quantity = be16(req, 3);
    let write_start = be16(req, 5);
    let write_quantity = be16(req, 7);
    let write_byte_count = req[9];

    if req.len() - 10 != write_byte_count as usize {
        return Err(ExceptionCode::IllegalDataValue);
    }
    if write_quantity > MAX_REGISTERS_PER_READ_WRITE {
        return Err(ExceptionCode::IllegalDataValue);
    }

    // Dry-run the read first so its locks and gaps reject the request
    // before any register is modified
    read_run(regs, read_start, read_quantity, None, false)?;

    write_run(inst, regs, write_start, write_quantity, write_byte_count, &req[10..], None)?;

    read_run(regs, read_start, read_quantity, Some(res), false)
}
