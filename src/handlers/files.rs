//! File record function handlers: FC 0x14, 0x15

use super::be16;
use crate::file::{find_file, FileDescriptor, FileReadStatus};
use crate::instance::ModbusSlave;
use crate::pdu::PduWriter;
use crate::protocol::{ExceptionCode, PduResult, MAX_PDU_DATA_SIZE};

/// Standard 6-byte file reference type; the only one defined
const REF_TYPE: u8 = 0x06;

/// Highest record number unless extended records are enabled
const MAX_RECORD_NO: u16 = 0x270F;

/// Sub-request layout: ref type (1) + file no (2) + record no (2) + record length (2)
const SUB_REQ_SIZE: usize = 7;

/// Function code + byte count
const REQ_HEADER_SIZE: usize = 2;

/// Largest read request/response byte count: the largest multiple of 7 that
/// fits the PDU data area
const READ_MAX_BYTE_COUNT: usize = 0xF5;

/// Largest write request byte count
const WRITE_MAX_BYTE_COUNT: usize = MAX_PDU_DATA_SIZE - REQ_HEADER_SIZE;

/// FC 0x14 Read File Record
///
/// All sub-requests are validated (shape, ranges, cumulative response size)
/// before any file is touched.
pub(crate) fn read_file_record(
    inst: &ModbusSlave<'_>,
    files: &[FileDescriptor<'_>],
    req: &[u8],
    res: &mut PduWriter<'_>,
) -> PduResult {
    if req.len() < REQ_HEADER_SIZE + SUB_REQ_SIZE {
        return Err(ExceptionCode::IllegalDataValue);
    }

    let byte_count = req[1] as usize;
    if byte_count < SUB_REQ_SIZE
        || byte_count > READ_MAX_BYTE_COUNT
        || byte_count != req.len() - REQ_HEADER_SIZE
        || byte_count % SUB_REQ_SIZE != 0
    {
        return Err(ExceptionCode::IllegalDataValue);
    }

    let n_sub_reqs = byte_count / SUB_REQ_SIZE;

    // Validate every sub-request and total up the response size
    let mut resp_byte_count = 0usize;
    for i in 0..n_sub_reqs {
        let p = REQ_HEADER_SIZE + i * SUB_REQ_SIZE;

        if req[p] != REF_TYPE {
            return Err(ExceptionCode::IllegalDataValue);
        }

        let file_no = be16(req, p + 1);
        let record_no = be16(req, p + 3);
        let record_length = be16(req, p + 5);

        if file_no == 0 {
            return Err(ExceptionCode::IllegalDataAddress);
        }
        if !inst.allow_extended_records && record_no > MAX_RECORD_NO {
            return Err(ExceptionCode::IllegalDataAddress);
        }
        if record_length == 0 {
            return Err(ExceptionCode::IllegalDataValue);
        }

        resp_byte_count += 2 + record_length as usize * 2; // sub-resp header + data
    }

    if resp_byte_count > READ_MAX_BYTE_COUNT {
        return Err(ExceptionCode::IllegalDataValue);
    }

    res.push(resp_byte_count as u8);

    for i in 0..n_sub_reqs {
        let p = REQ_HEADER_SIZE + i * SUB_REQ_SIZE;
        let file_no = be16(req, p + 1);
        let record_no = be16(req, p + 3);
        let record_length = be16(req, p + 5);

        let Some(file) = find_file(files, file_no) else {
            return Err(ExceptionCode::IllegalDataAddress);
        };

        res.push(1 + record_length as u8 * 2); // sub-response length
        res.push(REF_TYPE);

        match file.read_records(record_no, record_length, res) {
            FileReadStatus::Ok => {}
            FileReadStatus::IllegalAddress => return Err(ExceptionCode::IllegalDataAddress),
            FileReadStatus::DeviceError => return Err(ExceptionCode::ServerDeviceFailure),
        }
    }

    Ok(())
}

/// FC 0x15 Write File Record
///
/// Every record of every sub-request is checked writable before any write is
/// applied; the response echoes the request.
pub(crate) fn write_file_record(
    inst: &ModbusSlave<'_>,
    files: &[FileDescriptor<'_>],
    req: &[u8],
    res: &mut PduWriter<'_>,
) -> PduResult {
    // Shortest possible sub-request carries one record
    if req.len() < REQ_HEADER_SIZE + SUB_REQ_SIZE + 2 {
        return Err(ExceptionCode::IllegalDataValue);
    }

    let byte_count = req[1] as usize;
    if byte_count < SUB_REQ_SIZE + 2
        || byte_count > WRITE_MAX_BYTE_COUNT
        || byte_count != req.len() - REQ_HEADER_SIZE
    {
        return Err(ExceptionCode::IllegalDataValue);
    }

    // Validate the request and ensure every register of every file can be
    // written before writing anything
    let mut p = REQ_HEADER_SIZE;
    while p < REQ_HEADER_SIZE + byte_count {
        let remaining = REQ_HEADER_SIZE + byte_count - p;
        if remaining < SUB_REQ_SIZE + 2 {
            return Err(ExceptionCode::IllegalDataValue);
        }
        if req[p] != REF_TYPE {
            return Err(ExceptionCode::IllegalDataValue);
        }

        let file_no = be16(req, p + 1);
        let record_no = be16(req, p + 3);
        let record_length = be16(req, p + 5);

        if file_no == 0 {
            return Err(ExceptionCode::IllegalDataAddress);
        }
        if !inst.allow_extended_records && record_no > MAX_RECORD_NO {
            return Err(ExceptionCode::IllegalDataAddress);
        }
        if record_length == 0 || record_length as usize * 2 > remaining - SUB_REQ_SIZE {
            return Err(ExceptionCode::IllegalDataValue);
        }

        let Some(file) = find_file(files, file_no) else {
            return Err(ExceptionCode::IllegalDataAddress);
        };
        file.write_allowed(record_no, record_length)?;

        p += SUB_REQ_SIZE + record_length as usize * 2;
    }

    res.push(byte_count as u8);

    // Apply the writes, echoing each sub-request into the response
    let mut p = REQ_HEADER_SIZE;
    while p < REQ_HEADER_SIZE + byte_count {
        let file_no = be16(req, p + 1);
        let record_no = be16(req, p + 3);
        let record_length = be16(req, p + 5);
        let data = &req[p + SUB_REQ_SIZE..p + SUB_REQ_SIZE + record_length as usize * 2];

        let file = find_file(files, file_no).ok_or(ExceptionCode::ServerDeviceFailure)?;
        file.write_records(record_no, record_length, data)?;

        res.push(REF_TYPE);
        res.push_u16(file_no);
        res.push_u16(record_no);
        res.push_u16(record_length);
        res.extend_from_slice(data);

        p += SUB_REQ_SIZE + record_length as usize * 2;
    }

    if let Some(commit) = &inst.commit_regs_write {
        commit();
    }

    Ok(())
}
