//! File record descriptors
//!
//! A file is a numbered, sorted series of register descriptors addressed by
//! record number. Files are accessed through FC 0x14/0x15; each record is one
//! 16-bit word unless a multi-word register descriptor covers it.

use crate::pdu::PduWriter;
use crate::protocol::{ExceptionCode, PduResult};
use crate::register::{find_register, RegisterDescriptor, RegisterReadOutcome};
use crate::BSEARCH_THRESHOLD;

/// Descriptor for one Modbus file
///
/// File tables must be sorted by `file_number` ascending without duplicates,
/// and each record table follows the register table sorting rules.
pub struct FileDescriptor<'a> {
    /// Modbus file number; valid range 1-9999, extended range up to 65535
    pub file_number: u16,
    /// Register descriptors backing this file's records
    pub records: &'a [RegisterDescriptor<'a>],
}

/// Outcome of reading a run of file records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileReadStatus {
    Ok,
    /// The first requested record does not exist
    IllegalAddress,
    DeviceError,
}

/// Find the file descriptor for `file_number`
///
/// Linear scan for small tables, binary search above [`BSEARCH_THRESHOLD`]
/// entries.
pub fn find_file<'a, 'b>(
    files: &'b [FileDescriptor<'a>],
    file_number: u16,
) -> Option<&'b FileDescriptor<'a>> {
    if files.len() > BSEARCH_THRESHOLD {
        files
            .binary_search_by_key(&file_number, |file| file.file_number)
            .ok()
            .map(|ix| &files[ix])
    } else {
        files.iter().find(|file| file.file_number == file_number)
    }
}

impl<'a> FileDescriptor<'a> {
    /// Read `record_length` words starting at `record_no` into `res`
    ///
    /// A missing, locked or unreadable record after the first is emitted as
    /// two zero bytes; a missing first record aborts with `IllegalAddress`.
    pub(crate) fn read_records(
        &self,
        record_no: u16,
        record_length: u16,
        res: &mut PduWriter<'_>,
    ) -> FileReadStatus {
        if find_register(self.records, record_no).is_none() {
            return FileReadStatus::IllegalAddress;
        }

        let mut offset: u16 = 0;
        while offset < record_length {
            let addr = record_no.wrapping_add(offset);
            let remaining = (record_length - offset) as usize;

            match find_register(self.records, addr) {
                Some(reg) => match reg.read(addr, remaining, Some(res.remaining_mut()), false) {
                    RegisterReadOutcome::Words(n) => {
                        res.advance(n * 2);
                        offset += n as u16;
                    }
                    RegisterReadOutcome::Locked | RegisterReadOutcome::NoAccess => {
                        res.push_u16(0x0000);
                        offset += 1;
                    }
                    RegisterReadOutcome::DeviceFailure => return FileReadStatus::DeviceError,
                },
                None => {
                    res.push_u16(0x0000);
                    offset += 1;
                }
            }
        }

        FileReadStatus::Ok
    }

    /// Check that every word of the run resolves to a writable record
    pub(crate) fn write_allowed(&self, record_no: u16, record_length: u16) -> PduResult {
        let mut offset: u16 = 0;
        while offset < record_length {
            let addr = record_no.wrapping_add(offset);
            let remaining = (record_length - offset) as usize;

            let Some(reg) = find_register(self.records, addr) else {
                return Err(ExceptionCode::IllegalDataAddress);
            };
            let n = reg.write_allowed(addr, remaining);
            if n == 0 {
                return Err(ExceptionCode::IllegalDataAddress);
            }
            offset += n as u16;
        }

        Ok(())
    }

    /// Write the run; must be preceded by [`write_allowed`](Self::write_allowed)
    ///
    /// Per-record post-write hooks run as each record lands. A failing write
    /// aborts the remaining records.
    pub(crate) fn write_records(&self, record_no: u16, record_length: u16, val: &[u8]) -> PduResult {
        let mut offset: u16 = 0;
        while offset < record_length {
            let addr = record_no.wrapping_add(offset);
            let remaining = (record_length - offset) as usize;

            let Some(reg) = find_register(self.records, addr) else {
                return Err(ExceptionCode::ServerDeviceFailure);
            };
            let n = reg.write(addr, remaining, &val[offset as usize * 2..])?;
            if n == 0 {
                return Err(ExceptionCode::ServerDeviceFailure);
            }

            if let Some(hook) = &reg.post_write {
                hook();
            }
            offset += n as u16;
        }

        Ok(())
    }
}
