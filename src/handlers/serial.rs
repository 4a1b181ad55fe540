//! Serial-line function handlers: FC 0x07

use crate::instance::ModbusSlave;
use crate::pdu::PduWriter;
use crate::protocol::{ExceptionCode, PduResult};

/// FC 0x07 Read Exception Status
///
/// Served only when the host supplies the status callback; the dispatcher
/// routes the request to the custom function fallback otherwise.
pub(crate) fn read_exception_status(
    inst: &ModbusSlave<'_>,
    req: &[u8],
    res: &mut PduWriter<'_>,
) -> PduResult {
    let Some(read) = &inst.serial.read_exception_status else {
        return Err(ExceptionCode::ServerDeviceFailure);
    };

    if req.len() != 1 {
        return Err(ExceptionCode::IllegalDataValue);
    }

    res.push(read());
    Ok(())
}
