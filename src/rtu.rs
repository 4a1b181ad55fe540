//! Modbus RTU framing
//!
//! ADU format: `[slave_addr][pdu][crc16]` with the CRC transmitted low byte
//! first. The framer filters by slave address, checks the CRC before the
//! address so bus-wide errors are counted even when the frame is for another
//! device, and suppresses replies to broadcasts.

use crc::{Crc, CRC_16_MODBUS};
use log::debug;

use crate::instance::ModbusSlave;
use crate::protocol::{
    comm_event, BROADCAST_ADDRESS, MAX_RTU_FRAME_SIZE, MIN_RTU_FRAME_SIZE,
};

const CRC_MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Calculate the Modbus CRC-16 of `data`
pub fn crc16(data: &[u8]) -> u16 {
    CRC_MODBUS.checksum(data)
}

impl<'a> ModbusSlave<'a> {
    /// Process one received RTU frame and build the response frame
    ///
    /// `req` is a complete ADU as delimited by the host's 3.5-character
    /// silence detection; `res` must hold at least [`MAX_RTU_FRAME_SIZE`]
    /// bytes. Returns the response frame length, or 0 when nothing shall be
    /// sent (not addressed to us, integrity failure, broadcast, listen-only).
    pub fn handle_rtu_frame(&mut self, req: &[u8], res: &mut [u8]) -> usize {
        if req.len() < MIN_RTU_FRAME_SIZE || req.len() > MAX_RTU_FRAME_SIZE {
            return 0;
        }
        if res.len() < MAX_RTU_FRAME_SIZE {
            return 0;
        }

        // Every structurally plausible frame counts as bus traffic
        self.state.bus_msg_counter = self.state.bus_msg_counter.wrapping_add(1);

        let mut recv_event = 0u8;
        if self.state.is_listen_only {
            recv_event |= comm_event::RECV_LISTEN_MODE;
        }

        // Check the CRC before the slave address to monitor the health of
        // the whole bus, not just the traffic addressed to this device
        let crc_pos = req.len() - 2;
        let received_crc = u16::from_le_bytes([req[crc_pos], req[crc_pos + 1]]);
        if received_crc != crc16(&req[..crc_pos]) {
            self.state.bus_comm_err_counter = self.state.bus_comm_err_counter.wrapping_add(1);
            recv_event |= comm_event::RECV_COMM_ERR;
            self.add_comm_event(comm_event::IS_RECV | recv_event);
            debug!("RTU frame dropped: CRC mismatch (got 0x{received_crc:04X})");
            return 0;
        }

        let slave_addr = req[0];
        if !self.accepts_address(slave_addr) {
            if recv_event != 0 {
                self.add_comm_event(comm_event::IS_RECV | recv_event);
            }
            return 0;
        }

        if slave_addr == BROADCAST_ADDRESS {
            recv_event |= comm_event::RECV_BROADCAST;
        }
        if recv_event != 0 {
            self.add_comm_event(comm_event::IS_RECV | recv_event);
        }

        let pdu_len = self.handle_request(&req[1..crc_pos], &mut res[1..]);

        // Broadcasts are acted on but never answered
        if pdu_len == 0 || slave_addr == BROADCAST_ADDRESS {
            self.state.no_resp_counter = self.state.no_resp_counter.wrapping_add(1);
            return 0;
        }

        res[0] = slave_addr;
        let frame_len = 1 + pdu_len;
        let crc = crc16(&res[..frame_len]);
        res[frame_len..frame_len + 2].copy_from_slice(&crc.to_le_bytes());
        frame_len + 2
    }
}
