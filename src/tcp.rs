//! Modbus TCP (MBAP) framing
//!
//! ADU format: `[txn_id:u16][proto_id:u16][length:u16][unit_id:u8][pdu]`,
//! all header fields big-endian. There is no integrity field; the TCP layer
//! provides it. The unit identifier is filtered like the serial slave
//! address and broadcast semantics apply identically.

use log::debug;

use crate::handlers::be16;
use crate::instance::ModbusSlave;
use crate::protocol::{
    comm_event, BROADCAST_ADDRESS, MAX_TCP_FRAME_SIZE, MBAP_HEADER_SIZE, MIN_TCP_FRAME_SIZE,
};

/// The only assigned MBAP protocol identifier (Modbus)
pub const MBAP_PROTOCOL_ID: u16 = 0x0000;

impl<'a> ModbusSlave<'a> {
    /// Process one received MBAP frame and build the response frame
    ///
    /// `req` is a complete ADU; `res` must hold at least
    /// [`MAX_TCP_FRAME_SIZE`] bytes. Returns the response frame length, or 0
    /// when nothing shall be sent.
    pub fn handle_tcp_frame(&mut self, req: &[u8], res: &mut [u8]) -> usize {
        if req.len() < MIN_TCP_FRAME_SIZE || req.len() > MAX_TCP_FRAME_SIZE {
            return 0;
        }
        if res.len() < MAX_TCP_FRAME_SIZE {
            return 0;
        }

        // Every structurally plausible frame counts as bus traffic
        self.state.bus_msg_counter = self.state.bus_msg_counter.wrapping_add(1);

        let mut recv_event = 0u8;
        if self.state.is_listen_only {
            recv_event |= comm_event::RECV_LISTEN_MODE;
        }

        let transaction_id = be16(req, 0);
        let protocol_id = be16(req, 2);
        let length = be16(req, 4);
        let unit_id = req[6];

        // Malformed headers are dropped without a Modbus exception
        if protocol_id != MBAP_PROTOCOL_ID || length as usize != req.len() - 6 {
            if recv_event != 0 {
                self.add_comm_event(comm_event::IS_RECV | recv_event);
            }
            debug!(
                "MBAP frame dropped: proto_id={protocol_id}, length={length}, total={}",
                req.len()
            );
            return 0;
        }

        if !self.accepts_address(unit_id) {
            if recv_event != 0 {
                self.add_comm_event(comm_event::IS_RECV | recv_event);
            }
            return 0;
        }

        if unit_id == BROADCAST_ADDRESS {
            recv_event |= comm_event::RECV_BROADCAST;
        }
        if recv_event != 0 {
            self.add_comm_event(comm_event::IS_RECV | recv_event);
        }

        let pdu_len =
            self.handle_request(&req[MBAP_HEADER_SIZE..], &mut res[MBAP_HEADER_SIZE..]);

        // Broadcasts are acted on but never answered
        if pdu_len == 0 || unit_id == BROADCAST_ADDRESS {
            self.state.no_resp_counter = self.state.no_resp_counter.wrapping_add(1);
            return 0;
        }

        // Echo the header with the response length
        res[0..2].copy_from_slice(&transaction_id.to_be_bytes());
        res[2..4].copy_from_slice(&MBAP_PROTOCOL_ID.to_be_bytes());
        res[4..6].copy_from_slice(&(1 + pdu_len as u16).to_be_bytes());
        res[6] = unit_id;

        MBAP_HEADER_SIZE + pdu_len
    }
}
