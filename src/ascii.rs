//! Modbus ASCII framing
//!
//! ADU format: `[':'][hex addr][hex pdu][hex lrc][CR][delimiter]`, two ASCII
//! hex characters per binary byte. The trailing delimiter defaults to LF and
//! is configurable through diagnostics sub-function 0x03. The LRC is the
//! two's complement of the byte sum, checked before the address filter like
//! the RTU CRC.

use log::debug;

use crate::instance::ModbusSlave;
use crate::protocol::{
    comm_event, BROADCAST_ADDRESS, MAX_ASCII_FRAME_SIZE, MAX_PDU_SIZE, MIN_ASCII_FRAME_SIZE,
};

/// Frame start character
pub const START_CHAR: u8 = b':';

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

/// Calculate the LRC of `data`: two's complement of the byte sum
pub fn calc_lrc(data: &[u8]) -> u8 {
    let sum = data.iter().fold(0u8, |acc, byte| acc.wrapping_add(*byte));
    sum.wrapping_neg()
}

fn hex_value(c: u8) -> u8 {
    match c {
        b'0'..=b'9' => c - b'0',
        b'A'..=b'F' => c - b'A' + 10,
        _ => c - b'a' + 10, // validated as a hex digit beforehand
    }
}

impl<'a> ModbusSlave<'a> {
    /// Process one received ASCII frame and build the response frame
    ///
    /// `req` is the complete character frame including start character and
    /// line ending; `res` must hold at least [`MAX_ASCII_FRAME_SIZE`] bytes.
    /// Returns the response frame length, or 0 when nothing shall be sent.
    pub fn handle_ascii_frame(&mut self, req: &[u8], res: &mut [u8]) -> usize {
        if req.len() < MIN_ASCII_FRAME_SIZE || req.len() > MAX_ASCII_FRAME_SIZE {
            return 0;
        }
        if res.len() < MAX_ASCII_FRAME_SIZE {
            return 0;
        }

        // Every structurally plausible frame counts as bus traffic
        self.state.bus_msg_counter = self.state.bus_msg_counter.wrapping_add(1);

        let mut recv_event = 0u8;
        if self.state.is_listen_only {
            recv_event |= comm_event::RECV_LISTEN_MODE;
        }

        // Frame shape: start char, CR + delimiter, and an even number of hex
        // characters in between
        if req[0] != START_CHAR
            || req[req.len() - 2] != b'\r'
            || req[req.len() - 1] != self.state.ascii_delimiter
            || (req.len() - 1) % 2 != 0
        {
            if recv_event != 0 {
                self.add_comm_event(comm_event::IS_RECV | recv_event);
            }
            return 0;
        }

        let hex_part = &req[1..req.len() - 2];
        if !hex_part.iter().all(u8::is_ascii_hexdigit) {
            if recv_event != 0 {
                self.add_comm_event(comm_event::IS_RECV | recv_event);
            }
            return 0;
        }

        // Decode the hex payload: slave address + PDU + LRC
        let mut request = [0u8; 2 + MAX_PDU_SIZE];
        let request_len = hex_part.len() / 2;
        for (i, pair) in hex_part.chunks_exact(2).enumerate() {
            request[i] = hex_value(pair[0]) * 16 + hex_value(pair[1]);
        }

        // Check the LRC before the slave address to monitor the health of
        // the whole bus, not just the traffic addressed to this device
        let received_lrc = request[request_len - 1];
        if received_lrc != calc_lrc(&request[..request_len - 1]) {
            self.state.bus_comm_err_counter = self.state.bus_comm_err_counter.wrapping_add(1);
            recv_event |= comm_event::RECV_COMM_ERR;
            self.add_comm_event(comm_event::IS_RECV | recv_event);
            debug!("ASCII frame dropped: LRC mismatch (got 0x{received_lrc:02X})");
            return 0;
        }

        let slave_addr = request[0];
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

        let mut response = [0u8; 1 + MAX_PDU_SIZE];
        response[0] = slave_addr;
        let pdu_len = self.handle_request(&request[1..request_len - 1], &mut response[1..]);

        // Broadcasts are acted on but never answered
        if pdu_len == 0 || slave_addr == BROADCAST_ADDRESS {
            self.state.no_resp_counter = self.state.no_resp_counter.wrapping_add(1);
            return 0;
        }

        // Re-encode the binary response as an ASCII frame
        let binary = &response[..1 + pdu_len];
        let mut res_len = 0;
        res[res_len] = START_CHAR;
        res_len += 1;
        for byte in binary {
            res[res_len] = HEX_DIGITS[(byte >> 4) as usize];
            res[res_len + 1] = HEX_DIGITS[(byte & 0x0F) as usize];
            res_len += 2;
        }
        let lrc = calc_lrc(binary);
        res[res_len] = HEX_DIGITS[(lrc >> 4) as usize];
        res[res_len + 1] = HEX_DIGITS[(lrc & 0x0F) as usize];
        res_len += 2;
        res[res_len] = b'\r';
        res[res_len + 1] = self.state.ascii_delimiter;
        res_len + 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lrc_known_vector() {
        // ":1103006B00037E" carries LRC 0x7E
        assert_eq!(calc_lrc(&[0x11, 0x03, 0x00, 0x6B, 0x00, 0x03]), 0x7E);
    }

    #[test]
    fn test_lrc_sum_is_zero_over_whole_payload() {
        let data = [0x11u8, 0x03, 0x00, 0x6B, 0x00, 0x03];
        let lrc = calc_lrc(&data);
        let total = data.iter().fold(lrc, |acc, b| acc.wrapping_add(*b));
        assert_eq!(total, 0);
    }

    #[test]
    fn test_hex_value() {
        assert_eq!(hex_value(b'0'), 0);
        assert_eq!(hex_value(b'9'), 9);
        assert_eq!(hex_value(b'A'), 10);
        assert_eq!(hex_value(b'f'), 15);
    }
}
