//! Serial line timing helpers
//!
//! The engine itself is timing-agnostic: the host transport detects frame
//! boundaries and hands over complete ADUs. These helpers give the host the
//! standard RTU silence intervals for that detection.

/// Transmission time of one serial character in microseconds
///
/// Assumes the standard 11-bit character: 1 start + 8 data + 1 parity + 1
/// stop bit.
pub fn character_time_us(baud: u32) -> u32 {
    const BITS_PER_CHAR: u32 = 11;
    BITS_PER_CHAR * 1_000_000 / baud
}

/// RTU inter-frame silence interval (3.5 character times) in microseconds
///
/// Clamped to a 1.75 ms floor; at high baud rates the strict 3.5-character
/// interval becomes too short to detect reliably.
pub fn inter_frame_gap_us(baud: u32) -> u32 {
    let gap = character_time_us(baud) * 35 / 10;
    gap.max(1750)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_character_time() {
        assert_eq!(character_time_us(9600), 1145);
        assert_eq!(character_time_us(115200), 95);
    }

    #[test]
    fn test_inter_frame_gap() {
        // 3.5 characters dominates at low baud rates
        assert_eq!(inter_frame_gap_us(9600), 4007);
        assert_eq!(inter_frame_gap_us(19200), 2002);
        // The floor dominates at high baud rates
        assert_eq!(inter_frame_gap_us(38400), 1750);
        assert_eq!(inter_frame_gap_us(115200), 1750);
    }
}
