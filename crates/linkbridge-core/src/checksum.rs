//! CRC-16/CCITT as used by the discovery protocol
//!
//! Polynomial 0x1021, initial value 0, MSB first, no final XOR
//! (the XMODEM parameter set).

const POLY: u16 = 0x1021;

/// Compute the checksum of `data`
pub fn crc16_ccitt(data: &[u8]) -> u16 {
    data.iter().fold(0u16, |crc, &byte| {
        let mut crc = crc ^ (u16::from(byte) << 8);
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ POLY
            } else {
                crc << 1
            };
        }
        crc
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_value() {
        // Standard check input for the XMODEM parameter set
        assert_eq!(crc16_ccitt(b"123456789"), 0x31C3);
    }

    #[test]
    fn test_empty_input_is_zero() {
        assert_eq!(crc16_ccitt(&[]), 0);
    }

    #[test]
    fn test_appending_checksum_yields_zero_residue() {
        let mut frame = b"discovery".to_vec();
        let crc = crc16_ccitt(&frame);
        frame.extend_from_slice(&crc.to_be_bytes());
        assert_eq!(crc16_ccitt(&frame), 0);
    }
}
