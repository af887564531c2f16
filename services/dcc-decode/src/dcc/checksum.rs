//! Packet error detection
//!
//! Every DCC packet ends with the XOR of all preceding bytes. DCC-A
//! (RCN-218) packets additionally carry a CRC-8 (Dallas/Maxim polynomial)
//! before the XOR byte.

/// XOR of all bytes
pub fn xor_checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, b| acc ^ b)
}

/// CRC-8 contribution of each set bit, polynomial 0x31 reflected
const CRC8_BIT_TABLE: [u8; 8] = [0x5e, 0xbc, 0x61, 0xc2, 0x9d, 0x23, 0x46, 0x8c];

fn crc8_step(data: u8) -> u8 {
    CRC8_BIT_TABLE
        .iter()
        .enumerate()
        .filter(|(bit, _)| data & (1 << bit) != 0)
        .fold(0, |acc, (_, v)| acc ^ v)
}

/// CRC-8 over `bytes`
pub fn crc8(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |crc, &b| crc8_step(b ^ crc))
}
