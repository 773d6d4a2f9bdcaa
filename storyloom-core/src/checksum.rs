//! CRC-32 helpers used for stored-row checksums and content-derived ids.

/// Basic CRC-32 (ISO 3309 / ITU-T V.42) computation.
#[must_use]
pub fn crc32_compute(data: &[u8]) -> u32 {
    const POLY: u32 = 0xEDB8_8320;
    let mut crc: u32 = 0xFFFF_FFFF;
    for &byte in data {
        crc ^= u32::from(byte);
        for _ in 0..8 {
            if crc & 1 == 1 {
                crc = (crc >> 1) ^ POLY;
            } else {
                crc >>= 1;
            }
        }
    }
    !crc
}

/// CRC-32 of `data` as eight lowercase hex characters.
#[must_use]
pub fn crc32_hex(data: &[u8]) -> String {
    format!("{:08x}", crc32_compute(data))
}
