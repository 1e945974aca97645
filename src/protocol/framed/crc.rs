/// CRC16 with reflected polynomial 0xA001, initial value 0xFFFF, LSB-first.
///
/// This is the same checksum Modbus RTU uses; the framed protocol reuses it
/// without being Modbus itself. Callers append it little-endian.
pub fn checksum(bytes: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in bytes {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}
