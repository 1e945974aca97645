use std::collections::BTreeMap;

use super::{checksum, CRC_LEN, HEADER_LEN, PROTOCOL_TAG};

/// Validate and unpack a response frame into payload words indexed from 0.
///
/// Returns `None` unless the frame is exactly `expected_total_len` bytes long,
/// starts with the protocol tag, ends with a matching CRC16 and carries a
/// whole number of words. A frame that fails any check yields nothing at all.
pub fn parse_response(bytes: &[u8], expected_total_len: usize) -> Option<BTreeMap<u16, u16>> {
    if bytes.len() != expected_total_len || bytes.len() < HEADER_LEN + CRC_LEN {
        log::debug!(
            "Framed response length mismatch: expected {}, got {}",
            expected_total_len,
            bytes.len()
        );
        return None;
    }

    let tag = u16::from_be_bytes([bytes[0], bytes[1]]);
    if tag != PROTOCOL_TAG {
        log::debug!("Framed response tag mismatch: 0x{:04X}", tag);
        return None;
    }

    let body_end = bytes.len() - CRC_LEN;
    let received = u16::from_le_bytes([bytes[body_end], bytes[body_end + 1]]);
    let computed = checksum(&bytes[..body_end]);
    if received != computed {
        log::debug!(
            "Framed response CRC mismatch: received 0x{:04X}, computed 0x{:04X}",
            received,
            computed
        );
        return None;
    }

    let payload = &bytes[HEADER_LEN..body_end];
    if payload.len() % 2 != 0 {
        log::debug!("Framed response payload has odd length {}", payload.len());
        return None;
    }

    let words = payload
        .chunks_exact(2)
        .zip(0u16..)
        .map(|(chunk, index)| (index, u16::from_be_bytes([chunk[0], chunk[1]])))
        .collect();
    Some(words)
}
