use super::{checksum, ProtocolVersion, RequestKind, DEFAULT_TARGET_ADDRESS, PROTOCOL_TAG};

/// Build a read request for `kind` addressed to the default target.
pub fn build_request(kind: RequestKind, version: ProtocolVersion) -> Vec<u8> {
    build_request_to(kind, version, DEFAULT_TARGET_ADDRESS)
}

/// Build a read request for `kind` addressed to `target_address`.
///
/// The frame is the 8-byte header followed by its CRC16, 10 bytes total.
pub fn build_request_to(kind: RequestKind, version: ProtocolVersion, target_address: u16) -> Vec<u8> {
    let payload_bytes = kind.payload_words(version) * 2;

    let mut frame = Vec::with_capacity(10);
    frame.extend_from_slice(&PROTOCOL_TAG.to_be_bytes());
    frame.extend_from_slice(&kind.command_code().to_be_bytes());
    frame.extend_from_slice(&target_address.to_be_bytes());
    frame.extend_from_slice(&payload_bytes.to_be_bytes());

    let crc = checksum(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    frame
}
