use rmodbus::ModbusProto;
use std::io::Read;

use crate::core::error::EngineResult;

use super::{remaining_response_len, response_prefix_len};

/// Read one complete Modbus response frame from `port`.
///
/// The prefix is read first so the exact frame length is known; the port's
/// read timeout bounds every blocking read.
pub fn read_modbus_frame<R: Read + ?Sized>(port: &mut R, proto: ModbusProto) -> EngineResult<Vec<u8>> {
    let mut frame = vec![0u8; response_prefix_len(proto)];
    port.read_exact(&mut frame)?;

    let remaining = remaining_response_len(&frame, proto)?;
    let prefix_len = frame.len();
    frame.resize(prefix_len + remaining, 0);
    port.read_exact(&mut frame[prefix_len..])?;

    log::debug!(
        "Received Modbus response: {}",
        crate::utils::to_hex_string(&frame)
    );
    Ok(frame)
}
