use rmodbus::ModbusProto;

use crate::core::error::{EngineError, EngineResult};

use super::EXCEPTION_FLAG;

/// Bytes to read before the rest of a response can be sized.
pub fn response_prefix_len(proto: ModbusProto) -> usize {
    match proto {
        // unit id, function, byte count or exception code
        ModbusProto::Rtu => 3,
        // MBAP header plus function code
        _ => 8,
    }
}

/// Bytes still to read after `prefix`, which holds [`response_prefix_len`] bytes.
pub fn remaining_response_len(prefix: &[u8], proto: ModbusProto) -> EngineResult<usize> {
    if prefix.len() < response_prefix_len(proto) {
        return Err(EngineError::framing(format!(
            "response prefix too short ({} bytes)",
            prefix.len()
        )));
    }

    match proto {
        ModbusProto::Rtu => {
            if prefix[1] & EXCEPTION_FLAG != 0 {
                // exception code already read, CRC follows
                Ok(2)
            } else {
                Ok(usize::from(prefix[2]) + 2)
            }
        }
        _ => {
            let length = usize::from(u16::from_be_bytes([prefix[4], prefix[5]]));
            if !(2..=254).contains(&length) {
                return Err(EngineError::framing(format!(
                    "invalid MBAP length field {}",
                    length
                )));
            }
            // length counts unit id and function code, both already read
            Ok(length - 2)
        }
    }
}
