//! Modbus register reads
//!
//! Request frames are generated with `rmodbus`; responses are framed by
//! [`read_modbus_frame`], checked for exceptions against a fixed description
//! table and validated by `rmodbus` before the words are unpacked.

mod exception;
mod frame;
mod header;
mod pull_get_holdings;
mod pull_get_inputs;

use rmodbus::{client::ModbusRequest, ModbusProto};

use crate::{
    core::error::{EngineError, EngineResult},
    protocol::{framed::checksum, register::FunctionKind},
};

pub use exception::{exception_description, EXCEPTION_FLAG};
pub use frame::read_modbus_frame;
pub use header::{remaining_response_len, response_prefix_len};
pub use pull_get_holdings::{generate_pull_get_holdings_request, parse_pull_get_holdings};
pub use pull_get_inputs::{generate_pull_get_inputs_request, parse_pull_get_inputs};

/// Largest register count a single 0x03/0x04 request may ask for.
pub const MAX_READ_REGISTERS: u16 = 125;

/// Generate a register read for a Modbus bank.
pub fn generate_read_request(
    kind: FunctionKind,
    id: u8,
    proto: ModbusProto,
    start_address: u16,
    count: u16,
) -> EngineResult<(ModbusRequest, Vec<u8>)> {
    match kind {
        FunctionKind::Holding => generate_pull_get_holdings_request(id, proto, start_address, count),
        FunctionKind::Input => generate_pull_get_inputs_request(id, proto, start_address, count),
        FunctionKind::State | FunctionKind::Config => Err(EngineError::config(format!(
            "{kind} is a framed block, not a Modbus bank"
        ))),
    }
}

/// Parse the response to a read generated by [`generate_read_request`].
pub fn parse_read_response(
    kind: FunctionKind,
    request: &ModbusRequest,
    proto: ModbusProto,
    response: &[u8],
    count: u16,
) -> EngineResult<Vec<u16>> {
    match kind {
        FunctionKind::Holding => parse_pull_get_holdings(request, proto, response, count),
        FunctionKind::Input => parse_pull_get_inputs(request, proto, response, count),
        FunctionKind::State | FunctionKind::Config => Err(EngineError::config(format!(
            "{kind} is a framed block, not a Modbus bank"
        ))),
    }
}

/// Validate a register read response and unpack its big-endian words.
fn parse_register_response(
    request: &ModbusRequest,
    proto: ModbusProto,
    function: u8,
    response: &[u8],
    count: u16,
) -> EngineResult<Vec<u16>> {
    let func_index = match proto {
        ModbusProto::Rtu => 1,
        _ => 7,
    };
    if response.len() < func_index + 2 {
        return Err(EngineError::framing(format!(
            "response too short: {} bytes",
            response.len()
        )));
    }

    if matches!(proto, ModbusProto::Rtu) {
        let body_end = response.len() - 2;
        let received = u16::from_le_bytes([response[body_end], response[body_end + 1]]);
        if received != checksum(&response[..body_end]) {
            return Err(EngineError::framing("RTU CRC mismatch"));
        }
    }

    let returned = response[func_index];
    if returned & EXCEPTION_FLAG != 0 {
        let code = response[func_index + 1];
        return Err(EngineError::Exception {
            code,
            description: exception_description(code),
        });
    }
    if returned != function {
        return Err(EngineError::communication(format!(
            "function code mismatch: expected 0x{:02X}, got 0x{:02X}",
            function, returned
        )));
    }

    request
        .parse_ok(response)
        .map_err(|e| EngineError::framing(format!("invalid response: {e:?}")))?;

    let byte_count = usize::from(response[func_index + 1]);
    let data_start = func_index + 2;
    let data_end = data_start + byte_count;
    if byte_count != usize::from(count) * 2 || data_end > response.len() {
        return Err(EngineError::framing(format!(
            "byte count mismatch: expected {}, got {}",
            usize::from(count) * 2,
            byte_count
        )));
    }

    Ok(response[data_start..data_end]
        .chunks_exact(2)
        .map(|chunk| u16::from_be_bytes([chunk[0], chunk[1]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rtu_frame(body: &[u8]) -> Vec<u8> {
        let mut frame = body.to_vec();
        let crc = checksum(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        frame
    }

    #[test]
    fn test_generate_holdings_request_rtu() {
        let (_, raw) = generate_read_request(FunctionKind::Holding, 1, ModbusProto::Rtu, 0, 10).unwrap();
        assert_eq!(raw, vec![0x01, 0x03, 0x00, 0x00, 0x00, 0x0A, 0xC5, 0xCD]);

        let (_, raw) = generate_read_request(FunctionKind::Input, 7, ModbusProto::Rtu, 0x10, 2).unwrap();
        assert_eq!(&raw[..6], &[0x07, 0x04, 0x00, 0x10, 0x00, 0x02]);
    }

    #[test]
    fn test_generate_rejects_framed_kind() {
        let err = generate_read_request(FunctionKind::State, 1, ModbusProto::Rtu, 0, 1).unwrap_err();
        assert!(matches!(err, EngineError::Config { .. }));
    }

    #[test]
    fn test_parse_holdings_response() {
        let (request, _) = generate_pull_get_holdings_request(1, ModbusProto::Rtu, 0, 2).unwrap();
        let response = rtu_frame(&[0x01, 0x03, 0x04, 0x00, 0x2A, 0xFF, 0xFF]);
        let values = parse_pull_get_holdings(&request, ModbusProto::Rtu, &response, 2).unwrap();
        assert_eq!(values, vec![42, 0xFFFF]);
    }

    #[test]
    fn test_parse_exception_response() {
        let (request, _) = generate_pull_get_inputs_request(1, ModbusProto::Rtu, 0, 2).unwrap();
        let response = rtu_frame(&[0x01, 0x84, 0x02]);
        let err = parse_pull_get_inputs(&request, ModbusProto::Rtu, &response, 2).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Exception {
                code: 0x02,
                description: "Illegal Data Address"
            }
        ));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_parse_rejects_bad_crc_and_short_payload() {
        let (request, _) = generate_pull_get_holdings_request(1, ModbusProto::Rtu, 0, 2).unwrap();

        let mut corrupted = rtu_frame(&[0x01, 0x03, 0x04, 0x00, 0x2A, 0xFF, 0xFF]);
        corrupted[4] ^= 0x01;
        assert!(matches!(
            parse_pull_get_holdings(&request, ModbusProto::Rtu, &corrupted, 2),
            Err(EngineError::Framing { .. })
        ));

        let short = rtu_frame(&[0x01, 0x03, 0x02, 0x00, 0x2A]);
        assert!(parse_pull_get_holdings(&request, ModbusProto::Rtu, &short, 2).is_err());
    }

    #[test]
    fn test_generate_holdings_request_tcp() {
        let (_, raw) = generate_read_request(FunctionKind::Holding, 1, ModbusProto::TcpUdp, 0x10, 2).unwrap();
        assert_eq!(
            raw,
            vec![0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x10, 0x00, 0x02]
        );
    }

    #[test]
    fn test_parse_holdings_response_tcp() {
        let (request, _) = generate_pull_get_holdings_request(1, ModbusProto::TcpUdp, 0, 2).unwrap();
        let response = [
            0x00, 0x01, 0x00, 0x00, 0x00, 0x07, 0x01, 0x03, 0x04, 0x00, 0x2A, 0xFF, 0xFF,
        ];
        let values = parse_pull_get_holdings(&request, ModbusProto::TcpUdp, &response, 2).unwrap();
        assert_eq!(values, vec![42, 0xFFFF]);
    }

    #[test]
    fn test_parse_exception_response_tcp() {
        let (request, _) = generate_pull_get_inputs_request(1, ModbusProto::TcpUdp, 0, 2).unwrap();
        let response = [0x00, 0x01, 0x00, 0x00, 0x00, 0x03, 0x01, 0x84, 0x02];
        let err = parse_pull_get_inputs(&request, ModbusProto::TcpUdp, &response, 2).unwrap_err();
        assert!(matches!(err, EngineError::Exception { code: 0x02, .. }));
    }

    #[test]
    fn test_parse_tcp_rejects_foreign_transaction() {
        let (request, _) = generate_pull_get_holdings_request(1, ModbusProto::TcpUdp, 0, 1).unwrap();
        let response = [0x00, 0x09, 0x00, 0x00, 0x00, 0x05, 0x01, 0x03, 0x02, 0x00, 0x2A];
        assert!(matches!(
            parse_pull_get_holdings(&request, ModbusProto::TcpUdp, &response, 1),
            Err(EngineError::Framing { .. })
        ));
    }
}
