use rmodbus::{client::ModbusRequest, ModbusProto};

use crate::core::error::{EngineError, EngineResult};

pub fn generate_pull_get_inputs_request(
    id: u8,
    proto: ModbusProto,
    start_address: u16,
    count: u16,
) -> EngineResult<(ModbusRequest, Vec<u8>)> {
    let mut request = ModbusRequest::new(id, proto);
    let mut raw = Vec::with_capacity(12);
    request
        .generate_get_inputs(start_address, count, &mut raw)
        .map_err(|e| EngineError::config(format!("cannot build input read: {e:?}")))?;
    Ok((request, raw))
}

pub fn parse_pull_get_inputs(
    request: &ModbusRequest,
    proto: ModbusProto,
    response: &[u8],
    count: u16,
) -> EngineResult<Vec<u16>> {
    super::parse_register_response(request, proto, 0x04, response, count)
}
