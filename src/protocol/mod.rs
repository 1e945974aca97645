//! Wire protocols and the pure parts of the engine
//!
//! - [`framed`]: the vendor framed binary protocol (CRC16, header checks)
//! - [`modbus`]: Modbus 0x03/0x04 register reads
//! - [`register`]: register descriptors and word decoding
//! - [`planner`]: read batching
//! - [`alerts`]: bitfield alert decoding

pub mod alerts;
pub mod framed;
pub mod modbus;
pub mod planner;
pub mod register;

pub use alerts::{decode_alerts, AlertGroup, AlertMap, AlertReport};
pub use planner::{plan, ReadGroup};
pub use register::{
    decode, register_count, DecodeError, FunctionKind, Reading, RegisterDescriptor, RegisterMap,
    RegisterType, Value,
};
