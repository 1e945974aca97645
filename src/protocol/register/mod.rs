//! Register model and decoding
//!
//! A [`RegisterDescriptor`] says where a field lives and how its words are
//! interpreted; [`decode`] turns raw big-endian words into a [`Value`].

mod decode;
mod types;

pub use decode::{decode, decode_at, register_count, DecodeError, Reading, Value};
pub use types::{FunctionKind, RegisterDescriptor, RegisterMap, RegisterType, UNSCALED_UNITS};
