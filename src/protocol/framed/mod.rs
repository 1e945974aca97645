//! Vendor framed binary protocol
//!
//! Every frame is an 8-byte big-endian header followed by a payload of
//! big-endian words and a little-endian CRC16 over everything before it:
//!
//! ```text
//! offset 0  u16  protocol tag (0x8851)
//! offset 2  u16  command code
//! offset 4  u16  target address
//! offset 6  u16  payload size in bytes
//! offset 8  ..   payload words
//! end-2     u16  CRC16 (little-endian)
//! ```
//!
//! Requests carry no payload: the size field announces how many bytes the
//! device is expected to answer with.

mod crc;
mod request;
mod response;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::core::error::{EngineError, EngineResult};

pub use crc::checksum;
pub use request::{build_request, build_request_to};
pub use response::parse_response;

pub const PROTOCOL_TAG: u16 = 0x8851;
pub const HEADER_LEN: usize = 8;
pub const CRC_LEN: usize = 2;

pub const COMMAND_READ_STATE: u16 = 0x0300;
pub const COMMAND_READ_CONFIG: u16 = 0x0301;

pub const DEFAULT_TARGET_ADDRESS: u16 = 0x0000;

/// Which block a framed read asks for.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    State,
    Config,
}

impl RequestKind {
    /// Parse a kind name, mapping anything outside {state, config} to
    /// [`EngineError::InvalidRequestKind`].
    pub fn parse(name: &str) -> EngineResult<Self> {
        name.parse().map_err(|_| EngineError::InvalidRequestKind {
            kind: name.to_string(),
        })
    }

    /// Map a wire command code back to a kind.
    pub fn from_command(code: u16) -> EngineResult<Self> {
        match code {
            COMMAND_READ_STATE => Ok(Self::State),
            COMMAND_READ_CONFIG => Ok(Self::Config),
            other => Err(EngineError::InvalidRequestKind {
                kind: format!("0x{other:04X}"),
            }),
        }
    }

    pub fn command_code(self) -> u16 {
        match self {
            Self::State => COMMAND_READ_STATE,
            Self::Config => COMMAND_READ_CONFIG,
        }
    }

    /// Number of payload words the device answers with for this kind.
    pub fn payload_words(self, version: ProtocolVersion) -> u16 {
        match (self, version) {
            (Self::State, ProtocolVersion::V1) => 144,
            (Self::State, ProtocolVersion::V2) => 148,
            (Self::Config, ProtocolVersion::V1) => 100,
            (Self::Config, ProtocolVersion::V2) => 104,
        }
    }

    /// Total length in bytes of a well-formed response frame.
    pub fn response_len(self, version: ProtocolVersion) -> usize {
        HEADER_LEN + usize::from(self.payload_words(version)) * 2 + CRC_LEN
    }
}

/// Framed protocol revision spoken by the device.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Default,
    IntoPrimitive,
    TryFromPrimitive,
    Serialize,
    Deserialize,
)]
#[repr(u8)]
#[serde(try_from = "u8", into = "u8")]
pub enum ProtocolVersion {
    #[default]
    V1 = 1,
    V2 = 2,
}

impl ProtocolVersion {
    pub fn as_u8(self) -> u8 {
        self.into()
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.as_u8())
    }
}
