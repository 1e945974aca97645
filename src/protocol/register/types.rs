use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, str::FromStr};
use strum::Display;

use crate::protocol::framed::{ProtocolVersion, RequestKind};

/// Units whose values are tags or bit patterns and must never be scaled.
pub const UNSCALED_UNITS: &[&str] = &["Bitfield", "Code", "Hex"];

/// Wire type of a register.
///
/// Unknown type names are kept rather than rejected so that one bad table
/// entry does not take a whole device down; see [`super::register_count`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RegisterType {
    Uint16,
    Int16,
    Uint32,
    Int32,
    /// ASCII text spanning the given number of words.
    Ascii(u16),
    Unknown(String),
}

impl RegisterType {
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

impl FromStr for RegisterType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        let parsed = match name.as_str() {
            "uint16" | "u16" => Self::Uint16,
            "int16" | "i16" => Self::Int16,
            "uint32" | "u32" => Self::Uint32,
            "int32" | "i32" => Self::Int32,
            _ => name
                .strip_prefix("ascii(")
                .and_then(|rest| rest.strip_suffix(')'))
                .and_then(|n| n.trim().parse::<u16>().ok())
                .filter(|n| *n > 0)
                .map(Self::Ascii)
                .unwrap_or_else(|| Self::Unknown(s.to_string())),
        };
        Ok(parsed)
    }
}

impl From<String> for RegisterType {
    fn from(value: String) -> Self {
        match value.parse() {
            Ok(parsed) => parsed,
            Err(never) => match never {},
        }
    }
}

impl From<RegisterType> for String {
    fn from(value: RegisterType) -> Self {
        value.to_string()
    }
}

impl fmt::Display for RegisterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterType::Uint16 => write!(f, "uint16"),
            RegisterType::Int16 => write!(f, "int16"),
            RegisterType::Uint32 => write!(f, "uint32"),
            RegisterType::Int32 => write!(f, "int32"),
            RegisterType::Ascii(words) => write!(f, "ascii({words})"),
            RegisterType::Unknown(name) => write!(f, "{name}"),
        }
    }
}

/// Register bank a descriptor lives in.
///
/// `Holding` and `Input` are Modbus banks read with function 0x03 / 0x04.
/// `State` and `Config` are the two blocks of the framed protocol, where the
/// address is the word index inside the block payload.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Display, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FunctionKind {
    #[default]
    Holding,
    Input,
    State,
    Config,
}

impl FunctionKind {
    /// Modbus function code for register banks, `None` for framed blocks.
    pub fn modbus_function_code(self) -> Option<u8> {
        match self {
            FunctionKind::Holding => Some(0x03),
            FunctionKind::Input => Some(0x04),
            FunctionKind::State | FunctionKind::Config => None,
        }
    }

    /// Framed request kind for framed blocks, `None` for Modbus banks.
    pub fn request_kind(self) -> Option<RequestKind> {
        match self {
            FunctionKind::State => Some(RequestKind::State),
            FunctionKind::Config => Some(RequestKind::Config),
            FunctionKind::Holding | FunctionKind::Input => None,
        }
    }

    pub fn is_framed(self) -> bool {
        self.request_kind().is_some()
    }
}

fn default_scale() -> f64 {
    1.0
}

/// Immutable definition of one logical register.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterDescriptor {
    pub address: u16,
    #[serde(rename = "type")]
    pub register_type: RegisterType,
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// Minimum protocol version that exposes this register.
    #[serde(
        default,
        rename = "min_protocol_version",
        skip_serializing_if = "Option::is_none"
    )]
    pub protocol_version_gate: Option<ProtocolVersion>,
    #[serde(default)]
    pub function_kind: FunctionKind,
}

impl RegisterDescriptor {
    pub fn new(address: u16, register_type: RegisterType) -> Self {
        Self {
            address,
            register_type,
            scale: 1.0,
            unit: None,
            protocol_version_gate: None,
            function_kind: FunctionKind::default(),
        }
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_unit(mut self, unit: &str) -> Self {
        self.unit = Some(unit.to_string());
        self
    }

    pub fn with_function_kind(mut self, kind: FunctionKind) -> Self {
        self.function_kind = kind;
        self
    }

    pub fn with_min_protocol_version(mut self, version: ProtocolVersion) -> Self {
        self.protocol_version_gate = Some(version);
        self
    }

    pub fn word_count(&self) -> u16 {
        super::register_count(&self.register_type)
    }

    /// One past the last word this register occupies.
    pub fn end_address(&self) -> u32 {
        u32::from(self.address) + u32::from(self.word_count())
    }

    /// Whether the unit marks an enumeration or bitfield that is never scaled.
    pub fn is_unscaled_unit(&self) -> bool {
        self.unit
            .as_deref()
            .is_some_and(|unit| UNSCALED_UNITS.contains(&unit))
    }

    pub fn is_bitfield(&self) -> bool {
        self.unit.as_deref() == Some("Bitfield")
    }

    /// Whether a device speaking `version` exposes this register.
    pub fn available_in(&self, version: ProtocolVersion) -> bool {
        self.protocol_version_gate
            .map_or(true, |required| version >= required)
    }
}

/// Keyed register table for one bank of a device.
///
/// Keys are unique; iteration is in key order, which carries no meaning.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegisterMap(BTreeMap<String, RegisterDescriptor>);

impl RegisterMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a descriptor, returning the one previously stored under `key`.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        descriptor: RegisterDescriptor,
    ) -> Option<RegisterDescriptor> {
        self.0.insert(key.into(), descriptor)
    }

    pub fn with(mut self, key: impl Into<String>, descriptor: RegisterDescriptor) -> Self {
        self.insert(key, descriptor);
        self
    }

    pub fn get(&self, key: &str) -> Option<&RegisterDescriptor> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RegisterDescriptor)> {
        self.0.iter().map(|(key, descriptor)| (key.as_str(), descriptor))
    }

    /// Entries a device speaking `version` exposes.
    pub fn available_in(
        &self,
        version: ProtocolVersion,
    ) -> impl Iterator<Item = (&str, &RegisterDescriptor)> {
        self.iter()
            .filter(move |(_, descriptor)| descriptor.available_in(version))
    }
}

impl FromIterator<(String, RegisterDescriptor)> for RegisterMap {
    fn from_iter<T: IntoIterator<Item = (String, RegisterDescriptor)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
