use derive_more::{Display, Error};
use serde::Serialize;

use super::{RegisterDescriptor, RegisterType};

const SCALE_EPSILON: f64 = 1e-9;

/// A decoded register value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Float(_) | Value::Text(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Text(_) => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(v) => write!(f, "{v}"),
        }
    }
}

/// Per-field decode failure. One bad field never blocks its siblings.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum DecodeError {
    #[display("needs {needed} words, got {got}")]
    InsufficientWords { needed: u16, got: usize },

    #[display("unsupported register type '{name}'")]
    UnsupportedType { name: String },

    #[display("no data returned for address {address}")]
    MissingWords { address: u16 },
}

/// Outcome of decoding one field.
pub type Reading = Result<Value, DecodeError>;

/// Number of words a register of `register_type` occupies.
pub fn register_count(register_type: &RegisterType) -> u16 {
    match register_type {
        RegisterType::Uint16 | RegisterType::Int16 => 1,
        RegisterType::Uint32 | RegisterType::Int32 => 2,
        RegisterType::Ascii(words) => *words,
        RegisterType::Unknown(name) => {
            log::warn!("Unknown register type '{}', assuming 1 word", name);
            1
        }
    }
}

/// Decode the words of one register, starting at `words[0]`.
pub fn decode(words: &[u16], descriptor: &RegisterDescriptor) -> Reading {
    let raw = match &descriptor.register_type {
        RegisterType::Uint16 => i64::from(first_word(words)?),
        RegisterType::Int16 => i64::from(first_word(words)? as i16),
        RegisterType::Uint32 => i64::from(pair(words)?),
        RegisterType::Int32 => i64::from(pair(words)? as i32),
        RegisterType::Ascii(count) => return decode_ascii(words, *count),
        RegisterType::Unknown(name) => {
            return Err(DecodeError::UnsupportedType { name: name.clone() })
        }
    };

    Ok(apply_scale(raw, descriptor))
}

/// Decode a register out of a block of words that starts at `block_start`.
pub fn decode_at(words: &[u16], block_start: u16, descriptor: &RegisterDescriptor) -> Reading {
    let offset = usize::from(descriptor.address.saturating_sub(block_start));
    if descriptor.address < block_start || offset >= words.len() {
        return Err(DecodeError::MissingWords {
            address: descriptor.address,
        });
    }
    let end = (offset + usize::from(descriptor.word_count())).min(words.len());
    decode(&words[offset..end], descriptor)
}

fn apply_scale(raw: i64, descriptor: &RegisterDescriptor) -> Value {
    if (descriptor.scale - 1.0).abs() > SCALE_EPSILON && !descriptor.is_unscaled_unit() {
        Value::Float(raw as f64 * descriptor.scale)
    } else {
        Value::Int(raw)
    }
}

fn first_word(words: &[u16]) -> Result<u16, DecodeError> {
    words
        .first()
        .copied()
        .ok_or(DecodeError::InsufficientWords { needed: 1, got: 0 })
}

fn pair(words: &[u16]) -> Result<u32, DecodeError> {
    match words {
        [high, low, ..] => Ok((u32::from(*high) << 16) | u32::from(*low)),
        _ => Err(DecodeError::InsufficientWords {
            needed: 2,
            got: words.len(),
        }),
    }
}

fn decode_ascii(words: &[u16], count: u16) -> Reading {
    if words.len() < usize::from(count) {
        return Err(DecodeError::InsufficientWords {
            needed: count,
            got: words.len(),
        });
    }

    let mut bytes: Vec<u8> = words[..usize::from(count)]
        .iter()
        .flat_map(|word| word.to_be_bytes())
        .collect();
    while bytes
        .last()
        .is_some_and(|b| *b == 0 || b.is_ascii_whitespace() || b.is_ascii_control())
    {
        bytes.pop();
    }

    let text = bytes
        .into_iter()
        .filter(u8::is_ascii)
        .map(char::from)
        .collect();
    Ok(Value::Text(text))
}
