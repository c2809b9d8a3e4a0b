//! Leaf value types and their fixed byte encoding (spec §3.2, §4.2).

use serde::{Deserialize, Serialize};

use crate::error::DocError;

/// A leaf value. `Counter` is a distinct element kind (see `crate::counter`)
/// even though its payload is one of the numeric variants here.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Primitive {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
    /// Milliseconds since the Unix epoch.
    Timestamp(i64),
}

/// Wire type tags, one byte each, matching `encode`/`decode` below.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
enum TypeTag {
    Null = 0,
    Bool = 1,
    Int32 = 2,
    Int64 = 3,
    Float64 = 4,
    String = 5,
    Bytes = 6,
    Timestamp = 7,
}

impl TypeTag {
    fn from_u8(tag: u8) -> Option<TypeTag> {
        Some(match tag {
            0 => TypeTag::Null,
            1 => TypeTag::Bool,
            2 => TypeTag::Int32,
            3 => TypeTag::Int64,
            4 => TypeTag::Float64,
            5 => TypeTag::String,
            6 => TypeTag::Bytes,
            7 => TypeTag::Timestamp,
            _ => return None,
        })
    }
}

impl Primitive {
    pub fn is_numeric(&self) -> bool {
        matches!(self, Primitive::Int32(_) | Primitive::Int64(_) | Primitive::Float64(_))
    }

    fn tag(&self) -> TypeTag {
        match self {
            Primitive::Null => TypeTag::Null,
            Primitive::Bool(_) => TypeTag::Bool,
            Primitive::Int32(_) => TypeTag::Int32,
            Primitive::Int64(_) => TypeTag::Int64,
            Primitive::Float64(_) => TypeTag::Float64,
            Primitive::String(_) => TypeTag::String,
            Primitive::Bytes(_) => TypeTag::Bytes,
            Primitive::Timestamp(_) => TypeTag::Timestamp,
        }
    }

    /// Fixed big-endian byte layout per type (spec §3.2): `bool`=1B,
    /// `int32`=4B, `int64`=8B, `float64`=8B (IEEE-754 bits), `string`=UTF-8
    /// bytes, `bytes`=raw, `timestamp`=8B (ms since epoch).
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![self.tag() as u8];
        match self {
            Primitive::Null => {}
            Primitive::Bool(b) => out.push(*b as u8),
            Primitive::Int32(v) => out.extend_from_slice(&v.to_be_bytes()),
            Primitive::Int64(v) => out.extend_from_slice(&v.to_be_bytes()),
            Primitive::Float64(v) => out.extend_from_slice(&v.to_bits().to_be_bytes()),
            Primitive::String(s) => out.extend_from_slice(s.as_bytes()),
            Primitive::Bytes(b) => out.extend_from_slice(b),
            Primitive::Timestamp(ms) => out.extend_from_slice(&ms.to_be_bytes()),
        }
        out
    }

    /// Inverse of `encode`. An unknown type tag yields `Unimplemented`
    /// (spec §4.2).
    pub fn decode(bytes: &[u8]) -> Result<Primitive, DocError> {
        let (&tag_byte, rest) = bytes
            .split_first()
            .ok_or_else(|| DocError::Decode("empty primitive payload".into()))?;
        let tag = TypeTag::from_u8(tag_byte)
            .ok_or_else(|| DocError::Unimplemented(format!("primitive type tag {tag_byte}")))?;
        Ok(match tag {
            TypeTag::Null => Primitive::Null,
            TypeTag::Bool => Primitive::Bool(*rest.first().ok_or_else(|| DocError::Decode("truncated bool".into()))? != 0),
            TypeTag::Int32 => Primitive::Int32(i32::from_be_bytes(read_exact(rest, "int32")?)),
            TypeTag::Int64 => Primitive::Int64(i64::from_be_bytes(read_exact(rest, "int64")?)),
            TypeTag::Float64 => Primitive::Float64(f64::from_bits(u64::from_be_bytes(read_exact(rest, "float64")?))),
            TypeTag::String => {
                Primitive::String(std::str::from_utf8(rest).map_err(|e| DocError::Decode(e.to_string()))?.to_owned())
            }
            TypeTag::Bytes => Primitive::Bytes(rest.to_vec()),
            TypeTag::Timestamp => Primitive::Timestamp(i64::from_be_bytes(read_exact(rest, "timestamp")?)),
        })
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Primitive::Null => serde_json::Value::Null,
            Primitive::Bool(b) => serde_json::Value::Bool(*b),
            Primitive::Int32(v) => serde_json::Value::from(*v),
            Primitive::Int64(v) => serde_json::Value::from(*v),
            Primitive::Float64(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Primitive::String(s) => serde_json::Value::String(s.clone()),
            Primitive::Bytes(b) => serde_json::Value::String(hex_encode(b)),
            Primitive::Timestamp(ms) => serde_json::Value::from(*ms),
        }
    }

    pub fn data_size(&self) -> usize {
        self.encode().len()
    }
}

fn read_exact<const N: usize>(bytes: &[u8], what: &'static str) -> Result<[u8; N], DocError> {
    bytes.try_into().map_err(|_| DocError::Decode(format!("truncated {what}")))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_every_variant() {
        let values = vec![
            Primitive::Null,
            Primitive::Bool(true),
            Primitive::Int32(-42),
            Primitive::Int64(i64::MIN),
            Primitive::Float64(3.5),
            Primitive::String("hello".into()),
            Primitive::Bytes(vec![1, 2, 3]),
            Primitive::Timestamp(1_700_000_000_000),
        ];
        for v in values {
            let encoded = v.encode();
            let decoded = Primitive::decode(&encoded).unwrap();
            assert_eq!(v, decoded);
        }
    }

    #[test]
    fn unknown_tag_is_unimplemented() {
        let err = Primitive::decode(&[0xee]).unwrap_err();
        assert!(matches!(err, DocError::Unimplemented(_)));
    }

    #[test]
    fn fixed_lengths_per_type() {
        assert_eq!(Primitive::Bool(true).encode().len(), 2);
        assert_eq!(Primitive::Int32(1).encode().len(), 5);
        assert_eq!(Primitive::Int64(1).encode().len(), 9);
        assert_eq!(Primitive::Float64(1.0).encode().len(), 9);
    }
}
