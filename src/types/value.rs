//! # Runtime Value Representation
//!
//! `Value` is the tagged scalar the engine moves between the row façade, the
//! B+tree, and the WAL. One variant exists per [`DataType`]; nullability is
//! expressed at the column level as `Option<Value>`, never as a variant.
//!
//! ## Encodings
//!
//! Two byte forms exist:
//!
//! - **Column form** (`encode_into` / `decode`): a one-byte null flag (`0` =
//!   null, empty payload; `1` = non-null) followed by the variant body. This
//!   is what row blobs concatenate.
//! - **Key form** (`encode_key_into` / `decode_key`): a one-byte type tag
//!   followed by the body, with no null flag. Keys are never null, and the
//!   tag makes the encoding self-describing for WAL replay.
//!
//! Bodies are little-endian fixed-width for numeric variants; `Text` carries
//! a varint length prefix. See the tag table in [`data_type`](super::DataType).
//!
//! ## Comparison Semantics
//!
//! `compare` defines a total order per variant: integer order, `false < true`,
//! code-point order for `Char`, lexicographic for `Text`, `total_cmp` for
//! floats, numeric order for `Decimal` (scales are normalized before
//! comparing digits). Comparing values of *different* variants is a
//! programmer error and panics; the table layer guarantees it cannot happen
//! for keys that stay inside the type system.

use std::cmp::Ordering;

use eyre::{bail, ensure, Result};

use super::DataType;
use crate::encoding::{read_varint, write_varint};

/// A typed scalar value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    Bool(bool),
    Char(char),
    Text(String),
    F32(f32),
    F64(f64),
    Decimal { digits: i128, scale: i16 },
    /// Milliseconds since the Unix epoch.
    Timestamp(i64),
}

impl Value {
    pub fn data_type(&self) -> DataType {
        match self {
            Value::U8(_) => DataType::U8,
            Value::U16(_) => DataType::U16,
            Value::U32(_) => DataType::U32,
            Value::U64(_) => DataType::U64,
            Value::I8(_) => DataType::I8,
            Value::I16(_) => DataType::I16,
            Value::I32(_) => DataType::I32,
            Value::I64(_) => DataType::I64,
            Value::Bool(_) => DataType::Bool,
            Value::Char(_) => DataType::Char,
            Value::Text(_) => DataType::Text,
            Value::F32(_) => DataType::F32,
            Value::F64(_) => DataType::F64,
            Value::Decimal { .. } => DataType::Decimal,
            Value::Timestamp(_) => DataType::Timestamp,
        }
    }

    /// Appends the column-form encoding: null flag byte, then the body.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.push(1);
        self.encode_body(buf);
    }

    /// Appends the column-form encoding of a null of any type.
    pub fn encode_null(buf: &mut Vec<u8>) {
        buf.push(0);
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_into(&mut buf);
        buf
    }

    fn encode_body(&self, buf: &mut Vec<u8>) {
        match self {
            Value::U8(v) => buf.push(*v),
            Value::U16(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Value::U32(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Value::U64(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Value::I8(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Value::I16(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Value::I32(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Value::I64(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Value::Bool(v) => buf.push(*v as u8),
            Value::Char(v) => buf.extend_from_slice(&(*v as u32).to_le_bytes()),
            Value::Text(s) => {
                write_varint(s.len() as u64, buf);
                buf.extend_from_slice(s.as_bytes());
            }
            Value::F32(v) => buf.extend_from_slice(&v.to_bits().to_le_bytes()),
            Value::F64(v) => buf.extend_from_slice(&v.to_bits().to_le_bytes()),
            Value::Decimal { digits, scale } => {
                buf.extend_from_slice(&digits.to_le_bytes());
                buf.extend_from_slice(&scale.to_le_bytes());
            }
            Value::Timestamp(ms) => buf.extend_from_slice(&ms.to_le_bytes()),
        }
    }

    /// Decodes a column-form value of type `ty` from the front of `bytes`.
    ///
    /// Returns the value (`None` for a null) and the number of bytes
    /// consumed.
    pub fn decode(bytes: &[u8], ty: DataType) -> Result<(Option<Value>, usize)> {
        ensure!(!bytes.is_empty(), "empty buffer for {} value", ty);

        match bytes[0] {
            0 => Ok((None, 1)),
            1 => {
                let (value, read) = Self::decode_body(&bytes[1..], ty)?;
                Ok((Some(value), read + 1))
            }
            flag => bail!("invalid null flag {:#04x} for {} value", flag, ty),
        }
    }

    fn decode_body(bytes: &[u8], ty: DataType) -> Result<(Value, usize)> {
        fn fixed<const N: usize>(bytes: &[u8], ty: DataType) -> Result<[u8; N]> {
            ensure!(
                bytes.len() >= N,
                "truncated {} body: {} < {}",
                ty,
                bytes.len(),
                N
            );
            let mut out = [0u8; N];
            out.copy_from_slice(&bytes[..N]);
            Ok(out)
        }

        Ok(match ty {
            DataType::U8 => (Value::U8(fixed::<1>(bytes, ty)?[0]), 1),
            DataType::U16 => (Value::U16(u16::from_le_bytes(fixed(bytes, ty)?)), 2),
            DataType::U32 => (Value::U32(u32::from_le_bytes(fixed(bytes, ty)?)), 4),
            DataType::U64 => (Value::U64(u64::from_le_bytes(fixed(bytes, ty)?)), 8),
            DataType::I8 => (Value::I8(i8::from_le_bytes(fixed(bytes, ty)?)), 1),
            DataType::I16 => (Value::I16(i16::from_le_bytes(fixed(bytes, ty)?)), 2),
            DataType::I32 => (Value::I32(i32::from_le_bytes(fixed(bytes, ty)?)), 4),
            DataType::I64 => (Value::I64(i64::from_le_bytes(fixed(bytes, ty)?)), 8),
            DataType::Bool => {
                let byte = fixed::<1>(bytes, ty)?[0];
                ensure!(byte <= 1, "invalid bool byte: {:#04x}", byte);
                (Value::Bool(byte == 1), 1)
            }
            DataType::Char => {
                let code = u32::from_le_bytes(fixed(bytes, ty)?);
                let ch = char::from_u32(code)
                    .ok_or_else(|| eyre::eyre!("invalid char code point: {:#010x}", code))?;
                (Value::Char(ch), 4)
            }
            DataType::Text => {
                let (len, prefix) = read_varint(bytes)?;
                let len = len as usize;
                ensure!(
                    bytes.len() >= prefix + len,
                    "truncated text body: {} < {}",
                    bytes.len(),
                    prefix + len
                );
                let text = std::str::from_utf8(&bytes[prefix..prefix + len])
                    .map_err(|e| eyre::eyre!("text value is not valid UTF-8: {}", e))?;
                (Value::Text(text.to_string()), prefix + len)
            }
            DataType::F32 => (
                Value::F32(f32::from_bits(u32::from_le_bytes(fixed(bytes, ty)?))),
                4,
            ),
            DataType::F64 => (
                Value::F64(f64::from_bits(u64::from_le_bytes(fixed(bytes, ty)?))),
                8,
            ),
            DataType::Decimal => {
                let digits = i128::from_le_bytes(fixed(bytes, ty)?);
                ensure!(bytes.len() >= 18, "truncated decimal scale");
                let scale = i16::from_le_bytes([bytes[16], bytes[17]]);
                (Value::Decimal { digits, scale }, 18)
            }
            DataType::Timestamp => (Value::Timestamp(i64::from_le_bytes(fixed(bytes, ty)?)), 8),
        })
    }

    /// Appends the key-form encoding: type tag byte, then the body.
    ///
    /// Keys are never null, so there is no flag byte.
    pub fn encode_key_into(&self, buf: &mut Vec<u8>) {
        buf.push(self.data_type().wire_tag());
        self.encode_body(buf);
    }

    /// Decodes a key-form value from the front of `bytes`.
    pub fn decode_key(bytes: &[u8]) -> Result<(Value, usize)> {
        ensure!(!bytes.is_empty(), "empty buffer for key value");

        let ty = DataType::from_wire_tag(bytes[0])?;
        let (value, read) = Self::decode_body(&bytes[1..], ty)?;
        Ok((value, read + 1))
    }

    /// Total-order comparison between two values of the same variant.
    ///
    /// # Panics
    ///
    /// Panics when the variants differ. The tree checks key types at its
    /// public boundary, so a mismatch here is a bug in the caller.
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::U8(a), Value::U8(b)) => a.cmp(b),
            (Value::U16(a), Value::U16(b)) => a.cmp(b),
            (Value::U32(a), Value::U32(b)) => a.cmp(b),
            (Value::U64(a), Value::U64(b)) => a.cmp(b),
            (Value::I8(a), Value::I8(b)) => a.cmp(b),
            (Value::I16(a), Value::I16(b)) => a.cmp(b),
            (Value::I32(a), Value::I32(b)) => a.cmp(b),
            (Value::I64(a), Value::I64(b)) => a.cmp(b),
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Char(a), Value::Char(b)) => a.cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::F32(a), Value::F32(b)) => a.total_cmp(b),
            (Value::F64(a), Value::F64(b)) => a.total_cmp(b),
            (
                Value::Decimal {
                    digits: a,
                    scale: a_scale,
                },
                Value::Decimal {
                    digits: b,
                    scale: b_scale,
                },
            ) => compare_decimals(*a, *a_scale, *b, *b_scale),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            (a, b) => panic!(
                "cannot compare {} value with {} value",
                a.data_type(),
                b.data_type()
            ),
        }
    }
}

/// Rescales both decimals to the larger scale and compares digits.
///
/// Rescaling widens toward i128::MAX; saturation keeps the ordering correct
/// for any operands whose true difference survives the clamp.
fn compare_decimals(a: i128, a_scale: i16, b: i128, b_scale: i16) -> Ordering {
    if a_scale == b_scale {
        return a.cmp(&b);
    }

    let max_scale = a_scale.max(b_scale);
    let rescale = |digits: i128, scale: i16| -> i128 {
        let shift = (max_scale - scale) as u32;
        digits.saturating_mul(10i128.saturating_pow(shift))
    };

    rescale(a, a_scale).cmp(&rescale(b, b_scale))
}

/// Column-level comparison: null sorts before any non-null, two nulls are
/// equal, and two non-nulls compare per variant.
pub fn compare_nullable(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => a.compare(b),
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::U8(v) => write!(f, "{}", v),
            Value::U16(v) => write!(f, "{}", v),
            Value::U32(v) => write!(f, "{}", v),
            Value::U64(v) => write!(f, "{}", v),
            Value::I8(v) => write!(f, "{}", v),
            Value::I16(v) => write!(f, "{}", v),
            Value::I32(v) => write!(f, "{}", v),
            Value::I64(v) => write!(f, "{}", v),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Char(v) => write!(f, "{}", v),
            Value::Text(s) => write!(f, "{}", s),
            Value::F32(v) => write!(f, "{}", v),
            Value::F64(v) => write!(f, "{}", v),
            Value::Decimal { digits, scale } => {
                if *scale <= 0 {
                    write!(f, "{}", digits)
                } else {
                    let divisor = 10i128.pow(*scale as u32);
                    let int_part = digits / divisor;
                    let frac_part = (digits % divisor).abs();
                    write!(
                        f,
                        "{}.{:0>width$}",
                        int_part,
                        frac_part,
                        width = *scale as usize
                    )
                }
            }
            Value::Timestamp(ms) => write!(f, "{}ms", ms),
        }
    }
}
