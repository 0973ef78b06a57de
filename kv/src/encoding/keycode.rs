//! Order-preserving encode/decode of `Value`s and composite key sequences
//! (spec.md §4.1, component C1). The byte encodings here are the one thing
//! every other layer — row keys, index entries, the mvcc version key
//! prefix — builds on, so `enc(a) < enc(b) <=> a < b` must hold exactly as
//! documented per type.
//!
//! Mirrors the teacher's `codec` modules in spirit (small, focused codec
//! types with their own `encode`/`decode` pair) but the encoding here is
//! order-preserving rather than a wire format, so it can't reuse
//! `serde_json`/`bincode` directly.

use crate::encoding::base64_codec::Base64Codec;
use crate::error::{CResult, Error};
use crate::value::{DataType, Value};

/// Delimits components inside a composite key (spec.md §4.1). Chosen
/// because it cannot appear in the base64 alphabet used to escape
/// variable-length components below.
pub const SEPARATOR: u8 = 0x1E;

// Type tags. Order matters only in that it groups values of the same type
// together and puts `Null` first, matching "Null: ... compares lowest"
// (spec.md §4.1); cross-type ordering beyond the Null/numeric rules is not
// otherwise guaranteed, since a single index or primary key is always
// homogeneously typed (spec.md §4.6 handles the one case where it isn't,
// integer/double mixing, by coercing to `Double` before encoding).
const TAG_NULL: u8 = 0x00;
const TAG_BOOLEAN: u8 = 0x01;
const TAG_INTEGER: u8 = 0x02;
const TAG_BIGINT: u8 = 0x03;
const TAG_DOUBLE: u8 = 0x04;
const TAG_TIMESTAMP: u8 = 0x05;
const TAG_TEXT: u8 = 0x06;
const TAG_BLOB: u8 = 0x07;

/// Bias applied to signed 64-bit integers before big-endian encoding, so
/// that the unsigned byte order matches signed numeric order (spec.md
/// §4.1: "big-endian 8 bytes of `x + 2^63`").
const SIGN_BIAS: u64 = 1 << 63;

fn encode_i64(x: i64) -> [u8; 8] {
    let biased = (x as i64 as i128 + SIGN_BIAS as i128) as u64;
    biased.to_be_bytes()
}

fn decode_i64(bytes: [u8; 8]) -> i64 {
    let biased = u64::from_be_bytes(bytes);
    (biased as i128 - SIGN_BIAS as i128) as i64
}

fn encode_f64(x: f64) -> [u8; 8] {
    let bits = x.to_bits();
    // Positive: flip the sign bit. Negative: flip every bit. This is the
    // standard order-preserving transform for IEEE-754 doubles (spec.md
    // §4.1).
    let transformed = if x.is_sign_negative() { !bits } else { bits | (1 << 63) };
    transformed.to_be_bytes()
}

fn decode_f64(bytes: [u8; 8]) -> f64 {
    let transformed = u64::from_be_bytes(bytes);
    let bits = if transformed & (1 << 63) != 0 { transformed & !(1 << 63) } else { !transformed };
    f64::from_bits(bits)
}

/// Encodes a single `Value` with a leading type tag, self-describing for
/// use inside a composite key (see `encode_keys`).
pub fn encode_value(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    match value {
        Value::Null => out.push(TAG_NULL),
        Value::Boolean(b) => {
            out.push(TAG_BOOLEAN);
            out.push(if *b { 1 } else { 0 });
        }
        Value::Integer(i) => {
            out.push(TAG_INTEGER);
            out.extend_from_slice(&encode_i64(*i as i64));
        }
        Value::Bigint(i) => {
            out.push(TAG_BIGINT);
            out.extend_from_slice(&encode_i64(*i));
        }
        Value::Double(d) => {
            out.push(TAG_DOUBLE);
            out.extend_from_slice(&encode_f64(*d));
        }
        Value::Timestamp(t) => {
            out.push(TAG_TIMESTAMP);
            out.extend_from_slice(&encode_i64(*t));
        }
        Value::Text(s) => {
            out.push(TAG_TEXT);
            out.extend_from_slice(escape(s.as_bytes()).as_bytes());
            out.push(SEPARATOR);
        }
        Value::Blob(b) => {
            out.push(TAG_BLOB);
            out.extend_from_slice(escape(b).as_bytes());
            out.push(SEPARATOR);
        }
    }
    out
}

/// Base64-escapes a variable-length component so the reserved separator
/// byte cannot appear inside it (spec.md §4.1). Exposed at `pub(crate)`
/// visibility since the mvcc layer reuses this exact scheme to frame raw
/// (already-encoded) keys inside its own versioned key prefixes.
pub(crate) fn escape(raw: &[u8]) -> String {
    Base64Codec::new().encode(raw).expect("base64 encoding never fails")
}

pub(crate) fn unescape(encoded: &[u8]) -> CResult<Vec<u8>> {
    let s = std::str::from_utf8(encoded)
        .map_err(|e| Error::Corruption(format!("non-utf8 base64 component: {e}")))?;
    Base64Codec::new().decode(s).map_err(Error::Corruption)
}

/// Decodes one tagged value from the front of `bytes`, returning the value
/// and the number of bytes consumed.
pub fn decode_value(bytes: &[u8]) -> CResult<(Value, usize)> {
    let tag = *bytes.first().ok_or_else(|| Error::Corruption("empty key component".into()))?;
    let rest = &bytes[1..];
    let fixed = |n: usize| -> CResult<&[u8]> {
        rest.get(..n).ok_or_else(|| Error::Corruption("truncated key component".into()))
    };
    match tag {
        TAG_NULL => Ok((Value::Null, 1)),
        TAG_BOOLEAN => {
            let b = fixed(1)?;
            Ok((Value::Boolean(b[0] != 0), 2))
        }
        TAG_INTEGER => {
            let b: [u8; 8] = fixed(8)?.try_into().unwrap();
            Ok((Value::Integer(decode_i64(b) as i32), 9))
        }
        TAG_BIGINT => {
            let b: [u8; 8] = fixed(8)?.try_into().unwrap();
            Ok((Value::Bigint(decode_i64(b)), 9))
        }
        TAG_DOUBLE => {
            let b: [u8; 8] = fixed(8)?.try_into().unwrap();
            Ok((Value::Double(decode_f64(b)), 9))
        }
        TAG_TIMESTAMP => {
            let b: [u8; 8] = fixed(8)?.try_into().unwrap();
            Ok((Value::Timestamp(decode_i64(b)), 9))
        }
        TAG_TEXT | TAG_BLOB => {
            let end = rest
                .iter()
                .position(|b| *b == SEPARATOR)
                .ok_or_else(|| Error::Corruption("unterminated variable-length component".into()))?;
            let raw = unescape(&rest[..end])?;
            let consumed = 1 + end + 1;
            if tag == TAG_TEXT {
                let s = String::from_utf8(raw)?;
                Ok((Value::Text(s), consumed))
            } else {
                Ok((Value::Blob(raw), consumed))
            }
        }
        other => Err(Error::TypeMismatch(format!("unknown key-codec tag {other:#x}"))),
    }
}

/// Encodes a sequence of values into one composite key, preserving order
/// component-by-component (spec.md §3 "Key": "an ordered sequence of
/// Values, encoded into a byte string").
pub fn encode_keys(values: &[Value]) -> Vec<u8> {
    let mut out = Vec::new();
    for v in values {
        out.extend_from_slice(&encode_value(v));
    }
    out
}

/// Decodes a composite key back into its component values.
pub fn decode_keys(mut bytes: &[u8]) -> CResult<Vec<Value>> {
    let mut values = Vec::new();
    while !bytes.is_empty() {
        let (value, consumed) = decode_value(bytes)?;
        values.push(value);
        bytes = &bytes[consumed..];
    }
    Ok(values)
}

/// Decodes a single value known to have declared type `datatype`, used for
/// the table row codec where the tag is implied by the schema rather than
/// self-described. Currently just delegates to the tagged decoder, since
/// every key-codec value is self-describing; kept as a separate entry
/// point so callers can assert the decoded type matches the schema.
pub fn decode_typed(bytes: &[u8], datatype: Option<DataType>) -> CResult<(Value, usize)> {
    let (value, consumed) = decode_value(bytes)?;
    if let Some(expected) = datatype {
        if !value.is_null() && value.datatype() != Some(expected) {
            return Err(Error::TypeMismatch(format!(
                "expected {expected}, found {:?}",
                value.datatype()
            )));
        }
    }
    Ok((value, consumed))
}
