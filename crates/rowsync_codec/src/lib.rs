//! # rowsync codec
//!
//! Column values and their canonical CBOR encoding.
//!
//! Every byte that rowsync writes to a batch part file or a batch summary
//! goes through this crate, so two selections over the same rows produce
//! the same bytes. The rules:
//!
//! - integers use the shortest head
//! - map keys are sorted by their encoded form (length first, then bytewise)
//! - floats are always written as 64-bit, NaN is rejected
//! - no indefinite-length items
//!
//! The encoded form of a primary-key tuple doubles as an ordered identity
//! key, see [`encode_key`].
//!
//! ```
//! use rowsync_codec::{from_cbor, to_canonical_cbor, Value};
//!
//! let row = Value::Array(vec![Value::Integer(7), Value::from("Ada")]);
//! let bytes = to_canonical_cbor(&row).unwrap();
//! assert_eq!(from_cbor(&bytes).unwrap(), row);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod checksum;
mod decoder;
mod encoder;
mod error;
mod value;

pub use checksum::crc32;
pub use decoder::{from_cbor, CanonicalDecoder};
pub use encoder::{to_canonical_cbor, CanonicalEncoder};
pub use error::{CodecError, CodecResult};
pub use value::Value;

/// Encodes a tuple of values (typically primary-key columns) into bytes
/// whose ordering and equality match the tuple's.
///
/// # Errors
///
/// Returns an error if a value cannot be encoded (NaN floats).
pub fn encode_key(values: &[Value]) -> CodecResult<Vec<u8>> {
    let mut encoder = CanonicalEncoder::new();
    encoder.encode_sequence(values)?;
    Ok(encoder.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_encoding_distinguishes_tuples() {
        let a = encode_key(&[Value::Integer(1), Value::from("x")]).unwrap();
        let b = encode_key(&[Value::Integer(1), Value::from("y")]).unwrap();
        let a_again = encode_key(&[Value::Integer(1), Value::from("x")]).unwrap();

        assert_ne!(a, b);
        assert_eq!(a, a_again);
    }

    #[test]
    fn key_encoding_rejects_nan() {
        assert_eq!(
            encode_key(&[Value::Float(f64::NAN)]),
            Err(CodecError::NaNForbidden)
        );
    }

    #[test]
    fn nested_row_roundtrip() {
        let value = Value::map(vec![
            (Value::from("table"), Value::from("Customers")),
            (
                Value::from("rows"),
                Value::Array(vec![
                    Value::Array(vec![Value::Integer(1), Value::from("Ada"), Value::Null]),
                    Value::Array(vec![
                        Value::Integer(2),
                        Value::from("Grace"),
                        Value::Float(12.5),
                    ]),
                ]),
            ),
        ]);

        let bytes = to_canonical_cbor(&value).unwrap();
        assert_eq!(from_cbor(&bytes).unwrap(), value);
    }
}
