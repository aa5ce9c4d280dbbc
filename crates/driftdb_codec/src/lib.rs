//! # DriftDB Codec
//!
//! Value model and framed CBOR images for DriftDB.
//!
//! This crate provides:
//! - `Value`, the closed set of element kinds stored in fields and collections
//! - `ValueType`, the declared type of a property or collection element
//! - Identity types (`ObjectId`, `Decimal128`, `RowId`, `ObjectKey`)
//! - Framed CBOR images with a SHA-256 integrity digest
//!
//! ## Usage
//!
//! ```
//! use driftdb_codec::{decode_image, encode_image, Value};
//!
//! let bytes = encode_image(*b"DRFT", 1, &Value::Int(42)).unwrap();
//! let (format, decoded): (u16, Value) = decode_image(*b"DRFT", &bytes).unwrap();
//! assert_eq!(format, 1);
//! assert_eq!(decoded, Value::Int(42));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod ids;
mod image;
mod value;

pub use error::{CodecError, CodecResult};
pub use ids::{Decimal128, ObjectId, ObjectKey, RowId};
pub use image::{decode_image, encode_image, peek_format};
pub use value::{Value, ValueType};

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn arb_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<i64>().prop_map(Value::Int),
            any::<bool>().prop_map(Value::Bool),
            ".{0,16}".prop_map(Value::String),
            proptest::collection::vec(any::<u8>(), 0..16).prop_map(Value::Data),
            any::<f64>().prop_map(Value::Double),
            any::<[u8; 12]>().prop_map(|b| Value::ObjectId(ObjectId::from_bytes(b))),
            any::<u128>().prop_map(|n| Value::Uuid(uuid::Uuid::from_u128(n))),
        ]
    }

    proptest! {
        #[test]
        fn image_preserves_values(values in proptest::collection::vec(arb_value(), 0..20)) {
            let bytes = encode_image(*b"PROP", 1, &values).unwrap();
            let (_, decoded): (u16, Vec<Value>) = decode_image(*b"PROP", &bytes).unwrap();
            prop_assert_eq!(decoded, values);
        }

        #[test]
        fn ordering_is_antisymmetric(a in arb_value(), b in arb_value()) {
            prop_assert_eq!(a.total_cmp(&b), b.total_cmp(&a).reverse());
        }
    }
}
