//! Identity types: object ids, decimals, row ids and object keys.

use crate::error::{CodecError, CodecResult};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A 12-byte object identifier: 4 bytes of creation seconds followed by
/// 8 random bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId([u8; 12]);

impl ObjectId {
    /// Generates a new object id stamped with the current time.
    pub fn new() -> Self {
        let secs = chrono::Utc::now().timestamp().clamp(0, i64::from(u32::MAX)) as u32;
        let random = Uuid::new_v4();
        let mut bytes = [0u8; 12];
        bytes[..4].copy_from_slice(&secs.to_be_bytes());
        bytes[4..].copy_from_slice(&random.as_bytes()[..8]);
        Self(bytes)
    }

    /// Creates an object id from raw bytes.
    pub const fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }

    /// Parses a 24-character hex string.
    pub fn parse_hex(input: &str) -> CodecResult<Self> {
        let invalid = || CodecError::InvalidObjectId {
            input: input.to_string(),
        };
        if input.len() != 24 || !input.is_ascii() {
            return Err(invalid());
        }
        let mut bytes = [0u8; 12];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&input[i * 2..i * 2 + 2], 16).map_err(|_| invalid())?;
        }
        Ok(Self(bytes))
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl FromStr for ObjectId {
    type Err = CodecError;

    fn from_str(s: &str) -> CodecResult<Self> {
        Self::parse_hex(s)
    }
}

const MAX_SCALE: u32 = 38;

/// A base-10 decimal stored as `mantissa * 10^-scale`.
///
/// Values are kept normalized (no trailing zeros in the mantissa while
/// `scale > 0`), so structural equality is numeric equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Decimal128 {
    mantissa: i128,
    scale: u32,
}

impl Decimal128 {
    /// Creates a decimal from a mantissa and scale.
    pub fn new(mantissa: i128, scale: u32) -> CodecResult<Self> {
        if scale > MAX_SCALE {
            return Err(CodecError::InvalidDecimal {
                input: format!("{mantissa}e-{scale}"),
            });
        }
        Ok(Self::normalized(mantissa, scale))
    }

    /// Creates a decimal from an integer.
    pub const fn from_int(value: i64) -> Self {
        Self {
            mantissa: value as i128,
            scale: 0,
        }
    }

    /// Returns the mantissa.
    pub const fn mantissa(&self) -> i128 {
        self.mantissa
    }

    /// Returns the scale (number of fractional digits).
    pub const fn scale(&self) -> u32 {
        self.scale
    }

    fn normalized(mut mantissa: i128, mut scale: u32) -> Self {
        if mantissa == 0 {
            return Self { mantissa, scale: 0 };
        }
        while scale > 0 && mantissa % 10 == 0 {
            mantissa /= 10;
            scale -= 1;
        }
        Self { mantissa, scale }
    }

    /// Parses a decimal string such as `-12.50` or `1.5e3`.
    pub fn parse(input: &str) -> CodecResult<Self> {
        let invalid = || CodecError::InvalidDecimal {
            input: input.to_string(),
        };
        let trimmed = input.trim();
        let (number, exponent) = match trimmed.find(['e', 'E']) {
            Some(pos) => {
                let exp: i32 = trimmed[pos + 1..].parse().map_err(|_| invalid())?;
                (&trimmed[..pos], exp)
            }
            None => (trimmed, 0),
        };
        let (negative, digits) = match number.as_bytes().first() {
            Some(b'-') => (true, &number[1..]),
            Some(b'+') => (false, &number[1..]),
            _ => (false, number),
        };
        let (int_part, frac_part) = match digits.split_once('.') {
            Some((i, f)) => (i, f),
            None => (digits, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid());
        }

        let mut mantissa: i128 = 0;
        for c in int_part.chars().chain(frac_part.chars()) {
            let digit = c.to_digit(10).ok_or_else(invalid)?;
            mantissa = mantissa
                .checked_mul(10)
                .and_then(|m| m.checked_add(i128::from(digit)))
                .ok_or_else(invalid)?;
        }
        if negative {
            mantissa = -mantissa;
        }

        let mut scale = frac_part.len() as i64 - i64::from(exponent);
        while scale < 0 {
            mantissa = mantissa.checked_mul(10).ok_or_else(invalid)?;
            scale += 1;
        }
        let scale = u32::try_from(scale).map_err(|_| invalid())?;
        if scale > MAX_SCALE {
            // Drop insignificant trailing zeros before rejecting.
            let norm = Self::normalized(mantissa, scale);
            if norm.scale > MAX_SCALE {
                return Err(invalid());
            }
            return Ok(norm);
        }
        Ok(Self::normalized(mantissa, scale))
    }
}

impl Ord for Decimal128 {
    fn cmp(&self, other: &Self) -> Ordering {
        if self.scale == other.scale {
            return self.mantissa.cmp(&other.mantissa);
        }
        // Align to the larger scale; an overflowing side dominates by sign.
        let (lhs, rhs, flipped) = if self.scale < other.scale {
            (self, other, false)
        } else {
            (other, self, true)
        };
        let factor = 10i128.checked_pow(rhs.scale - lhs.scale);
        let ordering = match factor.and_then(|f| lhs.mantissa.checked_mul(f)) {
            Some(scaled) => scaled.cmp(&rhs.mantissa),
            None if lhs.mantissa < 0 => Ordering::Less,
            None => Ordering::Greater,
        };
        if flipped {
            ordering.reverse()
        } else {
            ordering
        }
    }
}

impl PartialOrd for Decimal128 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Decimal128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = self.mantissa.unsigned_abs().to_string();
        if self.mantissa < 0 {
            f.write_str("-")?;
        }
        let scale = self.scale as usize;
        if scale == 0 {
            return f.write_str(&digits);
        }
        if digits.len() <= scale {
            write!(f, "0.{}{}", "0".repeat(scale - digits.len()), digits)
        } else {
            let (int, frac) = digits.split_at(digits.len() - scale);
            write!(f, "{int}.{frac}")
        }
    }
}

impl FromStr for Decimal128 {
    type Err = CodecError;

    fn from_str(s: &str) -> CodecResult<Self> {
        Self::parse(s)
    }
}

impl From<Decimal128> for String {
    fn from(value: Decimal128) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for Decimal128 {
    type Error = CodecError;

    fn try_from(value: String) -> CodecResult<Self> {
        Self::parse(&value)
    }
}

/// Stable identity of an object within its class.
///
/// Random 128-bit ids let replicas create objects without coordination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowId(Uuid);

impl RowId {
    /// Generates a new random row id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a row id from a u128, for deterministic fixtures.
    pub const fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    /// Returns the underlying UUID.
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RowId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Fully qualified object identity: class name plus row id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectKey {
    /// Class the object belongs to.
    pub class: String,
    /// Row id within the class.
    pub id: RowId,
}

impl ObjectKey {
    /// Creates an object key.
    pub fn new(class: impl Into<String>, id: RowId) -> Self {
        Self {
            class: class.into(),
            id,
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.class, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_id_hex_roundtrip() {
        let id = ObjectId::from_bytes([0xab; 12]);
        let hex = id.to_string();
        assert_eq!(hex, "abababababababababababab");
        assert_eq!(ObjectId::parse_hex(&hex).unwrap(), id);
    }

    #[test]
    fn object_id_rejects_bad_input() {
        assert!(ObjectId::parse_hex("abc").is_err());
        assert!(ObjectId::parse_hex("zzzzzzzzzzzzzzzzzzzzzzzz").is_err());
    }

    #[test]
    fn object_ids_are_unique() {
        assert_ne!(ObjectId::new(), ObjectId::new());
    }

    #[test]
    fn decimal_parse_and_display() {
        assert_eq!(Decimal128::parse("123.450").unwrap().to_string(), "123.45");
        assert_eq!(Decimal128::parse("-0.05").unwrap().to_string(), "-0.05");
        assert_eq!(Decimal128::parse("1.5e3").unwrap().to_string(), "1500");
        assert_eq!(Decimal128::parse("0.000").unwrap().to_string(), "0");
        assert_eq!(Decimal128::parse("12e-2").unwrap().to_string(), "0.12");
    }

    #[test]
    fn decimal_normalizes_equal_values() {
        assert_eq!(
            Decimal128::parse("1.10").unwrap(),
            Decimal128::parse("1.1").unwrap()
        );
        assert_eq!(Decimal128::new(100, 2).unwrap(), Decimal128::from_int(1));
    }

    #[test]
    fn decimal_ordering_across_scales() {
        let a = Decimal128::parse("1.05").unwrap();
        let b = Decimal128::parse("1.1").unwrap();
        let c = Decimal128::parse("-3").unwrap();
        assert!(a < b);
        assert!(c < a);
        assert_eq!(
            Decimal128::parse("2").unwrap().cmp(&Decimal128::parse("2.0").unwrap()),
            Ordering::Equal
        );
    }

    #[test]
    fn decimal_rejects_garbage() {
        assert!(Decimal128::parse("").is_err());
        assert!(Decimal128::parse("1.2.3").is_err());
        assert!(Decimal128::parse("abc").is_err());
    }

    #[test]
    fn object_key_display() {
        let key = ObjectKey::new("Dog", RowId::from_u128(1));
        assert_eq!(key.to_string(), "Dog(00000000000000000000000000000001)");
    }
}
