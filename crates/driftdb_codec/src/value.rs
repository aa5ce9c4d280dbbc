//! Dynamic value type stored in object fields and collections.

use crate::ids::{Decimal128, ObjectId, ObjectKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use uuid::Uuid;

/// A dynamic value.
///
/// Every element kind a property or collection can hold is one variant of
/// this closed set. Values are totally ordered: first by kind, then by
/// content. Doubles use IEEE total ordering so that sets and sorts are well
/// defined even in the presence of NaN.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    /// Null value.
    Null,
    /// Signed 64-bit integer.
    Int(i64),
    /// Boolean value.
    Bool(bool),
    /// Text string (UTF-8).
    String(String),
    /// Byte string.
    Data(Vec<u8>),
    /// Timestamp.
    Date(DateTime<Utc>),
    /// 64-bit float.
    Double(f64),
    /// 12-byte object id.
    ObjectId(ObjectId),
    /// Base-10 decimal.
    Decimal(Decimal128),
    /// UUID.
    Uuid(Uuid),
    /// Reference to another object.
    Link(ObjectKey),
}

impl Value {
    fn kind_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Int(_) => 1,
            Value::Bool(_) => 2,
            Value::String(_) => 3,
            Value::Data(_) => 4,
            Value::Date(_) => 5,
            Value::Double(_) => 6,
            Value::ObjectId(_) => 7,
            Value::Decimal(_) => 8,
            Value::Uuid(_) => 9,
            Value::Link(_) => 10,
        }
    }

    /// Returns the name of this value's kind.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Int(_) => "int",
            Value::Bool(_) => "bool",
            Value::String(_) => "string",
            Value::Data(_) => "data",
            Value::Date(_) => "date",
            Value::Double(_) => "double",
            Value::ObjectId(_) => "objectId",
            Value::Decimal(_) => "decimal",
            Value::Uuid(_) => "uuid",
            Value::Link(_) => "object",
        }
    }

    /// Total ordering across all values.
    pub fn total_cmp(&self, other: &Self) -> Ordering {
        let rank = self.kind_rank().cmp(&other.kind_rank());
        if rank != Ordering::Equal {
            return rank;
        }
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Data(a), Value::Data(b)) => a.cmp(b),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            (Value::Double(a), Value::Double(b)) => a.total_cmp(b),
            (Value::ObjectId(a), Value::ObjectId(b)) => a.cmp(b),
            (Value::Decimal(a), Value::Decimal(b)) => a.cmp(b),
            (Value::Uuid(a), Value::Uuid(b)) => a.cmp(b),
            (Value::Link(a), Value::Link(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }

    /// Returns true if this is `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the integer if this is an `Int`.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the boolean if this is a `Bool`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the string slice if this is a `String`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the double if this is a `Double`.
    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the linked key if this is a `Link`.
    pub fn as_link(&self) -> Option<&ObjectKey> {
        match self {
            Value::Link(key) => Some(key),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.total_cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.total_cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        self.total_cmp(other)
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind_rank().hash(state);
        match self {
            Value::Null => {}
            Value::Int(v) => v.hash(state),
            Value::Bool(v) => v.hash(state),
            Value::String(v) => v.hash(state),
            Value::Data(v) => v.hash(state),
            Value::Date(v) => v.hash(state),
            Value::Double(v) => v.to_bits().hash(state),
            Value::ObjectId(v) => v.hash(state),
            Value::Decimal(v) => v.hash(state),
            Value::Uuid(v) => v.hash(state),
            Value::Link(v) => v.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::String(v) => write!(f, "{v:?}"),
            Value::Data(v) => write!(f, "<{} bytes>", v.len()),
            Value::Date(v) => write!(f, "{}", v.to_rfc3339()),
            Value::Double(v) => write!(f, "{v}"),
            Value::ObjectId(v) => write!(f, "ObjectId({v})"),
            Value::Decimal(v) => write!(f, "{v}"),
            Value::Uuid(v) => write!(f, "{v}"),
            Value::Link(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Data(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Date(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<ObjectId> for Value {
    fn from(v: ObjectId) -> Self {
        Value::ObjectId(v)
    }
}

impl From<Decimal128> for Value {
    fn from(v: Decimal128) -> Self {
        Value::Decimal(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Uuid(v)
    }
}

impl From<ObjectKey> for Value {
    fn from(v: ObjectKey) -> Self {
        Value::Link(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// The declared type of a property or collection element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    /// `Value::Int`.
    Int,
    /// `Value::Bool`.
    Bool,
    /// `Value::String`.
    String,
    /// `Value::Data`.
    Data,
    /// `Value::Date`.
    Date,
    /// `Value::Double`.
    Double,
    /// `Value::ObjectId`.
    ObjectId,
    /// `Value::Decimal`.
    Decimal,
    /// `Value::Uuid`.
    Uuid,
    /// Any value, including null.
    Any,
    /// Link to an object of the named class.
    Object(String),
}

impl ValueType {
    /// Returns true if a non-null `value` is acceptable for this type.
    ///
    /// Nullability is decided by the caller; `Any` is the only type that
    /// accepts `Null` on its own.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (ValueType::Any, _) => true,
            (ValueType::Int, Value::Int(_))
            | (ValueType::Bool, Value::Bool(_))
            | (ValueType::String, Value::String(_))
            | (ValueType::Data, Value::Data(_))
            | (ValueType::Date, Value::Date(_))
            | (ValueType::Double, Value::Double(_))
            | (ValueType::ObjectId, Value::ObjectId(_))
            | (ValueType::Decimal, Value::Decimal(_))
            | (ValueType::Uuid, Value::Uuid(_)) => true,
            (ValueType::Object(class), Value::Link(key)) => &key.class == class,
            _ => false,
        }
    }

    /// Returns true if this type holds links.
    pub fn is_object(&self) -> bool {
        matches!(self, ValueType::Object(_))
    }

    /// Returns the default stored for a required property of this type.
    pub fn default_value(&self) -> Value {
        match self {
            ValueType::Int => Value::Int(0),
            ValueType::Bool => Value::Bool(false),
            ValueType::String => Value::String(String::new()),
            ValueType::Data => Value::Data(Vec::new()),
            ValueType::Date => Value::Date(DateTime::<Utc>::default()),
            ValueType::Double => Value::Double(0.0),
            ValueType::ObjectId => Value::ObjectId(ObjectId::from_bytes([0; 12])),
            ValueType::Decimal => Value::Decimal(Decimal128::from_int(0)),
            ValueType::Uuid => Value::Uuid(Uuid::nil()),
            ValueType::Any | ValueType::Object(_) => Value::Null,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Int => f.write_str("int"),
            ValueType::Bool => f.write_str("bool"),
            ValueType::String => f.write_str("string"),
            ValueType::Data => f.write_str("data"),
            ValueType::Date => f.write_str("date"),
            ValueType::Double => f.write_str("double"),
            ValueType::ObjectId => f.write_str("objectId"),
            ValueType::Decimal => f.write_str("decimal"),
            ValueType::Uuid => f.write_str("uuid"),
            ValueType::Any => f.write_str("any"),
            ValueType::Object(class) => write!(f, "object<{class}>"),
        }
    }
}
