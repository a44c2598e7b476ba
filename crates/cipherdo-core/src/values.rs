//! The closed set of value kinds that can be stored as encrypted fields.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Value kinds eligible for transparent field encryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SupportedType {
    Text,
    Integer,
    Float,
    Boolean,
    Timestamp,
    Identifier,
}

impl SupportedType {
    pub const ALL: [SupportedType; 6] = [
        SupportedType::Text,
        SupportedType::Integer,
        SupportedType::Float,
        SupportedType::Boolean,
        SupportedType::Timestamp,
        SupportedType::Identifier,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SupportedType::Text => "Text",
            SupportedType::Integer => "Integer",
            SupportedType::Float => "Float",
            SupportedType::Boolean => "Boolean",
            SupportedType::Timestamp => "Timestamp",
            SupportedType::Identifier => "Identifier",
        }
    }

    /// Name a schema field uses to bind to this kind's transformer.
    pub fn transformer_name(self) -> &'static str {
        match self {
            SupportedType::Text => "TextTransformer",
            SupportedType::Integer => "IntegerTransformer",
            SupportedType::Float => "FloatTransformer",
            SupportedType::Boolean => "BooleanTransformer",
            SupportedType::Timestamp => "TimestampTransformer",
            SupportedType::Identifier => "IdentifierTransformer",
        }
    }
}

impl fmt::Display for SupportedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single field value tagged with its kind.
///
/// The serialized form carries the tag, so a payload written for one kind
/// never deserializes as another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Timestamp(#[serde(with = "timestamp_parts")] DateTime<Utc>),
    Identifier(Uuid),
}

impl FieldValue {
    pub fn kind(&self) -> SupportedType {
        match self {
            FieldValue::Text(_) => SupportedType::Text,
            FieldValue::Integer(_) => SupportedType::Integer,
            FieldValue::Float(_) => SupportedType::Float,
            FieldValue::Boolean(_) => SupportedType::Boolean,
            FieldValue::Timestamp(_) => SupportedType::Timestamp,
            FieldValue::Identifier(_) => SupportedType::Identifier,
        }
    }
}

/// Rust types that map one-to-one onto a [`SupportedType`].
pub trait FieldType: Sized + Clone + Send + Sync + 'static {
    const KIND: SupportedType;

    fn into_value(self) -> FieldValue;

    /// Unwrap a value of the matching kind; `None` for any other kind.
    fn from_value(value: FieldValue) -> Option<Self>;
}

macro_rules! field_type {
    ($ty:ty, $variant:ident) => {
        impl FieldType for $ty {
            const KIND: SupportedType = SupportedType::$variant;

            fn into_value(self) -> FieldValue {
                FieldValue::$variant(self)
            }

            fn from_value(value: FieldValue) -> Option<Self> {
                match value {
                    FieldValue::$variant(inner) => Some(inner),
                    _ => None,
                }
            }
        }

        impl From<$ty> for FieldValue {
            fn from(value: $ty) -> Self {
                FieldValue::$variant(value)
            }
        }
    };
}

field_type!(String, Text);
field_type!(i64, Integer);
field_type!(f64, Float);
field_type!(bool, Boolean);
field_type!(DateTime<Utc>, Timestamp);
field_type!(Uuid, Identifier);

/// Whole seconds plus sub-second nanos, which covers chrono's full range
/// without the precision loss of a single integer unit.
mod timestamp_parts {
    use chrono::{DateTime, Utc};
    use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    struct Parts {
        secs: i64,
        nanos: u32,
    }

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        Parts {
            secs: ts.timestamp(),
            nanos: ts.timestamp_subsec_nanos(),
        }
        .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let parts = Parts::deserialize(deserializer)?;
        DateTime::from_timestamp(parts.secs, parts.nanos)
            .ok_or_else(|| D::Error::custom("timestamp out of range"))
    }
}
