use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Serialize, Serializer};

/// SQL parameter value.
///
/// Serializes to the plain JSON scalar the execute endpoints expect;
/// blobs are base64-encoded text on the wire.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn null() -> Self {
        Self::Null
    }

    pub fn integer(value: i64) -> Self {
        Self::Integer(value)
    }

    pub fn real(value: f64) -> Self {
        Self::Real(value)
    }

    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn blob(value: impl Into<Vec<u8>>) -> Self {
        Self::Blob(value.into())
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Integer(value) => serializer.serialize_i64(*value),
            Self::Real(value) => serializer.serialize_f64(*value),
            Self::Text(value) => serializer.serialize_str(value),
            Self::Blob(value) => serializer.serialize_str(&STANDARD.encode(value)),
        }
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Integer(value.into())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Self::Blob(value)
    }
}

impl From<&[u8]> for Value {
    fn from(value: &[u8]) -> Self {
        Self::Blob(value.to_vec())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use crate::Value;

    #[test]
    fn helper_constructors() {
        assert_eq!(Value::null(), Value::Null);
        assert_eq!(Value::integer(7), Value::Integer(7));
        assert_eq!(Value::real(1.25), Value::Real(1.25));
        assert_eq!(Value::text("abc"), Value::Text("abc".to_owned()));
        assert_eq!(Value::blob([1, 2, 3]), Value::Blob(vec![1, 2, 3]));
    }

    #[test]
    fn serializes_to_plain_json_scalars() {
        let encoded = serde_json::to_string(&vec![
            Value::Null,
            Value::integer(42),
            Value::real(1.5),
            Value::text("kit"),
        ])
        .expect("must encode");
        assert_eq!(encoded, r#"[null,42,1.5,"kit"]"#);
    }

    #[test]
    fn blob_encodes_as_base64_text() {
        let encoded = serde_json::to_string(&Value::blob([1, 2, 3])).expect("must encode");
        assert_eq!(encoded, r#""AQID""#);
    }

    #[test]
    fn option_maps_none_to_null() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some(3i64)), Value::Integer(3));
    }
}
