use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::number::Number;
use crate::value::Value;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("value is not representable in the driver value codec")]
    NotRepresentable(#[source] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("value does not match the expected shape")]
    Mismatch(#[source] serde_json::Error),
}

/// Encodes any serializable native value into the dynamic tagged [`Value`].
pub fn encode<T>(value: &T) -> Result<Value, EncodeError>
where
    T: Serialize,
{
    let json = serde_json::to_value(value).map_err(EncodeError::NotRepresentable)?;
    Ok(from_json(json))
}

/// Decodes a dynamic tagged [`Value`] back into a native type.
///
/// `decode(encode(v)) == v` holds for any `v` produced by [`encode`], since a [`Number`] always
/// has exactly one representation (the `i64`/`u64` split is normalized at construction time) and
/// maps preserve insertion order end to end.
pub fn decode<T>(value: Value) -> Result<T, DecodeError>
where
    T: DeserializeOwned,
{
    let json = to_json(&value);
    serde_json::from_value(json).map_err(DecodeError::Mismatch)
}

fn from_json(json: JsonValue) -> Value {
    match json {
        JsonValue::Null => Value::Null,
        JsonValue::Bool(b) => Value::Bool(b),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Number(Number::Int(i))
            } else if let Some(u) = n.as_u64() {
                Value::Number(Number::UInt(u))
            } else {
                Value::Number(Number::Float(n.as_f64().unwrap_or_default()))
            }
        }
        JsonValue::String(s) => Value::String(s),
        JsonValue::Array(items) => Value::List(items.into_iter().map(from_json).collect()),
        JsonValue::Object(entries) => Value::Map(entries.into_iter().map(|(k, v)| (k, from_json(v))).collect()),
    }
}

fn to_json(value: &Value) -> JsonValue {
    match value {
        Value::Null => JsonValue::Null,
        Value::Bool(b) => JsonValue::Bool(*b),
        Value::Number(Number::Int(i)) => JsonValue::Number((*i).into()),
        Value::Number(Number::UInt(u)) => JsonValue::Number((*u).into()),
        Value::Number(Number::Float(f)) => serde_json::Number::from_f64(*f).map(JsonValue::Number).unwrap_or(JsonValue::Null),
        Value::String(s) => JsonValue::String(s.clone()),
        Value::List(items) => JsonValue::Array(items.iter().map(to_json).collect()),
        Value::Map(entries) => JsonValue::Object(entries.iter().map(|(k, v)| (k.clone(), to_json(v))).collect()),
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct VoltageReading {
        volts: f64,
        sequence: u64,
        label: Option<String>,
    }

    #[test]
    fn round_trips_a_struct() {
        let reading = VoltageReading {
            volts: 12.1,
            sequence: 7,
            label: None,
        };
        let value = encode(&reading).unwrap();
        let decoded: VoltageReading = decode(value).unwrap();
        assert_eq!(decoded, reading);
    }

    #[test]
    fn round_trips_a_value_directly() {
        let value = Value::Map(vec![
            ("name".to_owned(), Value::String("probe-1".to_owned())),
            ("retries".to_owned(), Value::Number(Number::Int(3))),
            ("huge".to_owned(), Value::Number(Number::UInt(u64::MAX))),
            ("tags".to_owned(), Value::List(vec![Value::Bool(true), Value::Null])),
        ]);

        let json = to_json(&value);
        let roundtripped = from_json(json);
        assert_eq!(roundtripped, value);
    }

    #[test]
    fn round_trips_large_u64_without_precision_loss() {
        let original = u64::MAX;
        let value = encode(&original).unwrap();
        let decoded: u64 = decode(value).unwrap();
        assert_eq!(decoded, original);
    }
}
