use std::fmt;

use serde::de::{MapAccess, SeqAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::number::Number;

/// Dynamic tagged value exchanged between a client and an exporter: null, bool, number, string,
/// list or map. Absent (a missing map entry) is distinct from [`Value::Null`].
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    List(Vec<Value>),
    Map(Vec<(String, Value)>),
}

impl Value {
    pub fn as_map(&self) -> Option<&[(String, Value)]> {
        match self {
            Value::Map(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map()?.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::String(s) => serializer.serialize_str(s),
            Value::List(items) => items.serialize(serializer),
            Value::Map(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
            Value::Number(Number::Float(f)) => serializer.serialize_f64(*f),
            Value::Number(n @ Number::Int(i)) => {
                if n.is_safe_integer() {
                    serializer.serialize_i64(*i)
                } else {
                    serializer.serialize_str(&i.to_string())
                }
            }
            Value::Number(n @ Number::UInt(u)) => {
                if n.is_safe_integer() {
                    serializer.serialize_u64(*u)
                } else {
                    serializer.serialize_str(&u.to_string())
                }
            }
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(ValueVisitor)
    }
}

/// Reparses a string that [`Value`]'s `Serialize` impl may have produced in place of a number
/// beyond `Number::is_safe_integer` (see its arms above). Only the canonical decimal rendering
/// of such an integer round-trips back to a `Number`; a string that merely looks like a small
/// or non-canonical number (`Serialize` never string-encodes those) stays a `Value::String`.
fn parse_overflowed_integer(s: &str) -> Option<Value> {
    if let Ok(i) = s.parse::<i64>() {
        let number = Number::Int(i);
        return (!number.is_safe_integer() && i.to_string() == s).then_some(Value::Number(number));
    }
    if let Ok(u) = s.parse::<u64>() {
        let number = Number::normalize_u64(u);
        return (!number.is_safe_integer() && u.to_string() == s).then_some(Value::Number(number));
    }
    None
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("a null, bool, number, string, list or map")
    }

    fn visit_unit<E>(self) -> Result<Self::Value, E> {
        Ok(Value::Null)
    }

    fn visit_none<E>(self) -> Result<Self::Value, E> {
        Ok(Value::Null)
    }

    fn visit_bool<E>(self, v: bool) -> Result<Self::Value, E> {
        Ok(Value::Bool(v))
    }

    fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
        Ok(Value::Number(Number::Int(v)))
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
        Ok(Value::Number(Number::normalize_u64(v)))
    }

    fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E> {
        Ok(Value::Number(Number::Float(v)))
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E> {
        Ok(parse_overflowed_integer(v).unwrap_or_else(|| Value::String(v.to_owned())))
    }

    fn visit_string<E>(self, v: String) -> Result<Self::Value, E> {
        match parse_overflowed_integer(&v) {
            Some(value) => Ok(value),
            None => Ok(Value::String(v)),
        }
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(Value::List(items))
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
        while let Some((key, value)) = map.next_entry::<String, Value>()? {
            entries.push((key, value));
        }
        Ok(Value::Map(entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_large_int_as_string() {
        let value = Value::Number(Number::Int(i64::MAX));
        let text = serde_json::to_string(&value).unwrap();
        assert_eq!(text, format!("\"{}\"", i64::MAX));
    }

    #[test]
    fn serializes_small_int_as_number() {
        let value = Value::Number(Number::Int(42));
        let text = serde_json::to_string(&value).unwrap();
        assert_eq!(text, "42");
    }

    #[test]
    fn preserves_map_insertion_order() {
        let value = Value::Map(vec![
            ("b".to_owned(), Value::Bool(true)),
            ("a".to_owned(), Value::Bool(false)),
        ]);
        let text = serde_json::to_string(&value).unwrap();
        assert_eq!(text, r#"{"b":true,"a":false}"#);
    }

    #[test]
    fn null_is_distinct_from_absent_map_entry() {
        let value = Value::Map(vec![("present".to_owned(), Value::Null)]);
        assert_eq!(value.get("present"), Some(&Value::Null));
        assert_eq!(value.get("absent"), None);
    }

    /// The wire path `service.rs`/`stub_tree.rs` actually use: `serde_json::to_string(&Value)`
    /// then `from_str::<Value>(...)`, not `jmp_value::convert::encode`/`decode`'s `JsonValue`
    /// intermediate. A large integer must survive this round trip too (spec §8 invariant 2).
    #[test]
    fn large_uint_round_trips_through_json_string_on_the_wire_path() {
        let value = Value::Number(Number::UInt(u64::MAX));
        let wire = serde_json::to_string(&value).unwrap();
        assert_eq!(wire, format!("\"{}\"", u64::MAX));
        let decoded: Value = serde_json::from_str(&wire).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn large_negative_int_round_trips_through_json_string_on_the_wire_path() {
        let value = Value::Number(Number::Int(i64::MIN));
        let wire = serde_json::to_string(&value).unwrap();
        let decoded: Value = serde_json::from_str(&wire).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn a_string_that_merely_looks_like_a_small_number_is_not_reparsed() {
        let value = Value::String("42".to_owned());
        let wire = serde_json::to_string(&value).unwrap();
        let decoded: Value = serde_json::from_str(&wire).unwrap();
        assert_eq!(decoded, value);
    }
}
