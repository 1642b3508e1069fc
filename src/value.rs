use base64::prelude::{BASE64_STANDARD, Engine as _};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// A value flowing between scenario scripts and the engine: variables, the logical `response`,
/// host-provided values.
///
/// `Bytes` is kept distinct from `String` so that binary responses are served verbatim.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

/// A logical response value could not be converted into bytes.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SerializationError {
    #[error("the number {0} cannot be represented in JSON")]
    NonFiniteFloat(f64),
}

impl Value {
    /// Convert any `Serialize` value, going through its JSON representation.
    pub fn from_serialize<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_value(value).map(Value::from)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Look up `key` if this value is a map.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map().and_then(|map| map.get(key))
    }

    /// Render a scalar as plain text: strings without quotes, bytes lossily decoded.
    /// Lists and maps are rendered as JSON.
    pub fn to_text(&self) -> Result<String, SerializationError> {
        Ok(match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => {
                if !f.is_finite() {
                    return Err(SerializationError::NonFiniteFloat(*f));
                }
                f.to_string()
            }
            Value::String(s) => s.clone(),
            Value::Bytes(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            Value::List(_) | Value::Map(_) => self.to_json()?.to_string(),
        })
    }

    /// The JSON representation of this value. Bytes are encoded as base64 strings.
    pub fn to_json(&self) -> Result<serde_json::Value, SerializationError> {
        Ok(match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Integer(i) => serde_json::Value::Number((*i).into()),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .ok_or(SerializationError::NonFiniteFloat(*f))?,
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Bytes(bytes) => serde_json::Value::String(BASE64_STANDARD.encode(bytes)),
            Value::List(items) => serde_json::Value::Array(
                items
                    .iter()
                    .map(Value::to_json)
                    .collect::<Result<_, _>>()?,
            ),
            Value::Map(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(key, value)| Ok((key.clone(), value.to_json()?)))
                    .collect::<Result<_, SerializationError>>()?,
            ),
        })
    }

    /// Serialize a logical response into body bytes, together with the content type implied by
    /// its shape.
    ///
    /// An absent or null response, as well as an empty byte sequence, become the canonical
    /// zero-length body.
    pub fn into_body(
        value: Option<Value>,
    ) -> Result<(Vec<u8>, Option<&'static str>), SerializationError> {
        let value = match value {
            None | Some(Value::Null) => return Ok((Vec::new(), None)),
            Some(value) => value,
        };
        Ok(match value {
            Value::Bytes(bytes) if bytes.is_empty() => (Vec::new(), None),
            Value::Bytes(bytes) => (bytes, Some("application/octet-stream")),
            Value::String(s) if s.is_empty() => (Vec::new(), None),
            Value::String(s) => (s.into_bytes(), Some("text/plain")),
            Value::List(_) | Value::Map(_) => {
                let json = value.to_json()?;
                (json.to_string().into_bytes(), Some("application/json"))
            }
            scalar => (scalar.to_text()?.into_bytes(), Some("text/plain")),
        })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_text() {
            Ok(text) => f.write_str(&text),
            Err(_) => write!(f, "{:?}", self),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Map(
                map.into_iter()
                    .map(|(key, value)| (key, Value::from(value)))
                    .collect(),
            ),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value::Bytes(bytes)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Value::Map(map)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn absent_and_null_responses_serialize_to_zero_bytes() {
        assert_eq!(Value::into_body(None).unwrap(), (vec![], None));
        assert_eq!(Value::into_body(Some(Value::Null)).unwrap(), (vec![], None));
        assert_eq!(
            Value::into_body(Some(Value::Bytes(vec![]))).unwrap(),
            (vec![], None)
        );
        assert_eq!(
            Value::into_body(Some(Value::String(String::new()))).unwrap(),
            (vec![], None)
        );
    }

    #[test]
    fn bytes_pass_through_unchanged() {
        let bytes = vec![0u8, 159, 146, 150, 255];

        let (body, mime) = Value::into_body(Some(Value::Bytes(bytes.clone()))).unwrap();

        assert_eq!(body, bytes);
        assert_eq!(mime, Some("application/octet-stream"));
    }

    #[test]
    fn strings_are_not_json_quoted() {
        let (body, mime) = Value::into_body(Some("hello world".into())).unwrap();

        assert_eq!(body, b"hello world");
        assert_eq!(mime, Some("text/plain"));
    }

    #[test]
    fn structured_values_serialize_as_json() {
        let value = Value::from(json!({ "success": true, "items": [1, 2.5, "x", null] }));

        let (body, mime) = Value::into_body(Some(value)).unwrap();

        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed, json!({ "success": true, "items": [1, 2.5, "x", null] }));
        assert_eq!(mime, Some("application/json"));
    }

    #[test]
    fn nested_bytes_are_base64_encoded() {
        let mut map = BTreeMap::new();
        map.insert("data".to_string(), Value::Bytes(b"hi".to_vec()));

        assert_eq!(Value::Map(map).to_json().unwrap(), json!({ "data": "aGk=" }));
    }

    #[test]
    fn non_finite_floats_cannot_be_serialized() {
        let value = Value::List(vec![Value::Float(f64::INFINITY)]);

        assert_eq!(
            Value::into_body(Some(value)).unwrap_err(),
            SerializationError::NonFiniteFloat(f64::INFINITY)
        );
    }

    #[test]
    fn serializable_values_convert_through_json() {
        #[derive(Serialize)]
        struct Greeting {
            hello: &'static str,
        }

        let value = Value::from_serialize(&Greeting { hello: "world" }).unwrap();

        assert_eq!(value.get("hello"), Some(&Value::from("world")));
    }
}
