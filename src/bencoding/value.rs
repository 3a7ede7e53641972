use std::collections::BTreeMap;
use std::fmt::{self, Debug, Formatter};

use crate::bencoding::SchemaError;

/// A bencoded value. Dictionary keys are kept as raw bytes so that the `BTreeMap` order is the
/// raw-byte order the encoder has to emit.
#[derive(PartialEq, Eq, Clone)]
pub enum Value {
    Integer(i64),
    String(Vec<u8>),
    List(Vec<Value>),
    Dictionary(BTreeMap<Vec<u8>, Value>),
}

impl Value {
    pub fn string(value: &str) -> Self {
        Self::String(value.as_bytes().to_vec())
    }

    pub fn list() -> Self {
        Self::List(Vec::new())
    }

    pub fn dictionary() -> Self {
        Self::Dictionary(BTreeMap::new())
    }

    pub fn with_value(mut self, value: Value) -> Self {
        if let Self::List(values) = &mut self {
            values.push(value);
        }
        self
    }

    pub fn with_entry(mut self, key: &str, value: Value) -> Self {
        if let Self::Dictionary(entries) = &mut self {
            entries.insert(key.as_bytes().to_vec(), value);
        }
        self
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Integer(_) => "integer",
            Self::String(_) => "string",
            Self::List(_) => "list",
            Self::Dictionary(_) => "dictionary",
        }
    }

    /// Takes the entry out of a dictionary, failing if the value isn't a dictionary or the key is
    /// missing.
    pub fn remove_entry(&mut self, key: &str) -> Result<Value, SchemaError> {
        self.try_remove_entry(key)?
            .ok_or_else(|| SchemaError::MissingField(key.to_string()))
    }

    pub fn try_remove_entry(&mut self, key: &str) -> Result<Option<Value>, SchemaError> {
        match self {
            Self::Dictionary(entries) => Ok(entries.remove(key.as_bytes())),
            other => Err(SchemaError::UnexpectedType {
                expected: "dictionary",
                found: other.kind(),
            }),
        }
    }

    /// Removes a required field and converts it, naming the field on failure.
    pub fn field<T>(&mut self, key: &str) -> Result<T, SchemaError>
    where
        T: TryFrom<Value, Error = SchemaError>,
    {
        let value = self.remove_entry(key)?;
        T::try_from(value).map_err(|err| SchemaError::field(key, err))
    }

    /// Like [`Value::field`], but a missing key yields `None`.
    pub fn optional_field<T>(&mut self, key: &str) -> Result<Option<T>, SchemaError>
    where
        T: TryFrom<Value, Error = SchemaError>,
    {
        match self.try_remove_entry(key)? {
            Some(value) => T::try_from(value)
                .map(Some)
                .map_err(|err| SchemaError::field(key, err)),
            None => Ok(None),
        }
    }
}

impl Debug for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(integer) => write!(f, "{}", integer),
            Self::String(bytes) => match std::str::from_utf8(bytes) {
                Ok(string) => write!(f, "{:?}", string),
                Err(_) => write!(f, "<{} bytes>", bytes.len()),
            },
            Self::List(values) => f.debug_list().entries(values).finish(),
            Self::Dictionary(entries) => f
                .debug_map()
                .entries(
                    entries
                        .iter()
                        .map(|(key, value)| (String::from_utf8_lossy(key), value)),
                )
                .finish(),
        }
    }
}

// -------------------------------------------------------------------------------------------------
// Value -> Rust types

fn unexpected(expected: &'static str, value: &Value) -> SchemaError {
    SchemaError::UnexpectedType {
        expected,
        found: value.kind(),
    }
}

impl TryFrom<Value> for i64 {
    type Error = SchemaError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Integer(integer) => Ok(integer),
            other => Err(unexpected("integer", &other)),
        }
    }
}

macro_rules! try_from_integer {
    ($($ty:ty),*) => {
        $(
            impl TryFrom<Value> for $ty {
                type Error = SchemaError;

                fn try_from(value: Value) -> Result<Self, Self::Error> {
                    let integer = i64::try_from(value)?;
                    <$ty>::try_from(integer).map_err(|_| SchemaError::OutOfRange(integer))
                }
            }
        )*
    };
}

try_from_integer!(usize, u64, u32, u16);

impl TryFrom<Value> for Vec<u8> {
    type Error = SchemaError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::String(bytes) => Ok(bytes),
            other => Err(unexpected("string", &other)),
        }
    }
}

impl TryFrom<Value> for String {
    type Error = SchemaError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let bytes = Vec::<u8>::try_from(value)?;
        String::from_utf8(bytes).map_err(|_| SchemaError::InvalidUtf8)
    }
}

impl TryFrom<Value> for Vec<Value> {
    type Error = SchemaError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::List(values) => Ok(values),
            other => Err(unexpected("list", &other)),
        }
    }
}

impl TryFrom<Value> for Vec<String> {
    type Error = SchemaError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Vec::<Value>::try_from(value)?
            .into_iter()
            .map(String::try_from)
            .collect()
    }
}

impl TryFrom<Value> for std::time::Duration {
    type Error = SchemaError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let seconds = u64::try_from(value)?;
        Ok(Self::from_secs(seconds))
    }
}

impl TryFrom<Value> for size::Size {
    type Error = SchemaError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let bytes = u64::try_from(value)?;
        Ok(Self::from_bytes(bytes))
    }
}

// -------------------------------------------------------------------------------------------------
// Rust types -> Value

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Self::Integer(value as i64)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::string(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value.into_bytes())
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Self::String(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(values: Vec<Value>) -> Self {
        Self::List(values)
    }
}

impl From<&[String]> for Value {
    fn from(values: &[String]) -> Self {
        Self::List(values.iter().map(|value| Value::string(value)).collect())
    }
}
