//! Propagation carrier: the flat header map a trace context travels in.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Raw transport header table. Brokers do not promise string values, so
/// headers are kept as JSON values until they are coerced into a [`Carrier`].
pub type HeaderTable = BTreeMap<String, Value>;

/// String-keyed propagation headers. Keys are case-insensitive and stored
/// lower-cased; iteration order is irrelevant to consumers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Carrier(BTreeMap<String, String>);

impl Carrier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(&key.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl AsRef<str>, value: impl Into<String>) {
        self.0
            .insert(key.as_ref().to_ascii_lowercase(), value.into());
    }

    pub fn with(mut self, key: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(&key.to_ascii_lowercase())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Build a carrier from transport headers. Values that cannot be read
    /// as text are skipped, so this never fails.
    pub fn from_header_table(table: &HeaderTable) -> Self {
        let mut carrier = Self::new();
        for (key, value) in table {
            if let Some(text) = coerce_header_value(value) {
                carrier.insert(key, text);
            }
        }
        carrier
    }

    /// Build a carrier from a JSON object, ignoring anything else.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Object(map) => {
                let mut carrier = Self::new();
                for (key, value) in map {
                    if let Some(text) = coerce_header_value(value) {
                        carrier.insert(key, text);
                    }
                }
                carrier
            }
            _ => Self::new(),
        }
    }

    pub fn to_header_table(&self) -> HeaderTable {
        self.0
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect()
    }
}

impl FromIterator<(String, String)> for Carrier {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut carrier = Self::new();
        for (key, value) in iter {
            carrier.insert(key, value);
        }
        carrier
    }
}

/// Read a header value as text.
///
/// Strings pass through, numbers and booleans are rendered, byte arrays are
/// accepted when they hold UTF-8. Null, objects and other arrays yield `None`.
pub fn coerce_header_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) => utf8_bytes(items),
        Value::Null | Value::Object(_) => None,
    }
}

fn utf8_bytes(items: &[Value]) -> Option<String> {
    if items.is_empty() {
        return None;
    }
    let bytes = items
        .iter()
        .map(|v| v.as_u64().and_then(|n| u8::try_from(n).ok()))
        .collect::<Option<Vec<u8>>>()?;
    String::from_utf8(bytes).ok()
}
