//! Logical shape of a stat representation.
//!
//! ```text
//! { "<stat name>": {
//!     "TEMP":    { "dataType": "Real", "value": "21.5", "reference": "/.bacnet/…/analog-value,1", "displayName": "…" },
//!     "FAN":     { … , "errorText": "CLASS_OS::QERR_CODE_DEVICE_OFFLINE" },
//!     … } }
//! ```
//!
//! The remote views service names the same fields `$base` and `physical`;
//! both spellings are accepted on input.

use core::fmt;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointNode {
    #[serde(default, alias = "$base")]
    pub data_type: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub value: String,
    #[serde(default, alias = "physical")]
    pub reference: Option<String>,
    #[serde(default)]
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_text: Option<String>,
}

/// Values are strings on the wire, but numbers and booleans show up too.
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    struct V;
    impl<'de> serde::de::Visitor<'de> for V {
        type Value = String;

        fn expecting(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
            write!(f, "a string, number or boolean point value")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(value.to_string())
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(value.to_string())
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(value.to_string())
        }

        fn visit_f64<E>(self, value: f64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(value.to_string())
        }

        fn visit_bool<E>(self, value: bool) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(value.to_string())
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(String::new())
        }
    }

    deserializer.deserialize_any(V)
}

/// Failure to read a whole document or a single point node.
#[derive(Debug)]
pub enum ParseError {
    /// The document is not a JSON object with at least one key.
    NotAStat,
    /// The stat body under the name key is not an object.
    MalformedStat(String),
    MissingPoint(&'static str),
    Point {
        key: &'static str,
        source: serde_path_to_error::Error<serde_json::Error>,
    },
    Json(serde_json::Error),
}

impl Display for ParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::NotAStat => write!(f, "document is not a keyed stat object"),
            ParseError::MalformedStat(name) => write!(f, "stat \"{}\" is not an object", name),
            ParseError::MissingPoint(key) => write!(f, "point {} missing", key),
            ParseError::Point { key, source } => write!(f, "point {} malformed at {}: {}", key, source.path(), source.inner()),
            ParseError::Json(e) => write!(f, "json error: {}", e),
        }
    }
}

impl std::error::Error for ParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ParseError::Point { source, .. } => Some(source.inner()),
            ParseError::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ParseError {
    fn from(value: serde_json::Error) -> Self {
        ParseError::Json(value)
    }
}

/// Split a document into its stat name and the object holding the point nodes.
///
/// A body that is not an object still yields the name, with
/// `MalformedStat` reported alongside so the caller can log it.
pub fn split_document(doc: &Value) -> Result<(String, Option<&Map<String, Value>>), ParseError> {
    let outer = doc.as_object().ok_or(ParseError::NotAStat)?;
    let (name, body) = outer.iter().next().ok_or(ParseError::NotAStat)?;
    Ok((name.clone(), body.as_object()))
}

/// Decode the node stored under `key`, naming the failing field on error.
pub fn point_node(points: &Map<String, Value>, key: &'static str) -> Result<PointNode, ParseError> {
    let raw = points.get(key).ok_or(ParseError::MissingPoint(key))?;
    if !raw.is_object() {
        return Err(ParseError::MissingPoint(key));
    }
    serde_path_to_error::deserialize(raw).map_err(|source| ParseError::Point { key, source })
}

/// Assemble a document from a name and `(key, node)` pairs.
pub fn build_document<'a>(name: &str, nodes: impl IntoIterator<Item = (&'a str, PointNode)>) -> Result<Value, ParseError> {
    let mut body = Map::new();
    for (key, node) in nodes {
        body.insert(key.to_string(), serde_json::to_value(node)?);
    }
    let mut outer = Map::new();
    outer.insert(name.to_string(), Value::Object(body));
    Ok(Value::Object(outer))
}
