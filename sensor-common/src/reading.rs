use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Number, Value};

pub const ID: &str = "id";
pub const VALUE: &str = "value";
pub const UNIT: &str = "unit";
pub const TIMESTAMP: &str = "timestamp";
pub const LOCATION: &str = "location";

/// Naming convention readings are canonicalized to. Only the sensor id and
/// sensor type keys differ between conventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldConvention {
    #[default]
    CamelCase,
    SnakeCase,
}

impl FieldConvention {
    pub fn sensor_id(self) -> &'static str {
        match self {
            FieldConvention::CamelCase => "sensorId",
            FieldConvention::SnakeCase => "sensor_id",
        }
    }

    pub fn sensor_type(self) -> &'static str {
        match self {
            FieldConvention::CamelCase => "sensorType",
            FieldConvention::SnakeCase => "sensor_type",
        }
    }

    pub fn alternate(self) -> FieldConvention {
        match self {
            FieldConvention::CamelCase => FieldConvention::SnakeCase,
            FieldConvention::SnakeCase => FieldConvention::CamelCase,
        }
    }

    /// Pairs of (canonical, alternate) keys for the fields that get renamed.
    pub fn renamed_fields(self) -> [(&'static str, &'static str); 2] {
        let other = self.alternate();
        [
            (self.sensor_id(), other.sensor_id()),
            (self.sensor_type(), other.sensor_type()),
        ]
    }

    /// Required fields, in the order they are reported when missing.
    pub fn required_fields(self) -> [&'static str; 4] {
        [self.sensor_id(), self.sensor_type(), VALUE, UNIT]
    }
}

impl FromStr for FieldConvention {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "camelCase" | "camel_case" | "camel" => Ok(FieldConvention::CamelCase),
            "snake_case" | "snake" => Ok(FieldConvention::SnakeCase),
            _ => Err(format!("unknown field convention: {s}")),
        }
    }
}

impl fmt::Display for FieldConvention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldConvention::CamelCase => write!(f, "camelCase"),
            FieldConvention::SnakeCase => write!(f, "snake_case"),
        }
    }
}

/// A reading canonicalized to one convention, with `id` and `timestamp`
/// filled in. Only produced by [`crate::normalizer::Normalizer`].
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedReading {
    fields: Map<String, Value>,
    convention: FieldConvention,
}

impl NormalizedReading {
    pub(crate) fn new(fields: Map<String, Value>, convention: FieldConvention) -> Self {
        NormalizedReading { fields, convention }
    }

    pub fn convention(&self) -> FieldConvention {
        self.convention
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// The message key on the queue. `id` is always set after normalization,
    /// but may be a number if the producer sent one.
    pub fn key(&self) -> Option<String> {
        match self.fields.get(ID)? {
            Value::String(id) => Some(id.clone()),
            Value::Number(id) => Some(id.to_string()),
            _ => None,
        }
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }

    pub fn to_json(&self) -> String {
        // Serializing a map of JSON values cannot fail
        Value::Object(self.fields.clone()).to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Coordinates {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Where a sensor sits. Only an object made of `lat`, `lon` and `name` is
/// typed, any other value is kept exactly as the producer sent it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Location {
    Coordinates(Coordinates),
    Other(Value),
}

impl From<Value> for Location {
    fn from(value: Value) -> Self {
        if value.is_object() {
            if let Ok(coordinates) = serde_json::from_value(value.clone()) {
                return Location::Coordinates(coordinates);
            }
        }
        Location::Other(value)
    }
}

impl<'de> Deserialize<'de> for Location {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Value::deserialize(deserializer).map(Location::from)
    }
}

/// A validated reading, as persisted. Keys the pipeline does not know about
/// are kept in `extra` and stored next to the typed fields. `value` keeps
/// the number as received, so integers stay integers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorReading {
    pub id: String,
    pub sensor_id: String,
    pub sensor_type: String,
    pub value: Number,
    pub unit: String,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
