use serde_json::{Number, Value};
use thiserror::Error;

use crate::reading::{
    json_type_name, Location, NormalizedReading, SensorReading, ID, LOCATION, TIMESTAMP, UNIT,
    VALUE,
};

/// Why a reading was rejected. The message is what ends up in the
/// dead-letter record.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Rejection {
    #[error("missing required fields: {}", format_field_list(.0))]
    MissingFields(Vec<&'static str>),
    #[error("invalid value type: {0}")]
    InvalidValueType(&'static str),
    #[error("negative value: {0}")]
    NegativeValue(Number),
}

fn format_field_list(fields: &[&str]) -> String {
    let quoted: Vec<String> = fields.iter().map(|field| format!("'{field}'")).collect();
    format!("[{}]", quoted.join(", "))
}

/// Required fields that are absent or null, in reporting order.
pub fn missing_fields(reading: &NormalizedReading) -> Vec<&'static str> {
    reading
        .convention()
        .required_fields()
        .into_iter()
        .filter(|field| matches!(reading.get(field), None | Some(Value::Null)))
        .collect()
}

/// Checks a normalized reading and converts it into its typed form. Rules
/// are applied in order and the first failure is returned.
pub fn validate(reading: &NormalizedReading) -> Result<SensorReading, Rejection> {
    let missing = missing_fields(reading);
    if !missing.is_empty() {
        return Err(Rejection::MissingFields(missing));
    }

    let number = match reading.get(VALUE) {
        Some(Value::Number(number)) => number,
        other => {
            return Err(Rejection::InvalidValueType(
                other.map_or("null", json_type_name),
            ))
        }
    };
    if !matches!(number.as_f64(), Some(value) if value >= 0.0) {
        return Err(Rejection::NegativeValue(number.clone()));
    }

    let convention = reading.convention();
    let sensor_id_key = convention.sensor_id();
    let sensor_type_key = convention.sensor_type();

    let location = match reading.get(LOCATION) {
        None | Some(Value::Null) => None,
        Some(value) => Some(Location::from(value.clone())),
    };

    let known = [ID, sensor_id_key, sensor_type_key, VALUE, UNIT, TIMESTAMP, LOCATION];
    let extra = reading
        .fields()
        .iter()
        .filter(|(key, _)| !known.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    Ok(SensorReading {
        id: text(reading, ID),
        sensor_id: text(reading, sensor_id_key),
        sensor_type: text(reading, sensor_type_key),
        value: number.clone(),
        unit: text(reading, UNIT),
        timestamp: text(reading, TIMESTAMP),
        location,
        extra,
    })
}

/// Descriptive fields are stored as text: strings as they are, anything
/// else as its JSON rendering. `id` and `timestamp` are always set after
/// normalization and rule 1 covers the rest.
fn text(reading: &NormalizedReading, field: &str) -> String {
    match reading.get(field) {
        Some(Value::String(value)) => value.clone(),
        Some(value) => value.to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::normalizer::Normalizer;
    use crate::reading::{Coordinates, FieldConvention};
    use crate::test_utils::FixedTime;
    use serde_json::json;

    fn normalize(convention: FieldConvention, value: Value) -> NormalizedReading {
        let normalizer = Normalizer::new(
            convention,
            Arc::new(FixedTime {
                time: "2024-03-01T10:00:00.000000Z".to_string(),
            }),
        );
        match value {
            Value::Object(map) => normalizer.normalize(map),
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn accepts_complete_reading() {
        let reading = normalize(
            FieldConvention::CamelCase,
            json!({
                "id": "r1",
                "sensorId": "s1",
                "sensorType": "temperature",
                "value": 22.5,
                "unit": "°C",
                "location": {"lat": 1.0, "lon": 2.0, "name": "lab"},
                "firmware": "1.2"
            }),
        );

        let accepted = validate(&reading).expect("reading should be accepted");
        assert_eq!(accepted.id, "r1");
        assert_eq!(accepted.sensor_id, "s1");
        assert_eq!(accepted.sensor_type, "temperature");
        assert_eq!(accepted.value.as_f64(), Some(22.5));
        assert_eq!(accepted.unit, "°C");
        assert_eq!(accepted.timestamp, "2024-03-01T10:00:00.000000Z");
        assert_eq!(
            accepted.location,
            Some(Location::Coordinates(Coordinates {
                lat: Some(1.0),
                lon: Some(2.0),
                name: Some("lab".to_string()),
            }))
        );
        assert_eq!(accepted.extra.len(), 1);
        assert_eq!(accepted.extra.get("firmware"), Some(&json!("1.2")));
    }

    #[test]
    fn lists_missing_fields_in_order() {
        let reading = normalize(
            FieldConvention::CamelCase,
            json!({"sensorType": "humidity", "value": 30.0, "unit": "%"}),
        );
        let rejection = validate(&reading).expect_err("reading should be rejected");
        assert_eq!(rejection.to_string(), "missing required fields: ['sensorId']");

        let reading = normalize(
            FieldConvention::SnakeCase,
            json!({"sensorType": "humidity", "unit": null}),
        );
        assert_eq!(missing_fields(&reading), vec!["sensor_id", "value", "unit"]);
        assert_eq!(
            validate(&reading).expect_err("reading should be rejected").to_string(),
            "missing required fields: ['sensor_id', 'value', 'unit']"
        );
    }

    #[test]
    fn rejects_non_numeric_value() {
        let reading = normalize(
            FieldConvention::CamelCase,
            json!({"sensorId": "s1", "sensorType": "temperature", "value": "hot", "unit": "°C"}),
        );
        assert_eq!(
            validate(&reading),
            Err(Rejection::InvalidValueType("string"))
        );

        let reading = normalize(
            FieldConvention::CamelCase,
            json!({"sensorId": "s1", "sensorType": "temperature", "value": true, "unit": "°C"}),
        );
        assert_eq!(
            validate(&reading).expect_err("reading should be rejected").to_string(),
            "invalid value type: boolean"
        );
    }

    #[test]
    fn rejects_negative_value_for_any_sensor_type() {
        for sensor_type in ["temperature", "humidity", "air_quality", "anything"] {
            let reading = normalize(
                FieldConvention::CamelCase,
                json!({"sensorId": "bad1", "sensorType": sensor_type, "value": -10.0, "unit": "°C"}),
            );
            assert_eq!(
                validate(&reading).expect_err("reading should be rejected").to_string(),
                "negative value: -10.0"
            );
        }
    }

    #[test]
    fn missing_fields_take_precedence_over_value_checks() {
        let reading = normalize(
            FieldConvention::CamelCase,
            json!({"sensorType": "temperature", "value": -3, "unit": "°C"}),
        );
        assert_eq!(
            validate(&reading),
            Err(Rejection::MissingFields(vec!["sensorId"]))
        );
    }

    #[test]
    fn zero_is_accepted() {
        let reading = normalize(
            FieldConvention::CamelCase,
            json!({"sensorId": 7, "sensorType": "humidity", "value": 0, "unit": "%"}),
        );
        let accepted = validate(&reading).expect("reading should be accepted");
        assert_eq!(accepted.sensor_id, "7");
        assert_eq!(accepted.value, Number::from(0));
    }

    #[test]
    fn descriptors_of_other_types_are_kept_as_text() {
        let reading = normalize(
            FieldConvention::CamelCase,
            json!({
                "sensorId": "s1",
                "sensorType": ["temperature"],
                "value": 1,
                "unit": 3,
                "timestamp": 1709287200
            }),
        );

        let accepted = validate(&reading).expect("reading should be accepted");
        assert_eq!(accepted.sensor_type, r#"["temperature"]"#);
        assert_eq!(accepted.unit, "3");
        assert_eq!(accepted.timestamp, "1709287200");
    }

    #[test]
    fn keeps_unrecognized_location_as_received() {
        for location in [json!("kitchen"), json!({"lat": 1.0, "alt": 3.0})] {
            let reading = normalize(
                FieldConvention::CamelCase,
                json!({"id": "r1", "sensorId": "s1", "sensorType": "t", "value": 1, "unit": "u", "location": location}),
            );

            let accepted = validate(&reading).expect("reading should be accepted");
            assert_eq!(accepted.location, Some(Location::Other(location.clone())));
            assert!(accepted.extra.is_empty());

            // What gets stored must read back as the same reading
            let stored = serde_json::to_value(&accepted).expect("failed to serialize");
            assert_eq!(stored["location"], location);
            let read_back: SensorReading =
                serde_json::from_value(stored).expect("failed to read back");
            assert_eq!(read_back, accepted);
        }
    }
}
