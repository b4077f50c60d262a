//! Turn the model's free-text answer into validated vehicle counts.

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("AI response is not valid JSON: {0}")]
    Json(String),

    #[error("AI response format error: {0}")]
    Format(String),
}

fn format_error(message: impl Into<String>) -> ParseError {
    ParseError::Format(message.into())
}

/// Counts reported by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VehicleCounts {
    #[serde(rename = "Vehicles_Present", serialize_with = "true_false")]
    pub vehicles_present: bool,
    #[serde(rename = "Cars")]
    pub cars: u64,
    #[serde(rename = "Bikes")]
    pub bikes: u64,
    #[serde(rename = "Trucks")]
    pub trucks: u64,
    #[serde(rename = "Buses")]
    pub buses: u64,
    #[serde(rename = "Unknown")]
    pub unknown: u64,
}

fn true_false<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(if *value { "True" } else { "False" })
}

/// Strip surrounding markdown fences and isolate the JSON object.
fn clean(text: &str) -> Result<&str, ParseError> {
    let mut text = text.trim();

    if text.len() >= 6 && text.starts_with("```") && text.ends_with("```") {
        text = text[3..text.len() - 3].trim();
        if let Some(rest) = text.strip_prefix("json") {
            text = rest.trim();
        }
    }

    if !(text.starts_with('{') && text.ends_with('}')) {
        match (text.find('{'), text.rfind('}')) {
            (Some(first), Some(last)) if last > first => {
                warn!(
                    "Response was not a bare JSON object, extracting the outermost braces: {:.100}",
                    text
                );
                text = text[first..=last].trim();
            }
            _ => {
                return Err(format_error(
                    "Response does not contain a recognizable JSON object structure after cleaning.",
                ))
            }
        }
    }

    if text.is_empty() {
        return Err(format_error("Cleaned response text is empty after processing."));
    }
    Ok(text)
}

fn count(data: &Map<String, Value>, key: &str) -> Result<u64, ParseError> {
    let invalid = || format_error(format!("Invalid non-integer value for '{key}'."));
    let negative = || format_error(format!("Value for '{key}' cannot be negative."));

    let value: i64 = match &data[key] {
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => i,
            // Floats are truncated toward zero
            (None, Some(f)) if f.is_finite() => f.trunc() as i64,
            _ => return Err(invalid()),
        },
        Value::String(s) => s.trim().parse().map_err(|_| invalid())?,
        Value::Bool(b) => i64::from(*b),
        _ => return Err(invalid()),
    };

    u64::try_from(value).map_err(|_| negative())
}

pub fn parse_vehicle_counts(response: &str) -> Result<VehicleCounts, ParseError> {
    let text = clean(response)?;
    debug!("Parsing cleaned response: {:.100}", text);

    let value: Value = serde_json::from_str(text).map_err(|e| ParseError::Json(e.to_string()))?;
    let data = value
        .as_object()
        .ok_or_else(|| format_error("Parsed response is not a JSON object."))?;

    const EXPECTED: [&str; 6] = ["Vehicles_Present", "Cars", "Bikes", "Trucks", "Buses", "Unknown"];
    if EXPECTED.iter().any(|key| !data.contains_key(*key)) {
        let found: Vec<&String> = data.keys().collect();
        return Err(format_error(format!(
            "Missing keys. Expected: {EXPECTED:?}, Found: {found:?}"
        )));
    }

    let vehicles_present = match data["Vehicles_Present"].as_str() {
        Some(s) if s.eq_ignore_ascii_case("true") => true,
        Some(s) if s.eq_ignore_ascii_case("false") => false,
        _ => {
            return Err(format_error(format!(
                "Invalid 'Vehicles_Present' value '{}' (must be string 'True' or 'False').",
                data["Vehicles_Present"]
            )))
        }
    };

    Ok(VehicleCounts {
        vehicles_present,
        cars: count(data, "Cars")?,
        bikes: count(data, "Bikes")?,
        trucks: count(data, "Trucks")?,
        buses: count(data, "Buses")?,
        unknown: count(data, "Unknown")?,
    })
}
