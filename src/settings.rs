//! Analysis settings: schema validation and the atomically swapped store.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::capture::Resolution;
use crate::pipeline::CropRect;

/// Keys every settings update must carry.
pub const REQUIRED_KEYS: [&str; 7] = [
    "mode",
    "apiCallsPerMinute",
    "resolution",
    "cropArea",
    "greenLightDurationSec",
    "yellowLightDurationSec",
    "maxTimeSmartA_Sec",
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct SettingsError(pub String);

impl SettingsError {
    fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnalysisMode {
    Image,
    Video,
}

/// Requested capture size: the camera's own default or an explicit `WxH`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureResolution {
    #[default]
    Default,
    Size(Resolution),
}

impl CaptureResolution {
    pub fn size(&self) -> Option<Resolution> {
        match self {
            CaptureResolution::Default => None,
            CaptureResolution::Size(size) => Some(*size),
        }
    }
}

impl fmt::Display for CaptureResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureResolution::Default => f.write_str("default"),
            CaptureResolution::Size(size) => size.fmt(f),
        }
    }
}

impl FromStr for CaptureResolution {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "default" {
            return Ok(CaptureResolution::Default);
        }

        let invalid = || SettingsError::new("Invalid 'resolution'.");
        let (w, h) = s.split_once('x').ok_or_else(invalid)?;
        let digits = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());
        if !digits(w) || !digits(h) {
            return Err(invalid());
        }

        let width: u32 = w.parse().map_err(|_| invalid())?;
        let height: u32 = h.parse().map_err(|_| invalid())?;
        if width == 0 || height == 0 {
            return Err(invalid());
        }
        Ok(CaptureResolution::Size(Resolution::new(width, height)))
    }
}

impl Serialize for CaptureResolution {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CaptureResolution {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Validated settings. Durations are stored in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisSettings {
    pub mode: AnalysisMode,
    pub api_calls_per_minute: u32,
    pub resolution: CaptureResolution,
    pub crop_area: CropRect,
    pub green_light_duration_ms: u64,
    pub yellow_light_duration_ms: u64,
    #[serde(rename = "maxTimeSmartA_Ms")]
    pub max_time_smart_a_ms: u64,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            mode: AnalysisMode::Image,
            api_calls_per_minute: 6,
            resolution: CaptureResolution::Default,
            crop_area: CropRect::FULL,
            green_light_duration_ms: 3000,
            yellow_light_duration_ms: 1000,
            max_time_smart_a_ms: 10_000,
        }
    }
}

impl AnalysisSettings {
    /// Validate an update body (durations in seconds) into stored settings.
    pub fn from_update(body: &Value) -> Result<Self, SettingsError> {
        let obj = body
            .as_object()
            .ok_or_else(|| SettingsError::new("Settings must be a JSON object."))?;

        if REQUIRED_KEYS.iter().any(|key| !obj.contains_key(*key)) {
            return Err(SettingsError::new(format!(
                "Missing keys. Required: {REQUIRED_KEYS:?}"
            )));
        }

        let mode = match obj["mode"].as_str() {
            Some("Image") => AnalysisMode::Image,
            Some("Video") => AnalysisMode::Video,
            _ => return Err(SettingsError::new("Invalid 'mode'.")),
        };

        let rate = number(obj, "apiCallsPerMinute")?;
        if rate.fract() != 0.0 {
            return Err(SettingsError::new("'API Calls per Minute' must be a whole number."));
        }
        if !(1.0..=60.0).contains(&rate) {
            return Err(SettingsError::new(
                "'API Calls per Minute' must be between 1 and 60.",
            ));
        }

        let resolution = obj["resolution"]
            .as_str()
            .ok_or_else(|| SettingsError::new("Invalid 'resolution'."))?
            .parse::<CaptureResolution>()?;

        let crop_area = crop_area(&obj["cropArea"])?;

        let green = number(obj, "greenLightDurationSec")?;
        if green < 1.0 {
            return Err(SettingsError::new(
                "Green light duration must be at least 1 second.",
            ));
        }
        let yellow = number(obj, "yellowLightDurationSec")?;
        if yellow < 1.0 {
            return Err(SettingsError::new(
                "Yellow light duration must be at least 1 second.",
            ));
        }

        let max_time = number(obj, "maxTimeSmartA_Sec")?;
        if !(5.0..=300.0).contains(&max_time) {
            return Err(SettingsError::new(
                "'Max Time for Smart A' must be between 5 and 300 seconds.",
            ));
        }

        Ok(Self {
            mode,
            api_calls_per_minute: rate as u32,
            resolution,
            crop_area,
            green_light_duration_ms: seconds_to_ms(green),
            yellow_light_duration_ms: seconds_to_ms(yellow),
            max_time_smart_a_ms: seconds_to_ms(max_time),
        })
    }
}

fn seconds_to_ms(seconds: f64) -> u64 {
    (seconds * 1000.0) as u64
}

/// Finite number, given either as a JSON number or a numeric string.
fn as_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

fn number(obj: &Map<String, Value>, key: &str) -> Result<f64, SettingsError> {
    as_number(&obj[key]).ok_or_else(|| SettingsError::new(format!("'{key}' must be a number.")))
}

fn crop_area(value: &Value) -> Result<CropRect, SettingsError> {
    let crop = value
        .as_object()
        .ok_or_else(|| SettingsError::new("'cropArea' must be an object."))?;

    const CROP_KEYS: [&str; 4] = ["x", "y", "w", "h"];
    if CROP_KEYS.iter().any(|key| !crop.contains_key(*key)) {
        return Err(SettingsError::new(format!(
            "Missing keys in 'cropArea'. Required: {CROP_KEYS:?}"
        )));
    }

    let field = |key: &str| {
        as_number(&crop[key])
            .ok_or_else(|| SettingsError::new(format!("'cropArea.{key}' must be a number.")))
    };
    let rect = CropRect {
        x: field("x")?,
        y: field("y")?,
        w: field("w")?,
        h: field("h")?,
    };

    if !rect.is_valid() {
        return Err(SettingsError::new(
            "Invalid crop range (0-1 for x/y, >0-1 for w/h, must stay within bounds).",
        ));
    }
    Ok(rect)
}

/// Shared settings snapshot. Readers never lock and always see a whole
/// settings object, either the one before or the one after an update.
#[derive(Debug, Default)]
pub struct SettingsStore {
    current: ArcSwap<AnalysisSettings>,
}

impl SettingsStore {
    pub fn new(settings: AnalysisSettings) -> Self {
        Self {
            current: ArcSwap::from_pointee(settings),
        }
    }

    pub fn load(&self) -> Arc<AnalysisSettings> {
        self.current.load_full()
    }

    pub fn replace(&self, settings: AnalysisSettings) {
        self.current.store(Arc::new(settings));
    }
}
