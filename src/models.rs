//! Data models.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ScanAlertError;
use serde_helpers::*;

/// Database identifier of a child
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChildId(String);

/// Identifier of the parent account owning a child
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParentId(String);

/// Server-assigned identifier of a scan record, never reused
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

macro_rules! string_id {
    ($name:ident) => {
        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_id!(ChildId);
string_id!(ParentId);
string_id!(RecordId);

/// Opaque public per-child token
///
/// Knowing it is the only authorization needed to submit a scan, so it ends
/// up verbatim in a URL path segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SecureId(String);

impl TryFrom<&str> for SecureId {
    type Error = ScanAlertError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let valid = !value.is_empty()
            && value
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(ScanAlertError::InvalidSecureId(value.to_string()));
        }
        Ok(Self(value.to_string()))
    }
}

impl SecureId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SecureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// WGS84 position in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawCoordinates")]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Deserialize)]
struct RawCoordinates {
    latitude: f64,
    longitude: f64,
}

impl TryFrom<RawCoordinates> for Coordinates {
    type Error = ScanAlertError;

    fn try_from(raw: RawCoordinates) -> Result<Self, Self::Error> {
        Coordinates::new(raw.latitude, raw.longitude)
    }
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, ScanAlertError> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(ScanAlertError::InvalidCoordinates(format!(
                "latitude {}",
                latitude
            )));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(ScanAlertError::InvalidCoordinates(format!(
                "longitude {}",
                longitude
            )));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }
}

/// One reported location of a child
///
/// Created once by the server when a scan is submitted, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRecord {
    #[serde(rename = "_id")]
    pub id: RecordId,
    /// Missing inside alert payloads, where the alert carries it
    #[serde(rename = "childId", default, skip_serializing_if = "Option::is_none")]
    pub child_id: Option<ChildId>,
    #[serde(flatten)]
    pub coordinates: Coordinates,
    /// Radius in meters, None if the device could not supply it
    #[serde(
        default,
        deserialize_with = "deserialize_accuracy",
        skip_serializing_if = "Option::is_none"
    )]
    pub accuracy: Option<f64>,
    pub timestamp: DateTime<Utc>,
    /// Free-text status, None when absent or blank
    #[serde(
        default,
        deserialize_with = "deserialize_trimmed_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub message: Option<String>,
    /// Informational; values that are not scalars are skipped
    #[serde(
        rename = "deviceInfo",
        default,
        deserialize_with = "deserialize_device_info",
        skip_serializing_if = "Option::is_none"
    )]
    pub device_info: Option<BTreeMap<String, String>>,
}

/// Push notification for one scan, routed to the owning parent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanAlert {
    #[serde(rename = "childId")]
    pub child_id: ChildId,
    #[serde(rename = "parentId")]
    pub parent_id: ParentId,
    #[serde(rename = "childName")]
    pub child_name: String,
    pub log: ScanRecord,
}

/// Best-effort metadata about the reporting device
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screen_resolution: Option<String>,
}

impl DeviceInfo {
    /// Describe the running process as a reporting device
    pub fn detect() -> Self {
        Self {
            user_agent: Some(format!(
                "{}/{}",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION")
            )),
            platform: Some(format!(
                "{}-{}",
                std::env::consts::OS,
                std::env::consts::ARCH
            )),
            language: std::env::var("LANG").ok().filter(|l| !l.is_empty()),
            screen_resolution: None,
        }
    }
}

/// Body of `POST /api/scan/{secureId}`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSubmission {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_info: Option<DeviceInfo>,
}

impl ScanSubmission {
    pub fn new(coordinates: Coordinates) -> Self {
        Self {
            latitude: coordinates.latitude,
            longitude: coordinates.longitude,
            accuracy: None,
            timestamp: None,
            message: None,
            device_info: None,
        }
    }
}

/// Reply to a scan submission
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubmitAck {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: String,
}

/// One page of a child's scan history, newest first
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HistoryPage {
    pub logs: Vec<ScanRecord>,
    pub total: u64,
}

/// Reply of the last-location endpoint
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LastLocation {
    #[serde(rename = "lastLocation")]
    pub last_location: Option<ScanRecord>,
}

/// Custom deserializers
mod serde_helpers {
    use std::collections::BTreeMap;

    use serde::{self, Deserialize, Deserializer};
    use serde_json::Value;

    pub fn deserialize_trimmed_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: Option<String> = Option::deserialize(deserializer)?;
        Ok(s.and_then(|s| {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }))
    }

    /// Keep strings, render numbers and booleans, drop everything else
    pub fn deserialize_device_info<'de, D>(
        deserializer: D,
    ) -> Result<Option<BTreeMap<String, String>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value: Option<Value> = Option::deserialize(deserializer)?;
        let Some(Value::Object(map)) = value else {
            return Ok(None);
        };
        Ok(Some(
            map.into_iter()
                .filter_map(|(key, value)| match value {
                    Value::String(s) => Some((key, s)),
                    Value::Number(n) => Some((key, n.to_string())),
                    Value::Bool(b) => Some((key, b.to_string())),
                    _ => None,
                })
                .collect(),
        ))
    }

    pub fn deserialize_accuracy<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value: Option<f64> = Option::deserialize(deserializer)?;
        Ok(value.filter(|a| a.is_finite() && *a >= 0.0))
    }
}
