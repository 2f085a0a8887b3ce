//! Alert banner and history row rendering

use std::fmt::Display;

use chrono::{DateTime, Local, TimeZone, Utc};

use crate::{
    models::{ScanAlert, ScanRecord},
    severity::{classify, Severity},
    store::AlertState,
};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const PLACEHOLDER: &str = "—";

/// Format a capture time in the local time zone
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    format_timestamp_in(timestamp, &Local)
}

pub fn format_timestamp_in<Tz>(timestamp: &DateTime<Utc>, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    timestamp.with_timezone(tz).format(TIME_FORMAT).to_string()
}

/// Live alert banner
#[derive(Debug, Clone, PartialEq)]
pub struct Banner {
    pub severity: Severity,
    pub child_name: String,
    pub message: Option<String>,
    pub captured_at: DateTime<Utc>,
}

impl Banner {
    /// Banner for the current state, None when there is nothing to show
    pub fn from_state(state: &AlertState) -> Option<Self> {
        state.last_alert.as_ref().map(Self::from_alert)
    }

    pub fn from_alert(alert: &ScanAlert) -> Self {
        let message = alert.log.message.clone();
        Self {
            severity: classify(message.as_deref()),
            child_name: alert.child_name.clone(),
            message,
            captured_at: alert.log.timestamp,
        }
    }

    /// Short tag distinguishing the two treatments
    pub fn label(&self) -> &'static str {
        match self.severity {
            Severity::Danger => "DANGER",
            Severity::Safe => "SCAN",
        }
    }

    pub fn render(&self) -> String {
        self.render_in(&Local)
    }

    pub fn render_in<Tz>(&self, tz: &Tz) -> String
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        let mut line = format!("QR scanned: {}", self.child_name);
        if let Some(message) = &self.message {
            line.push_str(" – ");
            line.push_str(message);
        }
        line.push_str(" – location at ");
        line.push_str(&format_timestamp_in(&self.captured_at, tz));
        line
    }
}

/// One row of the history table
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRow {
    pub time: String,
    pub message: String,
    pub severity: Severity,
    pub location: String,
    pub maps_link: String,
    pub device: String,
}

impl HistoryRow {
    pub fn from_record(record: &ScanRecord) -> Self {
        Self::from_record_in(record, &Local)
    }

    pub fn from_record_in<Tz>(record: &ScanRecord, tz: &Tz) -> Self
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        let latitude = record.coordinates.latitude;
        let longitude = record.coordinates.longitude;

        Self {
            time: format_timestamp_in(&record.timestamp, tz),
            message: record
                .message
                .clone()
                .unwrap_or_else(|| PLACEHOLDER.to_string()),
            severity: classify(record.message.as_deref()),
            location: format!("{:.5}, {:.5}", latitude, longitude),
            maps_link: format!("https://www.google.com/maps?q={},{}", latitude, longitude),
            device: record
                .device_info
                .as_ref()
                .and_then(|info| info.get("userAgent"))
                .cloned()
                .unwrap_or_else(|| PLACEHOLDER.to_string()),
        }
    }
}
