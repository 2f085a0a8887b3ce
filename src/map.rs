//! Map trace of a child's scan history
//!
//! Markers keep the order of the loaded history (newest first), while the
//! connecting path runs through the points by ascending capture time.

use std::fmt::Display;

use chrono::{Local, TimeZone};
use serde::Serialize;

use crate::{
    models::{Coordinates, ScanRecord},
    presentation::format_timestamp_in,
    severity::{classify, Severity},
};

/// Viewport used before any point is known
pub const DEFAULT_CENTER: Coordinates = Coordinates {
    latitude: 20.5937,
    longitude: 78.9629,
};
pub const DEFAULT_ZOOM: u8 = 5;

/// Padding in pixels when fitting the viewport to the points
pub const FIT_PADDING: u32 = 40;
pub const FIT_MAX_ZOOM: u8 = 16;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Popup {
    pub time: String,
    pub message: Option<String>,
    pub severity: Severity,
    pub accuracy: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Marker {
    pub position: Coordinates,
    pub popup: Popup,
}

/// Bounding box of all points
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bounds {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Viewport {
    Default {
        center: Coordinates,
        zoom: u8,
    },
    Fit {
        bounds: Bounds,
        padding: u32,
        max_zoom: u8,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapTrace {
    pub markers: Vec<Marker>,
    /// Empty unless there are at least two points
    pub path: Vec<Coordinates>,
    pub viewport: Viewport,
}

impl MapTrace {
    pub fn from_records(records: &[ScanRecord]) -> Self {
        Self::from_records_in(records, &Local)
    }

    pub fn from_records_in<Tz>(records: &[ScanRecord], tz: &Tz) -> Self
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        let markers = records
            .iter()
            .map(|record| Marker {
                position: record.coordinates,
                popup: Popup {
                    time: format_timestamp_in(&record.timestamp, tz),
                    message: record.message.clone(),
                    severity: classify(record.message.as_deref()),
                    accuracy: record
                        .accuracy
                        .map(|a| format!("{} m", a))
                        .unwrap_or_else(|| "—".to_string()),
                },
            })
            .collect();

        let mut chronological: Vec<&ScanRecord> = records.iter().collect();
        chronological.sort_by_key(|record| record.timestamp);
        let path = if chronological.len() >= 2 {
            chronological.iter().map(|r| r.coordinates).collect()
        } else {
            Vec::new()
        };

        let viewport = match bounds(records) {
            Some(bounds) => Viewport::Fit {
                bounds,
                padding: FIT_PADDING,
                max_zoom: FIT_MAX_ZOOM,
            },
            None => Viewport::Default {
                center: DEFAULT_CENTER,
                zoom: DEFAULT_ZOOM,
            },
        };

        Self {
            markers,
            path,
            viewport,
        }
    }
}

fn bounds(records: &[ScanRecord]) -> Option<Bounds> {
    let first = records.first()?.coordinates;
    let initial = Bounds {
        south: first.latitude,
        west: first.longitude,
        north: first.latitude,
        east: first.longitude,
    };
    Some(records.iter().fold(initial, |b, record| {
        let c = record.coordinates;
        Bounds {
            south: b.south.min(c.latitude),
            west: b.west.min(c.longitude),
            north: b.north.max(c.latitude),
            east: b.east.max(c.longitude),
        }
    }))
}
