//! Danger classification of scan messages.
//!
//! The whole policy is a case-insensitive substring test for `"danger"`.
//! Negated phrases such as "Not in danger" therefore classify as danger too.
//! The result is never stored; every view calls [`classify`] when it renders,
//! so a policy change applies to old records as well.

use serde::Serialize;

const DANGER_MARKER: &str = "danger";

/// Presentation severity of a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Danger,
    Safe,
}

impl Severity {
    pub fn is_danger(&self) -> bool {
        matches!(self, Severity::Danger)
    }
}

/// Classify a free-text scan message
pub fn classify(message: Option<&str>) -> Severity {
    match message {
        Some(m) if m.to_lowercase().contains(DANGER_MARKER) => Severity::Danger,
        _ => Severity::Safe,
    }
}
