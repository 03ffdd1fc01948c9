//! Formatting command results for the user.
use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::directory::Slot;
use crate::endpoint::client::SystemState;

//------------ ReportFormat --------------------------------------------------

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReportFormat {
    Text,
    Json,
}

impl FromStr for ReportFormat {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self, ReportError> {
        match s {
            "text" => Ok(ReportFormat::Text),
            "json" => Ok(ReportFormat::Json),
            _ => Err(ReportError::UnrecognisedFormat(s.to_string())),
        }
    }
}

//------------ ReportError ---------------------------------------------------

#[derive(Debug)]
pub enum ReportError {
    UnrecognisedFormat(String),
    Json(String),
}

impl fmt::Display for ReportError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ReportError::UnrecognisedFormat(s) => write!(f, "This report format is not recognised: {}", s),
            ReportError::Json(e) => write!(f, "Could not format report as JSON: {}", e),
        }
    }
}

impl std::error::Error for ReportError {}

//------------ Report --------------------------------------------------------

/// The result of a command, ready to be shown in any format.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Report {
    Config(ConfigSummary),
    Slots(Vec<SlotInfo>),
    Health(Vec<EndpointHealth>),
}

impl Report {
    pub fn format(&self, format: ReportFormat) -> Result<String, ReportError> {
        match format {
            ReportFormat::Json => serde_json::to_string_pretty(self).map_err(|e| ReportError::Json(e.to_string())),
            ReportFormat::Text => Ok(self.text()),
        }
    }

    fn text(&self) -> String {
        let mut res = String::new();
        match self {
            Report::Config(summary) => {
                res.push_str(&format!("Configuration OK: {} slot(s)\n", summary.slots));
            }
            Report::Slots(slots) => {
                for slot in slots {
                    res.push_str(&format!("{}: {} ({})\n", slot.id, slot.label, slot.description));
                    res.push_str(&format!("   url: {}\n", slot.url));
                    match (slot.token_present, slot.login_required) {
                        (false, _) => res.push_str("   token: not present\n"),
                        (true, false) => res.push_str("   token: present\n"),
                        (true, true) => res.push_str("   token: present, login required\n"),
                    }
                }
            }
            Report::Health(endpoints) => {
                for endpoint in endpoints {
                    match (&endpoint.state, &endpoint.error) {
                        (Some(state), _) => res.push_str(&format!("{}: {}\n", endpoint.label, state)),
                        (None, Some(e)) => res.push_str(&format!("{}: unavailable, {}\n", endpoint.label, e)),
                        (None, None) => res.push_str(&format!("{}: unknown\n", endpoint.label)),
                    }
                }
            }
        }
        res
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ConfigSummary {
    pub slots: usize,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct SlotInfo {
    pub id: u64,
    pub label: String,
    pub description: String,
    pub url: String,
    pub token_present: bool,
    pub login_required: bool,
}

impl From<&Slot> for SlotInfo {
    fn from(slot: &Slot) -> Self {
        SlotInfo {
            id: slot.id() as u64,
            label: slot.config().label.clone(),
            description: slot.description().to_string(),
            url: slot.config().url.clone(),
            token_present: slot.is_token_present(),
            login_required: slot.token().map(|token| token.is_login_required()).unwrap_or(false),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct EndpointHealth {
    pub label: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<SystemState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

//------------ Tests ---------------------------------------------------------
