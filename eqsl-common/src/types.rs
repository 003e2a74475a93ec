///! eQSL pipeline data model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A logged two-way contact awaiting its confirmation card.
///
/// Owned by the upstream logging platform. The dispatcher reads pending
/// records and only ever writes `generated_image_ref`, `sent` and
/// `sent_at` back; `sent` goes false to true exactly once, after the mail
/// provider acknowledged the digest carrying this record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationRecord {
    pub id: String,
    /// Event the contact was logged under
    pub event_id: String,
    /// Explicit destination, when the contacted operator supplied one
    #[serde(default)]
    pub destination_address: Option<String>,
    /// Station the contact was made from
    pub origin_station_id: String,
    pub contacted_callsign: String,
    pub contact_timestamp: DateTime<Utc>,
    pub band: String,
    pub mode: String,
    /// Grid square the contacted operator reported, if any
    #[serde(default)]
    pub grid_locator: Option<String>,
    /// Blob ref of the composited card, set once compositing succeeded
    #[serde(default)]
    pub generated_image_ref: Option<String>,
    #[serde(default)]
    pub sent: bool,
    #[serde(default)]
    pub sent_at: Option<DateTime<Utc>>,
}

impl ConfirmationRecord {
    /// Pending means the card has not been delivered yet.
    pub fn is_pending(&self) -> bool {
        !self.sent
    }
}

/// Per-field vertical offsets (pixels from template center, positive is
/// down). A `None` field falls back to the height-derived default.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TextOffsets {
    #[serde(default)]
    pub callsign: Option<i32>,
    #[serde(default)]
    pub detail: Option<i32>,
    #[serde(default)]
    pub grid: Option<i32>,
}

/// The shared card template of one event. Immutable during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventTemplate {
    pub event_id: String,
    pub event_name: String,
    /// Blob ref of the template PNG
    pub template_image_ref: String,
    #[serde(default)]
    pub text_offsets: Option<TextOffsets>,
}

/// One unresolved destination, kept so admins are alerted once per
/// (callsign, event) pair and not on every run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedAddressEntry {
    pub contacted_callsign: String,
    pub event_id: String,
    pub event_name: String,
}

/// What the callsign directory knows about an operator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectoryEntry {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub locator: Option<String>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
}

/// One file attached to a digest mail.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Provider acknowledgment for one digest.
#[derive(Debug, Clone)]
pub struct ProviderAck {
    pub accepted: bool,
    /// Provider status line, when one was returned
    pub detail: Option<String>,
}
