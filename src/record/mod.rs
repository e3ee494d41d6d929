//! Canonical event records.

mod assembler;
mod publisher;

pub use assembler::{EventRecordAssembler, MessageTexts};
pub use publisher::PublisherCache;

use crate::bookmark::Bookmark;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fully resolved output unit.
///
/// Serializes as a flat map with PascalCase keys (`ProviderName`,
/// `EventId`, `Msg`, ...) for downstream collaborators.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EventRecord {
    /// Raw XML rendering.
    pub xml: String,
    pub provider_name: String,
    pub event_id: u64,
    pub qualifiers: u64,
    pub level: u64,
    pub task: u64,
    pub opcode: u64,
    pub created: DateTime<Utc>,
    pub record_id: u64,
    pub process_id: u64,
    pub thread_id: u64,
    /// Channel named inside the record itself.
    pub channel: String,
    pub computer_name: String,
    pub version: u64,

    /// Human-readable message; empty when it could not be resolved.
    pub msg: String,
    pub level_text: String,
    pub task_text: String,
    pub opcode_text: String,
    pub keywords: String,
    pub channel_text: String,
    pub provider_text: String,
    pub id_text: String,

    /// Position after this record, stamped once the bookmark advanced.
    pub bookmark: Option<Bookmark>,
    /// Channel the subscription was opened on.
    pub subscribed_channel: String,
}

impl EventRecord {
    pub(crate) fn with_bookmark(mut self, bookmark: Bookmark) -> Self {
        self.bookmark = Some(bookmark);
        self
    }
}
