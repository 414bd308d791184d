//! Inbound messages and the fields extracted from them
//!
//! Extraction itself (NLU) happens outside the engine; the engine only sees
//! the normalized result.

use super::event::{LineItem, Requirements};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// The client's answer to an offer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClientReply {
    Accept,
    Decline,
}

/// Normalized, user-provided fields of one message
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExtractedFields {
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub room_id: Option<String>,
    #[serde(default)]
    pub requirements: Requirements,
    #[serde(default)]
    pub line_items: Vec<LineItem>,
    #[serde(default)]
    pub reply: Option<ClientReply>,
}

impl ExtractedFields {
    pub fn is_empty(&self) -> bool {
        self == &ExtractedFields::default()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InboundMessage {
    /// Existing transaction; `None` opens a new one
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub extracted: ExtractedFields,
}

impl InboundMessage {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            ..Default::default()
        }
    }

    pub fn for_event(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }

    pub fn from_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn with_extracted(mut self, extracted: ExtractedFields) -> Self {
        self.extracted = extracted;
        self
    }
}
