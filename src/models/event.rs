//! Event record: one per booking transaction
//!
//! Every workflow field is explicit and defaulted so that legacy records
//! deserialize; genuinely experimental values go into `extensions`.

use super::journal::{ActivityEntry, AuditEntry};
use super::message::InboundMessage;
use super::stage::Stage;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Commercial status of the booking
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    #[default]
    Lead,
    Option,
    Confirmed,
    Cancelled,
}

/// Conversation state; `WaitingOnHil` blocks automatic progression
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ThreadState {
    #[default]
    Open,
    AwaitingClient,
    WaitingOnHil,
    Closed,
}

/// Client requirements governing room evaluation
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Requirements {
    #[serde(default)]
    pub participants: Option<u32>,
    #[serde(default)]
    pub seating_layout: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub special_requirements: Vec<String>,
}

impl Requirements {
    /// Overlay the fields present in `update`; absent fields keep their value
    pub fn merged_with(&self, update: &Requirements) -> Requirements {
        let mut merged = self.clone();
        if update.participants.is_some() {
            merged.participants = update.participants;
        }
        if update.seating_layout.is_some() {
            merged.seating_layout = update.seating_layout.clone();
        }
        if update.start_time.is_some() {
            merged.start_time = update.start_time.clone();
        }
        if update.end_time.is_some() {
            merged.end_time = update.end_time.clone();
        }
        if !update.special_requirements.is_empty() {
            merged.special_requirements = update.special_requirements.clone();
        }
        merged
    }

    pub fn is_empty(&self) -> bool {
        self == &Requirements::default()
    }
}

/// A product line on the offer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LineItem {
    pub name: String,
    pub quantity: u32,
}

/// A room that fits the requirements on a given date
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomCandidate {
    pub room_id: String,
    pub name: String,
    pub capacity: u32,
}

/// Stored result of a room evaluation, reused while its hash holds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomEvaluation {
    pub date: NaiveDate,
    pub candidates: Vec<RoomCandidate>,
    pub evaluated_at: DateTime<Utc>,
}

/// Offer history entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferRecord {
    pub offer_id: String,
    pub hash: String,
    pub room_id: String,
    pub total_cents: u64,
    pub created_at: DateTime<Utc>,
}

/// Kind of manager decision a HIL entry waits for
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalKind {
    /// Client accepted the offer; manager confirms before the booking proceeds
    OfferAcceptance,
    /// Too many detours in one request; a human untangles the thread
    DetourEscalation,
}

impl ApprovalKind {
    pub fn key(&self) -> &'static str {
        match self {
            ApprovalKind::OfferAcceptance => "offer_acceptance",
            ApprovalKind::DetourEscalation => "detour_escalation",
        }
    }
}

/// Pending HIL entry on the event, mirrored by a task in the document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingApproval {
    pub task_id: String,
    pub kind: ApprovalKind,
    pub stage: Stage,
    pub draft: String,
    pub created_at: DateTime<Utc>,
    /// Client message whose handling stopped for this decision; resumed on approval
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub held_message: Option<InboundMessage>,
}

/// The per-transaction record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_id: String,

    #[serde(default)]
    pub client_id: Option<String>,

    #[serde(default)]
    pub thread_id: Option<String>,

    #[serde(default)]
    pub status: EventStatus,

    #[serde(default)]
    pub thread_state: ThreadState,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "default_stage")]
    pub current_stage: Stage,

    /// Stage to resume once a detour resolves
    #[serde(default)]
    pub caller_stage: Option<Stage>,

    #[serde(default)]
    pub chosen_date: Option<NaiveDate>,

    #[serde(default)]
    pub date_confirmed: bool,

    #[serde(default)]
    pub requirements: Requirements,

    #[serde(default)]
    pub requirements_hash: Option<String>,

    #[serde(default)]
    pub locked_room_id: Option<String>,

    #[serde(default)]
    pub room_eval_hash: Option<String>,

    #[serde(default)]
    pub room_evaluation: Option<RoomEvaluation>,

    #[serde(default)]
    pub line_items: Vec<LineItem>,

    #[serde(default)]
    pub offer_hash: Option<String>,

    #[serde(default)]
    pub offers: Vec<OfferRecord>,

    #[serde(default)]
    pub offer_accepted: bool,

    #[serde(default)]
    pub pending_approvals: Vec<PendingApproval>,

    /// Messages that arrived while blocked, in arrival order
    #[serde(default)]
    pub held_messages: Vec<InboundMessage>,

    #[serde(default)]
    pub detour_count: u32,

    #[serde(default)]
    pub audit: Vec<AuditEntry>,

    #[serde(default)]
    pub activity_log: Vec<ActivityEntry>,

    #[serde(default)]
    pub extensions: BTreeMap<String, Value>,
}

fn default_stage() -> Stage {
    Stage::Intake
}

impl EventRecord {
    /// Create a fresh event at intake with a generated id
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4().to_string())
    }

    pub fn with_id(event_id: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
            client_id: None,
            thread_id: None,
            status: EventStatus::Lead,
            thread_state: ThreadState::Open,
            created_at: Utc::now(),
            current_stage: Stage::Intake,
            caller_stage: None,
            chosen_date: None,
            date_confirmed: false,
            requirements: Requirements::default(),
            requirements_hash: None,
            locked_room_id: None,
            room_eval_hash: None,
            room_evaluation: None,
            line_items: Vec::new(),
            offer_hash: None,
            offers: Vec::new(),
            offer_accepted: false,
            pending_approvals: Vec::new(),
            held_messages: Vec::new(),
            detour_count: 0,
            audit: Vec::new(),
            activity_log: Vec::new(),
            extensions: BTreeMap::new(),
        }
    }

    /// Progression is blocked while a manager decision is outstanding
    pub fn is_blocked(&self) -> bool {
        self.thread_state == ThreadState::WaitingOnHil || !self.pending_approvals.is_empty()
    }

    /// Whether the transaction still takes part in the workflow
    pub fn is_active(&self) -> bool {
        self.status != EventStatus::Cancelled && self.thread_state != ThreadState::Closed
    }

    /// Move to `to` and record the transition; no-op when already there
    pub fn transition_to(&mut self, to: Stage, reason: impl Into<String>, actor: &str) -> bool {
        if self.current_stage == to {
            return false;
        }
        let from = self.current_stage;
        self.current_stage = to;
        self.append_audit(Some(from), to, reason, actor);
        true
    }

    /// Hold `room_id`; any previously held room is released first
    pub fn lock_room(&mut self, room_id: impl Into<String>, eval_hash: impl Into<String>) {
        self.locked_room_id = Some(room_id.into());
        self.room_eval_hash = Some(eval_hash.into());
    }

    pub fn release_room(&mut self) -> Option<String> {
        self.room_eval_hash = None;
        self.locked_room_id.take()
    }

    pub fn pending_approval(&self, task_id: &str) -> Option<&PendingApproval> {
        self.pending_approvals.iter().find(|p| p.task_id == task_id)
    }

    pub fn pending_approval_mut(&mut self, task_id: &str) -> Option<&mut PendingApproval> {
        self.pending_approvals.iter_mut().find(|p| p.task_id == task_id)
    }

    pub fn latest_offer(&self) -> Option<&OfferRecord> {
        self.offers.last()
    }
}

impl Default for EventRecord {
    fn default() -> Self {
        Self::new()
    }
}
