//! The shared JSON document: events, clients, tasks and stored config

use super::event::{ApprovalKind, EventRecord};
use super::stage::Stage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Current document schema version
pub const SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Client {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub event_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Approved,
    Rejected,
    Done,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskPayload {
    pub event_id: String,
    pub stage: Stage,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub draft: String,
}

/// Global task list entry backing a HIL approval
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskRecord {
    pub task_id: String,
    #[serde(rename = "type")]
    pub kind: ApprovalKind,
    pub status: TaskStatus,
    pub payload: TaskPayload,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub events: Vec<EventRecord>,
    #[serde(default)]
    pub clients: BTreeMap<String, Client>,
    #[serde(default)]
    pub tasks: Vec<TaskRecord>,
    #[serde(default)]
    pub config: Map<String, Value>,
}

impl Document {
    pub fn event(&self, event_id: &str) -> Option<&EventRecord> {
        self.events.iter().find(|e| e.event_id == event_id)
    }

    pub fn event_mut(&mut self, event_id: &str) -> Option<&mut EventRecord> {
        self.events.iter_mut().find(|e| e.event_id == event_id)
    }

    pub fn event_index(&self, event_id: &str) -> Option<usize> {
        self.events.iter().position(|e| e.event_id == event_id)
    }

    pub fn task(&self, task_id: &str) -> Option<&TaskRecord> {
        self.tasks.iter().find(|t| t.task_id == task_id)
    }

    pub fn task_mut(&mut self, task_id: &str) -> Option<&mut TaskRecord> {
        self.tasks.iter_mut().find(|t| t.task_id == task_id)
    }

    pub fn pending_tasks(&self) -> impl Iterator<Item = &TaskRecord> {
        self.tasks.iter().filter(|t| t.status == TaskStatus::Pending)
    }

    /// Register an event with its client, creating the client entry if needed
    pub fn insert_event(&mut self, event: EventRecord) -> usize {
        if let Some(client_id) = &event.client_id {
            self.link_client(client_id, &event.event_id);
        }
        self.events.push(event);
        self.events.len() - 1
    }

    pub fn link_client(&mut self, client_id: &str, event_id: &str) {
        let client = self.clients.entry(client_id.to_string()).or_default();
        if client.email.is_none() && client_id.contains('@') {
            client.email = Some(client_id.to_string());
        }
        if !client.event_ids.iter().any(|id| id == event_id) {
            client.event_ids.push(event_id.to_string());
        }
    }
}

/// Bring a raw document up to the current schema before deserializing
///
/// Older files may miss top-level sections or carry events written with a
/// numeric `current_step` instead of `current_stage`.
pub fn backfill(raw: &mut Value) -> usize {
    let mut touched = 0;

    if !raw.is_object() {
        *raw = Value::Object(Map::new());
        touched += 1;
    }
    let Some(root) = raw.as_object_mut() else {
        return touched;
    };

    for (key, default) in [
        ("events", Value::Array(Vec::new())),
        ("clients", Value::Object(Map::new())),
        ("tasks", Value::Array(Vec::new())),
        ("config", Value::Object(Map::new())),
    ] {
        if !root.contains_key(key) || root[key].is_null() {
            root.insert(key.to_string(), default);
            touched += 1;
        }
    }

    if let Some(config) = root.get_mut("config").and_then(Value::as_object_mut) {
        if !config.contains_key("schema_version") {
            config.insert("schema_version".to_string(), Value::from(SCHEMA_VERSION));
            touched += 1;
        }
    }

    if let Some(events) = root.get_mut("events").and_then(Value::as_array_mut) {
        for event in events.iter_mut().filter_map(Value::as_object_mut) {
            if let Some(step) = event.remove("current_step") {
                touched += 1;
                if !event.contains_key("current_stage") {
                    let stage = step
                        .as_u64()
                        .and_then(|n| u8::try_from(n).ok())
                        .and_then(Stage::from_number)
                        .unwrap_or(Stage::Intake);
                    event.insert("current_stage".to_string(), Value::from(stage.key()));
                }
            }
            if let Some(step) = event.remove("caller_step") {
                touched += 1;
                if !event.contains_key("caller_stage") {
                    let stage = step
                        .as_u64()
                        .and_then(|n| u8::try_from(n).ok())
                        .and_then(Stage::from_number);
                    event.insert(
                        "caller_stage".to_string(),
                        stage.map(|s| Value::from(s.key())).unwrap_or(Value::Null),
                    );
                }
            }
        }
    }

    touched
}
