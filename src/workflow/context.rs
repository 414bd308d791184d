//! Transient per-request context
//!
//! Created when a message arrives, handed to every stage handler of the
//! request, and dropped once the document has been saved.

use crate::config::AppContext;
use crate::models::{ApprovalKind, Document, EventRecord, ExtractedFields, InboundMessage, Stage};
use crate::services::Services;
use crate::workflow::hil;
use crate::Result;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Outbound message produced by a stage
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Draft {
    pub stage: Stage,
    pub body: String,
    /// Held back until a manager approves it
    pub requires_approval: bool,
}

pub struct RequestContext<'a> {
    pub message: InboundMessage,
    pub document: &'a mut Document,
    pub app: &'a AppContext,
    pub services: &'a Services,
    pub drafts: Vec<Draft>,
    /// Values that do not warrant a first-class field yet
    pub extensions: BTreeMap<String, Value>,
    /// Detours taken while handling this request
    pub detours: u32,
    event_index: usize,
}

impl<'a> RequestContext<'a> {
    pub fn new(
        message: InboundMessage,
        document: &'a mut Document,
        event_index: usize,
        app: &'a AppContext,
        services: &'a Services,
    ) -> Self {
        Self {
            message,
            document,
            app,
            services,
            drafts: Vec::new(),
            extensions: BTreeMap::new(),
            detours: 0,
            event_index,
        }
    }

    pub fn event(&self) -> &EventRecord {
        &self.document.events[self.event_index]
    }

    pub fn event_mut(&mut self) -> &mut EventRecord {
        &mut self.document.events[self.event_index]
    }

    pub fn extracted(&self) -> &ExtractedFields {
        &self.message.extracted
    }

    pub fn push_draft(&mut self, stage: Stage, body: impl Into<String>) {
        self.drafts.push(Draft {
            stage,
            body: body.into(),
            requires_approval: false,
        });
    }

    /// Park a draft behind a manager decision; blocks the event
    pub fn enqueue_approval(&mut self, kind: ApprovalKind, body: impl Into<String>) -> Result<String> {
        let body = body.into();
        let stage = self.event().current_stage;
        let limit = self.app.config().hil.max_pending_approvals;
        let event_id = self.event().event_id.clone();

        let task_id = hil::enqueue(self.document, &event_id, stage, kind, &body, limit)?;
        self.drafts.push(Draft {
            stage,
            body,
            requires_approval: true,
        });
        Ok(task_id)
    }
}
