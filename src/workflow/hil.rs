//! Human-in-the-loop approvals
//!
//! A pending approval lives twice: as an entry on the event (which blocks
//! automatic progression) and as a task in the document's global task list
//! (which managers work through). Both are written and removed together.

use crate::models::{
    ApprovalKind, Document, EventRecord, EventStatus, Granularity, InboundMessage,
    PendingApproval, Stage, TaskPayload, TaskRecord, TaskStatus, ThreadState,
};
use crate::workflow::router;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum HilError {
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Task {task_id} is {status:?}, expected {expected:?}")]
    WrongStatus {
        task_id: String,
        status: TaskStatus,
        expected: TaskStatus,
    },

    #[error("Event not found: {0}")]
    EventNotFound(String),

    #[error("Event {event_id} already has {limit} pending approvals")]
    QueueFull { event_id: String, limit: usize },
}

/// What a manager decision did to its event
#[derive(Debug, Clone, Serialize)]
pub struct Resolution {
    pub task_id: String,
    pub event_id: String,
    pub kind: ApprovalKind,
    pub status: TaskStatus,
    pub stage: Stage,
    /// No approvals remain outstanding on the event
    pub unblocked: bool,
    /// Client message parked with the entry; handling resumes with it on approval
    #[serde(skip_serializing_if = "Option::is_none")]
    pub held_message: Option<InboundMessage>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    pub removed_tasks: Vec<String>,
    pub cleared_entries: usize,
}

/// Park `draft` behind a manager decision and block the event
pub fn enqueue(
    doc: &mut Document,
    event_id: &str,
    stage: Stage,
    kind: ApprovalKind,
    draft: &str,
    limit: usize,
) -> Result<String, HilError> {
    let event = doc
        .event_mut(event_id)
        .ok_or_else(|| HilError::EventNotFound(event_id.to_string()))?;
    if event.pending_approvals.len() >= limit {
        return Err(HilError::QueueFull {
            event_id: event_id.to_string(),
            limit,
        });
    }

    let task_id = Uuid::new_v4().to_string();
    let now = Utc::now();
    event.pending_approvals.push(PendingApproval {
        task_id: task_id.clone(),
        kind,
        stage,
        draft: draft.to_string(),
        created_at: now,
        held_message: None,
    });
    event.thread_state = ThreadState::WaitingOnHil;
    event.log_activity(
        "⏸",
        "Waiting on manager",
        kind.key().replace('_', " "),
        Granularity::Coarse,
    );
    let thread_id = event.thread_id.clone();

    doc.tasks.push(TaskRecord {
        task_id: task_id.clone(),
        kind,
        status: TaskStatus::Pending,
        payload: TaskPayload {
            event_id: event_id.to_string(),
            stage,
            thread_id,
            draft: draft.to_string(),
        },
        created_at: now,
        resolved_at: None,
        note: None,
    });

    tracing::info!(
        event_id,
        task_id = %task_id,
        kind = kind.key(),
        stage = %stage,
        "approval enqueued"
    );
    Ok(task_id)
}

/// Approve a pending task and apply its effect to the event
pub fn approve(
    doc: &mut Document,
    task_id: &str,
    note: Option<String>,
) -> Result<Resolution, HilError> {
    let (event_id, kind) = resolve_task(doc, task_id, TaskStatus::Approved, note)?;
    let event = event_for(doc, &event_id)?;
    let held_message = take_entry(event, task_id);

    match kind {
        ApprovalKind::OfferAcceptance => {
            event.offer_accepted = true;
            event.status = EventStatus::Option;
            if event.current_stage == Stage::Negotiation {
                router::advance(event, "offer acceptance approved", "manager");
            }
        }
        ApprovalKind::DetourEscalation => {}
    }

    let unblocked = unblock(event, ThreadState::Open);
    event.log_activity(
        "👍",
        "Manager approved",
        kind.key().replace('_', " "),
        Granularity::Coarse,
    );
    tracing::info!(event_id = %event_id, task_id, "approval granted");

    Ok(Resolution {
        task_id: task_id.to_string(),
        event_id,
        kind,
        status: TaskStatus::Approved,
        stage: event.current_stage,
        unblocked,
        held_message,
    })
}

/// Reject a pending task; the event stays at its stage and waits for the client
pub fn reject(
    doc: &mut Document,
    task_id: &str,
    note: Option<String>,
) -> Result<Resolution, HilError> {
    let (event_id, kind) = resolve_task(doc, task_id, TaskStatus::Rejected, note)?;
    let event = event_for(doc, &event_id)?;
    let held_message = take_entry(event, task_id);

    if kind == ApprovalKind::OfferAcceptance {
        event.offer_accepted = false;
    }
    if let Some(message) = &held_message {
        event.log_activity(
            "✖",
            "Held message not applied",
            message.body.clone(),
            Granularity::Coarse,
        );
        tracing::info!(event_id = %event_id, task_id, "held message dropped with rejection");
    }

    let unblocked = unblock(event, ThreadState::AwaitingClient);
    event.log_activity(
        "👎",
        "Manager rejected",
        kind.key().replace('_', " "),
        Granularity::Coarse,
    );
    tracing::info!(event_id = %event_id, task_id, "approval rejected");

    Ok(Resolution {
        task_id: task_id.to_string(),
        event_id,
        kind,
        status: TaskStatus::Rejected,
        stage: event.current_stage,
        unblocked,
        held_message: None,
    })
}

/// Mark a resolved task as done
pub fn complete(doc: &mut Document, task_id: &str) -> Result<(), HilError> {
    let task = doc
        .task_mut(task_id)
        .ok_or_else(|| HilError::TaskNotFound(task_id.to_string()))?;
    if !matches!(task.status, TaskStatus::Approved | TaskStatus::Rejected) {
        return Err(HilError::WrongStatus {
            task_id: task_id.to_string(),
            status: task.status,
            expected: TaskStatus::Approved,
        });
    }
    task.status = TaskStatus::Done;
    Ok(())
}

/// Drop pending tasks and event entries that no longer belong together
///
/// A pending task is orphaned when its event is gone, inactive, or no longer
/// carries the matching entry. Event entries without a pending task are
/// cleared as well.
pub fn cleanup(doc: &mut Document) -> CleanupReport {
    let removed_tasks: Vec<String> = doc
        .pending_tasks()
        .filter(|task| match doc.event(&task.payload.event_id) {
            None => true,
            Some(event) => !event.is_active() || event.pending_approval(&task.task_id).is_none(),
        })
        .map(|task| task.task_id.clone())
        .collect();
    doc.tasks.retain(|t| !removed_tasks.contains(&t.task_id));

    let pending: HashSet<String> = doc.pending_tasks().map(|t| t.task_id.clone()).collect();
    let mut cleared_entries = 0;
    for event in &mut doc.events {
        let before = event.pending_approvals.len();
        event.pending_approvals.retain(|p| pending.contains(&p.task_id));
        let cleared = before - event.pending_approvals.len();
        if cleared == 0 {
            continue;
        }
        cleared_entries += cleared;
        let resume = if event.status == EventStatus::Cancelled {
            ThreadState::Closed
        } else {
            ThreadState::Open
        };
        unblock(event, resume);
        event.log_activity(
            "🧹",
            "Stale approvals cleared",
            format!("{} entries", cleared),
            Granularity::Fine,
        );
    }

    if !removed_tasks.is_empty() || cleared_entries > 0 {
        tracing::info!(
            removed = removed_tasks.len(),
            cleared_entries,
            "cleaned up orphaned approvals"
        );
    }
    CleanupReport {
        removed_tasks,
        cleared_entries,
    }
}

/// Mark a pending task resolved and return its event id and kind
fn resolve_task(
    doc: &mut Document,
    task_id: &str,
    status: TaskStatus,
    note: Option<String>,
) -> Result<(String, ApprovalKind), HilError> {
    let task = doc
        .task(task_id)
        .ok_or_else(|| HilError::TaskNotFound(task_id.to_string()))?;
    if task.status != TaskStatus::Pending {
        return Err(HilError::WrongStatus {
            task_id: task_id.to_string(),
            status: task.status,
            expected: TaskStatus::Pending,
        });
    }
    let event_id = task.payload.event_id.clone();
    let kind = task.kind;
    if doc.event(&event_id).is_none() {
        return Err(HilError::EventNotFound(event_id));
    }

    if let Some(task) = doc.task_mut(task_id) {
        task.status = status;
        task.resolved_at = Some(Utc::now());
        task.note = note;
    }
    Ok((event_id, kind))
}

fn event_for<'a>(doc: &'a mut Document, event_id: &str) -> Result<&'a mut EventRecord, HilError> {
    doc.event_mut(event_id)
        .ok_or_else(|| HilError::EventNotFound(event_id.to_string()))
}

/// Remove the event entry for `task_id`, returning its held message
fn take_entry(event: &mut EventRecord, task_id: &str) -> Option<InboundMessage> {
    let position = event
        .pending_approvals
        .iter()
        .position(|p| p.task_id == task_id)?;
    event.pending_approvals.remove(position).held_message
}

/// Leave the HIL state once nothing is outstanding
fn unblock(event: &mut EventRecord, resume: ThreadState) -> bool {
    if !event.pending_approvals.is_empty() {
        return false;
    }
    if event.thread_state == ThreadState::WaitingOnHil {
        event.thread_state = resume;
    }
    true
}
