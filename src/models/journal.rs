//! Audit trail and activity feed
//!
//! The audit trail explains why routing happened and is only ever appended.
//! The activity feed is a bounded, display-oriented log.

use super::event::EventRecord;
use super::stage::Stage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum activity entries kept per event
pub const ACTIVITY_LOG_CAP: usize = 50;

/// Stage transition record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub from_stage: Option<Stage>,
    pub to_stage: Stage,
    pub reason: String,
}

/// Display tier of an activity entry
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// Milestone, always shown
    #[default]
    Coarse,
    /// Step detail, shown in the detailed view only
    Fine,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub icon: String,
    pub title: String,
    #[serde(default)]
    pub detail: String,
    #[serde(default)]
    pub granularity: Granularity,
}

impl EventRecord {
    pub fn append_audit(
        &mut self,
        from_stage: Option<Stage>,
        to_stage: Stage,
        reason: impl Into<String>,
        actor: &str,
    ) {
        self.audit.push(AuditEntry {
            timestamp: Utc::now(),
            actor: actor.to_string(),
            from_stage,
            to_stage,
            reason: reason.into(),
        });
    }

    pub fn log_activity(
        &mut self,
        icon: &str,
        title: impl Into<String>,
        detail: impl Into<String>,
        granularity: Granularity,
    ) {
        self.activity_log.push(ActivityEntry {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            icon: icon.to_string(),
            title: title.into(),
            detail: detail.into(),
            granularity,
        });

        if self.activity_log.len() > ACTIVITY_LOG_CAP {
            let excess = self.activity_log.len() - ACTIVITY_LOG_CAP;
            self.activity_log.drain(..excess);
        }
    }

    /// Activity entries visible at the requested level of detail
    pub fn visible_activity(&self, detailed: bool) -> impl Iterator<Item = &ActivityEntry> {
        self.activity_log
            .iter()
            .filter(move |e| detailed || e.granularity == Granularity::Coarse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activity_log_is_trimmed_to_cap() {
        let mut event = EventRecord::with_id("evt");
        for i in 0..(ACTIVITY_LOG_CAP + 7) {
            event.log_activity("•", format!("entry {}", i), "", Granularity::Fine);
        }
        assert_eq!(event.activity_log.len(), ACTIVITY_LOG_CAP);
        assert_eq!(event.activity_log[0].title, "entry 7");
        assert_eq!(
            event.activity_log.last().unwrap().title,
            format!("entry {}", ACTIVITY_LOG_CAP + 6)
        );
    }

    #[test]
    fn test_visible_activity_filters_fine_entries() {
        let mut event = EventRecord::with_id("evt");
        event.log_activity("📅", "Date confirmed", "", Granularity::Coarse);
        event.log_activity("#", "Hash recomputed", "room_eval", Granularity::Fine);

        assert_eq!(event.visible_activity(false).count(), 1);
        assert_eq!(event.visible_activity(true).count(), 2);
    }

    #[test]
    fn test_audit_is_appended_without_touching_prior_entries() {
        let mut event = EventRecord::with_id("evt");
        event.append_audit(None, Stage::Intake, "created", "system");
        let before = event.audit.clone();

        event.append_audit(Some(Stage::Intake), Stage::DateNegotiation, "next", "system");

        assert_eq!(event.audit.len(), before.len() + 1);
        assert_eq!(&event.audit[..before.len()], &before[..]);
    }
}
