//! Change detection
//!
//! Classifies what an inbound message changes relative to the committed
//! event. A value counts as a *revision* only when the message carries a
//! revision signal and the value differs from what is committed; values that
//! fill previously empty fields are *provisions*. Requirements are compared
//! field by field, so one message can provide some fields and echo others.

use crate::models::{EventRecord, ExtractedFields, Requirements};
use crate::state::line_items_hash;
use crate::Result;
use anyhow::Context;
use regex::Regex;
use serde::Serialize;

/// Phrases that mark a message as overriding an earlier decision
const REVISION_PATTERNS: &[&str] = &[
    r"actually",
    r"instead",
    r"rather",
    r"correction",
    r"on second thought",
    r"no longer",
    r"change (?:it |that |this |the \w+ )?to",
    r"switch(?:ed)? (?:it |the \w+ )?to",
    r"move (?:it |the \w+ )?to",
    r"make it",
    r"update (?:the )?(?:date|room|headcount|number|count)",
    r"resched\w*",
    r"postpon\w*",
    r"can we (?:change|move|switch)",
];

/// Which committed variable a message changes
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Date,
    RoomSelection,
    Requirements,
    LineItems,
    NoChange,
}

impl ChangeKind {
    pub fn key(&self) -> &'static str {
        match self {
            ChangeKind::Date => "date",
            ChangeKind::RoomSelection => "room_selection",
            ChangeKind::Requirements => "requirements",
            ChangeKind::LineItems => "line_items",
            ChangeKind::NoChange => "none",
        }
    }
}

/// Result of classifying one message
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DetectedChange {
    /// Highest-priority change; drives routing
    pub kind: ChangeKind,
    /// Whether the primary change overrides a committed value
    pub revision: bool,
    /// Lower-priority changes carried by the same message
    pub secondary: Vec<ChangeKind>,
    /// The revision phrase that matched, if any
    pub signal: Option<String>,
    /// Requirement fields this message may commit; unsignalled overrides are left out
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requirements: Option<Requirements>,
}

impl DetectedChange {
    pub fn none() -> Self {
        Self {
            kind: ChangeKind::NoChange,
            revision: false,
            secondary: Vec::new(),
            signal: None,
            requirements: None,
        }
    }

    /// Whether `kind` is the primary or a secondary change
    pub fn includes(&self, kind: ChangeKind) -> bool {
        self.kind == kind || self.secondary.contains(&kind)
    }
}

pub struct ChangeDetector {
    signals: Regex,
}

impl ChangeDetector {
    /// Build a detector with the built-in signals plus `extra` phrases
    pub fn new(extra: &[String]) -> Result<Self> {
        let mut alternatives: Vec<String> =
            REVISION_PATTERNS.iter().map(|p| p.to_string()).collect();
        alternatives.extend(
            extra
                .iter()
                .map(|phrase| phrase.trim())
                .filter(|phrase| !phrase.is_empty())
                .map(|phrase| regex::escape(&phrase.to_lowercase())),
        );

        let pattern = format!(r"(?i)\b(?:{})\b", alternatives.join("|"));
        let signals = Regex::new(&pattern).context("Failed to compile revision signals")?;
        Ok(Self { signals })
    }

    pub fn revision_signal(&self, text: &str) -> Option<String> {
        self.signals.find(text).map(|m| m.as_str().to_lowercase())
    }

    /// Classify `extracted` against the committed state of `event`
    ///
    /// A value equal to the committed one is never a change. Priority is
    /// date, room, requirements, line items.
    pub fn detect(
        &self,
        event: &EventRecord,
        extracted: &ExtractedFields,
        text: &str,
    ) -> DetectedChange {
        let signal = self.revision_signal(text);
        let signalled = signal.is_some();
        let mut found: Vec<(ChangeKind, bool)> = Vec::new();

        if let Some(date) = extracted.date {
            match event.chosen_date {
                None => found.push((ChangeKind::Date, false)),
                Some(current) if current != date => {
                    if signalled {
                        found.push((ChangeKind::Date, true));
                    } else if !event.date_confirmed {
                        found.push((ChangeKind::Date, false));
                    }
                }
                Some(_) => {}
            }
        }

        if let Some(room_id) = &extracted.room_id {
            match &event.locked_room_id {
                None => found.push((ChangeKind::RoomSelection, false)),
                Some(locked) if locked != room_id && signalled => {
                    found.push((ChangeKind::RoomSelection, true))
                }
                Some(_) => {}
            }
        }

        let requirements =
            admissible_requirements(&event.requirements, &extracted.requirements, signalled);
        if let Some((_, revision)) = &requirements {
            found.push((ChangeKind::Requirements, *revision));
        }

        if !extracted.line_items.is_empty()
            && line_items_hash(&extracted.line_items) != line_items_hash(&event.line_items)
        {
            if event.line_items.is_empty() {
                found.push((ChangeKind::LineItems, false));
            } else if signalled {
                found.push((ChangeKind::LineItems, true));
            }
        }

        let requirements = requirements.map(|(update, _)| update);
        let mut found = found.into_iter();
        let Some((kind, revision)) = found.next() else {
            return DetectedChange {
                signal,
                ..DetectedChange::none()
            };
        };

        DetectedChange {
            kind,
            revision,
            secondary: found.map(|(kind, _)| kind).collect(),
            signal,
            requirements,
        }
    }
}

/// How one requirement field in a message relates to the committed one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldChange {
    Absent,
    Unchanged,
    Provided,
    Revised,
}

fn compare_field<T: PartialEq>(current: Option<&T>, update: Option<&T>) -> FieldChange {
    match (current, update) {
        (_, None) => FieldChange::Absent,
        (None, Some(_)) => FieldChange::Provided,
        (Some(current), Some(update)) if current == update => FieldChange::Unchanged,
        (Some(_), Some(_)) => FieldChange::Revised,
    }
}

/// The part of `update` that may be committed, and whether it revises anything
///
/// Empty fields are provided freely; differing fields only with a revision
/// signal; equal fields are dropped. `None` when nothing is left.
fn admissible_requirements(
    current: &Requirements,
    update: &Requirements,
    signalled: bool,
) -> Option<(Requirements, bool)> {
    let mut admitted = Requirements::default();
    let mut revised = false;
    let mut admit = |change: FieldChange| match change {
        FieldChange::Provided => true,
        FieldChange::Revised if signalled => {
            revised = true;
            true
        }
        _ => false,
    };

    if admit(compare_field(current.participants.as_ref(), update.participants.as_ref())) {
        admitted.participants = update.participants;
    }
    if admit(compare_field(current.seating_layout.as_ref(), update.seating_layout.as_ref())) {
        admitted.seating_layout = update.seating_layout.clone();
    }
    if admit(compare_field(current.start_time.as_ref(), update.start_time.as_ref())) {
        admitted.start_time = update.start_time.clone();
    }
    if admit(compare_field(current.end_time.as_ref(), update.end_time.as_ref())) {
        admitted.end_time = update.end_time.clone();
    }
    let specials = |r: &Requirements| {
        Some(r.special_requirements.clone()).filter(|list| !list.is_empty())
    };
    if admit(compare_field(specials(current).as_ref(), specials(update).as_ref())) {
        admitted.special_requirements = update.special_requirements.clone();
    }

    (!admitted.is_empty()).then_some((admitted, revised))
}
