//! Detour routing
//!
//! Maps a detected change to the stage that owns the changed variable. When
//! that owner lies behind the active stage the event detours there and
//! remembers the active stage as its caller; once the owner is satisfied the
//! event returns forward to the caller without re-running unaffected stages.

use crate::models::{EventRecord, EventStatus, ExtractedFields, Granularity, Stage};
use crate::services::RoomEvaluator;
use crate::state::{self, HashDomain, Source};
use crate::workflow::detector::{ChangeKind, DetectedChange};
use crate::Result;
use serde::Serialize;

/// Why routing left the active stage in place
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NothingChanged,
    RequirementsUnchanged,
    LockedRoomStillValid,
    /// The owning stage has not been reached yet; it will pick the value up
    OwnerNotReached,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChangeDecision {
    pub change_kind: ChangeKind,
    pub next_stage: Stage,
    pub updated_caller_stage: Option<Stage>,
    pub needs_reevaluation: bool,
    pub skip_reason: Option<SkipReason>,
    pub detoured: bool,
}

/// The stage owning the variable behind `kind`
pub fn owner_of(kind: ChangeKind, event: &EventRecord) -> Option<Stage> {
    match kind {
        ChangeKind::Date => Some(Stage::DateNegotiation),
        ChangeKind::RoomSelection => Some(Stage::RoomNegotiation),
        ChangeKind::Requirements if !event.date_confirmed => Some(Stage::DateNegotiation),
        ChangeKind::Requirements => Some(Stage::RoomNegotiation),
        ChangeKind::LineItems => Some(Stage::Offer),
        ChangeKind::NoChange => None,
    }
}

/// Route a detected change and apply its state effects to `event`
///
/// Requirements and line items are committed here; dates and rooms are
/// committed by their owning stage handlers. Dependent hashes are cleared
/// through the invalidation table.
pub fn route(
    event: &mut EventRecord,
    change: &DetectedChange,
    extracted: &ExtractedFields,
    rooms: &dyn RoomEvaluator,
) -> Result<ChangeDecision> {
    let active = event.current_stage;

    if let Some(update) = change
        .requirements
        .as_ref()
        .filter(|_| change.includes(ChangeKind::Requirements))
    {
        let merged = event.requirements.merged_with(update);
        event.requirements = merged;
        state::invalidate(event, Source::Requirements);
        event.requirements_hash = Some(state::requirements_hash(&event.requirements));
    }
    if change.includes(ChangeKind::LineItems) {
        event.line_items = extracted.line_items.clone();
        state::invalidate(event, Source::LineItems);
    }
    match change.kind {
        ChangeKind::Date => {
            state::invalidate(event, Source::Date);
        }
        ChangeKind::RoomSelection => {
            state::invalidate(event, Source::RoomSelection);
        }
        _ => {}
    }

    let Some(mut owner) = owner_of(change.kind, event) else {
        let reason = if extracted.requirements.is_empty() {
            SkipReason::NothingChanged
        } else {
            SkipReason::RequirementsUnchanged
        };
        return Ok(decision(change, event, active, false, Some(reason)));
    };

    let mut skip_reason = None;
    if change.kind == ChangeKind::Requirements
        && owner == Stage::RoomNegotiation
        && locked_room_still_fits(event, rooms)?
    {
        // Keep the lock under the new requirements; only the offer is stale.
        if let Some(date) = event.chosen_date {
            event.room_eval_hash = Some(state::room_eval_hash(date, &event.requirements));
        }
        event.room_evaluation = None;
        skip_reason = Some(SkipReason::LockedRoomStillValid);
        owner = Stage::Offer;
        event.log_activity(
            "🏛",
            "Room still fits",
            "Updated requirements fit the locked room",
            Granularity::Fine,
        );
    }

    if owner > active {
        tracing::debug!(
            event_id = %event.event_id,
            kind = change.kind.key(),
            owner = %owner,
            active = %active,
            "owner stage not reached yet"
        );
        let reason = skip_reason.unwrap_or(SkipReason::OwnerNotReached);
        return Ok(decision(change, event, active, false, Some(reason)));
    }

    if owner == active {
        let next = active.next().unwrap_or(active);
        return Ok(decision(change, event, next, true, skip_reason));
    }

    let reason = format!("{} change detected", change.kind.key().replace('_', " "));
    detour(event, owner, &reason, "router");
    if event.status == EventStatus::Confirmed {
        event.status = EventStatus::Option;
        event.log_activity(
            "↩",
            "Booking reopened",
            format!("{} after confirmation", reason),
            Granularity::Coarse,
        );
    }

    Ok(ChangeDecision {
        detoured: true,
        ..decision(change, event, owner, true, skip_reason)
    })
}

fn decision(
    change: &DetectedChange,
    event: &EventRecord,
    next_stage: Stage,
    needs_reevaluation: bool,
    skip_reason: Option<SkipReason>,
) -> ChangeDecision {
    ChangeDecision {
        change_kind: change.kind,
        next_stage,
        updated_caller_stage: event.caller_stage,
        needs_reevaluation,
        skip_reason,
        detoured: false,
    }
}

/// Jump back to `target`, remembering the active stage as caller
///
/// A second detour overwrites any earlier caller.
pub fn detour(event: &mut EventRecord, target: Stage, reason: &str, actor: &str) {
    let caller = event.current_stage;
    event.caller_stage = Some(caller);
    event.detour_count += 1;
    event.transition_to(target, format!("detour: {}", reason), actor);
    event.log_activity(
        "↩",
        format!("Back to {}", target.name()),
        reason,
        Granularity::Coarse,
    );
    tracing::info!(
        event_id = %event.event_id,
        from = %caller,
        to = %target,
        reason,
        "detour"
    );
}

/// Move forward after the active stage is satisfied
///
/// With a caller set, the event goes to the first stage before the caller
/// whose state is no longer valid, or straight back to the caller. Without
/// one it takes the next stage in order.
pub fn advance(event: &mut EventRecord, reason: &str, actor: &str) -> Stage {
    let from = event.current_stage;

    if let Some(caller) = event.caller_stage {
        if caller > from {
            if let Some(gap) = from.between(caller).find(|s| !stage_satisfied(event, *s)) {
                event.transition_to(gap, reason, actor);
                return gap;
            }
            event.caller_stage = None;
            event.transition_to(caller, "returned to caller after detour", actor);
            return caller;
        }
        event.caller_stage = None;
    }

    match from.next() {
        Some(next) => {
            event.transition_to(next, reason, actor);
            next
        }
        None => from,
    }
}

/// Whether the state a stage produces is present and still valid
pub fn stage_satisfied(event: &EventRecord, stage: Stage) -> bool {
    match stage {
        Stage::Intake => true,
        Stage::DateNegotiation => event.chosen_date.is_some() && event.date_confirmed,
        Stage::RoomNegotiation => match (event.chosen_date, &event.locked_room_id) {
            (Some(date), Some(_)) => state::matches(
                event,
                HashDomain::RoomEvaluation,
                &state::room_eval_hash(date, &event.requirements),
            ),
            _ => false,
        },
        Stage::Offer => match (&event.room_eval_hash, &event.locked_room_id) {
            (Some(eval), Some(room)) => state::matches(
                event,
                HashDomain::Offer,
                &state::offer_hash(eval, room, &event.line_items),
            ),
            _ => false,
        },
        Stage::Negotiation => event.offer_accepted,
        Stage::Transition => false,
        Stage::Confirmation => event.status == EventStatus::Confirmed,
    }
}

fn locked_room_still_fits(event: &EventRecord, rooms: &dyn RoomEvaluator) -> Result<bool> {
    match (&event.locked_room_id, event.chosen_date) {
        (Some(room_id), Some(date)) if event.date_confirmed => {
            rooms.is_available(room_id, date, &event.requirements)
        }
        _ => Ok(false),
    }
}
