//! Built-in stage handlers
//!
//! Each handler commits the values its stage owns, then either halts with a
//! draft for the client or moves the event on through [`advance`].

use crate::models::{
    ApprovalKind, ClientReply, EventRecord, EventStatus, Granularity, OfferRecord, Requirements,
    Stage, ThreadState,
};
use crate::services::{format_cents, RoomEvaluator};
use crate::state::{self, HashDomain, Source};
use crate::workflow::context::RequestContext;
use crate::workflow::dispatcher::{HandlerRegistry, StageResult};
use crate::workflow::router::{self, advance, stage_satisfied};
use crate::Result;
use chrono::{NaiveDate, Utc};
use serde_json::json;
use uuid::Uuid;

pub fn register_defaults(registry: &mut HandlerRegistry) {
    registry
        .register_fn(Stage::Intake, intake)
        .register_fn(Stage::DateNegotiation, date_negotiation)
        .register_fn(Stage::RoomNegotiation, room_negotiation)
        .register_fn(Stage::Offer, offer)
        .register_fn(Stage::Negotiation, negotiation)
        .register_fn(Stage::Transition, transition)
        .register_fn(Stage::Confirmation, confirmation);
}

fn intake(ctx: &mut RequestContext<'_>) -> Result<StageResult> {
    let sender = ctx.message.sender.clone();
    let event = ctx.event_mut();
    if event.client_id.is_none() {
        event.client_id = sender;
    }
    let client_id = event.client_id.clone();
    let event_id = event.event_id.clone();
    let summary = describe_requirements(&event.requirements);
    event.log_activity("📥", "Intake recorded", summary, Granularity::Fine);
    let next = advance(event, "intake recorded", "system");

    if let Some(client_id) = client_id {
        ctx.document.link_client(&client_id, &event_id);
    }
    Ok(StageResult::proceed("intake_recorded").with("next_stage", next.key()))
}

fn date_negotiation(ctx: &mut RequestContext<'_>) -> Result<StageResult> {
    let proposed = ctx.extracted().date;
    let event = ctx.event_mut();

    if let Some(date) = proposed {
        if event.chosen_date != Some(date) || !event.date_confirmed {
            if event.chosen_date != Some(date) {
                event.chosen_date = Some(date);
                state::invalidate(event, Source::Date);
            }
            event.date_confirmed = true;
            event.log_activity("📅", "Date confirmed", date.to_string(), Granularity::Coarse);
            let next = advance(event, "date confirmed", "system");
            return Ok(StageResult::proceed("date_confirmed")
                .with("date", date.to_string())
                .with("next_stage", next.key()));
        }
    }

    if event.date_confirmed && event.chosen_date.is_some() {
        let next = advance(event, "date already confirmed", "system");
        return Ok(StageResult::proceed("date_unchanged").with("next_stage", next.key()));
    }

    event.thread_state = ThreadState::AwaitingClient;
    let body = match event.chosen_date {
        Some(date) => format!("Shall we hold {} for your event?", date),
        None => "Which date would you like to hold the event on?".to_string(),
    };
    ctx.push_draft(Stage::DateNegotiation, body);
    Ok(StageResult::halt("date_requested"))
}

fn room_negotiation(ctx: &mut RequestContext<'_>) -> Result<StageResult> {
    let Some(date) = confirmed_date(ctx.event()) else {
        ctx.event_mut().transition_to(
            Stage::DateNegotiation,
            "room negotiation needs a confirmed date",
            "system",
        );
        return Ok(StageResult::proceed("date_required"));
    };
    let requirements = ctx.event().requirements.clone();
    let fresh = state::room_eval_hash(date, &requirements);
    let rooms = ctx.services.rooms.clone();

    if let Some(room_id) = ctx.extracted().room_id.clone() {
        let locked = ctx.event().locked_room_id.clone();
        if locked.as_deref() == Some(room_id.as_str()) {
            tracing::debug!(room_id = %room_id, "room already locked, ignoring repeated selection");
        } else if rooms.is_available(&room_id, date, &requirements)? {
            let event = ctx.event_mut();
            if let Some(previous) = event.release_room() {
                event.log_activity("🔓", "Room released", previous, Granularity::Fine);
            }
            event.lock_room(room_id.clone(), fresh);
            state::invalidate(event, Source::RoomSelection);
            event.log_activity("🔒", "Room locked", room_id.clone(), Granularity::Coarse);
            let next = advance(event, "room locked", "system");
            return Ok(StageResult::proceed("room_locked")
                .with("room_id", room_id)
                .with("next_stage", next.key()));
        } else {
            match locked {
                Some(held) => {
                    ctx.event_mut().thread_state = ThreadState::AwaitingClient;
                    ctx.push_draft(
                        Stage::RoomNegotiation,
                        format!(
                            "{} is not available on {}; we keep {} on hold for you.",
                            room_id, date, held
                        ),
                    );
                    return Ok(StageResult::halt("room_unavailable").with("room_id", room_id));
                }
                None => {
                    ctx.push_draft(
                        Stage::RoomNegotiation,
                        format!("{} is not available on {}.", room_id, date),
                    );
                    return present_options(ctx, date, &requirements, &fresh, rooms.as_ref());
                }
            }
        }
    }

    if let Some(locked) = ctx.event().locked_room_id.clone() {
        if state::matches(ctx.event(), HashDomain::RoomEvaluation, &fresh) {
            let event = ctx.event_mut();
            event.log_activity("⏭", "Room unchanged", locked.clone(), Granularity::Fine);
            let next = advance(event, "locked room still valid", "system");
            return Ok(StageResult::proceed("room_fast_skip")
                .with("room_id", locked)
                .with("next_stage", next.key()));
        }

        if rooms.is_available(&locked, date, &requirements)? {
            let event = ctx.event_mut();
            event.room_eval_hash = Some(fresh);
            event.room_evaluation = None;
            event.log_activity("🔒", "Room revalidated", locked.clone(), Granularity::Fine);
            let next = advance(event, "locked room revalidated", "system");
            return Ok(StageResult::proceed("room_revalidated")
                .with("room_id", locked)
                .with("next_stage", next.key()));
        }

        let event = ctx.event_mut();
        event.release_room();
        state::invalidate(event, Source::RoomSelection);
        event.log_activity(
            "🔓",
            "Room released",
            format!("{} no longer fits", locked),
            Granularity::Coarse,
        );
        tracing::info!(
            event_id = %event.event_id,
            room_id = %locked,
            "released room that no longer fits"
        );
    }

    present_options(ctx, date, &requirements, &fresh, rooms.as_ref())
}

/// Draft the rooms that fit, reusing the stored evaluation while its hash holds
fn present_options(
    ctx: &mut RequestContext<'_>,
    date: NaiveDate,
    requirements: &Requirements,
    fresh: &str,
    rooms: &dyn RoomEvaluator,
) -> Result<StageResult> {
    let cached = ctx
        .event()
        .room_evaluation
        .clone()
        .filter(|_| state::matches(ctx.event(), HashDomain::RoomEvaluation, fresh));
    let reused = cached.is_some();

    let evaluation = match cached {
        Some(evaluation) => evaluation,
        None => {
            let evaluation = rooms.evaluate(date, requirements)?;
            let event = ctx.event_mut();
            event.room_evaluation = Some(evaluation.clone());
            event.room_eval_hash = Some(fresh.to_string());
            event.log_activity(
                "🏛",
                "Rooms evaluated",
                format!("{} candidates on {}", evaluation.candidates.len(), date),
                Granularity::Fine,
            );
            evaluation
        }
    };

    if evaluation.candidates.is_empty() {
        let event = ctx.event_mut();
        event.date_confirmed = false;
        event.thread_state = ThreadState::AwaitingClient;
        event.transition_to(
            Stage::DateNegotiation,
            "no room available on the chosen date",
            "system",
        );
        event.log_activity("⚠", "No room available", date.to_string(), Granularity::Coarse);
        ctx.push_draft(
            Stage::RoomNegotiation,
            format!("No room fits your group on {}. Could you suggest another date?", date),
        );
        return Ok(StageResult::halt("no_room_available"));
    }

    let mut body = format!("Rooms available on {}:\n", date);
    for candidate in &evaluation.candidates {
        body.push_str(&format!(
            "- {} ({}, up to {} guests)\n",
            candidate.name, candidate.room_id, candidate.capacity
        ));
    }
    body.push_str("Which room would you like us to hold?");

    let ids: Vec<&str> = evaluation
        .candidates
        .iter()
        .map(|c| c.room_id.as_str())
        .collect();
    let result = StageResult::halt("room_options_presented")
        .with("candidates", json!(ids))
        .with("reused_evaluation", reused);

    ctx.event_mut().thread_state = ThreadState::AwaitingClient;
    ctx.push_draft(Stage::RoomNegotiation, body);
    Ok(result)
}

fn offer(ctx: &mut RequestContext<'_>) -> Result<StageResult> {
    if !stage_satisfied(ctx.event(), Stage::RoomNegotiation) {
        ctx.event_mut().transition_to(
            Stage::RoomNegotiation,
            "offer needs a valid room lock",
            "system",
        );
        return Ok(StageResult::proceed("room_required"));
    }

    let event = ctx.event();
    let (Some(room_id), Some(eval_hash)) = (&event.locked_room_id, &event.room_eval_hash) else {
        return Ok(StageResult::halt("room_required"));
    };
    let fresh = state::offer_hash(eval_hash, room_id, &event.line_items);

    if state::matches(event, HashDomain::Offer, &fresh) {
        let event = ctx.event_mut();
        event.log_activity("⏭", "Offer unchanged", "", Granularity::Fine);
        let next = advance(event, "offer unchanged", "system");
        return Ok(StageResult::proceed("offer_unchanged").with("next_stage", next.key()));
    }

    let offers = ctx.services.offers.clone();
    let draft = offers.compose(ctx.event())?;

    let event = ctx.event_mut();
    event.offer_hash = Some(fresh.clone());
    event.offers.push(OfferRecord {
        offer_id: Uuid::new_v4().to_string(),
        hash: fresh,
        room_id: draft.room_id.clone(),
        total_cents: draft.total_cents,
        created_at: Utc::now(),
    });
    event.offer_accepted = false;
    if event.status == EventStatus::Lead {
        event.status = EventStatus::Option;
    }
    event.thread_state = ThreadState::AwaitingClient;
    event.log_activity(
        "📝",
        "Offer sent",
        format!("{} total {}", draft.room_id, format_cents(draft.total_cents)),
        Granularity::Coarse,
    );
    let next = advance(event, "offer sent", "system");

    ctx.push_draft(Stage::Offer, draft.body);
    Ok(StageResult::halt("offer_sent")
        .with("total_cents", draft.total_cents)
        .with("next_stage", next.key()))
}

fn negotiation(ctx: &mut RequestContext<'_>) -> Result<StageResult> {
    let reply = ctx.extracted().reply;
    match reply {
        Some(ClientReply::Accept) => {
            if ctx.app.config().hil.approve_offer_acceptance {
                let body = confirmation_body(ctx.event());
                let task_id = ctx.enqueue_approval(ApprovalKind::OfferAcceptance, body)?;
                return Ok(StageResult::halt("awaiting_manager_approval").with("task_id", task_id));
            }
            let event = ctx.event_mut();
            event.offer_accepted = true;
            event.log_activity("🤝", "Offer accepted", "", Granularity::Coarse);
            let next = advance(event, "offer accepted", "client");
            Ok(StageResult::proceed("offer_accepted").with("next_stage", next.key()))
        }
        Some(ClientReply::Decline) => {
            let event = ctx.event_mut();
            event.status = EventStatus::Cancelled;
            event.thread_state = ThreadState::Closed;
            event.offer_accepted = false;
            let released = event.release_room();
            event.log_activity(
                "✖",
                "Offer declined",
                released.unwrap_or_default(),
                Granularity::Coarse,
            );
            ctx.push_draft(
                Stage::Negotiation,
                "Thank you for letting us know. We have released the room hold.",
            );
            Ok(StageResult::halt("offer_declined"))
        }
        None if ctx.event().offer_accepted => {
            let next = advance(ctx.event_mut(), "offer already accepted", "system");
            Ok(StageResult::proceed("offer_accepted").with("next_stage", next.key()))
        }
        None => {
            ctx.event_mut().thread_state = ThreadState::AwaitingClient;
            Ok(StageResult::halt("awaiting_client_reply"))
        }
    }
}

fn transition(ctx: &mut RequestContext<'_>) -> Result<StageResult> {
    let missing = [
        Stage::DateNegotiation,
        Stage::RoomNegotiation,
        Stage::Offer,
        Stage::Negotiation,
    ]
    .into_iter()
    .find(|stage| !stage_satisfied(ctx.event(), *stage));

    if let Some(stage) = missing {
        let reason = format!("{} incomplete", stage.name().to_lowercase());
        router::detour(ctx.event_mut(), stage, &reason, "system");
        ctx.detours += 1;
        return Ok(StageResult::proceed("prerequisite_missing").with("stage", stage.key()));
    }

    let next = advance(ctx.event_mut(), "all prerequisites met", "system");
    Ok(StageResult::proceed("prerequisites_met").with("next_stage", next.key()))
}

fn confirmation(ctx: &mut RequestContext<'_>) -> Result<StageResult> {
    if ctx.event().status == EventStatus::Confirmed {
        return Ok(StageResult::halt("already_confirmed"));
    }

    let body = confirmation_body(ctx.event());
    let event = ctx.event_mut();
    event.status = EventStatus::Confirmed;
    event.thread_state = ThreadState::Open;
    event.log_activity("✅", "Booking confirmed", "", Granularity::Coarse);
    tracing::info!(event_id = %event.event_id, "booking confirmed");

    ctx.push_draft(Stage::Confirmation, body);
    Ok(StageResult::halt("booking_confirmed"))
}

fn confirmed_date(event: &EventRecord) -> Option<NaiveDate> {
    event.chosen_date.filter(|_| event.date_confirmed)
}

fn confirmation_body(event: &EventRecord) -> String {
    let room = event.locked_room_id.as_deref().unwrap_or("the room");
    match event.chosen_date {
        Some(date) => format!("Your booking of {} on {} is confirmed.", room, date),
        None => format!("Your booking of {} is confirmed.", room),
    }
}

fn describe_requirements(requirements: &Requirements) -> String {
    let mut parts = Vec::new();
    if let Some(n) = requirements.participants {
        parts.push(format!("{} participants", n));
    }
    if let Some(layout) = &requirements.seating_layout {
        parts.push(layout.clone());
    }
    if !requirements.special_requirements.is_empty() {
        parts.push(requirements.special_requirements.join(", "));
    }
    parts.join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppContext, EngineConfig, RoomConfig};
    use crate::models::{Document, ExtractedFields, InboundMessage};
    use crate::services::Services;

    fn app() -> AppContext {
        AppContext::new(EngineConfig {
            rooms: vec![RoomConfig {
                id: "room-a".to_string(),
                name: "Atrium".to_string(),
                capacity: 40,
                day_rate_cents: 100_000,
                unavailable: vec![],
            }],
            ..Default::default()
        })
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, day).unwrap()
    }

    fn run(
        event: EventRecord,
        extracted: ExtractedFields,
        handler: fn(&mut RequestContext<'_>) -> Result<StageResult>,
    ) -> (StageResult, EventRecord, Vec<String>) {
        let app = app();
        let services = Services::from_context(&app);
        let mut doc = Document::default();
        let index = doc.insert_event(event);
        let message = InboundMessage::new("").with_extracted(extracted);
        let mut ctx = RequestContext::new(message, &mut doc, index, &app, &services);
        let result = handler(&mut ctx).unwrap();
        let drafts = ctx.drafts.iter().map(|d| d.body.clone()).collect();
        (result, ctx.event().clone(), drafts)
    }

    #[test]
    fn test_date_handler_commits_and_advances() {
        let mut event = EventRecord::with_id("evt");
        event.current_stage = Stage::DateNegotiation;
        let extracted = ExtractedFields {
            date: Some(date(14)),
            ..Default::default()
        };

        let (result, event, _) = run(event, extracted, date_negotiation);

        assert_eq!(result.action, "date_confirmed");
        assert!(!result.halt);
        assert!(event.date_confirmed);
        assert_eq!(event.current_stage, Stage::RoomNegotiation);
    }

    #[test]
    fn test_date_handler_asks_when_no_date() {
        let mut event = EventRecord::with_id("evt");
        event.current_stage = Stage::DateNegotiation;

        let (result, event, drafts) = run(event, ExtractedFields::default(), date_negotiation);

        assert!(result.halt);
        assert_eq!(event.current_stage, Stage::DateNegotiation);
        assert_eq!(drafts.len(), 1);
    }

    #[test]
    fn test_room_handler_presents_options_then_locks() {
        let mut event = EventRecord::with_id("evt");
        event.current_stage = Stage::RoomNegotiation;
        event.chosen_date = Some(date(14));
        event.date_confirmed = true;

        let (result, event, drafts) = run(event, ExtractedFields::default(), room_negotiation);
        assert_eq!(result.action, "room_options_presented");
        assert!(drafts[0].contains("room-a"));
        assert!(event.room_eval_hash.is_some());

        let pick = ExtractedFields {
            room_id: Some("room-a".to_string()),
            ..Default::default()
        };
        let (result, event, _) = run(event, pick, room_negotiation);
        assert_eq!(result.action, "room_locked");
        assert_eq!(event.locked_room_id.as_deref(), Some("room-a"));
        assert_eq!(event.current_stage, Stage::Offer);
    }

    #[test]
    fn test_room_handler_without_date_goes_back() {
        let mut event = EventRecord::with_id("evt");
        event.current_stage = Stage::RoomNegotiation;

        let (result, event, _) = run(event, ExtractedFields::default(), room_negotiation);
        assert_eq!(result.action, "date_required");
        assert_eq!(event.current_stage, Stage::DateNegotiation);
    }

    #[test]
    fn test_transition_detours_to_missing_prerequisite() {
        let mut event = EventRecord::with_id("evt");
        event.current_stage = Stage::Transition;
        event.chosen_date = Some(date(14));

        let (result, event, _) = run(event, ExtractedFields::default(), transition);

        assert_eq!(result.action, "prerequisite_missing");
        assert_eq!(event.current_stage, Stage::DateNegotiation);
        assert_eq!(event.caller_stage, Some(Stage::Transition));
    }

    #[test]
    fn test_decline_cancels_and_releases() {
        let mut event = EventRecord::with_id("evt");
        event.current_stage = Stage::Negotiation;
        event.lock_room("room-a", "sha256:x");
        let extracted = ExtractedFields {
            reply: Some(ClientReply::Decline),
            ..Default::default()
        };

        let (result, event, _) = run(event, extracted, negotiation);

        assert_eq!(result.action, "offer_declined");
        assert_eq!(event.status, EventStatus::Cancelled);
        assert!(event.locked_room_id.is_none());
        assert!(!event.is_active());
    }
}
