//! End-to-end booking flows through the engine
//!
//! Covers:
//! - Intake through confirmation with a manager approval
//! - Detours for date, room and requirement changes and the return to the caller
//! - Hash-guarded reuse of room evaluations
//! - Blocked events, held messages, escalation and unknown transactions

use bookflow::config::{AppContext, EngineConfig, ProductConfig, RoomConfig};
use bookflow::models::{
    ClientReply, EventStatus, ExtractedFields, InboundMessage, LineItem, Requirements,
    RoomEvaluation, Stage, TaskStatus, ThreadState,
};
use bookflow::services::{CatalogOfferComposer, CatalogRoomEvaluator, RoomEvaluator, Services};
use bookflow::workflow::{ChangeKind, Engine, SkipReason};
use bookflow::Result;
use chrono::NaiveDate;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, day).unwrap()
}

fn config() -> EngineConfig {
    EngineConfig {
        rooms: vec![
            RoomConfig {
                id: "room-a".to_string(),
                name: "Atrium".to_string(),
                capacity: 40,
                day_rate_cents: 120_000,
                unavailable: vec![date(28)],
            },
            RoomConfig {
                id: "room-b".to_string(),
                name: "Ballroom".to_string(),
                capacity: 80,
                day_rate_cents: 200_000,
                unavailable: vec![],
            },
        ],
        products: vec![ProductConfig {
            name: "Coffee break".to_string(),
            unit_price_cents: 650,
        }],
        ..Default::default()
    }
}

fn app_in(temp: &TempDir, config: EngineConfig) -> AppContext {
    AppContext::new(config).with_store_path(temp.path().join("events.json"))
}

fn engine(temp: &TempDir) -> Engine {
    Engine::new(app_in(temp, config())).unwrap()
}

/// Room evaluator that counts full evaluations
struct CountingRooms {
    inner: CatalogRoomEvaluator,
    evaluations: Arc<AtomicUsize>,
}

impl RoomEvaluator for CountingRooms {
    fn evaluate(&self, date: NaiveDate, requirements: &Requirements) -> Result<RoomEvaluation> {
        self.evaluations.fetch_add(1, Ordering::SeqCst);
        self.inner.evaluate(date, requirements)
    }

    fn is_available(
        &self,
        room_id: &str,
        date: NaiveDate,
        requirements: &Requirements,
    ) -> Result<bool> {
        self.inner.is_available(room_id, date, requirements)
    }
}

fn counting_engine(temp: &TempDir) -> (Engine, Arc<AtomicUsize>) {
    let app = app_in(temp, config());
    let evaluations = Arc::new(AtomicUsize::new(0));
    let services = Services {
        rooms: Arc::new(CountingRooms {
            inner: CatalogRoomEvaluator::new(app.catalog().clone()),
            evaluations: evaluations.clone(),
        }),
        offers: Arc::new(CatalogOfferComposer::new(app.catalog().clone())),
    };
    (Engine::with_services(app, services).unwrap(), evaluations)
}

fn inquiry() -> InboundMessage {
    InboundMessage::new("Hello, we'd like to book a room for 30 people on March 14.")
        .from_sender("ana@example.com")
        .with_extracted(ExtractedFields {
            date: Some(date(14)),
            requirements: Requirements {
                participants: Some(30),
                ..Default::default()
            },
            ..Default::default()
        })
}

fn pick_room(event_id: &str, room_id: &str) -> InboundMessage {
    InboundMessage::new(format!("We'll take {}.", room_id))
        .for_event(event_id)
        .with_extracted(ExtractedFields {
            room_id: Some(room_id.to_string()),
            ..Default::default()
        })
}

fn reply(event_id: &str, answer: ClientReply) -> InboundMessage {
    InboundMessage::new("Thanks for the offer.")
        .for_event(event_id)
        .with_extracted(ExtractedFields {
            reply: Some(answer),
            ..Default::default()
        })
}

/// Drive a fresh inquiry up to a sent offer; returns the event id
fn offer_sent(engine: &Engine) -> String {
    let first = engine.process(inquiry()).unwrap();
    let event_id = first.event_id.clone().unwrap();
    let second = engine.process(pick_room(&event_id, "room-a")).unwrap();
    assert_eq!(second.action, "offer_sent");
    event_id
}

#[test]
fn test_inquiry_presents_rooms_for_confirmed_date() {
    let temp = TempDir::new().unwrap();
    let engine = engine(&temp);

    let outcome = engine.process(inquiry()).unwrap();

    assert_eq!(outcome.action, "room_options_presented");
    assert_eq!(outcome.stage, Some(Stage::RoomNegotiation));
    assert_eq!(
        outcome.visited,
        vec![Stage::Intake, Stage::DateNegotiation, Stage::RoomNegotiation]
    );
    assert_eq!(outcome.drafts.len(), 1);
    assert!(outcome.drafts[0].body.contains("room-a"));
    assert!(outcome.drafts[0].body.contains("room-b"));

    let doc = engine.store().load().unwrap();
    let event = doc.event(outcome.event_id.as_deref().unwrap()).unwrap();
    assert!(event.date_confirmed);
    assert_eq!(event.requirements.participants, Some(30));
    assert!(event.requirements_hash.is_some());
    assert_eq!(event.client_id.as_deref(), Some("ana@example.com"));
    assert!(doc.clients.contains_key("ana@example.com"));
}

#[test]
fn test_repeated_message_reuses_room_evaluation() {
    let temp = TempDir::new().unwrap();
    let (engine, evaluations) = counting_engine(&temp);

    let first = engine.process(inquiry()).unwrap();
    assert_eq!(evaluations.load(Ordering::SeqCst), 1);
    let event_id = first.event_id.unwrap();

    let again = engine.process(inquiry().for_event(&event_id)).unwrap();

    assert_eq!(again.action, "room_options_presented");
    assert_eq!(again.change.as_ref().unwrap().kind, ChangeKind::NoChange);
    assert_eq!(again.payload["reused_evaluation"], serde_json::json!(true));
    assert_eq!(evaluations.load(Ordering::SeqCst), 1);
}

#[test]
fn test_offer_acceptance_waits_for_manager_then_confirms() {
    let temp = TempDir::new().unwrap();
    let engine = engine(&temp);
    let event_id = offer_sent(&engine);

    let accepted = engine.process(reply(&event_id, ClientReply::Accept)).unwrap();
    assert_eq!(accepted.action, "awaiting_manager_approval");
    assert!(accepted.drafts[0].requires_approval);
    let task_id = accepted.payload["task_id"].as_str().unwrap().to_string();

    let held = engine
        .process(InboundMessage::new("Any news?").for_event(&event_id))
        .unwrap();
    assert_eq!(held.action, "awaiting_manager_approval");
    assert!(held.drafts.is_empty());

    let approval = engine.approve(&task_id, Some("fine".to_string())).unwrap();
    assert!(approval.resolution.unblocked);
    assert_eq!(approval.resolution.stage, Stage::Transition);
    assert!(approval.released_draft.is_some());
    let continuation = approval.continuation.unwrap();
    assert_eq!(continuation.action, "booking_confirmed");
    assert_eq!(continuation.stage, Some(Stage::Confirmation));
    assert_eq!(approval.replayed.len(), 1);
    assert_eq!(approval.replayed[0].action, "already_confirmed");

    let doc = engine.store().load().unwrap();
    let event = doc.event(&event_id).unwrap();
    assert_eq!(event.status, EventStatus::Confirmed);
    assert!(event.pending_approvals.is_empty());
    assert_eq!(doc.task(&task_id).unwrap().status, TaskStatus::Approved);

    engine.complete(&task_id).unwrap();
    let doc = engine.store().load().unwrap();
    assert_eq!(doc.task(&task_id).unwrap().status, TaskStatus::Done);
}

#[test]
fn test_rejected_acceptance_returns_to_client() {
    let temp = TempDir::new().unwrap();
    let engine = engine(&temp);
    let event_id = offer_sent(&engine);

    let accepted = engine.process(reply(&event_id, ClientReply::Accept)).unwrap();
    let task_id = accepted.payload["task_id"].as_str().unwrap().to_string();

    let outcome = engine.reject(&task_id, None).unwrap();
    assert!(outcome.resolution.unblocked);
    assert_eq!(outcome.resolution.stage, Stage::Negotiation);
    assert!(outcome.released_draft.is_none());
    assert!(outcome.replayed.is_empty());

    let doc = engine.store().load().unwrap();
    let event = doc.event(&event_id).unwrap();
    assert!(!event.offer_accepted);
    assert_eq!(event.thread_state, ThreadState::AwaitingClient);
    assert!(!event.is_blocked());
}

#[test]
fn test_date_change_detours_and_returns_to_caller() {
    let temp = TempDir::new().unwrap();
    let engine = engine(&temp);
    let event_id = offer_sent(&engine);

    let message = InboundMessage::new("Actually, can we move it to March 21?")
        .for_event(&event_id)
        .with_extracted(ExtractedFields {
            date: Some(date(21)),
            ..Default::default()
        });
    let outcome = engine.process(message).unwrap();

    let change = outcome.change.as_ref().unwrap();
    assert_eq!(change.kind, ChangeKind::Date);
    assert!(change.revision);
    let decision = outcome.decision.as_ref().unwrap();
    assert!(decision.detoured);
    assert_eq!(decision.next_stage, Stage::DateNegotiation);
    assert_eq!(decision.updated_caller_stage, Some(Stage::Negotiation));

    assert_eq!(outcome.action, "offer_sent");
    assert_eq!(
        outcome.visited,
        vec![Stage::DateNegotiation, Stage::RoomNegotiation, Stage::Offer]
    );
    assert_eq!(outcome.stage, Some(Stage::Negotiation));
    assert_eq!(outcome.caller_stage, None);

    let doc = engine.store().load().unwrap();
    let event = doc.event(&event_id).unwrap();
    assert_eq!(event.chosen_date, Some(date(21)));
    assert_eq!(event.locked_room_id.as_deref(), Some("room-a"));
    assert_eq!(event.offers.len(), 2);
    assert_eq!(event.detour_count, 1);
    assert!(event
        .audit
        .iter()
        .any(|a| a.reason == "returned to caller after detour"));
}

#[test]
fn test_date_change_that_loses_the_room_asks_for_a_new_one() {
    let temp = TempDir::new().unwrap();
    let engine = engine(&temp);
    let event_id = offer_sent(&engine);

    let message = InboundMessage::new("Instead, could we do March 28?")
        .for_event(&event_id)
        .with_extracted(ExtractedFields {
            date: Some(date(28)),
            ..Default::default()
        });
    let outcome = engine.process(message).unwrap();

    assert_eq!(outcome.action, "room_options_presented");
    assert_eq!(outcome.stage, Some(Stage::RoomNegotiation));
    assert_eq!(outcome.caller_stage, Some(Stage::Negotiation));
    assert!(!outcome.drafts[0].body.contains("room-a"));

    let picked = engine.process(pick_room(&event_id, "room-b")).unwrap();
    assert_eq!(picked.action, "offer_sent");
    assert_eq!(picked.stage, Some(Stage::Negotiation));
    assert_eq!(picked.caller_stage, None);

    let doc = engine.store().load().unwrap();
    let event = doc.event(&event_id).unwrap();
    assert_eq!(event.locked_room_id.as_deref(), Some("room-b"));
    assert_eq!(event.latest_offer().unwrap().room_id, "room-b");
}

#[test]
fn test_requirements_change_within_room_capacity_skips_room_search() {
    let temp = TempDir::new().unwrap();
    let (engine, evaluations) = counting_engine(&temp);
    let event_id = offer_sent(&engine);
    let before = evaluations.load(Ordering::SeqCst);

    let message = InboundMessage::new("Actually we will be 35 people.")
        .for_event(&event_id)
        .with_extracted(ExtractedFields {
            requirements: Requirements {
                participants: Some(35),
                ..Default::default()
            },
            ..Default::default()
        });
    let outcome = engine.process(message).unwrap();

    let decision = outcome.decision.as_ref().unwrap();
    assert_eq!(decision.change_kind, ChangeKind::Requirements);
    assert_eq!(decision.skip_reason, Some(SkipReason::LockedRoomStillValid));
    assert_eq!(decision.next_stage, Stage::Offer);
    assert_eq!(outcome.visited, vec![Stage::Offer]);
    assert_eq!(outcome.action, "offer_sent");
    assert_eq!(outcome.stage, Some(Stage::Negotiation));
    assert_eq!(evaluations.load(Ordering::SeqCst), before);
}

#[test]
fn test_requirements_outgrowing_room_release_the_lock() {
    let temp = TempDir::new().unwrap();
    let engine = engine(&temp);
    let event_id = offer_sent(&engine);

    let message = InboundMessage::new("Correction: we are now 60 guests.")
        .for_event(&event_id)
        .with_extracted(ExtractedFields {
            requirements: Requirements {
                participants: Some(60),
                ..Default::default()
            },
            ..Default::default()
        });
    let outcome = engine.process(message).unwrap();

    assert_eq!(outcome.decision.as_ref().unwrap().next_stage, Stage::RoomNegotiation);
    assert_eq!(outcome.action, "room_options_presented");
    assert_eq!(outcome.payload["candidates"], serde_json::json!(["room-b"]));

    let doc = engine.store().load().unwrap();
    let event = doc.event(&event_id).unwrap();
    assert!(event.locked_room_id.is_none());
    assert!(event.offer_hash.is_none());
}

#[test]
fn test_line_items_join_the_offer() {
    let temp = TempDir::new().unwrap();
    let engine = engine(&temp);
    let event_id = offer_sent(&engine);

    let message = InboundMessage::new("Please add coffee for everyone.")
        .for_event(&event_id)
        .with_extracted(ExtractedFields {
            line_items: vec![LineItem {
                name: "Coffee break".to_string(),
                quantity: 30,
            }],
            ..Default::default()
        });
    let outcome = engine.process(message).unwrap();

    assert_eq!(outcome.change.as_ref().unwrap().kind, ChangeKind::LineItems);
    assert_eq!(outcome.action, "offer_sent");
    assert_eq!(outcome.payload["total_cents"], serde_json::json!(120_000 + 30 * 650));
}

#[test]
fn test_change_after_confirmation_reopens_booking() {
    let temp = TempDir::new().unwrap();
    let engine = engine(&temp);
    let event_id = offer_sent(&engine);
    let accepted = engine.process(reply(&event_id, ClientReply::Accept)).unwrap();
    let task_id = accepted.payload["task_id"].as_str().unwrap().to_string();
    engine.approve(&task_id, None).unwrap();

    let message = InboundMessage::new("Actually, let's move it to March 16.")
        .for_event(&event_id)
        .with_extracted(ExtractedFields {
            date: Some(date(16)),
            ..Default::default()
        });
    let outcome = engine.process(message).unwrap();

    assert_eq!(outcome.action, "offer_sent");
    assert_eq!(outcome.stage, Some(Stage::Negotiation));
    assert_eq!(outcome.caller_stage, Some(Stage::Confirmation));

    let doc = engine.store().load().unwrap();
    let event = doc.event(&event_id).unwrap();
    assert_eq!(event.status, EventStatus::Option);
    assert!(!event.offer_accepted);
}

#[test]
fn test_declined_offer_closes_transaction() {
    let temp = TempDir::new().unwrap();
    let engine = engine(&temp);
    let event_id = offer_sent(&engine);

    let declined = engine.process(reply(&event_id, ClientReply::Decline)).unwrap();
    assert_eq!(declined.action, "offer_declined");

    let after = engine
        .process(InboundMessage::new("Hello again").for_event(&event_id))
        .unwrap();
    assert_eq!(after.action, "transaction_closed");
}

#[test]
fn test_detour_ceiling_escalates_to_manager() {
    let temp = TempDir::new().unwrap();
    let mut config = config();
    config.routing.max_detours_per_request = 0;
    let engine = Engine::new(app_in(&temp, config)).unwrap();
    let event_id = offer_sent(&engine);

    let message = InboundMessage::new("Actually, make it March 21.")
        .for_event(&event_id)
        .with_extracted(ExtractedFields {
            date: Some(date(21)),
            ..Default::default()
        });
    let outcome = engine.process(message).unwrap();

    assert_eq!(outcome.action, "detour_escalated");
    let task_id = outcome.payload["task_id"].as_str().unwrap().to_string();
    let doc = engine.store().load().unwrap();
    let event = doc.event(&event_id).unwrap();
    assert!(event.is_blocked());
    assert_eq!(doc.pending_tasks().count(), 1);
    assert_eq!(event.chosen_date, Some(date(14)));
    assert!(event.pending_approvals[0].held_message.is_some());

    let approval = engine.approve(&task_id, None).unwrap();

    assert!(approval.released_draft.is_none());
    let continuation = approval.continuation.unwrap();
    assert_eq!(continuation.action, "offer_sent");
    assert_eq!(continuation.stage, Some(Stage::Negotiation));
    let doc = engine.store().load().unwrap();
    let event = doc.event(&event_id).unwrap();
    assert_eq!(event.chosen_date, Some(date(21)));
    assert_eq!(event.locked_room_id.as_deref(), Some("room-a"));
    assert_eq!(event.offers.len(), 2);
}

#[test]
fn test_rejected_escalation_keeps_a_trace_of_the_message() {
    let temp = TempDir::new().unwrap();
    let mut config = config();
    config.routing.max_detours_per_request = 0;
    let engine = Engine::new(app_in(&temp, config)).unwrap();
    let event_id = offer_sent(&engine);

    let message = InboundMessage::new("Actually, make it March 21.")
        .for_event(&event_id)
        .with_extracted(ExtractedFields {
            date: Some(date(21)),
            ..Default::default()
        });
    let outcome = engine.process(message).unwrap();
    let task_id = outcome.payload["task_id"].as_str().unwrap().to_string();

    let rejection = engine.reject(&task_id, None).unwrap();

    assert!(rejection.resolution.held_message.is_none());
    let doc = engine.store().load().unwrap();
    let event = doc.event(&event_id).unwrap();
    assert_eq!(event.chosen_date, Some(date(14)));
    assert!(event
        .visible_activity(false)
        .any(|entry| entry.title == "Held message not applied"
            && entry.detail == "Actually, make it March 21."));
}

#[test]
fn test_message_held_while_blocked_is_applied_after_decision() {
    let temp = TempDir::new().unwrap();
    let engine = engine(&temp);
    let event_id = offer_sent(&engine);

    let accepted = engine.process(reply(&event_id, ClientReply::Accept)).unwrap();
    let task_id = accepted.payload["task_id"].as_str().unwrap().to_string();

    let message = InboundMessage::new("Actually, make it March 21.")
        .for_event(&event_id)
        .with_extracted(ExtractedFields {
            date: Some(date(21)),
            ..Default::default()
        });
    let held = engine.process(message).unwrap();
    assert_eq!(held.action, "awaiting_manager_approval");
    assert_eq!(held.payload["held_messages"], serde_json::json!(1));
    let doc = engine.store().load().unwrap();
    let event = doc.event(&event_id).unwrap();
    assert_eq!(event.held_messages.len(), 1);
    assert_eq!(event.chosen_date, Some(date(14)));

    let rejection = engine.reject(&task_id, None).unwrap();

    assert_eq!(rejection.replayed.len(), 1);
    let replayed = &rejection.replayed[0];
    assert_eq!(replayed.change.as_ref().unwrap().kind, ChangeKind::Date);
    assert_eq!(replayed.action, "offer_sent");
    let doc = engine.store().load().unwrap();
    let event = doc.event(&event_id).unwrap();
    assert_eq!(event.chosen_date, Some(date(21)));
    assert!(event.held_messages.is_empty());
    assert!(!event.is_blocked());
    assert_eq!(event.current_stage, Stage::Negotiation);
}

#[test]
fn test_echoed_requirement_with_new_field_is_committed() {
    let temp = TempDir::new().unwrap();
    let engine = engine(&temp);
    let event_id = offer_sent(&engine);

    let message = InboundMessage::new("30 people, boardroom style please")
        .for_event(&event_id)
        .with_extracted(ExtractedFields {
            requirements: Requirements {
                participants: Some(30),
                seating_layout: Some("boardroom".to_string()),
                ..Default::default()
            },
            ..Default::default()
        });
    let outcome = engine.process(message).unwrap();

    let change = outcome.change.as_ref().unwrap();
    assert_eq!(change.kind, ChangeKind::Requirements);
    assert!(!change.revision);
    assert_eq!(outcome.action, "offer_sent");
    let doc = engine.store().load().unwrap();
    let event = doc.event(&event_id).unwrap();
    assert_eq!(event.requirements.participants, Some(30));
    assert_eq!(event.requirements.seating_layout.as_deref(), Some("boardroom"));
    assert_eq!(event.locked_room_id.as_deref(), Some("room-a"));
}

#[test]
fn test_audit_trail_only_grows() {
    let temp = TempDir::new().unwrap();
    let engine = engine(&temp);
    let event_id = offer_sent(&engine);

    let before = engine.store().load().unwrap().event(&event_id).unwrap().audit.clone();
    assert_eq!(before[0].reason, "transaction opened");

    let message = InboundMessage::new("Actually, can we move it to March 21?")
        .for_event(&event_id)
        .with_extracted(ExtractedFields {
            date: Some(date(21)),
            ..Default::default()
        });
    engine.process(message).unwrap();

    let after = engine.store().load().unwrap().event(&event_id).unwrap().audit.clone();
    assert!(after.len() > before.len());
    assert_eq!(&after[..before.len()], &before[..]);
    assert!(after[before.len()..]
        .iter()
        .any(|a| a.reason.starts_with("detour:")));
}

#[test]
fn test_unknown_transaction_is_reported() {
    let temp = TempDir::new().unwrap();
    let engine = engine(&temp);

    let outcome = engine
        .process(InboundMessage::new("Hi").for_event("missing"))
        .unwrap();

    assert_eq!(outcome.action, "no_such_transaction");
    assert_eq!(outcome.event_id.as_deref(), Some("missing"));
    assert!(engine.store().load().unwrap().events.is_empty());
}

#[test]
fn test_cleanup_drops_tasks_of_removed_events() {
    let temp = TempDir::new().unwrap();
    let engine = engine(&temp);
    let event_id = offer_sent(&engine);
    let accepted = engine.process(reply(&event_id, ClientReply::Accept)).unwrap();
    let task_id = accepted.payload["task_id"].as_str().unwrap().to_string();

    engine
        .store()
        .transact(|doc| -> Result<()> {
            doc.events.retain(|e| e.event_id != event_id);
            Ok(())
        })
        .unwrap();

    let report = engine.cleanup().unwrap();
    assert_eq!(report.removed_tasks, vec![task_id]);
    assert!(engine.store().load().unwrap().tasks.is_empty());
}
