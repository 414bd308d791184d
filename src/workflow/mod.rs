//! Booking workflow engine
//!
//! Handles one inbound message at a time:
//! - Load the document under the store lock
//! - Detect what the message changes and route detours
//! - Run stage handlers until one halts
//! - Persist the document atomically
//!
//! Messages for a blocked event are held on the event. Manager decisions go
//! through the same store transaction; once the event is unblocked, dispatch
//! resumes and the held messages are handled in arrival order.

pub mod context;
pub mod detector;
pub mod dispatcher;
pub mod handlers;
pub mod hil;
pub mod router;

pub use context::{Draft, RequestContext};
pub use detector::{ChangeDetector, ChangeKind, DetectedChange};
pub use dispatcher::{DispatchOutcome, Dispatcher, HandlerRegistry, StageHandler, StageResult};
pub use hil::{CleanupReport, HilError, Resolution};
pub use router::{ChangeDecision, SkipReason};

use crate::config::AppContext;
use crate::models::{ApprovalKind, Document, EventRecord, Granularity, InboundMessage, Stage};
use crate::services::Services;
use crate::store::DocumentStore;
use crate::Result;
use serde::Serialize;
use serde_json::{Map, Value};

/// What handling one message produced
#[derive(Debug, Clone, Serialize)]
pub struct ProcessOutcome {
    pub event_id: Option<String>,
    pub action: String,
    pub payload: Map<String, Value>,
    pub stage: Option<Stage>,
    pub caller_stage: Option<Stage>,
    pub change: Option<DetectedChange>,
    pub decision: Option<ChangeDecision>,
    pub drafts: Vec<Draft>,
    pub visited: Vec<Stage>,
}

impl ProcessOutcome {
    fn short_circuit(event: Option<&EventRecord>, event_id: Option<String>, action: &str) -> Self {
        Self {
            event_id,
            action: action.to_string(),
            payload: Map::new(),
            stage: event.map(|e| e.current_stage),
            caller_stage: event.and_then(|e| e.caller_stage),
            change: None,
            decision: None,
            drafts: Vec::new(),
            visited: Vec::new(),
        }
    }

    fn from_dispatch(
        ctx: &mut RequestContext<'_>,
        dispatch: DispatchOutcome,
        change: Option<DetectedChange>,
        decision: Option<ChangeDecision>,
    ) -> Self {
        Self {
            event_id: Some(ctx.event().event_id.clone()),
            action: dispatch.result.action,
            payload: dispatch.result.payload,
            stage: Some(ctx.event().current_stage),
            caller_stage: ctx.event().caller_stage,
            change,
            decision,
            drafts: std::mem::take(&mut ctx.drafts),
            visited: dispatch.visited,
        }
    }
}

/// Result of a manager approval or rejection
#[derive(Debug, Clone, Serialize)]
pub struct DecisionOutcome {
    pub resolution: Resolution,
    /// The held-back client draft, now cleared for sending
    pub released_draft: Option<String>,
    /// Dispatch resumed after the event was unblocked
    pub continuation: Option<ProcessOutcome>,
    /// Messages held while blocked, handled after the decision
    pub replayed: Vec<ProcessOutcome>,
}

pub struct Engine {
    app: AppContext,
    services: Services,
    detector: ChangeDetector,
    dispatcher: Dispatcher,
    catalog_services: bool,
}

impl Engine {
    /// Engine with catalog-backed services and the built-in handlers
    pub fn new(app: AppContext) -> Result<Self> {
        let services = Services::from_context(&app);
        let mut engine = Self::with_services(app, services)?;
        engine.catalog_services = true;
        Ok(engine)
    }

    pub fn with_services(app: AppContext, services: Services) -> Result<Self> {
        let detector = ChangeDetector::new(&app.config().routing.revision_signals)?;
        let routing = &app.config().routing;
        let dispatcher = Dispatcher::new(
            HandlerRegistry::with_defaults(),
            routing.max_steps_per_request,
            routing.max_detours_per_request,
        );
        Ok(Self {
            app,
            services,
            detector,
            dispatcher,
            catalog_services: false,
        })
    }

    /// Replace the handler for `stage`
    pub fn register_handler(&mut self, stage: Stage, handler: impl StageHandler + 'static) {
        self.dispatcher.registry_mut().register(stage, handler);
    }

    pub fn app(&self) -> &AppContext {
        &self.app
    }

    pub fn store(&self) -> DocumentStore {
        self.app.store()
    }

    /// Pick up config file changes; returns whether anything was reloaded
    pub fn refresh_config(&mut self) -> Result<bool> {
        if !self.app.refresh()? {
            return Ok(false);
        }
        let routing = &self.app.config().routing;
        self.detector = ChangeDetector::new(&routing.revision_signals)?;
        self.dispatcher.set_limits(
            routing.max_steps_per_request,
            routing.max_detours_per_request,
        );
        if self.catalog_services {
            self.services = Services::from_context(&self.app);
        }
        Ok(true)
    }

    /// Handle one message inside a store transaction
    pub fn process(&self, message: InboundMessage) -> Result<ProcessOutcome> {
        self.store().transact(|doc| self.process_in(doc, message))
    }

    /// Handle one message against an already loaded document
    pub fn process_in(
        &self,
        doc: &mut Document,
        message: InboundMessage,
    ) -> Result<ProcessOutcome> {
        let index = match message.event_id.as_deref() {
            Some(event_id) => match doc.event_index(event_id) {
                Some(index) => index,
                None => {
                    tracing::warn!(event_id, "message for unknown transaction");
                    return Ok(ProcessOutcome::short_circuit(
                        None,
                        Some(event_id.to_string()),
                        "no_such_transaction",
                    ));
                }
            },
            None => open_event(doc, &message),
        };
        self.handle(doc, index, message)
    }

    fn handle(
        &self,
        doc: &mut Document,
        index: usize,
        message: InboundMessage,
    ) -> Result<ProcessOutcome> {
        let event = &mut doc.events[index];
        let event_id = event.event_id.clone();

        if !event.is_active() {
            return Ok(ProcessOutcome::short_circuit(
                Some(&*event),
                Some(event_id),
                "transaction_closed",
            ));
        }
        if event.is_blocked() {
            event.log_activity(
                "⏸",
                "Message held",
                "handled once the manager decides",
                Granularity::Coarse,
            );
            event.held_messages.push(message);
            let held = event.held_messages.len();
            tracing::info!(event_id = %event_id, held, "event blocked on approval, message held");
            let mut outcome = ProcessOutcome::short_circuit(
                Some(&*event),
                Some(event_id),
                "awaiting_manager_approval",
            );
            outcome.payload.insert("held_messages".to_string(), held.into());
            return Ok(outcome);
        }

        let mut ctx = RequestContext::new(message, doc, index, &self.app, &self.services);
        let extracted = ctx.message.extracted.clone();
        let change = self.detector.detect(ctx.event(), &extracted, &ctx.message.body);
        let rooms = self.services.rooms.clone();
        let decision = router::route(ctx.event_mut(), &change, &extracted, rooms.as_ref())?;
        if decision.detoured {
            ctx.detours += 1;
        }
        tracing::info!(
            event_id = %event_id,
            change = change.kind.key(),
            revision = change.revision,
            next = %decision.next_stage,
            detoured = decision.detoured,
            "routed message"
        );

        let dispatch = self.dispatcher.run(&mut ctx)?;
        Ok(ProcessOutcome::from_dispatch(
            &mut ctx,
            dispatch,
            Some(change),
            Some(decision),
        ))
    }

    pub fn approve(&self, task_id: &str, note: Option<String>) -> Result<DecisionOutcome> {
        self.store().transact(|doc| self.approve_in(doc, task_id, note))
    }

    /// Approve `task_id` and resume the event if it is now unblocked
    ///
    /// Dispatch continues with the message whose handling stopped for the
    /// approval, if any; held messages follow.
    pub fn approve_in(
        &self,
        doc: &mut Document,
        task_id: &str,
        note: Option<String>,
    ) -> Result<DecisionOutcome> {
        let mut resolution = hil::approve(doc, task_id, note)?;
        let released_draft = match resolution.kind {
            ApprovalKind::OfferAcceptance => doc.task(task_id).map(|t| t.payload.draft.clone()),
            ApprovalKind::DetourEscalation => None,
        };
        let resumed = resolution.held_message.take();

        let mut outcome = DecisionOutcome {
            resolution,
            released_draft,
            continuation: None,
            replayed: Vec::new(),
        };
        let Some(index) = unblocked_index(doc, &outcome.resolution) else {
            return Ok(outcome);
        };

        let event_id = outcome.resolution.event_id.clone();
        let message = resumed.unwrap_or_else(|| InboundMessage::new("").for_event(event_id));
        let mut ctx = RequestContext::new(message, doc, index, &self.app, &self.services);
        let dispatch = self.dispatcher.run(&mut ctx)?;
        outcome.continuation = Some(ProcessOutcome::from_dispatch(&mut ctx, dispatch, None, None));
        outcome.replayed = self.replay_held(doc, index)?;
        Ok(outcome)
    }

    pub fn reject(&self, task_id: &str, note: Option<String>) -> Result<DecisionOutcome> {
        self.store().transact(|doc| self.reject_in(doc, task_id, note))
    }

    /// Reject `task_id`; held messages are handled once the event is unblocked
    pub fn reject_in(
        &self,
        doc: &mut Document,
        task_id: &str,
        note: Option<String>,
    ) -> Result<DecisionOutcome> {
        let resolution = hil::reject(doc, task_id, note)?;
        let replayed = match unblocked_index(doc, &resolution) {
            Some(index) => self.replay_held(doc, index)?,
            None => Vec::new(),
        };
        Ok(DecisionOutcome {
            resolution,
            released_draft: None,
            continuation: None,
            replayed,
        })
    }

    pub fn complete(&self, task_id: &str) -> Result<()> {
        self.store().transact(|doc| Ok(hil::complete(doc, task_id)?))
    }

    pub fn cleanup(&self) -> Result<CleanupReport> {
        self.store().transact(|doc| Ok(hil::cleanup(doc)))
    }

    /// Handle held messages in arrival order until the event blocks again
    fn replay_held(&self, doc: &mut Document, index: usize) -> Result<Vec<ProcessOutcome>> {
        let mut outcomes = Vec::new();
        while !doc.events[index].is_blocked() && !doc.events[index].held_messages.is_empty() {
            let message = doc.events[index].held_messages.remove(0);
            tracing::debug!(event_id = %doc.events[index].event_id, "replaying held message");
            outcomes.push(self.handle(doc, index, message)?);
        }
        Ok(outcomes)
    }
}

fn unblocked_index(doc: &Document, resolution: &Resolution) -> Option<usize> {
    doc.event_index(&resolution.event_id)
        .filter(|_| resolution.unblocked)
}

fn open_event(doc: &mut Document, message: &InboundMessage) -> usize {
    let mut event = EventRecord::new();
    event.client_id = message.sender.clone();
    event.thread_id = message.thread_id.clone();
    event.append_audit(None, Stage::Intake, "transaction opened", "system");
    event.log_activity(
        "📥",
        "New inquiry",
        message.sender.clone().unwrap_or_default(),
        Granularity::Coarse,
    );
    tracing::info!(event_id = %event.event_id, "opened transaction");
    doc.insert_event(event)
}
