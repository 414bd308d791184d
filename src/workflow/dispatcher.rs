//! Step dispatcher
//!
//! Runs stage handlers in a loop: after each handler the event's current
//! stage is re-read and its handler invoked, until a handler halts, a manager
//! decision blocks the event, or a limit is reached.

use crate::models::{ApprovalKind, Granularity, Stage};
use crate::workflow::context::RequestContext;
use crate::workflow::handlers;
use crate::Result;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// What a handler did and whether the dispatcher should stop
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StageResult {
    pub action: String,
    pub payload: Map<String, Value>,
    pub halt: bool,
}

impl StageResult {
    /// Stop after this handler
    pub fn halt(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            payload: Map::new(),
            halt: true,
        }
    }

    /// Continue with the handler of the (new) current stage
    pub fn proceed(action: impl Into<String>) -> Self {
        Self {
            halt: false,
            ..Self::halt(action)
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.payload.insert(key.to_string(), value.into());
        self
    }
}

pub trait StageHandler: Send + Sync {
    fn handle(&self, ctx: &mut RequestContext<'_>) -> Result<StageResult>;
}

struct FnHandler<F>(F);

impl<F> StageHandler for FnHandler<F>
where
    F: Fn(&mut RequestContext<'_>) -> Result<StageResult> + Send + Sync,
{
    fn handle(&self, ctx: &mut RequestContext<'_>) -> Result<StageResult> {
        (self.0)(ctx)
    }
}

/// Stage to handler table
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<Stage, Arc<dyn StageHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in handler for every stage
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        handlers::register_defaults(&mut registry);
        registry
    }

    /// Register `handler` for `stage`, replacing any existing one
    pub fn register(&mut self, stage: Stage, handler: impl StageHandler + 'static) -> &mut Self {
        self.handlers.insert(stage, Arc::new(handler));
        self
    }

    pub fn register_fn<F>(&mut self, stage: Stage, f: F) -> &mut Self
    where
        F: Fn(&mut RequestContext<'_>) -> Result<StageResult> + Send + Sync + 'static,
    {
        self.register(stage, FnHandler(f))
    }

    pub fn get(&self, stage: Stage) -> Option<Arc<dyn StageHandler>> {
        self.handlers.get(&stage).cloned()
    }
}

/// Outcome of one dispatcher run
#[derive(Debug, Clone, Serialize)]
pub struct DispatchOutcome {
    pub result: StageResult,
    pub steps: u32,
    pub visited: Vec<Stage>,
}

pub struct Dispatcher {
    registry: HandlerRegistry,
    max_steps: u32,
    max_detours: u32,
}

impl Dispatcher {
    pub fn new(registry: HandlerRegistry, max_steps: u32, max_detours: u32) -> Self {
        Self {
            registry,
            max_steps,
            max_detours,
        }
    }

    pub fn registry_mut(&mut self) -> &mut HandlerRegistry {
        &mut self.registry
    }

    pub fn set_limits(&mut self, max_steps: u32, max_detours: u32) {
        self.max_steps = max_steps;
        self.max_detours = max_detours;
    }

    pub fn run(&self, ctx: &mut RequestContext<'_>) -> Result<DispatchOutcome> {
        let mut steps = 0;
        let mut visited = Vec::new();

        loop {
            if ctx.event().is_blocked() {
                return Ok(finish(
                    StageResult::halt("awaiting_manager_approval"),
                    steps,
                    visited,
                ));
            }

            if ctx.detours > self.max_detours {
                let result = self.escalate(ctx)?;
                return Ok(finish(result, steps, visited));
            }

            if steps >= self.max_steps {
                tracing::warn!(
                    event_id = %ctx.event().event_id,
                    steps,
                    "step limit reached, stopping dispatch"
                );
                return Ok(finish(
                    StageResult::halt("step_limit_reached"),
                    steps,
                    visited,
                ));
            }

            let stage = ctx.event().current_stage;
            let Some(handler) = self.registry.get(stage) else {
                tracing::warn!(stage = %stage, "no handler registered");
                return Ok(finish(
                    StageResult::halt("no_handler").with("stage", stage.key()),
                    steps,
                    visited,
                ));
            };

            let mut result = handler.handle(ctx)?;
            steps += 1;
            visited.push(stage);

            let now = ctx.event().current_stage;
            tracing::debug!(
                event_id = %ctx.event().event_id,
                stage = %stage,
                next = %now,
                action = %result.action,
                halt = result.halt,
                "stage handled"
            );

            if result.halt {
                return Ok(finish(result, steps, visited));
            }
            if now == stage {
                // Neither halted nor moved; treat as a halt.
                tracing::warn!(stage = %stage, action = %result.action, "handler made no progress");
                result.halt = true;
                return Ok(finish(result, steps, visited));
            }
        }
    }

    fn escalate(&self, ctx: &mut RequestContext<'_>) -> Result<StageResult> {
        let detours = ctx.detours;
        let body = format!(
            "Conversation detoured {} times while handling one message; please review the thread.",
            detours
        );
        let task_id = ctx.enqueue_approval(ApprovalKind::DetourEscalation, body)?;
        let message = ctx.message.clone();
        if let Some(pending) = ctx.event_mut().pending_approval_mut(&task_id) {
            pending.held_message = Some(message);
        }
        ctx.event_mut().log_activity(
            "🚩",
            "Escalated to manager",
            format!("{} detours in one message", detours),
            Granularity::Coarse,
        );
        tracing::warn!(
            event_id = %ctx.event().event_id,
            detours,
            task_id = %task_id,
            "detour ceiling exceeded, escalating"
        );
        Ok(StageResult::halt("detour_escalated").with("task_id", task_id))
    }
}

fn finish(result: StageResult, steps: u32, visited: Vec<Stage>) -> DispatchOutcome {
    DispatchOutcome {
        result,
        steps,
        visited,
    }
}
