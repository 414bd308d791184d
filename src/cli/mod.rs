//! `bookflow` command implementations

pub mod activity;
pub mod process;
pub mod status;
pub mod tasks;

use crate::config::AppContext;
use crate::models::{EventStatus, Stage, ThreadState};
use crate::Result;
use anyhow::Context;
use colored::{ColoredString, Colorize};
use std::path::Path;

/// Build the application context from the global flags
pub fn load_context(config: &Path, store: Option<&Path>) -> Result<AppContext> {
    let app = AppContext::from_file(config)
        .with_context(|| format!("Failed to load {}", config.display()))?;
    Ok(match store {
        Some(path) => app.with_store_path(path),
        None => app,
    })
}

pub(crate) fn stage_label(stage: Stage) -> String {
    format!("{} {}", stage.emoji(), stage.name())
}

pub(crate) fn status_label(status: EventStatus) -> ColoredString {
    match status {
        EventStatus::Lead => "lead".yellow(),
        EventStatus::Option => "option".cyan(),
        EventStatus::Confirmed => "confirmed".green(),
        EventStatus::Cancelled => "cancelled".bright_black(),
    }
}

pub(crate) fn thread_label(state: ThreadState) -> ColoredString {
    match state {
        ThreadState::Open => "open".normal(),
        ThreadState::AwaitingClient => "awaiting client".blue(),
        ThreadState::WaitingOnHil => "waiting on manager".red(),
        ThreadState::Closed => "closed".bright_black(),
    }
}

pub(crate) fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
