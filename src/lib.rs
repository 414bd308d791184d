// Bookflow - Venue booking workflow engine
// A Rust-powered router for multi-stage booking negotiations with detours and manager approvals

pub mod cli;
pub mod config;
pub mod models;
pub mod services;
pub mod state;
pub mod store;
pub mod workflow;

pub use anyhow::{Context, Result};
pub use colored::Colorize;

// Re-export commonly used types
pub use config::{AppContext, EngineConfig};
pub use models::{Document, EventRecord, InboundMessage, Stage};
pub use store::{DocumentStore, StoreError};
pub use workflow::{DecisionOutcome, Engine, ProcessOutcome};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the stderr tracing subscriber
///
/// `BOOKFLOW_LOG` takes precedence over `default_filter`.
pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_env("BOOKFLOW_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
