//! `bookflow process`: feed one inbound message through the engine

use crate::cli::{print_json, stage_label};
use crate::config::AppContext;
use crate::models::{ClientReply, ExtractedFields, InboundMessage, LineItem, Requirements};
use crate::workflow::{Engine, ProcessOutcome};
use crate::Result;
use anyhow::Context;
use chrono::NaiveDate;
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;

#[derive(Args, Debug, Default)]
pub struct ProcessArgs {
    /// Read the whole message (including extracted fields) from a JSON file
    #[arg(long, conflicts_with = "body")]
    pub message_file: Option<PathBuf>,

    /// Message text
    #[arg(long)]
    pub body: Option<String>,

    /// Existing transaction; omit to open a new one
    #[arg(short, long)]
    pub event: Option<String>,

    /// Sender address
    #[arg(long)]
    pub sender: Option<String>,

    #[arg(long)]
    pub thread: Option<String>,

    /// Event date (YYYY-MM-DD)
    #[arg(long)]
    pub date: Option<NaiveDate>,

    /// Room id the client picked
    #[arg(long)]
    pub room: Option<String>,

    #[arg(long)]
    pub participants: Option<u32>,

    #[arg(long)]
    pub layout: Option<String>,

    /// Special requirement (repeatable)
    #[arg(long = "special")]
    pub special: Vec<String>,

    /// Line item as NAME=QUANTITY (repeatable)
    #[arg(long = "item")]
    pub items: Vec<String>,

    /// Client accepts the offer
    #[arg(long, conflicts_with = "decline")]
    pub accept: bool,

    /// Client declines the offer
    #[arg(long)]
    pub decline: bool,

    /// Output in JSON format
    #[arg(short, long)]
    pub json: bool,
}

impl ProcessArgs {
    pub fn to_message(&self) -> Result<InboundMessage> {
        if let Some(path) = &self.message_file {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let message: InboundMessage = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?;
            return Ok(message);
        }

        let items = self
            .items
            .iter()
            .map(|raw| parse_item(raw))
            .collect::<Result<Vec<_>>>()?;
        let reply = if self.accept {
            Some(ClientReply::Accept)
        } else if self.decline {
            Some(ClientReply::Decline)
        } else {
            None
        };

        Ok(InboundMessage {
            event_id: self.event.clone(),
            thread_id: self.thread.clone(),
            sender: self.sender.clone(),
            body: self.body.clone().unwrap_or_default(),
            extracted: ExtractedFields {
                date: self.date,
                room_id: self.room.clone(),
                requirements: Requirements {
                    participants: self.participants,
                    seating_layout: self.layout.clone(),
                    special_requirements: self.special.clone(),
                    ..Default::default()
                },
                line_items: items,
                reply,
            },
        })
    }
}

fn parse_item(raw: &str) -> Result<LineItem> {
    let (name, quantity) = raw
        .rsplit_once('=')
        .ok_or_else(|| anyhow::anyhow!("Invalid item '{}', expected NAME=QUANTITY", raw))?;
    let quantity = quantity
        .trim()
        .parse()
        .with_context(|| format!("Invalid quantity in item '{}'", raw))?;
    Ok(LineItem {
        name: name.trim().to_string(),
        quantity,
    })
}

pub fn run(app: AppContext, args: &ProcessArgs) -> Result<()> {
    let message = args.to_message()?;
    let engine = Engine::new(app)?;
    let outcome = engine.process(message)?;

    if args.json {
        return print_json(&outcome);
    }
    print_outcome(&outcome);
    Ok(())
}

pub(crate) fn print_outcome(outcome: &ProcessOutcome) {
    let event_id = outcome.event_id.as_deref().unwrap_or("-");
    println!("{}", format!("Event {}", event_id).cyan().bold());
    println!("   Action: {}", outcome.action.bold());
    if let Some(stage) = outcome.stage {
        println!("   Stage:  {}", stage_label(stage));
    }
    if let Some(caller) = outcome.caller_stage {
        println!("   Caller: {}", stage_label(caller).yellow());
    }
    if let Some(decision) = &outcome.decision {
        let mut line = format!("   Change: {}", decision.change_kind.key());
        if decision.detoured {
            line.push_str(&format!(" (detour to {})", decision.next_stage));
        }
        println!("{}", line);
    }
    if !outcome.visited.is_empty() {
        let path: Vec<&str> = outcome.visited.iter().map(|s| s.key()).collect();
        println!("   Steps:  {}", path.join(" → ").bright_black());
    }

    for draft in &outcome.drafts {
        println!();
        if draft.requires_approval {
            println!("{}", "✉ Draft (held for manager approval)".yellow());
        } else {
            println!("{}", "✉ Draft".green());
        }
        for line in draft.body.lines() {
            println!("   {}", line);
        }
    }
}
