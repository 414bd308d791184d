use crate::cli::{print_json, stage_label, status_label, thread_label};
use crate::config::AppContext;
use crate::models::EventRecord;
use crate::services::format_cents;
use crate::Result;
use colored::Colorize;
use serde_json::json;

pub fn run(app: &AppContext, event_id: Option<&str>, json: bool) -> Result<()> {
    let doc = app.store().load()?;

    let Some(event_id) = event_id else {
        if json {
            let rows: Vec<_> = doc
                .events
                .iter()
                .map(|e| {
                    json!({
                        "event_id": e.event_id,
                        "client_id": e.client_id,
                        "stage": e.current_stage,
                        "status": e.status,
                        "thread_state": e.thread_state,
                        "pending_approvals": e.pending_approvals.len(),
                    })
                })
                .collect();
            return print_json(&rows);
        }

        if doc.events.is_empty() {
            println!("{}", "No events yet.".yellow());
            return Ok(());
        }
        println!("{}", "Events:".green().bold());
        for event in &doc.events {
            let pending = if event.pending_approvals.is_empty() {
                String::new()
            } else {
                format!(" ⏸ {}", event.pending_approvals.len()).red().to_string()
            };
            println!(
                "   • {}  {}  {}{}",
                event.event_id,
                stage_label(event.current_stage),
                status_label(event.status),
                pending
            );
        }
        return Ok(());
    };

    let Some(event) = doc.event(event_id) else {
        if json {
            return print_json(&json!({"error": "event_not_found", "event_id": event_id}));
        }
        println!("{}", format!("Event '{}' not found", event_id).red());
        return Ok(());
    };

    if json {
        return print_json(event);
    }
    print_event(event);
    Ok(())
}

fn print_event(event: &EventRecord) {
    println!("{}", format!("Status for: {}", event.event_id).cyan().bold());
    println!();
    println!("   Stage:     {}", stage_label(event.current_stage));
    if let Some(caller) = event.caller_stage {
        println!("   Caller:    {}", stage_label(caller).yellow());
    }
    println!("   Status:    {}", status_label(event.status));
    println!("   Thread:    {}", thread_label(event.thread_state));
    if let Some(client) = &event.client_id {
        println!("   Client:    {}", client);
    }
    if let Some(date) = event.chosen_date {
        let mark = if event.date_confirmed { "" } else { " (unconfirmed)" };
        println!("   Date:      {}{}", date, mark);
    }
    if let Some(room) = &event.locked_room_id {
        println!("   Room:      {} 🔒", room);
    }
    if let Some(n) = event.requirements.participants {
        println!("   Guests:    {}", n);
    }
    if let Some(offer) = event.latest_offer() {
        let accepted = if event.offer_accepted { " ✓" } else { "" };
        println!("   Offer:     {}{}", format_cents(offer.total_cents), accepted);
    }
    println!("   Detours:   {}", event.detour_count);
    if !event.held_messages.is_empty() {
        println!(
            "   Held:      {} message(s) until the manager decides",
            event.held_messages.len()
        );
    }
    println!("   Created:   {}", event.created_at.format("%Y-%m-%d %H:%M:%S"));

    if !event.pending_approvals.is_empty() {
        println!();
        println!("{}", "Pending approvals:".red().bold());
        for pending in &event.pending_approvals {
            println!(
                "   • {} {} ({})",
                pending.task_id,
                pending.kind.key(),
                pending.stage
            );
        }
    }
}
