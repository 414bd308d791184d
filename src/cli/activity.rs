//! Activity and audit views

use crate::cli::print_json;
use crate::config::AppContext;
use crate::Result;
use colored::Colorize;

pub fn activity(app: &AppContext, event_id: &str, detailed: bool, json: bool) -> Result<()> {
    let doc = app.store().load()?;
    let event = doc
        .event(event_id)
        .ok_or_else(|| anyhow::anyhow!("Event '{}' not found", event_id))?;
    let entries: Vec<_> = event.visible_activity(detailed).collect();

    if json {
        return print_json(&entries);
    }
    if entries.is_empty() {
        println!("{}", "No activity recorded.".yellow());
        return Ok(());
    }

    println!("{}", format!("Activity for: {}", event_id).cyan().bold());
    for entry in entries {
        let detail = if entry.detail.is_empty() {
            String::new()
        } else {
            format!(" ({})", entry.detail)
        };
        println!(
            "   {} {} {}{}",
            entry.timestamp.format("%Y-%m-%d %H:%M").to_string().bright_black(),
            entry.icon,
            entry.title,
            detail
        );
    }
    Ok(())
}

pub fn audit(app: &AppContext, event_id: &str, json: bool) -> Result<()> {
    let doc = app.store().load()?;
    let event = doc
        .event(event_id)
        .ok_or_else(|| anyhow::anyhow!("Event '{}' not found", event_id))?;

    if json {
        return print_json(&event.audit);
    }

    println!("{}", format!("Audit trail for: {}", event_id).cyan().bold());
    for entry in &event.audit {
        let from = entry.from_stage.map(|s| s.key()).unwrap_or("-");
        println!(
            "   {} {} → {}  [{}] {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S").to_string().bright_black(),
            from,
            entry.to_stage.key().bold(),
            entry.actor,
            entry.reason
        );
    }
    Ok(())
}
