//! Manager task commands

use crate::cli::process::print_outcome;
use crate::cli::{print_json, stage_label};
use crate::config::AppContext;
use crate::models::TaskStatus;
use crate::workflow::{DecisionOutcome, Engine};
use crate::Result;
use clap::Subcommand;
use colored::Colorize;

#[derive(Subcommand, Debug)]
pub enum TasksCommands {
    /// List manager tasks
    List {
        /// Include resolved tasks
        #[arg(short, long)]
        all: bool,

        #[arg(short, long)]
        json: bool,
    },

    /// Approve a pending task and resume the booking
    Approve {
        task_id: String,

        /// Note stored on the task
        #[arg(short, long)]
        note: Option<String>,

        #[arg(short, long)]
        json: bool,
    },

    /// Reject a pending task; the event goes back to the client
    Reject {
        task_id: String,

        #[arg(short, long)]
        note: Option<String>,

        #[arg(short, long)]
        json: bool,
    },

    /// Mark a resolved task as done
    Complete { task_id: String },

    /// Drop tasks and approval entries whose counterpart is gone
    Cleanup {
        #[arg(short, long)]
        json: bool,
    },
}

pub fn run(app: AppContext, cmd: TasksCommands) -> Result<()> {
    match cmd {
        TasksCommands::List { all, json } => list(&app, all, json),
        TasksCommands::Approve { task_id, note, json } => approve(app, &task_id, note, json),
        TasksCommands::Reject { task_id, note, json } => reject(app, &task_id, note, json),
        TasksCommands::Complete { task_id } => complete(app, &task_id),
        TasksCommands::Cleanup { json } => cleanup(app, json),
    }
}

pub fn list(app: &AppContext, all: bool, json: bool) -> Result<()> {
    let doc = app.store().load()?;
    let tasks: Vec<_> = doc
        .tasks
        .iter()
        .filter(|t| all || t.status == TaskStatus::Pending)
        .collect();

    if json {
        return print_json(&tasks);
    }
    if tasks.is_empty() {
        println!("{}", "No pending tasks.".green());
        return Ok(());
    }

    println!("{}", "Tasks:".cyan().bold());
    for task in tasks {
        let status = match task.status {
            TaskStatus::Pending => "pending".yellow(),
            TaskStatus::Approved => "approved".green(),
            TaskStatus::Rejected => "rejected".red(),
            TaskStatus::Done => "done".bright_black(),
        };
        println!(
            "   • {}  {}  {}  event {}  {}",
            task.task_id,
            task.kind.key(),
            status,
            task.payload.event_id,
            stage_label(task.payload.stage)
        );
        if let Some(first) = task.payload.draft.lines().next() {
            println!("     {}", first.bright_black());
        }
    }
    Ok(())
}

pub fn approve(app: AppContext, task_id: &str, note: Option<String>, json: bool) -> Result<()> {
    let engine = Engine::new(app)?;
    let outcome = engine.approve(task_id, note)?;

    if json {
        return print_json(&outcome);
    }
    println!("{}", format!("✅ Approved {}", task_id).green());
    println!(
        "   Event: {} at {}",
        outcome.resolution.event_id,
        stage_label(outcome.resolution.stage)
    );
    if let Some(draft) = &outcome.released_draft {
        println!("{}", "✉ Released draft".green());
        for line in draft.lines() {
            println!("   {}", line);
        }
    }
    if let Some(continuation) = &outcome.continuation {
        println!();
        print_outcome(continuation);
    }
    print_replayed(&outcome);
    Ok(())
}

pub fn reject(app: AppContext, task_id: &str, note: Option<String>, json: bool) -> Result<()> {
    let engine = Engine::new(app)?;
    let outcome = engine.reject(task_id, note)?;

    if json {
        return print_json(&outcome);
    }
    println!("{}", format!("⛔ Rejected {}", task_id).yellow());
    println!(
        "   Event: {} stays at {}",
        outcome.resolution.event_id,
        stage_label(outcome.resolution.stage)
    );
    print_replayed(&outcome);
    Ok(())
}

fn print_replayed(outcome: &DecisionOutcome) {
    for (i, replayed) in outcome.replayed.iter().enumerate() {
        println!();
        println!(
            "{}",
            format!("↻ Held message {} of {}", i + 1, outcome.replayed.len()).cyan()
        );
        print_outcome(replayed);
    }
}

pub fn complete(app: AppContext, task_id: &str) -> Result<()> {
    Engine::new(app)?.complete(task_id)?;
    println!("{}", format!("Task {} marked done", task_id).green());
    Ok(())
}

pub fn cleanup(app: AppContext, json: bool) -> Result<()> {
    let report = Engine::new(app)?.cleanup()?;

    if json {
        return print_json(&report);
    }
    if report.removed_tasks.is_empty() && report.cleared_entries == 0 {
        println!("{}", "Nothing to clean up.".green());
        return Ok(());
    }
    println!(
        "{}",
        format!(
            "🧹 Removed {} orphaned tasks, cleared {} event entries",
            report.removed_tasks.len(),
            report.cleared_entries
        )
        .yellow()
    );
    for task_id in &report.removed_tasks {
        println!("   • {}", task_id);
    }
    Ok(())
}
