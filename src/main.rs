use bookflow::cli::process::ProcessArgs;
use bookflow::cli::tasks::TasksCommands;
use bookflow::config::DEFAULT_CONFIG_FILE;
use bookflow::{Result, StoreError};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use colored::Colorize;
use std::io;
use std::path::PathBuf;

/// Exit status when the store lock could not be taken in time (EX_TEMPFAIL)
const EXIT_LOCK_TIMEOUT: i32 = 75;

#[derive(Parser)]
#[command(name = "bookflow")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Venue booking workflow engine", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Override the document store path
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Route one inbound client message
    Process(ProcessArgs),

    /// Show all events or one event in detail
    Status {
        /// Event ID
        event_id: Option<String>,

        /// Output in JSON format
        #[arg(short, long)]
        json: bool,
    },

    /// Manager approval tasks
    #[command(subcommand)]
    Tasks(TasksCommands),

    /// Show the activity feed of an event
    Activity {
        event_id: String,

        /// Include step-level entries
        #[arg(short, long)]
        detailed: bool,

        #[arg(short, long)]
        json: bool,
    },

    /// Show the stage transition audit trail of an event
    Audit {
        event_id: String,

        #[arg(short, long)]
        json: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell type (bash, zsh, fish, powershell)
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "bookflow=debug",
        _ => "bookflow=trace",
    };
    bookflow::init_tracing(filter);

    if let Err(e) = run(cli) {
        eprintln!("{}", format!("Error: {:#}", e).red());
        let lock_timeout = e
            .downcast_ref::<StoreError>()
            .is_some_and(StoreError::is_lock_timeout);
        std::process::exit(if lock_timeout { EXIT_LOCK_TIMEOUT } else { 1 });
    }
}

fn run(cli: Cli) -> Result<()> {
    if let Commands::Completions { shell } = cli.command {
        generate(shell, &mut Cli::command(), "bookflow", &mut io::stdout());
        return Ok(());
    }

    let app = bookflow::cli::load_context(&cli.config, cli.store.as_deref())?;
    tracing::debug!(store = %app.config().store.path.display(), "loaded configuration");

    match cli.command {
        Commands::Process(args) => bookflow::cli::process::run(app, &args)?,
        Commands::Status { event_id, json } => {
            bookflow::cli::status::run(&app, event_id.as_deref(), json)?
        }
        Commands::Tasks(cmd) => bookflow::cli::tasks::run(app, cmd)?,
        Commands::Activity {
            event_id,
            detailed,
            json,
        } => bookflow::cli::activity::activity(&app, &event_id, detailed, json)?,
        Commands::Audit { event_id, json } => {
            bookflow::cli::activity::audit(&app, &event_id, json)?
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}
