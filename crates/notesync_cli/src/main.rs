//! NoteSync CLI
//!
//! Command-line client for an offline-first NoteSync store.
//!
//! # Commands
//!
//! - `status` - Store counters and sync metadata
//! - `list` / `show` - Read notes
//! - `create` / `edit` / `delete` - Local writes that queue pending changes
//! - `pending` / `dead-letters` - Inspect the change log
//! - `sync` - Run one drain pass against the server
//! - `watch` - Monitor connectivity and sync in the background
//! - `probe` - Check the server's health endpoint

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Offline-first note store with server sync.
#[derive(Parser)]
#[command(name = "notesync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the local store directory
    #[arg(global = true, short, long, default_value = ".notesync")]
    store: PathBuf,

    /// Server base URL
    #[arg(global = true, long, env = "NOTESYNC_SERVER")]
    server: Option<String>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display store statistics and sync metadata
    Status {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List notes
    List {
        /// Only notes carrying this tag
        #[arg(short, long)]
        tag: Option<String>,

        /// Case-insensitive search over title, content and tags
        #[arg(short = 'q', long)]
        search: Option<String>,

        /// Only notes owned by this user
        #[arg(short, long)]
        user: Option<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print one note as JSON
    Show {
        /// Note id
        id: String,
    },

    /// Create a note
    Create {
        /// Title
        #[arg(short = 'T', long)]
        title: String,

        /// Body text
        #[arg(short, long, default_value = "")]
        content: String,

        /// Tag (repeatable)
        #[arg(short, long = "tag")]
        tags: Vec<String>,

        /// Note id (random if omitted)
        #[arg(long)]
        id: Option<String>,
    },

    /// Edit a note
    Edit {
        /// Note id
        id: String,

        /// New title
        #[arg(short = 'T', long)]
        title: Option<String>,

        /// New body text
        #[arg(short, long)]
        content: Option<String>,

        /// Replace tags (repeatable)
        #[arg(short, long = "tag")]
        tags: Vec<String>,
    },

    /// Queue deletion of a note
    Delete {
        /// Note id
        id: String,
    },

    /// List pending changes
    Pending {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List changes dropped after failing
    DeadLetters {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Run one drain pass against the server
    Sync,

    /// Monitor connectivity and sync in the background until interrupted
    Watch {
        /// Periodic sync interval in seconds
        #[arg(short, long, default_value = "30")]
        interval: u64,
    },

    /// Check the server's health endpoint
    Probe,

    /// Show version information
    Version,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Status { format } => commands::status::run(&cli.store, &format)?,
        Commands::List {
            tag,
            search,
            user,
            format,
        } => {
            let filter = commands::notes::ListFilter { tag, search, user };
            commands::notes::list(&cli.store, &filter, &format)?;
        }
        Commands::Show { id } => commands::notes::show(&cli.store, &id)?,
        Commands::Create {
            title,
            content,
            tags,
            id,
        } => commands::notes::create(&cli.store, id, title, content, tags)?,
        Commands::Edit {
            id,
            title,
            content,
            tags,
        } => commands::notes::edit(&cli.store, &id, title, content, tags)?,
        Commands::Delete { id } => commands::notes::delete(&cli.store, &id)?,
        Commands::Pending { format } => commands::queue::pending(&cli.store, &format)?,
        Commands::DeadLetters { format } => commands::queue::dead_letters(&cli.store, &format)?,
        Commands::Sync => {
            let server = cli.server.ok_or("--server is required for sync")?;
            commands::sync::once(&cli.store, &server).await?;
        }
        Commands::Watch { interval } => {
            let server = cli.server.ok_or("--server is required for watch")?;
            commands::sync::watch(&cli.store, &server, interval).await?;
        }
        Commands::Probe => {
            let server = cli.server.ok_or("--server is required for probe")?;
            commands::sync::probe(&server).await?;
        }
        Commands::Version => {
            println!("NoteSync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!(
                "Record format v{} ({})",
                notesync_storage::RECORD_VERSION,
                String::from_utf8_lossy(&notesync_storage::RECORD_MAGIC)
            );
        }
    }

    Ok(())
}
