//! convo-cache - inspect consolidated conversations
//!
//! Small CLI over the library: create and fill a history database, then
//! page through a conversation the way a chat view would.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use convo_cache::config::Config;
use convo_cache::history::SqliteHistory;
use convo_cache::message::Message;
use convo_cache::registry::{ActiveSessionRegistry, ChatMode};
use convo_cache::session::{PageLoader, SharedSession};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Conversation view model over a SQLite chat history
#[derive(Parser)]
#[command(name = "convo-cache")]
#[command(about = "Consolidate and page chat history the way a conversation view shows it")]
struct Cli {
    /// JSON config file (defaults are used when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the history database
    Init,

    /// Import messages from a JSON array into one conversation
    Import {
        /// Conversation (bare JID or room address)
        chat_id: String,

        /// JSON file holding an array of messages
        file: PathBuf,
    },

    /// Print the consolidated units of a conversation
    Show {
        chat_id: String,

        /// Number of history pages to load
        #[arg(short, long, default_value = "1")]
        pages: usize,

        /// Treat the chat as a group chat
        #[arg(long)]
        muc: bool,
    },

    /// Delete messages from a conversation and its history
    Delete {
        chat_id: String,

        /// Message ids to delete
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// List known sessions
    Sessions,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so command output stays clean
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => Config::default(),
    };
    debug!(history_db = %config.history_db.display(), "using config");

    match cli.command {
        Commands::Init => cmd_init(&config),
        Commands::Import { chat_id, file } => cmd_import(&config, &chat_id, &file),
        Commands::Show { chat_id, pages, muc } => cmd_show(&config, &chat_id, pages, muc).await,
        Commands::Delete { chat_id, ids } => cmd_delete(&config, &chat_id, ids).await,
        Commands::Sessions => cmd_sessions(&config),
    }
}

fn cmd_init(config: &Config) -> anyhow::Result<()> {
    SqliteHistory::new(&config.history_db).init()?;
    println!("History database ready: {}", config.history_db.display());
    Ok(())
}

fn cmd_import(config: &Config, chat_id: &str, file: &Path) -> anyhow::Result<()> {
    let content =
        fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    let messages: Vec<Message> =
        serde_json::from_str(&content).with_context(|| format!("parsing {}", file.display()))?;

    let count = SqliteHistory::new(&config.history_db).insert_messages(chat_id, &messages)?;
    info!(chat_id, count, "imported messages");
    println!("Imported {} messages into {}", count, chat_id);
    Ok(())
}

fn open_registry(config: &Config) -> anyhow::Result<ActiveSessionRegistry> {
    let history = Arc::new(SqliteHistory::new(&config.history_db));
    let registry = ActiveSessionRegistry::new(config, history);
    registry.load().context("loading session registry")?;
    Ok(registry)
}

async fn load_pages(session: &SharedSession, pages: usize) -> anyhow::Result<()> {
    let loader = PageLoader::new(Arc::clone(session));
    loader.load(true).await?;
    for _ in 1..pages {
        if loader.load(false).await?.is_empty() {
            break;
        }
    }
    Ok(())
}

async fn cmd_show(config: &Config, chat_id: &str, pages: usize, muc: bool) -> anyhow::Result<()> {
    if pages == 0 {
        bail!("--pages must be at least 1");
    }
    if !config.history_db.exists() {
        bail!(
            "no history database at {} (run `convo-cache init`)",
            config.history_db.display()
        );
    }

    let registry = open_registry(config)?;
    let mode = if muc { ChatMode::MultiUser } else { ChatMode::Single };
    let session = registry.open(chat_id, None, mode)?;
    registry.set_current(Some(chat_id))?;
    load_pages(&session, pages).await?;

    let session = session.lock();
    let adapter = session.adapter();
    if adapter.count() == 0 {
        println!("No messages for {}", chat_id);
        return Ok(());
    }

    for (idx, unit) in adapter.units().iter().enumerate() {
        let kind = adapter.classify(unit);
        println!(
            "{:>4}  {}  {:<10} {}: {}",
            idx,
            unit.timestamp().format("%Y-%m-%d %H:%M:%S"),
            kind.as_str(),
            unit.root().sender_name,
            unit.body()
        );
        if let Some(loc) = unit.location() {
            println!("      location {:.5}, {:.5}", loc.latitude, loc.longitude);
        }
    }
    Ok(())
}

async fn cmd_delete(config: &Config, chat_id: &str, ids: Vec<String>) -> anyhow::Result<()> {
    let registry = open_registry(config)?;
    let session = registry.open(chat_id, None, ChatMode::Single)?;
    load_pages(&session, 1).await?;

    let ids: HashSet<String> = ids.into_iter().collect();
    let removed = session.lock().adapter_mut().purge_by_ids(&ids);
    println!("Deleted {} loaded messages from {}", removed, chat_id);
    Ok(())
}

fn cmd_sessions(config: &Config) -> anyhow::Result<()> {
    let registry = open_registry(config)?;
    let sessions = registry.sessions();
    if sessions.is_empty() {
        println!("No sessions");
        return Ok(());
    }

    let current = registry.current();
    for meta in sessions {
        let marker = if current.as_deref() == Some(meta.chat_id.as_str()) {
            "*"
        } else {
            " "
        };
        println!(
            "{} {:<32} {:<10} {}",
            marker,
            meta.chat_id,
            match meta.mode {
                ChatMode::Single => "single",
                ChatMode::MultiUser => "multi-user",
            },
            meta.display_name.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}
