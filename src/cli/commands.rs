//! CLI commands

use crate::config::Config;
use crate::core::clock::Clock;
use crate::core::task::{TaskId, TaskPayload};
use crate::core::temporal::Timestamp;
use crate::db::TaskDB;
use crate::error::Result;
use crate::storage::HistoryStore;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::PathBuf;

/// Bitemporal-DB CLI
#[derive(Parser, Debug)]
#[command(name = "bitemporal-db")]
#[command(about = "Bitemporal task store")]
pub struct Cli {
    /// Directory holding bitemporal.json
    #[arg(long, global = true, default_value = ".")]
    pub config_dir: PathBuf,

    /// Override the configured data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Load the config file, applying command-line overrides
    pub fn config(&self) -> Result<Config> {
        let mut config = Config::load_or_init(&self.config_dir)?;
        if let Some(data_dir) = &self.data_dir {
            config.data_dir = data_dir.clone();
        }
        Ok(config)
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a task, valid from now on
    Create {
        title: String,
        /// Completion instant (RFC 3339)
        #[arg(long)]
        completed_at: Option<Timestamp>,
    },
    /// List tasks valid now
    List {
        /// Only this task
        id: Option<String>,
    },
    /// List every task's latest state, deleted ones included
    All,
    /// Show a task's valid-time timeline
    History {
        id: String,
        /// Show the timeline as it was believed at this instant (RFC 3339)
        #[arg(long)]
        as_known_at: Option<Timestamp>,
    },
    /// Show every row ever written for a task
    Audit { id: String },
    /// Rename a task from now on
    Rename { id: String, title: String },
    /// Mark a task completed
    Complete {
        id: String,
        /// Completion instant (RFC 3339), defaults to now
        #[arg(long)]
        at: Option<Timestamp>,
    },
    /// Clear a task's completion from now on
    Reopen { id: String },
    /// End a task's validity now
    Delete { id: String },
}

/// Run one command against `db`, returning its JSON output
pub async fn execute<S, C>(db: &TaskDB<S, C>, command: Commands) -> Result<Value>
where
    S: HistoryStore<TaskPayload> + Clone,
    C: Clock,
{
    let output = match command {
        Commands::Create {
            title,
            completed_at,
        } => {
            let id = db.create(&title, completed_at).await?;
            json!({ "id": id })
        }
        Commands::List { id } => {
            let id = id.map(TaskId::from);
            serde_json::to_value(db.read_current(id.as_ref()).await?)?
        }
        Commands::All => serde_json::to_value(db.read_all_with_deleted().await?)?,
        Commands::History { id, as_known_at } => {
            let id = TaskId::from(id);
            let history = match as_known_at {
                Some(at) => db.history_as_known_at(&id, at).await?,
                None => db.read_history(&id).await?,
            };
            serde_json::to_value(history)?
        }
        Commands::Audit { id } => serde_json::to_value(db.audit(&TaskId::from(id)).await?)?,
        Commands::Rename { id, title } => {
            serde_json::to_value(db.update_title(&TaskId::from(id), &title).await?)?
        }
        Commands::Complete { id, at } => {
            let at = at.unwrap_or_else(|| db.now());
            serde_json::to_value(db.update_completed(&TaskId::from(id), Some(at)).await?)?
        }
        Commands::Reopen { id } => {
            serde_json::to_value(db.update_completed(&TaskId::from(id), None).await?)?
        }
        Commands::Delete { id } => serde_json::to_value(db.delete(&TaskId::from(id)).await?)?,
    };
    Ok(output)
}
