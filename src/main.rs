//! # sitewatch CLI
//!
//! The `sitewatch` binary manages monitored targets, runs checks and
//! answers questions from the command line, and starts the HTTP server
//! that hosts the scheduler.
//!
//! ## Usage
//!
//! ```bash
//! sitewatch --config ./config/sitewatch.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sitewatch init` | Create the SQLite database and schema |
//! | `sitewatch serve` | Start the scheduler and the HTTP API |
//! | `sitewatch add <url>` | Create a target and run its baseline check |
//! | `sitewatch list` | List targets |
//! | `sitewatch update <id>` | Change interval, selector, activity, ... |
//! | `sitewatch remove <id>` | Delete a target with its history and index |
//! | `sitewatch check <id>` | Check a target now |
//! | `sitewatch ask <id> "<question>"` | Answer from the target's index |
//! | `sitewatch history <id>` | Recent change records |
//! | `sitewatch stats <id>` | Index statistics |
//! | `sitewatch subscribe <id> <email>` | Add a change subscriber |
//!
//! Only `serve` runs the scheduler; the other commands act once and exit.

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use sitewatch::config::{self, Config};
use sitewatch::watcher::Watcher;
use sitewatch::{migrate, server};
use sitewatch_core::models::{NewTarget, Owner, TargetUpdate};

/// sitewatch: web page change monitoring with grounded Q&A.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/sitewatch.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "sitewatch",
    about = "Watch web pages for changes, summarize them, and answer questions about their content",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/sitewatch.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Start the scheduler and the HTTP API on `[server].bind`.
    Serve,

    /// Create a target and run its baseline check.
    Add(AddArgs),

    /// List targets.
    List {
        /// Only show active targets.
        #[arg(long)]
        active: bool,
    },

    /// Update a target.
    Update(UpdateArgs),

    /// Delete a target, its change history, subscriptions and index.
    Remove { id: String },

    /// Check a target now, outside its schedule.
    Check { id: String },

    /// Ask a question about a target's content.
    Ask { id: String, question: String },

    /// Show recent change records, newest first.
    History {
        id: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Show index statistics for a target.
    Stats { id: String },

    /// Subscribe an email address to a target's change notifications.
    Subscribe { id: String, email: String },
}

#[derive(Args)]
struct AddArgs {
    url: String,

    /// Owner email; the address is subscribed automatically.
    #[arg(long, conflicts_with = "agent", required_unless_present = "agent")]
    email: Option<String>,

    /// Owning agent id.
    #[arg(long)]
    agent: Option<String>,

    /// Check interval in seconds.
    #[arg(long, default_value_t = 3600)]
    interval: u64,

    #[arg(long)]
    name: Option<String>,

    /// CSS selector for the content region.
    #[arg(long)]
    selector: Option<String>,

    /// XPath for the content region (used when no selector matches).
    #[arg(long)]
    xpath: Option<String>,

    /// Crawl up to this many same-site pages.
    #[arg(long, default_value_t = 1)]
    max_pages: u32,
}

#[derive(Args)]
struct UpdateArgs {
    id: String,

    #[arg(long)]
    url: Option<String>,

    #[arg(long)]
    interval: Option<u64>,

    #[arg(long)]
    selector: Option<String>,

    #[arg(long, conflicts_with = "selector")]
    clear_selector: bool,

    #[arg(long)]
    xpath: Option<String>,

    #[arg(long, conflicts_with = "xpath")]
    clear_xpath: bool,

    #[arg(long)]
    max_pages: Option<u32>,

    /// Resume checking.
    #[arg(long, conflicts_with = "pause")]
    resume: bool,

    /// Stop checking without deleting anything.
    #[arg(long)]
    pause: bool,
}

impl UpdateArgs {
    fn to_update(&self) -> TargetUpdate {
        let optional = |value: &Option<String>, clear: bool| {
            if clear {
                Some(None)
            } else {
                value.clone().map(Some)
            }
        };
        TargetUpdate {
            name: None,
            url: self.url.clone(),
            selector: optional(&self.selector, self.clear_selector),
            xpath: optional(&self.xpath, self.clear_xpath),
            interval_secs: self.interval,
            max_pages: self.max_pages,
            is_active: match (self.resume, self.pause) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            },
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sitewatch=debug,sqlx=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        command => run_once(&cfg, command).await?,
    }

    Ok(())
}

/// Commands that act once against the store and exit.
async fn run_once(cfg: &Config, command: Commands) -> Result<()> {
    let watcher = Watcher::from_config(cfg).await?;

    match command {
        Commands::Add(args) => {
            let owner = match (args.email, args.agent) {
                (Some(email), _) => Owner::Email { email },
                (None, Some(agent_id)) => Owner::Agent { agent_id },
                (None, None) => bail!("either --email or --agent is required"),
            };
            let created = watcher
                .create_target(NewTarget {
                    owner,
                    name: args.name,
                    url: args.url,
                    selector: args.selector,
                    xpath: args.xpath,
                    interval_secs: args.interval,
                    max_pages: args.max_pages,
                })
                .await?;
            println!("Created target {}", created.target.id);
            match &created.baseline.error {
                Some(error) => println!("Baseline check failed: {}", error),
                None => println!("Baseline: {}", created.baseline.status),
            }
        }
        Commands::List { active } => {
            let targets = watcher.list_targets(active).await?;
            if targets.is_empty() {
                println!("No targets.");
            }
            for t in targets {
                let state = if t.is_active { "active" } else { "paused" };
                let checked = t
                    .last_checked_at
                    .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "never".to_string());
                println!(
                    "{}  {:<7} every {}s  last checked {}  {}",
                    t.id, state, t.interval_secs, checked, t.url
                );
            }
        }
        Commands::Update(args) => match watcher.update_target(&args.id, &args.to_update()).await? {
            Some(target) => print_json(&target)?,
            None => bail!("no target with id: {}", args.id),
        },
        Commands::Remove { id } => {
            if !watcher.delete_target(&id).await? {
                bail!("no target with id: {}", id);
            }
            println!("Removed target {}", id);
        }
        Commands::Check { id } => match watcher.trigger_now(&id).await? {
            Some(result) => print_json(&result)?,
            None => bail!("no target with id: {}", id),
        },
        Commands::Ask { id, question } => match watcher.ask(&id, &question).await? {
            Some(answer) => {
                println!("{}", answer.text);
                println!();
                println!("({} chunks from {})", answer.chunks_used, answer.source_url);
            }
            None => bail!("no target with id: {}", id),
        },
        Commands::History { id, limit } => {
            let changes = watcher.history(&id, limit).await?;
            if changes.is_empty() {
                println!("No changes recorded.");
            }
            for change in changes {
                println!(
                    "[{}] {}",
                    change.detected_at.format("%Y-%m-%d %H:%M:%S"),
                    change.summary
                );
            }
        }
        Commands::Stats { id } => {
            if watcher.get_target(&id).await?.is_none() {
                bail!("no target with id: {}", id);
            }
            print_json(&watcher.stats(&id).await?)?;
        }
        Commands::Subscribe { id, email } => match watcher.subscribe(&id, &email).await? {
            Some(sub) => println!("Subscribed {} ({})", sub.email, sub.id),
            None => bail!("no target with id: {}", id),
        },
        Commands::Init | Commands::Serve => unreachable!("handled in main"),
    }

    Ok(())
}
