//! # sitewatch
//!
//! Watches web pages for content changes, summarizes what changed, and
//! answers questions grounded in the most recently scraped content.
//!
//! ## Architecture
//!
//! ```text
//!              ┌──────────────┐
//!              │  Scheduler   │  one job per active target
//!              └──────┬───────┘
//!                     ▼
//! ┌─────────┐   ┌──────────┐   ┌───────────┐   ┌──────────┐
//! │ Fetcher │──▶│ Monitor  │──▶│ Retrieval │──▶│  SQLite  │
//! │ / crawl │   │ detect + │   │   index   │   │ targets  │
//! └─────────┘   │ summarize│   └─────┬─────┘   │ chunks   │
//!               └────┬─────┘         │         └──────────┘
//!                    ▼               ▼
//!               ┌──────────┐   ┌──────────┐
//!               │ Notifier │   │  Answer  │
//!               └──────────┘   └──────────┘
//! ```
//!
//! The pure pipeline (models, extraction, detection, chunking, index,
//! answers) lives in `sitewatch-core`; this crate supplies the runtime:
//! configuration, SQLite storage, HTTP clients, the scheduler and the
//! [`watcher::Watcher`] composition root behind the CLI and HTTP API.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation |
//! | [`sqlite_store`] | SQLite implementation of the storage traits |
//! | [`fetch`] | HTTP page fetcher |
//! | [`crawl`] | Same-site multi-page crawl |
//! | [`embedding`] | Embedding provider implementations |
//! | [`completion`] | Chat-completion provider |
//! | [`notify`] | Log and webhook notifiers |
//! | [`retry`] | JSON POST with retry/backoff |
//! | [`monitor`] | The per-check pipeline |
//! | [`scheduler`] | Periodic job scheduling |
//! | [`validate`] | Input checks at the boundary |
//! | [`watcher`] | Composition root and public operations |
//! | [`server`] | JSON HTTP API |
//! | `testing` | Deterministic test doubles (feature `testing`) |

pub mod completion;
pub mod config;
pub mod crawl;
pub mod db;
pub mod embedding;
pub mod fetch;
pub mod migrate;
pub mod monitor;
pub mod notify;
pub mod retry;
pub mod scheduler;
pub mod server;
pub mod sqlite_store;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod validate;
pub mod watcher;
