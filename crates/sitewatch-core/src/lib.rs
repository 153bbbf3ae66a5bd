//! # Sitewatch Core
//!
//! Pure logic for sitewatch: data models, HTML text extraction, change
//! detection, chunking, the retrieval index, change summaries and the
//! question-answer pipeline, plus the capability traits the application
//! crate plugs real I/O into.
//!
//! This crate contains no tokio runtime, sqlx, or HTTP client. Every
//! side effect goes through a trait from [`traits`], [`store`] or
//! [`embedding`], so the whole pipeline runs against in-memory doubles.
//!
//! ```text
//! fetch ─▶ extract ─▶ detect ─▶ summarize ─▶ change record
//!                       │
//!                       └──────▶ chunk ─▶ embed ─▶ index ─▶ answer
//! ```

pub mod answer;
pub mod chunk;
pub mod detect;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod index;
pub mod models;
pub mod store;
pub mod summarize;
pub mod text;
pub mod traits;

pub use error::{Result, WatchError};
