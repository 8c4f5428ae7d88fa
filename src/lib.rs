//! # Receipt Index
//!
//! A local-first receipt ingestion and search index.
//!
//! Receipt Index turns raw receipt emails into two durable artifacts: a
//! normalized PDF rendition on disk and a structured metadata row in SQLite.
//! A reconciler can then find the receipt behind a bank transaction by
//! vendor, amount, and date instead of digging through mailboxes.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌───────────────────────────┐   ┌──────────┐
//! │   Source    │──▶│         Pipeline          │──▶│  SQLite   │
//! │  (maildir)  │   │ Extract → Render → Store  │   │ receipts  │
//! └─────────────┘   └───────────────────────────┘   └────┬─────┘
//!                                                        │
//!                                                        ▼
//!                                                   ┌──────────┐
//!                                                   │   CLI    │
//!                                                   │  (rcpt)  │
//!                                                   └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! rcpt init                                  # create database
//! rcpt ingest                                # ingest receipts from the mail folder
//! rcpt search --vendor amazon --amount-min 10 --amount-max 50
//! rcpt show <id>                             # one receipt + its PDF location
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`source`] | Message source adapters (mail folder) |
//! | [`extract`] | LLM metadata extraction |
//! | [`doc_text`] | Attachment text excerpts (PDF, DOCX) |
//! | [`render`] | Email-to-PDF rendition builder |
//! | [`store`] | Rendition file store |
//! | [`repo`] | Receipt repository and search queries |
//! | [`ingest`] | Ingestion orchestration |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod config;
pub mod db;
pub mod doc_text;
pub mod extract;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod render;
pub mod repo;
pub mod search;
pub mod show;
pub mod source;
pub mod sources;
pub mod store;
