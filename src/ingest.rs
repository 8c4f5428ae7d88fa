//! Ingestion pipeline orchestration.
//!
//! Drives each raw message through extract → render → store → persist, one
//! item at a time. Every per-item failure is absorbed and recorded with its
//! stage; only a source connection/listing failure aborts the run. A
//! duplicate key at persist time is a skip, not a failure — the document
//! already on disk from a prior partial run is left in place.
//!
//! Persistence is the single point of durability: an item abandoned before
//! `insert` leaves no record behind, so cancelling between items is safe.

use anyhow::Result;
use sqlx::SqlitePool;
use thiserror::Error;

use crate::config::Config;
use crate::db;
use crate::extract::{build_context, HttpExtractor, MetadataExtractor};
use crate::models::NewReceipt;
use crate::render::RenditionBuilder;
use crate::repo::{self, RepoError};
use crate::source::{MaildirSource, MessageSource, ParseFailure, SourceError};
use crate::store::{FileStore, LocalFileStore};

/// Pipeline stage at which an item failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Extraction,
    Render,
    Store,
    Persist,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Extraction => "extraction",
            Stage::Render => "render",
            Stage::Store => "store",
            Stage::Persist => "persist",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct ItemFailure {
    pub source_id: String,
    pub stage: Stage,
    pub reason: String,
}

/// Outcome counts for one ingestion run.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub fetched: usize,
    pub done: usize,
    /// Already indexed — excluded by the source pre-filter or bounced off
    /// the repository's uniqueness constraint.
    pub skipped: usize,
    /// Messages the source could not parse; skipped, run continued.
    pub unparsed: Vec<ParseFailure>,
    /// Persisted, but with confidence below the review threshold.
    pub flagged_for_review: usize,
    pub failed: Vec<ItemFailure>,
}

/// Errors that abort a whole run before or between items.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Repo(#[from] RepoError),
}

#[derive(Debug, Clone, Copy)]
pub struct IngestOptions {
    pub review_threshold: f64,
    pub max_attachment_chars: usize,
    pub limit: Option<usize>,
}

/// Run the pipeline over everything the source yields.
pub async fn ingest_batch(
    pool: &SqlitePool,
    source: &dyn MessageSource,
    extractor: &dyn MetadataExtractor,
    builder: &RenditionBuilder,
    store: &dyn FileStore,
    options: IngestOptions,
) -> Result<RunSummary, IngestError> {
    let processed = repo::processed_source_ids(pool).await?;
    let batch = source.fetch_unprocessed(&processed).await?;

    let mut items = batch.items;
    if let Some(limit) = options.limit {
        items.truncate(limit);
    }

    let mut summary = RunSummary {
        fetched: items.len(),
        skipped: batch.already_processed,
        unparsed: batch.parse_failures,
        ..RunSummary::default()
    };

    for item in &items {
        tracing::debug!(source_id = %item.source_id, subject = %item.subject, "processing item");

        let context = build_context(item, options.max_attachment_chars);
        let metadata = match extractor.extract(&context).await {
            Ok(m) => m,
            Err(e) => {
                summary.failed.push(ItemFailure {
                    source_id: item.source_id.clone(),
                    stage: Stage::Extraction,
                    reason: e.to_string(),
                });
                continue;
            }
        };

        let rendition = match builder.render(item).await {
            Ok(bytes) => bytes,
            Err(e) => {
                summary.failed.push(ItemFailure {
                    source_id: item.source_id.clone(),
                    stage: Stage::Render,
                    reason: e.to_string(),
                });
                continue;
            }
        };

        let pdf_path = match store.save(
            metadata.transaction_date,
            &metadata.vendor,
            metadata.amount_cents,
            &rendition,
        ) {
            Ok(path) => path,
            Err(e) => {
                summary.failed.push(ItemFailure {
                    source_id: item.source_id.clone(),
                    stage: Stage::Store,
                    reason: e.to_string(),
                });
                continue;
            }
        };

        let low_confidence = metadata.confidence < options.review_threshold;
        let new = NewReceipt {
            source_id: item.source_id.clone(),
            source_type: source.source_type().to_string(),
            metadata,
            pdf_path,
            email_subject: Some(item.subject.clone()),
            email_sender: Some(item.sender.clone()),
            email_date: Some(item.date),
        };

        match repo::insert_receipt(pool, &new).await {
            Ok(receipt) => {
                tracing::info!(source_id = %item.source_id, id = %receipt.id, "receipt indexed");
                summary.done += 1;
                if low_confidence {
                    summary.flagged_for_review += 1;
                }
            }
            // The file write above is idempotent-safe via path uniqueness;
            // no rollback on duplicate.
            Err(RepoError::Duplicate) => {
                tracing::debug!(source_id = %item.source_id, "duplicate source id, skipping");
                summary.skipped += 1;
            }
            Err(e) => {
                summary.failed.push(ItemFailure {
                    source_id: item.source_id.clone(),
                    stage: Stage::Persist,
                    reason: e.to_string(),
                });
            }
        }
    }

    Ok(summary)
}

/// CLI entry point for `rcpt ingest`.
pub async fn run_ingest(config: &Config, dry_run: bool, limit: Option<usize>) -> Result<()> {
    let maildir = config
        .source
        .maildir
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("no [source.maildir] configured"))?;

    let pool = db::connect(config).await?;
    let source = MaildirSource::new(maildir)?;

    if dry_run {
        let processed = repo::processed_source_ids(&pool).await?;
        let batch = source.fetch_unprocessed(&processed).await?;
        println!("ingest maildir (dry-run)");
        println!("  items found: {}", batch.items.len());
        println!("  already indexed: {}", batch.already_processed);
        println!("  parse failures: {}", batch.parse_failures.len());
        for item in batch.items.iter().take(limit.unwrap_or(usize::MAX)) {
            println!("  - {} ({})", item.subject, item.source_id);
        }
        pool.close().await;
        return Ok(());
    }

    let extractor = HttpExtractor::new(&config.extraction)?;
    let builder = RenditionBuilder::new(&config.render);
    let store = LocalFileStore::new(config.store.root.clone());

    let options = IngestOptions {
        review_threshold: config.extraction.review_threshold,
        max_attachment_chars: config.extraction.max_attachment_chars,
        limit,
    };

    let summary = ingest_batch(&pool, &source, &extractor, &builder, &store, options).await?;

    println!("ingest maildir");
    println!("  fetched: {} items", summary.fetched);
    println!("  done: {}", summary.done);
    println!("  skipped (already indexed): {}", summary.skipped);
    println!("  parse failures: {}", summary.unparsed.len());
    for failure in &summary.unparsed {
        println!("    - {}: {}", failure.item, failure.reason);
    }
    if summary.flagged_for_review > 0 {
        println!("  flagged for review: {}", summary.flagged_for_review);
    }
    println!("  failed: {}", summary.failed.len());
    for failure in &summary.failed {
        println!(
            "    - {} [{}] {}",
            failure.source_id, failure.stage, failure.reason
        );
    }
    println!("ok");

    pool.close().await;
    Ok(())
}
