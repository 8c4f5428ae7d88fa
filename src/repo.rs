//! Receipt repository: idempotent persistence and filtered search.
//!
//! `insert_receipt` is the authoritative at-most-once guard — a second
//! insert for the same `source_id` surfaces as [`RepoError::Duplicate`],
//! which callers treat as an expected outcome on re-runs, not a failure.
//! Search filters are ANDed and results come back most recent transaction
//! first, insertion order breaking ties; reconciliation workflows scan
//! top-to-bottom expecting recency.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{NewReceipt, Receipt};

#[derive(Debug, Error)]
pub enum RepoError {
    /// A receipt for this source id already exists. Expected on re-runs.
    #[error("a receipt for this source id is already indexed")]
    Duplicate,

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("corrupt receipt row: {0}")]
    Corrupt(String),
}

const RECEIPT_COLUMNS: &str = "id, source_id, source_type, vendor, amount_cents, currency, \
     transaction_date, description, confidence, pdf_path, email_subject, email_sender, \
     email_date, created_at, updated_at";

/// Source ids of everything already indexed, for the adapters' pre-filter.
pub async fn processed_source_ids(pool: &SqlitePool) -> Result<HashSet<String>, RepoError> {
    let rows: Vec<String> = sqlx::query_scalar("SELECT source_id FROM receipts")
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().collect())
}

/// Insert a new receipt. The UNIQUE constraint on `source_id` maps to
/// [`RepoError::Duplicate`]; nothing is ever updated or re-created through
/// this path.
pub async fn insert_receipt(pool: &SqlitePool, new: &NewReceipt) -> Result<Receipt, RepoError> {
    let id = Uuid::new_v4().to_string();
    let now = Utc::now();

    let result = sqlx::query(
        r#"
        INSERT INTO receipts (id, source_id, source_type, vendor, amount_cents, currency,
            transaction_date, description, confidence, pdf_path, email_subject, email_sender,
            email_date, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&new.source_id)
    .bind(&new.source_type)
    .bind(&new.metadata.vendor)
    .bind(new.metadata.amount_cents)
    .bind(&new.metadata.currency)
    .bind(new.metadata.transaction_date.format("%Y-%m-%d").to_string())
    .bind(&new.metadata.description)
    .bind(new.metadata.confidence)
    .bind(&new.pdf_path)
    .bind(&new.email_subject)
    .bind(&new.email_sender)
    .bind(new.email_date.map(|d| d.timestamp()))
    .bind(now.timestamp())
    .bind(now.timestamp())
    .execute(pool)
    .await;

    match result {
        Ok(_) => Ok(Receipt {
            id,
            source_id: new.source_id.clone(),
            source_type: new.source_type.clone(),
            vendor: new.metadata.vendor.clone(),
            amount_cents: new.metadata.amount_cents,
            currency: new.metadata.currency.clone(),
            transaction_date: new.metadata.transaction_date,
            description: new.metadata.description.clone(),
            confidence: new.metadata.confidence,
            pdf_path: new.pdf_path.clone(),
            email_subject: new.email_subject.clone(),
            email_sender: new.email_sender.clone(),
            email_date: new.email_date,
            created_at: now,
            updated_at: now,
        }),
        Err(e) => {
            if let sqlx::Error::Database(ref db_err) = e {
                if matches!(db_err.kind(), sqlx::error::ErrorKind::UniqueViolation) {
                    return Err(RepoError::Duplicate);
                }
            }
            Err(e.into())
        }
    }
}

/// Optional, combinable search filters. Empty filter returns the full index.
#[derive(Debug, Default, Clone)]
pub struct SearchFilter {
    /// Case-insensitive substring match on the vendor name.
    pub vendor: Option<String>,
    pub amount_min_cents: Option<i64>,
    pub amount_max_cents: Option<i64>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
}

/// Search the index. All supplied filters are ANDed; range bounds are
/// inclusive and open-ended when only one end is given.
pub async fn search_receipts(
    pool: &SqlitePool,
    filter: &SearchFilter,
) -> Result<Vec<Receipt>, RepoError> {
    let mut sql = format!("SELECT {RECEIPT_COLUMNS} FROM receipts");
    let mut clauses: Vec<&str> = Vec::new();

    if filter.vendor.is_some() {
        clauses.push("LOWER(vendor) LIKE ? ESCAPE '\\'");
    }
    if filter.amount_min_cents.is_some() {
        clauses.push("amount_cents >= ?");
    }
    if filter.amount_max_cents.is_some() {
        clauses.push("amount_cents <= ?");
    }
    if filter.date_from.is_some() {
        clauses.push("transaction_date >= ?");
    }
    if filter.date_to.is_some() {
        clauses.push("transaction_date <= ?");
    }

    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    // rowid preserves insertion order for same-date ties
    sql.push_str(" ORDER BY transaction_date DESC, rowid ASC");

    let mut query = sqlx::query(&sql);
    if let Some(ref vendor) = filter.vendor {
        query = query.bind(format!("%{}%", escape_like(&vendor.to_lowercase())));
    }
    if let Some(min) = filter.amount_min_cents {
        query = query.bind(min);
    }
    if let Some(max) = filter.amount_max_cents {
        query = query.bind(max);
    }
    if let Some(from) = filter.date_from {
        query = query.bind(from.format("%Y-%m-%d").to_string());
    }
    if let Some(to) = filter.date_to {
        query = query.bind(to.format("%Y-%m-%d").to_string());
    }

    let rows = query.fetch_all(pool).await?;
    rows.iter().map(receipt_from_row).collect()
}

/// Fetch a single receipt by its id.
pub async fn get_receipt(pool: &SqlitePool, id: &str) -> Result<Option<Receipt>, RepoError> {
    let row = sqlx::query(&format!(
        "SELECT {RECEIPT_COLUMNS} FROM receipts WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(receipt_from_row).transpose()
}

fn receipt_from_row(row: &SqliteRow) -> Result<Receipt, RepoError> {
    let date_str: String = row.get("transaction_date");
    let transaction_date = NaiveDate::parse_from_str(&date_str, "%Y-%m-%d")
        .map_err(|e| RepoError::Corrupt(format!("transaction_date {date_str:?}: {e}")))?;

    let email_date: Option<i64> = row.get("email_date");
    let created_at: i64 = row.get("created_at");
    let updated_at: i64 = row.get("updated_at");

    Ok(Receipt {
        id: row.get("id"),
        source_id: row.get("source_id"),
        source_type: row.get("source_type"),
        vendor: row.get("vendor"),
        amount_cents: row.get("amount_cents"),
        currency: row.get("currency"),
        transaction_date,
        description: row.get("description"),
        confidence: row.get("confidence"),
        pdf_path: row.get("pdf_path"),
        email_subject: row.get("email_subject"),
        email_sender: row.get("email_sender"),
        email_date: email_date.and_then(|ts| DateTime::from_timestamp(ts, 0)),
        created_at: timestamp(created_at)?,
        updated_at: timestamp(updated_at)?,
    })
}

fn timestamp(ts: i64) -> Result<DateTime<Utc>, RepoError> {
    DateTime::from_timestamp(ts, 0)
        .ok_or_else(|| RepoError::Corrupt(format!("timestamp {ts} out of range")))
}

/// Escape LIKE metacharacters so a vendor filter matches literally.
fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}
