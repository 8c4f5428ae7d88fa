//! Core data models used throughout Receipt Index.
//!
//! These types represent the raw emails, extracted metadata, and persisted
//! receipt records that flow through the ingestion pipeline.

use chrono::{DateTime, NaiveDate, Utc};

/// An email attachment.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// Raw receipt email produced by a source adapter, before extraction.
#[derive(Debug, Clone)]
pub struct RawReceipt {
    /// Stable unique identifier across re-fetches (idempotency key).
    pub source_id: String,
    pub subject: String,
    pub sender: String,
    pub date: DateTime<Utc>,
    pub html_body: Option<String>,
    pub text_body: Option<String>,
    pub attachments: Vec<Attachment>,
}

/// Structured metadata extracted from a receipt, validated before use.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedMetadata {
    /// Canonical business name, never empty.
    pub vendor: String,
    /// Total charged, in cents. Always positive.
    pub amount_cents: i64,
    /// ISO 4217 code, uppercase.
    pub currency: String,
    /// Purchase date, not the email send date.
    pub transaction_date: NaiveDate,
    pub description: Option<String>,
    /// Extractor's self-assessed reliability in [0, 1].
    pub confidence: f64,
}

/// Receipt fields as handed to the repository for insertion.
#[derive(Debug, Clone)]
pub struct NewReceipt {
    pub source_id: String,
    pub source_type: String,
    pub metadata: ExtractedMetadata,
    /// Path relative to the file store root.
    pub pdf_path: String,
    pub email_subject: Option<String>,
    pub email_sender: Option<String>,
    pub email_date: Option<DateTime<Utc>>,
}

/// Full receipt record as stored in the database.
#[derive(Debug, Clone)]
pub struct Receipt {
    pub id: String,
    pub source_id: String,
    pub source_type: String,
    pub vendor: String,
    pub amount_cents: i64,
    pub currency: String,
    pub transaction_date: NaiveDate,
    pub description: Option<String>,
    pub confidence: f64,
    pub pdf_path: String,
    pub email_subject: Option<String>,
    pub email_sender: Option<String>,
    pub email_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Format a cent amount with fixed two decimal places and no currency symbol.
///
/// This exact form appears in stored filenames, so it must stay stable.
pub fn format_amount(cents: i64) -> String {
    format!("{}.{:02}", cents / 100, (cents % 100).abs())
}

/// Parse a decimal amount string ("42.99") into cents, rounding beyond two
/// places.
pub fn parse_amount(s: &str) -> Option<i64> {
    let trimmed = s.trim().trim_start_matches('$');
    let value: f64 = trimmed.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some((value * 100.0).round() as i64)
}

/// Parse an amount from a JSON value, accepting either a number or a
/// decimal string. Extraction backends are inconsistent about which they
/// return.
pub fn amount_from_json(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => {
            let v = n.as_f64()?;
            if !v.is_finite() {
                return None;
            }
            Some((v * 100.0).round() as i64)
        }
        serde_json::Value::String(s) => parse_amount(s),
        _ => None,
    }
}
