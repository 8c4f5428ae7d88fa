//! LLM-backed receipt metadata extraction.
//!
//! Builds a deterministic text context from a raw email (headers, body,
//! bounded attachment excerpts) and sends it to a local structuring model.
//! The model's answer is parsed into a draft and validated against the
//! [`ExtractedMetadata`](crate::models::ExtractedMetadata) contract before
//! anything downstream sees it; the pipeline never depends on the model
//! being deterministic, only on schema validity of whatever comes back.
//!
//! Retry strategy for the extraction call:
//! - HTTP 429 and 5xx → retry with exponential backoff (1s, 2s, 4s, …)
//! - HTTP 4xx (not 429) → fail immediately
//! - Network errors and timeouts → retry
//! - Exhausted attempts fail the item, never the run

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

use crate::config::ExtractionConfig;
use crate::doc_text;
use crate::models::{amount_from_json, ExtractedMetadata, RawReceipt};

const SYSTEM_PROMPT: &str = "\
You are a receipt metadata extractor. Given an email that contains or \
forwards a receipt, answer with a single JSON object holding exactly these \
fields:

- vendor: the canonical business name (e.g. \"Amazon\", not \"no-reply@amazon.com\")
- amount: the total amount charged (numeric, e.g. 42.99)
- currency: ISO 4217 currency code (e.g. \"USD\", \"CAD\", \"EUR\")
- date: the purchase/transaction date (YYYY-MM-DD), NOT the email send date
- description: brief summary of what was purchased (optional)
- confidence: your confidence in the extraction from 0.0 to 1.0; use below \
0.5 if the email may not be a receipt or key fields are uncertain

Handle forwarded receipts by looking at the original receipt content. For \
multi-item orders, use the total amount. If the currency is not stated, \
assume USD. Answer with JSON only, no prose.";

#[derive(Debug, Error)]
pub enum ExtractError {
    /// The endpoint rejected the request outright (non-retryable 4xx).
    #[error("extraction endpoint error: {0}")]
    Api(String),

    /// All attempts timed out or hit transient failures.
    #[error("extraction failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },

    /// The model answered, but not with structurally valid metadata.
    #[error("extraction returned invalid metadata: {0}")]
    Validation(String),
}

/// Capability seam for metadata extraction. The production implementation
/// calls an external model; tests substitute a deterministic double.
#[async_trait]
pub trait MetadataExtractor: Send + Sync {
    async fn extract(&self, context: &str) -> Result<ExtractedMetadata, ExtractError>;
}

// ============ Context building ============

/// Build the extraction context from a raw email. Deterministic: same
/// input, same context. The sender line is kept verbatim since
/// vendor-bearing domains are a strong hint.
pub fn build_context(raw: &RawReceipt, max_attachment_chars: usize) -> String {
    let mut parts = vec![
        format!("Subject: {}", raw.subject),
        format!("From: {}", raw.sender),
        format!("Date: {}", raw.date.format("%Y-%m-%dT%H:%M:%SZ")),
        String::new(),
        "--- Email Body ---".to_string(),
    ];

    if let Some(ref text) = raw.text_body {
        parts.push(text.clone());
    } else if let Some(ref html) = raw.html_body {
        parts.push(strip_html_tags(html));
    } else {
        parts.push("(no body content)".to_string());
    }

    let mut budget = max_attachment_chars;
    for att in &raw.attachments {
        if budget == 0 || !doc_text::is_document(&att.content_type) {
            continue;
        }
        match doc_text::extract_text(&att.data, &att.content_type) {
            Ok(text) => {
                let excerpt: String = text.chars().take(budget).collect();
                budget -= excerpt.chars().count();
                parts.push(format!("\n--- Attachment: {} ---", att.filename));
                parts.push(excerpt);
            }
            Err(e) => {
                tracing::debug!(attachment = %att.filename, error = %e, "skipping unreadable attachment");
            }
        }
    }

    parts.join("\n")
}

/// Remove HTML tags, returning only text content. Common entities are
/// decoded; unknown ones pass through untouched.
pub fn strip_html_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut chars = html.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '<' => {
                for c in chars.by_ref() {
                    if c == '>' {
                        break;
                    }
                }
            }
            '&' => {
                let mut entity = String::new();
                while let Some(&c) = chars.peek() {
                    if c == ';'
                        || entity.len() >= 8
                        || !(c.is_ascii_alphanumeric() || c == '#')
                    {
                        break;
                    }
                    entity.push(c);
                    chars.next();
                }
                if chars.peek() == Some(&';') {
                    chars.next();
                    match entity.as_str() {
                        "amp" => out.push('&'),
                        "lt" => out.push('<'),
                        "gt" => out.push('>'),
                        "quot" => out.push('"'),
                        "apos" | "#39" => out.push('\''),
                        "nbsp" => out.push(' '),
                        other => {
                            out.push('&');
                            out.push_str(other);
                            out.push(';');
                        }
                    }
                } else {
                    out.push('&');
                    out.push_str(&entity);
                }
            }
            _ => out.push(ch),
        }
    }

    out
}

// ============ Draft validation ============

/// Raw model answer before validation. Everything optional so a partial
/// answer produces a validation error rather than a parse error.
#[derive(Debug, Deserialize)]
struct MetadataDraft {
    vendor: Option<String>,
    amount: Option<serde_json::Value>,
    currency: Option<String>,
    #[serde(alias = "transaction_date")]
    date: Option<String>,
    description: Option<String>,
    confidence: Option<f64>,
}

fn validate_draft(draft: MetadataDraft) -> Result<ExtractedMetadata, ExtractError> {
    let vendor = draft
        .vendor
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ExtractError::Validation("vendor is missing or empty".into()))?
        .to_string();

    let amount_cents = draft
        .amount
        .as_ref()
        .and_then(amount_from_json)
        .ok_or_else(|| ExtractError::Validation("amount is missing or not a number".into()))?;
    if amount_cents <= 0 {
        return Err(ExtractError::Validation(format!(
            "amount must be positive, got {amount_cents} cents"
        )));
    }

    let currency = draft
        .currency
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_ascii_uppercase)
        .unwrap_or_else(|| "USD".to_string());
    if currency.len() != 3 || !currency.bytes().all(|b| b.is_ascii_uppercase()) {
        return Err(ExtractError::Validation(format!(
            "currency must be a 3-letter code, got {currency:?}"
        )));
    }

    let date_str = draft
        .date
        .as_deref()
        .ok_or_else(|| ExtractError::Validation("date is missing".into()))?;
    let transaction_date =
        NaiveDate::parse_from_str(date_str.trim(), "%Y-%m-%d").map_err(|e| {
            ExtractError::Validation(format!("date {date_str:?} is not YYYY-MM-DD: {e}"))
        })?;

    let confidence = draft
        .confidence
        .ok_or_else(|| ExtractError::Validation("confidence is missing".into()))?;
    if !(0.0..=1.0).contains(&confidence) {
        return Err(ExtractError::Validation(format!(
            "confidence must be in [0, 1], got {confidence}"
        )));
    }

    let description = draft
        .description
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty());

    Ok(ExtractedMetadata {
        vendor,
        amount_cents,
        currency,
        transaction_date,
        description,
        confidence,
    })
}

/// Parse a raw model answer into validated metadata. Tolerates a fenced
/// code block around the JSON, a habit some models never lose.
pub fn parse_model_answer(answer: &str) -> Result<ExtractedMetadata, ExtractError> {
    let trimmed = strip_code_fence(answer.trim());
    let draft: MetadataDraft = serde_json::from_str(trimmed)
        .map_err(|e| ExtractError::Validation(format!("answer is not a JSON object: {e}")))?;
    validate_draft(draft)
}

fn strip_code_fence(s: &str) -> &str {
    let s = s
        .strip_prefix("```json")
        .or_else(|| s.strip_prefix("```"))
        .unwrap_or(s);
    s.strip_suffix("```").unwrap_or(s).trim()
}

// ============ HTTP extractor ============

/// Request body for the structuring endpoint (`/api/generate`).
#[derive(serde::Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
    format: &'a str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Extractor backed by a local Ollama-compatible HTTP endpoint.
pub struct HttpExtractor {
    endpoint: String,
    model: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl HttpExtractor {
    pub fn new(config: &ExtractionConfig) -> Result<Self, ExtractError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ExtractError::Api(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl MetadataExtractor for HttpExtractor {
    async fn extract(&self, context: &str) -> Result<ExtractedMetadata, ExtractError> {
        let url = format!("{}/api/generate", self.endpoint);
        let body = GenerateRequest {
            model: &self.model,
            prompt: context,
            system: SYSTEM_PROMPT,
            stream: false,
            format: "json",
        };

        let mut last_err = String::new();

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tracing::debug!(attempt, delay_secs = delay.as_secs(), "retrying extraction call");
                tokio::time::sleep(delay).await;
            }

            let resp = self.client.post(&url).json(&body).send().await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let parsed: GenerateResponse = response.json().await.map_err(|e| {
                            ExtractError::Validation(format!("malformed endpoint response: {e}"))
                        })?;
                        return parse_model_answer(&parsed.response);
                    }

                    // Rate limited or server error — retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let text = response.text().await.unwrap_or_default();
                        last_err = format!("endpoint error {status}: {text}");
                        continue;
                    }

                    // Client error (not 429) — don't retry
                    let text = response.text().await.unwrap_or_default();
                    return Err(ExtractError::Api(format!("endpoint error {status}: {text}")));
                }
                Err(e) => {
                    last_err = e.to_string();
                    continue;
                }
            }
        }

        Err(ExtractError::Exhausted {
            attempts: self.max_retries + 1,
            last: last_err,
        })
    }
}
