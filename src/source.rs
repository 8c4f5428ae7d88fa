//! Message source adapters.
//!
//! A [`MessageSource`] yields the raw receipt emails one ingestion run will
//! process, excluding anything already indexed. The exclusion here is a
//! performance layer only — the repository's UNIQUE constraint on
//! `source_id` remains the authority.
//!
//! The shipped variant reads a mail folder of RFC 822 files. A connection
//! or listing failure is fatal to the run; a single message that fails to
//! parse is recorded and skipped, and iteration continues.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use mail_parser::{MessageParser, MimeHeaders};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::PathBuf;
use thiserror::Error;
use walkdir::WalkDir;

use crate::config::MaildirConfig;
use crate::models::{Attachment, RawReceipt};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("mail folder does not exist: {0}")]
    RootMissing(String),

    #[error("failed to list mail folder: {0}")]
    List(String),

    #[error("invalid glob pattern: {0}")]
    Pattern(String),
}

/// One message that could not be parsed into a [`RawReceipt`].
#[derive(Debug, Clone)]
pub struct ParseFailure {
    /// Best identifier available — the file path for folder sources.
    pub item: String,
    pub reason: String,
}

/// Result of one fetch: parsed items plus what was dropped along the way.
#[derive(Debug, Default)]
pub struct FetchBatch {
    pub items: Vec<RawReceipt>,
    pub parse_failures: Vec<ParseFailure>,
    /// Items excluded because their source id was already indexed.
    pub already_processed: usize,
}

/// A source of raw receipt messages.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Source label recorded in each receipt's provenance.
    fn source_type(&self) -> &str;

    /// List, fetch, and parse everything not yet processed. The batch is
    /// finite and re-listed on every call.
    async fn fetch_unprocessed(
        &self,
        processed_ids: &HashSet<String>,
    ) -> Result<FetchBatch, SourceError>;
}

/// Mail-folder source: a directory tree of `.eml` files.
pub struct MaildirSource {
    root: PathBuf,
    include: GlobSet,
    exclude: GlobSet,
}

impl MaildirSource {
    pub fn new(config: &MaildirConfig) -> Result<Self, SourceError> {
        Ok(Self {
            root: config.root.clone(),
            include: build_globset(&config.include_globs)?,
            exclude: build_globset(&config.exclude_globs)?,
        })
    }

    /// Paths of candidate message files, sorted for deterministic order.
    fn list_message_files(&self) -> Result<Vec<PathBuf>, SourceError> {
        let mut files = Vec::new();

        for entry in WalkDir::new(&self.root) {
            let entry = entry.map_err(|e| SourceError::List(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(&self.root).unwrap_or(path);
            let rel_str = relative.to_string_lossy().to_string();

            if self.exclude.is_match(&rel_str) || !self.include.is_match(&rel_str) {
                continue;
            }

            files.push(path.to_path_buf());
        }

        files.sort();
        Ok(files)
    }
}

#[async_trait]
impl MessageSource for MaildirSource {
    fn source_type(&self) -> &str {
        "maildir"
    }

    async fn fetch_unprocessed(
        &self,
        processed_ids: &HashSet<String>,
    ) -> Result<FetchBatch, SourceError> {
        if !self.root.is_dir() {
            return Err(SourceError::RootMissing(self.root.display().to_string()));
        }

        let mut batch = FetchBatch::default();

        for path in self.list_message_files()? {
            let bytes = match std::fs::read(&path) {
                Ok(b) => b,
                Err(e) => {
                    batch.parse_failures.push(ParseFailure {
                        item: path.display().to_string(),
                        reason: format!("read failed: {e}"),
                    });
                    continue;
                }
            };

            match parse_eml(&bytes) {
                Ok(raw) => {
                    if processed_ids.contains(&raw.source_id) {
                        tracing::debug!(source_id = %raw.source_id, "skipping already-indexed message");
                        batch.already_processed += 1;
                    } else {
                        batch.items.push(raw);
                    }
                }
                Err(reason) => {
                    tracing::warn!(path = %path.display(), %reason, "failed to parse message");
                    batch.parse_failures.push(ParseFailure {
                        item: path.display().to_string(),
                        reason,
                    });
                }
            }
        }

        Ok(batch)
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet, SourceError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).map_err(|e| SourceError::Pattern(e.to_string()))?);
    }
    builder.build().map_err(|e| SourceError::Pattern(e.to_string()))
}

/// Parse one RFC 822 message into a [`RawReceipt`].
pub fn parse_eml(bytes: &[u8]) -> Result<RawReceipt, String> {
    let message = MessageParser::default()
        .parse(bytes)
        .ok_or_else(|| "not a parseable RFC 822 message".to_string())?;

    if message.subject().is_none() && message.from().is_none() && message.message_id().is_none() {
        return Err("message carries no RFC 822 headers".to_string());
    }

    let subject = message.subject().unwrap_or_default().to_string();
    let sender = format_sender(&message);
    let date = message
        .date()
        .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0))
        .unwrap_or_else(Utc::now);
    let source_id = message
        .message_id()
        .map(str::to_string)
        .unwrap_or_else(|| fallback_source_id(&subject, &sender, &message));

    // Only genuine text/html parts count as an HTML body; mail-parser will
    // happily synthesize HTML from plain text otherwise.
    let html_body = message.html_body.iter().find_map(|&id| {
        let part = message.part(id)?;
        if part.is_text_html() {
            part.text_contents().map(str::to_string)
        } else {
            None
        }
    });
    let text_body = message.text_body.iter().find_map(|&id| {
        let part = message.part(id)?;
        if part.is_text_html() {
            None
        } else {
            part.text_contents().map(str::to_string)
        }
    });

    let mut attachments = Vec::new();
    for part in message.attachments() {
        let content_type = part
            .content_type()
            .map(|ct| match ct.subtype() {
                Some(sub) => format!("{}/{}", ct.ctype(), sub),
                None => ct.ctype().to_string(),
            })
            .unwrap_or_else(|| "application/octet-stream".to_string())
            .to_ascii_lowercase();

        // Inline images are keyed by Content-ID so cid: references in the
        // HTML body can find them; everything else keeps its filename.
        let content_id = part
            .content_id()
            .map(|cid| cid.trim_matches(|c| c == '<' || c == '>').to_string());
        let name = part.attachment_name().map(str::to_string);
        let filename = if content_type.starts_with("image/") {
            content_id.or(name)
        } else {
            name.or(content_id)
        }
        .unwrap_or_else(|| "unnamed".to_string());

        attachments.push(Attachment {
            filename,
            content_type,
            data: part.contents().to_vec(),
        });
    }

    Ok(RawReceipt {
        source_id,
        subject,
        sender,
        date,
        html_body,
        text_body,
        attachments,
    })
}

fn format_sender(message: &mail_parser::Message) -> String {
    let Some(addr) = message.from().and_then(|a| a.first()) else {
        return String::new();
    };

    match (addr.name.as_deref(), addr.address.as_deref()) {
        (Some(name), Some(address)) => format!("{name} <{address}>"),
        (None, Some(address)) => address.to_string(),
        (Some(name), None) => name.to_string(),
        (None, None) => String::new(),
    }
}

/// Deterministic identifier for messages without a Message-ID header.
fn fallback_source_id(subject: &str, sender: &str, message: &mail_parser::Message) -> String {
    let date = message
        .date()
        .map(|d| d.to_timestamp().to_string())
        .unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(subject.as_bytes());
    hasher.update(b"|");
    hasher.update(date.as_bytes());
    hasher.update(b"|");
    hasher.update(sender.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Count of candidate message files, for source health listing.
pub fn count_messages(config: &MaildirConfig) -> Result<usize, SourceError> {
    let source = MaildirSource::new(config)?;
    if !source.root.is_dir() {
        return Err(SourceError::RootMissing(source.root.display().to_string()));
    }
    Ok(source.list_message_files()?.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    const PLAIN_EML: &[u8] = b"Message-ID: <order-1@amazon.com>\r\n\
From: Amazon <orders@amazon.com>\r\n\
Subject: Your order has shipped\r\n\
Date: Tue, 04 Mar 2025 12:00:00 +0000\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
Total: 12.00\r\n";

    const MULTIPART_EML: &[u8] = b"Message-ID: <order-2@vendor.example>\r\n\
From: billing@vendor.example\r\n\
Subject: Receipt\r\n\
Date: Tue, 04 Mar 2025 12:00:00 +0000\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"outer\"\r\n\
\r\n\
--outer\r\n\
Content-Type: text/html; charset=utf-8\r\n\
\r\n\
<p>Total: <img src=\"cid:logo@vendor\"> 42.99</p>\r\n\
--outer\r\n\
Content-Type: image/png\r\n\
Content-ID: <logo@vendor>\r\n\
Content-Disposition: inline\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
AQID\r\n\
--outer\r\n\
Content-Type: application/pdf\r\n\
Content-Disposition: attachment; filename=\"receipt.pdf\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
JVBERi0=\r\n\
--outer--\r\n";

    #[test]
    fn plain_message_parses() {
        let raw = parse_eml(PLAIN_EML).unwrap();
        assert_eq!(raw.source_id, "order-1@amazon.com");
        assert_eq!(raw.subject, "Your order has shipped");
        assert_eq!(raw.sender, "Amazon <orders@amazon.com>");
        assert!(raw.text_body.as_deref().unwrap().contains("Total: 12.00"));
        assert!(raw.html_body.is_none());
        assert!(raw.attachments.is_empty());
    }

    #[test]
    fn multipart_message_splits_body_and_attachments() {
        let raw = parse_eml(MULTIPART_EML).unwrap();
        assert!(raw.html_body.as_deref().unwrap().contains("cid:logo@vendor"));
        assert!(raw.text_body.is_none());
        assert_eq!(raw.attachments.len(), 2);

        let image = raw
            .attachments
            .iter()
            .find(|a| a.content_type == "image/png")
            .unwrap();
        assert_eq!(image.filename, "logo@vendor");
        assert_eq!(image.data, vec![1, 2, 3]);

        let pdf = raw
            .attachments
            .iter()
            .find(|a| a.content_type == "application/pdf")
            .unwrap();
        assert_eq!(pdf.filename, "receipt.pdf");
        assert_eq!(pdf.data, b"%PDF-".to_vec());
    }

    #[test]
    fn missing_message_id_gets_deterministic_hash() {
        let eml = b"From: a@b.c\r\nSubject: x\r\n\r\nbody\r\n";
        let first = parse_eml(eml).unwrap();
        let second = parse_eml(eml).unwrap();
        assert_eq!(first.source_id, second.source_id);
        assert_eq!(first.source_id.len(), 64);
    }

    #[test]
    fn garbage_is_a_parse_error() {
        assert!(parse_eml(b"this is not an email at all").is_err());
    }

    fn maildir_config(root: &Path) -> MaildirConfig {
        MaildirConfig {
            root: root.to_path_buf(),
            include_globs: vec!["**/*.eml".to_string()],
            exclude_globs: vec![],
        }
    }

    #[tokio::test]
    async fn fetch_skips_processed_and_reports_failures() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(tmp.path().join("one.eml"), PLAIN_EML).unwrap();
        std::fs::write(tmp.path().join("two.eml"), MULTIPART_EML).unwrap();
        std::fs::write(tmp.path().join("bad.eml"), b"garbage").unwrap();
        std::fs::write(tmp.path().join("ignored.txt"), b"not mail").unwrap();

        let source = MaildirSource::new(&maildir_config(tmp.path())).unwrap();

        let mut processed = HashSet::new();
        processed.insert("order-1@amazon.com".to_string());

        let batch = source.fetch_unprocessed(&processed).await.unwrap();
        assert_eq!(batch.items.len(), 1);
        assert_eq!(batch.items[0].source_id, "order-2@vendor.example");
        assert_eq!(batch.already_processed, 1);
        assert_eq!(batch.parse_failures.len(), 1);
        assert!(batch.parse_failures[0].item.ends_with("bad.eml"));
    }

    #[tokio::test]
    async fn missing_root_is_fatal() {
        let source = MaildirSource::new(&maildir_config(Path::new("/nonexistent/mail"))).unwrap();
        let err = source.fetch_unprocessed(&HashSet::new()).await.unwrap_err();
        assert!(matches!(err, SourceError::RootMissing(_)));
    }
}
