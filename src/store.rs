//! Rendition file store.
//!
//! Places each rendition at a deterministic, human-readable path under a
//! store root: `{YYYY}/{MM}/{YYYY-MM-DD}__{vendor-slug}__{amount}.pdf`.
//! Callers never build paths themselves; they persist the relative path the
//! store returns and hand it back later for retrieval.

use chrono::{Datelike, NaiveDate};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::models::format_amount;

/// Maximum slug length, matching the original naming convention.
const SLUG_MAX_LEN: usize = 50;

/// Upper bound on the collision suffix loop. Hitting this means something
/// other than ordinary re-runs is writing into the store.
const MAX_COLLISION_SUFFIX: u32 = 10_000;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("file store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no free path for {0} after {MAX_COLLISION_SUFFIX} collision suffixes")]
    SuffixesExhausted(String),
}

/// Storage backend for receipt renditions.
///
/// The trait is the seam for a future non-local backend; everything above
/// it deals only in relative paths.
pub trait FileStore: Send + Sync {
    /// Store rendition bytes and return the path relative to the store
    /// root. Never returns the same relative path twice.
    fn save(
        &self,
        transaction_date: NaiveDate,
        vendor: &str,
        amount_cents: i64,
        data: &[u8],
    ) -> Result<String, StoreError>;

    /// Absolute location for a previously returned relative path.
    fn get_path(&self, relative_path: &str) -> PathBuf;

    fn exists(&self, relative_path: &str) -> bool;
}

/// Local filesystem implementation of [`FileStore`].
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl FileStore for LocalFileStore {
    fn save(
        &self,
        transaction_date: NaiveDate,
        vendor: &str,
        amount_cents: i64,
        data: &[u8],
    ) -> Result<String, StoreError> {
        let slug = vendor_slug(vendor);
        let partition = format!(
            "{}/{:02}",
            transaction_date.year(),
            transaction_date.month()
        );
        let dir = self.root.join(&partition);
        std::fs::create_dir_all(&dir)?;

        let base = format!(
            "{}__{}__{}",
            transaction_date.format("%Y-%m-%d"),
            slug,
            format_amount(amount_cents)
        );

        // Existence at write time is the collision signal; suffixes are
        // never precomputed.
        let mut filename = format!("{base}.pdf");
        let mut counter = 1u32;
        while dir.join(&filename).exists() {
            counter += 1;
            if counter > MAX_COLLISION_SUFFIX {
                return Err(StoreError::SuffixesExhausted(format!(
                    "{partition}/{base}.pdf"
                )));
            }
            filename = format!("{base}-{counter}.pdf");
        }

        atomic_write(&dir, &filename, data)?;
        Ok(format!("{partition}/{filename}"))
    }

    fn get_path(&self, relative_path: &str) -> PathBuf {
        self.root.join(relative_path)
    }

    fn exists(&self, relative_path: &str) -> bool {
        self.get_path(relative_path).exists()
    }
}

/// Write-then-rename so a concurrent reader never observes a partial file.
fn atomic_write(dir: &Path, filename: &str, data: &[u8]) -> Result<(), StoreError> {
    let tmp = dir.join(format!(".{filename}.part"));
    std::fs::write(&tmp, data)?;
    match std::fs::rename(&tmp, dir.join(filename)) {
        Ok(()) => Ok(()),
        Err(e) => {
            let _ = std::fs::remove_file(&tmp);
            Err(e.into())
        }
    }
}

/// Normalize a vendor name to a filesystem-safe slug: lowercase, runs of
/// non-alphanumerics collapsed to single hyphens, capped at 50 chars.
pub fn vendor_slug(vendor: &str) -> String {
    let mut slug = String::with_capacity(vendor.len());
    let mut pending_hyphen = false;

    for ch in vendor.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_hyphen = true;
        }
    }

    slug.truncate(SLUG_MAX_LEN);
    while slug.ends_with('-') {
        slug.pop();
    }

    if slug.is_empty() {
        "unknown".to_string()
    } else {
        slug
    }
}
