use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub store: StoreConfig,
    #[serde(default)]
    pub source: SourceConfig,
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub render: RenderConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// Root directory for stored PDF renditions. All paths persisted in the
    /// database are relative to this root.
    pub root: PathBuf,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SourceConfig {
    pub maildir: Option<MaildirConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MaildirConfig {
    /// Folder holding raw RFC 822 messages (.eml files).
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.eml".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    pub model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Extractions below this confidence are flagged for manual review in
    /// the run summary. They are still persisted.
    #[serde(default = "default_review_threshold")]
    pub review_threshold: f64,
    /// Upper bound on attachment text included in the extraction context.
    #[serde(default = "default_max_attachment_chars")]
    pub max_attachment_chars: usize,
}

fn default_endpoint() -> String {
    "http://localhost:11434".to_string()
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    3
}
fn default_review_threshold() -> f64 {
    0.5
}
fn default_max_attachment_chars() -> usize {
    4000
}

#[derive(Debug, Deserialize, Clone)]
pub struct RenderConfig {
    /// External HTML-to-PDF command reading HTML on stdin and writing PDF to
    /// stdout, e.g. `["wkhtmltopdf", "--quiet", "-", "-"]`. When empty, HTML
    /// bodies are tag-stripped and rendered through the text template.
    #[serde(default)]
    pub html_command: Vec<String>,
    #[serde(default = "default_render_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            html_command: Vec::new(),
            timeout_secs: default_render_timeout_secs(),
        }
    }
}

fn default_render_timeout_secs() -> u64 {
    30
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.extraction.model.trim().is_empty() {
        anyhow::bail!("extraction.model must not be empty");
    }

    if config.extraction.timeout_secs == 0 {
        anyhow::bail!("extraction.timeout_secs must be > 0");
    }

    if !(0.0..=1.0).contains(&config.extraction.review_threshold) {
        anyhow::bail!("extraction.review_threshold must be in [0.0, 1.0]");
    }

    if config.render.timeout_secs == 0 {
        anyhow::bail!("render.timeout_secs must be > 0");
    }

    if let Some(ref maildir) = config.source.maildir {
        if maildir.include_globs.is_empty() {
            anyhow::bail!("source.maildir.include_globs must not be empty");
        }
    }

    Ok(config)
}
