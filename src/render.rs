//! Email-to-PDF rendition building.
//!
//! Every raw receipt is normalized into exactly one reviewable PDF. The
//! strategy is a fallback chain, highest fidelity first:
//!
//! 1. an attached PDF is used verbatim — no re-rendering
//! 2. an HTML body gets its `cid:` image references inlined as data URIs
//!    and is piped through the configured external HTML-to-PDF command
//! 3. plain text (or tag-stripped HTML when stage 2 fails) is wrapped in a
//!    fixed header template and rendered to a paginated PDF
//!
//! A stage failure degrades to the next stage rather than failing the item;
//! only when even the text template cannot be produced does rendering fail.
//! The builder knows nothing about storage locations or naming.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use printpdf::{BuiltinFont, Mm, PdfDocument};
use regex::Regex;
use std::collections::HashMap;
use std::io::BufWriter;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::config::RenderConfig;
use crate::extract::strip_html_tags;
use crate::models::{Attachment, RawReceipt};

/// Wrap width for body text in the template, sized for Courier 9pt on A4
/// with 20mm margins.
const WRAP_COLS: usize = 88;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("PDF generation failed: {0}")]
    Pdf(String),

    #[error("HTML render command failed: {0}")]
    Command(String),
}

pub struct RenditionBuilder {
    html_command: Vec<String>,
    timeout: Duration,
    cid_re: Regex,
}

impl RenditionBuilder {
    pub fn new(config: &RenderConfig) -> Self {
        Self {
            html_command: config.html_command.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            // Same reference shapes as mail clients emit: cid:part1.abc@host
            cid_re: Regex::new(r#"cid:([^\s"'>]+)"#).unwrap(),
        }
    }

    /// Produce the single PDF rendition for a raw receipt.
    pub async fn render(&self, raw: &RawReceipt) -> Result<Vec<u8>, RenderError> {
        if let Some(pdf) = find_pdf_attachment(&raw.attachments) {
            tracing::debug!(source_id = %raw.source_id, "using attached PDF verbatim");
            return Ok(pdf.to_vec());
        }

        if let Some(ref html) = raw.html_body {
            if !self.html_command.is_empty() {
                let inlined = self.embed_inline_images(html, &raw.attachments);
                match self.render_html_command(&inlined).await {
                    Ok(pdf) => return Ok(pdf),
                    Err(e) => {
                        tracing::warn!(source_id = %raw.source_id, error = %e,
                            "HTML rendering failed, degrading to text template");
                    }
                }
            }
            return render_text_template(raw, &strip_html_tags(html));
        }

        let body = raw.text_body.as_deref().unwrap_or("(no body content)");
        render_text_template(raw, body)
    }

    /// Replace `cid:` references with base64 data URIs built from the
    /// message's inline image attachments. Unmatched references are left
    /// untouched.
    pub fn embed_inline_images(&self, html: &str, attachments: &[Attachment]) -> String {
        let images: HashMap<&str, &Attachment> = attachments
            .iter()
            .filter(|a| a.content_type.starts_with("image/"))
            .map(|a| (a.filename.as_str(), a))
            .collect();

        if images.is_empty() {
            return html.to_string();
        }

        self.cid_re
            .replace_all(html, |caps: &regex::Captures| match images.get(&caps[1]) {
                Some(att) => format!(
                    "data:{};base64,{}",
                    att.content_type,
                    BASE64.encode(&att.data)
                ),
                None => caps[0].to_string(),
            })
            .into_owned()
    }

    async fn render_html_command(&self, html: &str) -> Result<Vec<u8>, RenderError> {
        let (program, args) = self
            .html_command
            .split_first()
            .ok_or_else(|| RenderError::Command("no HTML command configured".into()))?;

        let mut child = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RenderError::Command(format!("failed to spawn {program}: {e}")))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| RenderError::Command("child stdin unavailable".into()))?;

        let html_owned = html.as_bytes().to_vec();
        let run = async move {
            stdin.write_all(&html_owned).await?;
            drop(stdin);
            child.wait_with_output().await
        };

        let output = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| {
                RenderError::Command(format!("timed out after {}s", self.timeout.as_secs()))
            })?
            .map_err(|e| RenderError::Command(e.to_string()))?;

        if !output.status.success() {
            return Err(RenderError::Command(format!(
                "{program} exited with {}",
                output.status
            )));
        }
        if !output.stdout.starts_with(b"%PDF-") {
            return Err(RenderError::Command(format!(
                "{program} did not produce a PDF"
            )));
        }

        Ok(output.stdout)
    }
}

fn find_pdf_attachment(attachments: &[Attachment]) -> Option<&[u8]> {
    attachments
        .iter()
        .find(|a| a.content_type.eq_ignore_ascii_case("application/pdf"))
        .map(|a| a.data.as_slice())
}

/// Render the fixed template — subject, sender, date header plus body text —
/// to a paginated PDF.
fn render_text_template(raw: &RawReceipt, body: &str) -> Result<Vec<u8>, RenderError> {
    let title = if raw.subject.is_empty() {
        "Receipt"
    } else {
        raw.subject.as_str()
    };
    let (doc, page1, layer1) = PdfDocument::new(title, Mm(210.0), Mm(297.0), "Layer 1");
    let mut layer = doc.get_page(page1).get_layer(layer1);

    let font = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(|e| RenderError::Pdf(format!("font error: {e}")))?;
    let bold = doc
        .add_builtin_font(BuiltinFont::HelveticaBold)
        .map_err(|e| RenderError::Pdf(format!("font error: {e}")))?;
    let mono = doc
        .add_builtin_font(BuiltinFont::Courier)
        .map_err(|e| RenderError::Pdf(format!("font error: {e}")))?;

    let mut y = Mm(280.0);

    layer.use_text(
        sanitize_line(&format!("Subject: {}", raw.subject)),
        11.0,
        Mm(20.0),
        y,
        &bold,
    );
    y -= Mm(6.0);
    layer.use_text(
        sanitize_line(&format!("From: {}", raw.sender)),
        9.0,
        Mm(20.0),
        y,
        &font,
    );
    y -= Mm(5.0);
    layer.use_text(
        format!("Date: {}", raw.date.format("%Y-%m-%dT%H:%M:%SZ")),
        9.0,
        Mm(20.0),
        y,
        &font,
    );
    y -= Mm(9.0);

    for raw_line in body.lines() {
        for line in wrap_line(&sanitize_line(raw_line), WRAP_COLS) {
            if y < Mm(15.0) {
                let (page, layer_idx) = doc.add_page(Mm(210.0), Mm(297.0), "Layer 1");
                layer = doc.get_page(page).get_layer(layer_idx);
                y = Mm(280.0);
            }
            layer.use_text(line, 9.0, Mm(20.0), y, &mono);
            y -= Mm(4.5);
        }
    }

    let mut buf = BufWriter::new(Vec::new());
    doc.save(&mut buf)
        .map_err(|e| RenderError::Pdf(format!("save error: {e}")))?;
    buf.into_inner()
        .map_err(|e| RenderError::Pdf(format!("buffer error: {e}")))
}

/// Builtin PDF fonts only cover WinAnsi; anything outside is substituted so
/// the render never aborts on exotic input.
fn sanitize_line(line: &str) -> String {
    line.chars()
        .map(|c| match c {
            '\t' => ' ',
            c if (c as u32) < 0x20 => ' ',
            c if (c as u32) > 0xFF => '?',
            c => c,
        })
        .collect()
}

fn wrap_line(text: &str, max_chars: usize) -> Vec<String> {
    if text.chars().count() <= max_chars {
        return vec![text.to_string()];
    }

    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        if current.chars().count() + word.chars().count() + 1 > max_chars && !current.is_empty() {
            lines.push(current.clone());
            current.clear();
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    if lines.is_empty() {
        lines.push(String::new());
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn raw_with(
        html: Option<&str>,
        text: Option<&str>,
        attachments: Vec<Attachment>,
    ) -> RawReceipt {
        RawReceipt {
            source_id: "msg-1".to_string(),
            subject: "Your receipt".to_string(),
            sender: "billing@vendor.example".to_string(),
            date: Utc.with_ymd_and_hms(2025, 3, 4, 9, 30, 0).unwrap(),
            html_body: html.map(String::from),
            text_body: text.map(String::from),
            attachments,
        }
    }

    fn builder() -> RenditionBuilder {
        RenditionBuilder::new(&RenderConfig::default())
    }

    #[tokio::test]
    async fn pdf_attachment_passes_through_verbatim() {
        let pdf = b"%PDF-1.4 fake receipt".to_vec();
        let raw = raw_with(
            Some("<p>ignored</p>"),
            None,
            vec![Attachment {
                filename: "receipt.pdf".to_string(),
                content_type: "application/pdf".to_string(),
                data: pdf.clone(),
            }],
        );

        let rendition = builder().render(&raw).await.unwrap();
        assert_eq!(rendition, pdf);
    }

    #[tokio::test]
    async fn text_body_renders_to_valid_pdf() {
        let raw = raw_with(None, Some("Total: 12.00\nThanks for shopping"), vec![]);
        let rendition = builder().render(&raw).await.unwrap();

        assert!(rendition.starts_with(b"%PDF-"));
        lopdf::Document::load_mem(&rendition).unwrap();
    }

    #[tokio::test]
    async fn missing_bodies_render_header_only_pdf() {
        let raw = raw_with(None, None, vec![]);
        let rendition = builder().render(&raw).await.unwrap();
        assert!(rendition.starts_with(b"%PDF-"));
    }

    #[tokio::test]
    async fn long_bodies_paginate() {
        let body = "line of receipt text\n".repeat(200);
        let raw = raw_with(None, Some(&body), vec![]);
        let rendition = builder().render(&raw).await.unwrap();

        let doc = lopdf::Document::load_mem(&rendition).unwrap();
        assert!(doc.get_pages().len() > 1);
    }

    #[tokio::test]
    async fn html_without_command_falls_back_to_stripped_text() {
        let raw = raw_with(Some("<p>Order total <b>42.99</b></p>"), None, vec![]);
        let rendition = builder().render(&raw).await.unwrap();
        assert!(rendition.starts_with(b"%PDF-"));
    }

    #[tokio::test]
    async fn failing_html_command_degrades_to_text_template() {
        let config = RenderConfig {
            html_command: vec!["rcpt-no-such-renderer".to_string()],
            timeout_secs: 5,
        };
        let raw = raw_with(Some("<p>Total 9.99</p>"), None, vec![]);

        let rendition = RenditionBuilder::new(&config).render(&raw).await.unwrap();
        assert!(rendition.starts_with(b"%PDF-"));
    }

    #[test]
    fn cid_references_become_data_uris() {
        let att = Attachment {
            filename: "logo@vendor".to_string(),
            content_type: "image/png".to_string(),
            data: vec![1, 2, 3],
        };
        let html = r#"<img src="cid:logo@vendor"> <img src="cid:unknown">"#;

        let inlined = builder().embed_inline_images(html, &[att]);
        assert!(inlined.contains("data:image/png;base64,AQID"));
        assert!(inlined.contains("cid:unknown"));
    }

    #[test]
    fn non_image_attachments_are_not_inlined() {
        let att = Attachment {
            filename: "doc".to_string(),
            content_type: "application/pdf".to_string(),
            data: vec![1],
        };
        let html = r#"<img src="cid:doc">"#;
        let inlined = builder().embed_inline_images(html, &[att]);
        assert_eq!(inlined, html);
    }

    #[test]
    fn sanitize_replaces_non_winansi() {
        assert_eq!(sanitize_line("tab\there"), "tab here");
        assert_eq!(sanitize_line("emoji 🧾 done"), "emoji ? done");
        assert_eq!(sanitize_line("café"), "café");
    }

    #[test]
    fn wrap_preserves_short_lines() {
        assert_eq!(wrap_line("  indented", 80), vec!["  indented".to_string()]);
    }

    #[test]
    fn wrap_splits_long_lines() {
        let long = "word ".repeat(40);
        let lines = wrap_line(long.trim(), 20);
        assert!(lines.len() > 1);
        assert!(lines.iter().all(|l| l.chars().count() <= 20));
    }
}
