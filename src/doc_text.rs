//! Text extraction from document attachments (PDF, DOCX).
//!
//! Receipts frequently arrive as an attached PDF or Word document with a
//! near-empty email body; the extraction context is only useful if it
//! includes that text. Attachments supply bytes + content-type; this module
//! returns plain UTF-8 text for the context builder to excerpt.

use std::io::Read;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Maximum decompressed bytes read from a single ZIP entry (zip-bomb guard).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum DocTextError {
    #[error("unsupported content-type: {0}")]
    UnsupportedContentType(String),

    #[error("PDF text extraction failed: {0}")]
    Pdf(String),

    #[error("DOCX text extraction failed: {0}")]
    Docx(String),
}

/// True when an attachment's content type carries extractable text.
pub fn is_document(content_type: &str) -> bool {
    matches!(content_type, MIME_PDF | MIME_DOCX)
}

/// Extract plain text from an attached document. Failures are local to the
/// attachment: the caller drops the excerpt and keeps building context.
pub fn extract_text(bytes: &[u8], content_type: &str) -> Result<String, DocTextError> {
    match content_type {
        MIME_PDF => extract_pdf(bytes),
        MIME_DOCX => extract_docx(bytes),
        _ => Err(DocTextError::UnsupportedContentType(
            content_type.to_string(),
        )),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, DocTextError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| DocTextError::Pdf(e.to_string()))
}

fn extract_docx(bytes: &[u8]) -> Result<String, DocTextError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| DocTextError::Docx(e.to_string()))?;

    let entry = archive
        .by_name("word/document.xml")
        .map_err(|e| DocTextError::Docx(e.to_string()))?;

    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(|e| DocTextError::Docx(e.to_string()))?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(DocTextError::Docx(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }

    extract_text_runs(&doc_xml)
}

/// Collect the contents of `w:t` text runs, separating paragraphs with
/// newlines so amounts and line items don't fuse together.
fn extract_text_runs(xml: &[u8]) -> Result<String, DocTextError> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    if let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf)
                    {
                        out.push_str(te.unescape().unwrap_or_default().as_ref());
                    }
                }
            }
            Ok(quick_xml::events::Event::End(e)) => {
                if e.local_name().as_ref() == b"p" && !out.ends_with('\n') && !out.is_empty() {
                    out.push('\n');
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(DocTextError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn docx_with_paragraphs(paragraphs: &[&str]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
                .unwrap();
            let body: String = paragraphs
                .iter()
                .map(|p| format!("<w:p><w:r><w:t>{p}</w:t></w:r></w:p>"))
                .collect();
            let xml = format!(
                "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{body}</w:body></w:document>"
            );
            zip.write_all(xml.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn unsupported_content_type_is_an_error() {
        let err = extract_text(b"foo", "image/png").unwrap_err();
        assert!(matches!(err, DocTextError::UnsupportedContentType(_)));
    }

    #[test]
    fn invalid_pdf_is_an_error() {
        let err = extract_text(b"not a pdf", MIME_PDF).unwrap_err();
        assert!(matches!(err, DocTextError::Pdf(_)));
    }

    #[test]
    fn invalid_zip_is_an_error_for_docx() {
        let err = extract_text(b"not a zip", MIME_DOCX).unwrap_err();
        assert!(matches!(err, DocTextError::Docx(_)));
    }

    #[test]
    fn docx_paragraphs_come_out_on_separate_lines() {
        let bytes = docx_with_paragraphs(&["Invoice 42", "Total: 12.00"]);
        let text = extract_text(&bytes, MIME_DOCX).unwrap();
        assert_eq!(text, "Invoice 42\nTotal: 12.00\n");
    }

    #[test]
    fn document_type_detection() {
        assert!(is_document(MIME_PDF));
        assert!(is_document(MIME_DOCX));
        assert!(!is_document("image/jpeg"));
        assert!(!is_document("text/plain"));
    }
}
