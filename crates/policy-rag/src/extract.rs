//! Text extraction for policy documents.
//!
//! | Extension | Method |
//! |-----------|--------|
//! | `.pdf`  | `pdf-extract`, one `--- Page N ---` marker per page |
//! | `.docx` | `word/document.xml` via `zip` + `quick-xml`, one line per paragraph |
//! | `.txt`, `.md` | UTF-8, falling back to Latin-1 |
//!
//! Extraction never panics on malformed input; the caller skips the file.

use std::io::Read;
use std::path::Path;

use quick_xml::events::Event;

/// File extensions accepted for ingestion, lowercase and without the dot.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["pdf", "txt", "md", "docx"];

/// Upper bound on the decompressed size of `word/document.xml`.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug)]
pub enum ExtractError {
    Unsupported(String),
    Pdf(String),
    Docx(String),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::Unsupported(ext) => write!(f, "unsupported file type: {}", ext),
            ExtractError::Pdf(e) => write!(f, "PDF extraction failed: {}", e),
            ExtractError::Docx(e) => write!(f, "DOCX extraction failed: {}", e),
        }
    }
}

impl std::error::Error for ExtractError {}

/// Lowercase extension of `path`, if it has one.
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

pub fn is_supported(path: &Path) -> bool {
    extension_of(path).is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
}

/// Extract plain text from `bytes`, dispatching on the extension of `path`.
pub fn extract_text(path: &Path, bytes: &[u8]) -> Result<String, ExtractError> {
    let ext = extension_of(path).unwrap_or_default();
    match ext.as_str() {
        "pdf" => extract_pdf(bytes),
        "docx" => extract_docx(bytes),
        "txt" | "md" => Ok(decode_text(bytes)),
        _ => Err(ExtractError::Unsupported(if ext.is_empty() {
            path.display().to_string()
        } else {
            format!(".{}", ext)
        })),
    }
}

/// UTF-8 when valid, otherwise each byte as its Latin-1 code point.
pub fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| ExtractError::Pdf(e.to_string()))?;
    Ok(join_pages(&pages))
}

fn join_pages(pages: &[String]) -> String {
    let mut out = String::new();
    for (i, page) in pages.iter().enumerate() {
        if page.trim().is_empty() {
            continue;
        }
        out.push_str(&format!("\n--- Page {} ---\n", i + 1));
        out.push_str(page);
    }
    out
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|e| ExtractError::Docx(format!("word/document.xml: {}", e)))?;

    let mut xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut xml)
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    if xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Docx(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }
    paragraphs_from_document_xml(&xml)
}

/// Concatenate `w:t` runs, ending each `w:p` with a newline. Empty paragraphs
/// are dropped.
fn paragraphs_from_document_xml(xml: &[u8]) -> Result<String, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut out = String::new();
    let mut paragraph = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let line = paragraph.trim();
                    if !line.is_empty() {
                        out.push_str(line);
                        out.push('\n');
                    }
                    paragraph.clear();
                }
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => paragraph.push('\t'),
                b"br" => paragraph.push(' '),
                _ => {}
            },
            Ok(Event::Text(t)) if in_text => {
                let text = t.unescape().map_err(|e| ExtractError::Docx(e.to_string()))?;
                paragraph.push_str(&text);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Docx(e.to_string())),
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

    fn docx_with(document_xml: &str) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        writer
            .start_file(
                "word/document.xml",
                zip::write::SimpleFileOptions::default(),
            )
            .unwrap();
        writer.write_all(document_xml.as_bytes()).unwrap();
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_docx_paragraphs_become_lines() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:body>
    <w:p><w:r><w:t>LEAVE POLICY</w:t></w:r></w:p>
    <w:p><w:r><w:t xml:space="preserve">Employees accrue </w:t></w:r><w:r><w:t>1.5 days &amp; more.</w:t></w:r></w:p>
    <w:p></w:p>
  </w:body>
</w:document>"#;
        let text = extract_text(Path::new("handbook.docx"), &docx_with(xml)).unwrap();
        assert_eq!(text, "LEAVE POLICY\nEmployees accrue 1.5 days & more.\n");
    }

    #[test]
    fn test_docx_without_document_xml_fails() {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        writer
            .start_file("word/styles.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"<styles/>").unwrap();
        let bytes = writer.finish().unwrap().into_inner();

        let err = extract_text(Path::new("x.docx"), &bytes).unwrap_err();
        assert!(matches!(err, ExtractError::Docx(_)));
    }

    #[test]
    fn test_invalid_zip_is_an_error() {
        let err = extract_text(Path::new("broken.docx"), b"not a zip").unwrap_err();
        assert!(err.to_string().starts_with("DOCX extraction failed"));
    }

    #[test]
    fn test_invalid_pdf_is_an_error() {
        let err = extract_text(Path::new("broken.pdf"), b"not a pdf").unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn test_text_falls_back_to_latin1() {
        assert_eq!(decode_text("caf\u{e9}".as_bytes()), "café");
        assert_eq!(decode_text(&[b'c', b'a', b'f', 0xE9]), "café");
    }

    #[test]
    fn test_markdown_passes_through() {
        let text = extract_text(Path::new("notes.MD"), b"# Travel\n\nBook early.").unwrap();
        assert_eq!(text, "# Travel\n\nBook early.");
    }

    #[test]
    fn test_unsupported_extension() {
        let err = extract_text(Path::new("sheet.xlsx"), b"").unwrap_err();
        assert_eq!(err.to_string(), "unsupported file type: .xlsx");
        assert!(!is_supported(Path::new("sheet.xlsx")));
        assert!(is_supported(Path::new("Policy.PDF")));
    }

    #[test]
    fn test_page_markers_skip_blank_pages() {
        let pages = vec!["First page".to_string(), "  \n".to_string(), "Third".to_string()];
        assert_eq!(
            join_pages(&pages),
            "\n--- Page 1 ---\nFirst page\n--- Page 3 ---\nThird"
        );
    }
}
