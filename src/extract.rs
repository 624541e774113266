//! Text extraction for uploaded files.
//!
//! Plain text and markdown pass through. PDF pages and PPTX slides are
//! joined with [`PAGE_BREAK`] so the chunker can recover page numbers;
//! DOCX paragraphs are joined with blank lines.

use std::io::{Cursor, Read};

use hierarag_core::chunk::PAGE_BREAK;
use quick_xml::events::Event;
use thiserror::Error;

pub const MIME_TEXT: &str = "text/plain";
pub const MIME_MARKDOWN: &str = "text/markdown";
pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_PPTX: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";

/// Cap on decompressed bytes read from one ZIP entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("office document extraction failed: {0}")]
    Ooxml(String),
}

/// Text pulled out of a file, plus its page count when the format has pages.
#[derive(Debug, Clone, PartialEq)]
pub struct Extracted {
    pub text: String,
    pub pages: Option<u32>,
}

/// Content type from a file extension, `None` when unsupported.
pub fn content_type_for(path: &std::path::Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "txt" | "text" | "rst" => Some(MIME_TEXT),
        "md" | "markdown" => Some(MIME_MARKDOWN),
        "pdf" => Some(MIME_PDF),
        "docx" => Some(MIME_DOCX),
        "pptx" => Some(MIME_PPTX),
        _ => None,
    }
}

pub fn extract_text(bytes: &[u8], content_type: &str) -> Result<Extracted, ExtractError> {
    match content_type {
        MIME_TEXT | MIME_MARKDOWN => Ok(Extracted {
            text: String::from_utf8_lossy(bytes).into_owned(),
            pages: None,
        }),
        MIME_PDF => extract_pdf(bytes),
        MIME_DOCX => extract_docx(bytes),
        MIME_PPTX => extract_pptx(bytes),
        other => Err(ExtractError::UnsupportedContentType(other.to_string())),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<Extracted, ExtractError> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| ExtractError::Pdf(e.to_string()))?;
    Ok(join_pages(pages.iter().map(|p| p.trim().to_string())))
}

fn join_pages(pages: impl Iterator<Item = String>) -> Extracted {
    let pages: Vec<String> = pages.collect();
    Extracted {
        pages: Some(pages.len() as u32),
        text: pages.join(PAGE_BREAK),
    }
}

fn open_zip(bytes: &[u8]) -> Result<zip::ZipArchive<Cursor<&[u8]>>, ExtractError> {
    zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| ExtractError::Ooxml(e.to_string()))
}

fn read_entry(
    archive: &mut zip::ZipArchive<Cursor<&[u8]>>,
    name: &str,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Ooxml(format!("{} exceeds size limit", name)));
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> Result<Extracted, ExtractError> {
    let mut archive = open_zip(bytes)?;
    let xml = read_entry(&mut archive, "word/document.xml")?;
    let paragraphs = text_blocks(&xml, b"p")?;
    Ok(Extracted {
        text: paragraphs.join("\n\n"),
        pages: None,
    })
}

fn extract_pptx(bytes: &[u8]) -> Result<Extracted, ExtractError> {
    let mut archive = open_zip(bytes)?;
    let mut slides: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|n| {
            let num = n.strip_prefix("ppt/slides/slide")?.strip_suffix(".xml")?;
            Some((num.parse().ok()?, n.to_string()))
        })
        .collect();
    slides.sort();

    let mut texts = Vec::with_capacity(slides.len());
    for (_, name) in &slides {
        let xml = read_entry(&mut archive, name)?;
        texts.push(text_blocks(&xml, b"p")?.join("\n"));
    }
    Ok(join_pages(texts.into_iter()))
}

/// Collect `<t>` runs, one string per `block` element (`w:p` or `a:p`).
/// Empty blocks are skipped.
fn text_blocks(xml: &[u8], block: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut blocks = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(t)) if in_text => {
                let s = t.unescape().map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                current.push_str(&s);
            }
            Ok(Event::End(e)) => {
                let name = e.local_name();
                if name.as_ref() == b"t" {
                    in_text = false;
                } else if name.as_ref() == block {
                    let text = current.trim();
                    if !text.is_empty() {
                        blocks.push(text.to_string());
                    }
                    current.clear();
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    let tail = current.trim();
    if !tail.is_empty() {
        blocks.push(tail.to_string());
    }
    Ok(blocks)
}
