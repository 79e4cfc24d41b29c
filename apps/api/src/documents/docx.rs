//! Minimal WordprocessingML writer: one paragraph per line of resume text.

use std::io::{Cursor, Read, Write};

use bytes::Bytes;
use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub const DOCX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

const DOCUMENT_PART: &str = "word/document.xml";
const TEXT_OPEN: &str = r#"<w:t xml:space="preserve">"#;
const TEXT_CLOSE: &str = "</w:t>";
const PARAGRAPH_OPEN: &str = "<w:p>";
const PARAGRAPH_CLOSE: &str = "</w:p>";

const CONTENT_TYPES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/></Types>"#;

const ROOT_RELS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/></Relationships>"#;

const DOCUMENT_HEAD: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>"#;
const DOCUMENT_TAIL: &str = "<w:sectPr/></w:body></w:document>";

#[derive(Debug, Error)]
pub enum DocxError {
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Renders plain text into a `.docx` package.
pub fn render(text: &str) -> Result<Bytes, DocxError> {
    let parts = [
        ("[Content_Types].xml", CONTENT_TYPES_XML.to_string()),
        ("_rels/.rels", ROOT_RELS_XML.to_string()),
        (DOCUMENT_PART, document_xml(text)),
    ];

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, body) in parts {
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        writer.start_file(name, options)?;
        writer.write_all(body.as_bytes())?;
    }
    let cursor = writer.finish()?;
    Ok(Bytes::from(cursor.into_inner()))
}

/// Reads the paragraph text back out of a package produced by [`render`].
pub fn extract_text(package: &[u8]) -> Result<String, DocxError> {
    let mut archive = ZipArchive::new(Cursor::new(package))?;
    let mut xml = String::new();
    archive.by_name(DOCUMENT_PART)?.read_to_string(&mut xml)?;

    let paragraphs = xml
        .split(PARAGRAPH_OPEN)
        .skip(1)
        .map(|chunk| {
            let paragraph = chunk.split(PARAGRAPH_CLOSE).next().unwrap_or_default();
            paragraph
                .split(TEXT_OPEN)
                .skip(1)
                .filter_map(|run| run.split(TEXT_CLOSE).next())
                .map(unescape_xml)
                .collect::<String>()
        })
        .collect::<Vec<_>>();

    Ok(paragraphs.join("\n"))
}

fn document_xml(text: &str) -> String {
    let mut xml = String::with_capacity(DOCUMENT_HEAD.len() + text.len() * 2);
    xml.push_str(DOCUMENT_HEAD);
    for line in text.split('\n') {
        xml.push_str(PARAGRAPH_OPEN);
        xml.push_str("<w:r>");
        xml.push_str(TEXT_OPEN);
        xml.push_str(&escape_xml(line));
        xml.push_str(TEXT_CLOSE);
        xml.push_str("</w:r>");
        xml.push_str(PARAGRAPH_CLOSE);
    }
    xml.push_str(DOCUMENT_TAIL);
    xml
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

// &amp; goes last so "&amp;lt;" decodes to "&lt;", not "<".
fn unescape_xml(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
