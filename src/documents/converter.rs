//! Document to text conversion
//!
//! Dispatches on the URI scheme or file extension. Unsupported sources are
//! skipped rather than treated as errors.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;

use crate::documents::DocumentError;

/// Packaged office formats: a zip archive of XML parts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfficeFormat {
    Docx,
    Pptx,
    Odt,
    Odp,
}

/// Converter selected for a source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Pdf,
    Office(OfficeFormat),
    Html,
    Url,
    Csv,
    PlainText,
}

impl SourceKind {
    /// `None` means the source is not supported
    pub fn detect(source: &str) -> Option<SourceKind> {
        let lower = source.to_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            return Some(SourceKind::Url);
        }

        let extension = Path::new(&lower)
            .extension()
            .map(|e| e.to_string_lossy().into_owned())?;
        match extension.as_str() {
            "pdf" => Some(SourceKind::Pdf),
            "docx" => Some(SourceKind::Office(OfficeFormat::Docx)),
            "pptx" => Some(SourceKind::Office(OfficeFormat::Pptx)),
            "odt" => Some(SourceKind::Office(OfficeFormat::Odt)),
            "odp" => Some(SourceKind::Office(OfficeFormat::Odp)),
            "html" | "htm" => Some(SourceKind::Html),
            "csv" => Some(SourceKind::Csv),
            "txt" | "md" => Some(SourceKind::PlainText),
            _ => None,
        }
    }
}

/// Extract the text of one source. `Ok(None)` means the source was skipped.
pub fn convert(source: &str) -> Result<Option<String>, DocumentError> {
    let Some(kind) = SourceKind::detect(source) else {
        tracing::debug!("Skipping unsupported document {}", source);
        return Ok(None);
    };

    let text = match kind {
        SourceKind::Url => fetch_url(source)?,
        SourceKind::Pdf => pdf_extract::extract_text(source).map_err(|e| {
            DocumentError::Malformed {
                path: PathBuf::from(source),
                reason: e.to_string(),
            }
        })?,
        SourceKind::Office(format) => office_text(Path::new(source), format)?,
        SourceKind::Html => html_to_text(&read_file(source)?)?,
        SourceKind::Csv => csv_text(Path::new(source))?,
        SourceKind::PlainText => read_file(source)?,
    };
    Ok(Some(text))
}

fn read_file(source: &str) -> Result<String, DocumentError> {
    std::fs::read_to_string(source).map_err(|e| DocumentError::Io {
        path: PathBuf::from(source),
        source: e,
    })
}

fn fetch_url(url: &str) -> Result<String, DocumentError> {
    let fetch_error = |reason: String| DocumentError::Fetch {
        url: url.to_string(),
        reason,
    };

    let response = reqwest::blocking::get(url).map_err(|e| fetch_error(e.to_string()))?;
    if !response.status().is_success() {
        return Err(fetch_error(format!("HTTP {}", response.status())));
    }
    let body = response.text().map_err(|e| fetch_error(e.to_string()))?;
    html_to_text(&body)
}

/// Strip markup from an HTML page
pub fn html_to_text(html: &str) -> Result<String, DocumentError> {
    let pattern_error = |e: regex::Error| DocumentError::Pattern(e.to_string());

    let hidden = Regex::new(r"(?is)<(script|style|head)\b.*?</(script|style|head)\s*>")
        .map_err(pattern_error)?;
    let block = Regex::new(r"(?i)<(br|p|div|h[1-6]|li|tr|/p|/div|/h[1-6]|/li|/tr)\b[^>]*>")
        .map_err(pattern_error)?;
    let tag = Regex::new(r"(?s)<[^>]*>").map_err(pattern_error)?;
    let spaces = Regex::new(r"[ \t\r\f]+").map_err(pattern_error)?;
    let blank_lines = Regex::new(r"\n\s*\n\s*(\n\s*)+").map_err(pattern_error)?;

    let text = hidden.replace_all(html, "");
    let text = block.replace_all(&text, "\n");
    let text = tag.replace_all(&text, "");
    let text = decode_entities(&text);
    let text = spaces.replace_all(&text, " ");
    let text = blank_lines.replace_all(&text, "\n\n");

    Ok(text
        .lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string())
}

fn decode_entities(text: &str) -> String {
    // &amp; last so "&amp;lt;" stays "&lt;"
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Element names carrying text in one office XML dialect
struct Markup {
    paragraph: &'static [&'static str],
    /// Text runs; empty means any text inside a paragraph
    run: &'static [&'static str],
    tab: &'static [&'static str],
    line_break: &'static [&'static str],
    space: &'static [&'static str],
}

const WORDPROCESSING: Markup = Markup {
    paragraph: &["w:p"],
    run: &["w:t"],
    tab: &["w:tab"],
    line_break: &["w:br", "w:cr"],
    space: &[],
};

const PRESENTATION: Markup = Markup {
    paragraph: &["a:p"],
    run: &["a:t"],
    tab: &[],
    line_break: &["a:br"],
    space: &[],
};

const OPEN_DOCUMENT: Markup = Markup {
    paragraph: &["text:p", "text:h"],
    run: &[],
    tab: &["text:tab"],
    line_break: &["text:line-break"],
    space: &["text:s"],
};

fn office_text(path: &Path, format: OfficeFormat) -> Result<String, DocumentError> {
    let malformed = |reason: String| DocumentError::Malformed {
        path: path.to_path_buf(),
        reason,
    };

    let file = File::open(path).map_err(|e| DocumentError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| malformed(e.to_string()))?;

    let (parts, markup) = match format {
        OfficeFormat::Docx => (vec!["word/document.xml".to_string()], &WORDPROCESSING),
        OfficeFormat::Pptx => (slide_parts(archive.file_names())?, &PRESENTATION),
        OfficeFormat::Odt | OfficeFormat::Odp => {
            (vec!["content.xml".to_string()], &OPEN_DOCUMENT)
        }
    };

    let mut text = String::new();
    for part in parts {
        let mut xml = String::new();
        archive
            .by_name(&part)
            .map_err(|e| malformed(format!("{part}: {e}")))?
            .read_to_string(&mut xml)
            .map_err(|e| malformed(format!("{part}: {e}")))?;
        let part_text = xml_text(&xml, markup).map_err(|e| malformed(format!("{part}: {e}")))?;
        if !part_text.is_empty() {
            if !text.is_empty() {
                text.push_str("\n\n");
            }
            text.push_str(&part_text);
        }
    }
    Ok(text)
}

/// Slide parts in presentation order
fn slide_parts<'a>(names: impl Iterator<Item = &'a str>) -> Result<Vec<String>, DocumentError> {
    let slide = Regex::new(r"^ppt/slides/slide(\d+)\.xml$")
        .map_err(|e| DocumentError::Pattern(e.to_string()))?;

    let mut slides: Vec<(u32, String)> = names
        .filter_map(|name| {
            let number = slide.captures(name)?.get(1)?.as_str().parse().ok()?;
            Some((number, name.to_string()))
        })
        .collect();
    slides.sort();
    Ok(slides.into_iter().map(|(_, name)| name).collect())
}

/// Text of an office XML part, one paragraph per line
fn xml_text(xml: &str, markup: &Markup) -> Result<String, String> {
    let mut reader = Reader::from_str(xml);
    let mut out = String::new();
    let mut paragraph_depth = 0usize;
    let mut run_depth = 0usize;

    loop {
        match reader.read_event().map_err(|e| e.to_string())? {
            Event::Start(e) => {
                let name = element_name(e.name().as_ref());
                if is_one_of(markup.paragraph, &name) {
                    paragraph_depth += 1;
                } else if is_one_of(markup.run, &name) {
                    run_depth += 1;
                }
            }
            Event::End(e) => {
                let name = element_name(e.name().as_ref());
                if is_one_of(markup.paragraph, &name) {
                    paragraph_depth = paragraph_depth.saturating_sub(1);
                    out.push('\n');
                } else if is_one_of(markup.run, &name) {
                    run_depth = run_depth.saturating_sub(1);
                }
            }
            Event::Empty(e) if paragraph_depth > 0 => {
                let name = element_name(e.name().as_ref());
                if is_one_of(markup.tab, &name) {
                    out.push('\t');
                } else if is_one_of(markup.line_break, &name) {
                    out.push('\n');
                } else if is_one_of(markup.space, &name) {
                    out.push(' ');
                }
            }
            Event::Empty(e) => {
                // An empty paragraph outside any other paragraph is a blank line
                let name = element_name(e.name().as_ref());
                if is_one_of(markup.paragraph, &name) {
                    out.push('\n');
                }
            }
            Event::Text(t) => {
                let in_run = markup.run.is_empty() || run_depth > 0;
                if paragraph_depth > 0 && in_run {
                    out.push_str(&t.unescape().map_err(|e| e.to_string())?);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(out.trim_end().to_string())
}

fn element_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).into_owned()
}

fn is_one_of(names: &[&str], name: &str) -> bool {
    names.iter().any(|n| *n == name)
}

/// One "header: value" line per field, rows separated by a blank line
fn csv_text(path: &Path) -> Result<String, DocumentError> {
    let malformed = |e: csv::Error| DocumentError::Malformed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };

    let mut reader = csv::Reader::from_path(path).map_err(malformed)?;
    let headers = reader.headers().map_err(malformed)?.clone();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(malformed)?;
        let row: Vec<String> = headers
            .iter()
            .zip(record.iter())
            .map(|(header, value)| format!("{}: {}", header.trim(), value.trim()))
            .collect();
        rows.push(row.join("\n"));
    }
    Ok(rows.join("\n\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_zip(path: &Path, parts: &[(&str, &str)]) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        for (name, content) in parts {
            zip.start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn test_detect_source_kind() {
        assert_eq!(SourceKind::detect("https://example.com/page"), Some(SourceKind::Url));
        assert_eq!(SourceKind::detect("/docs/report.PDF"), Some(SourceKind::Pdf));
        assert_eq!(
            SourceKind::detect("slides.odp"),
            Some(SourceKind::Office(OfficeFormat::Odp))
        );
        assert_eq!(SourceKind::detect("index.htm"), Some(SourceKind::Html));
        assert_eq!(SourceKind::detect("legacy.doc"), None);
        assert_eq!(SourceKind::detect("no_extension"), None);
    }

    #[test]
    fn test_unsupported_source_is_skipped() {
        assert!(convert("/nowhere/archive.tar.gz").unwrap().is_none());
    }

    #[test]
    fn test_plain_text_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "line one\nline two\n").unwrap();
        let text = convert(path.to_str().unwrap()).unwrap().unwrap();
        assert_eq!(text, "line one\nline two\n");
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(matches!(
            convert("/nowhere/notes.txt"),
            Err(DocumentError::Io { .. })
        ));
    }

    #[test]
    fn test_html_to_text() {
        let html = r#"<html><head><title>T</title><style>p { color: red; }</style></head>
            <body><h1>Title</h1><p>First &amp; only <b>paragraph</b>.</p>
            <script>alert("x")</script><ul><li>one</li><li>two</li></ul></body></html>"#;
        let text = html_to_text(html).unwrap();
        assert!(text.starts_with("Title"));
        assert!(text.contains("First & only paragraph."));
        assert!(text.contains("one\ntwo") || text.contains("one\n\ntwo"));
        assert!(!text.contains("alert"));
        assert!(!text.contains("color"));
    }

    #[test]
    fn test_docx_paragraphs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memo.docx");
        write_zip(
            &path,
            &[(
                "word/document.xml",
                r#"<?xml version="1.0"?><w:document xmlns:w="w"><w:body>
                <w:p><w:r><w:t>Hello</w:t></w:r><w:r><w:t xml:space="preserve"> world</w:t></w:r></w:p>
                <w:p><w:r><w:t>A &amp; B</w:t><w:tab/><w:t>C</w:t></w:r></w:p>
                </w:body></w:document>"#,
            )],
        );

        let text = convert(path.to_str().unwrap()).unwrap().unwrap();
        let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
        assert_eq!(lines, ["Hello world", "A & B\tC"]);
    }

    #[test]
    fn test_pptx_slides_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deck.pptx");
        let slide = |text: &str| {
            format!(r#"<p:sld xmlns:a="a" xmlns:p="p"><a:p><a:r><a:t>{text}</a:t></a:r></a:p></p:sld>"#)
        };
        let (s1, s2, s10) = (slide("first"), slide("second"), slide("tenth"));
        write_zip(
            &path,
            &[
                ("ppt/slides/slide10.xml", s10.as_str()),
                ("ppt/slides/slide2.xml", s2.as_str()),
                ("ppt/slides/slide1.xml", s1.as_str()),
                ("ppt/presentation.xml", "<p:presentation/>"),
            ],
        );

        let text = convert(path.to_str().unwrap()).unwrap().unwrap();
        assert_eq!(text, "first\n\nsecond\n\ntenth");
    }

    #[test]
    fn test_odt_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("letter.odt");
        write_zip(
            &path,
            &[(
                "content.xml",
                r#"<office:document-content xmlns:office="o" xmlns:text="t"><office:body><office:text>
                <text:h>Heading</text:h><text:p>Some<text:s/>text<text:line-break/>more</text:p>
                </office:text></office:body></office:document-content>"#,
            )],
        );

        let text = convert(path.to_str().unwrap()).unwrap().unwrap();
        assert_eq!(text, "Heading\nSome text\nmore");
    }

    #[test]
    fn test_corrupt_office_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.docx");
        std::fs::write(&path, b"not a zip").unwrap();
        assert!(matches!(
            convert(path.to_str().unwrap()),
            Err(DocumentError::Malformed { .. })
        ));
    }

    #[test]
    fn test_csv_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("people.csv");
        std::fs::write(&path, "name,role\nAda,engineer\nGrace, admiral\n").unwrap();
        let text = convert(path.to_str().unwrap()).unwrap().unwrap();
        assert_eq!(text, "name: Ada\nrole: engineer\n\nname: Grace\nrole: admiral");
    }
}
