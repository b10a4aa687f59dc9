//! Import: extract plain text from the source document.
//!
//! `.txt` files are read as UTF-8. `.docx` files are zip containers; the
//! body lives in `word/document.xml` and style names in `word/styles.xml`.
//! Paragraphs come out separated by a blank line (the segmenter's paragraph
//! boundary) and Heading 1–4 paragraphs get Markdown `#` prefixes so later
//! stages can find the document structure.

use crate::error::ToolkitError;
use crate::manifest::JobManifest;
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const WORD_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";

/// Name of the extracted text file inside `input/`.
pub const SOURCE_TEXT_FILE: &str = "source.txt";

/// Run the Import step: extract the job's input into `input/source.txt`.
pub fn import_source(job: &mut JobManifest) -> Result<PathBuf, ToolkitError> {
    let text = extract_text(&job.input_path)?;
    if text.trim().is_empty() {
        return Err(ToolkitError::EmptyDocument {
            path: job.input_path.clone(),
        });
    }

    let dir = job.output_root.join("input");
    std::fs::create_dir_all(&dir).map_err(|e| ToolkitError::io(&dir, e))?;
    let out = dir.join(SOURCE_TEXT_FILE);
    std::fs::write(&out, &text).map_err(|e| ToolkitError::io(&out, e))?;

    job.source_text_path = Some(out.clone());
    Ok(out)
}

/// Read the text written by the Import step.
pub fn load_source_text(job: &JobManifest) -> Result<String, ToolkitError> {
    let path = job
        .source_text_path
        .as_ref()
        .ok_or_else(|| ToolkitError::MissingArtifact {
            what: "extracted source text (Import step)".into(),
        })?;
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ToolkitError::MissingArtifact {
            what: format!("extracted source text '{}'", path.display()),
        }),
        Err(e) => Err(ToolkitError::io(path, e)),
    }
}

/// Extract the text of a `.txt` or `.docx` file.
pub fn extract_text(path: &Path) -> Result<String, ToolkitError> {
    if !path.is_file() {
        return Err(ToolkitError::InputNotFound {
            path: path.to_path_buf(),
        });
    }

    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    let text = match ext.as_str() {
        "txt" => read_plain_text(path)?,
        "docx" => extract_docx(path)?,
        _ => {
            return Err(ToolkitError::UnsupportedInput {
                path: path.to_path_buf(),
                ext: format!(".{ext}"),
            })
        }
    };

    info!("Extracted {} chars from {}", text.chars().count(), path.display());
    Ok(text)
}

fn read_plain_text(path: &Path) -> Result<String, ToolkitError> {
    let bytes = std::fs::read(path).map_err(|e| ToolkitError::io(path, e))?;
    let text = String::from_utf8_lossy(&bytes);
    Ok(text.strip_prefix('\u{FEFF}').unwrap_or(&text).to_string())
}

fn extract_docx(path: &Path) -> Result<String, ToolkitError> {
    let invalid = |detail: String| ToolkitError::InvalidDocx {
        path: path.to_path_buf(),
        detail,
    };

    let file = std::fs::File::open(path).map_err(|e| ToolkitError::io(path, e))?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| invalid(e.to_string()))?;

    let document_xml = read_part(&mut archive, "word/document.xml")
        .map_err(|e| invalid(e.to_string()))?
        .ok_or_else(|| invalid("word/document.xml is missing".into()))?;
    let styles_xml = read_part(&mut archive, "word/styles.xml").map_err(|e| invalid(e.to_string()))?;

    let style_names = match styles_xml {
        Some(xml) => parse_style_names(&xml).map_err(|e| invalid(e.to_string()))?,
        None => HashMap::new(),
    };
    debug!("docx has {} named styles", style_names.len());

    docx_body_text(&document_xml, &style_names).map_err(|e| invalid(e.to_string()))
}

fn read_part<R: std::io::Read + std::io::Seek>(
    archive: &mut zip::ZipArchive<R>,
    name: &str,
) -> Result<Option<String>, Box<dyn std::error::Error>> {
    let mut part = match archive.by_name(name) {
        Ok(part) => part,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut xml = String::new();
    part.read_to_string(&mut xml)?;
    Ok(Some(xml))
}

/// Map style id → display name from `word/styles.xml`.
fn parse_style_names(xml: &str) -> Result<HashMap<String, String>, roxmltree::Error> {
    let doc = roxmltree::Document::parse(xml)?;
    let mut names = HashMap::new();
    for style in doc
        .descendants()
        .filter(|n| n.has_tag_name((WORD_NS, "style")))
    {
        let Some(id) = style.attribute((WORD_NS, "styleId")) else {
            continue;
        };
        let name = style
            .children()
            .find(|n| n.has_tag_name((WORD_NS, "name")))
            .and_then(|n| n.attribute((WORD_NS, "val")));
        if let Some(name) = name {
            names.insert(id.to_string(), name.to_string());
        }
    }
    Ok(names)
}

/// Text of every body paragraph, headings prefixed with `#`.
fn docx_body_text(
    xml: &str,
    style_names: &HashMap<String, String>,
) -> Result<String, roxmltree::Error> {
    let doc = roxmltree::Document::parse(xml)?;
    let Some(body) = doc
        .descendants()
        .find(|n| n.has_tag_name((WORD_NS, "body")))
    else {
        return Ok(String::new());
    };

    let mut blocks: Vec<String> = Vec::new();
    for para in body
        .descendants()
        .filter(|n| n.has_tag_name((WORD_NS, "p")))
    {
        let text = paragraph_text(para);
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        match heading_level(para, style_names) {
            Some(level) => blocks.push(format!("{} {}", "#".repeat(level), text)),
            None => blocks.push(text.to_string()),
        }
    }
    Ok(blocks.join("\n\n"))
}

fn paragraph_text(para: roxmltree::Node<'_, '_>) -> String {
    let mut out = String::new();
    for node in para.descendants() {
        if node.has_tag_name((WORD_NS, "t")) {
            out.push_str(node.text().unwrap_or_default());
        } else if node.has_tag_name((WORD_NS, "tab")) {
            out.push('\t');
        } else if node.has_tag_name((WORD_NS, "br")) || node.has_tag_name((WORD_NS, "cr")) {
            out.push('\n');
        }
    }
    out
}

fn heading_level(
    para: roxmltree::Node<'_, '_>,
    style_names: &HashMap<String, String>,
) -> Option<usize> {
    let style_id = para
        .children()
        .find(|n| n.has_tag_name((WORD_NS, "pPr")))?
        .children()
        .find(|n| n.has_tag_name((WORD_NS, "pStyle")))?
        .attribute((WORD_NS, "val"))?;

    heading_level_from_token(style_id).or_else(|| {
        style_names
            .get(style_id)
            .and_then(|name| heading_level_from_token(name))
    })
}

/// Heading level 1–4 from a style id or name like `Heading2`, `heading 3`, `Overskrift 1`.
pub fn heading_level_from_token(token: &str) -> Option<usize> {
    let t: String = token
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-' && *c != '_')
        .collect::<String>()
        .to_lowercase();
    (1..=4).find(|i| t.contains(&format!("heading{i}")) || t.contains(&format!("overskrift{i}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_docx(path: &Path, document: &str, styles: Option<&str>) {
        let file = std::fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let opts = zip::write::SimpleFileOptions::default();
        zip.start_file("word/document.xml", opts).unwrap();
        zip.write_all(document.as_bytes()).unwrap();
        if let Some(styles) = styles {
            zip.start_file("word/styles.xml", opts).unwrap();
            zip.write_all(styles.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    fn document(body: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="{WORD_NS}"><w:body>{body}</w:body></w:document>"#
        )
    }

    #[test]
    fn heading_tokens() {
        assert_eq!(heading_level_from_token("Heading1"), Some(1));
        assert_eq!(heading_level_from_token("heading 2"), Some(2));
        assert_eq!(heading_level_from_token("Overskrift 3"), Some(3));
        assert_eq!(heading_level_from_token("MyHeading4Custom"), Some(4));
        assert_eq!(heading_level_from_token("Heading 5"), None);
        assert_eq!(heading_level_from_token("Normal"), None);
    }

    #[test]
    fn plain_text_strips_bom() {
        let tmp = tempfile::tempdir().unwrap();
        let p = tmp.path().join("a.TXT");
        std::fs::write(&p, "\u{FEFF}Hej\n\nverden").unwrap();
        assert_eq!(extract_text(&p).unwrap(), "Hej\n\nverden");
    }

    #[test]
    fn unsupported_and_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let p = tmp.path().join("a.pdf");
        std::fs::write(&p, "%PDF").unwrap();
        assert!(matches!(
            extract_text(&p),
            Err(ToolkitError::UnsupportedInput { .. })
        ));
        assert!(matches!(
            extract_text(&tmp.path().join("gone.txt")),
            Err(ToolkitError::InputNotFound { .. })
        ));
    }

    #[test]
    fn docx_paragraphs_and_headings() {
        let tmp = tempfile::tempdir().unwrap();
        let p = tmp.path().join("bog.docx");
        let body = r#"
<w:p><w:pPr><w:pStyle w:val="Heading1"/></w:pPr><w:r><w:t>Kapitel 1</w:t></w:r></w:p>
<w:p><w:r><w:t xml:space="preserve">Første </w:t></w:r><w:r><w:t>afsnit.</w:t></w:r></w:p>
<w:p></w:p>
<w:p><w:pPr><w:pStyle w:val="Overskrift2"/></w:pPr><w:r><w:t>Afsnit 1.1</w:t></w:r></w:p>
<w:p><w:r><w:t>A</w:t><w:tab/><w:t>B</w:t></w:r></w:p>"#;
        write_docx(&p, &document(body), None);

        assert_eq!(
            extract_text(&p).unwrap(),
            "# Kapitel 1\n\nFørste afsnit.\n\n## Afsnit 1.1\n\nA\tB"
        );
    }

    #[test]
    fn docx_heading_found_through_style_name() {
        let tmp = tempfile::tempdir().unwrap();
        let p = tmp.path().join("styled.docx");
        let body = r#"<w:p><w:pPr><w:pStyle w:val="Style42"/></w:pPr><w:r><w:t>Titel</w:t></w:r></w:p>"#;
        let styles = format!(
            r#"<w:styles xmlns:w="{WORD_NS}"><w:style w:type="paragraph" w:styleId="Style42"><w:name w:val="heading 3"/></w:style></w:styles>"#
        );
        write_docx(&p, &document(body), Some(&styles));
        assert_eq!(extract_text(&p).unwrap(), "### Titel");
    }

    #[test]
    fn import_writes_source_text_and_records_it() {
        use crate::manifest::{OutputMode, TtsSettings};

        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("bog.txt");
        std::fs::write(&input, "Et.\n\nTo.").unwrap();
        let mut job = JobManifest::new(
            input,
            tmp.path().join("job"),
            OutputMode::Both,
            TtsSettings::default(),
        );

        assert!(matches!(
            load_source_text(&job),
            Err(ToolkitError::MissingArtifact { .. })
        ));
        let out = import_source(&mut job).unwrap();
        assert_eq!(out, tmp.path().join("job").join("input").join(SOURCE_TEXT_FILE));
        assert_eq!(job.source_text_path.as_deref(), Some(out.as_path()));
        assert_eq!(load_source_text(&job).unwrap(), "Et.\n\nTo.");
    }

    #[test]
    fn import_rejects_blank_document() {
        use crate::manifest::{OutputMode, TtsSettings};

        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("tom.txt");
        std::fs::write(&input, " \n\n ").unwrap();
        let mut job = JobManifest::new(input, tmp.path().to_path_buf(), OutputMode::Both, TtsSettings::default());
        assert!(matches!(
            import_source(&mut job),
            Err(ToolkitError::EmptyDocument { .. })
        ));
    }

    #[test]
    fn not_a_zip_is_invalid_docx() {
        let tmp = tempfile::tempdir().unwrap();
        let p = tmp.path().join("fake.docx");
        std::fs::write(&p, "plain text").unwrap();
        assert!(matches!(
            extract_text(&p),
            Err(ToolkitError::InvalidDocx { .. })
        ));
    }
}
