//! Placeholder DTBook and PEF documents.
//!
//! Neither is a real conversion: the DTBook holds one `<p>` per paragraph and
//! the PEF holds one `<row>` per text line, untranslated. They give later
//! tooling a well-formed file in the right place.

use crate::error::ToolkitError;
use crate::manifest::{JobManifest, DEFAULT_LANGUAGE};
use crate::pipeline::xml;
use quick_xml::events::BytesStart;
use std::path::PathBuf;

/// DTBook file inside the job's `dtbook/` folder.
pub const DTBOOK_FILE: &str = "book.xml";

/// PEF file inside the job's `braille/` folder.
pub const PEF_FILE: &str = "book.pef";

const DTBOOK_NS: &str = "http://www.daisy.org/z3986/2005/dtbook/";
const PEF_NS: &str = "http://www.daisy.org/ns/2008/pef";

/// Build a DTBook document with one `<p>` per blank-line separated paragraph.
pub fn build_dtbook(
    text: &str,
    title: &str,
    author: &str,
    language: &str,
) -> Result<String, ToolkitError> {
    let language = if language.trim().is_empty() {
        DEFAULT_LANGUAGE
    } else {
        language.trim()
    };
    let text = text.replace("\r\n", "\n");

    let mut w = xml::writer();
    xml::declaration(&mut w)?;
    xml::start(
        &mut w,
        BytesStart::new("dtbook").with_attributes([("xmlns", DTBOOK_NS), ("xml:lang", language)]),
    )?;
    xml::start(&mut w, BytesStart::new("head"))?;
    xml::meta(&mut w, "dc:Title", title)?;
    xml::meta(&mut w, "dc:Creator", author)?;
    xml::end(&mut w, "head")?;

    xml::start(&mut w, BytesStart::new("book"))?;
    xml::start(&mut w, BytesStart::new("bodymatter"))?;
    for para in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        xml::text_element(&mut w, BytesStart::new("p"), para)?;
    }
    xml::end(&mut w, "bodymatter")?;
    xml::end(&mut w, "book")?;
    xml::end(&mut w, "dtbook")?;
    xml::finish(w)
}

/// Build a PEF document with one `<row>` per text line, after a placeholder row.
pub fn build_pef(text: &str, title: &str, author: &str) -> Result<String, ToolkitError> {
    let text = text.replace("\r\n", "\n");

    let mut w = xml::writer();
    xml::declaration(&mut w)?;
    xml::start(
        &mut w,
        BytesStart::new("pef").with_attributes([("xmlns", PEF_NS), ("version", "2008-1")]),
    )?;
    xml::start(&mut w, BytesStart::new("head"))?;
    xml::meta(&mut w, "dc:Title", title)?;
    xml::meta(&mut w, "dc:Creator", author)?;
    xml::end(&mut w, "head")?;

    for name in ["body", "volume", "section", "page"] {
        xml::start(&mut w, BytesStart::new(name))?;
    }
    xml::start(&mut w, BytesStart::new("row"))?;
    xml::text_element(&mut w, BytesStart::new("cell"), "PLACEHOLDER")?;
    xml::end(&mut w, "row")?;
    for line in text.split('\n') {
        xml::text_element(&mut w, BytesStart::new("row"), line.trim_end())?;
    }
    for name in ["page", "section", "volume", "body", "pef"] {
        xml::end(&mut w, name)?;
    }
    xml::finish(w)
}

/// Run the DtBook step.
pub fn write_dtbook(job: &JobManifest, text: &str) -> Result<PathBuf, ToolkitError> {
    let xml = build_dtbook(
        text,
        &job.display_title(),
        job.author.as_deref().unwrap_or_default(),
        &job.language,
    )?;
    write_output(job.output_root.join("dtbook"), DTBOOK_FILE, &xml)
}

/// Run the PefBuild step.
pub fn write_pef(job: &JobManifest, text: &str) -> Result<PathBuf, ToolkitError> {
    let xml = build_pef(
        text,
        &job.display_title(),
        job.author.as_deref().unwrap_or_default(),
    )?;
    write_output(job.output_root.join("braille"), PEF_FILE, &xml)
}

fn write_output(dir: PathBuf, name: &str, contents: &str) -> Result<PathBuf, ToolkitError> {
    std::fs::create_dir_all(&dir).map_err(|e| ToolkitError::io(&dir, e))?;
    let path = dir.join(name);
    std::fs::write(&path, contents).map_err(|e| ToolkitError::io(&path, e))?;
    Ok(path)
}
