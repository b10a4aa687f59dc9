//! Thin helpers over [`quick_xml::Writer`] for the generated documents.

use crate::error::ToolkitError;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::Cursor;

pub(crate) type XmlWriter = Writer<Cursor<Vec<u8>>>;

/// An in-memory writer indenting by two spaces.
pub(crate) fn writer() -> XmlWriter {
    Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2)
}

pub(crate) fn write(w: &mut XmlWriter, event: Event<'_>) -> Result<(), ToolkitError> {
    w.write_event(event)
        .map_err(|e| ToolkitError::Internal(format!("XML write: {e}")))
}

/// `<?xml version="1.0" encoding="UTF-8"?>`
pub(crate) fn declaration(w: &mut XmlWriter) -> Result<(), ToolkitError> {
    write(w, Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
}

pub(crate) fn start(w: &mut XmlWriter, el: BytesStart<'_>) -> Result<(), ToolkitError> {
    write(w, Event::Start(el))
}

pub(crate) fn end(w: &mut XmlWriter, name: &str) -> Result<(), ToolkitError> {
    write(w, Event::End(BytesEnd::new(name)))
}

pub(crate) fn empty(w: &mut XmlWriter, el: BytesStart<'_>) -> Result<(), ToolkitError> {
    write(w, Event::Empty(el))
}

/// `<name attrs…>text</name>`, or `<name attrs…/>` when `text` is empty.
pub(crate) fn text_element(
    w: &mut XmlWriter,
    el: BytesStart<'_>,
    text: &str,
) -> Result<(), ToolkitError> {
    if text.is_empty() {
        return empty(w, el);
    }
    let name = String::from_utf8_lossy(el.name().as_ref()).into_owned();
    start(w, el)?;
    write(w, Event::Text(BytesText::new(text)))?;
    end(w, &name)
}

/// `<meta name="…" content="…"/>`
pub(crate) fn meta(w: &mut XmlWriter, name: &str, content: &str) -> Result<(), ToolkitError> {
    empty(
        w,
        BytesStart::new("meta").with_attributes([("name", name), ("content", content)]),
    )
}

/// Finish the document as a string ending in a newline.
pub(crate) fn finish(w: XmlWriter) -> Result<String, ToolkitError> {
    let mut xml = String::from_utf8(w.into_inner().into_inner())
        .map_err(|e| ToolkitError::Internal(format!("XML output is not UTF-8: {e}")))?;
    xml.push('\n');
    Ok(xml)
}
