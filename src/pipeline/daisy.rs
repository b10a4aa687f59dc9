//! Simple DAISY folder: `ncc.html` navigation plus one SMIL per segment.
//!
//! The navigation file lists every segment twice, once as a table of
//! contents and once as the readable text with an anchor `pNNNN` that the
//! segment's SMIL `<text>` points at. Audio files are copied next to them.

use crate::cache::{extension_for_format, segment_file_stem};
use crate::error::ToolkitError;
use crate::manifest::JobManifest;
use crate::pipeline::tts::segment_audio_path;
use crate::pipeline::xml;
use quick_xml::events::{BytesStart, BytesText, Event};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Navigation file name.
pub const NCC_FILE: &str = "ncc.html";

const SMIL_EXT: &str = "smil";

/// Run the DaisyBuild step. Returns the path of `ncc.html`.
pub fn build_daisy(job: &JobManifest) -> Result<PathBuf, ToolkitError> {
    let segments = &job.tts.segments;
    if segments.is_empty() {
        return Err(ToolkitError::MissingArtifact {
            what: "TTS segments (Tts step)".into(),
        });
    }

    let format = &job.tts.settings.output_format;
    let ext = extension_for_format(format);
    let daisy_dir = job.output_root.join("daisy");
    std::fs::create_dir_all(&daisy_dir).map_err(|e| ToolkitError::io(&daisy_dir, e))?;

    for seg in segments {
        let src = segment_audio_path(&job.output_root, seg.index, format);
        if !src.is_file() {
            return Err(ToolkitError::MissingArtifact {
                what: format!("audio for segment {} at '{}'", seg.index, src.display()),
            });
        }
        let stem = segment_file_stem(seg.index);
        let audio_name = format!("{stem}{ext}");
        let dest = daisy_dir.join(&audio_name);
        std::fs::copy(&src, &dest).map_err(|e| ToolkitError::io(&src, e))?;

        let smil_path = daisy_dir.join(format!("{stem}.{SMIL_EXT}"));
        std::fs::write(&smil_path, build_smil(seg.index, &audio_name)?)
            .map_err(|e| ToolkitError::io(&smil_path, e))?;
    }
    remove_stale_files(&daisy_dir, segments.len(), ext)?;

    let texts: Vec<&str> = segments.iter().map(|s| s.text.as_str()).collect();
    let ncc = build_ncc(&job.display_title(), &job.language, &texts)?;
    let ncc_path = daisy_dir.join(NCC_FILE);
    std::fs::write(&ncc_path, ncc).map_err(|e| ToolkitError::io(&ncc_path, e))?;

    info!("DAISY folder with {} segments in {}", segments.len(), daisy_dir.display());
    Ok(ncc_path)
}

/// Delete `seg_NNNN.*` files past `count`, and segment audio in another format.
fn remove_stale_files(daisy_dir: &Path, count: usize, audio_ext: &str) -> Result<(), ToolkitError> {
    let entries = std::fs::read_dir(daisy_dir).map_err(|e| ToolkitError::io(daisy_dir, e))?;
    for entry in entries {
        let path = entry.map_err(|e| ToolkitError::io(daisy_dir, e))?.path();
        let Some(index) = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.strip_prefix("seg_"))
            .and_then(|n| n.parse::<usize>().ok())
        else {
            continue;
        };
        let ext = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let stale = index == 0 || index > count || (ext != audio_ext && ext != format!(".{SMIL_EXT}"));
        if stale && path.is_file() {
            std::fs::remove_file(&path).map_err(|e| ToolkitError::io(&path, e))?;
            debug!("Removed stale {}", path.display());
        }
    }
    Ok(())
}

fn smil_href(index: usize) -> String {
    format!("{}.{SMIL_EXT}#par{index:04}", segment_file_stem(index))
}

/// Navigation document for `texts` (segment 1 first).
pub fn build_ncc(title: &str, language: &str, texts: &[&str]) -> Result<String, ToolkitError> {
    let language = language.trim();
    let mut w = xml::writer();
    xml::write(&mut w, Event::DocType(BytesText::from_escaped("html")))?;

    let mut html = BytesStart::new("html");
    if !language.is_empty() {
        html.push_attribute(("lang", language));
    }
    xml::start(&mut w, html)?;

    xml::start(&mut w, BytesStart::new("head"))?;
    xml::empty(&mut w, BytesStart::new("meta").with_attributes([("charset", "utf-8")]))?;
    xml::text_element(&mut w, BytesStart::new("title"), title)?;
    if !language.is_empty() {
        xml::meta(&mut w, "dc:language", language)?;
    }
    xml::end(&mut w, "head")?;

    xml::start(&mut w, BytesStart::new("body"))?;
    xml::text_element(&mut w, BytesStart::new("h1"), title)?;

    xml::text_element(&mut w, BytesStart::new("h2"), "Indhold")?;
    for i in 1..=texts.len() {
        let href = smil_href(i);
        xml::start(&mut w, BytesStart::new("div"))?;
        xml::text_element(
            &mut w,
            BytesStart::new("a").with_attributes([("href", href.as_str())]),
            &format!("Afsnit {i}"),
        )?;
        xml::end(&mut w, "div")?;
    }

    xml::empty(&mut w, BytesStart::new("hr"))?;
    xml::text_element(&mut w, BytesStart::new("h2"), "Tekst")?;
    for (n, text) in texts.iter().enumerate() {
        let i = n + 1;
        let id = format!("p{i:04}");
        let href = smil_href(i);
        xml::start(&mut w, BytesStart::new("p").with_attributes([("id", id.as_str())]))?;
        xml::text_element(
            &mut w,
            BytesStart::new("a").with_attributes([("href", href.as_str())]),
            text.trim(),
        )?;
        xml::end(&mut w, "p")?;
    }

    xml::end(&mut w, "body")?;
    xml::end(&mut w, "html")?;
    xml::finish(w)
}

/// SMIL for one segment: a single `<par>` pairing the text anchor and the audio.
pub fn build_smil(index: usize, audio_file: &str) -> Result<String, ToolkitError> {
    let par_id = format!("par{index:04}");
    let text_src = format!("{NCC_FILE}#p{index:04}");

    let mut w = xml::writer();
    xml::declaration(&mut w)?;
    for name in ["smil", "body", "seq"] {
        xml::start(&mut w, BytesStart::new(name))?;
    }
    xml::start(&mut w, BytesStart::new("par").with_attributes([("id", par_id.as_str())]))?;
    xml::empty(&mut w, BytesStart::new("text").with_attributes([("src", text_src.as_str())]))?;
    xml::empty(
        &mut w,
        BytesStart::new("audio").with_attributes([("src", audio_file), ("clip-begin", "0s")]),
    )?;
    for name in ["par", "seq", "body", "smil"] {
        xml::end(&mut w, name)?;
    }
    xml::finish(w)
}
