//! TTS stage: segment files and per-segment audio.
//!
//! [`prepare_segments`] turns the source text into the manifest's segment
//! list. Pronunciation rules are applied to the whole text first and the
//! result is split, so every generated segment fits the per-request budget.
//! Each segment gets two files under `tts/segments/`:
//!
//! * `NNNN.source.txt`: the generated text for the segment
//! * `NNNN.tts.txt`: the text actually spoken; users may edit it
//!
//! The spoken file is only (re)written when it is missing or the generated
//! text changed, so manual pronunciation fixes survive a resume. The cache key
//! is taken over the spoken text, and an edited file longer than the budget
//! fails the step.
//!
//! [`materialize_segment`] then puts one segment's audio into the job,
//! from the cache when possible and otherwise through the synthesizer.

use crate::cache::{cache_key, extension_for_format, segment_file_stem, TtsCache};
use crate::error::{ToolkitError, TtsError};
use crate::manifest::{JobManifest, SegmentStatus, TtsSegment, TtsSettings};
use crate::pipeline::{rules, segment::split_for_tts};
use crate::synth::{SpeechSynthesizer, SynthesisRequest};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Job folder holding segment audio.
pub fn tts_dir(job_root: &Path) -> PathBuf {
    job_root.join("tts")
}

/// Folder holding the editable segment text files.
pub fn segments_dir(job_root: &Path) -> PathBuf {
    tts_dir(job_root).join("segments")
}

pub fn source_text_path(job_root: &Path, index: usize) -> PathBuf {
    segments_dir(job_root).join(format!("{index:04}.source.txt"))
}

pub fn spoken_text_path(job_root: &Path, index: usize) -> PathBuf {
    segments_dir(job_root).join(format!("{index:04}.tts.txt"))
}

/// Where segment `index` lives in the job once materialized.
pub fn segment_audio_path(job_root: &Path, index: usize, output_format: &str) -> PathBuf {
    tts_dir(job_root).join(format!(
        "{}{}",
        segment_file_stem(index),
        extension_for_format(output_format)
    ))
}

/// Split `source_text` and rebuild `job.tts.segments`.
///
/// A segment whose cache key is unchanged keeps its previous status, so a
/// resumed job does not touch segments that are already in place.
pub fn prepare_segments(job: &mut JobManifest, source_text: &str) -> Result<usize, ToolkitError> {
    let settings = job.tts.settings.clone();
    let max_chars = settings.max_chars_per_segment.max(1);
    let use_rules = settings.apply_text_rules && rules::applies_to(&job.language);
    let generated = if use_rules {
        rules::apply_danish_fixes(source_text)
    } else {
        source_text.to_string()
    };
    let chunks = split_for_tts(&generated, max_chars);
    if chunks.is_empty() {
        return Err(ToolkitError::EmptyDocument {
            path: job.input_path.clone(),
        });
    }

    let root = job.output_root.clone();
    let dir = segments_dir(&root);
    std::fs::create_dir_all(&dir).map_err(|e| ToolkitError::io(&dir, e))?;

    let previous: HashMap<usize, &TtsSegment> =
        job.tts.segments.iter().map(|s| (s.index, s)).collect();

    let mut segments = Vec::with_capacity(chunks.len());
    for (i, chunk) in chunks.iter().enumerate() {
        let index = i + 1;
        let source_path = source_text_path(&root, index);
        let spoken_path = spoken_text_path(&root, index);

        let source_changed = match std::fs::read_to_string(&source_path) {
            Ok(old) => old != *chunk,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(e) => return Err(ToolkitError::io(&source_path, e)),
        };
        if source_changed {
            std::fs::write(&source_path, chunk).map_err(|e| ToolkitError::io(&source_path, e))?;
        }
        if source_changed || !spoken_path.is_file() {
            std::fs::write(&spoken_path, chunk).map_err(|e| ToolkitError::io(&spoken_path, e))?;
        }

        let spoken = std::fs::read_to_string(&spoken_path)
            .map_err(|e| ToolkitError::io(&spoken_path, e))?;
        let spoken = match spoken.trim() {
            "" => {
                warn!("Segment {} spoken text is empty, using source text", index);
                chunk.clone()
            }
            s => s.to_string(),
        };
        let chars = spoken.chars().count();
        if chars > max_chars {
            return Err(ToolkitError::SegmentTooLong {
                index,
                path: spoken_path,
                chars,
                max: max_chars,
            });
        }

        let key = cache_key(
            &settings.voice_id,
            &settings.model_id,
            &settings.output_format,
            &spoken,
        );
        let (status, from_cache) = previous
            .get(&index)
            .filter(|p| p.cache_key == key && p.status == SegmentStatus::Completed)
            .map(|p| (p.status, p.from_cache))
            .unwrap_or_default();

        segments.push(TtsSegment {
            index,
            text: spoken,
            cache_key: key,
            status,
            from_cache,
        });
    }

    remove_stale_segment_files(&root, segments.len())?;

    info!("Prepared {} TTS segments", segments.len());
    let n = segments.len();
    job.tts.segments = segments;
    Ok(n)
}

/// Delete text files of segments past `count` left by an earlier, longer split.
fn remove_stale_segment_files(root: &Path, count: usize) -> Result<(), ToolkitError> {
    let mut index = count + 1;
    loop {
        let source = source_text_path(root, index);
        let spoken = spoken_text_path(root, index);
        if !source.exists() && !spoken.exists() {
            return Ok(());
        }
        for p in [source, spoken] {
            if p.exists() {
                std::fs::remove_file(&p).map_err(|e| ToolkitError::io(&p, e))?;
            }
        }
        index += 1;
    }
}

/// Put the audio of `segment` into the job's `tts/` folder.
///
/// Returns `true` when the audio came from the cache. `synthesizer` is only
/// called on a cache miss, so a fully cached job needs no API key.
pub async fn materialize_segment<F>(
    cache: &TtsCache,
    settings: &TtsSettings,
    segment: &TtsSegment,
    job_root: &Path,
    synthesizer: F,
) -> Result<bool, ToolkitError>
where
    F: FnOnce() -> Result<Arc<dyn SpeechSynthesizer>, ToolkitError>,
{
    let ext = extension_for_format(&settings.output_format);
    let dir = tts_dir(job_root);

    if cache.has(&segment.cache_key, ext).await {
        debug!("Segment {}: cache hit {}", segment.index, segment.cache_key);
        cache
            .copy_to_job(&segment.cache_key, ext, &dir, segment.index)
            .await?;
        return Ok(true);
    }

    let synth = synthesizer()?;
    let request = SynthesisRequest {
        voice_id: settings.voice_id.clone(),
        model_id: settings.model_id.clone(),
        output_format: settings.output_format.clone(),
        text: segment.text.clone(),
    };
    let output = synth.synthesize(&request).await?;
    if output.audio.is_empty() {
        return Err(TtsError::MalformedResponse("provider returned no audio".into()).into());
    }

    cache
        .put(&segment.cache_key, ext, &output.audio, &output.raw_json)
        .await?;
    cache
        .copy_to_job(&segment.cache_key, ext, &dir, segment.index)
        .await?;
    debug!(
        "Segment {}: synthesized {} bytes",
        segment.index,
        output.audio.len()
    );
    Ok(false)
}
