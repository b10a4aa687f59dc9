//! IsoAndCsv: metadata CSV and the distributable disc image.
//!
//! The CSV is a two-column `key,value` table describing the job. The disc
//! image is mastered by an external mkisofs-compatible tool over the
//! `daisy/`, `braille/` and `metadata/` folders; without a configured tool
//! the image is skipped.

use crate::config::IsoTool;
use crate::error::ToolkitError;
use crate::manifest::JobManifest;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Metadata file inside `metadata/`.
pub const METADATA_FILE: &str = "metadata.csv";

/// Image file inside `iso/`.
pub const ISO_FILE: &str = "output.iso";

/// Volume label used when the title has no usable characters.
pub const DEFAULT_VOLUME_LABEL: &str = "DAISY";

const MAX_LABEL_CHARS: usize = 32;

/// Folders copied onto the disc, when present.
const DISC_FOLDERS: [&str; 3] = ["daisy", "braille", "metadata"];

/// What the IsoAndCsv step produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageOutput {
    pub metadata_csv: PathBuf,
    /// None when no ISO tool is configured.
    pub iso: Option<PathBuf>,
}

/// Run the IsoAndCsv step.
pub async fn package_job(
    job: &JobManifest,
    iso_tool: Option<&IsoTool>,
) -> Result<PackageOutput, ToolkitError> {
    let metadata_csv = write_metadata_csv(job)?;

    let iso = match iso_tool {
        Some(tool) => {
            let label = sanitize_label(&job.display_title());
            Some(build_iso(tool, &job.output_root, &label).await?)
        }
        None => {
            warn!("No ISO tool configured, skipping disc image");
            None
        }
    };

    Ok(PackageOutput { metadata_csv, iso })
}

// ── Metadata CSV ─────────────────────────────────────────────────────────

/// Key/value rows written to `metadata.csv`, in order.
pub fn metadata_rows(job: &JobManifest) -> Vec<(&'static str, String)> {
    let settings = &job.tts.settings;
    vec![
        ("job_id", job.job_id.to_string()),
        ("created_utc", job.created_utc.to_rfc3339()),
        (
            "source_file",
            job.input_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        ),
        ("mode", job.mode.to_string()),
        ("language", job.language.clone()),
        ("title", job.title.clone().unwrap_or_default()),
        ("author", job.author.clone().unwrap_or_default()),
        ("tts_voice_id", settings.voice_id.clone()),
        ("tts_model_id", settings.model_id.clone()),
        ("tts_output_format", settings.output_format.clone()),
    ]
}

/// Quote a CSV field when it contains a delimiter, quote or line break.
pub fn csv_field(s: &str) -> String {
    if s.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

pub fn write_metadata_csv(job: &JobManifest) -> Result<PathBuf, ToolkitError> {
    let dir = job.output_root.join("metadata");
    std::fs::create_dir_all(&dir).map_err(|e| ToolkitError::io(&dir, e))?;

    let mut csv = String::from("key,value\r\n");
    for (key, value) in metadata_rows(job) {
        csv.push_str(key);
        csv.push(',');
        csv.push_str(&csv_field(&value));
        csv.push_str("\r\n");
    }

    let path = dir.join(METADATA_FILE);
    std::fs::write(&path, csv).map_err(|e| ToolkitError::io(&path, e))?;
    debug!("Wrote {}", path.display());
    Ok(path)
}

// ── Disc image ───────────────────────────────────────────────────────────

/// Reduce `label` to letters, digits, `_` and `-`, at most 32 characters.
pub fn sanitize_label(label: &str) -> String {
    let clean: String = label
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .take(MAX_LABEL_CHARS)
        .collect();
    if clean.is_empty() {
        DEFAULT_VOLUME_LABEL.to_string()
    } else {
        clean
    }
}

/// Full argument list passed to the ISO tool.
pub fn iso_arguments(tool: &IsoTool, job_root: &Path, label: &str, output: &Path) -> Vec<String> {
    let mut args = tool.args.clone();
    args.extend(
        [
            "-J".to_string(),
            "-R".to_string(),
            "-V".to_string(),
            label.to_string(),
            "-o".to_string(),
            output.display().to_string(),
            "-graft-points".to_string(),
        ],
    );
    for name in DISC_FOLDERS {
        let dir = job_root.join(name);
        if dir.is_dir() {
            args.push(format!("{name}/={}", dir.display()));
        }
    }
    args
}

async fn build_iso(tool: &IsoTool, job_root: &Path, label: &str) -> Result<PathBuf, ToolkitError> {
    let iso_dir = job_root.join("iso");
    tokio::fs::create_dir_all(&iso_dir)
        .await
        .map_err(|e| ToolkitError::io(&iso_dir, e))?;
    let output = iso_dir.join(ISO_FILE);

    let args = iso_arguments(tool, job_root, label, &output);
    debug!("Running {} {:?}", tool.program, args);

    let result = tokio::process::Command::new(&tool.program)
        .args(&args)
        .output()
        .await
        .map_err(|e| ToolkitError::IsoToolFailed {
            program: tool.program.clone(),
            detail: format!("could not start: {e}"),
        })?;

    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        return Err(ToolkitError::IsoToolFailed {
            program: tool.program.clone(),
            detail: format!("{} {}", result.status, stderr.trim()),
        });
    }

    info!("Disc image written to {}", output.display());
    Ok(output)
}
