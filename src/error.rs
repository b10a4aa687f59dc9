//! Error types for the daisy-braille-toolkit library.
//!
//! Two error types reflect two layers of failure:
//!
//! * [`ToolkitError`]: returned by every library operation (job store,
//!   pipeline runner, stage functions). A step that fails is recorded on the
//!   manifest and the error is handed back to the caller, who decides when to
//!   resume.
//!
//! * [`TtsError`]: a failure inside the text-to-speech provider (missing
//!   key, HTTP error, malformed response). Wrapped by [`ToolkitError::Tts`]
//!   when it aborts a step.

use crate::manifest::{OutputMode, PipelineStep};
use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the daisy-braille-toolkit library.
#[derive(Debug, Error)]
pub enum ToolkitError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input document was not found at the given path.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    InputNotFound { path: PathBuf },

    /// Input has an extension the importer does not handle.
    #[error("Unsupported input type '{ext}' for '{path}'. Only .txt and .docx are supported.")]
    UnsupportedInput { path: PathBuf, ext: String },

    /// The `.docx` container or its XML could not be read.
    #[error("Word document '{path}' could not be read: {detail}")]
    InvalidDocx { path: PathBuf, detail: String },

    /// The document produced no text to convert.
    #[error("Document '{path}' contains no text")]
    EmptyDocument { path: PathBuf },

    // ── Job errors ────────────────────────────────────────────────────────
    /// No `job.json` in the given job folder.
    #[error("No job manifest in '{path}'")]
    ManifestNotFound { path: PathBuf },

    /// `job.json` exists but is not a valid manifest.
    #[error("Job manifest '{path}' is corrupt: {detail}")]
    ManifestCorrupt { path: PathBuf, detail: String },

    /// A forced start step is not part of the plan for the job's mode.
    #[error("Step {step} is not part of the {mode} plan")]
    StepNotInPlan { step: PipelineStep, mode: OutputMode },

    /// A pipeline step failed; the manifest records the same message.
    #[error("Step {step} failed: {source}")]
    StepFailed {
        step: PipelineStep,
        #[source]
        source: Box<ToolkitError>,
    },

    /// The run was cancelled between two segments.
    #[error("Job cancelled")]
    Cancelled,

    /// A step needed output of an earlier step that is missing.
    #[error("Missing output from an earlier step: {what}\nResume from the step that produces it.")]
    MissingArtifact { what: String },

    /// A segment's spoken text does not fit in one provider request.
    #[error(
        "Spoken text of segment {index} has {chars} characters, the limit is {max}.\nShorten '{path}' and resume."
    )]
    SegmentTooLong {
        index: usize,
        path: PathBuf,
        chars: usize,
        max: usize,
    },

    // ── TTS errors ────────────────────────────────────────────────────────
    /// The text-to-speech provider failed.
    #[error(transparent)]
    Tts(#[from] TtsError),

    // ── Packaging errors ──────────────────────────────────────────────────
    /// The external disc-image tool failed or could not be started.
    #[error("ISO tool '{program}' failed: {detail}")]
    IsoToolFailed { program: String, detail: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Reading or writing a file failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ToolkitError {
    /// Wrap an `std::io::Error` together with the path it occurred on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ToolkitError::Io {
            path: path.into(),
            source,
        }
    }

    /// True for [`ToolkitError::Cancelled`], including when wrapped in a step failure.
    pub fn is_cancelled(&self) -> bool {
        match self {
            ToolkitError::Cancelled => true,
            ToolkitError::StepFailed { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

/// Failure inside a text-to-speech provider.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum TtsError {
    /// No API key was configured.
    #[error("ElevenLabs API key is missing.\nSet ELEVENLABS_API_KEY or pass --api-key.")]
    MissingApiKey,

    /// No voice id was configured for the job.
    #[error("ElevenLabs voice id is missing")]
    MissingVoice,

    /// Refused to send an empty text.
    #[error("Text for TTS is empty")]
    EmptyText,

    /// API returned 401 or 403.
    #[error("Authentication error from ElevenLabs ({status}): {detail}")]
    Auth { status: u16, detail: String },

    /// API returned 429.
    #[error("Rate limit exceeded at ElevenLabs")]
    RateLimited { retry_after_secs: Option<u64> },

    /// Any other non-success HTTP status.
    #[error("ElevenLabs error ({status}): {body}")]
    Http { status: u16, body: String },

    /// Request could not be sent or timed out.
    #[error("Request to ElevenLabs failed: {0}")]
    Request(String),

    /// Response body did not have the expected shape.
    #[error("Malformed ElevenLabs response: {0}")]
    MalformedResponse(String),
}

impl TtsError {
    /// Whether another attempt at the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            TtsError::RateLimited { .. } | TtsError::Request(_) => true,
            TtsError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_failed_display_includes_inner() {
        let e = ToolkitError::StepFailed {
            step: PipelineStep::Tts,
            source: Box::new(ToolkitError::Tts(TtsError::MissingApiKey)),
        };
        let msg = e.to_string();
        assert!(msg.contains("Tts"), "got: {msg}");
        assert!(msg.contains("API key"), "got: {msg}");
    }

    #[test]
    fn cancelled_is_detected_through_step_failure() {
        let e = ToolkitError::StepFailed {
            step: PipelineStep::Tts,
            source: Box::new(ToolkitError::Cancelled),
        };
        assert!(e.is_cancelled());
        assert!(!ToolkitError::Internal("x".into()).is_cancelled());
    }

    #[test]
    fn transient_classification() {
        assert!(TtsError::RateLimited {
            retry_after_secs: None
        }
        .is_transient());
        assert!(TtsError::Http {
            status: 503,
            body: String::new()
        }
        .is_transient());
        assert!(!TtsError::Http {
            status: 400,
            body: String::new()
        }
        .is_transient());
        assert!(!TtsError::Auth {
            status: 401,
            detail: "bad key".into()
        }
        .is_transient());
    }

    #[test]
    fn http_error_display() {
        let e = TtsError::Http {
            status: 422,
            body: "voice not found".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("422"));
        assert!(msg.contains("voice not found"));
    }
}
