//! The job manifest: everything the pipeline needs to resume a job.
//!
//! A [`JobManifest`] is created once per job by [`crate::store::JobStore`],
//! mutated after every step and written back to `job.json`. The file on disk
//! is the source of truth: a later process reloads it and picks up at the
//! first step that is not [`StepStatus::Completed`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Current `job.json` schema version.
pub const SCHEMA_VERSION: &str = "1.0";

/// Default language tag for new jobs.
pub const DEFAULT_LANGUAGE: &str = "da-DK";

/// Which accessible outputs a job produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OutputMode {
    /// DAISY talking book only.
    DaisyOnly,
    /// Braille PEF only.
    BrailleOnly,
    /// DAISY and Braille. (default)
    #[default]
    Both,
}

impl OutputMode {
    pub fn makes_daisy(self) -> bool {
        matches!(self, OutputMode::DaisyOnly | OutputMode::Both)
    }

    pub fn makes_braille(self) -> bool {
        matches!(self, OutputMode::BrailleOnly | OutputMode::Both)
    }
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OutputMode::DaisyOnly => "DaisyOnly",
            OutputMode::BrailleOnly => "BrailleOnly",
            OutputMode::Both => "Both",
        };
        f.write_str(s)
    }
}

/// One stage of the pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PipelineStep {
    Import,
    DtBook,
    Tts,
    DaisyBuild,
    PefBuild,
    IsoAndCsv,
}

impl PipelineStep {
    /// Every step, in execution order.
    pub const ALL: [PipelineStep; 6] = [
        PipelineStep::Import,
        PipelineStep::DtBook,
        PipelineStep::Tts,
        PipelineStep::DaisyBuild,
        PipelineStep::PefBuild,
        PipelineStep::IsoAndCsv,
    ];

    /// The ordered step plan for an output mode.
    pub fn plan(mode: OutputMode) -> Vec<PipelineStep> {
        let mut plan = vec![PipelineStep::Import, PipelineStep::DtBook, PipelineStep::Tts];
        if mode.makes_daisy() {
            plan.push(PipelineStep::DaisyBuild);
        }
        if mode.makes_braille() {
            plan.push(PipelineStep::PefBuild);
        }
        plan.push(PipelineStep::IsoAndCsv);
        plan
    }
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl std::str::FromStr for PipelineStep {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().replace(['-', '_'], "").to_lowercase();
        PipelineStep::ALL
            .into_iter()
            .find(|step| step.to_string().to_lowercase() == wanted)
            .ok_or_else(|| format!("unknown step '{s}'"))
    }
}

/// Progress of one pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StepStatus {
    #[default]
    NotStarted,
    Running,
    Completed,
    Failed,
}

/// Persisted state of one step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepState {
    pub status: StepStatus,
    pub started_utc: Option<DateTime<Utc>>,
    pub finished_utc: Option<DateTime<Utc>>,
    /// Full error text of the last failure.
    pub error: Option<String>,
}

impl StepState {
    pub fn is_completed(&self) -> bool {
        self.status == StepStatus::Completed
    }
}

/// TTS parameters that feed into every segment's cache key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TtsSettings {
    pub voice_id: String,
    pub model_id: String,
    pub output_format: String,
    pub max_chars_per_segment: usize,
    /// Apply pronunciation rules to the spoken text (Danish jobs only).
    #[serde(default = "default_true")]
    pub apply_text_rules: bool,
}

fn default_true() -> bool {
    true
}

impl Default for TtsSettings {
    fn default() -> Self {
        Self {
            voice_id: String::new(),
            model_id: crate::config::DEFAULT_MODEL_ID.to_string(),
            output_format: crate::config::DEFAULT_OUTPUT_FORMAT.to_string(),
            max_chars_per_segment: crate::pipeline::segment::safe_max_chars(0),
            apply_text_rules: true,
        }
    }
}

/// Status of a single TTS segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SegmentStatus {
    #[default]
    Pending,
    Completed,
    Failed,
}

/// A chunk of text sized for one TTS request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TtsSegment {
    /// 1-based position in the document.
    pub index: usize,
    /// Text sent to the provider.
    pub text: String,
    pub cache_key: String,
    #[serde(default)]
    pub status: SegmentStatus,
    /// Audio was served from the cache rather than synthesized.
    #[serde(default)]
    pub from_cache: bool,
}

/// TTS section of the manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TtsJobState {
    pub settings: TtsSettings,
    #[serde(default)]
    pub segments: Vec<TtsSegment>,
}

/// Persisted record of one conversion job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobManifest {
    pub schema_version: String,
    pub job_id: Uuid,
    pub created_utc: DateTime<Utc>,

    /// Copy of the source document inside the job folder.
    pub input_path: PathBuf,
    /// The job folder.
    pub output_root: PathBuf,
    pub mode: OutputMode,

    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    pub language: String,

    /// Extracted plain text, written by the Import step.
    #[serde(default)]
    pub source_text_path: Option<PathBuf>,

    #[serde(default)]
    pub tts: TtsJobState,

    #[serde(default)]
    pub steps: BTreeMap<PipelineStep, StepState>,
}

impl JobManifest {
    /// A fresh manifest with every step `NotStarted`.
    pub fn new(
        input_path: PathBuf,
        output_root: PathBuf,
        mode: OutputMode,
        settings: TtsSettings,
    ) -> Self {
        let mut manifest = Self {
            schema_version: SCHEMA_VERSION.to_string(),
            job_id: Uuid::new_v4(),
            created_utc: Utc::now(),
            input_path,
            output_root,
            mode,
            title: None,
            author: None,
            language: DEFAULT_LANGUAGE.to_string(),
            source_text_path: None,
            tts: TtsJobState {
                settings,
                segments: Vec::new(),
            },
            steps: BTreeMap::new(),
        };
        manifest.ensure_all_steps();
        manifest
    }

    /// Add a `NotStarted` entry for any step missing from `steps`.
    ///
    /// Manifests written before a step existed load with the new step pending.
    pub fn ensure_all_steps(&mut self) {
        for step in PipelineStep::ALL {
            self.steps.entry(step).or_default();
        }
    }

    pub fn step(&self, step: PipelineStep) -> &StepState {
        static NOT_STARTED: StepState = StepState {
            status: StepStatus::NotStarted,
            started_utc: None,
            finished_utc: None,
            error: None,
        };
        self.steps.get(&step).unwrap_or(&NOT_STARTED)
    }

    pub fn step_mut(&mut self, step: PipelineStep) -> &mut StepState {
        self.steps.entry(step).or_default()
    }

    /// The ordered step plan for this job's mode.
    pub fn plan(&self) -> Vec<PipelineStep> {
        PipelineStep::plan(self.mode)
    }

    /// True when every planned step is completed.
    pub fn is_complete(&self) -> bool {
        self.plan().iter().all(|s| self.step(*s).is_completed())
    }

    /// Title used for outputs: explicit title, else the input file stem.
    pub fn display_title(&self) -> String {
        if let Some(t) = self.title.as_deref().filter(|t| !t.trim().is_empty()) {
            return t.trim().to_string();
        }
        self.input_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "Untitled".to_string())
    }
}
