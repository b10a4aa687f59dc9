//! # daisy-braille-toolkit
//!
//! Turn text and Word documents into accessible outputs: a simple DAISY
//! talking book voiced by ElevenLabs, a Braille PEF file and a disc image.
//!
//! ## Jobs, not conversions
//!
//! Synthesizing a book takes long and costs money per character, so every
//! conversion is a *job* with a folder and a `job.json` manifest. Each step
//! is checkpointed in the manifest; a failed or interrupted job resumes at
//! the step that did not finish. Synthesized audio goes into a
//! content-addressed cache shared by all jobs, so the same text with the
//! same voice is paid for once.
//!
//! ## Pipeline Overview
//!
//! ```text
//! document
//!  │
//!  ├─ 1. Import      .txt / .docx → input/source.txt
//!  ├─ 2. DtBook      placeholder DTBook XML
//!  ├─ 3. Tts         segments → cache or ElevenLabs → tts/seg_NNNN.mp3
//!  ├─ 4. DaisyBuild  ncc.html + SMIL          (DaisyOnly / Both)
//!  ├─ 5. PefBuild    placeholder PEF          (BrailleOnly / Both)
//!  └─ 6. IsoAndCsv   metadata.csv + output.iso
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use daisy_braille_toolkit::{CancellationToken, JobStore, OutputMode, PipelineRunner, ToolkitConfig};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // API key read from ELEVENLABS_API_KEY when the first segment needs it
//!     let config = ToolkitConfig::default();
//!     let store = JobStore::new();
//!     let mut job = store.create_new(
//!         Path::new("bog.docx"),
//!         Path::new("jobs"),
//!         OutputMode::Both,
//!         &config,
//!         "my-voice-id",
//!     )?;
//!
//!     let runner = PipelineRunner::new(config)?;
//!     let summary = runner.run(&mut job, None, &CancellationToken::new()).await?;
//!     eprintln!("{} segments synthesized, {} from cache",
//!         summary.segments_synthesized, summary.segments_from_cache);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `dbt` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! daisy-braille-toolkit = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod cache;
pub mod config;
pub mod elevenlabs;
pub mod error;
pub mod manifest;
pub mod pipeline;
pub mod progress;
pub mod runner;
pub mod settings;
pub mod store;
pub mod synth;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use cache::{cache_key, TtsCache};
pub use config::{IsoTool, ToolkitConfig, ToolkitConfigBuilder};
pub use elevenlabs::{ElevenLabsClient, VoiceInfo};
pub use error::{ToolkitError, TtsError};
pub use manifest::{
    JobManifest, OutputMode, PipelineStep, SegmentStatus, StepState, StepStatus, TtsJobState,
    TtsSegment, TtsSettings,
};
pub use pipeline::segment::{safe_max_chars, split_for_tts};
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback};
pub use runner::{PipelineRunner, RunSummary};
pub use settings::{AppSettings, SettingsStore, VoicesCache};
pub use store::JobStore;
pub use synth::{SpeechSynthesizer, SynthesisOutput, SynthesisRequest};
pub use tokio_util::sync::CancellationToken;
