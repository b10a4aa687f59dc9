//! Pipeline stages for converting a document into accessible outputs.
//!
//! Each submodule implements one step of the job plan (or a helper used by
//! one). The runner in [`crate::runner`] decides which steps run and records
//! their state; the stages themselves only read and write job-folder files.
//!
//! ## Data Flow
//!
//! ```text
//! import ──▶ placeholders ──▶ rules ──▶ segment ──▶ tts ──▶ daisy / placeholders ──▶ package
//! (.txt/.docx) (DTBook)     (spoken)  (chunks)    (cache/API) (ncc+smil / PEF)     (CSV+ISO)
//! ```
//!
//! 1. [`import`]: extract plain text to `input/source.txt`
//! 2. [`placeholders`]: DTBook and PEF placeholder documents
//! 3. [`rules`]: Danish pronunciation fixes for the spoken track
//! 4. [`segment`]: paragraph-packed chunks within the provider limit
//! 5. [`tts`]: segment files, then audio from cache or synthesizer
//! 6. [`daisy`]: `ncc.html` + one SMIL per segment
//! 7. [`package`]: metadata CSV and the disc image
//!
//! XML output goes through the small `xml` helper module.

pub mod daisy;
pub mod import;
pub mod package;
pub mod placeholders;
pub mod rules;
pub mod segment;
pub mod tts;
mod xml;
