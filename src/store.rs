//! Creating, loading and saving job manifests.
//!
//! A job folder looks like this:
//!
//! ```text
//! Job_2026-10-18_093015/
//!   job.json        manifest (source of truth for resume)
//!   input/          copy of the source document + extracted source.txt
//!   dtbook/  tts/  daisy/  braille/  iso/  metadata/  logs/
//! ```
//!
//! The manifest is rewritten wholesale after every mutation. Writes go to a
//! temp file in the job folder and are renamed over `job.json`, so a reader
//! never sees a half-written manifest.

use crate::config::ToolkitConfig;
use crate::error::ToolkitError;
use crate::manifest::{JobManifest, OutputMode};
use chrono::Local;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Manifest file name inside a job folder.
pub const MANIFEST_FILE: &str = "job.json";

/// Sub-folders created for every job.
pub const JOB_SUBDIRS: [&str; 8] = [
    "input", "dtbook", "tts", "daisy", "braille", "iso", "metadata", "logs",
];

/// Persists [`JobManifest`]s as `job.json` in their job folder.
#[derive(Debug, Clone, Copy, Default)]
pub struct JobStore;

impl JobStore {
    pub fn new() -> Self {
        Self
    }

    /// Path of the manifest inside `job_dir`.
    pub fn manifest_path(job_dir: &Path) -> PathBuf {
        job_dir.join(MANIFEST_FILE)
    }

    /// Whether `job_dir` already holds a manifest.
    pub fn exists(job_dir: &Path) -> bool {
        Self::manifest_path(job_dir).is_file()
    }

    /// Create a new job folder `Job_YYYY-MM-DD_HHMMSS` under `output_root`.
    ///
    /// TTS settings and language come from `config`.
    pub fn create_new(
        &self,
        input_path: &Path,
        output_root: &Path,
        mode: OutputMode,
        config: &ToolkitConfig,
        voice_id: &str,
    ) -> Result<JobManifest, ToolkitError> {
        let base = format!("Job_{}", Local::now().format("%Y-%m-%d_%H%M%S"));
        let mut job_dir = output_root.join(&base);
        let mut n = 2;
        while job_dir.exists() {
            job_dir = output_root.join(format!("{base}_{n}"));
            n += 1;
        }
        self.create_in_folder(&job_dir, input_path, mode, config, voice_id)
    }

    /// Create a job in a caller-chosen folder.
    ///
    /// The input document is copied into `input/` so the job stays
    /// reproducible when the original moves or changes.
    pub fn create_in_folder(
        &self,
        job_dir: &Path,
        input_path: &Path,
        mode: OutputMode,
        config: &ToolkitConfig,
        voice_id: &str,
    ) -> Result<JobManifest, ToolkitError> {
        if !input_path.is_file() {
            return Err(ToolkitError::InputNotFound {
                path: input_path.to_path_buf(),
            });
        }

        for sub in JOB_SUBDIRS {
            let dir = job_dir.join(sub);
            std::fs::create_dir_all(&dir).map_err(|e| ToolkitError::io(&dir, e))?;
        }

        let file_name = input_path
            .file_name()
            .ok_or_else(|| ToolkitError::InputNotFound {
                path: input_path.to_path_buf(),
            })?;
        let input_copy = job_dir.join("input").join(file_name);
        std::fs::copy(input_path, &input_copy).map_err(|e| ToolkitError::io(input_path, e))?;

        let mut manifest = JobManifest::new(
            input_copy,
            job_dir.to_path_buf(),
            mode,
            config.tts_settings(voice_id),
        );
        manifest.language = config.language.clone();
        manifest.title = input_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned());

        self.save(job_dir, &manifest)?;
        info!("Created job {} in {}", manifest.job_id, job_dir.display());
        Ok(manifest)
    }

    /// Load the manifest from `job_dir`, back-filling steps added since it was written.
    pub fn load(&self, job_dir: &Path) -> Result<JobManifest, ToolkitError> {
        let path = Self::manifest_path(job_dir);
        let json = match std::fs::read_to_string(&path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ToolkitError::ManifestNotFound { path });
            }
            Err(e) => return Err(ToolkitError::io(&path, e)),
        };

        let mut manifest: JobManifest =
            serde_json::from_str(&json).map_err(|e| ToolkitError::ManifestCorrupt {
                path: path.clone(),
                detail: e.to_string(),
            })?;
        manifest.ensure_all_steps();
        debug!("Loaded job {} from {}", manifest.job_id, path.display());
        Ok(manifest)
    }

    /// Write the manifest to `job_dir/job.json`.
    pub fn save(&self, job_dir: &Path, manifest: &JobManifest) -> Result<(), ToolkitError> {
        let path = Self::manifest_path(job_dir);
        let json = serde_json::to_string_pretty(manifest)
            .map_err(|e| ToolkitError::Internal(format!("serialise manifest: {e}")))?;

        std::fs::create_dir_all(job_dir).map_err(|e| ToolkitError::io(job_dir, e))?;
        let mut tmp =
            tempfile::NamedTempFile::new_in(job_dir).map_err(|e| ToolkitError::io(job_dir, e))?;
        tmp.write_all(json.as_bytes())
            .map_err(|e| ToolkitError::io(tmp.path(), e))?;
        tmp.persist(&path)
            .map_err(|e| ToolkitError::io(&path, e.error))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{PipelineStep, StepStatus};

    fn input_file(dir: &Path) -> PathBuf {
        let p = dir.join("Bog.txt");
        std::fs::write(&p, "Hej\n\nverden").unwrap();
        p
    }

    fn config() -> ToolkitConfig {
        ToolkitConfig::default()
    }

    #[test]
    fn create_new_lays_out_job_folder() {
        let tmp = tempfile::tempdir().unwrap();
        let input = input_file(tmp.path());
        let out = tmp.path().join("out");

        let m = JobStore::new()
            .create_new(&input, &out, OutputMode::Both, &config(), "")
            .unwrap();

        assert!(m.output_root.starts_with(&out));
        let name = m.output_root.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("Job_"), "got {name}");
        for sub in JOB_SUBDIRS {
            assert!(m.output_root.join(sub).is_dir(), "missing {sub}");
        }
        assert_eq!(m.input_path, m.output_root.join("input").join("Bog.txt"));
        assert_eq!(std::fs::read_to_string(&m.input_path).unwrap(), "Hej\n\nverden");
        assert_eq!(m.title.as_deref(), Some("Bog"));
        assert!(JobStore::exists(&m.output_root));
    }

    #[test]
    fn new_job_takes_settings_and_language_from_config() {
        let tmp = tempfile::tempdir().unwrap();
        let input = input_file(tmp.path());
        let config = ToolkitConfig::builder()
            .language("en-GB")
            .model_id("eleven_turbo_v2")
            .apply_text_rules(false)
            .build()
            .unwrap();

        let m = JobStore::new()
            .create_in_folder(&tmp.path().join("job"), &input, OutputMode::Both, &config, "voice-9")
            .unwrap();

        assert_eq!(m.language, "en-GB");
        assert_eq!(m.tts.settings.voice_id, "voice-9");
        assert_eq!(m.tts.settings.model_id, "eleven_turbo_v2");
        assert!(!m.tts.settings.apply_text_rules);
        assert_eq!(JobStore::new().load(&m.output_root).unwrap().language, "en-GB");
    }

    #[test]
    fn create_new_twice_gets_distinct_folders() {
        let tmp = tempfile::tempdir().unwrap();
        let input = input_file(tmp.path());
        let store = JobStore::new();
        let a = store
            .create_new(&input, tmp.path(), OutputMode::Both, &config(), "")
            .unwrap();
        let b = store
            .create_new(&input, tmp.path(), OutputMode::Both, &config(), "")
            .unwrap();
        assert_ne!(a.output_root, b.output_root);
        assert_ne!(a.job_id, b.job_id);
    }

    #[test]
    fn missing_input_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let r = JobStore::new().create_in_folder(
            &tmp.path().join("job"),
            &tmp.path().join("nope.txt"),
            OutputMode::Both,
            &config(),
            "",
        );
        assert!(matches!(r, Err(ToolkitError::InputNotFound { .. })));
    }

    #[test]
    fn save_then_load_keeps_step_state() {
        let tmp = tempfile::tempdir().unwrap();
        let input = input_file(tmp.path());
        let job_dir = tmp.path().join("job");
        let store = JobStore::new();

        let mut m = store
            .create_in_folder(&job_dir, &input, OutputMode::DaisyOnly, &config(), "")
            .unwrap();
        m.step_mut(PipelineStep::Import).status = StepStatus::Completed;
        store.save(&job_dir, &m).unwrap();

        let loaded = store.load(&job_dir).unwrap();
        assert_eq!(loaded, m);
        // no temp files left behind
        let stray: Vec<_> = std::fs::read_dir(&job_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file() && e.file_name() != MANIFEST_FILE)
            .collect();
        assert!(stray.is_empty());
    }

    #[test]
    fn load_back_fills_missing_steps() {
        let tmp = tempfile::tempdir().unwrap();
        let input = input_file(tmp.path());
        let job_dir = tmp.path().join("job");
        let store = JobStore::new();
        let mut m = store
            .create_in_folder(&job_dir, &input, OutputMode::Both, &config(), "")
            .unwrap();
        m.steps.remove(&PipelineStep::PefBuild);
        store.save(&job_dir, &m).unwrap();

        let loaded = store.load(&job_dir).unwrap();
        assert_eq!(
            loaded.step(PipelineStep::PefBuild).status,
            StepStatus::NotStarted
        );
        assert!(loaded.steps.contains_key(&PipelineStep::PefBuild));
    }

    #[test]
    fn load_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let store = JobStore::new();
        assert!(matches!(
            store.load(tmp.path()),
            Err(ToolkitError::ManifestNotFound { .. })
        ));

        std::fs::write(tmp.path().join(MANIFEST_FILE), "{ not json").unwrap();
        assert!(matches!(
            store.load(tmp.path()),
            Err(ToolkitError::ManifestCorrupt { .. })
        ));
    }
}
