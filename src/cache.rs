//! Content-addressed cache of generated speech.
//!
//! Every synthesized segment is stored under a key derived from everything
//! that determines the audio: voice, model, output format and the exact
//! text. A later job (or a resumed one) asking for the same combination gets
//! the stored bytes instead of a new paid API call.
//!
//! Layout: `<root>/<key><ext>` holds the audio, `<root>/<key>.json` the raw
//! provider response. An entry counts as present only when both exist.
//! Entries are never evicted and writers are not locked against each other.

use crate::error::ToolkitError;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable overriding the application data directory.
pub const DATA_DIR_ENV: &str = "DBT_DATA_DIR";

/// Application data directory: `$DBT_DATA_DIR`, else `<local data dir>/DaisyBrailleToolkit`.
pub fn app_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("DaisyBrailleToolkit")
}

/// Deterministic cache key for one synthesis: lowercase hex SHA-256.
pub fn cache_key(voice_id: &str, model_id: &str, output_format: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("voice:{voice_id}\nmodel:{model_id}\nformat:{output_format}\n").as_bytes());
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// File extension (with dot) for an ElevenLabs output format such as `mp3_44100_128`.
pub fn extension_for_format(output_format: &str) -> &'static str {
    let codec = output_format
        .split('_')
        .next()
        .unwrap_or_default()
        .to_lowercase();
    match codec.as_str() {
        "mp3" => ".mp3",
        "pcm" => ".pcm",
        "ulaw" => ".ulaw",
        "alaw" => ".alaw",
        "opus" => ".opus",
        "wav" => ".wav",
        _ => ".bin",
    }
}

/// Job-folder file stem for segment `index`: `seg_0001`.
pub fn segment_file_stem(index: usize) -> String {
    format!("seg_{index:04}")
}

/// The on-disk TTS cache.
#[derive(Debug, Clone)]
pub struct TtsCache {
    root: PathBuf,
}

impl TtsCache {
    /// Open (creating if needed) a cache at `root`, or the default location.
    pub fn open(root: Option<&Path>) -> Result<Self, ToolkitError> {
        let root = root
            .map(Path::to_path_buf)
            .unwrap_or_else(|| app_data_dir().join("tts-cache"));
        std::fs::create_dir_all(&root).map_err(|e| ToolkitError::io(&root, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn audio_path(&self, key: &str, ext: &str) -> PathBuf {
        self.root.join(format!("{key}{ext}"))
    }

    pub fn json_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }

    /// True when both the audio and the JSON for `key` are present.
    pub async fn has(&self, key: &str, ext: &str) -> bool {
        let audio = tokio::fs::try_exists(self.audio_path(key, ext)).await;
        let json = tokio::fs::try_exists(self.json_path(key)).await;
        matches!((audio, json), (Ok(true), Ok(true)))
    }

    /// Store an entry. An entry that is already present is left untouched.
    ///
    /// Both files are written to a temp name and renamed into place, audio
    /// first, so a crash never leaves a complete-looking entry with a
    /// truncated audio file.
    pub async fn put(
        &self,
        key: &str,
        ext: &str,
        audio: &[u8],
        raw_json: &str,
    ) -> Result<bool, ToolkitError> {
        if self.has(key, ext).await {
            debug!("Cache entry {} already present", key);
            return Ok(false);
        }
        write_atomic(&self.audio_path(key, ext), audio).await?;
        write_atomic(&self.json_path(key), raw_json.as_bytes()).await?;
        debug!("Cached {} ({} bytes)", key, audio.len());
        Ok(true)
    }

    /// Copy an entry into a job's TTS folder as `seg_NNNN<ext>` / `seg_NNNN.json`.
    pub async fn copy_to_job(
        &self,
        key: &str,
        ext: &str,
        job_tts_dir: &Path,
        index: usize,
    ) -> Result<PathBuf, ToolkitError> {
        tokio::fs::create_dir_all(job_tts_dir)
            .await
            .map_err(|e| ToolkitError::io(job_tts_dir, e))?;

        let stem = segment_file_stem(index);
        let out_audio = job_tts_dir.join(format!("{stem}{ext}"));
        let out_json = job_tts_dir.join(format!("{stem}.json"));

        let src_audio = self.audio_path(key, ext);
        tokio::fs::copy(&src_audio, &out_audio)
            .await
            .map_err(|e| ToolkitError::io(&src_audio, e))?;
        let src_json = self.json_path(key);
        tokio::fs::copy(&src_json, &out_json)
            .await
            .map_err(|e| ToolkitError::io(&src_json, e))?;

        Ok(out_audio)
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ToolkitError> {
    let tmp = path.with_extension(format!(
        "{}.tmp",
        path.extension().and_then(|e| e.to_str()).unwrap_or_default()
    ));
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| ToolkitError::io(&tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| ToolkitError::io(path, e))
}
