//! Configuration types for conversion jobs.
//!
//! All runner behaviour is controlled through [`ToolkitConfig`], built via
//! [`ToolkitConfigBuilder`]. The TTS-related fields are defaults for new jobs;
//! once a job exists its own [`crate::manifest::TtsSettings`] are
//! authoritative so that a resumed job keeps producing the same cache keys.

use crate::error::ToolkitError;
use crate::manifest::{TtsSettings, DEFAULT_LANGUAGE};
use crate::pipeline::segment::safe_max_chars;
use crate::progress::ProgressCallback;
use crate::synth::SpeechSynthesizer;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Default ElevenLabs model.
pub const DEFAULT_MODEL_ID: &str = "eleven_multilingual_v2";

/// Default ElevenLabs output format (`codec_samplerate_bitrate`).
pub const DEFAULT_OUTPUT_FORMAT: &str = "mp3_44100_128";

/// Models offered by the CLI; any other id is passed through unchanged.
pub const KNOWN_MODELS: &[&str] = &[
    "eleven_v3",
    "eleven_multilingual_v2",
    "eleven_turbo_v2_5",
    "eleven_flash_v2_5",
];

/// Default ElevenLabs API root.
pub const DEFAULT_API_BASE_URL: &str = "https://api.elevenlabs.io";

/// Configuration for running conversion jobs.
///
/// # Example
/// ```rust
/// use daisy_braille_toolkit::ToolkitConfig;
///
/// let config = ToolkitConfig::builder()
///     .model_id("eleven_turbo_v2_5")
///     .api_max_chars(3000)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_chars_per_segment(), 2800);
/// ```
#[derive(Clone)]
pub struct ToolkitConfig {
    /// ElevenLabs model for new jobs. Default: `eleven_multilingual_v2`.
    pub model_id: String,

    /// ElevenLabs output format for new jobs. Default: `mp3_44100_128`.
    pub output_format: String,

    /// Provider character limit per request. Default: 5000.
    ///
    /// Segments are sized from this minus a safety margin, see
    /// [`safe_max_chars`].
    pub api_max_chars: usize,

    /// Language tag for new jobs. Default: `da-DK`.
    pub language: String,

    /// Apply pronunciation rules to the spoken text of Danish jobs. Default: true.
    pub apply_text_rules: bool,

    /// Root of the shared TTS cache. If None, uses the app data directory.
    pub cache_root: Option<PathBuf>,

    /// External disc-image tool. If None, the ISO image is skipped.
    pub iso_tool: Option<IsoTool>,

    /// ElevenLabs API key. If None, read from `ELEVENLABS_API_KEY` when needed.
    pub api_key: Option<String>,

    /// ElevenLabs API root. Default: `https://api.elevenlabs.io`.
    pub api_base_url: String,

    /// Per-request timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Attempts after a transient provider failure (429, 5xx, timeout). Default: 2.
    ///
    /// This applies within one synthesis request only. A step that fails is
    /// never retried automatically; the job has to be resumed.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 1000.
    pub retry_backoff_ms: u64,

    /// Pre-constructed synthesizer. Takes precedence over the ElevenLabs client.
    pub synthesizer: Option<Arc<dyn SpeechSynthesizer>>,

    /// Receives progress events while a job runs.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ToolkitConfig {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_MODEL_ID.to_string(),
            output_format: DEFAULT_OUTPUT_FORMAT.to_string(),
            api_max_chars: crate::pipeline::segment::DEFAULT_API_MAX_CHARS,
            language: DEFAULT_LANGUAGE.to_string(),
            apply_text_rules: true,
            cache_root: None,
            iso_tool: None,
            api_key: None,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            api_timeout_secs: 120,
            max_retries: 2,
            retry_backoff_ms: 1000,
            synthesizer: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ToolkitConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolkitConfig")
            .field("model_id", &self.model_id)
            .field("output_format", &self.output_format)
            .field("api_max_chars", &self.api_max_chars)
            .field("language", &self.language)
            .field("apply_text_rules", &self.apply_text_rules)
            .field("cache_root", &self.cache_root)
            .field("iso_tool", &self.iso_tool)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_base_url", &self.api_base_url)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("max_retries", &self.max_retries)
            .field(
                "synthesizer",
                &self.synthesizer.as_ref().map(|_| "<dyn SpeechSynthesizer>"),
            )
            .finish()
    }
}

impl ToolkitConfig {
    /// Create a new builder for `ToolkitConfig`.
    pub fn builder() -> ToolkitConfigBuilder {
        ToolkitConfigBuilder {
            config: Self::default(),
        }
    }

    /// Segment budget derived from the provider limit.
    pub fn max_chars_per_segment(&self) -> usize {
        safe_max_chars(self.api_max_chars)
    }

    /// TTS settings for a new job using `voice_id`.
    pub fn tts_settings(&self, voice_id: impl Into<String>) -> TtsSettings {
        TtsSettings {
            voice_id: voice_id.into(),
            model_id: self.model_id.clone(),
            output_format: self.output_format.clone(),
            max_chars_per_segment: self.max_chars_per_segment(),
            apply_text_rules: self.apply_text_rules,
        }
    }

    /// API key from the config, falling back to `ELEVENLABS_API_KEY`.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var("ELEVENLABS_API_KEY").ok())
            .filter(|k| !k.trim().is_empty())
    }
}

/// Builder for [`ToolkitConfig`].
#[derive(Debug)]
pub struct ToolkitConfigBuilder {
    config: ToolkitConfig,
}

impl ToolkitConfigBuilder {
    pub fn model_id(mut self, model: impl Into<String>) -> Self {
        self.config.model_id = model.into();
        self
    }

    pub fn output_format(mut self, format: impl Into<String>) -> Self {
        self.config.output_format = format.into();
        self
    }

    pub fn api_max_chars(mut self, n: usize) -> Self {
        self.config.api_max_chars = n;
        self
    }

    pub fn language(mut self, lang: impl Into<String>) -> Self {
        self.config.language = lang.into();
        self
    }

    pub fn apply_text_rules(mut self, v: bool) -> Self {
        self.config.apply_text_rules = v;
        self
    }

    pub fn cache_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.cache_root = Some(root.into());
        self
    }

    pub fn iso_tool(mut self, tool: IsoTool) -> Self {
        self.config.iso_tool = Some(tool);
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.api_base_url = url.into();
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs.max(1);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn synthesizer(mut self, synthesizer: Arc<dyn SpeechSynthesizer>) -> Self {
        self.config.synthesizer = Some(synthesizer);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ToolkitConfig, ToolkitError> {
        let c = &self.config;
        if c.model_id.trim().is_empty() {
            return Err(ToolkitError::InvalidConfig("model id must not be empty".into()));
        }
        if c.output_format.trim().is_empty() {
            return Err(ToolkitError::InvalidConfig(
                "output format must not be empty".into(),
            ));
        }
        if !c.api_base_url.starts_with("http://") && !c.api_base_url.starts_with("https://") {
            return Err(ToolkitError::InvalidConfig(format!(
                "API base URL must be http(s), got '{}'",
                c.api_base_url
            )));
        }
        Ok(self.config)
    }
}

/// An external ISO 9660 mastering tool with mkisofs-compatible arguments.
///
/// The runner appends `-J -R -V <label> -o <output> -graft-points <dir>=<path>…`
/// after `args`, so `xorriso` works as `IsoTool::new("xorriso").arg("-as").arg("mkisofs")`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct IsoTool {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl IsoTool {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Parse a whitespace-separated command line such as `"xorriso -as mkisofs"`.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let program = parts.next()?;
        Some(Self {
            program: program.to_string(),
            args: parts.map(str::to_string).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = ToolkitConfig::default();
        assert_eq!(c.model_id, DEFAULT_MODEL_ID);
        assert_eq!(c.output_format, DEFAULT_OUTPUT_FORMAT);
        assert_eq!(c.max_chars_per_segment(), 4800);
        assert!(c.apply_text_rules);
        assert!(KNOWN_MODELS.contains(&c.model_id.as_str()));
    }

    #[test]
    fn builder_rejects_empty_format() {
        let r = ToolkitConfig::builder().output_format("  ").build();
        assert!(matches!(r, Err(ToolkitError::InvalidConfig(_))));
    }

    #[test]
    fn builder_rejects_non_http_base_url() {
        let r = ToolkitConfig::builder().api_base_url("ftp://x").build();
        assert!(r.is_err());
    }

    #[test]
    fn tts_settings_copy_job_defaults() {
        let c = ToolkitConfig::builder()
            .model_id("eleven_flash_v2_5")
            .api_max_chars(1000)
            .apply_text_rules(false)
            .build()
            .unwrap();
        let s = c.tts_settings("voice-1");
        assert_eq!(s.voice_id, "voice-1");
        assert_eq!(s.model_id, "eleven_flash_v2_5");
        assert_eq!(s.max_chars_per_segment, 800);
        assert!(!s.apply_text_rules);
    }

    #[test]
    fn debug_redacts_api_key() {
        let c = ToolkitConfig::builder().api_key("sk-secret").build().unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("sk-secret"));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn iso_tool_from_command_line() {
        let t = IsoTool::from_command_line("xorriso -as mkisofs").unwrap();
        assert_eq!(t.program, "xorriso");
        assert_eq!(t.args, vec!["-as", "mkisofs"]);
        assert!(IsoTool::from_command_line("   ").is_none());
    }
}
