//! ElevenLabs HTTP client.
//!
//! Speech is requested from the `with-timestamps` endpoint, which returns a
//! JSON body holding base64 audio plus character alignment. The whole JSON is
//! kept (it goes into the cache next to the audio) and the audio is decoded.
//!
//! ## Retry Strategy
//!
//! 429, 5xx and transport errors are retried inside one [`synthesize`] call
//! with exponential backoff (`retry_backoff_ms * 2^attempt`). A 429 carrying
//! `Retry-After` waits at least that long. No single wait exceeds
//! [`MAX_RETRY_DELAY_MS`]. Auth and other 4xx errors fail at once.
//!
//! [`synthesize`]: SpeechSynthesizer::synthesize

use crate::config::ToolkitConfig;
use crate::error::TtsError;
use crate::synth::{SpeechSynthesizer, SynthesisOutput, SynthesisRequest};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

/// Upper bound for one wait between attempts.
pub const MAX_RETRY_DELAY_MS: u64 = 120_000;

/// Language shown for voices without a language label.
pub const UNKNOWN_LANGUAGE: &str = "Ukendt";

/// A voice available to the account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceInfo {
    pub voice_id: String,
    pub name: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub accent: String,
    #[serde(default)]
    pub preview_url: String,
}

impl VoiceInfo {
    /// Language used for grouping and sorting.
    pub fn language_for_filter(&self) -> &str {
        if self.language.trim().is_empty() {
            UNKNOWN_LANGUAGE
        } else {
            self.language.trim()
        }
    }
}

/// Client for the ElevenLabs text-to-speech API.
#[derive(Clone)]
pub struct ElevenLabsClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    max_retries: u32,
    retry_backoff_ms: u64,
}

impl fmt::Debug for ElevenLabsClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElevenLabsClient")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl ElevenLabsClient {
    /// Create a client with an explicit API key.
    pub fn new(config: &ToolkitConfig, api_key: impl Into<String>) -> Result<Self, TtsError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(TtsError::MissingApiKey);
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.api_timeout_secs))
            .build()
            .map_err(|e| TtsError::Request(e.to_string()))?;
        Ok(Self {
            http,
            api_key,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
        })
    }

    /// Create a client with the key from the config or `ELEVENLABS_API_KEY`.
    pub fn from_config(config: &ToolkitConfig) -> Result<Self, TtsError> {
        let key = config.resolve_api_key().ok_or(TtsError::MissingApiKey)?;
        Self::new(config, key)
    }

    /// List the account's voices, sorted by language then name.
    pub async fn list_voices(&self) -> Result<Vec<VoiceInfo>, TtsError> {
        let url = format!("{}/v1/voices", self.base_url);
        let response = self
            .http
            .get(&url)
            .header("xi-api-key", &self.api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        let retry_after = retry_after_secs(response.headers());
        let body = response.text().await.map_err(request_error)?;
        if !status.is_success() {
            return Err(status_error(status.as_u16(), retry_after, body));
        }
        parse_voices(&body)
    }

    async fn synthesize_once(&self, request: &SynthesisRequest) -> Result<SynthesisOutput, TtsError> {
        let url = format!(
            "{}/v1/text-to-speech/{}/with-timestamps",
            self.base_url, request.voice_id
        );
        let payload = json!({
            "text": request.text,
            "model_id": request.model_id,
            "voice_settings": {
                "stability": 0.5,
                "similarity_boost": 0.8,
                "style": 0.0,
                "use_speaker_boost": true
            }
        });

        let response = self
            .http
            .post(&url)
            .query(&[("output_format", request.output_format.as_str())])
            .header("xi-api-key", &self.api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        let retry_after = retry_after_secs(response.headers());
        let body = response.text().await.map_err(request_error)?;
        if !status.is_success() {
            return Err(status_error(status.as_u16(), retry_after, body));
        }

        let audio = decode_audio(&body)?;
        Ok(SynthesisOutput {
            audio,
            raw_json: body,
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsClient {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesisOutput, TtsError> {
        if request.voice_id.trim().is_empty() {
            return Err(TtsError::MissingVoice);
        }
        if request.text.trim().is_empty() {
            return Err(TtsError::EmptyText);
        }

        let mut attempt = 0u32;
        loop {
            match self.synthesize_once(request).await {
                Ok(output) => {
                    debug!(
                        "ElevenLabs: {} chars → {} bytes ({} retries)",
                        request.text.chars().count(),
                        output.audio.len(),
                        attempt
                    );
                    return Ok(output);
                }
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    let retry_after = match &e {
                        TtsError::RateLimited { retry_after_secs } => *retry_after_secs,
                        _ => None,
                    };
                    let backoff = retry_delay_ms(self.retry_backoff_ms, attempt, retry_after);
                    warn!(
                        "ElevenLabs: {}, retry {}/{} after {}ms",
                        e, attempt, self.max_retries, backoff
                    );
                    sleep(Duration::from_millis(backoff)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Wait before retry `attempt` (1-based): `base_ms * 2^(attempt-1)`, at least
/// `retry_after_secs`, capped at [`MAX_RETRY_DELAY_MS`].
fn retry_delay_ms(base_ms: u64, attempt: u32, retry_after_secs: Option<u64>) -> u64 {
    let factor = 2u64.checked_pow(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
    let backoff = base_ms.saturating_mul(factor);
    let server = retry_after_secs.map_or(0, |s| s.saturating_mul(1000));
    backoff.max(server).min(MAX_RETRY_DELAY_MS)
}

// ── Response helpers ─────────────────────────────────────────────────────

/// The base64 audio field of a `with-timestamps` response.
///
/// Reads `audio_base64`, falling back to `audio` and `audioBase64`.
pub fn extract_audio_base64(json: &Value) -> Option<&str> {
    ["audio_base64", "audio", "audioBase64"]
        .iter()
        .find_map(|field| json.get(field).and_then(Value::as_str))
}

fn decode_audio(body: &str) -> Result<Vec<u8>, TtsError> {
    let json: Value =
        serde_json::from_str(body).map_err(|e| TtsError::MalformedResponse(e.to_string()))?;
    let b64 = extract_audio_base64(&json)
        .ok_or_else(|| TtsError::MalformedResponse("response has no 'audio_base64'".into()))?;
    STANDARD
        .decode(b64)
        .map_err(|e| TtsError::MalformedResponse(format!("invalid base64 audio: {e}")))
}

/// Parse a `/v1/voices` body.
pub fn parse_voices(body: &str) -> Result<Vec<VoiceInfo>, TtsError> {
    let json: Value =
        serde_json::from_str(body).map_err(|e| TtsError::MalformedResponse(e.to_string()))?;
    let voices = json
        .get("voices")
        .and_then(Value::as_array)
        .ok_or_else(|| TtsError::MalformedResponse("response has no 'voices' array".into()))?;

    let str_at = |v: &Value, path: &[&str]| -> String {
        path.iter()
            .try_fold(v, |node, key| node.get(key))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    let mut list: Vec<VoiceInfo> = voices
        .iter()
        .filter_map(|v| {
            let voice_id = str_at(v, &["voice_id"]);
            if voice_id.trim().is_empty() {
                return None;
            }
            let mut preview_url = str_at(v, &["preview_url"]);
            if preview_url.trim().is_empty() {
                preview_url = str_at(v, &["fine_tuning", "preview_url"]);
            }
            Some(VoiceInfo {
                voice_id,
                name: str_at(v, &["name"]),
                language: str_at(v, &["labels", "language"]),
                accent: str_at(v, &["labels", "accent"]),
                preview_url,
            })
        })
        .collect();

    list.sort_by(|a, b| {
        a.language_for_filter()
            .to_lowercase()
            .cmp(&b.language_for_filter().to_lowercase())
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
    });
    Ok(list)
}

fn request_error(e: reqwest::Error) -> TtsError {
    if e.is_timeout() {
        TtsError::Request(format!("timed out: {e}"))
    } else {
        TtsError::Request(e.to_string())
    }
}

fn retry_after_secs(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

fn status_error(status: u16, retry_after_secs: Option<u64>, body: String) -> TtsError {
    match status {
        401 | 403 => TtsError::Auth {
            status,
            detail: body,
        },
        429 => TtsError::RateLimited { retry_after_secs },
        _ => TtsError::Http { status, body },
    }
}
