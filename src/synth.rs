//! The text-to-speech seam.
//!
//! The runner only talks to [`SpeechSynthesizer`]; [`crate::elevenlabs`]
//! provides the production implementation. Tests and offline tools inject
//! their own through [`crate::config::ToolkitConfigBuilder::synthesizer`].

use crate::error::TtsError;
use async_trait::async_trait;

/// One synthesis request: everything that goes into the cache key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisRequest {
    pub voice_id: String,
    pub model_id: String,
    pub output_format: String,
    pub text: String,
}

/// Generated audio plus the provider's raw response.
#[derive(Debug, Clone)]
pub struct SynthesisOutput {
    pub audio: Vec<u8>,
    /// Raw JSON body (alignment data etc.), stored next to the audio in the cache.
    pub raw_json: String,
}

/// Turns text into audio.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `request.text` with the requested voice, model and format.
    ///
    /// # Errors
    /// Returns [`TtsError`] if the provider rejects or fails the request.
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesisOutput, TtsError>;
}
