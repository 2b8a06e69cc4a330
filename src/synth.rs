//! HTTP client for the CosyVoice TTS backend.
//!
//! Routes a `VoiceConfig` to one of two request shapes:
//! - preset speaker: `POST {base}/` with `{text, speaker, speed}`
//! - zero-shot clone: `POST {base}/api/tts_zero_shot` with the reference
//!   recording base64-encoded in `prompt_wav`
//!
//! Both answer with raw audio bytes. Non-success statuses become
//! `TtsError::Backend`. Synthesis requests carry no timeout and are never
//! retried here.

use std::future::Future;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::error::TtsError;
use crate::voice::VoiceConfig;

const HEALTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Produces encoded audio for one segment of text.
pub trait Synthesizer: Send + Sync + 'static {
    /// The returned future owns everything it needs, so it can be driven by
    /// a task that outlives the caller.
    fn synthesize(
        &self,
        text: &str,
        voice: &VoiceConfig,
    ) -> impl Future<Output = Result<Vec<u8>, TtsError>> + Send + 'static;
}

impl<T: Synthesizer> Synthesizer for std::sync::Arc<T> {
    fn synthesize(
        &self,
        text: &str,
        voice: &VoiceConfig,
    ) -> impl Future<Output = Result<Vec<u8>, TtsError>> + Send + 'static {
        (**self).synthesize(text, voice)
    }
}

/// A speaker offered by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Speaker {
    pub id: String,
    pub name: String,
}

#[derive(Deserialize)]
struct SpeakerEntry {
    voice_id: Option<String>,
    name: Option<String>,
}

#[derive(Clone)]
pub struct TtsClient {
    base_url: String,
    client: Client,
}

impl TtsClient {
    pub fn new(base_url: &str) -> Result<Self, TtsError> {
        let client = Client::builder().build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET /api/health`: the backend's own status document.
    pub async fn health(&self) -> Result<serde_json::Value, TtsError> {
        let url = format!("{}/api/health", self.base_url);
        let resp = self.client.get(&url).timeout(HEALTH_TIMEOUT).send().await?;
        let resp = check_status(resp).await?;
        let data: serde_json::Value = resp.json().await?;
        info!("Backend healthy: {data}");
        Ok(data)
    }

    /// `GET /speakers`: the preset speakers the backend can synthesize.
    pub async fn speakers(&self) -> Result<Vec<Speaker>, TtsError> {
        let url = format!("{}/speakers", self.base_url);
        let resp = check_status(self.client.get(&url).send().await?).await?;
        let entries: Vec<SpeakerEntry> = resp.json().await?;

        let speakers: Vec<Speaker> = entries
            .into_iter()
            .filter_map(|entry| {
                let id = entry.voice_id.or_else(|| entry.name.clone())?;
                let name = entry.name.unwrap_or_else(|| id.clone());
                Some(Speaker { id, name })
            })
            .collect();
        info!("Backend lists {} speakers", speakers.len());
        Ok(speakers)
    }
}

impl Synthesizer for TtsClient {
    fn synthesize(
        &self,
        text: &str,
        voice: &VoiceConfig,
    ) -> impl Future<Output = Result<Vec<u8>, TtsError>> + Send + 'static {
        let request = build_request(&self.base_url, text, voice);
        let client = self.client.clone();
        let preview: String = text.chars().take(30).collect();
        let label = voice.label();

        async move {
            let (url, body) = request?;
            info!("Synthesizing ({label}): \"{preview}\"");

            let resp = check_status(client.post(&url).json(&body).send().await?).await?;
            let audio = resp.bytes().await?.to_vec();
            debug!("Received {} bytes of audio", audio.len());
            Ok(audio)
        }
    }
}

fn build_request(
    base_url: &str,
    text: &str,
    voice: &VoiceConfig,
) -> Result<(String, serde_json::Value), TtsError> {
    if text.trim().is_empty() {
        return Err(TtsError::config("cannot synthesize empty text"));
    }
    voice.validate()?;

    Ok(match voice {
        VoiceConfig::Preset { speaker_id, speed } => (
            format!("{base_url}/"),
            json!({
                "text": text,
                "speaker": speaker_id,
                "speed": speed,
            }),
        ),
        VoiceConfig::Clone(prompt) => (
            format!("{base_url}/api/tts_zero_shot"),
            json!({
                "text": text,
                "prompt_text": prompt.prompt_text,
                "prompt_wav": BASE64.encode(&prompt.prompt_audio),
                "speed": prompt.speed,
                "mode": prompt.mode,
                "instruction": prompt.instruction,
            }),
        ),
    })
}

async fn check_status(resp: Response) -> Result<Response, TtsError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    warn!("TTS backend returned status {status}: {body}");
    Err(TtsError::Backend {
        status: status.as_u16(),
        body,
    })
}
