//! HTTP control API for the reader.
//!
//! Lets a browser extension or script push messages and drive playback.
//! Binds to localhost on port 8768 (configurable) using axum.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::audio::AudioOutput;
use crate::config::{Config, VoiceMode};
use crate::player::{PlaybackState, PlaybackStatus, Player};
use crate::presets::ClonePresetUpdate;
use crate::quotes;
use crate::synth::{Speaker, Synthesizer, TtsClient};

#[derive(Default)]
struct Messages {
    latest: Option<String>,
    last_autoplayed: Option<String>,
}

pub struct ApiState<S, O> {
    pub player: Player<S, O>,
    pub client: TtsClient,
    pub settings: Arc<Mutex<Config>>,
    speakers: Arc<Mutex<Vec<Speaker>>>,
    messages: Arc<Mutex<Messages>>,
}

impl<S, O> Clone for ApiState<S, O> {
    fn clone(&self) -> Self {
        Self {
            player: self.player.clone(),
            client: self.client.clone(),
            settings: self.settings.clone(),
            speakers: self.speakers.clone(),
            messages: self.messages.clone(),
        }
    }
}

impl<S: Synthesizer, O: AudioOutput> ApiState<S, O> {
    pub fn new(player: Player<S, O>, client: TtsClient, settings: Arc<Mutex<Config>>) -> Self {
        Self {
            player,
            client,
            settings,
            speakers: Arc::default(),
            messages: Arc::default(),
        }
    }

    /// Extract the configured quotes from `text` and start a session.
    fn play_text(&self, text: &str) -> Result<usize, String> {
        let (segments, voice) = {
            let settings = self.settings.lock();
            let segments = quotes::extract(
                text,
                &settings.quotes.marks(),
                settings.quotes.extract_only,
            );
            (segments, settings.voice.resolve())
        };
        let voice = voice.map_err(|e| e.to_string())?;
        self.player.start(segments, voice).map_err(|e| e.to_string())
    }
}

// --- Request/Response types ---

#[derive(Deserialize)]
struct PlayRequest {
    text: String,
}

#[derive(Deserialize)]
struct MessageRequest {
    id: String,
    text: String,
}

#[derive(Deserialize)]
struct SpeakerRequest {
    speaker: String,
}

#[derive(Deserialize)]
struct SelectPresetRequest {
    index: Option<usize>,
}

#[derive(Deserialize)]
struct ModeRequest {
    mode: VoiceMode,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct PromptRequest {
    prompt_text: Option<String>,
    prompt_audio_base64: Option<String>,
    prompt_audio_name: Option<String>,
}

/// Save the posted prompt as a preset, or the temporary one when no prompt
/// is posted.
#[derive(Deserialize, Default)]
#[serde(default)]
struct AddPresetRequest {
    name: String,
    #[serde(flatten)]
    prompt: PromptRequest,
}

#[derive(Serialize)]
struct StatusResponse {
    #[serde(flatten)]
    playback: PlaybackStatus,
    mode: VoiceMode,
    speaker: String,
    preset: Option<String>,
}

#[derive(Serialize)]
struct PresetEntry {
    index: usize,
    id: String,
    name: String,
    prompt_audio_name: String,
    created_at: String,
    selected: bool,
}

#[derive(Serialize)]
struct SimpleResponse {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    segments: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    speaker: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    index: Option<usize>,
}

impl SimpleResponse {
    fn ok(status: &str) -> Self {
        Self {
            status: status.into(),
            error: None,
            segments: None,
            speaker: None,
            index: None,
        }
    }

    fn err(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::ok("error")
        }
    }

    fn playing(segments: usize) -> Self {
        Self {
            segments: Some(segments),
            ..Self::ok("playing")
        }
    }
}

/// Build the axum router.
pub fn router<S: Synthesizer, O: AudioOutput>(state: ApiState<S, O>) -> Router {
    Router::new()
        .route("/status", get(handle_status::<S, O>))
        .route("/play", post(handle_play::<S, O>))
        .route("/message", post(handle_message::<S, O>))
        .route("/toggle", post(handle_toggle::<S, O>))
        .route("/pause", post(handle_pause::<S, O>))
        .route("/resume", post(handle_resume::<S, O>))
        .route("/stop", post(handle_stop::<S, O>))
        .route("/speakers", get(handle_speakers::<S, O>))
        .route("/speaker", post(handle_set_speaker::<S, O>))
        .route("/health", get(handle_health::<S, O>))
        .route("/mode", post(handle_set_mode::<S, O>))
        .route("/prompt", post(handle_set_prompt::<S, O>))
        .route(
            "/presets",
            get(handle_presets::<S, O>).post(handle_add_preset::<S, O>),
        )
        .route("/presets/select", post(handle_select_preset::<S, O>))
        .route(
            "/presets/{index}",
            post(handle_update_preset::<S, O>).delete(handle_delete_preset::<S, O>),
        )
        .with_state(state)
}

/// Start the control API server as a background tokio task.
pub async fn start_control_api<S: Synthesizer, O: AudioOutput>(
    state: ApiState<S, O>,
    port: u16,
) -> std::io::Result<()> {
    let app = router(state);
    let addr = format!("127.0.0.1:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Control API listening on {addr}");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!("Control API server error: {e}");
        }
    });
    Ok(())
}

// --- Handlers ---

async fn handle_status<S: Synthesizer, O: AudioOutput>(
    State(state): State<ApiState<S, O>>,
) -> Json<StatusResponse> {
    let settings = state.settings.lock();
    Json(StatusResponse {
        playback: state.player.status(),
        mode: settings.voice.mode,
        speaker: settings.voice.selected_speaker.clone(),
        preset: settings
            .voice
            .current_clone_preset()
            .map(|preset| preset.name.clone()),
    })
}

async fn handle_play<S: Synthesizer, O: AudioOutput>(
    State(state): State<ApiState<S, O>>,
    Json(req): Json<PlayRequest>,
) -> Json<SimpleResponse> {
    let preview: String = req.text.chars().take(80).collect();
    info!("HTTP /play: \"{}\"", preview.replace('\n', " "));

    state.messages.lock().latest = Some(req.text.clone());
    match state.play_text(&req.text) {
        Ok(segments) => Json(SimpleResponse::playing(segments)),
        Err(e) => Json(SimpleResponse::err(e)),
    }
}

async fn handle_message<S: Synthesizer, O: AudioOutput>(
    State(state): State<ApiState<S, O>>,
    Json(req): Json<MessageRequest>,
) -> Json<SimpleResponse> {
    let auto_play = {
        let settings = state.settings.lock();
        settings.playback.enabled && settings.playback.auto_play
    };

    let should_play = {
        let mut messages = state.messages.lock();
        messages.latest = Some(req.text.clone());
        let fresh = messages.last_autoplayed.as_deref() != Some(req.id.as_str());
        if auto_play && fresh && !state.player.is_active() {
            messages.last_autoplayed = Some(req.id.clone());
            true
        } else {
            false
        }
    };

    if !should_play {
        debug!("Message {} recorded", req.id);
        return Json(SimpleResponse::ok("recorded"));
    }

    info!("Auto-playing message {}", req.id);
    match state.play_text(&req.text) {
        Ok(segments) => Json(SimpleResponse::playing(segments)),
        Err(e) => Json(SimpleResponse::err(e)),
    }
}

async fn handle_toggle<S: Synthesizer, O: AudioOutput>(
    State(state): State<ApiState<S, O>>,
) -> Json<SimpleResponse> {
    match state.player.state() {
        PlaybackState::Playing => {
            state.player.pause();
            Json(SimpleResponse::ok("paused"))
        }
        PlaybackState::Paused => {
            state.player.resume();
            Json(SimpleResponse::ok("playing"))
        }
        PlaybackState::Idle | PlaybackState::Stopped => {
            let latest = state.messages.lock().latest.clone();
            let Some(text) = latest else {
                return Json(SimpleResponse::err("no message to play"));
            };
            match state.play_text(&text) {
                Ok(segments) => Json(SimpleResponse::playing(segments)),
                Err(e) => Json(SimpleResponse::err(e)),
            }
        }
    }
}

async fn handle_pause<S: Synthesizer, O: AudioOutput>(
    State(state): State<ApiState<S, O>>,
) -> Json<SimpleResponse> {
    if state.player.pause() {
        Json(SimpleResponse::ok("paused"))
    } else {
        Json(SimpleResponse::err("not playing"))
    }
}

async fn handle_resume<S: Synthesizer, O: AudioOutput>(
    State(state): State<ApiState<S, O>>,
) -> Json<SimpleResponse> {
    if state.player.resume() {
        Json(SimpleResponse::ok("playing"))
    } else {
        Json(SimpleResponse::err("not paused"))
    }
}

async fn handle_stop<S: Synthesizer, O: AudioOutput>(
    State(state): State<ApiState<S, O>>,
) -> Json<SimpleResponse> {
    state.player.stop();
    Json(SimpleResponse::ok("stopped"))
}

async fn handle_speakers<S: Synthesizer, O: AudioOutput>(
    State(state): State<ApiState<S, O>>,
) -> Result<Json<Vec<Speaker>>, Json<SimpleResponse>> {
    match state.client.speakers().await {
        Ok(speakers) => {
            *state.speakers.lock() = speakers.clone();
            Ok(Json(speakers))
        }
        Err(e) => {
            let cached = state.speakers.lock().clone();
            if cached.is_empty() {
                Err(Json(SimpleResponse::err(e.to_string())))
            } else {
                warn!("Speaker refresh failed, serving cached list: {e}");
                Ok(Json(cached))
            }
        }
    }
}

async fn handle_set_speaker<S: Synthesizer, O: AudioOutput>(
    State(state): State<ApiState<S, O>>,
    Json(req): Json<SpeakerRequest>,
) -> Json<SimpleResponse> {
    let speaker = req.speaker.trim().to_string();
    if speaker.is_empty() {
        return Json(SimpleResponse::err("empty speaker"));
    }

    let known = state.speakers.lock().clone();
    if !known.is_empty() && !known.iter().any(|s| s.id == speaker) {
        return Json(SimpleResponse::err(format!("Unknown speaker: {speaker}")));
    }

    info!("Speaker set to {speaker}");
    state.settings.lock().voice.selected_speaker = speaker.clone();
    Json(SimpleResponse {
        speaker: Some(speaker),
        ..SimpleResponse::ok("ok")
    })
}

async fn handle_health<S: Synthesizer, O: AudioOutput>(
    State(state): State<ApiState<S, O>>,
) -> Result<Json<serde_json::Value>, Json<SimpleResponse>> {
    state
        .client
        .health()
        .await
        .map(Json)
        .map_err(|e| Json(SimpleResponse::err(e.to_string())))
}

async fn handle_presets<S: Synthesizer, O: AudioOutput>(
    State(state): State<ApiState<S, O>>,
) -> Json<Vec<PresetEntry>> {
    let settings = state.settings.lock();
    let selected = settings.voice.current_clone_preset;
    Json(
        settings
            .voice
            .clone_presets
            .iter()
            .enumerate()
            .map(|(index, preset)| PresetEntry {
                index,
                id: preset.id.clone(),
                name: preset.name.clone(),
                prompt_audio_name: preset.prompt_audio_name.clone(),
                created_at: preset.created_at.clone(),
                selected: selected == Some(index),
            })
            .collect(),
    )
}

async fn handle_select_preset<S: Synthesizer, O: AudioOutput>(
    State(state): State<ApiState<S, O>>,
    Json(req): Json<SelectPresetRequest>,
) -> Json<SimpleResponse> {
    if state.settings.lock().voice.select_clone_preset(req.index) {
        Json(SimpleResponse::ok("ok"))
    } else {
        Json(SimpleResponse::err("preset index out of range"))
    }
}

async fn handle_set_mode<S: Synthesizer, O: AudioOutput>(
    State(state): State<ApiState<S, O>>,
    Json(req): Json<ModeRequest>,
) -> Json<SimpleResponse> {
    info!("Voice mode set to {:?}", req.mode);
    state.settings.lock().voice.mode = req.mode;
    Json(SimpleResponse::ok("ok"))
}

fn check_audio(prompt_audio_base64: &str) -> Result<(), String> {
    match BASE64.decode(prompt_audio_base64.trim()) {
        Ok(bytes) if !bytes.is_empty() => Ok(()),
        Ok(_) => Err("reference audio is empty".into()),
        Err(e) => Err(format!("reference audio is not valid base64: {e}")),
    }
}

/// Replace the temporary clone prompt, field by field.
async fn handle_set_prompt<S: Synthesizer, O: AudioOutput>(
    State(state): State<ApiState<S, O>>,
    Json(req): Json<PromptRequest>,
) -> Json<SimpleResponse> {
    if let Some(audio) = &req.prompt_audio_base64 {
        if let Err(e) = check_audio(audio) {
            return Json(SimpleResponse::err(e));
        }
    }

    let mut settings = state.settings.lock();
    let voice = &mut settings.voice;
    if let Some(text) = req.prompt_text {
        voice.temp_prompt_text = text;
    }
    if let Some(audio) = req.prompt_audio_base64 {
        voice.temp_prompt_audio_base64 = audio.trim().to_string();
    }
    if let Some(name) = req.prompt_audio_name {
        voice.temp_prompt_audio_name = name;
    }
    debug!("Temporary clone prompt updated");
    Json(SimpleResponse::ok("ok"))
}

async fn handle_add_preset<S: Synthesizer, O: AudioOutput>(
    State(state): State<ApiState<S, O>>,
    Json(req): Json<AddPresetRequest>,
) -> Json<SimpleResponse> {
    let mut settings = state.settings.lock();
    let voice = &mut settings.voice;

    let added = match (&req.prompt.prompt_text, &req.prompt.prompt_audio_base64) {
        (Some(text), Some(audio)) => {
            if text.trim().is_empty() {
                return Json(SimpleResponse::err("empty reference text"));
            }
            if let Err(e) = check_audio(audio) {
                return Json(SimpleResponse::err(e));
            }
            let audio_name = req.prompt.prompt_audio_name.as_deref().unwrap_or_default();
            voice.add_clone_preset(&req.name, text, audio.trim(), audio_name);
            Ok(())
        }
        (None, None) => voice.save_temp_prompt_as_preset(&req.name).map(|_| ()),
        _ => return Json(SimpleResponse::err("pass both prompt_text and prompt_audio_base64")),
    };

    match added {
        Ok(()) => Json(SimpleResponse {
            index: Some(voice.clone_presets.len() - 1),
            ..SimpleResponse::ok("ok")
        }),
        Err(e) => Json(SimpleResponse::err(e.to_string())),
    }
}

async fn handle_update_preset<S: Synthesizer, O: AudioOutput>(
    State(state): State<ApiState<S, O>>,
    Path(index): Path<usize>,
    Json(update): Json<ClonePresetUpdate>,
) -> Json<SimpleResponse> {
    if let Some(audio) = &update.prompt_audio_base64 {
        if let Err(e) = check_audio(audio) {
            return Json(SimpleResponse::err(e));
        }
    }
    if state.settings.lock().voice.update_clone_preset(index, update) {
        Json(SimpleResponse {
            index: Some(index),
            ..SimpleResponse::ok("ok")
        })
    } else {
        Json(SimpleResponse::err("preset index out of range"))
    }
}

async fn handle_delete_preset<S: Synthesizer, O: AudioOutput>(
    State(state): State<ApiState<S, O>>,
    Path(index): Path<usize>,
) -> Json<SimpleResponse> {
    if state.settings.lock().voice.delete_clone_preset(index) {
        Json(SimpleResponse::ok("deleted"))
    } else {
        Json(SimpleResponse::err("preset index out of range"))
    }
}
