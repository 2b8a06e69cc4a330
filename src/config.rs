//! Configuration management for cosyvoice-reader.
//!
//! Loads config from YAML files in standard locations. The reader never writes
//! settings back; edits made through the control API live in memory only.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::TtsError;
use crate::quotes::{QuotationStyle, QuoteMarks};
use crate::voice::{ClonePrompt, VoiceConfig};

pub const DEFAULT_TTS_MODE: &str = "零样本复制";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub api_base_url: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:9880".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceMode {
    #[default]
    Preset,
    Clone,
}

/// A saved reference recording for voice cloning.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClonePreset {
    pub id: String,
    pub name: String,
    pub prompt_text: String,
    pub prompt_audio_base64: String,
    pub prompt_audio_name: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VoiceSettings {
    pub mode: VoiceMode,
    pub selected_speaker: String,
    pub speed: f32,
    pub tts_mode: String,
    pub instruction: String,
    pub clone_presets: Vec<ClonePreset>,
    pub current_clone_preset: Option<usize>,
    pub temp_prompt_text: String,
    pub temp_prompt_audio_base64: String,
    pub temp_prompt_audio_name: String,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            mode: VoiceMode::Preset,
            selected_speaker: String::new(),
            speed: 1.0,
            tts_mode: DEFAULT_TTS_MODE.into(),
            instruction: String::new(),
            clone_presets: Vec::new(),
            current_clone_preset: None,
            temp_prompt_text: String::new(),
            temp_prompt_audio_base64: String::new(),
            temp_prompt_audio_name: String::new(),
        }
    }
}

impl VoiceSettings {
    /// Resolve the active mode into concrete synthesis parameters.
    pub fn resolve(&self) -> Result<VoiceConfig, TtsError> {
        let speed = if self.speed > 0.0 { self.speed } else { 1.0 };

        let voice = match self.mode {
            VoiceMode::Preset => VoiceConfig::preset(self.selected_speaker.trim(), speed),
            VoiceMode::Clone => {
                let (prompt_text, prompt_b64) = match self.current_clone_preset() {
                    Some(preset) => (&preset.prompt_text, &preset.prompt_audio_base64),
                    None => (&self.temp_prompt_text, &self.temp_prompt_audio_base64),
                };
                if prompt_text.trim().is_empty() || prompt_b64.trim().is_empty() {
                    return Err(TtsError::config(
                        "set a reference recording and text, or select a clone preset",
                    ));
                }
                let prompt_audio = BASE64
                    .decode(prompt_b64.trim())
                    .map_err(|e| TtsError::config(format!("reference audio is not valid base64: {e}")))?;
                VoiceConfig::Clone(ClonePrompt {
                    prompt_text: prompt_text.clone(),
                    prompt_audio: prompt_audio.into(),
                    speed,
                    mode: if self.tts_mode.is_empty() {
                        DEFAULT_TTS_MODE.into()
                    } else {
                        self.tts_mode.clone()
                    },
                    instruction: self.instruction.clone(),
                })
            }
        };

        voice.validate()?;
        Ok(voice)
    }

    /// Read a reference recording from disk into the temp clone prompt.
    pub async fn load_prompt_audio(&mut self, path: &Path) -> Result<(), TtsError> {
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            TtsError::config(format!("cannot read reference audio {}: {e}", path.display()))
        })?;
        if bytes.is_empty() {
            return Err(TtsError::config(format!(
                "reference audio {} is empty",
                path.display()
            )));
        }
        self.temp_prompt_audio_base64 = BASE64.encode(&bytes);
        self.temp_prompt_audio_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        info!(
            "Loaded reference audio {} ({} bytes)",
            path.display(),
            bytes.len()
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QuoteSettings {
    pub style: QuotationStyle,
    pub custom_left: String,
    pub custom_right: String,
    pub extract_only: bool,
}

impl Default for QuoteSettings {
    fn default() -> Self {
        Self {
            style: QuotationStyle::Japanese,
            custom_left: "「".into(),
            custom_right: "」".into(),
            extract_only: true,
        }
    }
}

impl QuoteSettings {
    pub fn marks(&self) -> QuoteMarks {
        QuoteMarks::for_style(self.style, &self.custom_left, &self.custom_right)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub enabled: bool,
    pub auto_play: bool,
    pub preload_count: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_play: false,
            preload_count: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8768,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    pub notifications: bool,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            notifications: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend: BackendConfig,
    pub voice: VoiceSettings,
    pub quotes: QuoteSettings,
    pub playback: PlaybackConfig,
    pub api: ApiConfig,
    pub feedback: FeedbackConfig,
}

impl Config {
    /// Load configuration from YAML file.
    ///
    /// Searches standard locations if no path is provided:
    /// 1. ./config.yaml
    /// 2. ~/.config/cosyvoice-reader/config.yaml
    /// 3. /etc/cosyvoice-reader/config.yaml
    pub fn load(path: Option<&Path>) -> Self {
        let resolved = path.map(PathBuf::from).or_else(|| {
            let candidates = [
                std::env::current_dir().ok().map(|d| d.join("config.yaml")),
                dirs::home_dir().map(|h| h.join(".config/cosyvoice-reader/config.yaml")),
                Some(PathBuf::from("/etc/cosyvoice-reader/config.yaml")),
            ];
            candidates.into_iter().flatten().find(|p| p.exists())
        });

        let Some(config_path) = resolved else {
            info!("No config file found, using defaults");
            return Self::default();
        };

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match Self::from_yaml(&contents) {
                Ok(config) => {
                    info!("Loaded config from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {e}, using defaults", config_path.display());
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {e}, using defaults", config_path.display());
                Self::default()
            }
        }
    }

    pub fn from_yaml(contents: &str) -> Result<Self, serde_yml::Error> {
        let mut config: Self = serde_yml::from_str(contents)?;
        config.playback.preload_count = config.playback.preload_count.max(1);
        Ok(config)
    }
}
