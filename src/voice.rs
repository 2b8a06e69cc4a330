//! Resolved synthesis parameters for one playback session.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::TtsError;

/// Reference recording and text for zero-shot voice cloning.
#[derive(Clone, PartialEq)]
pub struct ClonePrompt {
    pub prompt_text: String,
    pub prompt_audio: Arc<[u8]>,
    pub speed: f32,
    pub mode: String,
    pub instruction: String,
}

impl fmt::Debug for ClonePrompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClonePrompt")
            .field("prompt_text", &self.prompt_text)
            .field("prompt_audio_bytes", &self.prompt_audio.len())
            .field("speed", &self.speed)
            .field("mode", &self.mode)
            .field("instruction", &self.instruction)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum VoiceConfig {
    Preset { speaker_id: String, speed: f32 },
    Clone(ClonePrompt),
}

impl VoiceConfig {
    pub fn preset(speaker_id: impl Into<String>, speed: f32) -> Self {
        Self::Preset {
            speaker_id: speaker_id.into(),
            speed,
        }
    }

    /// Reject configurations the backend cannot synthesize with.
    pub fn validate(&self) -> Result<(), TtsError> {
        match self {
            Self::Preset { speaker_id, .. } if speaker_id.trim().is_empty() => {
                Err(TtsError::config("no speaker selected"))
            }
            Self::Clone(prompt) if prompt.prompt_text.trim().is_empty() || prompt.prompt_audio.is_empty() => {
                Err(TtsError::config(
                    "voice cloning needs both a reference text and a reference recording",
                ))
            }
            _ => Ok(()),
        }
    }

    /// Stable identity used in cache keys. Equal configs give equal strings.
    pub fn identity(&self) -> String {
        match self {
            Self::Preset { speaker_id, speed } => format!("preset:{speaker_id}:{speed}"),
            Self::Clone(prompt) => {
                let mut hasher = DefaultHasher::new();
                prompt.prompt_text.hash(&mut hasher);
                prompt.prompt_audio.hash(&mut hasher);
                prompt.speed.to_bits().hash(&mut hasher);
                prompt.mode.hash(&mut hasher);
                prompt.instruction.hash(&mut hasher);
                format!("clone:{:016x}", hasher.finish())
            }
        }
    }

    pub fn speed(&self) -> f32 {
        match self {
            Self::Preset { speed, .. } => *speed,
            Self::Clone(prompt) => prompt.speed,
        }
    }

    pub fn label(&self) -> String {
        match self {
            Self::Preset { speaker_id, .. } => format!("preset {speaker_id}"),
            Self::Clone(_) => "voice clone".to_string(),
        }
    }
}
