//! Clone-preset management on the in-memory voice settings.

use chrono::Utc;
use serde::Deserialize;
use tracing::info;

use crate::config::{ClonePreset, VoiceSettings};
use crate::error::TtsError;

/// Fields to change on an existing preset. `None` leaves a field as is.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClonePresetUpdate {
    pub name: Option<String>,
    pub prompt_text: Option<String>,
    pub prompt_audio_base64: Option<String>,
    pub prompt_audio_name: Option<String>,
}

impl VoiceSettings {
    /// The selected preset, if the stored index still points at one.
    pub fn current_clone_preset(&self) -> Option<&ClonePreset> {
        self.current_clone_preset
            .and_then(|index| self.clone_presets.get(index))
    }

    pub fn add_clone_preset(
        &mut self,
        name: &str,
        prompt_text: &str,
        prompt_audio_base64: &str,
        prompt_audio_name: &str,
    ) -> &ClonePreset {
        let now = Utc::now();
        let name = if name.trim().is_empty() {
            format!("Preset {}", self.clone_presets.len() + 1)
        } else {
            name.trim().to_string()
        };
        info!("Adding clone preset \"{name}\"");
        self.clone_presets.push(ClonePreset {
            id: now.timestamp_millis().to_string(),
            name,
            prompt_text: prompt_text.to_string(),
            prompt_audio_base64: prompt_audio_base64.to_string(),
            prompt_audio_name: prompt_audio_name.to_string(),
            created_at: now.to_rfc3339(),
        });
        &self.clone_presets[self.clone_presets.len() - 1]
    }

    /// Store the temporary clone prompt as a new preset.
    pub fn save_temp_prompt_as_preset(&mut self, name: &str) -> Result<&ClonePreset, TtsError> {
        if self.temp_prompt_text.trim().is_empty() || self.temp_prompt_audio_base64.trim().is_empty() {
            return Err(TtsError::config(
                "set a reference recording and text before saving a preset",
            ));
        }
        let text = self.temp_prompt_text.clone();
        let audio = self.temp_prompt_audio_base64.clone();
        let audio_name = self.temp_prompt_audio_name.clone();
        Ok(self.add_clone_preset(name, &text, &audio, &audio_name))
    }

    pub fn update_clone_preset(&mut self, index: usize, update: ClonePresetUpdate) -> bool {
        let Some(preset) = self.clone_presets.get_mut(index) else {
            return false;
        };
        if let Some(name) = update.name {
            preset.name = name;
        }
        if let Some(text) = update.prompt_text {
            preset.prompt_text = text;
        }
        if let Some(audio) = update.prompt_audio_base64 {
            preset.prompt_audio_base64 = audio;
        }
        if let Some(audio_name) = update.prompt_audio_name {
            preset.prompt_audio_name = audio_name;
        }
        true
    }

    /// Remove a preset, keeping the selection on the same preset when possible.
    pub fn delete_clone_preset(&mut self, index: usize) -> bool {
        if index >= self.clone_presets.len() {
            return false;
        }
        let removed = self.clone_presets.remove(index);
        info!("Deleted clone preset \"{}\"", removed.name);

        self.current_clone_preset = match self.current_clone_preset {
            Some(current) if current == index => None,
            Some(current) if current > index => Some(current - 1),
            other => other,
        };
        true
    }

    /// Select a preset by index, or clear the selection with `None`.
    pub fn select_clone_preset(&mut self, index: Option<usize>) -> bool {
        match index {
            Some(i) if i >= self.clone_presets.len() => false,
            _ => {
                self.current_clone_preset = index;
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_presets(names: &[&str]) -> VoiceSettings {
        let mut settings = VoiceSettings::default();
        for name in names {
            settings.add_clone_preset(name, "text", "UklGRg==", "ref.wav");
        }
        settings
    }

    fn names(settings: &VoiceSettings) -> Vec<&str> {
        settings.clone_presets.iter().map(|p| p.name.as_str()).collect()
    }

    #[test]
    fn add_assigns_default_name_and_timestamp() {
        let mut settings = with_presets(&["first"]);
        let preset = settings.add_clone_preset(" ", "t", "a", "n");
        assert_eq!(preset.name, "Preset 2");
        assert!(!preset.id.is_empty());
        assert!(chrono::DateTime::parse_from_rfc3339(&preset.created_at).is_ok());
    }

    #[test]
    fn update_only_touches_given_fields() {
        let mut settings = with_presets(&["a"]);
        assert!(settings.update_clone_preset(
            0,
            ClonePresetUpdate {
                name: Some("renamed".into()),
                ..Default::default()
            }
        ));
        assert_eq!(settings.clone_presets[0].name, "renamed");
        assert_eq!(settings.clone_presets[0].prompt_text, "text");
        assert!(!settings.update_clone_preset(5, ClonePresetUpdate::default()));
    }

    #[test]
    fn deleting_selected_preset_clears_selection() {
        let mut settings = with_presets(&["a", "b", "c"]);
        settings.select_clone_preset(Some(1));
        assert!(settings.delete_clone_preset(1));
        assert_eq!(names(&settings), vec!["a", "c"]);
        assert_eq!(settings.current_clone_preset, None);
    }

    #[test]
    fn deleting_earlier_preset_keeps_selection_on_same_preset() {
        let mut settings = with_presets(&["a", "b", "c"]);
        settings.select_clone_preset(Some(2));
        assert!(settings.delete_clone_preset(0));
        assert_eq!(settings.current_clone_preset(), Some(&settings.clone_presets[1]));
        assert_eq!(settings.current_clone_preset().unwrap().name, "c");
    }

    #[test]
    fn deleting_later_preset_leaves_selection() {
        let mut settings = with_presets(&["a", "b"]);
        settings.select_clone_preset(Some(0));
        assert!(settings.delete_clone_preset(1));
        assert_eq!(settings.current_clone_preset, Some(0));
        assert!(!settings.delete_clone_preset(3));
    }

    #[test]
    fn select_rejects_out_of_range() {
        let mut settings = with_presets(&["a"]);
        assert!(!settings.select_clone_preset(Some(1)));
        assert!(settings.select_clone_preset(Some(0)));
        assert!(settings.select_clone_preset(None));
        assert!(settings.current_clone_preset().is_none());
    }

    #[test]
    fn saving_temp_prompt_requires_text_and_audio() {
        let mut settings = VoiceSettings::default();
        settings.temp_prompt_text = "reference".into();
        assert!(matches!(
            settings.save_temp_prompt_as_preset("x"),
            Err(TtsError::Config(_))
        ));

        settings.temp_prompt_audio_base64 = "UklGRg==".into();
        settings.temp_prompt_audio_name = "ref.wav".into();
        let saved = settings.save_temp_prompt_as_preset("").unwrap();
        assert_eq!(saved.name, "Preset 1");
        assert_eq!(saved.prompt_audio_name, "ref.wav");
        assert_eq!(settings.clone_presets.len(), 1);
    }
}
