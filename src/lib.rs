//! cosyvoice-reader: quote-aware text-to-speech playback over a CosyVoice backend.

pub mod api;
pub mod audio;
pub mod cache;
pub mod config;
pub mod error;
pub mod notifier;
pub mod player;
pub mod preload;
pub mod presets;
pub mod quotes;
pub mod synth;
pub mod voice;

#[cfg(test)]
mod testing;
