//! Look-ahead generation for upcoming segments.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::audio::AudioClip;
use crate::cache::{CacheKey, GenerationCache};
use crate::error::TtsError;
use crate::synth::Synthesizer;
use crate::voice::VoiceConfig;

#[derive(Debug, Clone, Copy)]
pub struct PreloadScheduler {
    window: usize,
}

impl PreloadScheduler {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Request generation for `[from, from + window)` clamped to the queue.
    ///
    /// Requests are registered before this returns; the future only waits
    /// for them to settle. Failures are logged and yield `None` for that
    /// index without affecting the others.
    pub fn schedule<S: Synthesizer>(
        &self,
        cache: &GenerationCache,
        epoch: u64,
        synth: &S,
        segments: &[String],
        voice: &VoiceConfig,
        from: usize,
    ) -> impl Future<Output = Vec<Option<Arc<AudioClip>>>> + Send + 'static {
        let end = from.saturating_add(self.window).min(segments.len());

        let pending: Vec<_> = (from..end)
            .map(|index| {
                let text = &segments[index];
                let generation =
                    cache.get_or_generate(epoch, CacheKey::new(text, voice, index), || {
                        synth.synthesize(text, voice)
                    });
                (index, generation)
            })
            .collect();

        async move {
            let mut clips = Vec::with_capacity(pending.len());
            for (index, generation) in pending {
                match generation.wait().await {
                    Ok(clip) => clips.push(Some(clip)),
                    Err(TtsError::Abandoned) => {
                        debug!("Preload dropped [{index}]: cache was cleared");
                        clips.push(None);
                    }
                    Err(e) => {
                        warn!("Preload failed [{index}]: {e}");
                        clips.push(None);
                    }
                }
            }
            if end > from {
                debug!("Preload settled: {from}..{end}");
            }
            clips
        }
    }
}
