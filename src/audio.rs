//! Audio clips and the playback primitive.
//!
//! `AudioOutput::play` resolves once the clip has finished, was stopped, or
//! failed. Pausing leaves the play future pending until resumed or stopped.
//! `RodioOutput` keeps the device stream on its own thread and plays each clip
//! through a fresh rodio `Sink`.

use std::fmt;
use std::future::Future;
use std::io::Cursor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rodio::mixer::Mixer;
use rodio::{Decoder, OutputStreamBuilder, Sink};
use tracing::{debug, info};

use crate::error::TtsError;

static NEXT_CLIP_ID: AtomicU64 = AtomicU64::new(1);

/// Encoded audio returned by the backend (wav/mp3/...), owned by the cache.
pub struct AudioClip {
    id: u64,
    data: Arc<[u8]>,
}

impl AudioClip {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            id: NEXT_CLIP_ID.fetch_add(1, Ordering::Relaxed),
            data: bytes.into(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl fmt::Debug for AudioClip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioClip")
            .field("id", &self.id)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Something that can play clips one at a time.
pub trait AudioOutput: Send + Sync + 'static {
    /// Play `clip`, replacing anything currently playing. Resolves on
    /// completion or stop; errors if the clip cannot be played.
    fn play(&self, clip: Arc<AudioClip>) -> impl Future<Output = Result<(), TtsError>> + Send;

    /// Pause the current clip in place.
    fn pause(&self);

    /// Resume a paused clip. Returns false when there is nothing to resume.
    fn resume(&self) -> bool;

    /// Stop and release the current clip.
    fn stop(&self);
}

impl<T: AudioOutput> AudioOutput for Arc<T> {
    fn play(&self, clip: Arc<AudioClip>) -> impl Future<Output = Result<(), TtsError>> + Send {
        (**self).play(clip)
    }

    fn pause(&self) {
        (**self).pause()
    }

    fn resume(&self) -> bool {
        (**self).resume()
    }

    fn stop(&self) {
        (**self).stop()
    }
}

/// rodio-backed output on the default device.
pub struct RodioOutput {
    mixer: Mixer,
    active: Arc<Mutex<Option<(u64, Sink)>>>,
    next_play: AtomicU64,
    // Dropping this ends the thread that owns the device stream.
    _keepalive: std_mpsc::Sender<()>,
}

impl RodioOutput {
    /// Open the default output device.
    pub fn open() -> Result<Self, TtsError> {
        let (mixer_tx, mixer_rx) = std_mpsc::channel();
        let (keepalive, shutdown) = std_mpsc::channel::<()>();

        std::thread::Builder::new()
            .name("audio-output".into())
            .spawn(move || {
                let stream = match OutputStreamBuilder::open_default_stream() {
                    Ok(s) => s,
                    Err(e) => {
                        let _ = mixer_tx.send(Err(format!("Failed to open audio output: {e}")));
                        return;
                    }
                };
                let _ = mixer_tx.send(Ok(stream.mixer().clone()));
                // Block until the owning RodioOutput is dropped.
                let _ = shutdown.recv();
                drop(stream);
            })
            .map_err(|e| TtsError::Playback(format!("Failed to spawn audio thread: {e}")))?;

        let mixer = mixer_rx
            .recv()
            .map_err(|_| TtsError::Playback("Audio thread exited during startup".into()))?
            .map_err(TtsError::Playback)?;

        info!("Audio output opened on default device");

        Ok(Self {
            mixer,
            active: Arc::new(Mutex::new(None)),
            next_play: AtomicU64::new(1),
            _keepalive: keepalive,
        })
    }
}

impl AudioOutput for RodioOutput {
    async fn play(&self, clip: Arc<AudioClip>) -> Result<(), TtsError> {
        let source = Decoder::new(Cursor::new(clip.data.clone()))
            .map_err(|e| TtsError::Playback(format!("Failed to decode clip {}: {e}", clip.id)))?;

        let sink = Sink::connect_new(&self.mixer);
        sink.append(source);

        let play_id = self.next_play.fetch_add(1, Ordering::Relaxed);
        if let Some((_, previous)) = self.active.lock().replace((play_id, sink)) {
            previous.stop();
        }
        debug!("Playing clip {} ({} bytes)", clip.id, clip.len());

        // Poll for completion; a stop or a newer play removes our sink.
        let active = self.active.clone();
        let finished = tokio::task::spawn_blocking(move || loop {
            {
                let guard = active.lock();
                match guard.as_ref() {
                    Some((id, sink)) if *id == play_id => {
                        if sink.empty() {
                            return true;
                        }
                    }
                    _ => return false,
                }
            }
            std::thread::sleep(Duration::from_millis(50));
        })
        .await
        .map_err(|e| TtsError::Playback(format!("Playback watcher failed: {e}")))?;

        if finished {
            let mut guard = self.active.lock();
            if matches!(guard.as_ref(), Some((id, _)) if *id == play_id) {
                *guard = None;
            }
        } else {
            debug!("Playback of clip {} interrupted", clip.id);
        }

        Ok(())
    }

    fn pause(&self) {
        if let Some((_, sink)) = self.active.lock().as_ref() {
            sink.pause();
        }
    }

    fn resume(&self) -> bool {
        match self.active.lock().as_ref() {
            Some((_, sink)) => {
                sink.play();
                true
            }
            None => false,
        }
    }

    fn stop(&self) {
        if let Some((_, sink)) = self.active.lock().take() {
            sink.stop();
            debug!("Audio stopped");
        }
    }
}

impl Drop for RodioOutput {
    fn drop(&mut self) {
        if let Some((_, sink)) = self.active.lock().take() {
            sink.stop();
        }
        debug!("Audio output closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clips_get_distinct_ids() {
        let a = AudioClip::new(vec![1, 2, 3]);
        let b = AudioClip::new(Vec::new());
        assert_ne!(a.id(), b.id());
        assert_eq!(a.len(), 3);
        assert_eq!(a.bytes(), &[1, 2, 3]);
        assert!(b.is_empty());
    }

    #[test]
    fn debug_does_not_dump_audio() {
        let clip = AudioClip::new(vec![0; 4096]);
        let rendered = format!("{clip:?}");
        assert!(rendered.contains("4096"));
        assert!(rendered.len() < 64);
    }
}
