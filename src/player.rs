//! Playback sequencer with state machine.
//!
//! IDLE → PLAYING ⇄ PAUSED → STOPPED → IDLE
//!
//! A session plays its segments strictly in order. While segment `i` is being
//! processed, segments `i+1 ..= i+preload` are generated ahead through the
//! shared cache. `stop()` is cooperative: work already in flight finishes,
//! but session ids, cache epochs and state checks discard its results. A
//! session that plays to the end releases its audio; one that fails keeps
//! the clips of other segments until the next start or stop.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::audio::AudioOutput;
use crate::cache::{CacheKey, GenerationCache};
use crate::error::TtsError;
use crate::preload::PreloadScheduler;
use crate::synth::Synthesizer;
use crate::voice::VoiceConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Idle,
    Playing,
    Paused,
    Stopped,
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "IDLE"),
            Self::Playing => write!(f, "PLAYING"),
            Self::Paused => write!(f, "PAUSED"),
            Self::Stopped => write!(f, "STOPPED"),
        }
    }
}

/// Observable snapshot of the live session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaybackStatus {
    pub session: u64,
    pub state: PlaybackState,
    pub index: usize,
    pub total: usize,
    pub generating: bool,
    pub last_error: Option<String>,
}

impl PlaybackStatus {
    /// The session ran through every segment.
    pub fn is_finished(&self) -> bool {
        self.state == PlaybackState::Stopped && self.last_error.is_none()
    }
}

struct Session {
    id: u64,
    // Cache epoch this session generates under.
    epoch: u64,
    state: PlaybackState,
    segments: Arc<[String]>,
    voice: Option<VoiceConfig>,
    index: usize,
    generating: bool,
    // A step loop is running for this session.
    stepping: bool,
    last_error: Option<String>,
}

impl Session {
    fn idle(id: u64, epoch: u64) -> Self {
        Self {
            id,
            epoch,
            state: PlaybackState::Idle,
            segments: Arc::from(Vec::new()),
            voice: None,
            index: 0,
            generating: false,
            stepping: false,
            last_error: None,
        }
    }

    fn snapshot(&self) -> PlaybackStatus {
        PlaybackStatus {
            session: self.id,
            state: self.state,
            index: self.index,
            total: self.segments.len(),
            generating: self.generating,
            last_error: self.last_error.clone(),
        }
    }
}

struct Inner<S, O> {
    synth: S,
    output: O,
    cache: GenerationCache,
    preload: PreloadScheduler,
    session: Mutex<Session>,
    status: watch::Sender<PlaybackStatus>,
}

/// Handle on the single playback session. Cheap to clone.
pub struct Player<S, O> {
    inner: Arc<Inner<S, O>>,
}

impl<S, O> Clone for Player<S, O> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: Synthesizer, O: AudioOutput> Player<S, O> {
    pub fn new(synth: S, output: O, preload_count: usize) -> Self {
        let session = Session::idle(0, 0);
        let (status, _) = watch::channel(session.snapshot());
        Self {
            inner: Arc::new(Inner {
                synth,
                output,
                cache: GenerationCache::new(),
                preload: PreloadScheduler::new(preload_count),
                session: Mutex::new(session),
                status,
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<PlaybackStatus> {
        self.inner.status.subscribe()
    }

    pub fn status(&self) -> PlaybackStatus {
        self.inner.session.lock().snapshot()
    }

    pub fn state(&self) -> PlaybackState {
        self.inner.session.lock().state
    }

    /// Playing or paused.
    pub fn is_active(&self) -> bool {
        matches!(
            self.state(),
            PlaybackState::Playing | PlaybackState::Paused
        )
    }

    pub fn cache(&self) -> &GenerationCache {
        &self.inner.cache
    }

    pub fn synth(&self) -> &S {
        &self.inner.synth
    }

    pub fn output(&self) -> &O {
        &self.inner.output
    }

    /// Replace any current session with one playing `segments` in `voice`.
    ///
    /// Blank segments are dropped. Nothing changes if no segment remains or
    /// the voice is not configured. Must be called from within a tokio runtime.
    pub fn start(&self, segments: Vec<String>, voice: VoiceConfig) -> Result<usize, TtsError> {
        let segments: Vec<String> = segments
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if segments.is_empty() {
            warn!("Nothing to play");
            return Err(TtsError::config("nothing to play"));
        }
        if let Err(e) = voice.validate() {
            warn!("Cannot start playback: {e}");
            return Err(e);
        }

        let segments: Arc<[String]> = segments.into();
        let total = segments.len();

        let (previous, id, epoch) = self.inner.replace_session(|id, epoch| Session {
            id,
            epoch,
            state: PlaybackState::Playing,
            segments: segments.clone(),
            voice: Some(voice.clone()),
            index: 0,
            generating: false,
            stepping: true,
            last_error: None,
        });
        info!("State: {previous} → PLAYING ({total} segments, {})", voice.label());
        self.inner.publish();

        let inner = &self.inner;
        tokio::spawn(
            inner
                .preload
                .schedule(&inner.cache, epoch, &inner.synth, &segments, &voice, 0),
        );
        tokio::spawn(inner.clone().run(id));
        Ok(total)
    }

    /// Pause the current segment in place. Only valid while playing.
    pub fn pause(&self) -> bool {
        {
            let mut session = self.inner.session.lock();
            if session.state != PlaybackState::Playing {
                return false;
            }
            session.state = PlaybackState::Paused;
        }
        self.inner.output.pause();
        info!("State: PLAYING → PAUSED");
        self.inner.publish();
        true
    }

    /// Continue a paused session at the same index.
    pub fn resume(&self) -> bool {
        let restart = {
            let mut session = self.inner.session.lock();
            if session.state != PlaybackState::Paused {
                return false;
            }
            session.state = PlaybackState::Playing;
            if !self.inner.output.resume() && !session.stepping {
                session.stepping = true;
                Some(session.id)
            } else {
                None
            }
        };
        info!("State: PAUSED → PLAYING");
        self.inner.publish();

        if let Some(id) = restart {
            debug!("No audio to resume, stepping again");
            tokio::spawn(self.inner.clone().run(id));
        }
        true
    }

    /// End the session from any state, releasing its audio and cache.
    pub fn stop(&self) {
        let (previous, _, _) = self.inner.replace_session(Session::idle);
        if previous != PlaybackState::Idle {
            info!("State: {previous} → STOPPED → IDLE");
        }
        self.inner.publish();
    }
}

impl<S: Synthesizer, O: AudioOutput> Inner<S, O> {
    /// Swap in the session built by `next` under a fresh id and cache epoch,
    /// dropping all audio of the old one. Returns the old state with the new
    /// id and epoch.
    ///
    /// The cache and output are reset while the session lock is held, so a
    /// step loop of the old session can neither register work under the new
    /// epoch nor tear down audio of the new session.
    fn replace_session(
        &self,
        next: impl FnOnce(u64, u64) -> Session,
    ) -> (PlaybackState, u64, u64) {
        let mut session = self.session.lock();
        let previous = session.state;
        let id = session.id + 1;
        self.output.stop();
        let epoch = self.cache.clear();
        *session = next(id, epoch);
        (previous, id, epoch)
    }

    fn publish(&self) {
        let session = self.session.lock();
        self.status.send_replace(session.snapshot());
    }

    /// Step through the session's segments until it ends, pauses, or is
    /// replaced.
    async fn run(self: Arc<Self>, id: u64) {
        loop {
            let (index, epoch, segments, voice) = {
                let mut session = self.session.lock();
                if session.id != id {
                    return;
                }
                if session.state != PlaybackState::Playing {
                    session.stepping = false;
                    return;
                }
                let Some(voice) = session.voice.clone() else {
                    session.stepping = false;
                    return;
                };
                if session.index >= session.segments.len() {
                    session.state = PlaybackState::Stopped;
                    session.stepping = false;
                    session.generating = false;
                    session.epoch = self.cache.clear();
                    info!(
                        "State: PLAYING → STOPPED (finished {} segments)",
                        session.segments.len()
                    );
                    drop(session);
                    self.publish();
                    return;
                }
                session.generating = true;
                (session.index, session.epoch, session.segments.clone(), voice)
            };
            self.publish();

            tokio::spawn(self.preload.schedule(
                &self.cache,
                epoch,
                &self.synth,
                &segments,
                &voice,
                index + 1,
            ));

            let text = &segments[index];
            let outcome = self
                .cache
                .get_or_generate(epoch, CacheKey::new(text, &voice, index), || {
                    self.synth.synthesize(text, &voice)
                })
                .wait()
                .await;

            {
                let mut session = self.session.lock();
                if session.id != id {
                    return;
                }
                session.generating = false;
                if session.state != PlaybackState::Playing {
                    debug!("Segment {} ready while {}, not playing", index + 1, session.state);
                    session.stepping = false;
                    drop(session);
                    self.publish();
                    return;
                }
            }
            self.publish();

            let clip = match outcome {
                Ok(clip) => clip,
                Err(e) => return self.fail(id, index, e),
            };

            debug!("Playing segment {}/{}", index + 1, segments.len());
            if let Err(e) = self.output.play(clip).await {
                return self.fail(id, index, e);
            }

            {
                let mut session = self.session.lock();
                if session.id != id {
                    return;
                }
                if session.state != PlaybackState::Playing {
                    session.stepping = false;
                    return;
                }
                session.index += 1;
            }
            self.publish();
        }
    }

    /// Abort the session after a failure on its current segment. Audio already
    /// cached for other segments stays until the next clear.
    fn fail(&self, id: u64, index: usize, e: TtsError) {
        {
            let mut session = self.session.lock();
            if session.id != id {
                return;
            }
            error!("Playback failed at segment {}: {e}", index + 1);
            let previous = session.state;
            session.state = PlaybackState::Stopped;
            session.generating = false;
            session.stepping = false;
            session.last_error = Some(e.to_string());
            info!("State: {previous} → STOPPED");
            self.output.stop();
        }
        self.publish();
    }
}
