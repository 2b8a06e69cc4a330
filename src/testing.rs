//! Scripted collaborators for sequencer and API tests.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify, Semaphore};

use crate::audio::{AudioClip, AudioOutput};
use crate::error::TtsError;
use crate::synth::Synthesizer;
use crate::voice::VoiceConfig;

const PATIENCE: Duration = Duration::from_secs(2);

/// Synthesizer that echoes the text back as "audio".
#[derive(Default)]
pub struct ScriptedSynth {
    calls: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
    held: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl ScriptedSynth {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn calls_for(&self, text: &str) -> usize {
        self.calls.lock().iter().filter(|t| *t == text).count()
    }

    pub fn fail_on(&self, text: &str) {
        self.failing.lock().insert(text.to_string());
    }

    /// Hold generation of `text` until a permit is added to the returned gate.
    pub fn hold(&self, text: &str) -> Arc<Semaphore> {
        self.held
            .lock()
            .entry(text.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(0)))
            .clone()
    }
}

impl Synthesizer for ScriptedSynth {
    fn synthesize(
        &self,
        text: &str,
        _voice: &VoiceConfig,
    ) -> impl Future<Output = Result<Vec<u8>, TtsError>> + Send + 'static {
        self.calls.lock().push(text.to_string());
        let fail = self.failing.lock().contains(text);
        let gate = self.held.lock().get(text).cloned();
        let audio = text.as_bytes().to_vec();

        async move {
            if let Some(gate) = gate {
                if let Ok(permit) = gate.acquire().await {
                    permit.forget();
                }
            }
            if fail {
                Err(TtsError::Backend {
                    status: 500,
                    body: "scripted failure".into(),
                })
            } else {
                Ok(audio)
            }
        }
    }
}

/// Output whose clips finish only when the test says so.
pub struct ScriptedOutput {
    started: mpsc::UnboundedSender<String>,
    finish: Semaphore,
    stopped: Notify,
    current: Mutex<Option<(u64, Arc<AudioClip>)>>,
    played: Mutex<Vec<Weak<AudioClip>>>,
    next_play: AtomicU64,
    paused: AtomicBool,
    fail_next: AtomicBool,
}

/// Receives the text of each clip as its playback starts.
pub struct PlayLog(mpsc::UnboundedReceiver<String>);

impl ScriptedOutput {
    pub fn new() -> (Arc<Self>, PlayLog) {
        let (started, rx) = mpsc::unbounded_channel();
        let output = Self {
            started,
            finish: Semaphore::new(0),
            stopped: Notify::new(),
            current: Mutex::new(None),
            played: Mutex::new(Vec::new()),
            next_play: AtomicU64::new(1),
            paused: AtomicBool::new(false),
            fail_next: AtomicBool::new(false),
        };
        (Arc::new(output), PlayLog(rx))
    }

    /// Let the clip currently playing (or the next one) finish.
    pub fn finish_one(&self) {
        self.finish.add_permits(1);
    }

    pub fn fail_next_play(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn has_current(&self) -> bool {
        self.current.lock().is_some()
    }

    /// Weak handles to every clip handed to `play`.
    pub fn played_clips(&self) -> Vec<Weak<AudioClip>> {
        self.played.lock().clone()
    }
}

impl AudioOutput for ScriptedOutput {
    async fn play(&self, clip: Arc<AudioClip>) -> Result<(), TtsError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(TtsError::Playback("scripted playback failure".into()));
        }

        let text = String::from_utf8_lossy(clip.bytes()).into_owned();
        let play_id = self.next_play.fetch_add(1, Ordering::SeqCst);
        self.played.lock().push(Arc::downgrade(&clip));
        *self.current.lock() = Some((play_id, clip));
        self.paused.store(false, Ordering::SeqCst);
        let _ = self.started.send(text);

        tokio::select! {
            permit = self.finish.acquire() => {
                if let Ok(permit) = permit {
                    permit.forget();
                }
            }
            _ = self.stopped.notified() => {}
        }

        let mut current = self.current.lock();
        if matches!(current.as_ref(), Some((id, _)) if *id == play_id) {
            *current = None;
        }
        Ok(())
    }

    fn pause(&self) {
        if self.current.lock().is_some() {
            self.paused.store(true, Ordering::SeqCst);
        }
    }

    fn resume(&self) -> bool {
        if self.current.lock().is_some() {
            self.paused.store(false, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    fn stop(&self) {
        self.current.lock().take();
        self.paused.store(false, Ordering::SeqCst);
        self.stopped.notify_waiters();
    }
}

impl PlayLog {
    /// Text of the next clip to start playing.
    pub async fn next(&mut self) -> String {
        tokio::time::timeout(PATIENCE, self.0.recv())
            .await
            .expect("no playback started in time")
            .expect("output dropped")
    }

    /// Assert nothing else starts playing while the runtime is given a chance.
    pub async fn assert_quiet(&mut self) {
        tokio::time::sleep(Duration::from_millis(30)).await;
        if let Ok(text) = self.0.try_recv() {
            panic!("unexpected playback of {text:?}");
        }
    }
}

/// Poll `condition` until it holds, failing the test after a short while.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(PATIENCE, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
