//! Generated-audio cache with in-flight deduplication.
//!
//! Each key maps to a ready clip or to a pending generation. Registering a
//! generation happens under one lock without suspending, so at most one
//! producer runs per key. The producer future is driven by its own task and
//! its outcome is broadcast to every waiter through a watch channel.
//!
//! Every `clear()` starts a new epoch. Callers register work under the epoch
//! they observed, and requests from an older epoch are refused, so a session
//! that was torn down cannot refill the cache.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

use crate::audio::AudioClip;
use crate::error::TtsError;
use crate::voice::VoiceConfig;

pub type Outcome = Result<Arc<AudioClip>, TtsError>;

/// Identifies one segment's audio within a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    text: String,
    voice: String,
    index: usize,
}

impl CacheKey {
    pub fn new(text: &str, voice: &VoiceConfig, index: usize) -> Self {
        Self {
            text: text.to_string(),
            voice: voice.identity(),
            index,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

enum Entry {
    Pending {
        ticket: u64,
        outcome: watch::Receiver<Option<Outcome>>,
    },
    Ready(Arc<AudioClip>),
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<CacheKey, Entry>,
    next_ticket: u64,
    epoch: u64,
}

/// A handle on a cached or in-flight generation.
pub enum Generation {
    Ready(Arc<AudioClip>),
    Pending(watch::Receiver<Option<Outcome>>),
    /// Requested under an epoch that has since been cleared.
    Stale,
}

impl Generation {
    /// Wait for the generation to settle.
    pub async fn wait(self) -> Outcome {
        match self {
            Self::Ready(clip) => Ok(clip),
            Self::Pending(mut rx) => match rx.wait_for(Option::is_some).await {
                Ok(outcome) => outcome.clone().unwrap_or(Err(TtsError::Abandoned)),
                Err(_) => Err(TtsError::Abandoned),
            },
            Self::Stale => Err(TtsError::Abandoned),
        }
    }
}

#[derive(Clone, Default)]
pub struct GenerationCache {
    state: Arc<Mutex<CacheState>>,
}

impl GenerationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current epoch, to be passed back to `get_or_generate`.
    pub fn epoch(&self) -> u64 {
        self.state.lock().epoch
    }

    /// Return the cached clip for `key`, join its in-flight generation, or
    /// start one with `producer`. `producer` is only called when neither
    /// exists and `epoch` is still current. A failed generation is forgotten
    /// so a later request retries.
    pub fn get_or_generate<F, Fut>(&self, epoch: u64, key: CacheKey, producer: F) -> Generation
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<u8>, TtsError>> + Send + 'static,
    {
        let (ticket, tx, rx) = {
            let mut state = self.state.lock();
            if state.epoch != epoch {
                debug!("Refusing segment {} from cleared epoch {epoch}", key.index);
                return Generation::Stale;
            }
            match state.entries.get(&key) {
                Some(Entry::Ready(clip)) => {
                    debug!("Cache hit for segment {}", key.index);
                    return Generation::Ready(clip.clone());
                }
                Some(Entry::Pending { outcome, .. }) => {
                    debug!("Joining in-flight generation for segment {}", key.index);
                    return Generation::Pending(outcome.clone());
                }
                None => {}
            }

            state.next_ticket += 1;
            let ticket = state.next_ticket;
            let (tx, rx) = watch::channel(None);
            state.entries.insert(
                key.clone(),
                Entry::Pending {
                    ticket,
                    outcome: rx.clone(),
                },
            );
            (ticket, tx, rx)
        };

        let generation = producer();
        let state = self.state.clone();
        tokio::spawn(async move {
            let outcome = generation.await.map(|bytes| Arc::new(AudioClip::new(bytes)));
            {
                let mut state = state.lock();
                let still_ours = matches!(
                    state.entries.get(&key),
                    Some(Entry::Pending { ticket: t, .. }) if *t == ticket
                );
                if still_ours {
                    match &outcome {
                        Ok(clip) => {
                            state.entries.insert(key, Entry::Ready(clip.clone()));
                        }
                        Err(_) => {
                            state.entries.remove(&key);
                        }
                    }
                }
            }
            let _ = tx.send(Some(outcome));
        });

        Generation::Pending(rx)
    }

    /// Drop every entry, ready or pending, and start a new epoch. Pending
    /// waiters still get their result, but it is not cached. Returns the new
    /// epoch.
    pub fn clear(&self) -> u64 {
        let mut state = self.state.lock();
        state.epoch += 1;
        let total = state.entries.len();
        let ready = state
            .entries
            .drain()
            .filter(|(_, entry)| matches!(entry, Entry::Ready(_)))
            .count();
        if total > 0 {
            debug!("Cache cleared: released {ready} clips, forgot {} pending", total - ready);
        }
        state.epoch
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of entries holding finished audio.
    pub fn ready_len(&self) -> usize {
        self.state
            .lock()
            .entries
            .values()
            .filter(|entry| matches!(entry, Entry::Ready(_)))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    fn key(text: &str, index: usize) -> CacheKey {
        CacheKey::new(text, &VoiceConfig::preset("alice", 1.0), index)
    }

    #[tokio::test]
    async fn concurrent_requests_share_one_producer() {
        let cache = GenerationCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let (release, gate) = oneshot::channel::<()>();
        let mut gate = Some(gate);

        let mut handles = Vec::new();
        for _ in 0..5 {
            let calls = calls.clone();
            let gate = gate.take();
            handles.push(cache.get_or_generate(cache.epoch(), key("hello", 0), move || {
                calls.fetch_add(1, Ordering::SeqCst);
                let gate = gate.expect("producer invoked more than once");
                async move {
                    gate.await.ok();
                    Ok(b"audio".to_vec())
                }
            }));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.ready_len(), 0);

        release.send(()).unwrap();
        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.wait().await.unwrap().id());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(cache.ready_len(), 1);
    }

    #[tokio::test]
    async fn ready_entries_are_returned_without_new_work() {
        let cache = GenerationCache::new();
        let first = cache
            .get_or_generate(cache.epoch(), key("a", 0), || async { Ok(vec![1]) })
            .wait()
            .await
            .unwrap();

        let again = cache.get_or_generate(cache.epoch(), key("a", 0), || -> std::future::Ready<_> {
            panic!("ready entry must not regenerate")
        });
        assert!(matches!(again, Generation::Ready(_)));
        assert_eq!(again.wait().await.unwrap().id(), first.id());
    }

    #[tokio::test]
    async fn keys_differ_by_index_and_voice() {
        let cache = GenerationCache::new();
        cache.get_or_generate(cache.epoch(), key("a", 0), || async { Ok(vec![1]) });
        cache.get_or_generate(cache.epoch(), key("a", 1), || async { Ok(vec![1]) });
        cache.get_or_generate(
            cache.epoch(),
            CacheKey::new("a", &VoiceConfig::preset("bob", 1.0), 0),
            || async { Ok(vec![1]) },
        );
        assert_eq!(cache.len(), 3);
    }

    #[tokio::test]
    async fn failure_reaches_every_waiter_and_allows_retry() {
        let cache = GenerationCache::new();
        let (fail, gate) = oneshot::channel::<()>();
        let first = cache.get_or_generate(cache.epoch(), key("a", 0), move || async move {
            gate.await.ok();
            Err(TtsError::Backend {
                status: 503,
                body: "busy".into(),
            })
        });
        let second = cache.get_or_generate(cache.epoch(), key("a", 0), || -> std::future::Ready<_> {
            panic!("pending entry must be joined")
        });

        fail.send(()).unwrap();
        assert!(matches!(first.wait().await, Err(TtsError::Backend { status: 503, .. })));
        assert!(matches!(second.wait().await, Err(TtsError::Backend { status: 503, .. })));
        assert!(cache.is_empty());

        let retried = cache
            .get_or_generate(cache.epoch(), key("a", 0), || async { Ok(vec![9]) })
            .wait()
            .await
            .unwrap();
        assert_eq!(retried.bytes(), &[9]);
    }

    #[tokio::test]
    async fn clear_releases_clips_and_forgets_pending() {
        let cache = GenerationCache::new();
        let clip = cache
            .get_or_generate(cache.epoch(), key("a", 0), || async { Ok(vec![1]) })
            .wait()
            .await
            .unwrap();
        let weak = Arc::downgrade(&clip);
        drop(clip);

        let (release, gate) = oneshot::channel::<()>();
        let pending = cache.get_or_generate(cache.epoch(), key("b", 1), move || async move {
            gate.await.ok();
            Ok(vec![2])
        });

        let before = cache.epoch();
        assert_eq!(cache.clear(), before + 1);
        assert!(cache.is_empty());
        assert!(weak.upgrade().is_none());

        release.send(()).unwrap();
        assert_eq!(pending.wait().await.unwrap().bytes(), &[2]);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn requests_from_a_cleared_epoch_are_refused() {
        let cache = GenerationCache::new();
        let stale = cache.epoch();
        cache.clear();

        let refused = cache.get_or_generate(stale, key("a", 0), || -> std::future::Ready<_> {
            panic!("stale request must not start a producer")
        });
        assert!(matches!(refused, Generation::Stale));
        assert_eq!(refused.wait().await.unwrap_err(), TtsError::Abandoned);
        assert!(cache.is_empty());

        cache
            .get_or_generate(cache.epoch(), key("a", 0), || async { Ok(vec![1]) })
            .wait()
            .await
            .unwrap();
        assert_eq!(cache.ready_len(), 1);
    }
}
