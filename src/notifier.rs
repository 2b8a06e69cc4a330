//! Desktop notifications (D-Bus) when a playback session ends.

use notify_rust::Notification;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::player::{PlaybackState, PlaybackStatus};

pub struct Notifier {
    enabled: bool,
    // Session last announced; each session is announced once.
    announced: Option<u64>,
}

impl Notifier {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            announced: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Show a notification if `status` is the end of a session not yet
    /// announced. Returns whether one was due.
    pub fn announce(&mut self, status: &PlaybackStatus) -> bool {
        let Some((summary, body)) = ending(status) else {
            return false;
        };
        if self.announced == Some(status.session) {
            return false;
        }
        self.announced = Some(status.session);
        debug!("Session {} ended: {summary}", status.session);

        if self.enabled {
            let shown = Notification::new()
                .appname("cosyvoice-reader")
                .summary(summary)
                .body(&body)
                .icon(if status.last_error.is_some() {
                    "dialog-error"
                } else {
                    "audio-speakers"
                })
                .timeout(3000)
                .show();
            if let Err(e) = shown {
                warn!("Failed to show notification: {e}");
            }
        }
        true
    }

    /// Announce session endings until the player goes away.
    pub fn watch(mut self, mut status: watch::Receiver<PlaybackStatus>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            while status.changed().await.is_ok() {
                let current = status.borrow_and_update().clone();
                self.announce(&current);
            }
        })
    }
}

/// Notification text for a session that just stopped, if it did.
fn ending(status: &PlaybackStatus) -> Option<(&'static str, String)> {
    if status.state != PlaybackState::Stopped {
        return None;
    }
    Some(match &status.last_error {
        None => (
            "Playback finished",
            format!("Read {} segments", status.total),
        ),
        Some(error) => (
            "Playback failed",
            format!("Segment {}/{}: {error}", status.index + 1, status.total),
        ),
    })
}
