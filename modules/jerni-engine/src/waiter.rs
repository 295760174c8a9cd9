//! Per-store monotonic checkpoints, and waits on all of them at once.

use std::time::Duration;

use jerni_events::WaitError;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// How long a [`CheckpointWaiter::wait`] may block.
#[derive(Debug, Clone, Default)]
pub enum WaitLimit {
    #[default]
    Forever,
    Timeout(Duration),
    Cancel(CancellationToken),
}

/// Tracks are fixed at construction, one per store index.
///
/// Every effective `increment` broadcasts the whole track vector; waiters
/// re-check their own target on each broadcast, so concurrent waits for
/// different targets never interfere.
#[derive(Debug)]
pub struct CheckpointWaiter {
    tracks: watch::Sender<Vec<i64>>,
}

impl CheckpointWaiter {
    pub fn new(tracks: usize) -> Self {
        let (tracks, _) = watch::channel(vec![0; tracks]);
        Self { tracks }
    }

    pub fn track_count(&self) -> usize {
        self.tracks.borrow().len()
    }

    /// Advance one track. Values at or below the current checkpoint, and
    /// unknown tracks, are ignored and wake nobody. Returns whether it moved.
    pub fn increment(&self, track: usize, value: i64) -> bool {
        self.tracks.send_if_modified(|tracks| match tracks.get_mut(track) {
            Some(current) if value > *current => {
                *current = value;
                true
            }
            _ => false,
        })
    }

    pub fn checkpoints(&self) -> Vec<i64> {
        self.tracks.borrow().clone()
    }

    /// Whether every track has reached `target`.
    pub fn reached(&self, target: i64) -> bool {
        all_reached(&self.tracks.borrow(), target)
    }

    /// Set every track to `value` (default 0). The only way a checkpoint goes down.
    pub fn reset_all(&self, value: Option<i64>) {
        let value = value.unwrap_or(0);
        self.tracks.send_modify(|tracks| tracks.iter_mut().for_each(|t| *t = value));
    }

    /// Resolve once every track is at or past `target`.
    pub async fn wait(&self, target: i64, limit: WaitLimit) -> Result<(), WaitError> {
        let mut rx = self.tracks.subscribe();
        let reached = async move {
            // The sender lives in `self`, so the channel cannot close mid-wait.
            let _ = rx.wait_for(|tracks| all_reached(tracks, target)).await;
        };

        match limit {
            WaitLimit::Forever => {
                reached.await;
                Ok(())
            }
            WaitLimit::Timeout(duration) => tokio::time::timeout(duration, reached)
                .await
                .map_err(|_| WaitError::Timeout { target }),
            WaitLimit::Cancel(token) => tokio::select! {
                biased;
                _ = reached => Ok(()),
                _ = token.cancelled() => Err(WaitError::Aborted { target }),
            },
        }
    }
}

fn all_reached(tracks: &[i64], target: i64) -> bool {
    tracks.iter().all(|checkpoint| *checkpoint >= target)
}
