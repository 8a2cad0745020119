//! Admission control for external transcriber processes.
//!
//! Unbounded by default: each request spawns its own process immediately. When
//! `limits.transcriptions.max_concurrent` is set, requests queue for a slot and are rejected with
//! HTTP 429 once the queue is full or their wait runs out.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::config::{LimitsConfig, TranscriptionLimitsConfig};
use crate::errors::{Error, Result};

const BUSY_MESSAGE: &str = "Hay demasiadas transcripciones en curso. Inténtalo de nuevo más tarde.";
const WAIT_EXPIRED_MESSAGE: &str =
    "Se agotó el tiempo de espera para iniciar la transcripción. Inténtalo de nuevo más tarde.";

/// Container for all resource limiters.
#[derive(Debug, Default, Clone)]
pub struct Limiters {
    /// Limiter for concurrent transcriptions. None means unlimited.
    pub transcriptions: Option<Arc<TranscriptionLimiter>>,
}

impl Limiters {
    pub fn new(config: &LimitsConfig) -> Self {
        Self {
            transcriptions: TranscriptionLimiter::new(&config.transcriptions).map(Arc::new),
        }
    }

    /// Take a transcription slot if a limit is configured.
    pub async fn admit_transcription(&self) -> Result<Option<TranscriptionPermit>> {
        match &self.transcriptions {
            Some(limiter) => limiter.acquire().await.map(Some),
            None => Ok(None),
        }
    }
}

/// Bounds the number of transcriber processes alive at once.
///
/// A request that finds every slot busy takes a place in the queue for at most `max_wait`. Its
/// place is held by a [`QueuePlace`], so a request dropped while waiting (client hung up) frees
/// the place along with it.
#[derive(Debug)]
pub struct TranscriptionLimiter {
    slots: Arc<Semaphore>,
    queued: AtomicUsize,
    /// None = unbounded queue
    queue_capacity: Option<usize>,
    max_wait: Duration,
}

impl TranscriptionLimiter {
    /// Returns `None` when `max_concurrent` is 0.
    pub fn new(config: &TranscriptionLimitsConfig) -> Option<Self> {
        if config.max_concurrent == 0 {
            return None;
        }

        Some(Self {
            slots: Arc::new(Semaphore::new(config.max_concurrent)),
            queued: AtomicUsize::new(0),
            queue_capacity: (config.max_waiting != 0).then_some(config.max_waiting),
            max_wait: config.max_wait,
        })
    }

    /// Requests currently waiting for a slot.
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    /// Take a slot, queueing for up to `max_wait` when none is free.
    ///
    /// Fails with `TooManyRequests` when the queue is full or the wait runs out.
    pub async fn acquire(&self) -> Result<TranscriptionPermit> {
        if let Ok(slot) = self.slots.clone().try_acquire_owned() {
            return Ok(TranscriptionPermit { _slot: slot });
        }

        let _place = self.join_queue()?;

        // `timeout` polls the acquire once before looking at the deadline, so a zero `max_wait`
        // still picks up a slot freed in the meantime
        match tokio::time::timeout(self.max_wait, self.slots.clone().acquire_owned()).await {
            Ok(Ok(slot)) => Ok(TranscriptionPermit { _slot: slot }),
            // The semaphore is never closed, so only the deadline gets here
            Ok(Err(_)) | Err(_) => {
                debug!(max_wait = ?self.max_wait, "Gave up waiting for a transcription slot");
                Err(Error::TooManyRequests {
                    message: WAIT_EXPIRED_MESSAGE.to_string(),
                })
            }
        }
    }

    fn join_queue(&self) -> Result<QueuePlace<'_>> {
        let joined = self.queued.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |queued| match self.queue_capacity {
            Some(capacity) if queued >= capacity => None,
            _ => Some(queued + 1),
        });

        match joined {
            Ok(_) => Ok(QueuePlace { queued: &self.queued }),
            Err(queued) => {
                warn!(queued, "Transcription queue full, rejecting request");
                Err(Error::TooManyRequests {
                    message: BUSY_MESSAGE.to_string(),
                })
            }
        }
    }
}

/// A place in the waiting queue, given back on drop.
struct QueuePlace<'a> {
    queued: &'a AtomicUsize,
}

impl Drop for QueuePlace<'_> {
    fn drop(&mut self) {
        self.queued.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Held for as long as a transcriber process may be running.
#[must_use]
#[derive(Debug)]
pub struct TranscriptionPermit {
    _slot: OwnedSemaphorePermit,
}
