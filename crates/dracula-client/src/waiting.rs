//! Pending-response cache
//!
//! Maps an in-flight message id to the oneshot sender that completes the
//! caller's request. Entries are removed on the first of: response
//! received, explicit pull, or the periodic cleanup sweep. The sweep only
//! scans a prefix of the map each pass, so its cost stays bounded no matter
//! how many requests are in flight; a timed-out sender is handed to a
//! channel instead of being completed inline so a slow caller cannot stall
//! the sweep.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::ClientError;

/// Completes one pending request.
pub(crate) type ReplySender = oneshot::Sender<Result<Bytes, ClientError>>;

/// Ceiling on the sweep period; short client timeouts lower it further.
const CLEANUP_EVERY_DEFAULT: Duration = Duration::from_secs(10);

struct Waiting {
    sender: ReplySender,
    created: Instant,
}

pub(crate) struct ResponseCache {
    entries: Mutex<HashMap<u32, Waiting>>,
    timeout: Duration,
    timed_out_tx: mpsc::UnboundedSender<ReplySender>,
    disposed: AtomicBool,
}

impl ResponseCache {
    /// Returns the cache and the receiving end of the timed-out channel;
    /// the caller is expected to drain it and fail each sender.
    pub fn new(timeout: Duration) -> (Arc<Self>, mpsc::UnboundedReceiver<ReplySender>) {
        let (timed_out_tx, timed_out_rx) = mpsc::unbounded_channel();
        let cache = Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
            timeout,
            timed_out_tx,
            disposed: AtomicBool::new(false),
        });
        (cache, timed_out_rx)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Register a pending request. Message ids wrap, so a collision means
    /// an old request with the same id is still in flight; reject rather
    /// than clobber it.
    pub fn add(&self, message_id: u32, sender: ReplySender) -> Result<(), ClientError> {
        let mut entries = self.entries.lock();
        if entries.contains_key(&message_id) {
            return Err(ClientError::MessageIdExists);
        }
        entries.insert(
            message_id,
            Waiting {
                sender,
                created: Instant::now(),
            },
        );
        Ok(())
    }

    /// Take the pending sender for `message_id`. The entry is always
    /// removed, even when it is reported as expired.
    pub fn pull(&self, message_id: u32) -> Result<ReplySender, ClientError> {
        let waiting = match self.entries.lock().remove(&message_id) {
            Some(waiting) => waiting,
            None => return Err(ClientError::NoMessage),
        };
        if waiting.created.elapsed() > self.timeout {
            return Err(ClientError::MessageExpired);
        }
        Ok(waiting.sender)
    }

    /// Stop sweeping. Idempotent; entries already handed to the timed-out
    /// channel still get drained.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Spawn the periodic sweep. Runs until disposed.
    pub fn spawn_cleanup(self: &Arc<Self>) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        let every = cache.timeout.min(CLEANUP_EVERY_DEFAULT);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if cache.is_disposed() {
                    break;
                }
                cache.cleanup_pass();
            }
        })
    }

    /// One bounded sweep over roughly a third of the entries.
    pub fn cleanup_pass(&self) {
        let mut entries = self.entries.lock();
        let scan = (entries.len() / 3).max(1);

        let expired: Vec<u32> = entries
            .iter()
            .take(scan)
            .filter(|(_, waiting)| waiting.created.elapsed() > self.timeout)
            .map(|(id, _)| *id)
            .collect();

        for message_id in expired {
            if let Some(waiting) = entries.remove(&message_id) {
                if !self.is_disposed() {
                    let _ = self.timed_out_tx.send(waiting.sender);
                }
            }
        }
    }
}
