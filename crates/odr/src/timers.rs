//! Timer management for the request distributor.
//!
//! Timers are spawned as tokio tasks that sleep and then post their
//! [`TimerId`] back to the distributor loop. A timer that is cancelled or
//! replaced is aborted; one that already fired is recognised as stale by the
//! loop (attempt numbers no longer match).

use lightclient_types::RequestId;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Identifies a distributor timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerId {
    /// Per-attempt timeout for the given attempt number of a request.
    Attempt(RequestId, u32),
    /// Overall deadline of a request.
    Deadline(RequestId),
}

impl TimerId {
    pub fn request(&self) -> RequestId {
        match self {
            TimerId::Attempt(id, _) | TimerId::Deadline(id) => *id,
        }
    }
}

/// Manages the distributor's timers.
pub struct TimerManager {
    timers: HashMap<TimerId, JoinHandle<()>>,
    fired_tx: mpsc::Sender<TimerId>,
}

impl TimerManager {
    pub fn new(fired_tx: mpsc::Sender<TimerId>) -> Self {
        Self {
            timers: HashMap::new(),
            fired_tx,
        }
    }

    /// Set a timer that fires after `duration`.
    ///
    /// If a timer with the same ID already exists, it is cancelled first.
    pub fn set_timer(&mut self, id: TimerId, duration: Duration) {
        self.set_timer_at(id, Instant::now() + duration);
    }

    /// Set a timer that fires at `deadline`.
    pub fn set_timer_at(&mut self, id: TimerId, deadline: Instant) {
        self.cancel_timer(id);

        let fired_tx = self.fired_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            trace!(timer = ?id, "Timer fired");
            let _ = fired_tx.send(id).await;
        });

        self.timers.insert(id, handle);
        trace!(timer = ?id, "Timer set");
    }

    /// Cancel a timer. No-op if it doesn't exist or already fired.
    pub fn cancel_timer(&mut self, id: TimerId) {
        if let Some(handle) = self.timers.remove(&id) {
            handle.abort();
            trace!(timer = ?id, "Timer cancelled");
        }
    }

    /// Forget a timer that has fired, without aborting anything.
    pub fn fired(&mut self, id: TimerId) {
        self.timers.remove(&id);
    }

    /// Cancel every timer belonging to `request`.
    pub fn cancel_request(&mut self, request: RequestId) {
        self.timers.retain(|id, handle| {
            if id.request() == request {
                handle.abort();
                false
            } else {
                true
            }
        });
    }

    /// Cancel all timers. Called during shutdown.
    pub fn cancel_all(&mut self) {
        let count = self.timers.len();
        for (_, handle) in self.timers.drain() {
            handle.abort();
        }
        if count > 0 {
            debug!(count, "Cancelled all timers");
        }
    }

    pub fn active_count(&self) -> usize {
        self.timers.len()
    }
}

impl Drop for TimerManager {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_timer_fires() {
        let (tx, mut rx) = mpsc::channel(10);
        let mut manager = TimerManager::new(tx);

        let id = TimerId::Attempt(RequestId(1), 1);
        manager.set_timer(id, Duration::from_millis(10));

        let fired = tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .expect("timeout")
            .expect("channel closed");
        assert_eq!(fired, id);
    }

    #[tokio::test]
    async fn test_timer_cancel() {
        let (tx, mut rx) = mpsc::channel(10);
        let mut manager = TimerManager::new(tx);

        let id = TimerId::Deadline(RequestId(1));
        manager.set_timer(id, Duration::from_millis(50));
        manager.cancel_timer(id);

        let result = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(result.is_err(), "Timer should have been cancelled");
    }

    #[tokio::test]
    async fn test_timer_replace() {
        let (tx, mut rx) = mpsc::channel(10);
        let mut manager = TimerManager::new(tx);

        let id = TimerId::Deadline(RequestId(1));
        manager.set_timer(id, Duration::from_millis(500));
        manager.set_timer(id, Duration::from_millis(10));
        assert_eq!(manager.active_count(), 1);

        let fired = tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .expect("timeout - replacement didn't fire quickly")
            .expect("channel closed");
        assert_eq!(fired, id);
    }

    #[tokio::test]
    async fn test_cancel_request_leaves_others() {
        let (tx, mut rx) = mpsc::channel(10);
        let mut manager = TimerManager::new(tx);

        manager.set_timer(TimerId::Attempt(RequestId(1), 1), Duration::from_millis(20));
        manager.set_timer(TimerId::Deadline(RequestId(1)), Duration::from_millis(20));
        manager.set_timer(TimerId::Deadline(RequestId(2)), Duration::from_millis(20));
        assert_eq!(manager.active_count(), 3);

        manager.cancel_request(RequestId(1));
        assert_eq!(manager.active_count(), 1);

        let fired = tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .expect("timeout")
            .expect("channel closed");
        assert_eq!(fired, TimerId::Deadline(RequestId(2)));
    }

    #[tokio::test]
    async fn test_cancel_all() {
        let (tx, mut rx) = mpsc::channel(10);
        let mut manager = TimerManager::new(tx);

        manager.set_timer(TimerId::Deadline(RequestId(1)), Duration::from_millis(50));
        manager.set_timer(TimerId::Deadline(RequestId(2)), Duration::from_millis(50));
        manager.cancel_all();
        assert_eq!(manager.active_count(), 0);

        let result = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(result.is_err(), "No timers should have fired");
    }
}
