//! Per-session idle timers.
//!
//! Each session has at most one pending timer. Scheduling replaces (and
//! aborts) the previous one. A fired timer is delivered to the bridge as an
//! [`IdleFired`] carrying the generation it was scheduled with; the bridge
//! only acts on it if [`IdleScheduler::accept`] confirms it is still the
//! session's current timer.

use crate::host::SessionId;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Notification that a session's quiet period elapsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdleFired {
    pub session_id: SessionId,
    pub generation: u64,
}

struct PendingTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

pub struct IdleScheduler {
    timers: HashMap<SessionId, PendingTimer>,
    next_generation: u64,
    tx: mpsc::UnboundedSender<IdleFired>,
}

impl IdleScheduler {
    pub fn new(tx: mpsc::UnboundedSender<IdleFired>) -> Self {
        Self {
            timers: HashMap::new(),
            next_generation: 1,
            tx,
        }
    }

    /// Start or restart the session's timer.
    pub fn schedule(&mut self, session_id: &str, after: Duration) {
        self.cancel(session_id);
        let generation = self.next_generation;
        self.next_generation += 1;

        let tx = self.tx.clone();
        let fired = IdleFired {
            session_id: session_id.to_string(),
            generation,
        };
        let deadline = tokio::time::Instant::now() + after;
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let _ = tx.send(fired);
        });
        self.timers
            .insert(session_id.to_string(), PendingTimer { generation, handle });
    }

    /// Cancel the session's pending timer, if any.
    pub fn cancel(&mut self, session_id: &str) -> bool {
        match self.timers.remove(session_id) {
            Some(timer) => {
                timer.handle.abort();
                debug!(session_id, "idle timer cancelled");
                true
            }
            None => false,
        }
    }

    /// Consume a firing if it belongs to the session's current timer.
    /// Stale firings (replaced or cancelled timers) return false.
    pub fn accept(&mut self, fired: &IdleFired) -> bool {
        match self.timers.get(&fired.session_id) {
            Some(timer) if timer.generation == fired.generation => {
                self.timers.remove(&fired.session_id);
                true
            }
            _ => false,
        }
    }

    pub fn is_pending(&self, session_id: &str) -> bool {
        self.timers.contains_key(session_id)
    }
}

impl Drop for IdleScheduler {
    fn drop(&mut self) {
        for timer in self.timers.values() {
            timer.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fires_after_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut idle = IdleScheduler::new(tx);
        idle.schedule("s1", Duration::from_millis(100));

        tokio::time::advance(Duration::from_millis(99)).await;
        assert!(rx.try_recv().is_err());

        let fired = rx.recv().await.unwrap();
        assert_eq!(fired.session_id, "s1");
        assert!(idle.accept(&fired));
        assert!(!idle.is_pending("s1"));
    }

    #[tokio::test(start_paused = true)]
    async fn reschedule_replaces_prior_timer() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut idle = IdleScheduler::new(tx);
        idle.schedule("s1", Duration::from_millis(100));
        tokio::time::advance(Duration::from_millis(60)).await;
        idle.schedule("s1", Duration::from_millis(100));

        tokio::time::advance(Duration::from_millis(60)).await;
        assert!(rx.try_recv().is_err());

        let fired = rx.recv().await.unwrap();
        assert!(idle.accept(&fired));
        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_generation_is_rejected() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut idle = IdleScheduler::new(tx);
        idle.schedule("s1", Duration::from_millis(10));
        let stale = IdleFired {
            session_id: "s1".into(),
            generation: 0,
        };
        assert!(!idle.accept(&stale));
        assert!(idle.is_pending("s1"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_timer() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut idle = IdleScheduler::new(tx);
        idle.schedule("s1", Duration::from_millis(10));
        assert!(idle.cancel("s1"));
        assert!(!idle.cancel("s1"));
        tokio::time::advance(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }
}
