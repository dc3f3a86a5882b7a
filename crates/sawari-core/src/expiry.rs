//! Expiry scheduler for ride requests.
//!
//! Each active request owns exactly one timer. When the timer fires it
//! does not touch the registry directly; it enqueues an [`Expired`]
//! event that the engine processes on its single serialized event
//! stream, so a disconnect or explicit stop racing the firing can never
//! interleave with it.
//!
//! Every arm is stamped with a generation. A fired-but-not-yet-processed
//! timer from an earlier arm carries a stale generation and is rejected
//! by [`ExpiryScheduler::take_fired`], which is what makes re-requesting
//! safe: the old timer cannot cancel the refreshed request.

use sawari_protocol::ConnectionId;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

/// A timer firing, delivered on the scheduler's event channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expired {
    /// Connection whose request timed out.
    pub id: ConnectionId,
    /// Generation of the arm that scheduled this firing.
    pub generation: u64,
}

struct ArmedTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

/// One auto-cancel timer per requesting student.
pub struct ExpiryScheduler {
    timers: HashMap<ConnectionId, ArmedTimer>,
    next_generation: u64,
    tx: mpsc::UnboundedSender<Expired>,
}

impl ExpiryScheduler {
    /// Create a scheduler and the channel its firings arrive on.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Expired>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                timers: HashMap::new(),
                next_generation: 0,
                tx,
            },
            rx,
        )
    }

    /// Arm a timer for `id`, replacing any existing one.
    ///
    /// The window always restarts from now. Returns the generation of
    /// the new timer.
    pub fn arm(&mut self, id: &str, window: Duration) -> u64 {
        self.disarm(id);

        self.next_generation += 1;
        let generation = self.next_generation;
        let owned_id = id.to_string();
        let tx = self.tx.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            // The receiver only drops on shutdown; a failed send is moot.
            let _ = tx.send(Expired {
                id: owned_id,
                generation,
            });
        });

        trace!(connection = %id, generation, "Timer armed");
        self.timers.insert(id.to_string(), ArmedTimer { generation, handle });
        generation
    }

    /// Cancel the timer for `id`, if any. Safe to call on unarmed or
    /// already-fired ids.
    pub fn disarm(&mut self, id: &str) -> bool {
        if let Some(timer) = self.timers.remove(id) {
            timer.handle.abort();
            trace!(connection = %id, generation = timer.generation, "Timer disarmed");
            true
        } else {
            false
        }
    }

    /// Accept or reject a firing.
    ///
    /// Returns `true` and forgets the timer iff `generation` is still
    /// the current arm for `id`. A stale generation means the request
    /// was stopped, refreshed, or the actor disconnected after the
    /// firing was enqueued; the caller must treat it as a no-op.
    pub fn take_fired(&mut self, id: &str, generation: u64) -> bool {
        match self.timers.get(id) {
            Some(timer) if timer.generation == generation => {
                self.timers.remove(id);
                true
            }
            _ => false,
        }
    }

    /// Whether a timer is currently armed for `id`. A fired timer counts
    /// as armed until its event is drained via [`Self::take_fired`].
    #[must_use]
    pub fn armed(&self, id: &str) -> bool {
        self.timers.contains_key(id)
    }

    /// Number of armed timers.
    #[must_use]
    pub fn armed_count(&self) -> usize {
        self.timers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(300_000);

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_once_after_window() {
        let (mut scheduler, mut rx) = ExpiryScheduler::new();
        let generation = scheduler.arm("conn-s", WINDOW);

        tokio::time::advance(WINDOW - Duration::from_millis(1)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::advance(Duration::from_millis(2)).await;
        let fired = rx.recv().await.unwrap();
        assert_eq!(fired.id, "conn-s");
        assert_eq!(fired.generation, generation);

        assert!(scheduler.take_fired("conn-s", generation));
        assert!(!scheduler.armed("conn-s"));

        tokio::time::advance(WINDOW * 2).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disarm_prevents_firing() {
        let (mut scheduler, mut rx) = ExpiryScheduler::new();
        scheduler.arm("conn-s", WINDOW);

        assert!(scheduler.disarm("conn-s"));
        assert!(!scheduler.disarm("conn-s"));

        tokio::time::advance(WINDOW * 2).await;
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_resets_window_and_invalidates_old_generation() {
        let (mut scheduler, mut rx) = ExpiryScheduler::new();
        let old = scheduler.arm("conn-s", WINDOW);

        // Halfway through, re-arm. The window restarts from now.
        tokio::time::advance(WINDOW / 2).await;
        let new = scheduler.arm("conn-s", WINDOW);
        assert_ne!(old, new);
        assert_eq!(scheduler.armed_count(), 1);

        // The old firing point passes without an event.
        tokio::time::advance(WINDOW / 2 + Duration::from_millis(1)).await;
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());

        tokio::time::advance(WINDOW / 2).await;
        let fired = rx.recv().await.unwrap();
        assert_eq!(fired.generation, new);
        assert!(scheduler.take_fired("conn-s", fired.generation));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_generation_rejected() {
        let (mut scheduler, _rx) = ExpiryScheduler::new();
        let old = scheduler.arm("conn-s", WINDOW);
        let new = scheduler.arm("conn-s", WINDOW);

        assert!(!scheduler.take_fired("conn-s", old));
        assert!(scheduler.armed("conn-s"));
        assert!(scheduler.take_fired("conn-s", new));
        assert!(!scheduler.take_fired("conn-s", new));
    }

    #[tokio::test(start_paused = true)]
    async fn test_at_most_one_timer_per_id() {
        let (mut scheduler, _rx) = ExpiryScheduler::new();
        for _ in 0..5 {
            scheduler.arm("conn-s", WINDOW);
        }
        scheduler.arm("conn-t", WINDOW);
        assert_eq!(scheduler.armed_count(), 2);
    }
}
