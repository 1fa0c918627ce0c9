//! Cooperative cancellation.
//!
//! An [`AbortToken`] is a cloneable flag backed by a `watch` channel. Producers
//! call [`AbortToken::abort`]; workers poll [`AbortToken::is_aborted`] at their
//! checkpoints (before each action, sweep point or logging tick) and may await
//! [`AbortToken::cancelled`] while idle so delays end promptly.
//!
//! A [`PauseGate`] is the resumable counterpart: while it is closed, a worker
//! holds at its next checkpoint until the gate reopens or abort is signalled.
//!
//! Nothing here interrupts a future in flight: a hardware write that already
//! started always runs to completion before the worker reaches its next
//! checkpoint.

use std::sync::Arc;
use tokio::sync::watch;

/// Shared, one-way abort signal.
#[derive(Debug, Clone)]
pub struct AbortToken {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for AbortToken {
    fn default() -> Self {
        Self::new()
    }
}

impl AbortToken {
    /// Create a token in the non-aborted state.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Signal abort. Idempotent.
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    /// Whether abort has been signalled.
    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once abort has been signalled.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so `wait_for` cannot observe a closed channel
        let _ = rx.wait_for(|aborted| *aborted).await;
    }
}

/// Shared pause/resume signal, checked at the same checkpoints as abort.
#[derive(Debug, Clone)]
pub struct PauseGate {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for PauseGate {
    fn default() -> Self {
        Self::new()
    }
}

impl PauseGate {
    /// Create an open gate.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Close the gate. Returns `false` if it was already closed.
    pub fn pause(&self) -> bool {
        !self.tx.send_replace(true)
    }

    /// Reopen the gate. Returns `false` if it was already open.
    pub fn resume(&self) -> bool {
        self.tx.send_replace(false)
    }

    /// Whether the gate is closed.
    pub fn is_paused(&self) -> bool {
        *self.tx.borrow()
    }

    /// Checkpoint: wait while paused.
    ///
    /// Returns `true` to proceed, `false` if `abort` has been (or becomes)
    /// signalled before the gate reopens.
    pub async fn hold(&self, abort: &AbortToken) -> bool {
        if abort.is_aborted() {
            return false;
        }
        if !self.is_paused() {
            return true;
        }
        tokio::select! {
            biased;
            _ = abort.cancelled() => false,
            _ = self.resumed() => !abort.is_aborted(),
        }
    }

    async fn resumed(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|paused| !*paused).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn abort_is_visible_to_clones() {
        let token = AbortToken::new();
        let clone = token.clone();
        assert!(!clone.is_aborted());
        token.abort();
        assert!(clone.is_aborted());
        token.abort();
        assert!(clone.is_aborted());
    }

    #[tokio::test]
    async fn cancelled_resolves_after_abort() {
        let token = AbortToken::new();
        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.cancelled().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());
        token.abort();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should finish")
            .unwrap();
    }

    #[tokio::test]
    async fn cancelled_returns_immediately_when_already_aborted() {
        let token = AbortToken::new();
        token.abort();
        tokio::time::timeout(Duration::from_millis(100), token.cancelled())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn open_gate_passes_straight_through() {
        let gate = PauseGate::new();
        assert!(gate.hold(&AbortToken::new()).await);

        let aborted = AbortToken::new();
        aborted.abort();
        assert!(!gate.hold(&aborted).await);
    }

    #[tokio::test]
    async fn paused_gate_holds_until_resumed() {
        let gate = PauseGate::new();
        assert!(gate.pause());
        assert!(!gate.pause());
        assert!(gate.is_paused());

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.hold(&AbortToken::new()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        assert!(gate.resume());
        assert!(!gate.resume());
        let proceed = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should finish")
            .unwrap();
        assert!(proceed);
    }

    #[tokio::test]
    async fn abort_releases_a_paused_gate() {
        let gate = PauseGate::new();
        gate.pause();
        let token = AbortToken::new();
        let waiter = {
            let (gate, token) = (gate.clone(), token.clone());
            tokio::spawn(async move { gate.hold(&token).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.abort();

        let proceed = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should finish")
            .unwrap();
        assert!(!proceed);
        assert!(gate.is_paused());
    }
}
