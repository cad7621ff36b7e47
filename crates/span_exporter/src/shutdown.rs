//! Shutdown utilities: the admission gate and the cancel signal.

use std::sync::{PoisonError, RwLock};
use tokio::sync::watch;

/// Creates a linked canceller / signal pair.
pub fn cancellation() -> (Canceller, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (Canceller { tx }, CancelSignal { rx })
}

/// Fires the cancel signal. Idempotent.
#[derive(Debug)]
pub struct Canceller {
    tx: watch::Sender<bool>,
}

impl Canceller {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Returns a new signal observing this canceller.
    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            rx: self.tx.subscribe(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Cloneable view of a [`Canceller`], handed to in-flight deliveries.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        // The canceller is dropped right away, so `cancelled` pends forever.
        cancellation().1
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Completes once the paired canceller fires.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            // Canceller gone without firing: nothing can cancel us anymore.
            std::future::pending::<()>().await;
        }
    }
}

/// Shared shutdown state between the exporter handle and its worker.
#[derive(Debug)]
pub(crate) struct ShutdownState {
    /// `true` while records are admitted. Submissions hold the read side for
    /// the duration of their append, so once `close` returns no append can
    /// land behind the final drain.
    accepting: RwLock<bool>,
    canceller: Canceller,
}

impl ShutdownState {
    pub(crate) fn new() -> Self {
        let (canceller, _) = cancellation();
        Self {
            accepting: RwLock::new(true),
            canceller,
        }
    }

    /// Runs `admit` under the read gate if the exporter is still open.
    pub(crate) fn admit<R>(&self, admit: impl FnOnce() -> R) -> Option<R> {
        let accepting = self.accepting.read().unwrap_or_else(PoisonError::into_inner);
        (*accepting).then(admit)
    }

    /// Stops admitting records. Returns `false` if already closed.
    pub(crate) fn close(&self) -> bool {
        let mut accepting = self.accepting.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *accepting, false)
    }

    pub(crate) fn is_closed(&self) -> bool {
        !*self.accepting.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn cancel(&self) {
        self.canceller.cancel();
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.canceller.is_cancelled()
    }

    pub(crate) fn cancel_signal(&self) -> CancelSignal {
        self.canceller.signal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_close_is_idempotent_and_blocks_admission() {
        let state = ShutdownState::new();
        assert_eq!(state.admit(|| 7), Some(7));

        assert!(state.close());
        assert!(!state.close());
        assert!(state.is_closed());
        assert_eq!(state.admit(|| 7), None);
    }

    #[tokio::test]
    async fn test_signal_observes_cancel() {
        let (canceller, signal) = cancellation();
        let waiter = tokio::spawn({
            let signal = signal.clone();
            async move { signal.cancelled().await }
        });

        assert!(!signal.is_cancelled());
        canceller.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("signal did not fire")
            .unwrap();
        assert!(signal.is_cancelled());
        // Late subscribers see the fired state immediately
        canceller.signal().cancelled().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_signal_stays_pending() {
        let signal = CancelSignal::never();
        let result = tokio::time::timeout(Duration::from_secs(60), signal.cancelled()).await;
        assert!(result.is_err());
    }
}
