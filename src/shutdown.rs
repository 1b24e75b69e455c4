//! Closed-signal plumbing: a one-shot broadcast every session actor waits
//! on so that closing the session unsticks pending reads, writes and
//! calls at once.

use tokio::sync::watch;

pub(crate) fn channel() -> (ShutdownSignal, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownSignal { tx }, Shutdown { rx })
}

/// Sending half, owned by the session. Firing it is idempotent.
#[derive(Debug)]
pub(crate) struct ShutdownSignal {
    tx: watch::Sender<bool>,
}

impl ShutdownSignal {
    pub(crate) fn signal(&self) {
        self.tx.send_replace(true);
    }

    pub(crate) fn is_signalled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Receiving half, cloned into every actor that must observe closure.
#[derive(Debug, Clone)]
pub(crate) struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// Resolves once the session closes; immediately if it already has.
    pub(crate) async fn closed(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                // Sender dropped: the session is gone either way.
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn signal_wakes_waiters_and_is_idempotent() {
        let (signal, shutdown) = channel();
        assert!(!signal.is_signalled());

        let mut waiter = shutdown.clone();
        let waiting = tokio::spawn(async move { waiter.closed().await });

        signal.signal();
        signal.signal();
        waiting.await.unwrap();
        assert!(signal.is_signalled());

        // A waiter arriving after the fact falls straight through.
        let mut late = shutdown.clone();
        late.closed().await;
    }
}
