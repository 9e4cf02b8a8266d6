use tokio::sync::broadcast;

/// Per-task subscription to a runtime's shutdown broadcast. The accept loop
/// and every connection task hold one and await [`recv`] inside their
/// `select!` loops; the signal also fires when the sender side is dropped,
/// so teardown can never be missed.
#[derive(Debug)]
pub struct ShutdownSignal {
    received: bool,
    notify: broadcast::Receiver<()>,
}

impl ShutdownSignal {
    pub fn subscribe(notify: &broadcast::Sender<()>) -> ShutdownSignal {
        ShutdownSignal {
            received: false,
            notify: notify.subscribe(),
        }
    }

    /// Completes once shutdown has been signalled. Resolves immediately on
    /// every await after the first, so a `select!` loop that keeps polling
    /// it never re-awaits a lagged receiver.
    pub async fn recv(&mut self) {
        if self.received {
            return;
        }
        let _ = self.notify.recv().await;
        self.received = true;
    }
}
