use tokio::signal;
use tracing::info;

use super::AppResult;

/// Explicit replacement for a process-wide shutdown hook table: components
/// subscribe a callback, and [`ProcessLifecycle::run`] invokes them in
/// subscription order once the termination signal arrives.
#[derive(Default)]
pub struct ProcessLifecycle {
    callbacks: Vec<Box<dyn FnOnce() + Send>>,
}

impl ProcessLifecycle {
    pub fn new() -> ProcessLifecycle {
        ProcessLifecycle::default()
    }

    pub fn on_shutdown(&mut self, callback: impl FnOnce() + Send + 'static) {
        self.callbacks.push(Box::new(callback));
    }

    /// Blocks until ctrl-c, then runs the registered callbacks in order.
    pub fn run(self) -> AppResult<()> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        rt.block_on(async {
            let _ = signal::ctrl_c().await;
        });
        info!("termination signal received");
        self.fire();
        Ok(())
    }

    /// Runs the callbacks without waiting for a signal; used when startup
    /// fails after some components already subscribed.
    pub fn fire(self) {
        for callback in self.callbacks {
            callback();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn fire_runs_callbacks_in_subscription_order() {
        let order = Arc::new(AtomicUsize::new(0));
        let mut lifecycle = ProcessLifecycle::new();

        let first = order.clone();
        lifecycle.on_shutdown(move || {
            assert_eq!(first.fetch_add(1, Ordering::SeqCst), 0);
        });
        let second = order.clone();
        lifecycle.on_shutdown(move || {
            assert_eq!(second.fetch_add(1, Ordering::SeqCst), 1);
        });

        lifecycle.fire();
        assert_eq!(order.load(Ordering::SeqCst), 2);
    }
}
