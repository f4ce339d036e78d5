//! Close signalling shared by every component loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::watch;

use crate::fabric::FabricError;

/// One-shot close trigger plus the closed acknowledgement that
/// `wait_for_close` blocks on.
///
/// The trigger is level-triggered: a watcher created after the signal fired
/// still observes it immediately. The `Running → Closing` transition happens
/// exactly once, guarded by a compare-and-swap on the running flag.
pub struct Shutdown {
    running: AtomicBool,
    close: watch::Sender<bool>,
    closed: watch::Sender<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            close: watch::Sender::new(false),
            closed: watch::Sender::new(false),
        }
    }

    /// Fire the close signal. The first caller performs the transition;
    /// later calls are no-ops. Never blocks.
    pub fn trigger(&self) -> bool {
        if self
            .running
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let _ = self.close.send(true);
            true
        } else {
            false
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// A handle the component loop selects on at every suspension point.
    pub fn watcher(&self) -> CloseWatcher {
        CloseWatcher {
            rx: self.close.subscribe(),
        }
    }

    /// Mark the component fully wound down, unblocking every waiter.
    pub fn mark_closed(&self) {
        let _ = self.closed.send(true);
    }

    /// Block until [`mark_closed`](Self::mark_closed) has run.
    pub async fn wait_closed(&self, timeout: Duration) -> Result<(), FabricError> {
        let mut rx = self.closed.subscribe();
        let result = tokio::time::timeout(timeout, rx.wait_for(|closed| *closed)).await;
        match result {
            Ok(_) => Ok(()),
            Err(_) => Err(FabricError::Timeout),
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer end of the close signal. Clone freely; every blocking channel
/// operation in a loop races against [`fired`](Self::fired).
#[derive(Clone)]
pub struct CloseWatcher {
    rx: watch::Receiver<bool>,
}

impl CloseWatcher {
    /// Resolves once the close signal has fired. Cancel safe.
    pub async fn fired(&mut self) {
        let _ = self.rx.wait_for(|fired| *fired).await;
    }
}
