//! Per-endpoint background loops.
//!
//! Each executor that watches an endpoint (circuit recovery, backend
//! health) runs one task per endpoint. The task handle and its shutdown
//! channel live in a [`MonitorSet`] so a loop is never started twice and
//! can always be stopped.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Per-endpoint loop state.
struct MonitorSlot {
    /// Handle to the background task.
    handle: JoinHandle<()>,
    /// Shutdown signal for this loop.
    shutdown_tx: watch::Sender<bool>,
}

/// Tracks one background loop per endpoint.
pub(crate) struct MonitorSet {
    kind: &'static str,
    slots: Mutex<HashMap<String, MonitorSlot>>,
}

impl MonitorSet {
    pub(crate) fn new(kind: &'static str) -> Self {
        Self {
            kind,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Start the loop for `endpoint` unless one is already running.
    ///
    /// `spawn_loop` receives the shutdown receiver and returns the loop
    /// future. Returns `true` if a new loop was started.
    pub(crate) async fn ensure<F, Fut>(&self, endpoint: &str, spawn_loop: F) -> bool
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.get(endpoint)
            && !slot.handle.is_finished()
        {
            return false;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(spawn_loop(shutdown_rx));
        slots.insert(
            endpoint.to_string(),
            MonitorSlot {
                handle,
                shutdown_tx,
            },
        );
        info!(%endpoint, kind = self.kind, "monitor started");
        true
    }

    /// Stop the loop for `endpoint`, waiting for its current tick to finish.
    pub(crate) async fn stop(&self, endpoint: &str) -> bool {
        let slot = self.slots.lock().await.remove(endpoint);
        match slot {
            Some(slot) => {
                let _ = slot.shutdown_tx.send(true);
                let _ = slot.handle.await;
                info!(%endpoint, kind = self.kind, "monitor stopped");
                true
            }
            None => false,
        }
    }

    /// Stop every loop (for graceful shutdown).
    pub(crate) async fn stop_all(&self) {
        let drained: Vec<(String, MonitorSlot)> = self.slots.lock().await.drain().collect();
        for (endpoint, slot) in drained {
            let _ = slot.shutdown_tx.send(true);
            let _ = slot.handle.await;
            debug!(%endpoint, kind = self.kind, "monitor stopped");
        }
        info!(kind = self.kind, "all monitors stopped");
    }

    /// Endpoints with a live loop.
    pub(crate) async fn running(&self) -> Vec<String> {
        let slots = self.slots.lock().await;
        let mut endpoints: Vec<String> = slots
            .iter()
            .filter(|(_, slot)| !slot.handle.is_finished())
            .map(|(endpoint, _)| endpoint.clone())
            .collect();
        endpoints.sort();
        endpoints
    }
}

/// Run `tick` every `interval` until the shutdown channel fires.
pub(crate) async fn run_every<F, Fut>(interval: Duration, mut shutdown: watch::Receiver<bool>, mut tick: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => tick().await,
            _ = shutdown.changed() => break,
        }
    }
}
