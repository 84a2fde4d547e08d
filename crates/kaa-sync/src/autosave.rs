//! Debounced background saving of a [`DocumentSync`]

use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use crate::document::{DocumentSync, SaveMode};
use crate::error::Result;

/// Saves the dirty subtree once edits have been quiet for the debounce window
///
/// Every edit re-arms the timer. Saves never overlap: edits that land while
/// one is in flight open a new window after it finishes. Failed saves are
/// logged and left for the next edit or [`AutoSaver::flush`].
#[derive(Debug)]
pub struct AutoSaver {
    sync: DocumentSync,
    stop: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl AutoSaver {
    /// Start watching `sync` for edits
    ///
    /// Must be called within a Tokio runtime.
    #[must_use]
    pub fn spawn(sync: DocumentSync, debounce: Duration) -> Self {
        let (stop_tx, stop_rx) = oneshot::channel();
        let edits = sync.subscribe_edits();
        let handle = tokio::spawn(run(sync.clone(), edits, debounce, stop_rx));
        Self {
            sync,
            stop: Some(stop_tx),
            handle: Some(handle),
        }
    }

    /// Save pending edits now
    ///
    /// # Errors
    /// The save's error
    pub async fn flush(&self) -> Result<()> {
        self.sync.save(SaveMode::Dirty).await
    }

    /// Drop any pending timer and wait for the worker to exit
    ///
    /// A save already in flight runs to completion first.
    pub async fn stop(mut self) {
        self.signal_stop();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::warn!("Auto-save worker ended abnormally: {}", e);
            }
        }
    }

    fn signal_stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

impl Drop for AutoSaver {
    fn drop(&mut self) {
        self.signal_stop();
    }
}

async fn run(
    sync: DocumentSync,
    mut edits: watch::Receiver<u64>,
    debounce: Duration,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut stop => return,
            changed = edits.changed() => if changed.is_err() { return },
        }

        // Quiet-period window; each further edit restarts it.
        loop {
            tokio::select! {
                _ = &mut stop => return,
                changed = edits.changed() => if changed.is_err() { return },
                () = tokio::time::sleep(debounce) => break,
            }
        }

        tracing::debug!("Auto-save debounce elapsed");
        if let Err(e) = sync.save(SaveMode::Dirty).await {
            tracing::warn!("Auto-save failed: {}", e);
        }
    }
}
