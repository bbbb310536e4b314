use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::info;

use crate::error::BifrostError;

/// Process-wide shutdown coordinator: a one-shot close signal carrying
/// the first error, plus a join counter over attached workers.
#[derive(Clone)]
pub struct SafeClose {
    inner: Arc<Inner>,
}

struct Inner {
    close_tx: watch::Sender<bool>,
    first_err: Mutex<Option<BifrostError>>,
    worker_tx: Mutex<Option<mpsc::Sender<()>>>,
    worker_rx: tokio::sync::Mutex<mpsc::Receiver<()>>,
}

/// Keeps its worker counted until dropped.
pub struct WorkerGuard {
    _tx: mpsc::Sender<()>,
}

impl SafeClose {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        let (close_tx, _) = watch::channel(false);
        let (worker_tx, worker_rx) = mpsc::channel(1);
        Self {
            inner: Arc::new(Inner {
                close_tx,
                first_err: Mutex::new(None),
                worker_tx: Mutex::new(Some(worker_tx)),
                worker_rx: tokio::sync::Mutex::new(worker_rx),
            }),
        }
    }

    /// Register a worker. Returns `None` once the close signal has
    /// fired; the caller must not start the worker in that case.
    pub fn attach(&self) -> Option<WorkerGuard> {
        if *self.inner.close_tx.borrow() {
            return None;
        }
        let tx = self.inner.worker_tx.lock().as_ref()?.clone();
        Some(WorkerGuard { _tx: tx })
    }

    /// A receiver that flips to `true` when the close signal fires.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.inner.close_tx.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.close_tx.borrow()
    }

    /// Fire the close signal. The first call records `err`; later
    /// calls are ignored.
    pub fn send_close(&self, err: Option<BifrostError>) {
        let was_closed = self.inner.close_tx.send_replace(true);
        if !was_closed {
            info!("close signal fired");
            *self.inner.first_err.lock() = err;
        }
    }

    /// Wait for the close signal, then for every attached worker to
    /// exit. Returns the first error sent with the signal, if any.
    pub async fn wait_closed(&self) -> Option<BifrostError> {
        let mut closed = self.inner.close_tx.subscribe();
        while !*closed.borrow() {
            if closed.changed().await.is_err() {
                break;
            }
        }

        // Drop the prototype sender so the receiver drains to None
        // once the last guard goes away.
        self.inner.worker_tx.lock().take();
        let mut rx = self.inner.worker_rx.lock().await;
        while rx.recv().await.is_some() {}

        self.inner.first_err.lock().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn attach_after_close_is_refused() {
        let closer = SafeClose::new();
        assert!(closer.attach().is_some());
        closer.send_close(None);
        assert!(closer.attach().is_none());
    }

    #[tokio::test]
    async fn first_error_wins() {
        let closer = SafeClose::new();
        closer.send_close(Some(BifrostError::Timeout));
        closer.send_close(Some(BifrostError::ServerShutdown));
        assert!(matches!(
            closer.wait_closed().await,
            Some(BifrostError::Timeout)
        ));
    }

    #[tokio::test]
    async fn waits_for_attached_workers() {
        let closer = SafeClose::new();
        let guard = closer.attach().unwrap();

        let waiter = closer.clone();
        let done = tokio::spawn(async move { waiter.wait_closed().await });

        closer.send_close(None);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!done.is_finished());

        drop(guard);
        assert!(done.await.unwrap().is_none());
    }
}
