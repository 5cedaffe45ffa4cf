//! Serialized rollout execution
//!
//! Rollouts run one at a time, in submission order, on a single worker task.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use crate::errors::ControllerError;

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// FIFO queue with concurrency 1
#[derive(Clone)]
pub struct RolloutQueue {
    tx: mpsc::UnboundedSender<Job>,
    pending: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
}

impl RolloutQueue {
    /// Create the queue and spawn its worker on the current runtime
    pub fn start() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        tokio::spawn(worker(rx, pending.clone()));
        Self {
            tx,
            pending,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Enqueue a job and wait for its result
    pub async fn run<T, F>(&self, job: F) -> Result<T, ControllerError>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, ControllerError>> + Send + 'static,
    {
        let rx = self.spawn(job)?;
        rx.await.map_err(|_| {
            ControllerError::ShutdownError("rollout dropped before completion".to_string())
        })?
    }

    /// Enqueue a job without waiting. The receiver resolves with the job's
    /// result and may be dropped.
    pub fn spawn<T, F>(
        &self,
        job: F,
    ) -> Result<oneshot::Receiver<Result<T, ControllerError>>, ControllerError>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, ControllerError>> + Send + 'static,
    {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ControllerError::ShutdownError(
                "rollout queue is closed".to_string(),
            ));
        }

        let (result_tx, result_rx) = oneshot::channel();
        let wrapped: Job = Box::pin(async move {
            let _ = result_tx.send(job.await);
        });

        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(wrapped).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(ControllerError::ShutdownError(
                "rollout worker stopped".to_string(),
            ));
        }
        Ok(result_rx)
    }

    /// Jobs queued or running
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Refuse new jobs. Already queued jobs still run.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!("Rollout queue closed with {} pending job(s)", self.pending());
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

async fn worker(mut rx: mpsc::UnboundedReceiver<Job>, pending: Arc<AtomicUsize>) {
    debug!("Rollout worker started");
    while let Some(job) = rx.recv().await {
        // Run on its own task so a panicking rollout does not kill the worker
        if let Err(e) = tokio::spawn(job).await {
            error!("Rollout job panicked: {}", e);
        }
        pending.fetch_sub(1, Ordering::SeqCst);
    }
    debug!("Rollout worker stopped");
}
