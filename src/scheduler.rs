//! Export scheduler
//!
//! One worker drains a FIFO queue of task ids and runs each task to
//! completion before taking the next. The worker holds the single render
//! slot for the whole task; direct renders take the same slot, so at most
//! one bounce is ever in flight.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

use crate::error::{PtStemError, Result};
use crate::export::{CancelToken, ExportPipeline};
use crate::tasks::TaskRegistry;

/// Single-worker FIFO executor for export tasks
pub struct ExportScheduler {
    queue: Mutex<Option<mpsc::UnboundedSender<String>>>,
    render_slot: Arc<Semaphore>,
    stopping: CancelToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ExportScheduler {
    /// Spawn the worker. Must be called from within a tokio runtime.
    pub fn start(pipeline: ExportPipeline, registry: Arc<TaskRegistry>) -> Self {
        let (queue, rx) = mpsc::unbounded_channel();
        let render_slot = Arc::new(Semaphore::new(1));
        let stopping = CancelToken::new();
        let worker = tokio::spawn(worker_loop(
            rx,
            pipeline,
            registry,
            Arc::clone(&render_slot),
            stopping.clone(),
        ));

        Self {
            queue: Mutex::new(Some(queue)),
            render_slot,
            stopping,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Queue a task behind everything submitted before it.
    pub fn enqueue(&self, task_id: String) -> Result<()> {
        let queue = self.queue.lock();
        let Some(sender) = queue.as_ref() else {
            return Err(PtStemError::Pipeline {
                reason: format!("export worker is shut down, task {} was not queued", task_id),
            });
        };
        sender.send(task_id).map_err(|e| PtStemError::Pipeline {
            reason: format!("export worker is not running, task {} was not queued", e.0),
        })
    }

    /// Wait for the render slot.
    pub async fn acquire_render_slot(&self) -> Result<OwnedSemaphorePermit> {
        Arc::clone(&self.render_slot)
            .acquire_owned()
            .await
            .map_err(|_| PtStemError::Internal("render slot closed".to_string()))
    }

    /// Stop taking work and wait for the worker to exit.
    ///
    /// The task being executed runs to its next checkpoint and writes its
    /// terminal state; callers cancel it first to make that quick. Tasks
    /// still queued are not started.
    pub async fn shutdown(&self) {
        self.stopping.cancel();
        self.queue.lock().take();

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "export worker ended abnormally");
            }
        }
        self.render_slot.close();
    }
}

impl Drop for ExportScheduler {
    fn drop(&mut self) {
        // The worker finishes the task in hand, then sees the closed queue.
        self.stopping.cancel();
        self.queue.lock().take();
    }
}

async fn worker_loop(
    mut rx: mpsc::UnboundedReceiver<String>,
    pipeline: ExportPipeline,
    registry: Arc<TaskRegistry>,
    render_slot: Arc<Semaphore>,
    stopping: CancelToken,
) {
    tracing::debug!("export worker started");

    while let Some(task_id) = rx.recv().await {
        if stopping.is_cancelled() {
            tracing::debug!(%task_id, "worker stopping, leaving task queued");
            break;
        }

        let permit = match Arc::clone(&render_slot).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };

        match registry.claim(&task_id) {
            Some(work) => pipeline.run(work).await,
            None => tracing::debug!(%task_id, "skipping task that is gone or already finished"),
        }

        drop(permit);
    }

    tracing::debug!("export worker stopped");
}
