//! Export service
//!
//! The facade request handlers and the CLI talk to. Owns the control
//! surface handle, the task registry and the scheduler; every DAW call is
//! offloaded so nothing here blocks the runtime.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::config::Config;
use crate::error::{PtStemError, Result};
use crate::export::{ExportPipeline, ExportRequest, ExportSettings};
use crate::scheduler::ExportScheduler;
use crate::snapshot::{self, ApplyReport, Snapshot};
use crate::surface::{offload, RenderRequest, SessionInfo, SharedSurface, TrackInfo, TransportAction};
use crate::tasks::{TaskRegistry, TaskStatus, TaskView};

/// Snapshot export service
pub struct ExportService {
    surface: SharedSurface,
    registry: Arc<TaskRegistry>,
    scheduler: ExportScheduler,
    default_output_dir: PathBuf,
}

impl ExportService {
    /// Build the service and start its worker. Must be called from within a
    /// tokio runtime.
    pub fn new(surface: SharedSurface, config: &Config) -> Self {
        let registry = Arc::new(TaskRegistry::new());
        let pipeline = ExportPipeline::new(Arc::clone(&surface), Arc::clone(&registry), config);
        let scheduler = ExportScheduler::start(pipeline, Arc::clone(&registry));

        tracing::info!(surface = surface.name(), "export service ready");
        Self {
            surface,
            registry,
            scheduler,
            default_output_dir: config.output_dir.clone(),
        }
    }

    pub fn surface(&self) -> &SharedSurface {
        &self.surface
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// Attach the surface if it is not attached yet.
    pub async fn connect(&self) -> Result<()> {
        if self.surface.is_connected() {
            return Ok(());
        }
        offload(&self.surface, |s| s.connect()).await
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.surface.is_connected() {
            Ok(())
        } else {
            Err(PtStemError::connection(format!(
                "{} control surface is not attached",
                self.surface.name()
            )))
        }
    }

    /// Requests and direct renders without an output path write to the
    /// configured output directory.
    fn resolve_output(&self, settings: &mut ExportSettings) {
        if settings.output_path.as_os_str().is_empty() {
            settings.output_path = self.default_output_dir.clone();
        }
    }

    // === Tasks ===

    /// Validate and queue a batch export. Returns the new task id.
    pub fn submit(&self, mut request: ExportRequest) -> Result<String> {
        self.ensure_connected()?;
        self.resolve_output(&mut request.export_settings);
        request.validate()?;

        let task_id = self.registry.create(request);
        if let Err(e) = self.scheduler.enqueue(task_id.clone()) {
            // Never leave an unqueued task pending.
            let _ = self.registry.request_cancel(&task_id);
            return Err(e);
        }
        Ok(task_id)
    }

    pub fn status(&self, task_id: &str) -> Result<TaskView> {
        self.registry.get(task_id)
    }

    pub fn list(&self) -> Vec<TaskView> {
        self.registry.list()
    }

    /// Cancel a pending or running task. A running bounce is asked to abort.
    pub async fn cancel(&self, task_id: &str) -> Result<TaskView> {
        let previous = self.registry.request_cancel(task_id)?;
        if previous == TaskStatus::Running {
            offload(&self.surface, |s| {
                s.cancel_render();
                Ok(())
            })
            .await?;
        }
        self.registry.get(task_id)
    }

    pub fn delete(&self, task_id: &str) -> Result<()> {
        self.registry.delete(task_id)
    }

    /// Poll a task until it is terminal and its worker has let go.
    pub async fn wait_for(&self, task_id: &str, poll: Duration) -> Result<TaskView> {
        loop {
            let view = self.registry.get(task_id)?;
            // A cancelled task has no result until the worker drains it.
            if view.is_terminal() && view.result.is_some() {
                return Ok(view);
            }
            tokio::time::sleep(poll).await;
        }
    }

    // === Session ===

    pub async fn session_info(&self) -> Result<SessionInfo> {
        offload(&self.surface, |s| s.get_session_info()).await
    }

    pub async fn tracks(&self) -> Result<Vec<TrackInfo>> {
        offload(&self.surface, |s| s.get_track_list()).await
    }

    pub async fn transport(&self, action: TransportAction) -> Result<bool> {
        tracing::info!(action = action.as_str(), "transport");
        offload(&self.surface, move |s| s.transport(action)).await
    }

    /// Apply one snapshot to the live session outside of any export.
    pub async fn apply_snapshot(&self, snapshot: &Snapshot) -> Result<ApplyReport> {
        tracing::info!(snapshot = %snapshot.name, "applying snapshot");
        let states = snapshot.track_states.clone();
        offload(&self.surface, move |s| snapshot::apply_snapshot(s, &states)).await
    }

    /// Capture the live mute/solo state as a new snapshot.
    pub async fn capture_snapshot(&self, name: &str) -> Result<Snapshot> {
        let tracks = self.tracks().await?;
        Ok(Snapshot::capture(name, &tracks))
    }

    /// Bounce the current mix straight to the output directory.
    ///
    /// Waits for the render slot, so it never overlaps a running export.
    pub async fn direct_render(&self, mut settings: ExportSettings) -> Result<PathBuf> {
        self.ensure_connected()?;
        self.resolve_output(&mut settings);
        settings.validate()?;

        let _slot = self.scheduler.acquire_render_slot().await?;
        let output_path = settings.direct_path(Utc::now().timestamp());
        let request = RenderRequest {
            output_path: output_path.clone(),
            source_name: settings.mix_source_name.clone(),
            source_type: settings.mix_source_type,
            format: settings.file_format,
            offline: !settings.online_export,
        };

        tracing::info!(path = %output_path.display(), "direct render started");
        let outcome = offload(&self.surface, move |s| s.render(&request)).await?;

        if outcome.cancelled {
            return Err(PtStemError::Render {
                reason: "render was cancelled".to_string(),
            });
        }
        if !outcome.success {
            return Err(PtStemError::Render {
                reason: outcome
                    .error
                    .unwrap_or_else(|| "render reported failure".to_string()),
            });
        }

        tracing::info!(path = %output_path.display(), "direct render finished");
        Ok(output_path)
    }

    /// Cancel unfinished tasks and wait for the worker to exit.
    ///
    /// A task in the middle of a bounce is drained like any other
    /// cancellation, so every task ends with a terminal state and result.
    pub async fn shutdown(&self) {
        let running = self.registry.cancel_unfinished();
        if !running.is_empty() {
            tracing::info!(tasks = running.len(), "cancelling running export for shutdown");
            let signalled = offload(&self.surface, |s| {
                s.cancel_render();
                Ok(())
            })
            .await;
            if let Err(e) = signalled {
                tracing::warn!(error = %e, "render cancellation was not delivered");
            }
        }
        self.scheduler.shutdown().await;
        tracing::info!("export service stopped");
    }
}
