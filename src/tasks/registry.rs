//! Task registry
//!
//! Owns every export task for the lifetime of the process. Client-facing
//! calls (`get`, `list`, `request_cancel`, `delete`) and the worker-facing
//! calls (`claim`, `start_snapshot`, `record_*`, `finish`) are the only
//! ways a task changes.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;

use super::{ExportResult, ExportTask, TaskStatus, TaskView, CANCELLED_MESSAGE};
use crate::error::{PtStemError, Result};
use crate::export::{CancelToken, ExportRequest, ExportSettings, RenderRange};
use crate::snapshot::Snapshot;

type Entry = Arc<RwLock<ExportTask>>;

/// What the worker needs to run a task
#[derive(Debug, Clone)]
pub struct TaskWork {
    pub task_id: String,
    pub snapshots: Arc<Vec<Snapshot>>,
    pub settings: ExportSettings,
    pub range: Option<RenderRange>,
    pub cancel: CancelToken,
}

/// In-memory store of export tasks
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: RwLock<HashMap<String, Entry>>,
    sequence: AtomicU64,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a validated request as a `pending` task.
    pub fn create(&self, request: ExportRequest) -> String {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let task = ExportTask::new(request, sequence);
        let id = task.id.clone();

        tracing::info!(
            task_id = %id,
            snapshots = task.snapshots.len(),
            "export task created"
        );
        self.tasks
            .write()
            .insert(id.clone(), Arc::new(RwLock::new(task)));
        id
    }

    fn entry(&self, task_id: &str) -> Result<Entry> {
        self.tasks
            .read()
            .get(task_id)
            .cloned()
            .ok_or_else(|| PtStemError::TaskNotFound {
                task_id: task_id.to_string(),
            })
    }

    pub fn get(&self, task_id: &str) -> Result<TaskView> {
        Ok(self.entry(task_id)?.read().view())
    }

    /// All tasks, newest first.
    pub fn list(&self) -> Vec<TaskView> {
        let entries: Vec<Entry> = self.tasks.read().values().cloned().collect();
        let mut tasks: Vec<(u64, TaskView)> = entries
            .iter()
            .map(|entry| {
                let task = entry.read();
                (task.sequence, task.view())
            })
            .collect();
        tasks.sort_by(|(seq_a, a), (seq_b, b)| {
            b.created_at.cmp(&a.created_at).then(seq_b.cmp(seq_a))
        });
        tasks.into_iter().map(|(_, view)| view).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Request cancellation and return the status the task had before.
    ///
    /// A pending task is finalized on the spot. A running task is marked
    /// `cancelled` and its token is set; the worker drains it at the next
    /// checkpoint and attaches the result.
    pub fn request_cancel(&self, task_id: &str) -> Result<TaskStatus> {
        let entry = self.entry(task_id)?;
        let mut task = entry.write();
        let previous = task.status;

        match previous {
            TaskStatus::Pending => {
                task.cancel.cancel();
                task.status = TaskStatus::Cancelled;
                task.completed_at = Some(Utc::now());
                task.result = Some(ExportResult::cancelled(Vec::new(), Vec::new(), 0.0));
            }
            TaskStatus::Running => {
                task.cancel.cancel();
                task.status = TaskStatus::Cancelled;
            }
            status => {
                return Err(PtStemError::InvalidState {
                    task_id: task_id.to_string(),
                    status: status.to_string(),
                    reason: "only pending or running tasks can be cancelled".to_string(),
                });
            }
        }

        tracing::info!(task_id, from = %previous, "export task cancellation requested");
        Ok(previous)
    }

    /// Cancel every task that is not terminal yet. Returns the ids of the
    /// tasks that were running.
    pub fn cancel_unfinished(&self) -> Vec<String> {
        let ids: Vec<String> = self.tasks.read().keys().cloned().collect();
        ids.into_iter()
            .filter(|id| matches!(self.request_cancel(id), Ok(TaskStatus::Running)))
            .collect()
    }

    /// Remove a task record. Refused while the worker still owns it.
    pub fn delete(&self, task_id: &str) -> Result<()> {
        let mut tasks = self.tasks.write();
        let entry = tasks.get(task_id).ok_or_else(|| PtStemError::TaskNotFound {
            task_id: task_id.to_string(),
        })?;

        {
            let task = entry.read();
            if task.status == TaskStatus::Running || task.executing {
                return Err(PtStemError::InvalidState {
                    task_id: task_id.to_string(),
                    status: task.status.to_string(),
                    reason: "task is still executing".to_string(),
                });
            }
        }

        tasks.remove(task_id);
        tracing::info!(task_id, "export task deleted");
        Ok(())
    }

    /// Hand a dequeued task to the worker.
    ///
    /// Returns `None` for tasks that were deleted or reached a terminal
    /// state while queued.
    pub fn claim(&self, task_id: &str) -> Option<TaskWork> {
        let entry = self.entry(task_id).ok()?;
        let mut task = entry.write();
        if task.status.is_terminal() {
            return None;
        }

        task.executing = true;
        Some(TaskWork {
            task_id: task.id.clone(),
            snapshots: Arc::clone(&task.snapshots),
            settings: task.settings.clone(),
            range: task.range,
            cancel: task.cancel.clone(),
        })
    }

    /// Progress write for snapshot `index` (0-based). The first call moves
    /// the task to `running`.
    pub fn start_snapshot(&self, task_id: &str, index: usize, name: &str) {
        let Ok(entry) = self.entry(task_id) else {
            return;
        };
        let mut task = entry.write();
        if task.status.is_terminal() {
            return;
        }

        if task.status == TaskStatus::Pending {
            task.status = TaskStatus::Running;
            task.started_at = Some(Utc::now());
        }
        let total = task.snapshots.len().max(1);
        task.progress = index as f64 / total as f64 * 100.0;
        task.current_snapshot = index + 1;
        task.current_snapshot_name = Some(name.to_string());
    }

    pub fn record_export(&self, task_id: &str, path: PathBuf) {
        if let Ok(entry) = self.entry(task_id) {
            entry.write().exported_files.push(path);
        }
    }

    pub fn record_failure(&self, task_id: &str, snapshot_name: &str) {
        if let Ok(entry) = self.entry(task_id) {
            entry.write().failed_snapshots.push(snapshot_name.to_string());
        }
    }

    /// Terminal write. Releases the task from the worker; only the first
    /// result is kept, and a cancellation that arrived while running wins
    /// over the pipeline's own verdict.
    pub fn finish(&self, task_id: &str, status: TaskStatus, mut result: ExportResult) {
        let Ok(entry) = self.entry(task_id) else {
            return;
        };
        let mut task = entry.write();
        task.executing = false;

        if task.result.is_some() {
            return;
        }

        let status = if task.status == TaskStatus::Cancelled {
            result.success = false;
            result.error_message = Some(CANCELLED_MESSAGE.to_string());
            TaskStatus::Cancelled
        } else {
            status
        };

        if matches!(status, TaskStatus::Completed | TaskStatus::CompletedWithErrors) {
            task.progress = 100.0;
        }
        task.status = status;
        task.completed_at = Some(Utc::now());
        task.result = Some(result);

        tracing::info!(task_id, status = %status, "export task finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::MixSourceType;
    use pretty_assertions::assert_eq;

    fn request(names: &[&str]) -> ExportRequest {
        ExportRequest::new(
            names.iter().map(|n| Snapshot::new(*n, vec![])).collect(),
            ExportSettings::new("Out 1-2", MixSourceType::Output, "Song_", "/tmp/ptstem-out"),
        )
    }

    fn done(files: usize) -> ExportResult {
        ExportResult {
            success: true,
            exported_files: (0..files).map(|i| PathBuf::from(format!("/o/{}.wav", i))).collect(),
            failed_snapshots: vec![],
            total_duration_secs: 1.0,
            error_message: None,
        }
    }

    #[test]
    fn test_create_and_get() {
        let registry = TaskRegistry::new();
        let id = registry.create(request(&["A", "B"]));

        let view = registry.get(&id).unwrap();
        assert_eq!(view.status, TaskStatus::Pending);
        assert_eq!(view.total_snapshots, 2);
        assert_eq!(view.progress, 0.0);
        assert!(view.started_at.is_none());
    }

    #[test]
    fn test_unknown_task() {
        let registry = TaskRegistry::new();
        assert_eq!(registry.get("nope").unwrap_err().error_code(), "TASK_NOT_FOUND");
        assert!(registry.request_cancel("nope").is_err());
        assert!(registry.delete("nope").is_err());
    }

    #[test]
    fn test_list_newest_first() {
        let registry = TaskRegistry::new();
        let first = registry.create(request(&["A"]));
        let second = registry.create(request(&["B"]));

        let ids: Vec<String> = registry.list().into_iter().map(|v| v.task_id).collect();
        assert_eq!(ids, vec![second, first]);
    }

    #[test]
    fn test_first_progress_write_starts_task() {
        let registry = TaskRegistry::new();
        let id = registry.create(request(&["A", "B", "C", "D"]));
        registry.claim(&id).unwrap();

        registry.start_snapshot(&id, 1, "B");
        let view = registry.get(&id).unwrap();
        assert_eq!(view.status, TaskStatus::Running);
        assert!(view.started_at.is_some());
        assert_eq!(view.current_snapshot, 2);
        assert_eq!(view.current_snapshot_name.as_deref(), Some("B"));
        assert_eq!(view.progress, 25.0);
    }

    #[test]
    fn test_cancel_pending_finalizes() {
        let registry = TaskRegistry::new();
        let id = registry.create(request(&["A"]));

        assert_eq!(registry.request_cancel(&id).unwrap(), TaskStatus::Pending);
        let view = registry.get(&id).unwrap();
        assert_eq!(view.status, TaskStatus::Cancelled);
        assert!(view.completed_at.is_some());
        assert!(!view.result.unwrap().success);

        assert!(registry.claim(&id).is_none());
    }

    #[test]
    fn test_cancel_terminal_is_invalid() {
        let registry = TaskRegistry::new();
        let id = registry.create(request(&["A"]));
        registry.claim(&id).unwrap();
        registry.start_snapshot(&id, 0, "A");
        registry.finish(&id, TaskStatus::Completed, done(1));

        let err = registry.request_cancel(&id).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_STATE");
        assert_eq!(registry.get(&id).unwrap().status, TaskStatus::Completed);
    }

    #[test]
    fn test_running_cancel_wins_over_pipeline_result() {
        let registry = TaskRegistry::new();
        let id = registry.create(request(&["A"]));
        let work = registry.claim(&id).unwrap();
        registry.start_snapshot(&id, 0, "A");

        assert_eq!(registry.request_cancel(&id).unwrap(), TaskStatus::Running);
        assert!(work.cancel.is_cancelled());
        assert!(registry.delete(&id).is_err());

        registry.finish(&id, TaskStatus::Completed, done(1));
        let view = registry.get(&id).unwrap();
        assert_eq!(view.status, TaskStatus::Cancelled);
        let result = view.result.unwrap();
        assert!(!result.success);
        assert_eq!(result.exported_files.len(), 1);

        registry.delete(&id).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_terminal_writes_ignored() {
        let registry = TaskRegistry::new();
        let id = registry.create(request(&["A", "B"]));
        registry.claim(&id).unwrap();
        registry.start_snapshot(&id, 0, "A");
        registry.finish(&id, TaskStatus::Completed, done(2));
        let frozen = registry.get(&id).unwrap();

        registry.start_snapshot(&id, 1, "B");
        registry.finish(&id, TaskStatus::Failed, done(0));
        assert_eq!(registry.get(&id).unwrap(), frozen);
        assert_eq!(frozen.progress, 100.0);
    }

    #[test]
    fn test_cancel_unfinished() {
        let registry = TaskRegistry::new();
        let done_id = registry.create(request(&["A"]));
        let running = registry.create(request(&["B"]));
        let queued = registry.create(request(&["C"]));

        registry.claim(&done_id).unwrap();
        registry.start_snapshot(&done_id, 0, "A");
        registry.finish(&done_id, TaskStatus::Completed, done(1));
        let work = registry.claim(&running).unwrap();
        registry.start_snapshot(&running, 0, "B");

        assert_eq!(registry.cancel_unfinished(), vec![running.clone()]);
        assert!(work.cancel.is_cancelled());
        assert_eq!(registry.get(&done_id).unwrap().status, TaskStatus::Completed);
        assert_eq!(registry.get(&running).unwrap().status, TaskStatus::Cancelled);

        let queued_view = registry.get(&queued).unwrap();
        assert_eq!(queued_view.status, TaskStatus::Cancelled);
        assert!(queued_view.result.is_some());
    }

    #[test]
    fn test_claimed_pending_cancel_keeps_first_result() {
        let registry = TaskRegistry::new();
        let id = registry.create(request(&["A", "B"]));
        let work = registry.claim(&id).unwrap();

        assert_eq!(registry.request_cancel(&id).unwrap(), TaskStatus::Pending);
        let cancelled = registry.get(&id).unwrap();
        assert!(work.cancel.is_cancelled());
        assert!(registry.delete(&id).is_err());

        // Worker notices at its next checkpoint
        registry.start_snapshot(&id, 0, "A");
        registry.finish(&id, TaskStatus::Completed, done(1));
        assert_eq!(registry.get(&id).unwrap(), cancelled);

        registry.delete(&id).unwrap();
    }

    #[test]
    fn test_delete_refused_while_running() {
        let registry = TaskRegistry::new();
        let id = registry.create(request(&["A"]));
        registry.claim(&id).unwrap();
        registry.start_snapshot(&id, 0, "A");

        let err = registry.delete(&id).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_STATE");

        registry.finish(&id, TaskStatus::Completed, done(1));
        registry.delete(&id).unwrap();
        assert!(registry.get(&id).is_err());
    }
}
