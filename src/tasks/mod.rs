//! Export tasks
//!
//! Lifecycle of one batch export:
//!
//! ```text
//! pending -> running -> completed | completed_with_errors | cancelled | failed
//! pending -> cancelled
//! ```
//!
//! Terminal states are final. The registry hands out [`TaskView`] copies;
//! nothing outside this module holds a live reference to a task.

mod registry;

pub use registry::{TaskRegistry, TaskWork};

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::export::{CancelToken, ExportRequest, ExportSettings, RenderRange};
use crate::snapshot::Snapshot;

/// Message stored on tasks cancelled by the client
pub const CANCELLED_MESSAGE: &str = "Export cancelled by user";

/// Status of an export task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    CompletedWithErrors,
    Cancelled,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::CompletedWithErrors => "completed_with_errors",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final outcome of a task, attached once at the terminal transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportResult {
    pub success: bool,
    pub exported_files: Vec<PathBuf>,
    pub failed_snapshots: Vec<String>,
    pub total_duration_secs: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ExportResult {
    pub fn cancelled(
        exported_files: Vec<PathBuf>,
        failed_snapshots: Vec<String>,
        total_duration_secs: f64,
    ) -> Self {
        Self {
            success: false,
            exported_files,
            failed_snapshots,
            total_duration_secs,
            error_message: Some(CANCELLED_MESSAGE.to_string()),
        }
    }
}

/// Generate a task id: `export_<8 hex>_<unix seconds>`.
pub fn generate_task_id() -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!("export_{}_{}", &uuid[..8], Utc::now().timestamp())
}

/// One batch export, owned by the registry
#[derive(Debug)]
pub(crate) struct ExportTask {
    pub id: String,
    pub snapshots: Arc<Vec<Snapshot>>,
    pub settings: ExportSettings,
    pub range: Option<RenderRange>,
    pub status: TaskStatus,
    pub progress: f64,
    pub current_snapshot: usize,
    pub current_snapshot_name: Option<String>,
    pub exported_files: Vec<PathBuf>,
    pub failed_snapshots: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<ExportResult>,
    pub cancel: CancelToken,
    /// Set while the worker owns the task, including a cancelled task
    /// that is still draining.
    pub executing: bool,
    /// Submission order, breaks `created_at` ties when listing
    pub sequence: u64,
}

impl ExportTask {
    pub fn new(request: ExportRequest, sequence: u64) -> Self {
        let range = request.render_range();
        Self {
            id: generate_task_id(),
            snapshots: Arc::new(request.snapshots),
            settings: request.export_settings,
            range,
            status: TaskStatus::Pending,
            progress: 0.0,
            current_snapshot: 0,
            current_snapshot_name: None,
            exported_files: Vec::new(),
            failed_snapshots: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            cancel: CancelToken::new(),
            executing: false,
            sequence,
        }
    }

    pub fn view(&self) -> TaskView {
        TaskView {
            task_id: self.id.clone(),
            status: self.status,
            progress: self.progress,
            current_snapshot: self.current_snapshot,
            total_snapshots: self.snapshots.len(),
            current_snapshot_name: self.current_snapshot_name.clone(),
            exported_files: self.exported_files.clone(),
            failed_snapshots: self.failed_snapshots.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            result: self.result.clone(),
        }
    }
}

/// Point-in-time copy of a task for clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskView {
    pub task_id: String,
    pub status: TaskStatus,
    pub progress: f64,
    /// 1-based index of the snapshot being processed, 0 before the first
    pub current_snapshot: usize,
    pub total_snapshots: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_snapshot_name: Option<String>,
    pub exported_files: Vec<PathBuf>,
    pub failed_snapshots: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ExportResult>,
}

impl TaskView {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_id_format() {
        let id = generate_task_id();
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "export");
        assert_eq!(parts[1].len(), 8);
        assert!(parts[1].chars().all(|c| c.is_ascii_hexdigit()));
        assert!(parts[2].parse::<i64>().is_ok());
        assert_ne!(id, generate_task_id());
    }

    #[test]
    fn test_status_serde_and_terminal() {
        let json = serde_json::to_string(&TaskStatus::CompletedWithErrors).unwrap();
        assert_eq!(json, "\"completed_with_errors\"");
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
    }
}
