//! Export pipeline
//!
//! Runs one task: for every snapshot, apply its track states, let the DAW
//! settle, bounce into the session's bounce folder and move the result to
//! the output directory. Failures stay local to their snapshot, a lost
//! connection included; only a fault outside the loop (setting the render
//! range) fails the whole task.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use walkdir::WalkDir;

use super::{temp_bounce_path, unclaimed_path, Checkpoint, RenderRange};
use crate::config::Config;
use crate::error::{PtStemError, Result};
use crate::snapshot::{apply_snapshot, Snapshot};
use crate::surface::{offload, RenderRequest, SharedSurface};
use crate::tasks::{ExportResult, TaskRegistry, TaskStatus, TaskWork};

/// How the snapshot loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopEnd {
    Finished,
    Cancelled,
}

/// Result of one snapshot that did not fail
#[derive(Debug)]
enum SnapshotEnd {
    Exported(PathBuf),
    Cancelled,
}

/// Files and failures collected so far
#[derive(Debug, Default)]
struct Tally {
    exported: Vec<PathBuf>,
    failed: Vec<String>,
}

/// Executes export tasks against a control surface
pub struct ExportPipeline {
    surface: SharedSurface,
    registry: Arc<TaskRegistry>,
    settle_delay: Duration,
    snapshot_pause: Duration,
}

impl ExportPipeline {
    pub fn new(surface: SharedSurface, registry: Arc<TaskRegistry>, config: &Config) -> Self {
        Self {
            surface,
            registry,
            settle_delay: config.settle_delay(),
            snapshot_pause: config.snapshot_pause(),
        }
    }

    /// Run a claimed task to a terminal state.
    pub async fn run(&self, work: TaskWork) {
        let started = Instant::now();
        let mut tally = Tally::default();
        tracing::info!(
            task_id = %work.task_id,
            snapshots = work.snapshots.len(),
            surface = self.surface.name(),
            "export task started"
        );

        let outcome = self.run_snapshots(&work, &mut tally).await;
        let duration = started.elapsed().as_secs_f64();

        let (status, result) = match outcome {
            Ok(LoopEnd::Cancelled) => (
                TaskStatus::Cancelled,
                ExportResult::cancelled(tally.exported, tally.failed, duration),
            ),
            Ok(LoopEnd::Finished) => {
                let success = tally.failed.is_empty();
                let error_message = (!success).then(|| {
                    format!("Failed snapshots: {}", tally.failed.join(", "))
                });
                let status = if success {
                    TaskStatus::Completed
                } else {
                    TaskStatus::CompletedWithErrors
                };
                (
                    status,
                    ExportResult {
                        success,
                        exported_files: tally.exported,
                        failed_snapshots: tally.failed,
                        total_duration_secs: duration,
                        error_message,
                    },
                )
            }
            Err(e) => {
                tracing::error!(task_id = %work.task_id, error = %e, "export task failed");
                (
                    TaskStatus::Failed,
                    ExportResult {
                        success: false,
                        exported_files: tally.exported,
                        failed_snapshots: tally.failed,
                        total_duration_secs: duration,
                        error_message: Some(e.to_string()),
                    },
                )
            }
        };

        self.registry.finish(&work.task_id, status, result);
    }

    async fn run_snapshots(&self, work: &TaskWork, tally: &mut Tally) -> Result<LoopEnd> {
        if let Some(range) = work.range {
            self.apply_range(&work.task_id, range).await?;
        }

        let total = work.snapshots.len();
        for (index, snapshot) in work.snapshots.iter().enumerate() {
            if work.cancel.observe(Checkpoint::BeforeSnapshot, &work.task_id) {
                return Ok(LoopEnd::Cancelled);
            }

            self.registry.start_snapshot(&work.task_id, index, &snapshot.name);
            tracing::info!(
                task_id = %work.task_id,
                snapshot = %snapshot.name,
                "processing snapshot {}/{}",
                index + 1,
                total
            );

            let outcome = self.export_snapshot(work, index, snapshot, &tally.exported).await;
            match outcome {
                Ok(SnapshotEnd::Exported(path)) => {
                    self.registry.record_export(&work.task_id, path.clone());
                    tally.exported.push(path);
                }
                Ok(SnapshotEnd::Cancelled) => return Ok(LoopEnd::Cancelled),
                Err(e) => {
                    tracing::warn!(
                        task_id = %work.task_id,
                        snapshot = %snapshot.name,
                        code = e.error_code(),
                        error = %e,
                        "snapshot export failed"
                    );
                    self.registry.record_failure(&work.task_id, &snapshot.name);
                    tally.failed.push(snapshot.name.clone());
                }
            }

            if index + 1 < total && !self.snapshot_pause.is_zero() {
                tokio::time::sleep(self.snapshot_pause).await;
            }
        }

        Ok(LoopEnd::Finished)
    }

    /// Set the timeline selection once for the whole task.
    async fn apply_range(&self, task_id: &str, range: RenderRange) -> Result<()> {
        let start = range.start.unwrap_or(0.0);
        let end = match range.end {
            Some(end) => end,
            None => offload(&self.surface, |s| s.get_session_length()).await?,
        };

        let accepted =
            offload(&self.surface, move |s| s.set_render_range(Some(start), Some(end))).await?;
        if accepted {
            tracing::info!(task_id, start, end, "render range set");
        } else {
            tracing::warn!(task_id, start, end, "render range rejected, bouncing full selection");
        }
        Ok(())
    }

    async fn export_snapshot(
        &self,
        work: &TaskWork,
        index: usize,
        snapshot: &Snapshot,
        exported: &[PathBuf],
    ) -> Result<SnapshotEnd> {
        let task_id = work.task_id.as_str();
        let settings = &work.settings;

        let states = snapshot.track_states.clone();
        let report = offload(&self.surface, move |s| apply_snapshot(s, &states)).await?;
        if !report.is_clean() {
            return Err(PtStemError::TrackMutation {
                track: snapshot.name.clone(),
                reason: report.errors.join("; "),
            });
        }

        if work.cancel.observe(Checkpoint::AfterApply, task_id) {
            return Ok(SnapshotEnd::Cancelled);
        }

        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }

        let session = offload(&self.surface, |s| s.get_session_info()).await?;
        let bounce_dir = session.bounce_dir();
        fs::create_dir_all(&bounce_dir)?;

        let temp_path = temp_bounce_path(
            &bounce_dir,
            &snapshot.name,
            Utc::now().timestamp(),
            settings.file_format,
        );
        let final_path = unclaimed_path(settings.final_path(&snapshot.name, index + 1), exported);
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent)?;
        }

        if work.cancel.observe(Checkpoint::BeforeRender, task_id) {
            return Ok(SnapshotEnd::Cancelled);
        }

        let request = RenderRequest {
            output_path: temp_path.clone(),
            source_name: settings.mix_source_name.clone(),
            source_type: settings.mix_source_type,
            format: settings.file_format,
            offline: !settings.online_export,
        };
        tracing::info!(task_id, snapshot = %snapshot.name, path = %temp_path.display(), "bouncing");
        let outcome = offload(&self.surface, move |s| s.render(&request)).await?;

        if outcome.cancelled || work.cancel.observe(Checkpoint::AfterRender, task_id) {
            discard(&temp_path);
            return Ok(SnapshotEnd::Cancelled);
        }

        if !outcome.success {
            return Err(PtStemError::Render {
                reason: outcome
                    .error
                    .unwrap_or_else(|| "render reported failure".to_string()),
            });
        }

        if !temp_path.exists() {
            tracing::error!(
                task_id,
                path = %temp_path.display(),
                bounce_dir_contents = ?list_dir(&bounce_dir),
                ?outcome,
                "render reported success but no file was written"
            );
            return Err(PtStemError::FileMissing { path: temp_path });
        }

        let size = fs::metadata(&temp_path).map(|m| m.len()).unwrap_or(0);
        relocate(&temp_path, &final_path)?;
        tracing::info!(
            task_id,
            snapshot = %snapshot.name,
            path = %final_path.display(),
            size,
            "snapshot exported"
        );
        Ok(SnapshotEnd::Exported(final_path))
    }
}

/// Move a file, falling back to copy and remove across filesystems.
pub(crate) fn relocate(from: &Path, to: &Path) -> Result<()> {
    let wrap = |source: io::Error| PtStemError::Relocate {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    };

    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    fs::copy(from, to).map_err(wrap)?;
    fs::remove_file(from).map_err(wrap)?;
    Ok(())
}

fn discard(path: &Path) {
    if !path.exists() {
        return;
    }
    match fs::remove_file(path) {
        Ok(()) => tracing::info!(path = %path.display(), "removed bounce of cancelled task"),
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "cannot remove bounce"),
    }
}

/// File names in the bounce folder, for diagnostics.
fn list_dir(dir: &Path) -> Vec<String> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_relocate_moves_file() {
        let temp = tempdir().unwrap();
        let from = temp.path().join("a.wav");
        let to = temp.path().join("out").join("b.wav");
        fs::create_dir_all(to.parent().unwrap()).unwrap();
        fs::write(&from, b"RIFF").unwrap();

        relocate(&from, &to).unwrap();
        assert!(!from.exists());
        assert_eq!(fs::read(&to).unwrap(), b"RIFF");
    }

    #[test]
    fn test_relocate_missing_source() {
        let temp = tempdir().unwrap();
        let err = relocate(&temp.path().join("none.wav"), &temp.path().join("x.wav")).unwrap_err();
        assert_eq!(err.error_code(), "RELOCATE_FAILED");
    }

    #[test]
    fn test_list_dir() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("one.wav"), b"").unwrap();
        fs::create_dir(temp.path().join("nested")).unwrap();
        fs::write(temp.path().join("nested").join("deep.wav"), b"").unwrap();

        let mut names = list_dir(temp.path());
        names.sort();
        assert_eq!(names, vec!["nested".to_string(), "one.wav".to_string()]);
        assert!(list_dir(&temp.path().join("absent")).is_empty());
    }
}
