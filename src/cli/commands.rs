//! CLI Command Implementations
//!
//! Implements the actual logic for each CLI command.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::de::DeserializeOwned;

use super::Commands;
use crate::error::Result;
use crate::export::{ExportRequest, ExportSettings};
use crate::service::ExportService;
use crate::snapshot::Snapshot;
use crate::surface::TransportAction;
use crate::tasks::{TaskStatus, TaskView};

/// Dispatch a parsed command.
pub async fn run(service: &ExportService, command: Commands) -> Result<()> {
    match command {
        Commands::Session => show_session(service).await,
        Commands::Tracks => show_tracks(service).await,
        Commands::Transport { action } => transport(service, action.into()).await,
        Commands::Apply { path } => apply(service, &path).await,
        Commands::Capture { name, output } => capture(service, &name, output.as_deref()).await,
        Commands::Export { path, poll_ms } => {
            export(service, &path, Duration::from_millis(poll_ms.max(10))).await
        }
        Commands::Direct { path } => direct(service, &path).await,
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Print the open session.
pub async fn show_session(service: &ExportService) -> Result<()> {
    let info = service.session_info().await?;

    println!("Session: {}", info.session_name);
    println!("Path: {}", info.session_path);
    println!("Format: {} Hz / {} bit", info.sample_rate, info.bit_depth);
    println!(
        "Transport: {}",
        match (info.is_playing, info.is_recording) {
            (_, true) => "recording",
            (true, false) => "playing",
            _ => "stopped",
        }
    );

    Ok(())
}

/// Print the track list.
pub async fn show_tracks(service: &ExportService) -> Result<()> {
    let tracks = service.tracks().await?;

    if tracks.is_empty() {
        println!("No tracks in session.");
        return Ok(());
    }

    println!("{:<4} {:<32} {:<11} {:<5} {:<5}", "#", "Name", "Type", "Mute", "Solo");
    println!("{:-<60}", "");
    for (i, track) in tracks.iter().enumerate() {
        println!(
            "{:<4} {:<32} {:<11} {:<5} {:<5}",
            i + 1,
            track.name,
            format!("{:?}", track.track_type).to_lowercase(),
            if track.is_muted { "M" } else { "-" },
            if track.is_soloed { "S" } else { "-" },
        );
    }
    println!("{:-<60}", "");
    println!("{} tracks", tracks.len());

    Ok(())
}

pub async fn transport(service: &ExportService, action: TransportAction) -> Result<()> {
    if service.transport(action).await? {
        println!("Transport: {}", action.as_str());
    } else {
        println!("Transport command '{}' was rejected", action.as_str());
    }
    Ok(())
}

/// Apply a snapshot file to the live session.
pub async fn apply(service: &ExportService, path: &Path) -> Result<()> {
    let snapshot: Snapshot = read_json(path)?;
    let report = service.apply_snapshot(&snapshot).await?;

    println!("Snapshot: {}", snapshot.name);
    println!(
        "Changed: {} | Unchanged: {} | Skipped: {} | Errors: {}",
        report.success_count, report.unchanged_count, report.skipped_count, report.error_count
    );
    for error in &report.errors {
        println!("  {}", error);
    }

    Ok(())
}

/// Capture the current mute/solo state.
pub async fn capture(service: &ExportService, name: &str, output: Option<&Path>) -> Result<()> {
    let snapshot = service.capture_snapshot(name).await?;
    let json = serde_json::to_string_pretty(&snapshot)?;

    match output {
        Some(path) => {
            fs::write(path, json)?;
            let stats = snapshot.stats();
            println!(
                "Snapshot '{}' saved to {} ({} tracks, {} muted, {} soloed)",
                snapshot.name,
                path.display(),
                stats.total_tracks,
                stats.muted_tracks,
                stats.soloed_tracks
            );
        }
        None => println!("{}", json),
    }

    Ok(())
}

/// Submit an export and follow it until it finishes. Ctrl-C cancels.
pub async fn export(service: &ExportService, path: &Path, poll: Duration) -> Result<()> {
    let request: ExportRequest = read_json(path)?;
    let task_id = service.submit(request)?;
    println!("Task: {}", task_id);

    let mut last_line = String::new();
    let mut cancel_sent = false;
    let view = loop {
        let view = service.status(&task_id)?;
        if view.is_terminal() && view.result.is_some() {
            break view;
        }

        let line = progress_line(&view);
        if line != last_line {
            println!("{}", line);
            last_line = line;
        }

        tokio::select! {
            _ = tokio::time::sleep(poll) => {}
            signal = tokio::signal::ctrl_c(), if !cancel_sent => {
                if signal.is_ok() {
                    println!("Cancelling...");
                    cancel_sent = true;
                    if let Err(e) = service.cancel(&task_id).await {
                        tracing::warn!(error = %e, "cancel request failed");
                    }
                }
            }
        }
    };

    print_result(&view);
    Ok(())
}

fn progress_line(view: &TaskView) -> String {
    match &view.current_snapshot_name {
        Some(name) => format!(
            "[{:>5.1}%] {} {}/{}: {}",
            view.progress, view.status, view.current_snapshot, view.total_snapshots, name
        ),
        None => format!("[{:>5.1}%] {}", view.progress, view.status),
    }
}

fn print_result(view: &TaskView) {
    println!("{:-<60}", "");
    println!("Status: {}", view.status);

    let Some(result) = &view.result else {
        return;
    };
    println!("Duration: {:.1}s", result.total_duration_secs);
    println!("Exported files: {}", result.exported_files.len());
    for file in &result.exported_files {
        println!("  {}", file.display());
    }
    if !result.failed_snapshots.is_empty() {
        println!("Failed snapshots: {}", result.failed_snapshots.join(", "));
    }
    if view.status != TaskStatus::Completed {
        if let Some(message) = &result.error_message {
            println!("{}", message);
        }
    }
}

/// Bounce the current mix directly.
pub async fn direct(service: &ExportService, path: &Path) -> Result<()> {
    let settings: ExportSettings = read_json(path)?;
    let output = service.direct_render(settings).await?;
    println!("Exported: {}", output.display());
    Ok(())
}
