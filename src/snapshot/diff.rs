//! Snapshot diff engine
//!
//! Computes the smallest set of mute/solo changes that moves the session
//! from its live state to a snapshot, and applies them one track per call
//! so a single rejected track does not stop the rest.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use super::TrackState;
use crate::error::Result;
use crate::surface::{ControlSurface, TrackInfo};

/// Mutations needed to reach a snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SnapshotDiff {
    pub to_mute: Vec<String>,
    pub to_unmute: Vec<String>,
    pub to_solo: Vec<String>,
    pub to_unsolo: Vec<String>,
    /// Tracks already at their target on both axes
    pub unchanged: Vec<String>,
    /// Snapshot tracks that do not exist in the session
    pub skipped: Vec<String>,
}

impl SnapshotDiff {
    /// Compare live tracks against snapshot targets.
    ///
    /// Mute and solo are compared independently. Names missing from the
    /// session are recorded in `skipped` and otherwise ignored; a name listed
    /// twice in the snapshot only counts once (first entry wins).
    pub fn compute(current: &[TrackInfo], targets: &[TrackState]) -> Self {
        let live: HashMap<&str, &TrackInfo> =
            current.iter().map(|t| (t.name.as_str(), t)).collect();
        let mut seen = HashSet::new();
        let mut diff = Self::default();

        for target in targets {
            let name = target.track_name.as_str();
            if !seen.insert(name) {
                continue;
            }

            let Some(track) = live.get(name) else {
                tracing::warn!(track = name, "track not found in session, skipping");
                diff.skipped.push(name.to_string());
                continue;
            };

            let mute_changes = target.muted != track.is_muted;
            let solo_changes = target.soloed != track.is_soloed;

            if mute_changes {
                if target.muted {
                    diff.to_mute.push(name.to_string());
                } else {
                    diff.to_unmute.push(name.to_string());
                }
            }

            if solo_changes {
                if target.soloed {
                    diff.to_solo.push(name.to_string());
                } else {
                    diff.to_unsolo.push(name.to_string());
                }
            }

            if !mute_changes && !solo_changes {
                diff.unchanged.push(name.to_string());
            }
        }

        tracing::debug!(
            mute = diff.to_mute.len() + diff.to_unmute.len(),
            solo = diff.to_solo.len() + diff.to_unsolo.len(),
            unchanged = diff.unchanged.len(),
            skipped = diff.skipped.len(),
            "snapshot diff computed"
        );
        diff
    }

    /// Number of control-surface calls needed to apply this diff
    pub fn mutation_count(&self) -> usize {
        self.to_mute.len() + self.to_unmute.len() + self.to_solo.len() + self.to_unsolo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutation_count() == 0
    }
}

/// Outcome of applying a snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    pub total_tracks: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub unchanged_count: usize,
    pub skipped_count: usize,
    pub errors: Vec<String>,
}

impl ApplyReport {
    pub fn is_clean(&self) -> bool {
        self.error_count == 0
    }

    fn record_error(&mut self, message: String) {
        tracing::warn!("{}", message);
        self.errors.push(message);
        self.error_count += 1;
    }
}

#[derive(Clone, Copy)]
enum Axis {
    Mute,
    Solo,
}

/// Read live state, diff it against `targets` and apply the result.
pub fn apply_snapshot(surface: &dyn ControlSurface, targets: &[TrackState]) -> Result<ApplyReport> {
    let current = surface.get_track_list()?;
    let diff = SnapshotDiff::compute(&current, targets);
    apply_diff(surface, &diff, targets.len())
}

/// Apply a diff one track per call.
///
/// Rejections and ordinary errors are counted in the report; a lost
/// connection stops immediately and is returned.
pub fn apply_diff(
    surface: &dyn ControlSurface,
    diff: &SnapshotDiff,
    total_tracks: usize,
) -> Result<ApplyReport> {
    let mut report = ApplyReport {
        total_tracks,
        unchanged_count: diff.unchanged.len(),
        skipped_count: diff.skipped.len(),
        ..ApplyReport::default()
    };

    let passes = [
        (&diff.to_mute, Axis::Mute, true, "mute"),
        (&diff.to_unmute, Axis::Mute, false, "unmute"),
        (&diff.to_solo, Axis::Solo, true, "solo"),
        (&diff.to_unsolo, Axis::Solo, false, "unsolo"),
    ];

    for (names, axis, enabled, verb) in passes {
        for name in names {
            let single = [name.clone()];
            let outcome = match axis {
                Axis::Mute => surface.set_track_mute(&single, enabled),
                Axis::Solo => surface.set_track_solo(&single, enabled),
            };

            match outcome {
                Ok(true) => report.success_count += 1,
                Ok(false) => {
                    report.record_error(format!("Track '{}' {} was rejected", name, verb))
                }
                Err(e) if e.is_connection() => return Err(e),
                Err(e) => report.record_error(format!("Track '{}' {} failed: {}", name, verb, e)),
            }
        }
    }

    if report.is_clean() {
        tracing::info!(
            changed = report.success_count,
            unchanged = report.unchanged_count,
            skipped = report.skipped_count,
            "snapshot applied"
        );
    } else {
        tracing::warn!(
            changed = report.success_count,
            failed = report.error_count,
            skipped = report.skipped_count,
            "snapshot applied with errors"
        );
    }

    Ok(report)
}
