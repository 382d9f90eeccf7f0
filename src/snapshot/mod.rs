//! Snapshots
//!
//! A snapshot is a named set of per-track mute/solo targets, captured once
//! and replayed as a unit. Field names follow the client wire format.

pub mod diff;

pub use diff::{apply_diff, apply_snapshot, ApplyReport, SnapshotDiff};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::surface::{TrackInfo, TrackType};

/// Target state of one track
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackState {
    #[serde(rename = "trackId")]
    pub track_id: String,

    /// Matched against the session's track names
    #[serde(rename = "trackName")]
    pub track_name: String,

    #[serde(rename = "is_muted")]
    pub muted: bool,

    #[serde(rename = "is_soloed")]
    pub soloed: bool,

    #[serde(rename = "type", default)]
    pub track_type: TrackType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl TrackState {
    pub fn new(name: impl Into<String>, muted: bool, soloed: bool) -> Self {
        let track_name = name.into();
        Self {
            track_id: track_name.clone(),
            track_name,
            muted,
            soloed,
            track_type: TrackType::Audio,
            color: None,
        }
    }
}

impl From<&TrackInfo> for TrackState {
    fn from(track: &TrackInfo) -> Self {
        Self {
            track_id: track.id.clone(),
            track_name: track.name.clone(),
            muted: track.is_muted,
            soloed: track.is_soloed,
            track_type: track.track_type,
            color: track.color.clone(),
        }
    }
}

/// Named, ordered set of track states
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,

    pub name: String,

    #[serde(rename = "trackStates")]
    pub track_states: Vec<TrackState>,

    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,

    #[serde(rename = "updatedAt", default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Snapshot {
    pub fn new(name: impl Into<String>, track_states: Vec<TrackState>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            track_states,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    /// Capture the live mute/solo state of every track.
    pub fn capture(name: impl Into<String>, tracks: &[TrackInfo]) -> Self {
        Self::new(name, tracks.iter().map(TrackState::from).collect())
    }

    pub fn stats(&self) -> SnapshotStats {
        SnapshotStats {
            total_tracks: self.track_states.len(),
            muted_tracks: self.track_states.iter().filter(|t| t.muted).count(),
            soloed_tracks: self.track_states.iter().filter(|t| t.soloed).count(),
        }
    }
}

/// Track counts for display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SnapshotStats {
    pub total_tracks: usize,
    pub muted_tracks: usize,
    pub soloed_tracks: usize,
}
