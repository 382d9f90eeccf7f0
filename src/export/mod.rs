//! Snapshot export
//!
//! This module provides:
//! - `ExportSettings` and `ExportRequest`, the submission payload
//! - File-name sanitization and the temp/final path rules for bounces
//! - `CancelToken` and `Checkpoint` for cooperative cancellation
//! - `ExportPipeline`, which turns a task's snapshots into files on disk

pub mod cancel;
pub mod pipeline;

pub use cancel::{CancelToken, Checkpoint};
pub use pipeline::ExportPipeline;

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PtStemError, Result};
use crate::snapshot::Snapshot;
use crate::surface::{AudioFormat, MixSourceType};

/// How and where bounces are written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportSettings {
    #[serde(default)]
    pub file_format: AudioFormat,

    /// Output or bus the bounce reads from
    pub mix_source_name: String,

    pub mix_source_type: MixSourceType,

    /// Real-time bounce when true, offline otherwise
    #[serde(default)]
    pub online_export: bool,

    /// Prepended to every exported file name
    pub file_prefix: String,

    /// Empty means the configured output directory
    #[serde(default)]
    pub output_path: PathBuf,
}

impl ExportSettings {
    pub fn new(
        mix_source_name: impl Into<String>,
        mix_source_type: MixSourceType,
        file_prefix: impl Into<String>,
        output_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            file_format: AudioFormat::Wav,
            mix_source_name: mix_source_name.into(),
            mix_source_type,
            online_export: false,
            file_prefix: file_prefix.into(),
            output_path: output_path.into(),
        }
    }

    pub fn with_format(mut self, format: AudioFormat) -> Self {
        self.file_format = format;
        self
    }

    pub fn online(mut self, online: bool) -> Self {
        self.online_export = online;
        self
    }

    /// Check the invariants and make sure the output directory exists.
    pub fn validate(&self) -> Result<()> {
        if self.mix_source_name.trim().is_empty() {
            return Err(PtStemError::validation("mix source name is required"));
        }
        if self.file_prefix.trim().is_empty() {
            return Err(PtStemError::validation("file prefix is required"));
        }
        if self.output_path.as_os_str().is_empty() {
            return Err(PtStemError::validation("output path is required"));
        }
        ensure_output_dir(&self.output_path)
    }

    /// Final destination of a snapshot bounce.
    ///
    /// `index` is 1-based and only used when the sanitized name is empty.
    pub fn final_path(&self, snapshot_name: &str, index: usize) -> PathBuf {
        let mut stem = sanitize_file_name(&format!("{}{}", self.file_prefix, snapshot_name));
        if stem.is_empty() {
            stem = format!("snapshot_{}", index);
        }
        self.output_path
            .join(format!("{}.{}", stem, self.file_format.extension()))
    }

    /// Destination of a direct (snapshot-less) render.
    pub fn direct_path(&self, timestamp: i64) -> PathBuf {
        let stem = sanitize_file_name(&format!("{}direct_export_{}", self.file_prefix, timestamp));
        self.output_path
            .join(format!("{}.{}", stem, self.file_format.extension()))
    }
}

/// `path` itself, or `path` with `_2`, `_3`, ... appended to the stem when
/// an earlier snapshot of the same task already wrote there.
pub fn unclaimed_path(path: PathBuf, taken: &[PathBuf]) -> PathBuf {
    if !taken.contains(&path) {
        return path;
    }

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let extension = path.extension().map(|e| e.to_string_lossy().to_string());
    let mut n = 2;
    loop {
        let name = match &extension {
            Some(ext) => format!("{}_{}.{}", stem, n, ext),
            None => format!("{}_{}", stem, n),
        };
        let candidate = path.with_file_name(name);
        if !taken.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Where the DAW writes a bounce before it is moved to its final path.
pub fn temp_bounce_path(
    bounce_dir: &Path,
    snapshot_name: &str,
    timestamp: i64,
    format: AudioFormat,
) -> PathBuf {
    let stem = sanitize_file_name(&format!("temp_export_{}_{}", snapshot_name, timestamp));
    bounce_dir.join(format!("{}.{}", stem, format.extension()))
}

/// Keep alphanumerics, space, `-` and `_`; drop everything else and trim
/// trailing whitespace.
pub fn sanitize_file_name(name: &str) -> String {
    let kept: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect();
    kept.trim_end().to_string()
}

fn ensure_output_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|source| PtStemError::OutputDirectory {
        path: path.to_path_buf(),
        source,
    })
}

/// Timeline selection for every bounce of a task, in seconds
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RenderRange {
    pub start: Option<f64>,
    pub end: Option<f64>,
}

impl RenderRange {
    /// `None` when neither bound is given.
    pub fn from_bounds(start: Option<f64>, end: Option<f64>) -> Option<Self> {
        if start.is_none() && end.is_none() {
            None
        } else {
            Some(Self { start, end })
        }
    }
}

/// A batch export submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRequest {
    pub snapshots: Vec<Snapshot>,

    pub export_settings: ExportSettings,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<f64>,
}

impl ExportRequest {
    pub fn new(snapshots: Vec<Snapshot>, export_settings: ExportSettings) -> Self {
        Self {
            snapshots,
            export_settings,
            start_time: None,
            end_time: None,
        }
    }

    pub fn with_range(mut self, start: Option<f64>, end: Option<f64>) -> Self {
        self.start_time = start;
        self.end_time = end;
        self
    }

    pub fn render_range(&self) -> Option<RenderRange> {
        RenderRange::from_bounds(self.start_time, self.end_time)
    }

    /// Reject the request before it reaches the registry.
    pub fn validate(&self) -> Result<()> {
        if self.snapshots.is_empty() {
            return Err(PtStemError::validation("no snapshots to export"));
        }
        for bound in [self.start_time, self.end_time].into_iter().flatten() {
            if !bound.is_finite() || bound < 0.0 {
                return Err(PtStemError::validation(format!(
                    "render range bound {} is not a valid position",
                    bound
                )));
            }
        }
        if let (Some(start), Some(end)) = (self.start_time, self.end_time) {
            if end <= start {
                return Err(PtStemError::validation(format!(
                    "render range end ({}) must be after start ({})",
                    end, start
                )));
            }
        }
        self.export_settings.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::TrackState;
    use tempfile::tempdir;
    use test_case::test_case;

    fn settings(dir: &Path) -> ExportSettings {
        ExportSettings::new("Out 1-2", MixSourceType::Output, "Song_", dir)
    }

    #[test_case("Mix #1 / Final!", "Mix 1  Final" ; "punctuation dropped")]
    #[test_case("Verse_2 - Alt", "Verse_2 - Alt" ; "allowed characters kept")]
    #[test_case("Drums   ", "Drums" ; "trailing whitespace trimmed")]
    #[test_case("  Lead", "  Lead" ; "leading whitespace kept")]
    #[test_case("../../etc/passwd", "etcpasswd" ; "path separators removed")]
    #[test_case("?!*", "" ; "nothing left")]
    fn test_sanitize_file_name(input: &str, expected: &str) {
        assert_eq!(sanitize_file_name(input), expected);
    }

    #[test]
    fn test_final_path() {
        let temp = tempdir().unwrap();
        let settings = settings(temp.path()).with_format(AudioFormat::Aiff);
        assert_eq!(
            settings.final_path("Mix #1 / Final!", 1),
            temp.path().join("Song_Mix 1  Final.aiff")
        );
    }

    #[test]
    fn test_final_path_falls_back_when_name_empty() {
        let temp = tempdir().unwrap();
        let mut settings = settings(temp.path());
        settings.file_prefix = "#".to_string();
        assert_eq!(
            settings.final_path("!!", 3),
            temp.path().join("snapshot_3.wav")
        );
    }

    #[test]
    fn test_unclaimed_path_suffixes_collisions() {
        let out = PathBuf::from("/o");
        let first = out.join("Song_Mix 1.wav");
        assert_eq!(unclaimed_path(first.clone(), &[]), first);

        let taken = vec![first.clone(), out.join("Song_Mix 1_2.wav")];
        assert_eq!(
            unclaimed_path(first, &taken),
            out.join("Song_Mix 1_3.wav")
        );
    }

    #[test]
    fn test_temp_bounce_path() {
        let path = temp_bounce_path(Path::new("/s/Bounced Files"), "Mix/A", 1700000000, AudioFormat::Wav);
        assert_eq!(
            path,
            PathBuf::from("/s/Bounced Files/temp_export_MixA_1700000000.wav")
        );
    }

    #[test]
    fn test_direct_path() {
        let temp = tempdir().unwrap();
        let path = settings(temp.path()).direct_path(42);
        assert_eq!(path, temp.path().join("Song_direct_export_42.wav"));
    }

    #[test]
    fn test_validate_creates_output_dir() {
        let temp = tempdir().unwrap();
        let out = temp.path().join("stems").join("today");
        let request = ExportRequest::new(
            vec![Snapshot::new("A", vec![TrackState::new("Kick", false, false)])],
            settings(&out),
        );
        request.validate().unwrap();
        assert!(out.is_dir());
    }

    #[test]
    fn test_validate_rejects_bad_requests() {
        let temp = tempdir().unwrap();
        let snapshot = Snapshot::new("A", vec![]);

        let empty = ExportRequest::new(vec![], settings(temp.path()));
        assert_eq!(empty.validate().unwrap_err().error_code(), "VALIDATION_ERROR");

        let mut no_source = settings(temp.path());
        no_source.mix_source_name = "  ".to_string();
        assert!(ExportRequest::new(vec![snapshot.clone()], no_source)
            .validate()
            .is_err());

        let mut no_prefix = settings(temp.path());
        no_prefix.file_prefix = String::new();
        assert!(ExportRequest::new(vec![snapshot.clone()], no_prefix)
            .validate()
            .is_err());

        let backwards = ExportRequest::new(vec![snapshot], settings(temp.path()))
            .with_range(Some(30.0), Some(10.0));
        assert!(backwards.validate().is_err());
    }

    #[test]
    fn test_uncreatable_output_dir() {
        let temp = tempdir().unwrap();
        let file = temp.path().join("occupied");
        fs::write(&file, b"x").unwrap();

        let err = settings(&file.join("sub")).validate().unwrap_err();
        assert!(matches!(err, PtStemError::OutputDirectory { .. }));
    }

    #[test]
    fn test_request_wire_format() {
        let json = r#"{
            "snapshots": [{"id":"s1","name":"Full","trackStates":[],"createdAt":"2024-01-01T00:00:00Z"}],
            "export_settings": {
                "file_format": "aiff",
                "mix_source_name": "Main",
                "mix_source_type": "Bus",
                "online_export": true,
                "file_prefix": "Song_",
                "output_path": "/tmp/out"
            },
            "start_time": 12.5
        }"#;
        let request: ExportRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.export_settings.file_format, AudioFormat::Aiff);
        assert!(request.export_settings.online_export);
        assert_eq!(
            request.render_range(),
            Some(RenderRange {
                start: Some(12.5),
                end: None
            })
        );
    }
}
