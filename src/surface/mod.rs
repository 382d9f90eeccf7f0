//! Control-surface adapter interfaces
//!
//! This module provides:
//! - `ControlSurface` trait, the blocking client every DAW backend implements
//! - Session, track and render types shared by all backends
//! - `SimulatedSurface` for offline use and tests
//! - `BridgeSurface` talking to the DAW's control bridge over HTTP
//! - `offload` for running blocking calls off the async executor

mod bridge;
mod simulated;

pub use bridge::BridgeSurface;
pub use simulated::SimulatedSurface;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::{Config, SurfaceKind};
use crate::error::{PtStemError, Result};

/// Name of the folder next to the session file where the DAW writes bounces.
pub const BOUNCED_FILES_DIR: &str = "Bounced Files";

/// Output file format for a bounce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    #[default]
    Wav,
    Aiff,
}

impl AudioFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Wav => "wav",
            Self::Aiff => "aiff",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "wav" | "wave" => Some(Self::Wav),
            "aiff" | "aif" => Some(Self::Aiff),
            _ => None,
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Kind of output point a bounce reads from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MixSourceType {
    #[serde(rename = "PhysicalOut")]
    PhysicalOut,
    #[serde(rename = "Bus")]
    Bus,
    #[serde(rename = "Output")]
    Output,
}

impl MixSourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PhysicalOut => "PhysicalOut",
            Self::Bus => "Bus",
            Self::Output => "Output",
        }
    }
}

impl fmt::Display for MixSourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Track kinds reported by the DAW
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackType {
    #[default]
    Audio,
    Midi,
    Aux,
    Master,
    Instrument,
}

/// Transport commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportAction {
    Play,
    Stop,
    Record,
}

impl TransportAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Play => "play",
            Self::Stop => "stop",
            Self::Record => "record",
        }
    }
}

/// Currently open session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_name: String,
    pub session_path: String,
    pub sample_rate: u32,
    pub bit_depth: u16,
    pub is_playing: bool,
    pub is_recording: bool,
}

impl SessionInfo {
    /// Directory the DAW bounces into: `<session dir>/Bounced Files`.
    ///
    /// Falls back to the system temp directory when the session has no path.
    pub fn bounce_dir(&self) -> PathBuf {
        let parent = Path::new(&self.session_path)
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(std::env::temp_dir);
        parent.join(BOUNCED_FILES_DIR)
    }
}

/// One track as reported by the DAW
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub track_type: TrackType,
    pub is_muted: bool,
    pub is_soloed: bool,
    #[serde(default)]
    pub is_record_enabled: bool,
    #[serde(default)]
    pub volume: f64,
    #[serde(default)]
    pub pan: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
}

impl TrackInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>, track_type: TrackType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            track_type,
            is_muted: false,
            is_soloed: false,
            is_record_enabled: false,
            volume: 0.0,
            pan: 0.0,
            color: None,
            comments: None,
        }
    }

    pub fn muted(mut self, muted: bool) -> Self {
        self.is_muted = muted;
        self
    }

    pub fn soloed(mut self, soloed: bool) -> Self {
        self.is_soloed = soloed;
        self
    }
}

/// Parameters for a single bounce
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderRequest {
    pub output_path: PathBuf,
    pub source_name: String,
    pub source_type: MixSourceType,
    pub format: AudioFormat,
    /// Offline (faster than real time) bounce
    pub offline: bool,
}

/// What the DAW reported back for a bounce
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RenderOutcome {
    pub success: bool,
    #[serde(default)]
    pub cancelled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
}

impl RenderOutcome {
    pub fn completed(file_size: Option<u64>) -> Self {
        Self {
            success: true,
            cancelled: false,
            error: None,
            file_size,
        }
    }

    pub fn cancelled() -> Self {
        Self {
            success: false,
            cancelled: true,
            error: None,
            file_size: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            cancelled: false,
            error: Some(reason.into()),
            file_size: None,
        }
    }
}

/// Blocking client to the DAW's control protocol.
///
/// Every method may block for seconds (network or IPC round trip); async
/// callers go through [`offload`]. All calls fail with
/// [`PtStemError::Connection`] when no session is attached.
pub trait ControlSurface: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    fn is_connected(&self) -> bool;

    /// Attach to the DAW. Returns an error when the DAW is unreachable.
    fn connect(&self) -> Result<()>;

    fn disconnect(&self);

    fn get_session_info(&self) -> Result<SessionInfo>;

    fn get_track_list(&self) -> Result<Vec<TrackInfo>>;

    /// Mute (`enabled = true`) or unmute the named tracks.
    fn set_track_mute(&self, names: &[String], enabled: bool) -> Result<bool>;

    /// Solo (`enabled = true`) or unsolo the named tracks.
    fn set_track_solo(&self, names: &[String], enabled: bool) -> Result<bool>;

    /// Set the timeline selection used by the next bounce, in seconds.
    fn set_render_range(&self, start: Option<f64>, end: Option<f64>) -> Result<bool>;

    /// Session length in seconds
    fn get_session_length(&self) -> Result<f64>;

    /// Bounce the mix source to `request.output_path`. Not interruptible
    /// once issued, except through [`ControlSurface::cancel_render`].
    fn render(&self, request: &RenderRequest) -> Result<RenderOutcome>;

    /// Best-effort abort of an in-flight render.
    fn cancel_render(&self);

    fn transport(&self, action: TransportAction) -> Result<bool>;
}

/// Shared handle to the active control surface
pub type SharedSurface = Arc<dyn ControlSurface>;

/// Build the surface selected by configuration.
pub fn surface_from_config(config: &Config) -> SharedSurface {
    match config.surface {
        SurfaceKind::Simulated => Arc::new(SimulatedSurface::new()),
        SurfaceKind::Bridge => Arc::new(BridgeSurface::new(
            config.bridge_url.clone(),
            config.timeout_ms,
        )),
    }
}

/// Run a blocking control-surface call on the blocking thread pool.
pub async fn offload<T, F>(surface: &SharedSurface, call: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn ControlSurface) -> Result<T> + Send + 'static,
{
    let surface = Arc::clone(surface);
    tokio::task::spawn_blocking(move || call(surface.as_ref()))
        .await
        .map_err(|e| PtStemError::Internal(format!("control surface call did not complete: {e}")))?
}
