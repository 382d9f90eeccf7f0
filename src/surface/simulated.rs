//! Simulated control surface
//!
//! Stands in for a real DAW when no control bridge is available. Keeps an
//! in-memory session, honours mute/solo changes and writes a short silent
//! file for every bounce so the export pipeline can be exercised end to end.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use super::{
    AudioFormat, ControlSurface, RenderOutcome, RenderRequest, SessionInfo, TrackInfo, TrackType,
    TransportAction,
};
use crate::error::{PtStemError, Result};

/// Number of slices a simulated render is split into for cancel checks.
const RENDER_SLICES: u32 = 20;

/// Default simulated render time.
const DEFAULT_RENDER_TIME: Duration = Duration::from_millis(2000);

/// Default simulated session length in seconds.
const DEFAULT_SESSION_LENGTH: f64 = 180.0;

#[derive(Debug)]
struct SimulatedSession {
    info: SessionInfo,
    tracks: Vec<TrackInfo>,
    session_length: f64,
    render_range: Option<(Option<f64>, Option<f64>)>,
    failing_renders: Vec<String>,
    silent_renders: Vec<String>,
    rejected_tracks: Vec<String>,
    mutation_calls: usize,
}

/// In-memory DAW used when no real session is reachable
pub struct SimulatedSurface {
    session: Mutex<SimulatedSession>,
    connected: AtomicBool,
    cancel_requested: AtomicBool,
    render_calls: AtomicUsize,
    render_time: Duration,
}

impl SimulatedSurface {
    /// Demo session with three audio tracks, connected.
    pub fn new() -> Self {
        let session_path = std::env::temp_dir()
            .join("ptstem-sim")
            .join("Demo Session.ptx");
        Self::with_tracks(
            session_path,
            vec![
                TrackInfo::new("track_1", "Kick", TrackType::Audio),
                TrackInfo::new("track_2", "Snare", TrackType::Audio),
                TrackInfo::new("track_3", "Bass", TrackType::Audio),
            ],
        )
    }

    pub fn with_tracks(session_path: impl AsRef<Path>, tracks: Vec<TrackInfo>) -> Self {
        let session_path = session_path.as_ref();
        let session_name = session_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "Demo Session".to_string());

        Self {
            session: Mutex::new(SimulatedSession {
                info: SessionInfo {
                    session_name,
                    session_path: session_path.to_string_lossy().to_string(),
                    sample_rate: 48000,
                    bit_depth: 24,
                    is_playing: false,
                    is_recording: false,
                },
                tracks,
                session_length: DEFAULT_SESSION_LENGTH,
                render_range: None,
                failing_renders: Vec::new(),
                silent_renders: Vec::new(),
                rejected_tracks: Vec::new(),
                mutation_calls: 0,
            }),
            connected: AtomicBool::new(true),
            cancel_requested: AtomicBool::new(false),
            render_calls: AtomicUsize::new(0),
            render_time: DEFAULT_RENDER_TIME,
        }
    }

    pub fn with_render_time(mut self, render_time: Duration) -> Self {
        self.render_time = render_time;
        self
    }

    pub fn with_session_length(self, seconds: f64) -> Self {
        self.session.lock().session_length = seconds;
        self
    }

    /// Renders whose output file name contains `pattern` raise a render error.
    pub fn fail_renders_matching(self, pattern: impl Into<String>) -> Self {
        self.session.lock().failing_renders.push(pattern.into());
        self
    }

    /// Renders whose output file name contains `pattern` report success
    /// without writing a file.
    pub fn omit_files_matching(self, pattern: impl Into<String>) -> Self {
        self.session.lock().silent_renders.push(pattern.into());
        self
    }

    /// Mute/solo calls naming this track return `false`.
    pub fn reject_mutations_for(self, track: impl Into<String>) -> Self {
        self.session.lock().rejected_tracks.push(track.into());
        self
    }

    pub fn tracks(&self) -> Vec<TrackInfo> {
        self.session.lock().tracks.clone()
    }

    pub fn render_range(&self) -> Option<(Option<f64>, Option<f64>)> {
        self.session.lock().render_range
    }

    pub fn render_count(&self) -> usize {
        self.render_calls.load(Ordering::SeqCst)
    }

    /// Number of mute/solo calls received so far
    pub fn mutation_count(&self) -> usize {
        self.session.lock().mutation_calls
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PtStemError::connection("simulated session is detached"))
        }
    }

    fn set_flag(&self, names: &[String], enabled: bool, solo: bool) -> Result<bool> {
        self.ensure_connected()?;
        let mut session = self.session.lock();
        session.mutation_calls += 1;

        if names.iter().any(|n| session.rejected_tracks.contains(n)) {
            return Ok(false);
        }

        for track in session.tracks.iter_mut() {
            if names.contains(&track.name) {
                if solo {
                    track.is_soloed = enabled;
                } else {
                    track.is_muted = enabled;
                }
            }
        }
        Ok(true)
    }

    fn file_name_matches(path: &Path, patterns: &[String]) -> bool {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        patterns.iter().any(|p| name.contains(p.as_str()))
    }

    fn write_placeholder(path: &Path, format: AudioFormat, sample_rate: u32) -> Result<u64> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        match format {
            AudioFormat::Wav => {
                let spec = hound::WavSpec {
                    channels: 2,
                    sample_rate,
                    bits_per_sample: 16,
                    sample_format: hound::SampleFormat::Int,
                };
                let mut writer = hound::WavWriter::create(path, spec)
                    .map_err(|e| PtStemError::Render {
                        reason: format!("cannot write {}: {}", path.display(), e),
                    })?;
                // 100 ms of silence
                for _ in 0..(sample_rate / 10) * 2 {
                    writer.write_sample(0i16).map_err(|e| PtStemError::Render {
                        reason: e.to_string(),
                    })?;
                }
                writer.finalize().map_err(|e| PtStemError::Render {
                    reason: e.to_string(),
                })?;
            }
            AudioFormat::Aiff => {
                fs::write(path, b"FORM\0\0\0\x04AIFF")?;
            }
        }

        Ok(fs::metadata(path)?.len())
    }
}

impl Default for SimulatedSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlSurface for SimulatedSurface {
    fn name(&self) -> &str {
        "simulated"
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        tracing::info!("simulated control surface attached");
        Ok(())
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        tracing::info!("simulated control surface detached");
    }

    fn get_session_info(&self) -> Result<SessionInfo> {
        self.ensure_connected()?;
        Ok(self.session.lock().info.clone())
    }

    fn get_track_list(&self) -> Result<Vec<TrackInfo>> {
        self.ensure_connected()?;
        Ok(self.session.lock().tracks.clone())
    }

    fn set_track_mute(&self, names: &[String], enabled: bool) -> Result<bool> {
        tracing::debug!(?names, enabled, "simulated mute");
        self.set_flag(names, enabled, false)
    }

    fn set_track_solo(&self, names: &[String], enabled: bool) -> Result<bool> {
        tracing::debug!(?names, enabled, "simulated solo");
        self.set_flag(names, enabled, true)
    }

    fn set_render_range(&self, start: Option<f64>, end: Option<f64>) -> Result<bool> {
        self.ensure_connected()?;
        self.session.lock().render_range = Some((start, end));
        Ok(true)
    }

    fn get_session_length(&self) -> Result<f64> {
        self.ensure_connected()?;
        Ok(self.session.lock().session_length)
    }

    fn render(&self, request: &RenderRequest) -> Result<RenderOutcome> {
        self.ensure_connected()?;
        self.render_calls.fetch_add(1, Ordering::SeqCst);
        self.cancel_requested.store(false, Ordering::SeqCst);

        let slice = self.render_time / RENDER_SLICES;
        for _ in 0..RENDER_SLICES {
            if self.cancel_requested.load(Ordering::SeqCst) {
                tracing::info!(path = %request.output_path.display(), "simulated render cancelled");
                return Ok(RenderOutcome::cancelled());
            }
            if !slice.is_zero() {
                std::thread::sleep(slice);
            }
        }

        let (failing, silent, sample_rate) = {
            let session = self.session.lock();
            (
                Self::file_name_matches(&request.output_path, &session.failing_renders),
                Self::file_name_matches(&request.output_path, &session.silent_renders),
                session.info.sample_rate,
            )
        };

        if failing {
            return Err(PtStemError::Render {
                reason: format!(
                    "simulated failure bouncing {} from {} ({})",
                    request.output_path.display(),
                    request.source_name,
                    request.source_type
                ),
            });
        }

        if silent {
            return Ok(RenderOutcome::completed(None));
        }

        let size = Self::write_placeholder(&request.output_path, request.format, sample_rate)?;
        tracing::info!(
            path = %request.output_path.display(),
            source = %request.source_name,
            offline = request.offline,
            size,
            "simulated bounce written"
        );
        Ok(RenderOutcome::completed(Some(size)))
    }

    fn cancel_render(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    fn transport(&self, action: TransportAction) -> Result<bool> {
        self.ensure_connected()?;
        let mut session = self.session.lock();
        match action {
            TransportAction::Play => {
                session.info.is_playing = true;
                session.info.is_recording = false;
            }
            TransportAction::Record => {
                session.info.is_playing = true;
                session.info.is_recording = true;
            }
            TransportAction::Stop => {
                session.info.is_playing = false;
                session.info.is_recording = false;
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::MixSourceType;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn request(path: PathBuf, format: AudioFormat) -> RenderRequest {
        RenderRequest {
            output_path: path,
            source_name: "Ref Print".to_string(),
            source_type: MixSourceType::Bus,
            format,
            offline: true,
        }
    }

    #[test]
    fn test_mute_and_solo_update_tracks() {
        let surface = SimulatedSurface::new();
        assert!(surface.set_track_mute(&["Kick".to_string()], true).unwrap());
        assert!(surface.set_track_solo(&["Bass".to_string()], true).unwrap());

        let tracks = surface.tracks();
        assert!(tracks.iter().find(|t| t.name == "Kick").unwrap().is_muted);
        assert!(tracks.iter().find(|t| t.name == "Bass").unwrap().is_soloed);
        assert_eq!(surface.mutation_count(), 2);
    }

    #[test]
    fn test_detached_surface_fails_with_connection_error() {
        let surface = SimulatedSurface::new();
        surface.disconnect();
        let err = surface.get_track_list().unwrap_err();
        assert!(err.is_connection());
        surface.connect().unwrap();
        assert!(surface.get_track_list().is_ok());
    }

    #[test]
    fn test_render_writes_wav() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("bounce.wav");
        let surface = SimulatedSurface::new().with_render_time(Duration::ZERO);

        let outcome = surface.render(&request(path.clone(), AudioFormat::Wav)).unwrap();
        assert!(outcome.success);
        assert!(path.exists());

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(surface.render_count(), 1);
    }

    #[test]
    fn test_render_failure_and_omitted_file() {
        let temp = tempdir().unwrap();
        let surface = SimulatedSurface::new()
            .with_render_time(Duration::ZERO)
            .fail_renders_matching("broken")
            .omit_files_matching("ghost");

        let err = surface
            .render(&request(temp.path().join("broken.wav"), AudioFormat::Wav))
            .unwrap_err();
        assert_eq!(err.error_code(), "RENDER_FAILED");

        let ghost = temp.path().join("ghost.aiff");
        let outcome = surface.render(&request(ghost.clone(), AudioFormat::Aiff)).unwrap();
        assert!(outcome.success);
        assert!(!ghost.exists());
    }

    #[test]
    fn test_transport_updates_session() {
        let surface = SimulatedSurface::new();
        surface.transport(TransportAction::Record).unwrap();
        let info = surface.get_session_info().unwrap();
        assert!(info.is_playing && info.is_recording);
        surface.transport(TransportAction::Stop).unwrap();
        assert!(!surface.get_session_info().unwrap().is_playing);
    }
}
