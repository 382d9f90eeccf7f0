//! Control bridge client
//!
//! Real control surface that talks to the DAW through a small HTTP/JSON
//! bridge process sitting next to the DAW's scripting interface. Every
//! endpoint answers with `{ "success": bool, "data": ..., "error": ... }`;
//! a `503` means the bridge is up but no session is open.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{ControlSurface, RenderOutcome, RenderRequest, SessionInfo, TrackInfo, TransportAction};
use crate::error::{PtStemError, Result};

/// Response envelope used by every bridge endpoint
#[derive(Debug, Deserialize)]
struct BridgeEnvelope<T> {
    success: bool,
    data: Option<T>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct TrackFlagRequest<'a> {
    track_names: &'a [String],
    enabled: bool,
}

#[derive(Debug, Serialize)]
struct RangeRequest {
    start_time: Option<f64>,
    end_time: Option<f64>,
}

#[derive(Debug, Serialize)]
struct RenderBody<'a> {
    output_path: String,
    base_name: String,
    source_name: &'a str,
    source_type: &'a str,
    file_format: &'a str,
    offline_bounce: bool,
}

#[derive(Debug, Deserialize)]
struct LengthResponse {
    seconds: f64,
}

/// HTTP client to the DAW control bridge
///
/// `timeout_ms` bounds connecting and every ordinary call. Bounces are not
/// time-limited: an online bounce takes as long as the song.
pub struct BridgeSurface {
    base_url: String,
    timeout: Duration,
    #[cfg(feature = "bridge")]
    client: Option<reqwest::blocking::Client>,
    connected: AtomicBool,
}

impl BridgeSurface {
    pub fn new(base_url: impl Into<String>, timeout_ms: u64) -> Self {
        let timeout = Duration::from_millis(timeout_ms);

        #[cfg(feature = "bridge")]
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(timeout)
            .timeout(None)
            .build()
            .map_err(|e| tracing::error!(error = %e, "cannot build bridge HTTP client"))
            .ok();

        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
            #[cfg(feature = "bridge")]
            client,
            connected: AtomicBool::new(false),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PtStemError::connection(format!(
                "bridge at {} is not attached",
                self.base_url
            )))
        }
    }

    fn unwrap_envelope<T>(&self, path: &str, envelope: BridgeEnvelope<T>) -> Result<Option<T>> {
        if envelope.success {
            Ok(envelope.data)
        } else {
            Err(PtStemError::Bridge {
                message: format!(
                    "{} failed: {}",
                    path,
                    envelope.error.unwrap_or_else(|| "unknown bridge error".to_string())
                ),
            })
        }
    }

    fn require<T>(path: &str, data: Option<T>) -> Result<T> {
        data.ok_or_else(|| PtStemError::Bridge {
            message: format!("{} returned no data", path),
        })
    }

    /// Send a request to the bridge. `limit` caps the whole exchange;
    /// `None` waits for as long as the bridge takes.
    #[cfg(feature = "bridge")]
    fn send<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: Option<&B>,
        limit: Option<Duration>,
    ) -> Result<Option<T>> {
        let client = self.client.as_ref().ok_or_else(|| PtStemError::Bridge {
            message: "bridge HTTP client is unavailable".to_string(),
        })?;

        let url = self.endpoint(path);
        let mut request = match body {
            Some(body) => client.post(&url).json(body),
            None => client.get(&url),
        };
        if let Some(limit) = limit {
            request = request.timeout(limit);
        }

        let response = request.send().map_err(|e| {
            if e.is_connect() {
                self.connected.store(false, Ordering::SeqCst);
                PtStemError::connection(format!("cannot reach bridge at {}: {}", self.base_url, e))
            } else if e.is_timeout() {
                PtStemError::Bridge {
                    message: format!("{} timed out: {}", path, e),
                }
            } else {
                PtStemError::Bridge {
                    message: e.to_string(),
                }
            }
        })?;

        if response.status() == reqwest::StatusCode::SERVICE_UNAVAILABLE {
            return Err(PtStemError::connection("bridge reports no open session"));
        }
        if !response.status().is_success() {
            return Err(PtStemError::Bridge {
                message: format!("{} returned {}", path, response.status()),
            });
        }

        let envelope = response
            .json::<BridgeEnvelope<T>>()
            .map_err(|e| PtStemError::Bridge {
                message: format!("Invalid response from bridge: {}", e),
            })?;
        self.unwrap_envelope(path, envelope)
    }

    #[cfg(not(feature = "bridge"))]
    fn send<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        _body: Option<&B>,
        _limit: Option<Duration>,
    ) -> Result<Option<T>> {
        Err(PtStemError::connection(format!(
            "cannot reach {}: bridge support not compiled. Build with --features bridge",
            self.endpoint(path)
        )))
    }

    fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.ensure_connected()?;
        let data = self.send::<(), T>(path, None, Some(self.timeout))?;
        Self::require(path, data)
    }

    fn post_flag<B: Serialize>(&self, path: &str, body: &B) -> Result<bool> {
        self.ensure_connected()?;
        match self.send::<B, serde_json::Value>(path, Some(body), Some(self.timeout)) {
            Ok(_) => Ok(true),
            Err(PtStemError::Bridge { message }) => {
                tracing::warn!(%message, "bridge command rejected");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

impl ControlSurface for BridgeSurface {
    fn name(&self) -> &str {
        "bridge"
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn connect(&self) -> Result<()> {
        tracing::info!(url = %self.base_url, "connecting to control bridge");
        self.send::<(), serde_json::Value>("health", None, Some(self.timeout))?;
        self.connected.store(true, Ordering::SeqCst);
        tracing::info!(url = %self.base_url, "control bridge attached");
        Ok(())
    }

    fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            tracing::info!(url = %self.base_url, "control bridge detached");
        }
    }

    fn get_session_info(&self) -> Result<SessionInfo> {
        self.get("session/info")
    }

    fn get_track_list(&self) -> Result<Vec<TrackInfo>> {
        self.get("tracks")
    }

    fn set_track_mute(&self, names: &[String], enabled: bool) -> Result<bool> {
        self.post_flag(
            "tracks/mute",
            &TrackFlagRequest {
                track_names: names,
                enabled,
            },
        )
    }

    fn set_track_solo(&self, names: &[String], enabled: bool) -> Result<bool> {
        self.post_flag(
            "tracks/solo",
            &TrackFlagRequest {
                track_names: names,
                enabled,
            },
        )
    }

    fn set_render_range(&self, start: Option<f64>, end: Option<f64>) -> Result<bool> {
        self.post_flag(
            "timeline/selection",
            &RangeRequest {
                start_time: start,
                end_time: end,
            },
        )
    }

    fn get_session_length(&self) -> Result<f64> {
        let length: LengthResponse = self.get("session/length")?;
        Ok(length.seconds)
    }

    fn render(&self, request: &RenderRequest) -> Result<RenderOutcome> {
        self.ensure_connected()?;
        let base_name = request
            .output_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let body = RenderBody {
            output_path: request.output_path.to_string_lossy().to_string(),
            base_name,
            source_name: &request.source_name,
            source_type: request.source_type.as_str(),
            file_format: request.format.extension(),
            offline_bounce: request.offline,
        };

        match self.send::<_, RenderOutcome>("export/mix", Some(&body), None) {
            Ok(outcome) => Ok(outcome.unwrap_or_else(|| RenderOutcome::completed(None))),
            Err(PtStemError::Bridge { message }) => Ok(RenderOutcome::failed(message)),
            Err(e) => Err(e),
        }
    }

    fn cancel_render(&self) {
        if let Err(e) = self.send::<_, serde_json::Value>("export/cancel", Some(&()), Some(self.timeout)) {
            tracing::warn!(error = %e, "bridge did not accept render cancellation");
        }
    }

    fn transport(&self, action: TransportAction) -> Result<bool> {
        self.post_flag(&format!("transport/{}", action.as_str()), &())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_cleanly() {
        let surface = BridgeSurface::new("http://127.0.0.1:31416/", 1000);
        assert_eq!(surface.base_url(), "http://127.0.0.1:31416");
        assert_eq!(
            surface.endpoint("/session/info"),
            "http://127.0.0.1:31416/session/info"
        );
    }

    #[test]
    fn test_calls_before_connect_fail_with_connection_error() {
        let surface = BridgeSurface::new("http://127.0.0.1:1", 200);
        assert!(!surface.is_connected());
        assert!(surface.get_track_list().unwrap_err().is_connection());
        assert!(surface.set_track_mute(&["Kick".to_string()], true).unwrap_err().is_connection());
    }

    #[test]
    fn test_connect_to_unreachable_bridge() {
        let surface = BridgeSurface::new("http://127.0.0.1:1", 200);
        let err = surface.connect().unwrap_err();
        assert!(err.is_connection());
        assert!(!surface.is_connected());
    }

    #[test]
    fn test_envelope_error_maps_to_bridge_error() {
        let surface = BridgeSurface::new("http://localhost:1", 200);
        let envelope: BridgeEnvelope<serde_json::Value> =
            serde_json::from_str(r#"{"success":false,"error":"no such bus"}"#).unwrap();
        let err = surface.unwrap_envelope("export/mix", envelope).unwrap_err();
        assert_eq!(err.error_code(), "BRIDGE_ERROR");
        assert!(err.to_string().contains("no such bus"));
    }

    #[cfg(feature = "bridge")]
    mod http {
        use super::*;
        use crate::surface::{AudioFormat, MixSourceType};
        use std::io::{BufRead, BufReader, Read, Write};
        use std::net::{TcpListener, TcpStream};
        use std::path::PathBuf;
        use std::thread;

        /// Minimal bridge: answers every request with `{success:true}`,
        /// holding `slow_path` requests for `delay`.
        fn spawn_bridge(slow_path: &'static str, delay: Duration) -> String {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let addr = listener.local_addr().unwrap();
            thread::spawn(move || {
                for stream in listener.incoming().flatten() {
                    thread::spawn(move || answer(stream, slow_path, delay));
                }
            });
            format!("http://{}", addr)
        }

        fn answer(stream: TcpStream, slow_path: &str, delay: Duration) {
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut request_line = String::new();
            reader.read_line(&mut request_line).unwrap();

            let mut content_length = 0;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                if line.trim().is_empty() {
                    break;
                }
                if let Some(value) = line.to_lowercase().strip_prefix("content-length:") {
                    content_length = value.trim().parse().unwrap();
                }
            }
            let mut body = vec![0; content_length];
            reader.read_exact(&mut body).unwrap();

            if request_line.contains(slow_path) {
                thread::sleep(delay);
            }
            let data = if request_line.contains("export/mix") {
                r#"{"success":true,"data":{"success":true}}"#
            } else {
                r#"{"success":true,"data":[]}"#
            };
            let mut stream = stream;
            let _ = write!(
                stream,
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                data.len(),
                data
            );
        }

        fn render_request() -> RenderRequest {
            RenderRequest {
                output_path: PathBuf::from("/tmp/Bounced Files/temp_export_A_1.wav"),
                source_name: "Out 1-2".to_string(),
                source_type: MixSourceType::Output,
                format: AudioFormat::Wav,
                offline: false,
            }
        }

        #[test]
        fn test_long_render_outlives_call_timeout() {
            let url = spawn_bridge("export/mix", Duration::from_millis(1500));
            let surface = BridgeSurface::new(url, 500);
            surface.connect().unwrap();

            let outcome = surface.render(&render_request()).unwrap();
            assert!(outcome.success);
            assert!(surface.is_connected());
        }

        #[test]
        fn test_slow_call_is_not_a_lost_connection() {
            let url = spawn_bridge("/tracks", Duration::from_millis(1500));
            let surface = BridgeSurface::new(url, 300);
            surface.connect().unwrap();

            let err = surface.get_track_list().unwrap_err();
            assert_eq!(err.error_code(), "BRIDGE_ERROR");
            assert!(surface.is_connected());
        }
    }
}
