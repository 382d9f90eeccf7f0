//! Runtime configuration
//!
//! Defaults, then an optional JSON file, then `PTSTEM_*` environment
//! variables. Command-line flags are applied on top by the binary.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PtStemError, Result};

/// Environment variable pointing at a JSON config file.
pub const CONFIG_ENV: &str = "PTSTEM_CONFIG";

const DEFAULT_BRIDGE_URL: &str = "http://127.0.0.1:31416";
const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_OUTPUT_DIR: &str = "./output";
const DEFAULT_SETTLE_DELAY_MS: u64 = 500;
const DEFAULT_SNAPSHOT_PAUSE_MS: u64 = 200;
const DEFAULT_LOG_LEVEL: &str = "info";

/// Which control surface backs the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SurfaceKind {
    /// In-memory DAW, no external process needed
    #[default]
    Simulated,
    /// HTTP bridge to a running DAW
    Bridge,
}

impl SurfaceKind {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "simulated" | "sim" | "offline" => Some(Self::Simulated),
            "bridge" | "ptsl" => Some(Self::Bridge),
            _ => None,
        }
    }
}

/// Service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub surface: SurfaceKind,
    pub bridge_url: String,
    /// Bridge connect and call timeout; bounces are not limited by it
    pub timeout_ms: u64,
    /// Destination for requests that leave `output_path` empty
    pub output_dir: PathBuf,
    /// Pause after track mutations before bouncing
    pub settle_delay_ms: u64,
    /// Pause between snapshots
    pub snapshot_pause_ms: u64,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            surface: SurfaceKind::default(),
            bridge_url: DEFAULT_BRIDGE_URL.to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
            snapshot_pause_ms: DEFAULT_SNAPSHOT_PAUSE_MS,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl Config {
    /// Load from `path` if given, else from `$PTSTEM_CONFIG` if set, then
    /// apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = path
            .map(Path::to_path_buf)
            .or_else(|| env::var(CONFIG_ENV).ok().map(PathBuf::from));

        let mut config = match file {
            Some(file) => Self::from_file(&file)?,
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| PtStemError::Config {
            reason: format!("cannot read {}: {}", path.display(), e),
        })?;
        serde_json::from_str(&raw).map_err(|e| PtStemError::Config {
            reason: format!("invalid JSON in {}: {}", path.display(), e),
        })
    }

    /// Apply `PTSTEM_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_vars(|key| env::var(key).ok())
    }

    fn apply_vars<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(kind) = lookup("PTSTEM_SURFACE") {
            self.surface = SurfaceKind::from_str(&kind).ok_or_else(|| PtStemError::Config {
                reason: format!("unknown surface '{}'", kind),
            })?;
        }
        if let Some(url) = lookup("PTSTEM_BRIDGE_URL") {
            self.bridge_url = url;
        }
        if let Some(ms) = lookup("PTSTEM_TIMEOUT_MS") {
            self.timeout_ms = parse_ms("PTSTEM_TIMEOUT_MS", &ms)?;
        }
        if let Some(dir) = lookup("PTSTEM_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(dir);
        }
        if let Some(ms) = lookup("PTSTEM_SETTLE_DELAY_MS") {
            self.settle_delay_ms = parse_ms("PTSTEM_SETTLE_DELAY_MS", &ms)?;
        }
        if let Some(ms) = lookup("PTSTEM_SNAPSHOT_PAUSE_MS") {
            self.snapshot_pause_ms = parse_ms("PTSTEM_SNAPSHOT_PAUSE_MS", &ms)?;
        }
        if let Some(level) = lookup("PTSTEM_LOG_LEVEL") {
            self.log_level = level;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.surface == SurfaceKind::Bridge && self.bridge_url.trim().is_empty() {
            return Err(PtStemError::Config {
                reason: "bridge_url must be set when surface is 'bridge'".to_string(),
            });
        }
        if self.timeout_ms == 0 {
            return Err(PtStemError::Config {
                reason: "timeout_ms must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn snapshot_pause(&self) -> Duration {
        Duration::from_millis(self.snapshot_pause_ms)
    }
}

fn parse_ms(key: &str, value: &str) -> Result<u64> {
    value.trim().parse().map_err(|_| PtStemError::Config {
        reason: format!("{} must be a whole number of milliseconds, got '{}'", key, value),
    })
}
