//! PT-STEM - Snapshot Bounce Orchestrator
//!
//! Remote control over a DAW session: read session and track state, drive
//! the transport, and render named mute/solo snapshots into individual
//! bounces in one batch.
//!
//! # Architecture
//!
//! - `surface`: blocking control-surface clients (simulated and bridge)
//! - `snapshot`: snapshot model and the mute/solo diff engine
//! - `export`: request validation, paths and the per-task pipeline
//! - `tasks`: task lifecycle and the registry
//! - `scheduler`: single worker, FIFO queue, one render slot
//! - `service`: the facade clients call

pub mod cli;
pub mod config;
pub mod error;
pub mod export;
pub mod scheduler;
pub mod service;
pub mod snapshot;
pub mod surface;
pub mod tasks;

pub use config::{Config, SurfaceKind};
pub use error::{PtStemError, Result};
pub use export::{ExportRequest, ExportSettings};
pub use service::ExportService;
pub use snapshot::{Snapshot, TrackState};
pub use surface::{ControlSurface, SharedSurface, SimulatedSurface};
pub use tasks::{TaskStatus, TaskView};
