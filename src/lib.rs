//! # boardlink: client engine for BLE sensor boards
//!
//! Builds sensor-data pipelines on a battery-powered board that is only
//! reachable through a narrow write/notify link, and turns what the board
//! sends back into typed, timestamped samples.
//!
//! ## Architecture
//!
//! - **Registry**: Module capability table read from the board at connect time
//! - **Route**: Declarative pipelines compiled into ordered board commands
//! - **Correlator**: Per-class FIFO pairing of commands with board-assigned ids
//! - **Logger**: Log readout decoding, tick wraparound and download sessions
//! - **Reconstruct**: Logger bindings recovered from on-board state alone
//! - **Board**: The engine tying these together behind one async handle
//! - **Communication**: Crossbeam channel of [`BoardEvent`]s for the client
//!
//! ## Configuration
//!
//! Engine settings are stored as TOML in the platform config directory under
//! `dev.boardlink` (see [`config::EngineConfig::default_path`]).
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use boardlink::{catalog, Board, EngineConfig, RouteGraph};
//!
//! let (board, events) = Board::new(Arc::new(my_transport), EngineConfig::default());
//! // feed notifications from the link with board.handle_notification(&frame)
//! board.initialize().await?;
//!
//! let route = board
//!     .create_route(RouteGraph::build(catalog::acceleration(), |root| {
//!         root.rms().name("rms").accumulate().log();
//!     }))
//!     .await?;
//! board.start_route(route)?;
//!
//! let summary = board.download(None).await?;
//! for event in events.try_iter() {
//!     println!("{:?}", event);
//! }
//! ```

pub mod backend;
pub mod board;
pub mod config;
pub mod correlator;
pub mod error;
pub mod logger;
pub mod reconstruct;
pub mod registry;
pub mod route;
pub mod signal;
pub mod types;

// Re-export commonly used types
pub use backend::{Transport, TransportStats};
pub use board::{Board, BoardEvent, BoardSnapshot, BoardStats, CalibrationState};
pub use config::EngineConfig;
pub use error::{BoardError, CompileError, Result};
pub use logger::{DownloadState, DownloadSummary, LoggedSample, LoggerBinding};
pub use reconstruct::AnonymousRoute;
pub use registry::{ModuleId, ModuleRegistry};
pub use route::{NodeEdit, RouteGraph, RouteId};
pub use signal::{catalog, DataSignal};
pub use types::{DataValue, ResourceClass, Sample};
