//! Persisted board topology
//!
//! A [`BoardSnapshot`] records everything the engine knows about what it
//! built on a board: capabilities, routes with their created resources,
//! logger bindings, timers, macros and live ids. Restoring it against the
//! same board lets a new process edit and tear down routes it did not
//! create, emitting the same commands the original session would have.
//!
//! # Example
//!
//! ```ignore
//! board.snapshot().save("board.json")?;
//! // later, in another process
//! let snapshot = BoardSnapshot::load("board.json")?;
//! let (board, events) = Board::restore(transport, EngineConfig::default(), snapshot)?;
//! board.remove_route(RouteId(0))?;
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crossbeam_channel::Receiver;
use tracing::info;

use super::{Board, BoardEvent, DispatchTable, MacroRecord, TimerRecord};
use crate::backend::Transport;
use crate::config::EngineConfig;
use crate::error::{BoardError, Result};
use crate::logger::{EpochClock, LoggerBinding};
use crate::registry::{ModuleInfo, ModuleRegistry};
use crate::route::{NodeArena, Route};
use crate::types::ResourceClass;

/// Current snapshot format
pub const SNAPSHOT_VERSION: u32 = 1;

/// Routes streaming one raw register
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionCount {
    pub module: u8,
    pub register: u8,
    pub count: usize,
}

/// Ids of one class held on the board
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveIds {
    pub class: ResourceClass,
    pub ids: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardSnapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub modules: Vec<ModuleInfo>,
    pub arena: NodeArena,
    pub routes: Vec<Route>,
    pub next_route: u32,
    pub bindings: Vec<LoggerBinding>,
    pub streams: DispatchTable,
    pub subscriptions: Vec<SubscriptionCount>,
    pub timers: Vec<TimerRecord>,
    pub macros: Vec<MacroRecord>,
    pub live: Vec<LiveIds>,
    pub clock: EpochClock,
}

impl BoardSnapshot {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| BoardError::Serialization(format!("Failed to serialize snapshot: {}", e)))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self = serde_json::from_str(json)
            .map_err(|e| BoardError::Serialization(format!("Failed to parse snapshot: {}", e)))?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(BoardError::Serialization(format!(
                "unsupported snapshot version {} (expected {})",
                snapshot.version, SNAPSHOT_VERSION
            )));
        }
        Ok(snapshot)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    pub fn registry(&self) -> ModuleRegistry {
        let mut registry = ModuleRegistry::new();
        for info in &self.modules {
            registry.insert(info.clone());
        }
        registry
    }
}

impl Board {
    /// Capture the engine's view of the board
    pub fn snapshot(&self) -> BoardSnapshot {
        let state = self.state();
        let logs = self.logs();
        BoardSnapshot {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            modules: state.registry.modules().cloned().collect(),
            arena: state.arena.clone(),
            routes: state.routes.values().cloned().collect(),
            next_route: state.next_route,
            bindings: logs.decoder.demux().bindings().to_vec(),
            streams: state.dispatch.clone(),
            subscriptions: state
                .subscriptions
                .iter()
                .map(|(&(module, register), &count)| SubscriptionCount {
                    module,
                    register,
                    count,
                })
                .collect(),
            timers: state.timers.values().cloned().collect(),
            macros: state.macros.values().cloned().collect(),
            live: ResourceClass::ALL
                .into_iter()
                .map(|class| LiveIds {
                    class,
                    ids: self.shared.correlator.live_ids(class),
                })
                .collect(),
            clock: logs.decoder.clock().clone(),
        }
    }

    /// Rebuild a board from a snapshot, ready for use without `initialize`
    pub fn restore(
        transport: Arc<dyn Transport>,
        config: EngineConfig,
        snapshot: BoardSnapshot,
    ) -> Result<(Self, Receiver<BoardEvent>)> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(BoardError::Serialization(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }
        let (board, events) = Self::new(transport, config);
        let registry = snapshot.registry();

        for class in ResourceClass::ALL {
            board
                .shared
                .correlator
                .set_capacity(class, registry.capacity(class));
        }
        for live in &snapshot.live {
            board
                .shared
                .correlator
                .mark_live(live.class, live.ids.iter().copied());
        }

        {
            let mut logs = board.logs();
            *logs.decoder.clock_mut() = snapshot.clock;
            for binding in snapshot.bindings {
                logs.decoder.bind(binding);
            }
        }

        {
            let mut state = board.state();
            state.registry = registry;
            state.arena = snapshot.arena;
            state.routes = snapshot.routes.into_iter().map(|r| (r.id, r)).collect();
            state.next_route = snapshot.next_route;
            state.dispatch = snapshot.streams;
            state.subscriptions = snapshot
                .subscriptions
                .into_iter()
                .map(|s| ((s.module, s.register), s.count))
                .collect::<BTreeMap<_, _>>();
            state.timers = snapshot.timers.into_iter().map(|t| (t.id, t)).collect();
            state.macros = snapshot.macros.into_iter().map(|m| (m.id, m)).collect();
            state.initialized = true;
            info!(
                "restored {} routes saved at {}",
                state.routes.len(),
                snapshot.saved_at
            );
        }
        Ok((board, events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::transport::MockTransport;

    fn empty_snapshot() -> BoardSnapshot {
        let transport = Arc::new(MockTransport::new());
        let (board, _events) = Board::new(transport, EngineConfig::default());
        board.snapshot()
    }

    #[test]
    fn test_json_roundtrip() {
        let snapshot = empty_snapshot();
        let json = snapshot.to_json().unwrap();
        assert_eq!(BoardSnapshot::from_json(&json).unwrap(), snapshot);
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let mut snapshot = empty_snapshot();
        snapshot.version = SNAPSHOT_VERSION + 1;
        let json = snapshot.to_json().unwrap();
        assert!(matches!(
            BoardSnapshot::from_json(&json),
            Err(BoardError::Serialization(_))
        ));
    }

    #[test]
    fn test_restore_is_initialized_and_writes_nothing() {
        let snapshot = empty_snapshot();
        let mut transport = MockTransport::new();
        transport.expect_write().never();
        let (board, _events) =
            Board::restore(Arc::new(transport), EngineConfig::default(), snapshot).unwrap();
        assert!(board.is_initialized());
        assert!(board.routes().is_empty());
    }
}
