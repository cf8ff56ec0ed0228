//! Board engine
//!
//! [`Board`] ties the pieces together: it owns the module registry, the node
//! arena and the realized routes, runs every allocation and register read
//! through the [`Correlator`], and turns incoming notifications into
//! [`BoardEvent`]s on a crossbeam channel.
//!
//! # Data Flow
//!
//! ```text
//! Transport glue ──notification──> Board::handle_notification
//!                                     │
//!             ┌───────────────────────┼─────────────────────────┐
//!             ▼                       ▼                         ▼
//!        Correlator              LogDecoder              DispatchTable
//!     (ids, read replies)    (readout entries)        (streamed frames)
//!                                     │                         │
//!                                     └──> Receiver<BoardEvent> <┘
//! ```
//!
//! Board-mutating operations are `async` and suspend only while waiting for
//! a reply; no lock is held across an await. Locks are taken in the order
//! state → logs → correlator → transport stats.

pub mod dispatch;
pub mod snapshot;

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

pub use dispatch::{classify, DispatchTable, Notification, StreamTarget};
pub use snapshot::{BoardSnapshot, SNAPSHOT_VERSION};

use crate::backend::{Transport, TransportStats};
use crate::config::EngineConfig;
use crate::correlator::Correlator;
use crate::error::{BoardError, Result, ResultExt};
use crate::logger::{
    BoundPart, DownloadSession, DownloadState, DownloadSummary, EpochClock, LogDecoder,
    LoggedSample, LoggerBinding, ProgressCallback, TickSource,
};
use crate::reconstruct::{AnonymousRoute, LoggerConfig, ProcessorConfig, Reconstructor};
use crate::registry::opcodes::{event, logging, macros, processor, sensor_fusion, timer};
use crate::registry::{ModuleId, ModuleInfo, ModuleRegistry, INFO_REGISTER, READ_BIT};
use crate::route::{
    ArenaEntry, ConfigPatch, CreatedResource, DataToken, NodeArena, NodeEdit, NodeHandle, NodeRef,
    PlanStep, Reaction, Route, RouteCompiler, RouteGraph, RouteId, RoutePlan, SourceRef,
    TerminalKind,
};
use crate::signal::{catalog, SourceAddress};
use crate::types::{ResourceClass, Sample};

/// What the board reports to the client
#[derive(Debug, Clone, PartialEq)]
pub enum BoardEvent {
    /// A value from a stream terminal
    Data {
        route: RouteId,
        terminal: usize,
        name: Option<String>,
        sample: Sample,
    },
    /// A value from a log download
    Log(LoggedSample),
    Disconnected,
    /// A notification nothing was waiting for
    Unhandled(Vec<u8>),
}

/// A board timer and the events bound to it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerRecord {
    pub id: u8,
    pub period_ms: u32,
    pub repetitions: u16,
    pub immediate: bool,
    /// Event ids fired by this timer
    pub events: Vec<u8>,
}

/// A recorded macro
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacroRecord {
    pub id: u8,
    pub exec_on_boot: bool,
    pub commands: Vec<Vec<u8>>,
}

/// Sensor fusion calibration accuracy per sensor, 0 (unreliable) to 3 (high)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationState {
    pub accelerometer: u8,
    pub gyroscope: u8,
    pub magnetometer: u8,
}

/// Snapshot of engine counters
#[derive(Debug, Clone)]
pub struct BoardStats {
    pub transport: TransportStats,
    pub routes: usize,
    pub bindings: usize,
    /// Allocations and reads still waiting for a reply
    pub pending: usize,
    pub live: BTreeMap<ResourceClass, usize>,
    pub download: DownloadState,
}

/// Transport wrapper counting traffic
struct Link {
    transport: Arc<dyn Transport>,
    stats: Mutex<TransportStats>,
}

impl Link {
    fn stats(&self) -> MutexGuard<'_, TransportStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for Link {
    fn write(&self, frame: &[u8]) -> Result<()> {
        trace!("write {:02x?}", frame);
        let result = self.transport.write(frame);
        let mut stats = self.stats();
        match &result {
            Ok(()) => stats.record_write(frame.len()),
            Err(_) => stats.record_failure(),
        }
        result
    }

    fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }
}

#[derive(Debug, Default)]
struct BoardState {
    initialized: bool,
    registry: ModuleRegistry,
    arena: NodeArena,
    routes: BTreeMap<RouteId, Route>,
    next_route: u32,
    /// Routes streaming each raw register
    subscriptions: BTreeMap<(u8, u8), usize>,
    dispatch: DispatchTable,
    timers: BTreeMap<u8, TimerRecord>,
    macros: BTreeMap<u8, MacroRecord>,
}

impl BoardState {
    /// Drop one route's claim on a raw register; true when it was the last
    fn unsubscribe(&mut self, module: u8, register: u8) -> bool {
        let remaining = match self.subscriptions.get_mut(&(module, register)) {
            Some(count) => {
                *count = count.saturating_sub(1);
                *count
            }
            None => 0,
        };
        if remaining > 0 {
            trace!("[{:#04x}, {:#04x}] still streamed", module, register);
            return false;
        }
        self.subscriptions.remove(&(module, register));
        true
    }
}

#[derive(Debug, Default)]
struct LogState {
    decoder: LogDecoder,
    session: DownloadSession,
}

struct Shared {
    link: Link,
    config: EngineConfig,
    correlator: Correlator,
    state: Mutex<BoardState>,
    logs: Mutex<LogState>,
    events: Sender<BoardEvent>,
}

/// Board ids of the nodes of a route being realized
struct Realization {
    ids: Vec<Option<u8>>,
    created: Vec<CreatedResource>,
    loggers: BTreeMap<usize, Vec<u8>>,
}

/// Handle to one connected board; cheap to clone
#[derive(Clone)]
pub struct Board {
    shared: Arc<Shared>,
}

impl Board {
    /// Create a board on `transport`
    ///
    /// Notifications must be fed to [`handle_notification`](Self::handle_notification)
    /// and [`initialize`](Self::initialize) must complete before any other
    /// operation is accepted.
    pub fn new(transport: Arc<dyn Transport>, config: EngineConfig) -> (Self, Receiver<BoardEvent>) {
        let (events, rx) = unbounded();
        let logs = LogState {
            decoder: LogDecoder::new(config.logging.tick_period_us),
            session: DownloadSession::new(),
        };
        let board = Self {
            shared: Arc::new(Shared {
                link: Link {
                    transport,
                    stats: Mutex::new(TransportStats::default()),
                },
                config,
                correlator: Correlator::new(),
                state: Mutex::new(BoardState::default()),
                logs: Mutex::new(logs),
                events,
            }),
        };
        (board, rx)
    }

    fn state(&self) -> MutexGuard<'_, BoardState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn logs(&self) -> MutexGuard<'_, LogState> {
        self.shared.logs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: BoardEvent) {
        if self.shared.events.send(event).is_err() {
            trace!("event receiver dropped");
        }
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.state().initialized {
            Ok(())
        } else {
            Err(BoardError::InvalidOperation(
                "board is not initialized".into(),
            ))
        }
    }

    fn write(&self, frame: &[u8]) -> Result<()> {
        self.shared.link.write(frame)
    }

    async fn read(&self, frame: &[u8]) -> Result<Vec<u8>> {
        self.shared
            .correlator
            .read(
                frame,
                &self.shared.link,
                self.shared.config.timeouts.register_read(),
            )
            .await
    }

    async fn allocate(&self, class: ResourceClass, frames: &[Vec<u8>]) -> Result<u8> {
        self.shared
            .correlator
            .allocate(
                class,
                frames,
                &self.shared.link,
                self.shared.config.timeouts.allocation(),
            )
            .await
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    pub fn is_initialized(&self) -> bool {
        self.state().initialized
    }

    /// Read the capability dump and the time reference
    ///
    /// Also the way back after a disconnect: everything the registry knew
    /// is replaced. A module whose info read times out is recorded absent.
    pub async fn initialize(&self) -> Result<()> {
        let mut registry = ModuleRegistry::new();
        for id in ModuleId::ALL {
            let request = [id as u8, INFO_REGISTER];
            match self.read(&request).await {
                Ok(payload) => {
                    let mut response = request.to_vec();
                    response.extend(payload);
                    registry.apply_info_response(&response)?;
                }
                Err(e) if e.is_timeout() => {
                    debug!("{} did not answer its info read, recording it absent", id);
                    registry.insert(ModuleInfo::absent(id));
                }
                Err(e) => return Err(e.with_context("reading module info")),
            }
        }

        for class in ResourceClass::ALL {
            self.shared
                .correlator
                .set_capacity(class, registry.capacity(class));
        }
        for module in registry.modules().filter(|m| m.present) {
            info!(
                "found {} (implementation {}, revision {})",
                module.id, module.implementation, module.revision
            );
        }

        let has_logging = registry.is_present(ModuleId::Logging);
        {
            let mut state = self.state();
            state.registry = registry;
            state.initialized = true;
        }
        if has_logging {
            self.refresh_time_reference()
                .await
                .context("reading time reference")?;
        }
        Ok(())
    }

    /// Read the board clock and record it as the reference of its reset uid
    pub async fn refresh_time_reference(&self) -> Result<()> {
        let payload = self
            .read(&[ModuleId::Logging as u8, logging::TIME | READ_BIT])
            .await?;
        let reference = EpochClock::parse_reference(&payload, Utc::now())?;
        debug!(
            "time reference: tick {} for reset uid {}",
            reference.tick, reference.reset_uid
        );
        self.logs().decoder.clock_mut().set_reference(reference);
        Ok(())
    }

    /// Feed one notification from the link
    ///
    /// Never fails: malformed, stale and unroutable frames are counted and
    /// dropped.
    pub fn handle_notification(&self, frame: &[u8]) {
        self.shared.link.stats().record_received(frame.len());
        let notification = match classify(frame) {
            Ok(n) => n,
            Err(e) => {
                debug!("dropping notification: {}", e);
                self.shared.link.stats().record_dropped();
                return;
            }
        };

        let handled = match notification {
            Notification::ReadResponse {
                module,
                register,
                payload,
            } => self
                .shared
                .correlator
                .complete_read(module, register, payload),
            Notification::Created { class, id } => self.shared.correlator.complete(class, id),
            Notification::Readout(payload) => {
                self.on_readout(payload);
                true
            }
            Notification::ReadoutProgress(remaining) => {
                self.on_progress(remaining);
                true
            }
            Notification::PageCompleted => {
                self.on_page_completed();
                true
            }
            Notification::Data(frame) => self.on_data(frame),
        };
        if !handled {
            trace!("unhandled notification {:02x?}", frame);
            self.shared.link.stats().record_dropped();
        }
    }

    fn on_readout(&self, payload: &[u8]) {
        let report = {
            let mut logs = self.logs();
            let report = match logs.decoder.ingest(payload) {
                Ok(report) => report,
                Err(e) => {
                    warn!("undecodable readout notification: {}", e);
                    return;
                }
            };
            logs.session.on_entries(
                report.entries,
                report.samples.len() as u32,
                report.unmatched,
            );
            report
        };
        for sample in report.samples {
            self.emit(BoardEvent::Log(sample));
        }
    }

    fn on_progress(&self, remaining: u32) {
        let summary = self.logs().session.on_progress(remaining);
        if let Some(summary) = summary {
            info!(
                "log download #{} complete: {} entries, {} samples in {:?}",
                summary.epoch, summary.entries, summary.samples, summary.elapsed
            );
        }
    }

    fn on_page_completed(&self) {
        let confirm = self.state().registry.supports_page_confirm();
        if !confirm {
            return;
        }
        trace!("confirming readout page");
        if let Err(e) = self.write(&[ModuleId::Logging as u8, logging::READOUT_PAGE_CONFIRM]) {
            warn!("failed to confirm readout page: {}", e);
        }
    }

    fn on_data(&self, frame: &[u8]) -> bool {
        let routed: Vec<(StreamTarget, Vec<u8>)> = {
            let state = self.state();
            state
                .dispatch
                .route(frame)
                .into_iter()
                .map(|(target, payload)| (target.clone(), payload.to_vec()))
                .collect()
        };
        if routed.is_empty() {
            self.emit(BoardEvent::Unhandled(frame.to_vec()));
            return false;
        }

        for (target, payload) in routed {
            let decoded = match target.decode(&payload) {
                Ok(decoded) => decoded,
                Err(e) => {
                    debug!("{} terminal {}: {}", target.route, target.terminal, e);
                    continue;
                }
            };
            for sample in decoded {
                let timestamp = match (sample.tick, target.source.processor_id()) {
                    (Some(tick), Some(id)) => {
                        let mut logs = self.logs();
                        let uid = logs.decoder.clock().latest_reset_uid().unwrap_or(0);
                        logs.decoder
                            .timestamp(TickSource::Processor(id), uid, tick)
                    }
                    _ => Utc::now(),
                };
                self.emit(BoardEvent::Data {
                    route: target.route,
                    terminal: target.terminal,
                    name: target.name.clone(),
                    sample: Sample {
                        timestamp,
                        value: sample.value,
                    },
                });
            }
        }
        true
    }

    /// Fail everything pending after the link dropped
    ///
    /// The board must be initialized again before it accepts new operations.
    pub fn on_disconnect(&self) {
        let failed = self.shared.correlator.fail_all();
        let interrupted = self.logs().session.interrupt("link lost");
        self.state().initialized = false;
        warn!(
            "board disconnected: {} pending operations failed, download interrupted: {}",
            failed, interrupted
        );
        self.emit(BoardEvent::Disconnected);
    }

    // ---- routes ----

    /// Compile `graph` and build it on the board
    ///
    /// Compile errors are raised before anything is sent. A failure while
    /// realizing leaves whatever was already created on the board.
    pub async fn create_route(&self, graph: RouteGraph) -> Result<RouteId> {
        self.ensure_ready()?;
        let plan = {
            let state = self.state();
            RouteCompiler::compile(&graph, &state.registry, &state.arena)?
        };
        debug!(
            "route on {} compiled: {} steps ({} processors, {} loggers, {} events)",
            plan.root.name,
            plan.steps.len(),
            plan.stats.processors,
            plan.stats.loggers,
            plan.stats.events
        );

        let mut realized = Realization {
            ids: vec![None; plan.nodes.len()],
            created: Vec::new(),
            loggers: BTreeMap::new(),
        };
        for step in &plan.steps {
            let outcome = self
                .realize_step(step, &mut realized)
                .await
                .with_context(|| format!("realizing {} node {}", plan.root.name, step.node()));
            if let Err(e) = outcome {
                if let Err(cleanup) = self.abandon_subscriptions(&realized.created) {
                    warn!("could not release subscriptions: {}", cleanup);
                }
                return Err(e);
            }
        }
        self.register_route(plan, realized)
    }

    /// Release the raw subscriptions of a route that failed to build
    ///
    /// Other board resources stay as they are, but a stream nobody owns is
    /// switched off again.
    fn abandon_subscriptions(&self, created: &[CreatedResource]) -> Result<()> {
        let commands: Vec<_> = {
            let mut state = self.state();
            created
                .iter()
                .rev()
                .filter(|resource| match **resource {
                    CreatedResource::Subscription { module, register } => {
                        state.unsubscribe(module, register)
                    }
                    _ => false,
                })
                .map(CreatedResource::teardown_command)
                .collect()
        };
        for command in &commands {
            warn!("unsubscribing {:02x?} after failed route", command);
            self.write(command)?;
        }
        Ok(())
    }

    fn resolve_source(&self, source: SourceRef, ids: &[Option<u8>]) -> Result<SourceAddress> {
        match source {
            SourceRef::Raw(address) => Ok(address),
            SourceRef::Node(node) => Ok(SourceAddress::processor(self.resolve_id(node, ids)?)),
        }
    }

    fn resolve_id(&self, node: NodeRef, ids: &[Option<u8>]) -> Result<u8> {
        let id = match node {
            NodeRef::Local(idx) => ids.get(idx).copied().flatten(),
            NodeRef::Live(handle) => self.state().arena.get(handle).and_then(|e| e.board_id),
        };
        id.ok_or_else(|| BoardError::Protocol(format!("{:?} has no processor id", node)))
    }

    fn patched(
        &self,
        bytes: &[u8],
        patches: &[ConfigPatch],
        ids: &[Option<u8>],
    ) -> Result<Vec<u8>> {
        let mut bytes = bytes.to_vec();
        for patch in patches {
            let id = self.resolve_id(patch.node, ids)?;
            let slot = bytes.get_mut(patch.offset).ok_or_else(|| {
                BoardError::Protocol(format!("patch offset {} out of range", patch.offset))
            })?;
            *slot = id;
        }
        Ok(bytes)
    }

    async fn realize_step(&self, step: &PlanStep, realized: &mut Realization) -> Result<()> {
        match step {
            PlanStep::CreateProcessor {
                node,
                source,
                attr,
                config,
                patches,
            } => {
                let address = self.resolve_source(*source, &realized.ids)?;
                let mut command = vec![ModuleId::DataProcessor as u8, processor::ADD];
                command.extend(address.to_bytes());
                command.push(*attr);
                command.extend(self.patched(config, patches, &realized.ids)?);
                let id = self.allocate(ResourceClass::Processor, &[command]).await?;
                debug!("node {} is processor {}", node, id);
                realized.ids[*node] = Some(id);
                realized.created.push(CreatedResource::Processor(id));
            }
            PlanStep::Subscribe { source, .. } => match source {
                SourceRef::Raw(address) => {
                    let first = {
                        let mut state = self.state();
                        let count = state
                            .subscriptions
                            .entry((address.module, address.register))
                            .or_insert(0);
                        *count += 1;
                        *count == 1
                    };
                    if first {
                        self.write(&[address.module, address.register, 0x01])?;
                    }
                    realized.created.push(CreatedResource::Subscription {
                        module: address.module,
                        register: address.register,
                    });
                }
                SourceRef::Node(node) => {
                    let id = self.resolve_id(*node, &realized.ids)?;
                    self.write(&[
                        ModuleId::DataProcessor as u8,
                        processor::NOTIFY_ENABLE,
                        id,
                        0x01,
                    ])?;
                    realized.created.push(CreatedResource::ProcessorNotify(id));
                }
            },
            PlanStep::CreateLogger {
                node, source, attr, ..
            } => {
                let address = self.resolve_source(*source, &realized.ids)?;
                let mut command = vec![ModuleId::Logging as u8, logging::TRIGGER];
                command.extend(address.to_bytes());
                command.push(*attr);
                let id = self.allocate(ResourceClass::Logger, &[command]).await?;
                realized.loggers.entry(*node).or_default().push(id);
                realized.created.push(CreatedResource::Logger(id));
            }
            PlanStep::CreateEvent {
                source,
                command,
                token,
                patches,
                ..
            } => {
                let address = self.resolve_source(*source, &realized.ids)?;
                let command = self.patched(command, patches, &realized.ids)?;
                let id = self.create_event(address, &command, *token).await?;
                realized.created.push(CreatedResource::Event(id));
            }
        }
        Ok(())
    }

    /// `[0x0a, 0x02, source(3), cmdModule, cmdRegister, paramsLen(, token)]`
    /// followed by `[0x0a, 0x03, params...]`; the id arrives after both
    async fn create_event(
        &self,
        source: SourceAddress,
        command: &[u8],
        token: Option<DataToken>,
    ) -> Result<u8> {
        let [module, register, params @ ..] = command else {
            return Err(BoardError::InvalidOperation(format!(
                "event command needs [module, register], got {:02x?}",
                command
            )));
        };
        let mut entry = vec![ModuleId::Event as u8, event::ENTRY];
        entry.extend(source.to_bytes());
        entry.extend([*module, *register, params.len() as u8]);
        if let Some(token) = token {
            entry.extend([token.descriptor(), token.dest]);
        }
        let mut parameters = vec![ModuleId::Event as u8, event::CMD_PARAMETERS];
        parameters.extend(params);
        self.allocate(ResourceClass::Event, &[entry, parameters])
            .await
    }

    fn register_route(&self, plan: RoutePlan, realized: Realization) -> Result<RouteId> {
        let mut state = self.state();
        let id = RouteId(state.next_route);
        state.next_route += 1;

        let handles = plan
            .nodes
            .iter()
            .enumerate()
            .map(|(idx, node)| {
                state.arena.insert(ArenaEntry {
                    route: id,
                    name: node.name.clone(),
                    kind: node.kind.clone(),
                    input: node.input.clone(),
                    output: node.output.clone(),
                    board_id: realized.ids[idx],
                    removed: false,
                })
            })
            .collect();

        let mut bindings = Vec::new();
        for terminal in &plan.terminals {
            let source = match terminal.source {
                SourceRef::Raw(address) => address,
                SourceRef::Node(node) => {
                    let board_id = match node {
                        NodeRef::Local(idx) => realized.ids.get(idx).copied().flatten(),
                        NodeRef::Live(handle) => state.arena.get(handle).and_then(|e| e.board_id),
                    };
                    SourceAddress::processor(board_id.ok_or_else(|| {
                        BoardError::Protocol(format!("terminal {} has no source id", terminal.node))
                    })?)
                }
            };
            let name = plan.nodes[terminal.node].name.clone();
            match terminal.kind {
                TerminalKind::Stream => state.dispatch.insert(StreamTarget {
                    route: id,
                    terminal: terminal.node,
                    name,
                    source,
                    shape: terminal.shape.clone(),
                }),
                TerminalKind::Log => {
                    let logger_ids = realized
                        .loggers
                        .get(&terminal.node)
                        .cloned()
                        .unwrap_or_default();
                    let parts = plan
                        .logger_parts(terminal.node)
                        .into_iter()
                        .zip(logger_ids)
                        .map(|(part, logger_id)| BoundPart {
                            logger_id,
                            offset: part.offset,
                            length: part.length,
                        })
                        .collect();
                    bindings.push(LoggerBinding {
                        name: name.unwrap_or_else(|| {
                            format!("{}/{}/log{}", id, plan.root.name, terminal.node)
                        }),
                        route: Some(id),
                        terminal: Some(terminal.node),
                        source,
                        shape: terminal.shape.clone(),
                        parts,
                    });
                }
            }
        }
        {
            let mut logs = self.logs();
            for binding in bindings {
                logs.decoder.bind(binding);
            }
        }

        info!(
            "{} created on {}: {} board resources",
            id,
            plan.root.name,
            realized.created.len()
        );
        let route = Route {
            id,
            plan,
            handles,
            created: realized.created,
            loggers: realized.loggers.into_iter().collect(),
            started: false,
        };
        state.routes.insert(id, route);
        Ok(id)
    }

    /// Tear a route down, newest resource first
    ///
    /// Refused while a download is running and the route has loggers.
    pub fn remove_route(&self, id: RouteId) -> Result<()> {
        self.ensure_ready()?;
        let (commands, route) = {
            let mut state = self.state();
            let route = state
                .routes
                .get(&id)
                .ok_or_else(|| BoardError::InvalidOperation(format!("no {}", id)))?;
            if route.has_loggers() && self.logs().session.is_active() {
                return Err(BoardError::InvalidOperation(format!(
                    "{} has loggers and a log download is running",
                    id
                )));
            }
            let Some(route) = state.routes.remove(&id) else {
                return Err(BoardError::InvalidOperation(format!("no {}", id)));
            };

            let mut commands = Vec::new();
            if route.started {
                commands.extend(Self::enable_command(&route, false));
            }
            for resource in route.teardown() {
                if let CreatedResource::Subscription { module, register } = *resource {
                    if !state.unsubscribe(module, register) {
                        continue;
                    }
                }
                commands.push(resource.teardown_command());
            }
            state.arena.retire_route(id);
            let referenced: HashSet<NodeHandle> =
                state.routes.values().flat_map(|r| r.plan.live_refs()).collect();
            let pruned = state.arena.prune(&referenced);
            trace!("{} retired arena entries dropped", pruned);
            state.dispatch.remove_route(id);
            (commands, route)
        };

        let logger_ids: Vec<u8> = route.logger_ids().collect();
        self.logs().decoder.unbind(&logger_ids);
        for resource in &route.created {
            match *resource {
                CreatedResource::Processor(p) => {
                    self.shared.correlator.release(ResourceClass::Processor, p)
                }
                CreatedResource::Logger(l) => self.shared.correlator.release(ResourceClass::Logger, l),
                CreatedResource::Event(e) => self.shared.correlator.release(ResourceClass::Event, e),
                CreatedResource::ProcessorNotify(_) | CreatedResource::Subscription { .. } => {}
            }
        }
        for command in &commands {
            self.write(command)?;
        }
        info!("{} removed ({} commands)", id, commands.len());
        Ok(())
    }

    fn enable_command(route: &Route, enable: bool) -> Option<Vec<u8>> {
        let root = &route.plan.root;
        let register = root.enable_register?;
        Some(vec![root.source.module, register, enable as u8])
    }

    /// Start the route's root signal
    pub fn start_route(&self, id: RouteId) -> Result<()> {
        self.set_route_enabled(id, true)
    }

    pub fn stop_route(&self, id: RouteId) -> Result<()> {
        self.set_route_enabled(id, false)
    }

    fn set_route_enabled(&self, id: RouteId, enable: bool) -> Result<()> {
        self.ensure_ready()?;
        let mut state = self.state();
        let route = state
            .routes
            .get_mut(&id)
            .ok_or_else(|| BoardError::InvalidOperation(format!("no {}", id)))?;
        if let Some(command) = Self::enable_command(route, enable) {
            self.write(&command)?;
        }
        route.started = enable;
        Ok(())
    }

    /// Change a named processor at runtime
    pub fn edit(&self, name: &str, edit: NodeEdit) -> Result<()> {
        self.ensure_ready()?;
        let mut state = self.state();
        let (handle, entry) = state.arena.resolve(name)?;
        let id = entry.board_id.ok_or_else(|| {
            BoardError::InvalidOperation(format!("'{}' is not a board-side node", name))
        })?;
        let command = edit.command(id, &entry.kind, &entry.input, &state.registry)?;
        self.write(&command)?;
        if let NodeEdit::Config(kind) = edit {
            if let Some(entry) = state.arena.get_mut(handle) {
                entry.kind = kind;
            }
        }
        debug!("edited '{}' (processor {})", name, id);
        Ok(())
    }

    pub fn routes(&self) -> Vec<RouteId> {
        self.state().routes.keys().copied().collect()
    }

    pub fn route(&self, id: RouteId) -> Option<Route> {
        self.state().routes.get(&id).cloned()
    }

    pub fn registry(&self) -> ModuleRegistry {
        self.state().registry.clone()
    }

    // ---- timers ----

    /// Create a timer firing every `period_ms`, `repetitions` times
    /// (`REPEAT_FOREVER` for no limit)
    pub async fn create_timer(&self, period_ms: u32, repetitions: u16, immediate: bool) -> Result<u8> {
        self.ensure_ready()?;
        self.state().registry.require(ModuleId::Timer)?;
        let mut command = vec![ModuleId::Timer as u8, timer::CREATE];
        command.extend(period_ms.to_le_bytes());
        command.extend(repetitions.to_le_bytes());
        command.push(immediate as u8);
        let id = self.allocate(ResourceClass::Timer, &[command]).await?;
        self.state().timers.insert(
            id,
            TimerRecord {
                id,
                period_ms,
                repetitions,
                immediate,
                events: Vec::new(),
            },
        );
        debug!("timer {} created, {} ms", id, period_ms);
        Ok(id)
    }

    fn timer_command(&self, id: u8, opcode: u8) -> Result<()> {
        self.ensure_ready()?;
        if !self.state().timers.contains_key(&id) {
            return Err(BoardError::InvalidOperation(format!("no timer {}", id)));
        }
        self.write(&[ModuleId::Timer as u8, opcode, id])
    }

    pub fn start_timer(&self, id: u8) -> Result<()> {
        self.timer_command(id, timer::START)
    }

    pub fn stop_timer(&self, id: u8) -> Result<()> {
        self.timer_command(id, timer::STOP)
    }

    /// Remove a timer and the events it fires
    pub fn remove_timer(&self, id: u8) -> Result<()> {
        self.ensure_ready()?;
        let record = self
            .state()
            .timers
            .remove(&id)
            .ok_or_else(|| BoardError::InvalidOperation(format!("no timer {}", id)))?;
        for event_id in record.events.iter().rev() {
            self.write(&CreatedResource::Event(*event_id).teardown_command())?;
            self.shared
                .correlator
                .release(ResourceClass::Event, *event_id);
        }
        self.write(&[ModuleId::Timer as u8, timer::REMOVE, id])?;
        self.shared.correlator.release(ResourceClass::Timer, id);
        Ok(())
    }

    /// Run the commands recorded by `f` each time timer `id` fires
    pub async fn schedule<F>(&self, id: u8, f: F) -> Result<Vec<u8>>
    where
        F: FnOnce(&mut Reaction),
    {
        self.ensure_ready()?;
        if !self.state().timers.contains_key(&id) {
            return Err(BoardError::InvalidOperation(format!("no timer {}", id)));
        }
        let mut reaction = Reaction::default();
        f(&mut reaction);

        let source = catalog::timer_fired(id).source;
        let mut events = Vec::new();
        for command in reaction.commands() {
            let event_id = self
                .create_event(source, &command.bytes, command.token)
                .await?;
            events.push(event_id);
            if let Some(record) = self.state().timers.get_mut(&id) {
                record.events.push(event_id);
            }
        }
        Ok(events)
    }

    pub fn timers(&self) -> Vec<TimerRecord> {
        self.state().timers.values().cloned().collect()
    }

    // ---- macros ----

    /// Record `commands` as a macro, optionally run at every boot
    pub async fn record_macro(&self, exec_on_boot: bool, commands: &[Vec<u8>]) -> Result<u8> {
        self.ensure_ready()?;
        self.state().registry.require(ModuleId::Macro)?;
        let mut frames = vec![vec![
            ModuleId::Macro as u8,
            macros::BEGIN,
            exec_on_boot as u8,
        ]];
        for command in commands {
            let mut frame = vec![ModuleId::Macro as u8, macros::ADD_COMMAND];
            frame.extend(command);
            frames.push(frame);
        }
        frames.push(vec![ModuleId::Macro as u8, macros::END]);

        let id = self.allocate(ResourceClass::Macro, &frames).await?;
        self.state().macros.insert(
            id,
            MacroRecord {
                id,
                exec_on_boot,
                commands: commands.to_vec(),
            },
        );
        info!("macro {} recorded, {} commands", id, commands.len());
        Ok(id)
    }

    pub fn execute_macro(&self, id: u8) -> Result<()> {
        self.ensure_ready()?;
        if !self.state().macros.contains_key(&id) {
            return Err(BoardError::InvalidOperation(format!("no macro {}", id)));
        }
        self.write(&[ModuleId::Macro as u8, macros::EXECUTE, id])
    }

    /// Erase every macro on the board
    pub fn erase_macros(&self) -> Result<()> {
        self.ensure_ready()?;
        self.write(&[ModuleId::Macro as u8, macros::ERASE_ALL])?;
        self.state().macros.clear();
        for id in self.shared.correlator.live_ids(ResourceClass::Macro) {
            self.shared.correlator.release(ResourceClass::Macro, id);
        }
        Ok(())
    }

    pub fn macros(&self) -> Vec<MacroRecord> {
        self.state().macros.values().cloned().collect()
    }

    // ---- logging ----

    /// Download every stored log entry
    ///
    /// Resolves when the board reports nothing remaining. Decoded samples
    /// arrive as [`BoardEvent::Log`]; `progress` receives
    /// `(received, expected)` and runs on the notification path, so it
    /// must not call back into the board.
    pub async fn download(&self, progress: Option<ProgressCallback>) -> Result<DownloadSummary> {
        self.ensure_ready()?;
        self.state().registry.require(ModuleId::Logging)?;
        if self.logs().session.is_active() {
            return Err(BoardError::InvalidOperation(
                "a log download is already in progress".into(),
            ));
        }

        let payload = self
            .read(&[ModuleId::Logging as u8, logging::LENGTH | READ_BIT])
            .await?;
        let count = match payload.as_slice() {
            [a, b, c, d, ..] => u32::from_le_bytes([*a, *b, *c, *d]),
            _ => {
                return Err(BoardError::Protocol(format!(
                    "log length needs 4 bytes, got {}",
                    payload.len()
                )))
            }
        };

        let rx = self.logs().session.begin(count, progress)?;
        if count == 0 {
            self.logs().session.on_progress(0);
        } else {
            let delta = self.shared.config.logging.notify_delta(count);
            let mut readout = vec![ModuleId::Logging as u8, logging::READOUT];
            readout.extend(count.to_le_bytes());
            readout.extend(delta.to_le_bytes());
            let frames = [
                vec![ModuleId::Logging as u8, logging::READOUT_NOTIFY, 0x01],
                vec![ModuleId::Logging as u8, logging::READOUT_PROGRESS, 0x01],
                readout,
            ];
            for frame in &frames {
                if let Err(e) = self.write(frame) {
                    self.logs()
                        .session
                        .fail("readout request failed", BoardError::ConnectionLost);
                    return Err(e.with_context("starting log readout"));
                }
            }
        }

        let summary = rx.await.map_err(|_| BoardError::ConnectionLost)??;
        if self.shared.config.logging.clear_after_download {
            self.write(&[
                ModuleId::Logging as u8,
                logging::REMOVE_ENTRIES,
                0xff,
                0xff,
                0xff,
                0xff,
            ])?;
        }
        Ok(summary)
    }

    pub fn download_state(&self) -> DownloadState {
        self.logs().session.state().clone()
    }

    pub fn bindings(&self) -> Vec<LoggerBinding> {
        self.logs().decoder.demux().bindings().to_vec()
    }

    /// Rebuild logger bindings from what the board has stored
    ///
    /// Reads every logger slot, then every processor its chain passes
    /// through. Any read timeout aborts the whole reconstruction and
    /// nothing is bound.
    pub async fn reconstruct_loggers(&self) -> Result<Vec<AnonymousRoute>> {
        self.ensure_ready()?;
        let capacity = self.shared.correlator.capacity(ResourceClass::Logger);
        let mut reconstructor = Reconstructor::new();

        for id in 0..capacity {
            let payload = self
                .read(&[ModuleId::Logging as u8, logging::TRIGGER | READ_BIT, id])
                .await
                .with_context(|| format!("reading logger {}", id))?;
            if let Some(config) = LoggerConfig::parse(id, &payload)? {
                reconstructor.add_logger(config);
            }
        }

        loop {
            let missing = reconstructor.missing_processors();
            if missing.is_empty() {
                break;
            }
            for id in missing {
                let payload = self
                    .read(&[ModuleId::DataProcessor as u8, processor::ADD | READ_BIT, id])
                    .await
                    .with_context(|| format!("reading processor {}", id))?;
                reconstructor.add_processor(ProcessorConfig::parse(id, &payload)?);
            }
        }

        let routes = reconstructor.finish()?;
        self.shared
            .correlator
            .mark_live(ResourceClass::Logger, reconstructor.logger_ids());
        self.shared
            .correlator
            .mark_live(ResourceClass::Processor, reconstructor.processor_ids());
        {
            let mut logs = self.logs();
            for route in &routes {
                let ids: Vec<u8> = route.binding.logger_ids().collect();
                logs.decoder.unbind(&ids);
                logs.decoder.bind(route.binding.clone());
            }
        }
        info!("reconstructed {} logger bindings", routes.len());
        Ok(routes)
    }

    /// Read the sensor fusion calibration state
    pub async fn read_calibration(&self) -> Result<CalibrationState> {
        self.ensure_ready()?;
        let supported = self.state().registry.supports_calibration_readback();
        if !supported {
            return Err(BoardError::InvalidOperation(
                "calibration readback needs sensor fusion revision 1".into(),
            ));
        }
        let payload = self
            .read(&[
                ModuleId::SensorFusion as u8,
                sensor_fusion::CALIBRATION_STATE | READ_BIT,
            ])
            .await?;
        match payload.as_slice() {
            [accelerometer, gyroscope, magnetometer, ..] => Ok(CalibrationState {
                accelerometer: *accelerometer,
                gyroscope: *gyroscope,
                magnetometer: *magnetometer,
            }),
            _ => Err(BoardError::Protocol(format!(
                "calibration state needs 3 bytes, got {}",
                payload.len()
            ))),
        }
    }

    pub fn stats(&self) -> BoardStats {
        let (routes, download, bindings) = {
            let state = self.state();
            let logs = self.logs();
            (
                state.routes.len(),
                logs.session.state().clone(),
                logs.decoder.demux().bindings().len(),
            )
        };
        BoardStats {
            transport: self.shared.link.stats().clone(),
            routes,
            bindings,
            pending: self.shared.correlator.pending_count(),
            live: ResourceClass::ALL
                .into_iter()
                .map(|c| (c, self.shared.correlator.live_ids(c).len()))
                .collect(),
            download,
        }
    }
}
