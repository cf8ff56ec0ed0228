//! Simulated board for testing without hardware
//!
//! [`MockBoard`] implements [`Transport`] and answers the commands the engine
//! sends the way a board would: module info reads, id allocations, register
//! reads, time and length reads and log readouts. Replies are queued on a
//! channel and delivered by a pump task (see [`MockBoard::attach`]) so that
//! a write never calls back into the board synchronously.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use boardlink::backend::MockBoard;
//! use boardlink::board::Board;
//! use boardlink::config::EngineConfig;
//!
//! let mock = Arc::new(MockBoard::new().with_time_reference(0, 0));
//! let (board, events) = Board::new(mock.clone(), EngineConfig::default());
//! mock.attach(&board);
//! board.initialize().await?;
//! ```

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::trace;

use super::transport::Transport;
use crate::board::Board;
use crate::error::{BoardError, Result};
use crate::logger::LogEntry;
use crate::registry::opcodes::{event, logging, macros, processor, sensor_fusion, timer};
use crate::registry::{ModuleId, INFO_REGISTER, READ_BIT};
use crate::types::ResourceClass;

/// Entries per readout notification
const ENTRIES_PER_FRAME: usize = 2;

/// What the mock reports for one module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockModule {
    pub implementation: u8,
    pub revision: u8,
    pub extra: Vec<u8>,
}

impl MockModule {
    pub fn new(implementation: u8, revision: u8) -> Self {
        Self {
            implementation,
            revision,
            extra: Vec::new(),
        }
    }

    pub fn with_extra(mut self, extra: &[u8]) -> Self {
        self.extra = extra.to_vec();
        self
    }
}

#[derive(Debug, Default)]
struct MockState {
    modules: BTreeMap<u8, MockModule>,
    live: BTreeMap<ResourceClass, BTreeSet<u8>>,
    silent: HashSet<ResourceClass>,
    silent_reads: HashSet<(u8, u8)>,
    logger_configs: BTreeMap<u8, Vec<u8>>,
    processor_configs: BTreeMap<u8, Vec<u8>>,
    /// Event entry waiting for its parameters frame
    pending_event: Option<Vec<u8>>,
    event_configs: BTreeMap<u8, Vec<u8>>,
    timers: BTreeMap<u8, Vec<u8>>,
    macros: BTreeMap<u8, Vec<Vec<u8>>>,
    /// Macro being recorded
    recording: Option<u8>,
    entries: Vec<LogEntry>,
    time_reference: (u32, u8),
    calibration: [u8; 3],
    page_completed: bool,
    /// Stop a readout after this many notifications
    readout_cutoff: Option<usize>,
    writes: Vec<Vec<u8>>,
}

impl MockState {
    fn capacity(&self, class: ResourceClass) -> u8 {
        self.modules
            .get(&(class.module() as u8))
            .and_then(|m| m.extra.first().copied())
            .unwrap_or_else(|| class.default_capacity())
    }

    /// Lowest free id of `class`, if any
    fn allocate(&mut self, class: ResourceClass) -> Option<u8> {
        let capacity = self.capacity(class);
        let live = self.live.entry(class).or_default();
        let id = (0..capacity).find(|id| !live.contains(id))?;
        live.insert(id);
        Some(id)
    }

    fn release(&mut self, class: ResourceClass, id: u8) {
        if let Some(live) = self.live.get_mut(&class) {
            live.remove(&id);
        }
    }
}

/// Simulated board
pub struct MockBoard {
    state: Mutex<MockState>,
    connected: AtomicBool,
    tx: UnboundedSender<Vec<u8>>,
    rx: Mutex<Option<UnboundedReceiver<Vec<u8>>>>,
}

impl Default for MockBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBoard {
    /// A board with every sensor and the resource modules at recent revisions
    pub fn new() -> Self {
        let (tx, rx) = unbounded_channel();
        let mut modules = BTreeMap::new();
        for (id, implementation, revision) in [
            (ModuleId::Switch, 0, 0),
            (ModuleId::Led, 0, 1),
            (ModuleId::Accelerometer, 1, 1),
            (ModuleId::Temperature, 1, 0),
            (ModuleId::Gpio, 0, 2),
            (ModuleId::Haptic, 0, 0),
            (ModuleId::Settings, 0, 6),
            (ModuleId::Barometer, 0, 0),
            (ModuleId::Gyro, 0, 1),
            (ModuleId::AmbientLight, 0, 0),
            (ModuleId::Magnetometer, 0, 1),
            (ModuleId::Humidity, 0, 0),
            (ModuleId::SensorFusion, 0, 1),
        ] {
            modules.insert(id as u8, MockModule::new(implementation, revision));
        }
        for (class, revision) in [
            (ResourceClass::Processor, 3),
            (ResourceClass::Event, 0),
            (ResourceClass::Logger, 2),
            (ResourceClass::Timer, 0),
            (ResourceClass::Macro, 1),
        ] {
            modules.insert(
                class.module() as u8,
                MockModule::new(0, revision).with_extra(&[class.default_capacity()]),
            );
        }

        Self {
            state: Mutex::new(MockState {
                modules,
                page_completed: false,
                calibration: [3, 3, 3],
                ..Default::default()
            }),
            connected: AtomicBool::new(true),
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_state(self, f: impl FnOnce(&mut MockState)) -> Self {
        f(&mut self.lock());
        self
    }

    pub fn with_module(self, id: ModuleId, module: MockModule) -> Self {
        self.with_state(|s| {
            s.modules.insert(id as u8, module);
        })
    }

    pub fn without_module(self, id: ModuleId) -> Self {
        self.with_state(|s| {
            s.modules.remove(&(id as u8));
        })
    }

    /// Report `capacity` ids for `class`
    pub fn with_capacity(self, class: ResourceClass, capacity: u8) -> Self {
        self.with_state(|s| {
            let module = s
                .modules
                .entry(class.module() as u8)
                .or_insert_with(|| MockModule::new(0, 0));
            if module.extra.is_empty() {
                module.extra.push(capacity);
            } else {
                module.extra[0] = capacity;
            }
        })
    }

    /// Never answer allocations of `class`
    pub fn with_silent(self, class: ResourceClass) -> Self {
        self.with_state(|s| {
            s.silent.insert(class);
        })
    }

    /// Never answer reads of `[module, register]` (register without read bit)
    pub fn with_silent_read(self, module: u8, register: u8) -> Self {
        self.with_state(|s| {
            s.silent_reads.insert((module, register | READ_BIT));
        })
    }

    /// Preload a logger: `config` is `[srcModule, srcRegister, srcIndex, attr]`
    pub fn with_logger_config(self, id: u8, config: &[u8]) -> Self {
        self.with_state(|s| {
            s.logger_configs.insert(id, config.to_vec());
            s.live.entry(ResourceClass::Logger).or_default().insert(id);
        })
    }

    /// Preload a processor: `config` is `[src(3), attr, type, config...]`
    pub fn with_processor_config(self, id: u8, config: &[u8]) -> Self {
        self.with_state(|s| {
            s.processor_configs.insert(id, config.to_vec());
            s.live.entry(ResourceClass::Processor).or_default().insert(id);
        })
    }

    pub fn with_log_entries(self, entries: impl IntoIterator<Item = LogEntry>) -> Self {
        self.with_state(|s| s.entries.extend(entries))
    }

    pub fn with_time_reference(self, tick: u32, reset_uid: u8) -> Self {
        self.with_state(|s| s.time_reference = (tick, reset_uid))
    }

    /// Interleave a page-completed notification in readouts
    pub fn with_page_completed(self) -> Self {
        self.with_state(|s| s.page_completed = true)
    }

    pub fn with_calibration(self, state: [u8; 3]) -> Self {
        self.with_state(|s| s.calibration = state)
    }

    /// Stop readouts after `frames` notifications, as if the link dropped
    pub fn with_readout_cutoff(self, frames: usize) -> Self {
        self.with_state(|s| s.readout_cutoff = Some(frames))
    }

    /// Deliver queued replies to `board` until the mock is dropped
    ///
    /// Must be called from within a tokio runtime, at most once.
    pub fn attach(&self, board: &Board) -> Option<JoinHandle<()>> {
        let mut rx = self
            .rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        let board = board.clone();
        Some(tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                board.handle_notification(&frame);
            }
        }))
    }

    /// Push an unsolicited notification, e.g. streamed data
    pub fn notify(&self, frame: &[u8]) {
        let _ = self.tx.send(frame.to_vec());
    }

    /// Drop the link; later writes fail
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    pub fn reconnect(&self) {
        self.connected.store(true, Ordering::SeqCst);
    }

    pub fn set_silent(&self, class: ResourceClass, silent: bool) {
        let mut state = self.lock();
        if silent {
            state.silent.insert(class);
        } else {
            state.silent.remove(&class);
        }
    }

    /// Every frame written so far
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.lock().writes.clone()
    }

    pub fn take_writes(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.lock().writes)
    }

    pub fn clear_writes(&self) {
        self.lock().writes.clear();
    }

    pub fn live_ids(&self, class: ResourceClass) -> Vec<u8> {
        self.lock()
            .live
            .get(&class)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn logger_config(&self, id: u8) -> Option<Vec<u8>> {
        self.lock().logger_configs.get(&id).cloned()
    }

    pub fn processor_config(&self, id: u8) -> Option<Vec<u8>> {
        self.lock().processor_configs.get(&id).cloned()
    }

    pub fn event_config(&self, id: u8) -> Option<Vec<u8>> {
        self.lock().event_configs.get(&id).cloned()
    }

    pub fn macro_commands(&self, id: u8) -> Option<Vec<Vec<u8>>> {
        self.lock().macros.get(&id).cloned()
    }

    pub fn log_entry_count(&self) -> usize {
        self.lock().entries.len()
    }

    fn reply(&self, frame: Vec<u8>) {
        trace!("mock reply {:02x?}", frame);
        let _ = self.tx.send(frame);
    }

    fn allocation_reply(&self, state: &mut MockState, class: ResourceClass) -> Option<u8> {
        if state.silent.contains(&class) {
            return None;
        }
        let id = state.allocate(class)?;
        self.reply(vec![class.module() as u8, class.creation_opcode(), id]);
        Some(id)
    }

    fn handle_read(&self, state: &mut MockState, module: u8, register: u8, args: &[u8]) {
        if state.silent_reads.contains(&(module, register)) {
            return;
        }
        let mut reply = vec![module, register];
        if register == INFO_REGISTER {
            if let Some(info) = state.modules.get(&module) {
                reply.extend([info.implementation, info.revision]);
                reply.extend(&info.extra);
            }
            return self.reply(reply);
        }

        let id = args.first().copied();
        match (ModuleId::from_u8(module), register & !READ_BIT) {
            (Some(ModuleId::Logging), logging::TRIGGER) => {
                if let Some(config) = id.and_then(|id| state.logger_configs.get(&id)) {
                    reply.extend(config);
                }
            }
            (Some(ModuleId::DataProcessor), processor::ADD) => {
                if let Some(config) = id.and_then(|id| state.processor_configs.get(&id)) {
                    reply.extend(config);
                }
            }
            (Some(ModuleId::Logging), logging::TIME) => {
                let (tick, uid) = state.time_reference;
                reply.extend(tick.to_le_bytes());
                reply.push(uid);
            }
            (Some(ModuleId::Logging), logging::LENGTH) => {
                reply.extend((state.entries.len() as u32).to_le_bytes());
            }
            (Some(ModuleId::SensorFusion), sensor_fusion::CALIBRATION_STATE) => {
                reply.extend(state.calibration);
            }
            _ => {}
        }
        self.reply(reply);
    }

    fn handle_readout(&self, state: &mut MockState, count: u32, notify_delta: u32) {
        let entries: Vec<LogEntry> = state
            .entries
            .iter()
            .take(count as usize)
            .copied()
            .collect();
        let total = entries.len() as u32;
        let mut frames = Vec::new();
        let mut sent = 0u32;
        let mut next_progress = notify_delta.max(1);

        for chunk in entries.chunks(ENTRIES_PER_FRAME) {
            let mut frame = vec![ModuleId::Logging as u8, logging::READOUT_NOTIFY];
            for entry in chunk {
                frame.extend(entry.to_bytes());
            }
            frames.push(frame);
            sent += chunk.len() as u32;
            if sent >= next_progress && sent < total {
                let mut progress = vec![ModuleId::Logging as u8, logging::READOUT_PROGRESS];
                progress.extend((total - sent).to_le_bytes());
                frames.push(progress);
                next_progress += notify_delta.max(1);
            }
            if state.page_completed && frames.len() == 1 {
                frames.push(vec![ModuleId::Logging as u8, logging::READOUT_PAGE_COMPLETED]);
            }
        }
        let mut done = vec![ModuleId::Logging as u8, logging::READOUT_PROGRESS];
        done.extend(0u32.to_le_bytes());
        frames.push(done);

        if let Some(cutoff) = state.readout_cutoff {
            frames.truncate(cutoff);
        }
        for frame in frames {
            self.reply(frame);
        }
    }

    fn handle_write(&self, state: &mut MockState, frame: &[u8]) {
        let [module, register, args @ ..] = frame else {
            return;
        };
        let (module, register) = (*module, *register);
        if register & READ_BIT != 0 {
            return self.handle_read(state, module, register, args);
        }

        let id = args.first().copied();
        match ModuleId::from_u8(module) {
            Some(ModuleId::DataProcessor) => match register {
                processor::ADD => {
                    if let Some(id) = self.allocation_reply(state, ResourceClass::Processor) {
                        state.processor_configs.insert(id, args.to_vec());
                    }
                }
                processor::PARAMETER => {
                    if let (Some(id), Some(existing)) =
                        (id, id.and_then(|id| state.processor_configs.get_mut(&id)))
                    {
                        trace!("mock processor {} reconfigured", id);
                        existing.truncate(4);
                        existing.extend(&args[1..]);
                    }
                }
                processor::REMOVE => {
                    if let Some(id) = id {
                        state.processor_configs.remove(&id);
                        state.release(ResourceClass::Processor, id);
                    }
                }
                _ => {}
            },
            Some(ModuleId::Logging) => match register {
                logging::TRIGGER => {
                    if let Some(id) = self.allocation_reply(state, ResourceClass::Logger) {
                        state.logger_configs.insert(id, args.to_vec());
                    }
                }
                logging::REMOVE => {
                    if let Some(id) = id {
                        state.logger_configs.remove(&id);
                        state.release(ResourceClass::Logger, id);
                    }
                }
                logging::READOUT => {
                    if let [c0, c1, c2, c3, d0, d1, d2, d3, ..] = args {
                        let count = u32::from_le_bytes([*c0, *c1, *c2, *c3]);
                        let delta = u32::from_le_bytes([*d0, *d1, *d2, *d3]);
                        self.handle_readout(state, count, delta);
                    }
                }
                logging::REMOVE_ENTRIES => state.entries.clear(),
                _ => {}
            },
            Some(ModuleId::Event) => match register {
                event::ENTRY => state.pending_event = Some(args.to_vec()),
                event::CMD_PARAMETERS => {
                    let mut config = state.pending_event.take().unwrap_or_default();
                    config.extend(args);
                    if let Some(id) = self.allocation_reply(state, ResourceClass::Event) {
                        state.event_configs.insert(id, config);
                    }
                }
                event::REMOVE => {
                    if let Some(id) = id {
                        state.event_configs.remove(&id);
                        state.release(ResourceClass::Event, id);
                    }
                }
                _ => {}
            },
            Some(ModuleId::Timer) => match register {
                timer::CREATE => {
                    if let Some(id) = self.allocation_reply(state, ResourceClass::Timer) {
                        state.timers.insert(id, args.to_vec());
                    }
                }
                timer::REMOVE => {
                    if let Some(id) = id {
                        state.timers.remove(&id);
                        state.release(ResourceClass::Timer, id);
                    }
                }
                _ => {}
            },
            Some(ModuleId::Macro) => match register {
                macros::BEGIN => {
                    let recording = self.allocation_reply(state, ResourceClass::Macro);
                    if let Some(id) = recording {
                        state.macros.insert(id, Vec::new());
                    }
                    state.recording = recording;
                }
                macros::ADD_COMMAND => {
                    if let Some(commands) = state.recording.and_then(|id| state.macros.get_mut(&id)) {
                        commands.push(args.to_vec());
                    }
                }
                macros::END => state.recording = None,
                macros::ERASE_ALL => {
                    state.macros.clear();
                    state.live.remove(&ResourceClass::Macro);
                }
                _ => {}
            },
            _ => {}
        }
    }
}

impl Transport for MockBoard {
    fn write(&self, frame: &[u8]) -> Result<()> {
        if !self.is_connected() {
            return Err(BoardError::ConnectionLost);
        }
        let mut state = self.lock();
        state.writes.push(frame.to_vec());
        self.handle_write(&mut state, frame);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut UnboundedReceiver<Vec<u8>>) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    fn mock() -> (MockBoard, UnboundedReceiver<Vec<u8>>) {
        let mock = MockBoard::new();
        let rx = mock.rx.lock().unwrap().take().unwrap();
        (mock, rx)
    }

    #[test]
    fn test_allocations_take_lowest_free_id() {
        let (mock, mut rx) = mock();
        mock.write(&[0x0c, 0x02, 0xe8, 0x03, 0, 0, 0xff, 0xff, 0]).unwrap();
        mock.write(&[0x0c, 0x02, 0xe8, 0x03, 0, 0, 0xff, 0xff, 0]).unwrap();
        mock.write(&[0x0c, 0x05, 0x00]).unwrap();
        mock.write(&[0x0c, 0x02, 0xe8, 0x03, 0, 0, 0xff, 0xff, 0]).unwrap();
        assert_eq!(
            drain(&mut rx),
            vec![vec![0x0c, 0x02, 0x00], vec![0x0c, 0x02, 0x01], vec![0x0c, 0x02, 0x00]]
        );
    }

    #[test]
    fn test_absent_module_info() {
        let (mock, mut rx) = mock();
        mock.write(&[0x07, 0x80]).unwrap();
        mock.write(&[0x09, 0x80]).unwrap();
        let frames = drain(&mut rx);
        assert_eq!(frames[0], vec![0x07, 0x80]);
        assert_eq!(frames[1], vec![0x09, 0x80, 0x00, 0x03, 28]);
    }

    #[test]
    fn test_readout_ends_with_zero_progress() {
        let entries = (0..5).map(|i| LogEntry {
            logger_id: 0,
            reset_uid: 0,
            tick: i,
            data: [i as u8, 0, 0, 0],
        });
        let mock = MockBoard::new().with_log_entries(entries);
        let mut rx = mock.rx.lock().unwrap().take().unwrap();
        mock.write(&[0x0b, 0x06, 5, 0, 0, 0, 2, 0, 0, 0]).unwrap();

        let frames = drain(&mut rx);
        let readouts = frames.iter().filter(|f| f[1] == 0x07).count();
        assert_eq!(readouts, 3);
        assert_eq!(frames.last().unwrap(), &vec![0x0b, 0x08, 0, 0, 0, 0]);
        assert!(frames.contains(&vec![0x0b, 0x08, 3, 0, 0, 0]));
    }

    #[test]
    fn test_disconnected_write_fails() {
        let (mock, _rx) = mock();
        mock.disconnect();
        assert!(mock.write(&[0x01, 0x80]).unwrap_err().is_connection_lost());
        mock.reconnect();
        assert!(mock.write(&[0x01, 0x80]).is_ok());
    }
}
