//! Resource-ID correlator
//!
//! Pairs commands that make the board assign an id with the notification
//! reporting it. Boards answer in submission order, so each resource class
//! keeps a FIFO of pending slots and a reply always completes the oldest one;
//! nothing in the reply's content is matched.
//!
//! A per-class async gate keeps at most one allocation of a class in flight.
//! Classes are independent, so a logger and a timer allocation may interleave
//! on the wire.
//!
//! Register reads (`[module, register | 0x80]`) use the same machinery keyed
//! by `(module, register)`.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::backend::Transport;
use crate::error::{BoardError, Result};
use crate::registry::READ_BIT;
use crate::types::{PendingKey, ResourceClass};

struct PendingSlot<T> {
    ticket: u64,
    tx: oneshot::Sender<Result<T>>,
}

struct ClassState {
    capacity: u8,
    /// Ids the board has handed out and not yet released
    live: BTreeSet<u8>,
    pending: VecDeque<PendingSlot<u8>>,
}

impl ClassState {
    fn new(class: ResourceClass) -> Self {
        Self {
            capacity: class.default_capacity(),
            live: BTreeSet::new(),
            pending: VecDeque::new(),
        }
    }
}

#[derive(Default)]
struct CorrelatorState {
    classes: BTreeMap<ResourceClass, ClassState>,
    reads: HashMap<(u8, u8), VecDeque<PendingSlot<Vec<u8>>>>,
    next_ticket: u64,
}

impl CorrelatorState {
    fn class(&mut self, class: ResourceClass) -> &mut ClassState {
        self.classes
            .entry(class)
            .or_insert_with(|| ClassState::new(class))
    }

    fn ticket(&mut self) -> u64 {
        self.next_ticket += 1;
        self.next_ticket
    }
}

/// Per-class FIFO correlation of board replies
pub struct Correlator {
    state: Mutex<CorrelatorState>,
    gates: BTreeMap<ResourceClass, Arc<tokio::sync::Mutex<()>>>,
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

impl Correlator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CorrelatorState::default()),
            gates: ResourceClass::ALL
                .into_iter()
                .map(|c| (c, Arc::new(tokio::sync::Mutex::new(()))))
                .collect(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CorrelatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Send `frames` and wait for the id the board assigns
    ///
    /// Fails with `ResourceTimeout` without writing anything when the class
    /// has no ids left, and with `ResourceTimeout` after `timeout` when the
    /// board stays silent. A timed-out slot is removed so that a late reply
    /// is dropped instead of completing the next request.
    pub async fn allocate(
        &self,
        class: ResourceClass,
        frames: &[Vec<u8>],
        transport: &dyn Transport,
        timeout: Duration,
    ) -> Result<u8> {
        let gate = self
            .gates
            .get(&class)
            .cloned()
            .unwrap_or_else(|| Arc::new(tokio::sync::Mutex::new(())));
        let _in_flight = gate.lock().await;
        let key = PendingKey::Allocation(class);

        let (ticket, rx) = {
            let mut state = self.lock();
            let ticket = state.ticket();
            let entry = state.class(class);
            if entry.live.len() >= entry.capacity as usize {
                debug!(
                    "{} capacity of {} exhausted, not transmitting",
                    class, entry.capacity
                );
                return Err(BoardError::ResourceTimeout { key });
            }

            let (tx, rx) = oneshot::channel();
            entry.pending.push_back(PendingSlot { ticket, tx });
            // written under the lock so queue order matches wire order
            for frame in frames {
                if let Err(e) = transport.write(frame) {
                    state.class(class).pending.retain(|p| p.ticket != ticket);
                    return Err(e);
                }
            }
            trace!("{} allocation #{} sent", class, ticket);
            (ticket, rx)
        };

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BoardError::ConnectionLost),
            Err(_) => {
                self.lock()
                    .class(class)
                    .pending
                    .retain(|p| p.ticket != ticket);
                warn!("{} timed out after {:?}", key, timeout);
                Err(BoardError::ResourceTimeout { key })
            }
        }
    }

    /// Bind an id reported by the board to the oldest pending allocation
    ///
    /// Returns false, dropping the reply, when nothing is pending.
    pub fn complete(&self, class: ResourceClass, id: u8) -> bool {
        let mut state = self.lock();
        let entry = state.class(class);
        let Some(slot) = entry.pending.pop_front() else {
            debug!("dropping stale {} id {}", class, id);
            return false;
        };
        entry.live.insert(id);
        debug!("{} allocation #{} bound to id {}", class, slot.ticket, id);
        if slot.tx.send(Ok(id)).is_err() {
            // the waiter gave up between timing out and removing its slot
            entry.live.remove(&id);
        }
        true
    }

    /// Return an id to its class
    pub fn release(&self, class: ResourceClass, id: u8) {
        self.lock().class(class).live.remove(&id);
    }

    /// Record ids already held on the board (restored or reconstructed state)
    pub fn mark_live(&self, class: ResourceClass, ids: impl IntoIterator<Item = u8>) {
        self.lock().class(class).live.extend(ids);
    }

    pub fn live_ids(&self, class: ResourceClass) -> Vec<u8> {
        self.lock().class(class).live.iter().copied().collect()
    }

    pub fn set_capacity(&self, class: ResourceClass, capacity: u8) {
        self.lock().class(class).capacity = capacity;
    }

    pub fn capacity(&self, class: ResourceClass) -> u8 {
        self.lock().class(class).capacity
    }

    /// Number of allocations and reads still waiting
    pub fn pending_count(&self) -> usize {
        let state = self.lock();
        state.classes.values().map(|c| c.pending.len()).sum::<usize>()
            + state.reads.values().map(VecDeque::len).sum::<usize>()
    }

    /// Send a register read and wait for its response payload
    ///
    /// The payload excludes the `[module, register]` header; an empty payload
    /// is a valid answer.
    pub async fn read(
        &self,
        frame: &[u8],
        transport: &dyn Transport,
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        let (module, register) = match frame {
            [module, register, ..] => (*module, *register | READ_BIT),
            _ => {
                return Err(BoardError::Protocol(format!(
                    "register read needs [module, register], got {:02x?}",
                    frame
                )))
            }
        };
        let key = PendingKey::Read { module, register };

        let (ticket, rx) = {
            let mut state = self.lock();
            let ticket = state.ticket();
            let (tx, rx) = oneshot::channel();
            state
                .reads
                .entry((module, register))
                .or_default()
                .push_back(PendingSlot { ticket, tx });
            if let Err(e) = transport.write(frame) {
                Self::drop_read(&mut state, (module, register), ticket);
                return Err(e);
            }
            (ticket, rx)
        };

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BoardError::ConnectionLost),
            Err(_) => {
                Self::drop_read(&mut self.lock(), (module, register), ticket);
                warn!("{} timed out after {:?}", key, timeout);
                Err(BoardError::ResourceTimeout { key })
            }
        }
    }

    fn drop_read(state: &mut CorrelatorState, key: (u8, u8), ticket: u64) {
        if let Some(queue) = state.reads.get_mut(&key) {
            queue.retain(|p| p.ticket != ticket);
        }
    }

    /// Deliver a read response; false when no read of that register is pending
    pub fn complete_read(&self, module: u8, register: u8, payload: &[u8]) -> bool {
        let mut state = self.lock();
        let Some(slot) = state
            .reads
            .get_mut(&(module, register))
            .and_then(VecDeque::pop_front)
        else {
            return false;
        };
        let _ = slot.tx.send(Ok(payload.to_vec()));
        true
    }

    /// Fail everything pending with `ConnectionLost`
    pub fn fail_all(&self) -> usize {
        let mut state = self.lock();
        let mut failed = 0;
        for entry in state.classes.values_mut() {
            for slot in entry.pending.drain(..) {
                let _ = slot.tx.send(Err(BoardError::ConnectionLost));
                failed += 1;
            }
        }
        for queue in state.reads.values_mut() {
            for slot in queue.drain(..) {
                let _ = slot.tx.send(Err(BoardError::ConnectionLost));
                failed += 1;
            }
        }
        failed
    }
}
