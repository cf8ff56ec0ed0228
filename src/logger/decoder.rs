//! Readout parsing and tick reconstruction.
//!
//! The board counts time in 32-bit ticks of a free-running counter and only
//! ever sends the raw counter value. [`TickReconciler`] extends those raw
//! values to 64 bits per source and reset generation, starting from the
//! generation's reference tick and treating a drop of more than half the
//! counter range as a wrap. [`EpochClock`] anchors extended ticks to wall
//! clock time through the reference the board reports for each reset.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::trace;

use crate::error::{BoardError, Result};
use crate::registry::opcodes::logging::{ENTRY_DATA_LEN, ENTRY_LEN};

/// Default tick period: 48 / 32768 s
pub const DEFAULT_TICK_PERIOD_US: f64 = 48.0 / 32768.0 * 1_000_000.0;

/// One stored log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub logger_id: u8,
    /// Generation counter of the board's clock at the time of logging
    pub reset_uid: u8,
    pub tick: u32,
    pub data: [u8; ENTRY_DATA_LEN],
}

impl LogEntry {
    /// Parse one 9-byte entry: `(id | uid << 5), tick(4 LE), data(4)`
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < ENTRY_LEN {
            return Err(BoardError::Protocol(format!(
                "log entry needs {} bytes, got {}",
                ENTRY_LEN,
                bytes.len()
            )));
        }
        Ok(Self {
            logger_id: bytes[0] & 0x1f,
            reset_uid: (bytes[0] >> 5) & 0x07,
            tick: u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]),
            data: [bytes[5], bytes[6], bytes[7], bytes[8]],
        })
    }

    pub fn to_bytes(&self) -> [u8; ENTRY_LEN] {
        let tick = self.tick.to_le_bytes();
        [
            (self.logger_id & 0x1f) | (self.reset_uid << 5),
            tick[0],
            tick[1],
            tick[2],
            tick[3],
            self.data[0],
            self.data[1],
            self.data[2],
            self.data[3],
        ]
    }
}

/// Split a readout payload (after `[0x0b, 0x07]`) into its entries
///
/// A trailing fragment shorter than one entry is padding and is skipped.
pub fn parse_readout(payload: &[u8]) -> Result<Vec<LogEntry>> {
    let chunks = payload.chunks_exact(ENTRY_LEN);
    if !chunks.remainder().is_empty() {
        trace!(
            "ignoring {} trailing readout bytes",
            chunks.remainder().len()
        );
    }
    chunks.map(LogEntry::parse).collect()
}

/// Who produced a tick value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TickSource {
    Logger(u8),
    /// Accounted processor output streamed live
    Processor(u8),
}

/// Extends raw 32-bit ticks to a signed 64-bit count, per source and clock
/// generation
///
/// Extended ticks share the scale of the raw counter: a tick equal to its
/// generation's reference tick extends to that same value.
#[derive(Debug, Clone, Default)]
pub struct TickReconciler {
    last: HashMap<(TickSource, u8), (u32, i64)>,
}

impl TickReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extended tick for `raw`, logged under `reset_uid`
    ///
    /// The first tick of a source in a generation is placed against `anchor`,
    /// the tick of that generation's time reference, when one is known. Later
    /// ticks are placed against the previous one. The raw distance is read as
    /// signed: a drop of more than half the counter range is a forward wrap and
    /// a smaller drop is an earlier sample.
    pub fn extend(&mut self, source: TickSource, reset_uid: u8, raw: u32, anchor: Option<u32>) -> i64 {
        let key = (source, reset_uid);
        let (last_raw, last_ext) = self
            .last
            .get(&key)
            .copied()
            .or_else(|| anchor.map(|tick| (tick, tick as i64)))
            .unwrap_or((raw, raw as i64));

        let delta = raw.wrapping_sub(last_raw) as i32 as i64;
        if raw < last_raw && delta > 0 {
            trace!("{:?} tick wrapped {:#x} -> {:#x}", source, last_raw, raw);
        }
        let extended = last_ext + delta;
        self.last.insert(key, (raw, extended));
        extended
    }

    /// Drop `source`'s history in every generation
    pub fn forget(&mut self, source: TickSource) {
        self.last.retain(|(s, _), _| *s != source);
    }
}

/// Board time reference for one clock generation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeReference {
    pub reset_uid: u8,
    pub tick: u32,
    /// Wall clock time at which the board reported `tick`
    pub epoch: DateTime<Utc>,
}

/// Maps extended ticks to wall clock time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochClock {
    references: BTreeMap<u8, TimeReference>,
    latest: Option<u8>,
    tick_period_us: f64,
}

impl Default for EpochClock {
    fn default() -> Self {
        Self::new(DEFAULT_TICK_PERIOD_US)
    }
}

impl EpochClock {
    pub fn new(tick_period_us: f64) -> Self {
        Self {
            references: BTreeMap::new(),
            latest: None,
            tick_period_us,
        }
    }

    /// Parse a time reference payload (after `[0x0b, 0x84]`): `tick(4 LE), resetUid`
    pub fn parse_reference(payload: &[u8], epoch: DateTime<Utc>) -> Result<TimeReference> {
        match payload {
            [t0, t1, t2, t3, uid, ..] => Ok(TimeReference {
                reset_uid: *uid,
                tick: u32::from_le_bytes([*t0, *t1, *t2, *t3]),
                epoch,
            }),
            _ => Err(BoardError::Protocol(format!(
                "time reference needs 5 bytes, got {}",
                payload.len()
            ))),
        }
    }

    pub fn set_reference(&mut self, reference: TimeReference) {
        self.latest = Some(reference.reset_uid);
        self.references.insert(reference.reset_uid, reference);
    }

    /// Reference for `reset_uid`, or the most recent one when the board reset
    /// since that generation was recorded
    pub fn reference(&self, reset_uid: u8) -> Option<&TimeReference> {
        self.references
            .get(&reset_uid)
            .or_else(|| self.latest.and_then(|uid| self.references.get(&uid)))
    }

    /// Reset uid of the most recent reference
    pub fn latest_reset_uid(&self) -> Option<u8> {
        self.latest
    }

    /// Wall clock time of an extended tick
    pub fn timestamp(&self, reset_uid: u8, extended_tick: i64) -> Option<DateTime<Utc>> {
        let reference = self.reference(reset_uid)?;
        let delta = extended_tick - reference.tick as i64;
        let micros = (delta as f64 * self.tick_period_us).round() as i64;
        Some(reference.epoch + ChronoDuration::microseconds(micros))
    }

    /// Duration of `ticks` in microseconds
    pub fn ticks_to_micros(&self, ticks: i64) -> f64 {
        ticks as f64 * self.tick_period_us
    }
}
