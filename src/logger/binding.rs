//! Logger bindings and multi-part reassembly.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

use super::decoder::LogEntry;
use crate::route::RouteId;
use crate::signal::{SignalShape, SourceAddress};

/// One logger of a binding and the frame slice it records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundPart {
    pub logger_id: u8,
    /// Offset into the logged frame
    pub offset: u8,
    pub length: u8,
}

/// What a set of loggers records and how to decode it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggerBinding {
    pub name: String,
    /// Owning route; `None` for reconstructed bindings until adopted
    pub route: Option<RouteId>,
    /// Plan node index of the log terminal
    pub terminal: Option<usize>,
    pub source: SourceAddress,
    /// Shape of the logged frame
    pub shape: SignalShape,
    /// In frame order
    pub parts: Vec<BoundPart>,
}

impl LoggerBinding {
    pub fn logger_ids(&self) -> impl Iterator<Item = u8> + '_ {
        self.parts.iter().map(|p| p.logger_id)
    }

    pub fn frame_len(&self) -> usize {
        self.parts.iter().map(|p| p.length as usize).sum()
    }

    pub fn is_multi_part(&self) -> bool {
        self.parts.len() > 1
    }
}

/// A frame put back together from its loggers' entries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledFrame {
    pub binding: usize,
    /// Entry of the first part; its tick stamps the frame
    pub head: LogEntry,
    pub bytes: Vec<u8>,
}

/// Routes log entries to bindings and reassembles multi-part frames
///
/// Parts of one frame are logged back to back with the same tick, but entries
/// of different loggers may interleave with other bindings in a readout. Each
/// part keeps a queue; a frame is emitted once every part has an entry.
#[derive(Debug, Clone, Default)]
pub struct LogDemux {
    bindings: Vec<LoggerBinding>,
    by_logger: HashMap<u8, (usize, usize)>,
    queues: Vec<Vec<VecDeque<LogEntry>>>,
}

impl LogDemux {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, binding: LoggerBinding) -> usize {
        let idx = self.bindings.len();
        for (part, logger_id) in binding.logger_ids().enumerate() {
            self.by_logger.insert(logger_id, (idx, part));
        }
        self.queues.push(vec![VecDeque::new(); binding.parts.len()]);
        self.bindings.push(binding);
        idx
    }

    /// Drop every binding owning any of `logger_ids`
    pub fn remove_loggers(&mut self, logger_ids: &[u8]) {
        let keep: Vec<LoggerBinding> = self
            .bindings
            .drain(..)
            .filter(|b| !b.logger_ids().any(|id| logger_ids.contains(&id)))
            .collect();
        self.by_logger.clear();
        self.queues.clear();
        for binding in keep {
            self.insert(binding);
        }
    }

    pub fn bindings(&self) -> &[LoggerBinding] {
        &self.bindings
    }

    pub fn binding(&self, idx: usize) -> Option<&LoggerBinding> {
        self.bindings.get(idx)
    }

    pub fn binding_for(&self, logger_id: u8) -> Option<&LoggerBinding> {
        self.by_logger
            .get(&logger_id)
            .and_then(|(idx, _)| self.bindings.get(*idx))
    }

    /// Feed one entry; returns a frame when it completes one
    ///
    /// Entries of unknown loggers return `None`.
    pub fn ingest(&mut self, entry: LogEntry) -> Option<AssembledFrame> {
        let &(idx, part) = self.by_logger.get(&entry.logger_id)?;
        let queues = self.queues.get_mut(idx)?;
        queues.get_mut(part)?.push_back(entry);
        if queues.iter().any(VecDeque::is_empty) {
            return None;
        }

        let binding = self.bindings.get(idx)?;
        let entries: Vec<LogEntry> = queues.iter_mut().filter_map(VecDeque::pop_front).collect();
        let mut bytes = Vec::with_capacity(binding.frame_len());
        for (entry, part) in entries.iter().zip(&binding.parts) {
            bytes.extend_from_slice(&entry.data[..(part.length as usize).min(entry.data.len())]);
        }
        Some(AssembledFrame {
            binding: idx,
            head: entries[0],
            bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::catalog;

    fn entry(logger_id: u8, tick: u32, data: [u8; 4]) -> LogEntry {
        LogEntry {
            logger_id,
            reset_uid: 0,
            tick,
            data,
        }
    }

    fn acceleration_binding() -> LoggerBinding {
        let acc = catalog::acceleration();
        LoggerBinding {
            name: "acceleration".into(),
            route: None,
            terminal: None,
            source: acc.source,
            shape: acc.shape,
            parts: vec![
                BoundPart {
                    logger_id: 2,
                    offset: 0,
                    length: 4,
                },
                BoundPart {
                    logger_id: 3,
                    offset: 4,
                    length: 2,
                },
            ],
        }
    }

    #[test]
    fn test_multi_part_waits_for_all_parts() {
        let mut demux = LogDemux::new();
        demux.insert(acceleration_binding());

        assert!(demux.ingest(entry(2, 10, [1, 0, 2, 0])).is_none());
        assert!(demux.ingest(entry(2, 11, [4, 0, 5, 0])).is_none());
        let frame = demux.ingest(entry(3, 10, [3, 0, 0xee, 0xee])).unwrap();
        assert_eq!(frame.bytes, vec![1, 0, 2, 0, 3, 0]);
        assert_eq!(frame.head.tick, 10);

        let frame = demux.ingest(entry(3, 11, [6, 0, 0, 0])).unwrap();
        assert_eq!(frame.bytes, vec![4, 0, 5, 0, 6, 0]);
    }

    #[test]
    fn test_unknown_logger_ignored() {
        let mut demux = LogDemux::new();
        demux.insert(acceleration_binding());
        assert!(demux.ingest(entry(7, 0, [0; 4])).is_none());
    }

    #[test]
    fn test_remove_loggers_reindexes() {
        let mut demux = LogDemux::new();
        demux.insert(acceleration_binding());
        let mut switch = acceleration_binding();
        switch.name = "switch".into();
        switch.parts = vec![BoundPart {
            logger_id: 5,
            offset: 0,
            length: 1,
        }];
        demux.insert(switch);

        demux.remove_loggers(&[2, 3]);
        assert_eq!(demux.bindings().len(), 1);
        assert_eq!(demux.binding_for(5).unwrap().name, "switch");
        assert!(demux.binding_for(2).is_none());
        assert!(demux.ingest(entry(5, 0, [1, 0, 0, 0])).is_some());
    }
}
