//! Test data builders for creating routes and log entries

use boardlink::logger::LogEntry;
use boardlink::route::RouteGraph;
use boardlink::signal::catalog;

/// Builder for a run of log entries from one logger
pub struct EntryBuilder {
    logger_id: u8,
    reset_uid: u8,
    tick: u32,
    step: u32,
    entries: Vec<LogEntry>,
}

impl EntryBuilder {
    pub fn new(logger_id: u8) -> Self {
        Self {
            logger_id,
            reset_uid: 0,
            tick: 0,
            step: 1,
            entries: Vec::new(),
        }
    }

    pub fn reset_uid(mut self, uid: u8) -> Self {
        self.reset_uid = uid;
        self
    }

    pub fn starting_at(mut self, tick: u32) -> Self {
        self.tick = tick;
        self
    }

    /// Ticks between consecutive entries
    pub fn every(mut self, ticks: u32) -> Self {
        self.step = ticks;
        self
    }

    /// Append one entry carrying `value` as little-endian bytes
    pub fn value(mut self, value: u32) -> Self {
        self.entries.push(LogEntry {
            logger_id: self.logger_id,
            reset_uid: self.reset_uid,
            tick: self.tick,
            data: value.to_le_bytes(),
        });
        self.tick = self.tick.wrapping_add(self.step);
        self
    }

    pub fn values(self, values: impl IntoIterator<Item = u32>) -> Self {
        values.into_iter().fold(self, |b, v| b.value(v))
    }

    pub fn build(self) -> Vec<LogEntry> {
        self.entries
    }
}

/// Switch presses streamed to the client
pub fn switch_stream() -> RouteGraph {
    RouteGraph::build(catalog::switch(), |root| root.stream())
}

/// Switch presses logged on the board
pub fn switch_log() -> RouteGraph {
    RouteGraph::build(catalog::switch(), |root| root.log())
}

/// Raw acceleration streamed to the client
pub fn acceleration_stream() -> RouteGraph {
    RouteGraph::build(catalog::acceleration(), |root| root.stream())
}

/// Angular velocity RMS, accumulated and logged, with both processors named
pub fn rms_accumulate_log(rms: &str, total: &str) -> RouteGraph {
    RouteGraph::build(catalog::angular_velocity(), |root| {
        root.rms().name(rms).accumulate().name(total).log();
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_builder_advances_ticks() {
        let entries = EntryBuilder::new(2)
            .starting_at(10)
            .every(5)
            .values([1, 2, 3])
            .build();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[2].tick, 20);
        assert_eq!(entries[1].data, [2, 0, 0, 0]);
        assert!(entries.iter().all(|e| e.logger_id == 2));
    }
}
