//! Transport trait for the board link
//!
//! The engine only ever writes whole command frames and receives whole
//! notification frames. Notifications are pushed into
//! [`Board::handle_notification`](crate::board::Board::handle_notification)
//! by whoever owns the link; this trait only covers the write side.

use crate::error::Result;
use std::time::Instant;

/// Statistics for link traffic
#[derive(Debug, Clone, Default)]
pub struct TransportStats {
    /// Frames written to the board
    pub frames_written: u64,
    /// Bytes written to the board
    pub bytes_written: u64,
    /// Writes the transport rejected
    pub failed_writes: u64,
    /// Notifications received
    pub frames_received: u64,
    /// Bytes received
    pub bytes_received: u64,
    /// Notifications dropped as stale, duplicate or unroutable
    pub frames_dropped: u64,
    /// Time of the last notification
    pub last_received: Option<Instant>,
}

impl TransportStats {
    pub fn record_write(&mut self, bytes: usize) {
        self.frames_written += 1;
        self.bytes_written += bytes as u64;
    }

    pub fn record_failure(&mut self) {
        self.failed_writes += 1;
    }

    pub fn record_received(&mut self, bytes: usize) {
        self.frames_received += 1;
        self.bytes_received += bytes as u64;
        self.last_received = Some(Instant::now());
    }

    pub fn record_dropped(&mut self) {
        self.frames_dropped += 1;
    }

    /// Percentage of writes that succeeded
    pub fn write_success_rate(&self) -> f64 {
        let total = self.frames_written + self.failed_writes;
        if total == 0 {
            100.0
        } else {
            (self.frames_written as f64 / total as f64) * 100.0
        }
    }

    /// Reset all statistics
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Write half of the board link
///
/// Implementations must be `Send + Sync`: the board shares one transport
/// between every pending operation. `write` must not call back into the
/// board synchronously; replies are delivered through
/// `Board::handle_notification` from another task.
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send + Sync {
    /// Send one command frame
    fn write(&self, frame: &[u8]) -> Result<()>;

    /// Whether the link is up
    fn is_connected(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_success_rate() {
        let mut stats = TransportStats::default();
        assert_eq!(stats.write_success_rate(), 100.0);
        stats.record_write(3);
        stats.record_write(4);
        stats.record_write(5);
        stats.record_failure();
        assert_eq!(stats.bytes_written, 12);
        assert_eq!(stats.write_success_rate(), 75.0);
        stats.reset();
        assert_eq!(stats.frames_written, 0);
    }

    #[test]
    fn test_received_updates_timestamp() {
        let mut stats = TransportStats::default();
        assert!(stats.last_received.is_none());
        stats.record_received(9);
        assert!(stats.last_received.is_some());
        assert_eq!(stats.bytes_received, 9);
    }
}
