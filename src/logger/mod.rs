//! On-board logger: entry decoding, bindings and downloads
//!
//! # Main Types
//!
//! - [`LogDecoder`] - Turns readout payloads into timestamped samples
//! - [`LoggerBinding`] - What a set of logger ids records
//! - [`DownloadSession`] - Readout handshake state
//! - [`TickReconciler`] / [`EpochClock`] - 32-bit tick extension and wall clock mapping

pub mod binding;
pub mod decoder;
pub mod download;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::{debug, trace};

pub use binding::{AssembledFrame, BoundPart, LogDemux, LoggerBinding};
pub use decoder::{
    parse_readout, EpochClock, LogEntry, TickReconciler, TickSource, TimeReference,
    DEFAULT_TICK_PERIOD_US,
};
pub use download::{DownloadSession, DownloadState, DownloadSummary, ProgressCallback};

use crate::error::Result;
use crate::route::RouteId;
use crate::signal::decode::decode_frame;
use crate::types::Sample;

/// A decoded sample together with the binding that logged it
#[derive(Debug, Clone, PartialEq)]
pub struct LoggedSample {
    pub binding: String,
    pub route: Option<RouteId>,
    /// Plan node index of the log terminal within its route
    pub terminal: Option<usize>,
    pub logger_id: u8,
    pub sample: Sample,
}

/// Result of ingesting one readout notification
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestReport {
    pub entries: u32,
    pub unmatched: u32,
    pub samples: Vec<LoggedSample>,
}

/// Decodes readout notifications against the registered bindings
#[derive(Debug, Clone, Default)]
pub struct LogDecoder {
    demux: LogDemux,
    ticks: TickReconciler,
    clock: EpochClock,
}

impl LogDecoder {
    pub fn new(tick_period_us: f64) -> Self {
        Self {
            demux: LogDemux::new(),
            ticks: TickReconciler::new(),
            clock: EpochClock::new(tick_period_us),
        }
    }

    pub fn demux(&self) -> &LogDemux {
        &self.demux
    }

    pub fn clock(&self) -> &EpochClock {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut EpochClock {
        &mut self.clock
    }

    pub fn bind(&mut self, binding: LoggerBinding) -> usize {
        debug!(
            "logger binding '{}' on ids {:?}",
            binding.name,
            binding.logger_ids().collect::<Vec<_>>()
        );
        self.demux.insert(binding)
    }

    /// Drop the bindings owning `logger_ids` and their tick history
    pub fn unbind(&mut self, logger_ids: &[u8]) {
        self.demux.remove_loggers(logger_ids);
        for id in logger_ids {
            self.ticks.forget(TickSource::Logger(*id));
        }
    }

    /// Wall clock time of a raw tick, extended against `source`'s history in
    /// the `reset_uid` generation
    pub fn timestamp(&mut self, source: TickSource, reset_uid: u8, raw_tick: u32) -> DateTime<Utc> {
        let anchor = self.clock.reference(reset_uid).map(|r| r.tick);
        let extended = self.ticks.extend(source, reset_uid, raw_tick, anchor);
        self.clock.timestamp(reset_uid, extended).unwrap_or_else(|| {
            trace!("no time reference, timestamping from the unix epoch");
            DateTime::<Utc>::UNIX_EPOCH
                + ChronoDuration::microseconds(self.clock.ticks_to_micros(extended) as i64)
        })
    }

    /// Decode the payload of a `[0x0b, 0x07, ...]` readout notification
    pub fn ingest(&mut self, payload: &[u8]) -> Result<IngestReport> {
        let entries = parse_readout(payload)?;
        let mut report = IngestReport {
            entries: entries.len() as u32,
            ..Default::default()
        };

        for entry in entries {
            if self.demux.binding_for(entry.logger_id).is_none() {
                trace!("entry of unbound logger {}", entry.logger_id);
                report.unmatched += 1;
                continue;
            }
            let Some(frame) = self.demux.ingest(entry) else {
                continue;
            };
            let Some(binding) = self.demux.binding(frame.binding).cloned() else {
                continue;
            };

            let source = TickSource::Logger(frame.head.logger_id);
            for decoded in decode_frame(&binding.shape, &frame.bytes)? {
                let tick = decoded.tick.unwrap_or(frame.head.tick);
                let timestamp = self.timestamp(source, frame.head.reset_uid, tick);
                report.samples.push(LoggedSample {
                    binding: binding.name.clone(),
                    route: binding.route,
                    terminal: binding.terminal,
                    logger_id: frame.head.logger_id,
                    sample: Sample {
                        timestamp,
                        value: decoded.value,
                    },
                });
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::{catalog, SignalShape};
    use crate::types::DataValue;
    use chrono::TimeZone;

    fn decoder_with(name: &str, shape: SignalShape, logger_id: u8) -> LogDecoder {
        let mut decoder = LogDecoder::default();
        let epoch = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        decoder.clock_mut().set_reference(TimeReference {
            reset_uid: 0,
            tick: 0,
            epoch,
        });
        decoder.bind(LoggerBinding {
            name: name.into(),
            route: Some(RouteId(1)),
            terminal: Some(2),
            source: catalog::switch().source,
            shape,
            parts: vec![BoundPart {
                logger_id,
                offset: 0,
                length: 1,
            }],
        });
        decoder
    }

    #[test]
    fn test_ingest_decodes_bound_entries() {
        let mut decoder = decoder_with("switch", catalog::switch().shape, 0);
        let payload = [0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0, 0, 0, 0x04, 0x01, 0, 0, 0, 1, 0, 0, 0];
        let report = decoder.ingest(&payload).unwrap();

        assert_eq!(report.entries, 2);
        assert_eq!(report.unmatched, 1);
        assert_eq!(report.samples.len(), 1);
        assert_eq!(report.samples[0].sample.value, DataValue::UInt(1));
        assert_eq!(report.samples[0].route, Some(RouteId(1)));
    }

    #[test]
    fn test_entry_after_counter_wrap_follows_reference() {
        let mut decoder = decoder_with("switch", catalog::switch().shape, 0);
        let epoch = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        decoder.clock_mut().set_reference(TimeReference {
            reset_uid: 0,
            tick: 0xffff_fff0,
            epoch,
        });

        let entry = LogEntry {
            logger_id: 0,
            reset_uid: 0,
            tick: 0x10,
            data: [1, 0, 0, 0],
        };
        let report = decoder.ingest(&entry.to_bytes()).unwrap();
        let offset = report.samples[0].sample.timestamp - epoch;
        assert_eq!(offset.num_milliseconds(), 46);
    }

    #[test]
    fn test_board_reset_starts_fresh_tick_history() {
        let mut decoder = decoder_with("switch", catalog::switch().shape, 0);
        let restarted = Utc.with_ymd_and_hms(2024, 6, 2, 12, 0, 0).unwrap();
        decoder.clock_mut().set_reference(TimeReference {
            reset_uid: 1,
            tick: 50,
            epoch: restarted,
        });

        let before = LogEntry {
            logger_id: 0,
            reset_uid: 0,
            tick: 0x9000_0000,
            data: [1, 0, 0, 0],
        };
        let after = LogEntry {
            logger_id: 0,
            reset_uid: 1,
            tick: 100,
            data: [0, 0, 0, 0],
        };
        let mut payload = before.to_bytes().to_vec();
        payload.extend_from_slice(&after.to_bytes());
        let report = decoder.ingest(&payload).unwrap();

        assert_eq!(report.samples.len(), 2);
        let offset = report.samples[1].sample.timestamp - restarted;
        // 50 ticks of 48/32768 s
        assert_eq!(offset.num_milliseconds(), 73);
    }

    #[test]
    fn test_unbind_drops_binding() {
        let mut decoder = decoder_with("switch", catalog::switch().shape, 3);
        decoder.unbind(&[3]);
        let report = decoder.ingest(&[0x03, 0, 0, 0, 0, 1, 0, 0, 0]).unwrap();
        assert_eq!(report.unmatched, 1);
        assert!(report.samples.is_empty());
    }
}
