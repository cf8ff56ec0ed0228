//! Download session state machine
//!
//! One download may be active at a time. Every `begin` opens a new epoch;
//! progress and completion notifications are only honored while a session
//! is downloading, so a duplicate completion after `Completed` or a stray one
//! before any download is dropped without effect.

use std::fmt;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::{BoardError, Result};

/// Progress callback, called with `(received, expected)` entry counts
pub type ProgressCallback = Box<dyn FnMut(u32, u32) + Send>;

/// State of the download session
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DownloadState {
    #[default]
    NotStarted,
    Downloading {
        epoch: u64,
        expected: u32,
        received: u32,
    },
    Completed {
        epoch: u64,
        received: u32,
    },
    Interrupted(String),
}

impl DownloadState {
    pub fn is_downloading(&self) -> bool {
        matches!(self, DownloadState::Downloading { .. })
    }
}

impl fmt::Display for DownloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadState::NotStarted => write!(f, "not started"),
            DownloadState::Downloading {
                expected, received, ..
            } => write!(f, "downloading {}/{}", received, expected),
            DownloadState::Completed { received, .. } => {
                write!(f, "completed ({} entries)", received)
            }
            DownloadState::Interrupted(reason) => write!(f, "interrupted: {}", reason),
        }
    }
}

/// Outcome of a completed download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSummary {
    pub epoch: u64,
    /// Entry count the board reported before the readout
    pub expected: u32,
    /// Entries parsed from readout notifications
    pub entries: u32,
    /// Samples dispatched after reassembly
    pub samples: u32,
    /// Entries of loggers with no binding
    pub unmatched: u32,
    pub elapsed: Duration,
}

#[derive(Default)]
pub struct DownloadSession {
    state: DownloadState,
    epoch: u64,
    started: Option<Instant>,
    samples: u32,
    unmatched: u32,
    progress: Option<ProgressCallback>,
    completion: Option<oneshot::Sender<Result<DownloadSummary>>>,
}

impl fmt::Debug for DownloadSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadSession")
            .field("state", &self.state)
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}

impl DownloadSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &DownloadState {
        &self.state
    }

    pub fn is_active(&self) -> bool {
        self.state.is_downloading()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Open a session expecting `expected` entries
    ///
    /// The returned receiver resolves on completion or interruption.
    pub fn begin(
        &mut self,
        expected: u32,
        progress: Option<ProgressCallback>,
    ) -> Result<oneshot::Receiver<Result<DownloadSummary>>> {
        if self.is_active() {
            return Err(BoardError::InvalidOperation(
                "a log download is already in progress".into(),
            ));
        }
        self.epoch += 1;
        let (tx, rx) = oneshot::channel();
        self.state = DownloadState::Downloading {
            epoch: self.epoch,
            expected,
            received: 0,
        };
        self.started = Some(Instant::now());
        self.samples = 0;
        self.unmatched = 0;
        self.progress = progress;
        self.completion = Some(tx);
        info!("log download #{} started, {} entries", self.epoch, expected);
        Ok(rx)
    }

    /// Count entries parsed from one readout notification
    pub fn on_entries(&mut self, entries: u32, samples: u32, unmatched: u32) {
        if let DownloadState::Downloading { received, .. } = &mut self.state {
            *received = received.saturating_add(entries);
            self.samples = self.samples.saturating_add(samples);
            self.unmatched = self.unmatched.saturating_add(unmatched);
        }
    }

    /// Handle a progress notification; zero remaining completes the session
    ///
    /// Returns the summary when this notification completed the download.
    pub fn on_progress(&mut self, remaining: u32) -> Option<DownloadSummary> {
        let DownloadState::Downloading {
            epoch,
            expected,
            received,
        } = self.state
        else {
            debug!(
                "dropping readout progress ({} remaining) with no active download",
                remaining
            );
            return None;
        };

        if let Some(callback) = self.progress.as_mut() {
            callback(expected.saturating_sub(remaining), expected);
        }
        if remaining > 0 {
            debug!("log download #{}: {} entries remaining", epoch, remaining);
            return None;
        }

        let summary = DownloadSummary {
            epoch,
            expected,
            entries: received,
            samples: self.samples,
            unmatched: self.unmatched,
            elapsed: self.started.map(|s| s.elapsed()).unwrap_or_default(),
        };
        self.state = DownloadState::Completed { epoch, received };
        self.progress = None;
        info!(
            "log download #{} completed: {} entries in {:?}",
            epoch, received, summary.elapsed
        );
        if let Some(tx) = self.completion.take() {
            let _ = tx.send(Ok(summary.clone()));
        }
        Some(summary)
    }

    /// Fail the active download with `ConnectionLost`
    pub fn interrupt(&mut self, reason: impl Into<String>) -> bool {
        self.fail(reason, BoardError::ConnectionLost)
    }

    /// Fail the active download with `error`
    pub fn fail(&mut self, reason: impl Into<String>, error: BoardError) -> bool {
        if !self.is_active() {
            return false;
        }
        let reason = reason.into();
        warn!("log download #{} interrupted: {}", self.epoch, reason);
        self.state = DownloadState::Interrupted(reason);
        self.progress = None;
        if let Some(tx) = self.completion.take() {
            let _ = tx.send(Err(error));
        }
        true
    }
}
