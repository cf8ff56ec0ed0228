//! Error handling for the board engine
//!
//! Errors fall into four families: compile errors raised before anything is
//! sent, timeouts on board round trips, connection loss, and capability
//! failures. Stale or duplicate notifications are never errors; they are
//! dropped where they are detected.

use crate::types::PendingKey;
use thiserror::Error;

/// Errors raised while lowering a route description to commands
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// A node references a name that is not defined earlier
    #[error("Unresolved name '{0}'")]
    UnresolvedName(String),

    /// A name is already in use by a live node
    #[error("Duplicate name '{0}'")]
    DuplicateName(String),

    /// A named reference resolves to a node of the wrong kind
    #[error("Name '{name}' does not refer to a {expected}")]
    UnknownReference { name: String, expected: String },

    /// Packing factor beyond what the processor module accepts
    #[error("Pack count {requested} exceeds maximum of {max}")]
    PackCapacity { requested: u8, max: u8 },

    /// Packed/accounted frame wider than one notification
    #[error("Frame of {bytes} bytes exceeds notification capacity of {max} bytes")]
    FrameOverflow { bytes: usize, max: usize },

    /// A node cannot consume its upstream's output
    #[error("Incompatible input: {0}")]
    IncompatibleInput(String),

    /// A route with no terminal or board-side node
    #[error("Route has no nodes")]
    EmptyRoute,
}

/// Main error type for board operations
#[derive(Error, Debug)]
pub enum BoardError {
    /// Route description rejected before any command was sent
    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    /// No reply within the bound, or the class has no ids left
    #[error("Resource timeout: {key}")]
    ResourceTimeout { key: PendingKey },

    /// Disconnected while an operation was pending
    #[error("Connection lost")]
    ConnectionLost,

    /// Operation not allowed in the current state or on this board revision
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Malformed frame
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<BoardError>,
    },
}

impl BoardError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        BoardError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping context wrappers
    pub fn root(&self) -> &BoardError {
        match self {
            BoardError::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether this is an I/O-class failure that is safe to retry after reconnecting
    pub fn is_connection_lost(&self) -> bool {
        matches!(self.root(), BoardError::ConnectionLost | BoardError::Io(_))
    }

    /// Whether this is a resource timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self.root(), BoardError::ResourceTimeout { .. })
    }
}

/// Result type alias for board operations
pub type Result<T> = std::result::Result<T, BoardError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}
