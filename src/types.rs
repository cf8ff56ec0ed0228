//! Core data types shared across the engine
//!
//! # Main Types
//!
//! - [`ResourceClass`] - The five kinds of board-assigned identifiers
//! - [`PendingKey`] - What a pending round trip is waiting for
//! - [`DataValue`] - A decoded value from a stream or log entry
//! - [`Sample`] - A decoded value with its reconstructed wall-clock timestamp

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::registry::ModuleId;

/// A class of board-side resource whose id is assigned by the board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceClass {
    /// Logger slot
    Logger,
    /// Data processor slot
    Processor,
    /// Event binding slot
    Event,
    /// Timer slot
    Timer,
    /// Macro slot
    Macro,
}

impl ResourceClass {
    /// All resource classes
    pub const ALL: [ResourceClass; 5] = [
        ResourceClass::Logger,
        ResourceClass::Processor,
        ResourceClass::Event,
        ResourceClass::Timer,
        ResourceClass::Macro,
    ];

    /// The module owning this resource class
    pub fn module(self) -> ModuleId {
        match self {
            ResourceClass::Logger => ModuleId::Logging,
            ResourceClass::Processor => ModuleId::DataProcessor,
            ResourceClass::Event => ModuleId::Event,
            ResourceClass::Timer => ModuleId::Timer,
            ResourceClass::Macro => ModuleId::Macro,
        }
    }

    /// Opcode of the creation command, echoed back by the board with the assigned id
    pub fn creation_opcode(self) -> u8 {
        0x02
    }

    /// Classify a `[module, opcode]` pair as a creation notification
    pub fn from_creation(module: u8, opcode: u8) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.module() as u8 == module && c.creation_opcode() == opcode)
    }

    /// Number of ids the board hands out when it does not report a capacity
    pub fn default_capacity(self) -> u8 {
        match self {
            ResourceClass::Logger => 8,
            ResourceClass::Processor => 28,
            ResourceClass::Event => 28,
            ResourceClass::Timer => 8,
            ResourceClass::Macro => 8,
        }
    }

    /// Display name
    pub fn display_name(self) -> &'static str {
        match self {
            ResourceClass::Logger => "logger",
            ResourceClass::Processor => "processor",
            ResourceClass::Event => "event",
            ResourceClass::Timer => "timer",
            ResourceClass::Macro => "macro",
        }
    }
}

impl fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Key of a pending request/response round trip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PendingKey {
    /// Waiting for a board-assigned id
    Allocation(ResourceClass),
    /// Waiting for a register read response (`register` has the read bit set)
    Read { module: u8, register: u8 },
}

impl fmt::Display for PendingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PendingKey::Allocation(class) => write!(f, "{} allocation", class),
            PendingKey::Read { module, register } => {
                write!(f, "register read [{:#04x}, {:#04x}]", module, register)
            }
        }
    }
}

/// A decoded value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DataValue {
    /// Unscaled unsigned integer
    UInt(u64),
    /// Unscaled signed integer
    Int(i64),
    /// Scaled scalar
    Float(f32),
    /// Scaled multi-axis value
    Vector(Vec<f32>),
    /// Bytes with no numeric interpretation (buffers, fused frames)
    Bytes(Vec<u8>),
}


/// A decoded value with its wall-clock timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Reconstructed timestamp
    pub timestamp: DateTime<Utc>,
    /// Decoded value
    pub value: DataValue,
}
