//! Signal/producer model
//!
//! A [`DataSignal`] names a value stream the board can produce: where it comes
//! from ([`SourceAddress`]), how its bytes are laid out ([`SignalShape`]) and
//! which register starts and stops it. Raw sensor signals live in the
//! [`catalog`]; processor outputs are derived by the route compiler from the
//! shape of their input.
//!
//! # Frame layout
//!
//! A shape carries a list of [`FrameWrapper`]s. The innermost sample is
//! `attributes.len()` bytes; each wrapper, applied in order, either packs
//! several copies of the frame below it into one notification or prepends a
//! 4-byte account prefix.

pub mod catalog;
pub mod decode;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{BoardError, Result};
use crate::registry::opcodes::processor as proc_ops;
use crate::registry::ModuleId;

pub use decode::{decode_frame, decode_value, DecodedSample};

/// Index byte meaning "this register is not indexed"
pub const NO_INDEX: u8 = 0xff;

/// Width of the account prefix in bytes
pub const ACCOUNT_PREFIX_LEN: usize = 4;

/// Where a value stream originates on the board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceAddress {
    pub module: u8,
    pub register: u8,
    pub index: Option<u8>,
}

impl SourceAddress {
    pub const fn new(module: u8, register: u8) -> Self {
        Self {
            module,
            register,
            index: None,
        }
    }

    pub const fn indexed(module: u8, register: u8, index: u8) -> Self {
        Self {
            module,
            register,
            index: Some(index),
        }
    }

    /// Output of data processor `id`
    pub const fn processor(id: u8) -> Self {
        Self::indexed(ModuleId::DataProcessor as u8, proc_ops::NOTIFY, id)
    }

    /// Build from the three source bytes embedded in board configs
    pub fn from_bytes(module: u8, register: u8, index: u8) -> Self {
        Self {
            module,
            register,
            index: (index != NO_INDEX).then_some(index),
        }
    }

    pub fn index_byte(&self) -> u8 {
        self.index.unwrap_or(NO_INDEX)
    }

    /// `[module, register, index]` as embedded in processor/logger/event configs
    pub fn to_bytes(&self) -> [u8; 3] {
        [self.module, self.register, self.index_byte()]
    }

    /// Processor id if this is a processor output
    pub fn processor_id(&self) -> Option<u8> {
        if self.module == ModuleId::DataProcessor as u8 && self.register == proc_ops::NOTIFY {
            self.index
        } else {
            None
        }
    }
}

impl fmt::Display for SourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(i) => write!(f, "[{:#04x}, {:#04x}, {:#04x}]", self.module, self.register, i),
            None => write!(f, "[{:#04x}, {:#04x}]", self.module, self.register),
        }
    }
}

/// Byte layout of one sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataAttributes {
    /// Bytes per axis
    pub axis_len: u8,
    /// Number of axes (1 for scalars)
    pub axes: u8,
    /// Offset into the source register's payload
    pub offset: u8,
    pub signed: bool,
}

impl DataAttributes {
    pub const fn scalar(len: u8, signed: bool) -> Self {
        Self {
            axis_len: len,
            axes: 1,
            offset: 0,
            signed,
        }
    }

    pub const fn vector(axis_len: u8, axes: u8, signed: bool) -> Self {
        Self {
            axis_len,
            axes,
            offset: 0,
            signed,
        }
    }

    /// Total sample width in bytes
    pub fn len(&self) -> usize {
        self.axis_len as usize * self.axes as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `((len - 1) << 5) | offset`, as embedded after the source bytes
    pub fn attr_byte(&self) -> u8 {
        let len = self.len().clamp(1, 8) as u8;
        ((len - 1) << 5) | (self.offset & 0x1f)
    }

    /// Decode `attr_byte` back into `(offset, len)`
    pub fn split_attr_byte(byte: u8) -> (u8, u8) {
        (byte & 0x1f, (byte >> 5) + 1)
    }

    /// One axis of a vector sample
    pub fn component(&self, index: u8) -> Option<DataAttributes> {
        if index >= self.axes {
            return None;
        }
        Some(DataAttributes {
            axis_len: self.axis_len,
            axes: 1,
            offset: self.offset + index * self.axis_len,
            signed: self.signed,
        })
    }
}

/// Account prefix meaning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountMode {
    /// Board tick at which the sample was produced
    Time,
    /// Running sample count
    Count,
}

impl AccountMode {
    pub fn to_byte(self) -> u8 {
        match self {
            AccountMode::Time => 0,
            AccountMode::Count => 1,
        }
    }

    pub fn from_byte(b: u8) -> Self {
        if b == 1 {
            AccountMode::Count
        } else {
            AccountMode::Time
        }
    }
}

/// Framing applied on top of the raw sample bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameWrapper {
    /// Several frames share one notification
    Pack(u8),
    /// A 4-byte prefix precedes the frame
    Account(AccountMode),
}

/// Whether the bytes carry numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueKind {
    Numeric,
    Opaque,
}

/// Everything needed to decode a stream of frames
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalShape {
    pub attributes: DataAttributes,
    /// Raw value divided by this gives the physical value
    pub scale: f32,
    pub kind: ValueKind,
    /// Innermost first
    pub wrappers: Vec<FrameWrapper>,
}

impl SignalShape {
    pub fn numeric(attributes: DataAttributes, scale: f32) -> Self {
        Self {
            attributes,
            scale,
            kind: ValueKind::Numeric,
            wrappers: Vec::new(),
        }
    }

    pub fn sample_len(&self) -> usize {
        self.attributes.len()
    }

    /// Width of one notification payload
    pub fn frame_len(&self) -> usize {
        frame_len(self.sample_len(), &self.wrappers)
    }

    pub fn is_accounted(&self) -> bool {
        self.wrappers
            .iter()
            .any(|w| matches!(w, FrameWrapper::Account(_)))
    }

    /// The same shape with one more wrapper on the outside
    pub fn wrapped(&self, wrapper: FrameWrapper) -> Self {
        let mut shape = self.clone();
        shape.wrappers.push(wrapper);
        shape
    }
}

pub(crate) fn frame_len(sample_len: usize, wrappers: &[FrameWrapper]) -> usize {
    wrappers.iter().fold(sample_len, |acc, w| match w {
        FrameWrapper::Pack(n) => acc * *n as usize,
        FrameWrapper::Account(_) => acc + ACCOUNT_PREFIX_LEN,
    })
}

/// Alternate register emitting several samples per notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackedVariant {
    pub register: u8,
    pub count: u8,
}

/// A producible value stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSignal {
    /// Canonical name, e.g. `acceleration`
    pub name: String,
    pub source: SourceAddress,
    pub shape: SignalShape,
    /// Register toggled with `[module, register, 1/0]` to start/stop production
    pub enable_register: Option<u8>,
    pub packed: Option<PackedVariant>,
    /// Axis names, used for split components
    pub components: Vec<String>,
}

impl DataSignal {
    pub fn new(name: impl Into<String>, source: SourceAddress, shape: SignalShape) -> Self {
        Self {
            name: name.into(),
            source,
            shape,
            enable_register: None,
            packed: None,
            components: Vec::new(),
        }
    }

    pub fn with_enable_register(mut self, register: u8) -> Self {
        self.enable_register = Some(register);
        self
    }

    pub fn with_packed(mut self, register: u8, count: u8) -> Self {
        self.packed = Some(PackedVariant { register, count });
        self
    }

    pub fn with_components(mut self, names: &[&str]) -> Self {
        self.components = names.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Select a channel of an indexed register
    pub fn with_index(mut self, index: u8) -> Self {
        self.source.index = Some(index);
        self
    }

    pub fn module(&self) -> Option<ModuleId> {
        ModuleId::from_u8(self.source.module)
    }

    /// One axis of a vector signal
    pub fn component(&self, index: u8) -> Result<DataSignal> {
        let attributes = self.shape.attributes.component(index).ok_or_else(|| {
            BoardError::InvalidOperation(format!(
                "'{}' has no component {}",
                self.name, index
            ))
        })?;
        let suffix = self
            .components
            .get(index as usize)
            .cloned()
            .unwrap_or_else(|| index.to_string());
        Ok(DataSignal {
            name: format!("{}-{}", self.name, suffix),
            source: self.source,
            shape: SignalShape {
                attributes,
                ..self.shape.clone()
            },
            enable_register: self.enable_register,
            packed: None,
            components: Vec::new(),
        })
    }

    /// The packed form of this signal, if the module has one
    pub fn packed(&self) -> Option<DataSignal> {
        let packed = self.packed?;
        Some(DataSignal {
            name: format!("{}-packed", self.name),
            source: SourceAddress {
                register: packed.register,
                ..self.source
            },
            shape: self.shape.wrapped(FrameWrapper::Pack(packed.count)),
            enable_register: self.enable_register,
            packed: None,
            components: self.components.clone(),
        })
    }
}
