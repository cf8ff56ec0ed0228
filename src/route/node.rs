//! Route node kinds and their processor encodings.
//!
//! Every node that lives on the board's data processor knows how to encode
//! its config bytes from the shape of its input, how to derive its output
//! shape, and how to parse itself back from a config register dump. The
//! encode and parse halves must stay symmetric; reconstruction relies on it.

use serde::{Deserialize, Serialize};

use crate::error::{BoardError, CompileError, Result};
use crate::registry::opcodes::processor::{self as proc_ops, kind};
use crate::registry::{ModuleId, ModuleRegistry};
use crate::signal::{AccountMode, DataAttributes, FrameWrapper, SignalShape, ValueKind};

/// Arithmetic applied by a `Map` node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MapOp {
    Add,
    Multiply,
    Divide,
    Modulus,
    Exponent,
    Sqrt,
    LeftShift,
    RightShift,
    Subtract,
    AbsValue,
    Constant,
    /// Root mean square across axes
    Rms,
    /// Root sum square across axes
    Rss,
}

impl MapOp {
    const MATH: [MapOp; 11] = [
        MapOp::Add,
        MapOp::Multiply,
        MapOp::Divide,
        MapOp::Modulus,
        MapOp::Exponent,
        MapOp::Sqrt,
        MapOp::LeftShift,
        MapOp::RightShift,
        MapOp::Subtract,
        MapOp::AbsValue,
        MapOp::Constant,
    ];

    fn math_code(self) -> Option<u8> {
        Self::MATH
            .iter()
            .position(|op| *op == self)
            .map(|i| i as u8 + 1)
    }

    fn from_math_code(code: u8) -> Option<Self> {
        Self::MATH.get((code as usize).checked_sub(1)?).copied()
    }

    pub fn is_combiner(self) -> bool {
        matches!(self, MapOp::Rms | MapOp::Rss)
    }

    /// Whether the operand is in the input's physical units (and so scaled)
    fn operand_is_scaled(self) -> bool {
        matches!(
            self,
            MapOp::Add | MapOp::Subtract | MapOp::Modulus | MapOp::Constant
        )
    }

    fn output_scale(self, input_scale: f32, operand: f32) -> f32 {
        match self {
            MapOp::Exponent => input_scale.powf(operand),
            MapOp::Sqrt => input_scale.sqrt(),
            MapOp::LeftShift => input_scale * 2f32.powi(operand as i32),
            MapOp::RightShift => input_scale / 2f32.powi(operand as i32),
            _ => input_scale,
        }
    }
}

/// Right-hand side of a `Map` or reference of a `Filter`
///
/// `Named` reads the value from another node's output at runtime; the
/// compiler wires a feedback event for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    Value(f32),
    Named(String),
}

impl Operand {
    pub fn value(&self) -> f32 {
        match self {
            Operand::Value(v) => *v,
            Operand::Named(_) => 0.0,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Operand::Named(n) => Some(n),
            Operand::Value(_) => None,
        }
    }
}

impl From<f32> for Operand {
    fn from(v: f32) -> Self {
        Operand::Value(v)
    }
}

impl From<f64> for Operand {
    fn from(v: f64) -> Self {
        Operand::Value(v as f32)
    }
}

impl From<&str> for Operand {
    fn from(name: &str) -> Self {
        Operand::Named(name.to_string())
    }
}

impl From<String> for Operand {
    fn from(name: String) -> Self {
        Operand::Named(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComparisonOp {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl ComparisonOp {
    const ALL: [ComparisonOp; 6] = [
        ComparisonOp::Eq,
        ComparisonOp::Neq,
        ComparisonOp::Lt,
        ComparisonOp::Lte,
        ComparisonOp::Gt,
        ComparisonOp::Gte,
    ];

    fn to_byte(self) -> u8 {
        Self::ALL.iter().position(|o| *o == self).unwrap_or(0) as u8
    }

    fn from_byte(b: u8) -> Option<Self> {
        Self::ALL.get(b as usize).copied()
    }
}

/// What a comparison emits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComparisonMode {
    /// Input passes through when the test holds
    Absolute,
    /// Reference value passes through when the test holds
    Reference,
    /// Index of the matching reference
    Zone,
    /// 1 or 0
    PassFail,
}

impl ComparisonMode {
    const ALL: [ComparisonMode; 4] = [
        ComparisonMode::Absolute,
        ComparisonMode::Reference,
        ComparisonMode::Zone,
        ComparisonMode::PassFail,
    ];

    fn to_byte(self) -> u8 {
        Self::ALL.iter().position(|m| *m == self).unwrap_or(0) as u8
    }

    fn from_byte(b: u8) -> Option<Self> {
        Self::ALL.get(b as usize).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LimitMode {
    /// At most one sample per `value` milliseconds
    Time,
    /// Only the first `value` samples
    Count,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PassthroughMode {
    All,
    /// Gate opened while the value is non-zero
    Conditional,
    /// Gate counts down from the value
    Count,
}

impl PassthroughMode {
    fn to_byte(self) -> u8 {
        match self {
            PassthroughMode::All => 0,
            PassthroughMode::Conditional => 1,
            PassthroughMode::Count => 2,
        }
    }

    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(PassthroughMode::All),
            1 => Some(PassthroughMode::Conditional),
            2 => Some(PassthroughMode::Count),
            _ => None,
        }
    }
}

/// A command a `React` node fires, optionally splicing the triggering data in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionCommand {
    pub bytes: Vec<u8>,
    pub token: Option<DataToken>,
}

/// Copy `length` bytes from `offset` of the event's data into the command
/// parameters at `dest`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataToken {
    pub offset: u8,
    pub length: u8,
    pub dest: u8,
}

impl DataToken {
    /// Descriptor byte embedded in the event entry
    pub fn descriptor(&self) -> u8 {
        0x01 | ((self.length.saturating_sub(1) & 0x03) << 1) | ((self.offset & 0x07) << 3)
    }
}

/// One pipeline node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    Stream,
    Log,
    Map {
        op: MapOp,
        operand: Operand,
    },
    Filter {
        op: ComparisonOp,
        mode: ComparisonMode,
        reference: Operand,
    },
    Accumulate,
    Counter,
    Average {
        depth: u8,
    },
    HighPass {
        depth: u8,
    },
    Delay {
        samples: u8,
    },
    Buffer,
    Limit {
        mode: LimitMode,
        value: u32,
    },
    Pack {
        count: u8,
    },
    Account {
        mode: AccountMode,
    },
    Multicast,
    /// Per-axis fan-out; children attach to a component
    Split,
    /// Combine with the buffered outputs of other named nodes
    Fuse {
        with: Vec<String>,
    },
    React {
        commands: Vec<ReactionCommand>,
    },
    Passthrough {
        mode: PassthroughMode,
        value: u16,
    },
}

/// Byte offset of a math/comparison operand inside the config
pub const MATH_OPERAND_OFFSET: usize = 3;
pub const COMPARISON_OPERAND_OFFSET: usize = 4;

/// Byte offset of the first fused buffer id inside a fuser config
pub const FUSER_IDS_OFFSET: usize = 2;

fn lens_byte(output: usize, input: usize) -> u8 {
    let out = (output.clamp(1, 4) - 1) as u8;
    let inp = (input.clamp(1, 4) - 1) as u8;
    out | (inp << 2)
}

fn len_bits(len: usize) -> u8 {
    (len.clamp(1, 32) - 1) as u8
}

fn scaled_raw(value: f32, scale: f32) -> i32 {
    (value * scale).round() as i32
}

fn require_numeric(input: &SignalShape, what: &str) -> std::result::Result<(), CompileError> {
    if input.kind != ValueKind::Numeric || !input.wrappers.is_empty() {
        return Err(CompileError::IncompatibleInput(format!(
            "{} needs unpacked numeric input",
            what
        )));
    }
    Ok(())
}

fn require_scalar(input: &SignalShape, what: &str) -> std::result::Result<(), CompileError> {
    require_numeric(input, what)?;
    if input.attributes.axes != 1 {
        return Err(CompileError::IncompatibleInput(format!(
            "{} needs a single-axis input, got {} axes",
            what, input.attributes.axes
        )));
    }
    Ok(())
}

impl NodeKind {
    /// Whether realizing this node allocates a data processor
    pub fn is_processor(&self) -> bool {
        !matches!(
            self,
            NodeKind::Stream
                | NodeKind::Log
                | NodeKind::Multicast
                | NodeKind::Split
                | NodeKind::React { .. }
        )
    }

    /// Operator tag used in synthetic names
    pub fn tag(&self) -> &'static str {
        match self {
            NodeKind::Stream => "stream",
            NodeKind::Log => "log",
            NodeKind::Map { op: MapOp::Rms, .. } => "rms",
            NodeKind::Map { op: MapOp::Rss, .. } => "rss",
            NodeKind::Map { .. } => "math",
            NodeKind::Filter { .. } => "comparison",
            NodeKind::Accumulate => "accumulate",
            NodeKind::Counter => "count",
            NodeKind::Average { .. } => "average",
            NodeKind::HighPass { .. } => "high-pass",
            NodeKind::Delay { .. } => "delay",
            NodeKind::Buffer => "buffer",
            NodeKind::Limit {
                mode: LimitMode::Time,
                ..
            } => "time",
            NodeKind::Limit { .. } | NodeKind::Passthrough { .. } => "passthrough",
            NodeKind::Pack { .. } => "packer",
            NodeKind::Account { .. } => "account",
            NodeKind::Multicast => "multicast",
            NodeKind::Split => "split",
            NodeKind::Fuse { .. } => "fuser",
            NodeKind::React { .. } => "react",
        }
    }

    /// Processor type byte, for processor nodes
    pub fn type_byte(&self) -> Option<u8> {
        Some(match self {
            NodeKind::Map { op, .. } if op.is_combiner() => kind::COMBINER,
            NodeKind::Map { .. } => kind::MATH,
            NodeKind::Filter { .. } => kind::COMPARISON,
            NodeKind::Accumulate | NodeKind::Counter => kind::ACCUMULATOR,
            NodeKind::Average { .. } | NodeKind::HighPass { .. } => kind::AVERAGE,
            NodeKind::Delay { .. } => kind::DELAY,
            NodeKind::Buffer => kind::BUFFER,
            NodeKind::Limit {
                mode: LimitMode::Time,
                ..
            } => kind::TIME,
            NodeKind::Limit { .. } | NodeKind::Passthrough { .. } => kind::PASSTHROUGH,
            NodeKind::Pack { .. } => kind::PACKER,
            NodeKind::Account { .. } => kind::ACCOUNTER,
            NodeKind::Fuse { .. } => kind::FUSER,
            _ => return None,
        })
    }

    /// Names this node reads at runtime
    pub fn references(&self) -> Vec<&str> {
        match self {
            NodeKind::Map { operand, .. } => operand.name().into_iter().collect(),
            NodeKind::Filter { reference, .. } => reference.name().into_iter().collect(),
            NodeKind::Fuse { with } => with.iter().map(String::as_str).collect(),
            _ => Vec::new(),
        }
    }

    /// Offset of the operand a feedback event rewrites
    pub fn operand_offset(&self) -> Option<usize> {
        match self {
            NodeKind::Map { op, .. } if !op.is_combiner() => Some(MATH_OPERAND_OFFSET),
            NodeKind::Filter { .. } => Some(COMPARISON_OPERAND_OFFSET),
            _ => None,
        }
    }

    /// Shape emitted by this node given its input (and fused inputs)
    pub fn output_shape(&self, input: &SignalShape, fused: &[SignalShape]) -> SignalShape {
        let attrs = input.attributes;
        match self {
            NodeKind::Map { op, .. } if op.is_combiner() => SignalShape::numeric(
                DataAttributes::scalar(attrs.axis_len, false),
                input.scale,
            ),
            NodeKind::Map { op, operand } => {
                let signed = match op {
                    MapOp::Sqrt | MapOp::AbsValue => false,
                    MapOp::Constant => operand.value() < 0.0,
                    MapOp::Subtract => true,
                    _ => attrs.signed || operand.value() < 0.0,
                };
                SignalShape::numeric(
                    DataAttributes::vector(4, attrs.axes, signed),
                    op.output_scale(input.scale, operand.value()),
                )
            }
            NodeKind::Filter { mode, .. } => match mode {
                ComparisonMode::Absolute | ComparisonMode::Reference => {
                    SignalShape::numeric(DataAttributes { offset: 0, ..attrs }, input.scale)
                }
                ComparisonMode::Zone | ComparisonMode::PassFail => {
                    SignalShape::numeric(DataAttributes::scalar(1, false), 1.0)
                }
            },
            NodeKind::Accumulate => {
                SignalShape::numeric(DataAttributes::scalar(4, attrs.signed), input.scale)
            }
            NodeKind::Counter => SignalShape::numeric(DataAttributes::scalar(4, false), 1.0),
            NodeKind::HighPass { .. } => SignalShape::numeric(
                DataAttributes {
                    offset: 0,
                    signed: true,
                    ..attrs
                },
                input.scale,
            ),
            NodeKind::Pack { count } => {
                rebased(input).wrapped(FrameWrapper::Pack(*count))
            }
            NodeKind::Account { mode } => {
                rebased(input).wrapped(FrameWrapper::Account(*mode))
            }
            NodeKind::Fuse { .. } => {
                let total: usize =
                    input.frame_len() + fused.iter().map(SignalShape::frame_len).sum::<usize>();
                SignalShape {
                    attributes: DataAttributes::scalar(total.min(u8::MAX as usize) as u8, false),
                    scale: 1.0,
                    kind: ValueKind::Opaque,
                    wrappers: Vec::new(),
                }
            }
            NodeKind::Stream
            | NodeKind::Log
            | NodeKind::Multicast
            | NodeKind::Split
            | NodeKind::React { .. } => input.clone(),
            NodeKind::Average { .. }
            | NodeKind::Delay { .. }
            | NodeKind::Buffer
            | NodeKind::Limit { .. }
            | NodeKind::Passthrough { .. } => rebased(input),
        }
    }

    /// Config bytes following the source and attribute bytes of a processor add
    ///
    /// Named operands and fused ids are encoded as zero; the compiler patches
    /// them once the referenced ids are known.
    pub fn encode_config(&self, input: &SignalShape, registry: &ModuleRegistry) -> Result<Vec<u8>> {
        let attrs = input.attributes;
        let in_len = input.frame_len();
        let revision = registry.revision(ModuleId::DataProcessor).unwrap_or(0);

        let config = match self {
            NodeKind::Map { op, .. } if op.is_combiner() => {
                require_numeric(input, "rms/rss")?;
                if attrs.axes < 2 {
                    return Err(CompileError::IncompatibleInput(
                        "rms/rss needs a multi-axis input".into(),
                    )
                    .into());
                }
                let axis_len = attrs.axis_len as usize;
                vec![
                    kind::COMBINER,
                    lens_byte(axis_len, axis_len),
                    attrs.axes - 1,
                    attrs.signed as u8,
                    (*op == MapOp::Rss) as u8,
                ]
            }
            NodeKind::Map { op, operand } => {
                require_numeric(input, "math")?;
                let code = op.math_code().ok_or_else(|| {
                    BoardError::InvalidOperation(format!("{:?} is not a math operation", op))
                })?;
                let signed = self.output_shape(input, &[]).attributes.signed;
                let raw = if op.operand_is_scaled() {
                    scaled_raw(operand.value(), input.scale)
                } else {
                    operand.value().round() as i32
                };
                let mut config = vec![
                    kind::MATH,
                    lens_byte(4, attrs.axis_len as usize) | ((signed as u8) << 4),
                    code,
                ];
                config.extend_from_slice(&raw.to_le_bytes());
                config.push(attrs.axes - 1);
                config
            }
            NodeKind::Filter {
                op,
                mode,
                reference,
            } => {
                require_scalar(input, "comparison")?;
                let mut config = vec![
                    kind::COMPARISON,
                    attrs.signed as u8,
                    op.to_byte(),
                    mode.to_byte(),
                ];
                config.extend_from_slice(&scaled_raw(reference.value(), input.scale).to_le_bytes());
                config
            }
            NodeKind::Accumulate => {
                require_scalar(input, "accumulate")?;
                vec![kind::ACCUMULATOR, lens_byte(4, attrs.len())]
            }
            NodeKind::Counter => vec![kind::ACCUMULATOR, lens_byte(4, in_len) | 0x10],
            NodeKind::Average { depth } | NodeKind::HighPass { depth } => {
                require_numeric(input, "average")?;
                let highpass = matches!(self, NodeKind::HighPass { .. });
                if highpass && !registry.supports_highpass() {
                    return Err(BoardError::InvalidOperation(format!(
                        "high-pass filter needs data processor revision {} (board has {})",
                        proc_ops::HIGHPASS_REVISION,
                        revision
                    )));
                }
                let axis_len = attrs.axis_len as usize;
                let mut config = vec![kind::AVERAGE, lens_byte(axis_len, axis_len), *depth];
                if revision >= proc_ops::HIGHPASS_REVISION {
                    config.push(attrs.axes - 1);
                    config.push(highpass as u8);
                }
                config
            }
            NodeKind::Delay { samples } => vec![kind::DELAY, len_bits(in_len), *samples],
            NodeKind::Buffer => vec![kind::BUFFER, len_bits(in_len)],
            NodeKind::Limit {
                mode: LimitMode::Time,
                value,
            } => {
                let mut config = vec![kind::TIME, len_bits(in_len) & 0x07, 0];
                config.extend_from_slice(&value.to_le_bytes());
                config
            }
            NodeKind::Limit {
                mode: LimitMode::Count,
                value,
            } => {
                let count = u16::try_from(*value).map_err(|_| {
                    BoardError::InvalidOperation(format!("count limit {} exceeds 65535", value))
                })?;
                passthrough_config(PassthroughMode::Count, count)
            }
            NodeKind::Passthrough { mode, value } => passthrough_config(*mode, *value),
            NodeKind::Pack { count } => {
                vec![kind::PACKER, len_bits(in_len), count.saturating_sub(1)]
            }
            NodeKind::Account { mode } => vec![kind::ACCOUNTER, mode.to_byte(), 3],
            NodeKind::Fuse { with } => {
                if !registry.supports_fuser() {
                    return Err(BoardError::InvalidOperation(format!(
                        "fuser needs data processor revision {} (board has {})",
                        proc_ops::FUSER_REVISION,
                        revision
                    )));
                }
                let mut config = vec![kind::FUSER, with.len() as u8];
                config.resize(FUSER_IDS_OFFSET + with.len(), 0);
                config
            }
            NodeKind::Stream
            | NodeKind::Log
            | NodeKind::Multicast
            | NodeKind::Split
            | NodeKind::React { .. } => {
                return Err(BoardError::InvalidOperation(format!(
                    "{} is not a processor",
                    self.tag()
                )))
            }
        };
        Ok(config)
    }

    /// Parse a processor config (starting at the type byte) read back from
    /// the board
    ///
    /// Fused buffer names are unknown at this point and come back as
    /// `buffer?id=N`.
    pub fn from_config(config: &[u8], input: &SignalShape) -> Option<NodeKind> {
        let (&type_byte, rest) = config.split_first()?;
        let byte = |i: usize| rest.get(i).copied();
        let i32_at = |i: usize| -> Option<i32> {
            let b = rest.get(i..i + 4)?;
            Some(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        };

        Some(match type_byte {
            kind::PASSTHROUGH => {
                let mode = PassthroughMode::from_byte(byte(0)?)?;
                let value = u16::from_le_bytes([byte(1)?, byte(2)?]);
                NodeKind::Passthrough { mode, value }
            }
            kind::ACCUMULATOR => {
                if byte(0)? & 0x10 != 0 {
                    NodeKind::Counter
                } else {
                    NodeKind::Accumulate
                }
            }
            kind::AVERAGE => {
                let depth = byte(1)?;
                if byte(3) == Some(1) {
                    NodeKind::HighPass { depth }
                } else {
                    NodeKind::Average { depth }
                }
            }
            kind::COMPARISON => NodeKind::Filter {
                op: ComparisonOp::from_byte(byte(1)?)?,
                mode: ComparisonMode::from_byte(byte(2)?)?,
                reference: Operand::Value(i32_at(3)? as f32 / input.scale),
            },
            kind::COMBINER => NodeKind::Map {
                op: if byte(3)? == 1 { MapOp::Rss } else { MapOp::Rms },
                operand: Operand::Value(0.0),
            },
            kind::TIME => NodeKind::Limit {
                mode: LimitMode::Time,
                value: i32_at(2)? as u32,
            },
            kind::MATH => {
                let op = MapOp::from_math_code(byte(1)?)?;
                let raw = i32_at(2)? as f32;
                let value = if op.operand_is_scaled() {
                    raw / input.scale
                } else {
                    raw
                };
                NodeKind::Map {
                    op,
                    operand: Operand::Value(value),
                }
            }
            kind::DELAY => NodeKind::Delay {
                samples: byte(1)?,
            },
            kind::BUFFER => NodeKind::Buffer,
            kind::PACKER => NodeKind::Pack {
                count: byte(1)? + 1,
            },
            kind::ACCOUNTER => NodeKind::Account {
                mode: AccountMode::from_byte(byte(0)?),
            },
            kind::FUSER => {
                let count = byte(0)? as usize;
                let ids = rest.get(1..1 + count)?;
                NodeKind::Fuse {
                    with: ids.iter().map(|id| format!("buffer?id={}", id)).collect(),
                }
            }
            _ => return None,
        })
    }

    /// Board ids of the buffers a fuser config reads
    pub fn fused_ids(config: &[u8]) -> Vec<u8> {
        match config {
            [kind::FUSER, count, ids @ ..] => ids.iter().take(*count as usize).copied().collect(),
            _ => Vec::new(),
        }
    }
}

fn passthrough_config(mode: PassthroughMode, value: u16) -> Vec<u8> {
    let mut config = vec![kind::PASSTHROUGH, mode.to_byte()];
    config.extend_from_slice(&value.to_le_bytes());
    config
}

fn rebased(input: &SignalShape) -> SignalShape {
    let mut shape = input.clone();
    shape.attributes.offset = 0;
    shape
}

/// Runtime change to a named processor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeEdit {
    /// Replace the config; must keep the processor type
    Config(NodeKind),
    ResetState,
    SetState(f32),
}

impl NodeEdit {
    /// Command applying this edit to processor `id`
    pub fn command(
        &self,
        id: u8,
        current: &NodeKind,
        input: &SignalShape,
        registry: &ModuleRegistry,
    ) -> Result<Vec<u8>> {
        let module = ModuleId::DataProcessor as u8;
        match self {
            NodeEdit::Config(next) => {
                if next.type_byte().is_none() || next.type_byte() != current.type_byte() {
                    return Err(BoardError::InvalidOperation(format!(
                        "cannot change a {} node into a {} node",
                        current.tag(),
                        next.tag()
                    )));
                }
                let mut cmd = vec![module, proc_ops::PARAMETER, id];
                cmd.extend(next.encode_config(input, registry)?);
                Ok(cmd)
            }
            NodeEdit::ResetState => {
                let mut cmd = vec![module, proc_ops::STATE, id];
                match current {
                    NodeKind::Accumulate | NodeKind::Counter => cmd.extend_from_slice(&[0; 4]),
                    NodeKind::Passthrough { .. }
                    | NodeKind::Limit {
                        mode: LimitMode::Count,
                        ..
                    } => cmd.extend_from_slice(&[0; 2]),
                    NodeKind::Average { .. }
                    | NodeKind::HighPass { .. }
                    | NodeKind::Delay { .. }
                    | NodeKind::Buffer => {}
                    other => {
                        return Err(BoardError::InvalidOperation(format!(
                            "{} node has no resettable state",
                            other.tag()
                        )))
                    }
                }
                Ok(cmd)
            }
            NodeEdit::SetState(value) => {
                let mut cmd = vec![module, proc_ops::STATE, id];
                match current {
                    NodeKind::Accumulate => {
                        cmd.extend_from_slice(&scaled_raw(*value, input.scale).to_le_bytes())
                    }
                    NodeKind::Counter => cmd.extend_from_slice(&(*value as u32).to_le_bytes()),
                    NodeKind::Passthrough { .. }
                    | NodeKind::Limit {
                        mode: LimitMode::Count,
                        ..
                    } => cmd.extend_from_slice(&(*value as u16).to_le_bytes()),
                    other => {
                        return Err(BoardError::InvalidOperation(format!(
                            "cannot set the state of a {} node",
                            other.tag()
                        )))
                    }
                }
                Ok(cmd)
            }
        }
    }
}
