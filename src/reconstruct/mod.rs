//! Anonymous route reconstruction
//!
//! Rebuilds logger bindings from the board's own configuration registers when
//! the client has no record of what it configured. Each logger's source is
//! followed backwards through processor configs until a raw signal is reached,
//! then the chain is replayed forwards to recover the logged frame's shape.
//!
//! The reads themselves are done by the board; [`Reconstructor`] only keeps
//! the dumps and says which processor configs are still missing.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{BoardError, Result};
use crate::logger::{BoundPart, LoggerBinding};
use crate::registry::opcodes::processor as proc_ops;
use crate::registry::ModuleId;
use crate::route::NodeKind;
use crate::signal::{catalog, DataAttributes, DataSignal, SignalShape, SourceAddress, ValueKind};

/// Separator between the segments of a synthetic name
pub const PATH_DELIMITER: &str = "/";

/// Longest processor chain followed before giving up
const MAX_CHAIN_DEPTH: usize = 32;

/// Logger config as read from `[0x0b, 0x82, id]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoggerConfig {
    pub id: u8,
    pub source: SourceAddress,
    pub offset: u8,
    pub length: u8,
}

impl LoggerConfig {
    /// `None` for an unused slot (empty payload)
    pub fn parse(id: u8, payload: &[u8]) -> Result<Option<Self>> {
        match payload {
            [] => Ok(None),
            [module, register, index, attr, ..] => {
                let (offset, length) = DataAttributes::split_attr_byte(*attr);
                Ok(Some(Self {
                    id,
                    source: SourceAddress::from_bytes(*module, *register, *index),
                    offset,
                    length,
                }))
            }
            _ => Err(BoardError::Protocol(format!(
                "logger {} config too short: {:02x?}",
                id, payload
            ))),
        }
    }

    fn end(&self) -> u8 {
        self.offset + self.length
    }
}

/// Processor config as read from `[0x09, 0x82, id]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorConfig {
    pub id: u8,
    pub source: SourceAddress,
    pub offset: u8,
    pub length: u8,
    /// Starts at the type byte
    pub config: Vec<u8>,
}

impl ProcessorConfig {
    pub fn parse(id: u8, payload: &[u8]) -> Result<Self> {
        match payload {
            [module, register, index, attr, config @ ..] if !config.is_empty() => {
                let (offset, length) = DataAttributes::split_attr_byte(*attr);
                Ok(Self {
                    id,
                    source: SourceAddress::from_bytes(*module, *register, *index),
                    offset,
                    length,
                    config: config.to_vec(),
                })
            }
            _ => Err(BoardError::Protocol(format!(
                "processor {} config too short: {:02x?}",
                id, payload
            ))),
        }
    }
}

/// One processor between the root signal and a logger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainLink {
    pub processor_id: u8,
    pub kind: NodeKind,
    pub input: SignalShape,
    pub output: SignalShape,
}

/// A binding recovered from device state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnonymousRoute {
    /// Raw signal the chain starts from
    pub root: DataSignal,
    /// Root to logger order
    pub chain: Vec<ChainLink>,
    pub binding: LoggerBinding,
}

impl AnonymousRoute {
    pub fn name(&self) -> &str {
        &self.binding.name
    }

    pub fn processor_ids(&self) -> impl Iterator<Item = u8> + '_ {
        self.chain.iter().map(|l| l.processor_id)
    }
}

/// Result of walking back from one source
struct Walk {
    root: DataSignal,
    chain: Vec<ChainLink>,
    /// Shape of the source's full output
    shape: SignalShape,
}

/// Collects register dumps and turns them into bindings
#[derive(Debug, Default)]
pub struct Reconstructor {
    loggers: Vec<LoggerConfig>,
    processors: BTreeMap<u8, ProcessorConfig>,
}

impl Reconstructor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_logger(&mut self, config: LoggerConfig) {
        self.loggers.push(config);
    }

    pub fn add_processor(&mut self, config: ProcessorConfig) {
        self.processors.insert(config.id, config);
    }

    pub fn logger_ids(&self) -> Vec<u8> {
        self.loggers.iter().map(|l| l.id).collect()
    }

    pub fn processor_ids(&self) -> Vec<u8> {
        self.processors.keys().copied().collect()
    }

    /// Processor ids referenced by a known config but not read yet, ascending
    pub fn missing_processors(&self) -> Vec<u8> {
        let mut wanted = BTreeSet::new();
        let sources = self
            .loggers
            .iter()
            .map(|l| l.source)
            .chain(self.processors.values().map(|p| p.source));
        for source in sources {
            if let Some(id) = source.processor_id() {
                wanted.insert(id);
            }
        }
        for processor in self.processors.values() {
            wanted.extend(NodeKind::fused_ids(&processor.config));
        }
        wanted
            .into_iter()
            .filter(|id| !self.processors.contains_key(id))
            .collect()
    }

    /// Build one binding per logger group, in ascending logger order
    ///
    /// Loggers reading adjacent, disjoint slices of the same source are
    /// merged into one multi-part binding.
    pub fn finish(&self) -> Result<Vec<AnonymousRoute>> {
        let mut loggers = self.loggers.clone();
        loggers.sort_by_key(|l| l.id);

        let mut groups: Vec<Vec<LoggerConfig>> = Vec::new();
        for logger in loggers {
            let frame_len = self.walk(logger.source, 0)?.shape.frame_len();
            let joinable = groups.iter_mut().find(|group| {
                let (first, last) = (group[0], group[group.len() - 1]);
                first.source == logger.source
                    && logger.offset == last.end()
                    && (logger.end() as usize) <= frame_len
            });
            match joinable {
                Some(group) => group.push(logger),
                None => groups.push(vec![logger]),
            }
        }

        let mut root_counts: HashMap<String, usize> = HashMap::new();
        let mut routes = Vec::with_capacity(groups.len());
        for group in groups {
            let first = group[0];
            let walk = self.walk(first.source, 0)?;
            let start = first.offset;
            let length = group.iter().map(|l| l.length).sum::<u8>();
            let shape = slice(&walk.shape, start, length);

            let root_name = match walk.chain.first() {
                // a processor reading one axis roots the chain at that component
                Some(link) if link.input.attributes.axes == 1 && walk.root.shape.attributes.axes > 1 => {
                    component_name(&walk.root, &link.input)
                }
                Some(_) => walk.root.name.clone(),
                None if shape.attributes.axes == 1 && walk.root.shape.attributes.axes > 1 => {
                    component_name(&walk.root, &shape)
                }
                None => walk.root.name.clone(),
            };
            let seen = root_counts.entry(root_name.clone()).or_insert(0);
            let root_segment = if *seen == 0 {
                root_name
            } else {
                format!("{}~{}", root_name, seen)
            };
            *seen += 1;

            let name = std::iter::once(root_segment)
                .chain(
                    walk.chain
                        .iter()
                        .map(|link| format!("{}?id={}", link.kind.tag(), link.processor_id)),
                )
                .collect::<Vec<_>>()
                .join(PATH_DELIMITER);

            let binding = LoggerBinding {
                name,
                route: None,
                terminal: None,
                source: first.source,
                shape,
                parts: group
                    .iter()
                    .map(|l| BoundPart {
                        logger_id: l.id,
                        offset: l.offset - start,
                        length: l.length,
                    })
                    .collect(),
            };
            debug!("reconstructed '{}' from loggers {:?}", binding.name, binding.parts);
            routes.push(AnonymousRoute {
                root: walk.root,
                chain: walk.chain,
                binding,
            });
        }
        info!("reconstructed {} logger bindings", routes.len());
        Ok(routes)
    }

    /// Follow `source` back to its raw root and replay the chain forwards
    fn walk(&self, source: SourceAddress, depth: usize) -> Result<Walk> {
        if depth > MAX_CHAIN_DEPTH {
            return Err(BoardError::Protocol(
                "processor chain too deep, configs may be cyclic".into(),
            ));
        }
        let Some(id) = processor_output(&source) else {
            let root = root_signal(&source);
            return Ok(Walk {
                shape: root.shape.clone(),
                root,
                chain: Vec::new(),
            });
        };

        let processor = self.processors.get(&id).ok_or_else(|| {
            BoardError::Protocol(format!("processor {} config was not read", id))
        })?;
        let upstream = self.walk(processor.source, depth + 1)?;
        let input = slice(&upstream.shape, processor.offset, processor.length);
        let kind = NodeKind::from_config(&processor.config, &input).ok_or_else(|| {
            BoardError::Protocol(format!(
                "processor {} has unrecognized config {:02x?}",
                id, processor.config
            ))
        })?;
        let fused = NodeKind::fused_ids(&processor.config)
            .into_iter()
            .map(|buffer| {
                self.walk(SourceAddress::processor(buffer), depth + 1)
                    .map(|w| w.shape)
            })
            .collect::<Result<Vec<_>>>()?;
        let output = kind.output_shape(&input, &fused);

        let mut chain = upstream.chain;
        chain.push(ChainLink {
            processor_id: id,
            kind,
            input,
            output: output.clone(),
        });
        Ok(Walk {
            root: upstream.root,
            chain,
            shape: output,
        })
    }
}

fn processor_output(source: &SourceAddress) -> Option<u8> {
    (source.module == ModuleId::DataProcessor as u8 && source.register == proc_ops::NOTIFY)
        .then(|| source.processor_id())
        .flatten()
}

/// Built-in signal producing `source`, or an opaque stand-in
fn root_signal(source: &SourceAddress) -> DataSignal {
    if let Some(signal) = catalog::lookup(source) {
        return signal;
    }
    if let Some(packed) = catalog::all().iter().find_map(|s| {
        let variant = s.packed?;
        (s.source.module == source.module && variant.register == source.register)
            .then(|| s.packed())
            .flatten()
    }) {
        return packed;
    }
    DataSignal::new(
        format!("register-{:02x}-{:02x}", source.module, source.register),
        *source,
        SignalShape {
            attributes: DataAttributes::scalar(4, false),
            scale: 1.0,
            kind: ValueKind::Opaque,
            wrappers: Vec::new(),
        },
    )
}

/// Shape of `length` bytes at `offset` into a frame of `shape`
fn slice(shape: &SignalShape, offset: u8, length: u8) -> SignalShape {
    let attrs = shape.attributes;
    let base = if shape.wrappers.is_empty() { attrs.offset } else { 0 };
    if offset == base && length as usize >= shape.frame_len() {
        return shape.clone();
    }
    if !shape.wrappers.is_empty() || shape.kind == ValueKind::Opaque {
        return SignalShape {
            attributes: DataAttributes {
                offset,
                ..DataAttributes::scalar(length, false)
            },
            scale: 1.0,
            kind: ValueKind::Opaque,
            wrappers: Vec::new(),
        };
    }
    let rel = offset.saturating_sub(attrs.offset);
    if attrs.axes > 1 && length == attrs.axis_len && rel % attrs.axis_len == 0 {
        if let Some(component) = attrs.component(rel / attrs.axis_len) {
            return SignalShape {
                attributes: component,
                ..shape.clone()
            };
        }
    }
    SignalShape {
        attributes: DataAttributes {
            offset,
            ..DataAttributes::scalar(length, attrs.signed)
        },
        ..shape.clone()
    }
}

fn component_name(root: &DataSignal, shape: &SignalShape) -> String {
    let attrs = root.shape.attributes;
    if attrs.axis_len == 0 {
        return root.name.clone();
    }
    let index = shape.attributes.offset.saturating_sub(attrs.offset) / attrs.axis_len;
    root.component(index)
        .map(|c| c.name)
        .unwrap_or_else(|_| root.name.clone())
}
