use serde::{Deserialize, Serialize};

use super::builder::Upstream;
use super::id::NodeHandle;
use super::node::{DataToken, NodeKind};
use crate::registry::opcodes::{event, logging, processor};
use crate::registry::ModuleId;
use crate::signal::{DataSignal, SignalShape, SourceAddress};

/// A node referenced by a plan step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeRef {
    /// Node of the route being compiled, by graph index
    Local(usize),
    /// Node of an already registered route
    Live(NodeHandle),
}

/// Where a step reads its data from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceRef {
    Raw(SourceAddress),
    Node(NodeRef),
}

/// A config byte that holds the board id of another node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigPatch {
    pub offset: usize,
    pub node: NodeRef,
}

/// Slice of a frame recorded by one logger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggerPart {
    pub offset: u8,
    pub length: u8,
}

/// One board-mutating action, in issue order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PlanStep {
    CreateProcessor {
        node: usize,
        source: SourceRef,
        attr: u8,
        config: Vec<u8>,
        patches: Vec<ConfigPatch>,
    },
    Subscribe {
        node: usize,
        source: SourceRef,
    },
    CreateLogger {
        node: usize,
        source: SourceRef,
        attr: u8,
        part: LoggerPart,
    },
    CreateEvent {
        node: usize,
        source: SourceRef,
        command: Vec<u8>,
        token: Option<DataToken>,
        patches: Vec<ConfigPatch>,
    },
}

impl PlanStep {
    pub fn node(&self) -> usize {
        match self {
            PlanStep::CreateProcessor { node, .. }
            | PlanStep::Subscribe { node, .. }
            | PlanStep::CreateLogger { node, .. }
            | PlanStep::CreateEvent { node, .. } => *node,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminalKind {
    Stream,
    Log,
}

/// A client-facing output of the route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminalSpec {
    pub node: usize,
    pub kind: TerminalKind,
    pub source: SourceRef,
    pub shape: SignalShape,
}

/// A graph node with its shapes resolved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedNode {
    pub kind: NodeKind,
    pub name: Option<String>,
    pub upstream: Upstream,
    pub input: SignalShape,
    pub output: SignalShape,
}

/// Statistics about a compiled route
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStats {
    pub total_nodes: usize,
    pub processors: usize,
    pub loggers: usize,
    pub events: usize,
    pub subscriptions: usize,
    /// Compilation time in microseconds
    pub compile_time_us: u64,
}

/// Compiled route, ready to be realized step by step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutePlan {
    pub root: DataSignal,
    /// Indexed like the source graph
    pub nodes: Vec<PlannedNode>,
    pub steps: Vec<PlanStep>,
    pub terminals: Vec<TerminalSpec>,
    pub stats: PlanStats,
}

impl RoutePlan {
    /// Nodes of other routes this plan reads from or patches in
    pub fn live_refs(&self) -> impl Iterator<Item = NodeHandle> + '_ {
        let sources = self
            .steps
            .iter()
            .map(|step| match step {
                PlanStep::CreateProcessor { source, .. }
                | PlanStep::Subscribe { source, .. }
                | PlanStep::CreateLogger { source, .. }
                | PlanStep::CreateEvent { source, .. } => *source,
            })
            .chain(self.terminals.iter().map(|t| t.source))
            .filter_map(|source| match source {
                SourceRef::Node(node) => Some(node),
                SourceRef::Raw(_) => None,
            });
        let patches = self.steps.iter().flat_map(|step| match step {
            PlanStep::CreateProcessor { patches, .. } | PlanStep::CreateEvent { patches, .. } => {
                patches.as_slice()
            }
            _ => &[],
        });
        sources
            .chain(patches.map(|p| p.node))
            .filter_map(|node| match node {
                NodeRef::Live(handle) => Some(handle),
                NodeRef::Local(_) => None,
            })
    }

    /// Logger steps of one log terminal, in part order
    pub fn logger_parts(&self, node: usize) -> Vec<LoggerPart> {
        self.steps
            .iter()
            .filter_map(|step| match step {
                PlanStep::CreateLogger { node: n, part, .. } if *n == node => Some(*part),
                _ => None,
            })
            .collect()
    }
}

/// Board state introduced while realizing a route; undone in reverse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreatedResource {
    Processor(u8),
    ProcessorNotify(u8),
    /// Raw register subscription; the board keeps one per register
    Subscription { module: u8, register: u8 },
    Logger(u8),
    Event(u8),
}

impl CreatedResource {
    /// Command that undoes this resource
    pub fn teardown_command(&self) -> Vec<u8> {
        match *self {
            CreatedResource::Processor(id) => {
                vec![ModuleId::DataProcessor as u8, processor::REMOVE, id]
            }
            CreatedResource::ProcessorNotify(id) => {
                vec![ModuleId::DataProcessor as u8, processor::NOTIFY_ENABLE, id, 0x00]
            }
            CreatedResource::Subscription { module, register } => vec![module, register, 0x00],
            CreatedResource::Logger(id) => vec![ModuleId::Logging as u8, logging::REMOVE, id],
            CreatedResource::Event(id) => vec![ModuleId::Event as u8, event::REMOVE, id],
        }
    }
}
