use std::collections::HashMap;

use super::arena::NodeArena;
use super::builder::{RouteGraph, Upstream};
use super::node::{DataToken, NodeKind, FUSER_IDS_OFFSET};
use super::plan::{
    ConfigPatch, LoggerPart, NodeRef, PlanStats, PlanStep, PlannedNode, RoutePlan, SourceRef,
    TerminalKind, TerminalSpec,
};
use crate::error::{BoardError, CompileError, Result};
use crate::registry::opcodes::{logging, processor as proc_ops};
use crate::registry::{ModuleId, ModuleRegistry, MAX_NOTIFY_PAYLOAD};
use crate::signal::SignalShape;

/// Lowers a route graph into an ordered list of board steps
pub struct RouteCompiler;

/// Per-node results accumulated during the walk
#[derive(Default, Clone)]
struct Resolved {
    /// Where the node's own input comes from
    source: Option<SourceRef>,
    input: Option<SignalShape>,
    output: Option<SignalShape>,
}

/// Names visible to the node being compiled
struct Scope<'s> {
    graph: &'s RouteGraph,
    arena: &'s NodeArena,
    /// Every name the graph declares
    local_names: &'s HashMap<&'s str, usize>,
    /// Local names whose node has already been visited
    defined: &'s HashMap<&'s str, usize>,
    resolved: &'s [Resolved],
}

impl Scope<'_> {
    /// Resolve a referenced name to a node and its output shape
    ///
    /// Local names only resolve once their node has been visited.
    fn resolve(&self, name: &str) -> Result<(NodeRef, SignalShape)> {
        if let Some(&idx) = self.defined.get(name) {
            let shape = self
                .resolved
                .get(idx)
                .and_then(|r| r.output.clone())
                .ok_or_else(|| CompileError::UnresolvedName(name.to_string()))?;
            return Ok((NodeRef::Local(idx), shape));
        }
        if !self.local_names.contains_key(name) {
            if let Some(handle) = self.arena.lookup(name) {
                let entry = self
                    .arena
                    .get(handle)
                    .filter(|e| !e.removed)
                    .ok_or_else(|| CompileError::UnresolvedName(name.to_string()))?;
                return Ok((NodeRef::Live(handle), entry.output.clone()));
            }
        }
        Err(CompileError::UnresolvedName(name.to_string()).into())
    }

    /// Resolve a name that must be a node of the given kind
    fn resolve_kind(
        &self,
        name: &str,
        expected: &str,
        accept: fn(&NodeKind) -> bool,
    ) -> Result<(NodeRef, SignalShape)> {
        let (node_ref, shape) = self.resolve(name)?;
        let kind = match node_ref {
            NodeRef::Local(idx) => self.graph.nodes.get(idx).map(|n| &n.kind),
            NodeRef::Live(handle) => self.arena.get(handle).map(|e| &e.kind),
        };
        if !kind.is_some_and(accept) {
            return Err(CompileError::UnknownReference {
                name: name.to_string(),
                expected: expected.to_string(),
            }
            .into());
        }
        Ok((node_ref, shape))
    }
}

impl RouteCompiler {
    /// Compile `graph` against the board's capabilities and the names
    /// already live on it.
    ///
    /// Nothing is sent; every error here is raised before the first command.
    /// Nodes are visited depth-first so that a branch may reference a name
    /// defined by an earlier sibling but never a later one.
    pub fn compile(
        graph: &RouteGraph,
        registry: &ModuleRegistry,
        arena: &NodeArena,
    ) -> Result<RoutePlan> {
        let start_time = std::time::Instant::now();

        if let Some(err) = graph.deferred.clone() {
            return Err(err.into());
        }
        if graph.is_empty() {
            return Err(CompileError::EmptyRoute.into());
        }

        let local_names = Self::collect_names(graph, arena)?;
        let order = Self::depth_first(&graph.children());

        let mut resolved = vec![Resolved::default(); graph.len()];
        let mut defined: HashMap<&str, usize> = HashMap::new();
        let mut steps = Vec::new();
        let mut terminals = Vec::new();

        for &idx in &order {
            let node = &graph.nodes[idx];
            let (source, input) = Self::resolve_input(graph, node.upstream, &resolved)?;

            let scope = Scope {
                graph,
                arena,
                local_names: &local_names,
                defined: &defined,
                resolved: &resolved,
            };

            let mut fused = Vec::new();
            let mut patches = Vec::new();
            if let NodeKind::Fuse { with } = &node.kind {
                for (i, name) in with.iter().enumerate() {
                    let (node_ref, shape) =
                        scope.resolve_kind(name, "buffer", |k| matches!(k, NodeKind::Buffer))?;
                    fused.push(shape);
                    patches.push(ConfigPatch {
                        offset: FUSER_IDS_OFFSET + i,
                        node: node_ref,
                    });
                }
            }
            let feedback = Self::feedback_step(&scope, &node.kind)?;

            let output = node.kind.output_shape(&input, &fused);
            Self::check_frame(&node.kind, &input, &output, registry)?;

            match &node.kind {
                kind if kind.is_processor() => {
                    let config = kind.encode_config(&input, registry)?;
                    steps.push(PlanStep::CreateProcessor {
                        node: idx,
                        source,
                        attr: Self::source_attr(&input),
                        config: config.clone(),
                        patches,
                    });
                    if let Some((node_ref, token)) = feedback {
                        let mut command =
                            vec![ModuleId::DataProcessor as u8, proc_ops::PARAMETER, 0];
                        command.extend(config);
                        steps.push(PlanStep::CreateEvent {
                            node: idx,
                            source: SourceRef::Node(node_ref),
                            command,
                            token: Some(token),
                            patches: vec![ConfigPatch {
                                offset: 2,
                                node: NodeRef::Local(idx),
                            }],
                        });
                    }
                }
                NodeKind::Stream => {
                    if input.is_accounted() && !registry.supports_streamed_accounting() {
                        return Err(BoardError::InvalidOperation(format!(
                            "streaming accounted data needs data processor revision {}",
                            proc_ops::ENHANCED_STREAMING_REVISION
                        )));
                    }
                    steps.push(PlanStep::Subscribe { node: idx, source });
                    terminals.push(TerminalSpec {
                        node: idx,
                        kind: TerminalKind::Stream,
                        source,
                        shape: input.clone(),
                    });
                }
                NodeKind::Log => {
                    for (attr, part) in Self::logger_parts(&input)? {
                        steps.push(PlanStep::CreateLogger {
                            node: idx,
                            source,
                            attr,
                            part,
                        });
                    }
                    terminals.push(TerminalSpec {
                        node: idx,
                        kind: TerminalKind::Log,
                        source,
                        shape: input.clone(),
                    });
                }
                NodeKind::React { commands } => {
                    for command in commands {
                        steps.push(PlanStep::CreateEvent {
                            node: idx,
                            source,
                            command: command.bytes.clone(),
                            token: command.token,
                            patches: Vec::new(),
                        });
                    }
                }
                _ => {}
            }

            if let Some(name) = &node.name {
                defined.insert(name.as_str(), idx);
            }
            resolved[idx] = Resolved {
                source: Some(source),
                input: Some(input),
                output: Some(output),
            };
        }

        let nodes = graph
            .nodes
            .iter()
            .zip(resolved)
            .map(|(node, r)| {
                let input = r.input.unwrap_or_else(|| graph.root.shape.clone());
                PlannedNode {
                    kind: node.kind.clone(),
                    name: node.name.clone(),
                    upstream: node.upstream,
                    output: r.output.unwrap_or_else(|| input.clone()),
                    input,
                }
            })
            .collect();

        let count = |pred: fn(&PlanStep) -> bool| steps.iter().filter(|s| pred(s)).count();
        let stats = PlanStats {
            total_nodes: graph.len(),
            processors: count(|s| matches!(s, PlanStep::CreateProcessor { .. })),
            loggers: count(|s| matches!(s, PlanStep::CreateLogger { .. })),
            events: count(|s| matches!(s, PlanStep::CreateEvent { .. })),
            subscriptions: count(|s| matches!(s, PlanStep::Subscribe { .. })),
            compile_time_us: start_time.elapsed().as_micros() as u64,
        };

        Ok(RoutePlan {
            root: graph.root.clone(),
            nodes,
            steps,
            terminals,
            stats,
        })
    }

    /// Names declared by the graph; duplicates, also against live names, fail
    fn collect_names<'a>(
        graph: &'a RouteGraph,
        arena: &NodeArena,
    ) -> std::result::Result<HashMap<&'a str, usize>, CompileError> {
        let mut names = HashMap::new();
        for (idx, node) in graph.nodes.iter().enumerate() {
            let Some(name) = node.name.as_deref() else {
                continue;
            };
            if names.insert(name, idx).is_some() || arena.lookup(name).is_some() {
                return Err(CompileError::DuplicateName(name.to_string()));
            }
        }
        Ok(names)
    }

    /// Pre-order walk from the root, children in insertion order
    fn depth_first(children: &[Vec<usize>]) -> Vec<usize> {
        let Some(root_children) = children.last() else {
            return Vec::new();
        };
        let mut order = Vec::with_capacity(children.len().saturating_sub(1));
        let mut stack: Vec<usize> = root_children.iter().rev().copied().collect();
        while let Some(idx) = stack.pop() {
            order.push(idx);
            if let Some(next) = children.get(idx) {
                stack.extend(next.iter().rev());
            }
        }
        order
    }

    fn resolve_input(
        graph: &RouteGraph,
        upstream: Upstream,
        resolved: &[Resolved],
    ) -> Result<(SourceRef, SignalShape)> {
        let missing = || BoardError::Protocol("upstream node visited out of order".into());
        match upstream {
            Upstream::Root => Ok((SourceRef::Raw(graph.root.source), graph.root.shape.clone())),
            Upstream::Node(parent) => {
                let r = resolved.get(parent).ok_or_else(missing)?;
                let output = r.output.clone().ok_or_else(missing)?;
                if graph.nodes[parent].kind.is_processor() {
                    Ok((SourceRef::Node(NodeRef::Local(parent)), output))
                } else {
                    Ok((r.source.ok_or_else(missing)?, output))
                }
            }
            Upstream::Component { split, index } => {
                let r = resolved.get(split).ok_or_else(missing)?;
                let shape = r.output.clone().ok_or_else(missing)?;
                if !shape.wrappers.is_empty() {
                    return Err(CompileError::IncompatibleInput(
                        "cannot split a packed or accounted frame".into(),
                    )
                    .into());
                }
                let attributes = shape.attributes.component(index).ok_or_else(|| {
                    CompileError::IncompatibleInput(format!(
                        "input has {} axes, no component {}",
                        shape.attributes.axes, index
                    ))
                })?;
                Ok((
                    r.source.ok_or_else(missing)?,
                    SignalShape {
                        attributes,
                        ..shape
                    },
                ))
            }
        }
    }

    /// Source and data token of the event feeding a named operand
    fn feedback_step(scope: &Scope<'_>, kind: &NodeKind) -> Result<Option<(NodeRef, DataToken)>> {
        let name = match kind {
            NodeKind::Map { operand, .. } => operand.name(),
            NodeKind::Filter { reference, .. } => reference.name(),
            _ => None,
        };
        let (Some(name), Some(offset)) = (name, kind.operand_offset()) else {
            return Ok(None);
        };
        let (node_ref, shape) = scope.resolve_kind(name, "processor", NodeKind::is_processor)?;
        Ok(Some((
            node_ref,
            DataToken {
                offset: 0,
                length: shape.frame_len().clamp(1, 4) as u8,
                // parameters start after the processor id byte
                dest: (offset + 1) as u8,
            },
        )))
    }

    /// Reject frames the board cannot carry
    fn check_frame(
        kind: &NodeKind,
        input: &SignalShape,
        output: &SignalShape,
        registry: &ModuleRegistry,
    ) -> std::result::Result<(), CompileError> {
        if let NodeKind::Pack { count } = kind {
            let max = registry.max_pack_count(input.frame_len());
            if *count == 0 || *count > max {
                return Err(CompileError::PackCapacity {
                    requested: *count,
                    max,
                });
            }
        }
        if kind.is_processor() && output.frame_len() > MAX_NOTIFY_PAYLOAD {
            return Err(CompileError::FrameOverflow {
                bytes: output.frame_len(),
                max: MAX_NOTIFY_PAYLOAD,
            });
        }
        Ok(())
    }

    /// `((len - 1) << 5) | offset` of a processor input
    fn source_attr(input: &SignalShape) -> u8 {
        let len = input.frame_len().clamp(1, 8) as u8;
        let offset = if input.wrappers.is_empty() {
            input.attributes.offset
        } else {
            0
        };
        ((len - 1) << 5) | (offset & 0x1f)
    }

    /// Loggers store at most four bytes; wider frames take several
    fn logger_parts(input: &SignalShape) -> Result<Vec<(u8, LoggerPart)>> {
        let frame_len = input.frame_len();
        if frame_len == 0 {
            return Err(CompileError::IncompatibleInput("signal carries no data to log".into()).into());
        }
        let base = if input.wrappers.is_empty() {
            input.attributes.offset as usize
        } else {
            0
        };
        Ok((0..frame_len)
            .step_by(logging::ENTRY_DATA_LEN)
            .map(|start| {
                let length = (frame_len - start).min(logging::ENTRY_DATA_LEN);
                let offset = (base + start) as u8;
                let attr = (((length - 1) as u8) << 5) | (offset & 0x1f);
                (
                    attr,
                    LoggerPart {
                        offset: start as u8,
                        length: length as u8,
                    },
                )
            })
            .collect())
    }
}
