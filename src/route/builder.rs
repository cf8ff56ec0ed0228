//! Declarative route description.
//!
//! A [`RouteGraph`] is built by chaining calls on a [`RouteCursor`]:
//!
//! ```ignore
//! let graph = RouteGraph::build(catalog::acceleration(), |root| {
//!     root.rms().name("rms").accumulate().log();
//! });
//! ```
//!
//! Nodes are appended in the order the builder visits them. Fan-out goes
//! through [`Fanout::branch`] (multicast) or [`Components::component`]
//! (split); each branch is built to completion before the next one starts,
//! so insertion order is already depth-first.

use serde::{Deserialize, Serialize};

use super::node::{
    ComparisonMode, ComparisonOp, DataToken, LimitMode, MapOp, NodeKind, Operand,
    PassthroughMode, ReactionCommand,
};
use crate::error::CompileError;
use crate::signal::{AccountMode, DataSignal};

/// Where a node takes its input from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Upstream {
    Root,
    Node(usize),
    /// One axis of a `Split` node's input
    Component { split: usize, index: u8 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub kind: NodeKind,
    pub name: Option<String>,
    pub upstream: Upstream,
}

/// A route before compilation
#[derive(Debug, Clone, PartialEq)]
pub struct RouteGraph {
    pub root: DataSignal,
    pub nodes: Vec<GraphNode>,
    /// First misuse recorded while building; reported by the compiler
    pub(crate) deferred: Option<CompileError>,
}

impl RouteGraph {
    pub fn new(root: DataSignal) -> Self {
        Self {
            root,
            nodes: Vec::new(),
            deferred: None,
        }
    }

    /// Build a graph by running `f` on a cursor at the root signal
    pub fn build<F>(root: DataSignal, f: F) -> Self
    where
        F: FnOnce(RouteCursor<'_>),
    {
        let mut graph = Self::new(root);
        f(graph.cursor());
        graph
    }

    pub fn cursor(&mut self) -> RouteCursor<'_> {
        RouteCursor {
            graph: self,
            at: Upstream::Root,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Children of each node, in insertion order. Index `nodes.len()` holds
    /// the root's children.
    pub fn children(&self) -> Vec<Vec<usize>> {
        let root = self.nodes.len();
        let mut children = vec![Vec::new(); root + 1];
        for (i, node) in self.nodes.iter().enumerate() {
            let parent = match node.upstream {
                Upstream::Root => root,
                Upstream::Node(p) => p,
                Upstream::Component { split, .. } => split,
            };
            if let Some(list) = children.get_mut(parent) {
                list.push(i);
            }
        }
        children
    }

    fn push(&mut self, kind: NodeKind, upstream: Upstream) -> usize {
        self.nodes.push(GraphNode {
            kind,
            name: None,
            upstream,
        });
        self.nodes.len() - 1
    }

    fn defer(&mut self, err: CompileError) {
        if self.deferred.is_none() {
            self.deferred = Some(err);
        }
    }
}

/// Builder position: the output new nodes attach to
pub struct RouteCursor<'g> {
    graph: &'g mut RouteGraph,
    at: Upstream,
}

impl<'g> RouteCursor<'g> {
    fn then(self, kind: NodeKind) -> RouteCursor<'g> {
        let idx = self.graph.push(kind, self.at);
        RouteCursor {
            graph: self.graph,
            at: Upstream::Node(idx),
        }
    }

    /// Name the node at the cursor so edits and other nodes can refer to it
    pub fn name(self, name: impl Into<String>) -> Self {
        let name = name.into();
        match self.at {
            Upstream::Node(idx) => {
                if let Some(node) = self.graph.nodes.get_mut(idx) {
                    node.name = Some(name);
                }
            }
            _ => self.graph.defer(CompileError::IncompatibleInput(format!(
                "'{}' must name a node, not the route source",
                name
            ))),
        }
        self
    }

    pub fn map(self, op: MapOp, operand: impl Into<Operand>) -> Self {
        self.then(NodeKind::Map {
            op,
            operand: operand.into(),
        })
    }

    pub fn rms(self) -> Self {
        self.map(MapOp::Rms, 0.0)
    }

    pub fn rss(self) -> Self {
        self.map(MapOp::Rss, 0.0)
    }

    pub fn filter(
        self,
        op: ComparisonOp,
        mode: ComparisonMode,
        reference: impl Into<Operand>,
    ) -> Self {
        self.then(NodeKind::Filter {
            op,
            mode,
            reference: reference.into(),
        })
    }

    pub fn accumulate(self) -> Self {
        self.then(NodeKind::Accumulate)
    }

    pub fn count(self) -> Self {
        self.then(NodeKind::Counter)
    }

    /// Running average, also known as low-pass
    pub fn average(self, depth: u8) -> Self {
        self.then(NodeKind::Average { depth })
    }

    pub fn highpass(self, depth: u8) -> Self {
        self.then(NodeKind::HighPass { depth })
    }

    pub fn delay(self, samples: u8) -> Self {
        self.then(NodeKind::Delay { samples })
    }

    pub fn buffer(self) -> Self {
        self.then(NodeKind::Buffer)
    }

    pub fn limit(self, mode: LimitMode, value: u32) -> Self {
        self.then(NodeKind::Limit { mode, value })
    }

    pub fn pack(self, count: u8) -> Self {
        self.then(NodeKind::Pack { count })
    }

    pub fn account(self, mode: AccountMode) -> Self {
        self.then(NodeKind::Account { mode })
    }

    pub fn passthrough(self, mode: PassthroughMode, value: u16) -> Self {
        self.then(NodeKind::Passthrough { mode, value })
    }

    /// Concatenate this output with the buffered outputs of named nodes
    pub fn fuse<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.then(NodeKind::Fuse {
            with: names.into_iter().map(Into::into).collect(),
        })
    }

    /// Run board commands whenever this output produces a value
    ///
    /// The cursor stays where it was; the reaction does not alter the data.
    pub fn react<F>(self, f: F) -> Self
    where
        F: FnOnce(&mut Reaction),
    {
        let mut reaction = Reaction::default();
        f(&mut reaction);
        if reaction.commands.is_empty() {
            return self;
        }
        self.graph.push(
            NodeKind::React {
                commands: reaction.commands,
            },
            self.at,
        );
        self
    }

    pub fn stream(self) {
        self.then(NodeKind::Stream);
    }

    pub fn log(self) {
        self.then(NodeKind::Log);
    }

    pub fn multicast(self) -> Fanout<'g> {
        let node = self.graph.push(NodeKind::Multicast, self.at);
        Fanout {
            graph: self.graph,
            node,
        }
    }

    pub fn split(self) -> Components<'g> {
        let node = self.graph.push(NodeKind::Split, self.at);
        Components {
            graph: self.graph,
            node,
        }
    }
}

/// Multicast fan-out; every branch sees the same input
pub struct Fanout<'g> {
    graph: &'g mut RouteGraph,
    node: usize,
}

impl Fanout<'_> {
    pub fn branch(&mut self) -> RouteCursor<'_> {
        RouteCursor {
            graph: &mut *self.graph,
            at: Upstream::Node(self.node),
        }
    }
}

/// Split fan-out; each branch sees one axis
pub struct Components<'g> {
    graph: &'g mut RouteGraph,
    node: usize,
}

impl Components<'_> {
    pub fn component(&mut self, index: u8) -> RouteCursor<'_> {
        RouteCursor {
            graph: &mut *self.graph,
            at: Upstream::Component {
                split: self.node,
                index,
            },
        }
    }
}

/// Commands recorded for a `react` node or a timer schedule
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reaction {
    pub(crate) commands: Vec<ReactionCommand>,
}

impl Reaction {
    /// Fire `command` as-is
    pub fn write(&mut self, command: &[u8]) -> &mut Self {
        self.commands.push(ReactionCommand {
            bytes: command.to_vec(),
            token: None,
        });
        self
    }

    /// Fire `command` with event data spliced into its parameters
    pub fn write_with_data(&mut self, command: &[u8], token: DataToken) -> &mut Self {
        self.commands.push(ReactionCommand {
            bytes: command.to_vec(),
            token: Some(token),
        });
        self
    }

    pub fn commands(&self) -> &[ReactionCommand] {
        &self.commands
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::catalog;

    #[test]
    fn test_chain_builds_in_order() {
        let graph = RouteGraph::build(catalog::acceleration(), |root| {
            root.rms().name("rms").accumulate().log();
        });
        assert_eq!(graph.len(), 3);
        assert_eq!(graph.nodes[0].name.as_deref(), Some("rms"));
        assert_eq!(graph.nodes[1].upstream, Upstream::Node(0));
        assert_eq!(graph.nodes[2].kind, NodeKind::Log);
    }

    #[test]
    fn test_multicast_branches_are_depth_first() {
        let graph = RouteGraph::build(catalog::acceleration(), |root| {
            let mut fan = root.multicast();
            fan.branch().stream();
            fan.branch().rms().log();
        });
        let kinds: Vec<_> = graph.nodes.iter().map(|n| n.kind.tag()).collect();
        assert_eq!(kinds, vec!["multicast", "stream", "rms", "log"]);
        let children = graph.children();
        assert_eq!(children[0], vec![1, 2]);
        assert_eq!(children[graph.len()], vec![0]);
    }

    #[test]
    fn test_split_components() {
        let graph = RouteGraph::build(catalog::acceleration(), |root| {
            let mut axes = root.split();
            axes.component(0).stream();
            axes.component(2).log();
        });
        assert_eq!(
            graph.nodes[2].upstream,
            Upstream::Component { split: 0, index: 2 }
        );
    }

    #[test]
    fn test_naming_the_source_is_deferred_error() {
        let graph = RouteGraph::build(catalog::switch(), |root| {
            root.name("oops").stream();
        });
        assert!(matches!(
            graph.deferred,
            Some(CompileError::IncompatibleInput(_))
        ));
    }

    #[test]
    fn test_react_keeps_cursor() {
        let graph = RouteGraph::build(catalog::switch(), |root| {
            root.react(|r| {
                r.write(&[0x02, 0x03, 0x01]);
            })
            .stream();
        });
        assert_eq!(graph.nodes[0].upstream, Upstream::Root);
        assert_eq!(graph.nodes[1].upstream, Upstream::Root);
    }
}
