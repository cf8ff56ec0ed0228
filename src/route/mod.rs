//! Pipeline routes
//!
//! A route starts at one [`DataSignal`](crate::signal::DataSignal) and runs
//! through board-side processors to client-side terminals:
//!
//! 1. [`builder`] records the route as a [`RouteGraph`]
//! 2. [`compiler`] validates it and lowers it into a [`RoutePlan`]
//! 3. the board realizes the plan step by step, recording every
//!    [`CreatedResource`] so removal can undo them in reverse
//!
//! Named nodes are kept in a board-wide [`NodeArena`] so edits and later
//! routes can find them after their board ids have been reused.

pub mod arena;
pub mod builder;
pub mod compiler;
pub mod id;
pub mod node;
pub mod plan;

use serde::{Deserialize, Serialize};

pub use arena::{ArenaEntry, NodeArena};
pub use builder::{Components, Fanout, Reaction, RouteCursor, RouteGraph, Upstream};
pub use compiler::RouteCompiler;
pub use id::{NodeHandle, RouteId};
pub use node::{
    ComparisonMode, ComparisonOp, DataToken, LimitMode, MapOp, NodeEdit, NodeKind, Operand,
    PassthroughMode, ReactionCommand,
};
pub use plan::{
    ConfigPatch, CreatedResource, LoggerPart, NodeRef, PlanStats, PlanStep, PlannedNode,
    RoutePlan, SourceRef, TerminalKind, TerminalSpec,
};

/// A realized route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub id: RouteId,
    pub plan: RoutePlan,
    /// Arena handle of each plan node
    pub handles: Vec<NodeHandle>,
    /// In creation order
    pub created: Vec<CreatedResource>,
    /// Logger ids per log terminal, keyed by plan node index
    pub loggers: Vec<(usize, Vec<u8>)>,
    pub started: bool,
}

impl Route {
    /// Teardown commands, newest resource first
    pub fn teardown(&self) -> impl Iterator<Item = &CreatedResource> {
        self.created.iter().rev()
    }

    pub fn logger_ids(&self) -> impl Iterator<Item = u8> + '_ {
        self.loggers.iter().flat_map(|(_, ids)| ids.iter().copied())
    }

    pub fn has_loggers(&self) -> bool {
        self.loggers.iter().any(|(_, ids)| !ids.is_empty())
    }
}
