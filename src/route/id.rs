//! Identity types for routes and route nodes.
//!
//! Both are newtypes over `u32`. `NodeHandle` is a direct index into the
//! board-wide node arena and stays valid after its route is removed, which is
//! what lets name lookups outlive board ids (the board reuses those).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a registered route.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct RouteId(pub u32);

impl fmt::Debug for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RouteId({})", self.0)
    }
}

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "route{}", self.0)
    }
}

/// Key of a node in the board-wide `NodeArena`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct NodeHandle(pub u32);

impl fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeHandle({})", self.0)
    }
}

impl fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_handle_display() {
        assert_eq!(NodeHandle(42).to_string(), "NodeHandle(42)");
    }

    #[test]
    fn test_route_id_display() {
        assert_eq!(RouteId(3).to_string(), "route3");
        assert_eq!(format!("{:?}", RouteId(3)), "RouteId(3)");
    }
}
