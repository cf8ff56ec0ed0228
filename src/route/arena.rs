//! Board-wide node arena.
//!
//! Every realized node gets a handle that is never reused. Names point at
//! handles, not board ids: a processor id freed by one route is handed to the
//! next, while a handle keeps meaning the same node forever.
//!
//! Entries of removed routes are kept only while a live route still refers to
//! them, so the arena holds the live nodes plus those references.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

use super::id::{NodeHandle, RouteId};
use super::node::NodeKind;
use crate::error::{BoardError, Result};
use crate::signal::SignalShape;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArenaEntry {
    pub route: RouteId,
    pub name: Option<String>,
    pub kind: NodeKind,
    pub input: SignalShape,
    pub output: SignalShape,
    /// Processor id, for nodes living on the data processor
    pub board_id: Option<u8>,
    pub removed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeArena {
    entries: BTreeMap<u32, ArenaEntry>,
    next: u32,
    names: HashMap<String, NodeHandle>,
}

impl NodeArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entry: ArenaEntry) -> NodeHandle {
        let handle = NodeHandle(self.next);
        self.next += 1;
        if let Some(name) = &entry.name {
            self.names.insert(name.clone(), handle);
        }
        self.entries.insert(handle.0, entry);
        handle
    }

    pub fn get(&self, handle: NodeHandle) -> Option<&ArenaEntry> {
        self.entries.get(&handle.0)
    }

    pub fn get_mut(&mut self, handle: NodeHandle) -> Option<&mut ArenaEntry> {
        self.entries.get_mut(&handle.0)
    }

    /// Handle of a live named node
    pub fn lookup(&self, name: &str) -> Option<NodeHandle> {
        self.names.get(name).copied()
    }

    /// Live named node, or `InvalidOperation`
    pub fn resolve(&self, name: &str) -> Result<(NodeHandle, &ArenaEntry)> {
        self.lookup(name)
            .and_then(|h| self.get(h).filter(|e| !e.removed).map(|e| (h, e)))
            .ok_or_else(|| BoardError::InvalidOperation(format!("no live node named '{}'", name)))
    }

    /// Mark every node of `route` removed and forget their names
    pub fn retire_route(&mut self, route: RouteId) {
        for entry in self.entries.values_mut().filter(|e| e.route == route) {
            entry.removed = true;
            if let Some(name) = &entry.name {
                self.names.remove(name);
            }
        }
    }

    /// Drop removed entries that no handle in `referenced` points at
    pub fn prune(&mut self, referenced: &HashSet<NodeHandle>) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|handle, entry| !entry.removed || referenced.contains(&NodeHandle(*handle)));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::catalog;

    fn entry(route: u32, name: Option<&str>, board_id: u8) -> ArenaEntry {
        let shape = catalog::switch().shape;
        ArenaEntry {
            route: RouteId(route),
            name: name.map(String::from),
            kind: NodeKind::Counter,
            input: shape.clone(),
            output: shape,
            board_id: Some(board_id),
            removed: false,
        }
    }

    #[test]
    fn test_names_survive_id_reuse() {
        let mut arena = NodeArena::new();
        let first = arena.insert(entry(0, Some("count"), 0));
        arena.retire_route(RouteId(0));
        assert!(arena.resolve("count").is_err());
        assert!(arena.get(first).unwrap().removed);

        let second = arena.insert(entry(1, Some("count"), 0));
        assert_ne!(first, second);
        assert_eq!(arena.resolve("count").unwrap().0, second);
    }

    #[test]
    fn test_prune_keeps_referenced_entries() {
        let mut arena = NodeArena::new();
        let kept = arena.insert(entry(0, Some("baseline"), 0));
        let dropped = arena.insert(entry(0, None, 1));
        let live = arena.insert(entry(1, None, 2));
        arena.retire_route(RouteId(0));

        let referenced = HashSet::from([kept]);
        assert_eq!(arena.prune(&referenced), 1);
        assert_eq!(arena.len(), 2);
        assert!(arena.get(kept).is_some());
        assert!(arena.get(dropped).is_none());
        assert!(!arena.get(live).unwrap().removed);

        // handles are not handed out twice
        assert_ne!(arena.insert(entry(2, None, 1)), dropped);

        arena.retire_route(RouteId(1));
        arena.retire_route(RouteId(2));
        arena.prune(&HashSet::new());
        assert!(arena.is_empty());
    }
}
