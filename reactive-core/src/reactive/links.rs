//! The relational graph (§4.4, L4).
//!
//! Tracks parent→child linking so that a mutation on a deeply nested child
//! can be relayed to subscribers sitting on an ancestor, with the link key
//! prefixed onto the event's path at each hop (§3 invariant 3). Per the
//! "Ownership of children" design note (§9) this is *not* a tree of
//! owning references — it's `parent_id -> {link_key -> child_id}` plus a
//! reverse multimap, both keyed by the stable [`HandleId`]s the
//! [`Registry`](super::registry::Registry) already owns.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

use super::id::HandleId;
use super::value::PathKey;

/// Forward and reverse adjacency for the parent/child linking graph.
#[derive(Default)]
pub struct LinkGraph {
    /// parent -> (link key -> child)
    forward: RwLock<HashMap<HandleId, HashMap<PathKey, HandleId>>>,
    /// child -> set of parents holding a link to it (a child can in
    /// principle be reachable from more than one parent slot).
    reverse: RwLock<HashMap<HandleId, HashSet<HandleId>>>,
}

impl LinkGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `parent`'s `key` slot now holds `child`. Idempotent.
    pub fn link(&self, parent: HandleId, key: PathKey, child: HandleId) {
        self.forward
            .write()
            .entry(parent)
            .or_default()
            .insert(key, child);
        self.reverse.write().entry(child).or_default().insert(parent);
    }

    /// Remove the link at `parent`'s `key` slot, if any, and return the
    /// child that was there (callers use this to decide whether the child
    /// now has zero remaining parents and should be torn down, §4.4).
    pub fn unlink(&self, parent: HandleId, key: &PathKey) -> Option<HandleId> {
        let child = self.forward.write().get_mut(&parent).and_then(|m| m.remove(key));
        if let Some(child_id) = child {
            let mut reverse = self.reverse.write();
            if let Some(parents) = reverse.get_mut(&child_id) {
                parents.remove(&parent);
                if parents.is_empty() {
                    reverse.remove(&child_id);
                }
            }
        }
        child
    }

    /// Remove every outgoing link from `parent` (used on parent destroy),
    /// returning the children that were linked.
    pub fn unlink_all(&self, parent: HandleId) -> Vec<HandleId> {
        let children: Vec<HandleId> = self
            .forward
            .write()
            .remove(&parent)
            .map(|m| m.into_values().collect())
            .unwrap_or_default();
        let mut reverse = self.reverse.write();
        for child in &children {
            if let Some(parents) = reverse.get_mut(child) {
                parents.remove(&parent);
                if parents.is_empty() {
                    reverse.remove(child);
                }
            }
        }
        children
    }

    pub fn child_at(&self, parent: HandleId, key: &PathKey) -> Option<HandleId> {
        self.forward.read().get(&parent)?.get(key).copied()
    }

    pub fn children_of(&self, parent: HandleId) -> Vec<(PathKey, HandleId)> {
        self.forward
            .read()
            .get(&parent)
            .map(|m| m.iter().map(|(k, v)| (k.clone(), *v)).collect())
            .unwrap_or_default()
    }

    pub fn parents_of(&self, child: HandleId) -> HashSet<HandleId> {
        self.reverse.read().get(&child).cloned().unwrap_or_default()
    }

    pub fn has_parents(&self, child: HandleId) -> bool {
        self.reverse
            .read()
            .get(&child)
            .map(|p| !p.is_empty())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_and_find_child() {
        let graph = LinkGraph::new();
        let parent = HandleId::new();
        let child = HandleId::new();
        graph.link(parent, PathKey::from("user"), child);

        assert_eq!(graph.child_at(parent, &PathKey::from("user")), Some(child));
        assert!(graph.has_parents(child));
        assert_eq!(graph.parents_of(child).len(), 1);
    }

    #[test]
    fn unlink_removes_both_directions() {
        let graph = LinkGraph::new();
        let parent = HandleId::new();
        let child = HandleId::new();
        graph.link(parent, PathKey::from("user"), child);

        let removed = graph.unlink(parent, &PathKey::from("user"));
        assert_eq!(removed, Some(child));
        assert!(!graph.has_parents(child));
        assert_eq!(graph.child_at(parent, &PathKey::from("user")), None);
    }

    #[test]
    fn unlink_all_clears_every_outgoing_edge() {
        let graph = LinkGraph::new();
        let parent = HandleId::new();
        let child_a = HandleId::new();
        let child_b = HandleId::new();
        graph.link(parent, PathKey::from("a"), child_a);
        graph.link(parent, PathKey::from("b"), child_b);

        let children = graph.unlink_all(parent);
        assert_eq!(children.len(), 2);
        assert!(!graph.has_parents(child_a));
        assert!(!graph.has_parents(child_b));
        assert!(graph.children_of(parent).is_empty());
    }

    #[test]
    fn child_can_have_multiple_parents() {
        let graph = LinkGraph::new();
        let parent_a = HandleId::new();
        let parent_b = HandleId::new();
        let child = HandleId::new();
        graph.link(parent_a, PathKey::from("x"), child);
        graph.link(parent_b, PathKey::from("y"), child);

        assert_eq!(graph.parents_of(child).len(), 2);
        graph.unlink(parent_a, &PathKey::from("x"));
        assert_eq!(graph.parents_of(child).len(), 1);
        assert!(graph.has_parents(child));
    }
}
