//! Execution tree: one node per nested invocation context, with the
//! blocking bookkeeping that keeps a parent from recording samples while
//! a child beneath it is still exploring.

use crate::problem::ProblemSize;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct NodeId(pub(crate) usize);

pub(crate) struct NodeData {
    pub(crate) name: String,
    /// Index into the runtime's registered selection states; `None`
    /// only for the root sentinel.
    pub(crate) registry: Option<usize>,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    /// Multiset of problem sizes seen through this node.
    pub(crate) problem_sizes: HashMap<ProblemSize, u64>,
    /// Problem size of the invocation currently in flight (or the most
    /// recent one).
    pub(crate) current: Option<ProblemSize>,
    /// Child nodes that have not yet converged, keyed by the problem
    /// size this node was evaluating when the child blocked it.
    blocked_by: HashMap<ProblemSize, HashSet<usize>>,
}

pub(crate) struct ExecutionTree {
    nodes: Vec<NodeData>,
    name_counters: HashMap<String, u32>,
}

impl ExecutionTree {
    pub(crate) const ROOT: NodeId = NodeId(0);

    pub(crate) fn new() -> Self {
        let root = NodeData {
            name: "Execution root".to_string(),
            registry: None,
            parent: None,
            children: Vec::new(),
            problem_sizes: HashMap::new(),
            current: None,
            blocked_by: HashMap::new(),
        };
        Self {
            nodes: vec![root],
            name_counters: HashMap::new(),
        }
    }

    /// Create a node under `parent`, named with a per-registry ordinal.
    pub(crate) fn register(
        &mut self,
        parent: NodeId,
        registry_name: &str,
        registry: Option<usize>,
    ) -> NodeId {
        let ordinal = *self
            .name_counters
            .entry(registry_name.to_string())
            .and_modify(|count| *count += 1)
            .or_insert(1);
        let id = NodeId(self.nodes.len());
        self.nodes.push(NodeData {
            name: format!("{registry_name} {ordinal:02}"),
            registry,
            parent: Some(parent),
            children: Vec::new(),
            problem_sizes: HashMap::new(),
            current: None,
            blocked_by: HashMap::new(),
        });
        self.nodes[parent.0].children.push(id);
        id
    }

    pub(crate) fn node(&self, id: NodeId) -> &NodeData {
        &self.nodes[id.0]
    }

    pub(crate) fn set_problem_size(&mut self, id: NodeId, size: ProblemSize) {
        let node = &mut self.nodes[id.0];
        *node.problem_sizes.entry(size.clone()).or_insert(0) += 1;
        node.current = Some(size);
    }

    /// Mark `id`'s parent as blocked for the parent's current problem
    /// size. The root is never blocked.
    pub(crate) fn block_parent(&mut self, id: NodeId) {
        let Some(parent) = self.nodes[id.0].parent else {
            return;
        };
        if parent == Self::ROOT {
            return;
        }
        let Some(size) = self.nodes[parent.0].current.clone() else {
            return;
        };
        self.nodes[parent.0]
            .blocked_by
            .entry(size)
            .or_default()
            .insert(id.0);
    }

    /// Release the block on `id`'s parent once `id`'s selection has
    /// converged.
    pub(crate) fn unblock_parent(&mut self, id: NodeId) {
        let Some(parent) = self.nodes[id.0].parent else {
            return;
        };
        if parent == Self::ROOT {
            return;
        }
        let Some(size) = self.nodes[parent.0].current.clone() else {
            return;
        };
        if let Some(blockers) = self.nodes[parent.0].blocked_by.get_mut(&size) {
            blockers.remove(&id.0);
        }
    }

    /// Whether `id` is still waiting on an unconverged child for its
    /// current problem size.
    pub(crate) fn is_blocked(&self, id: NodeId) -> bool {
        let node = &self.nodes[id.0];
        let Some(size) = &node.current else {
            return false;
        };
        node.blocked_by
            .get(size)
            .map(|blockers| !blockers.is_empty())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nodes_are_named_with_registry_ordinals() {
        let mut tree = ExecutionTree::new();
        let a = tree.register(ExecutionTree::ROOT, "conv", Some(0));
        let b = tree.register(ExecutionTree::ROOT, "conv", Some(0));
        assert_eq!(tree.node(a).name, "conv 01");
        assert_eq!(tree.node(b).name, "conv 02");
        assert_eq!(tree.node(ExecutionTree::ROOT).children, vec![a, b]);
    }

    #[test]
    fn block_and_unblock_track_parent_problem_size() {
        let mut tree = ExecutionTree::new();
        let outer = tree.register(ExecutionTree::ROOT, "outer", Some(0));
        let inner = tree.register(outer, "inner", Some(1));
        let size = ProblemSize::dims(&[32]);

        tree.set_problem_size(outer, size.clone());
        tree.block_parent(inner);
        assert!(tree.is_blocked(outer));

        tree.unblock_parent(inner);
        assert!(!tree.is_blocked(outer));
    }

    #[test]
    fn root_is_never_blocked() {
        let mut tree = ExecutionTree::new();
        let child = tree.register(ExecutionTree::ROOT, "op", Some(0));
        tree.set_problem_size(child, ProblemSize::dims(&[8]));
        tree.block_parent(child);
        assert!(!tree.is_blocked(ExecutionTree::ROOT));
    }

    #[test]
    fn blocks_are_scoped_per_problem_size() {
        let mut tree = ExecutionTree::new();
        let outer = tree.register(ExecutionTree::ROOT, "outer", Some(0));
        let inner = tree.register(outer, "inner", Some(1));
        let small = ProblemSize::dims(&[8]);
        let large = ProblemSize::dims(&[1024]);

        tree.set_problem_size(outer, small);
        tree.block_parent(inner);
        tree.set_problem_size(outer, large);
        assert!(!tree.is_blocked(outer));
    }

    #[test]
    fn counts_problem_sizes_as_multiset() {
        let mut tree = ExecutionTree::new();
        let node = tree.register(ExecutionTree::ROOT, "op", Some(0));
        let size = ProblemSize::dims(&[16]);
        tree.set_problem_size(node, size.clone());
        tree.set_problem_size(node, size.clone());
        assert_eq!(tree.node(node).problem_sizes.get(&size), Some(&2));
    }
}
