//! Long-lived engine state: the execution tree, the active parent
//! stack, the global first-alternative override and the registered
//! learned-state handles.

use crate::report::{self, RuntimeSnapshot};
use crate::state::SelectionState;
use crate::tree::{ExecutionTree, NodeId};
use std::cell::RefCell;
use std::rc::Rc;

pub(crate) struct RuntimeInner {
    pub(crate) tree: ExecutionTree,
    /// Stack of nodes currently evaluating an alternative; the top is
    /// the parent for any tuned call made beneath it. Empty means the
    /// root sentinel.
    pub(crate) parents: Vec<NodeId>,
    pub(crate) force_first: bool,
    pub(crate) registries: Vec<Rc<RefCell<SelectionState>>>,
}

/// Handle to one engine instance. Cloning is cheap and all clones share
/// state. The handle is deliberately not `Send`: the engine assumes
/// single-threaded reentrant use, and moving it across threads is a
/// compile error rather than undefined tuning behavior.
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RefCell<RuntimeInner>>,
}

impl Runtime {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(RuntimeInner {
                tree: ExecutionTree::new(),
                parents: Vec::new(),
                force_first: false,
                registries: Vec::new(),
            })),
        }
    }

    /// Force every registry bound to this runtime to always dispatch to
    /// its first alternative, skipping measurement, tree bookkeeping
    /// and caching. Permanent for the runtime's lifetime; intended for
    /// deterministic production runs.
    pub fn force_first_alternative(&self) {
        self.inner.borrow_mut().force_first = true;
    }

    pub fn is_forced_to_first(&self) -> bool {
        self.inner.borrow().force_first
    }

    /// Indented textual rendering of the execution tree with per-node
    /// alternative distributions and max observed speedups.
    pub fn tree_report(&self) -> String {
        report::render_tree(&self.inner.borrow())
    }

    /// Per-node timing tables for every registered node.
    pub fn table_report(&self) -> String {
        report::render_tables(&self.inner.borrow())
    }

    /// Serializable snapshot of all learned state.
    pub fn snapshot(&self) -> RuntimeSnapshot {
        report::snapshot(&self.inner.borrow())
    }

    pub(crate) fn register_state(&self, state: Rc<RefCell<SelectionState>>) -> usize {
        let mut inner = self.inner.borrow_mut();
        inner.registries.push(state);
        inner.registries.len() - 1
    }

    pub(crate) fn register_node(
        &self,
        parent: NodeId,
        registry_name: &str,
        registry: Option<usize>,
    ) -> NodeId {
        self.inner
            .borrow_mut()
            .tree
            .register(parent, registry_name, registry)
    }

    pub(crate) fn current_parent(&self) -> NodeId {
        self.inner
            .borrow()
            .parents
            .last()
            .copied()
            .unwrap_or(ExecutionTree::ROOT)
    }

    pub(crate) fn push_parent(&self, node: NodeId) {
        self.inner.borrow_mut().parents.push(node);
    }

    pub(crate) fn pop_parent(&self) {
        self.inner.borrow_mut().parents.pop();
    }

    pub(crate) fn set_problem_size(&self, node: NodeId, size: crate::problem::ProblemSize) {
        self.inner.borrow_mut().tree.set_problem_size(node, size);
    }

    pub(crate) fn block_parent(&self, node: NodeId) {
        self.inner.borrow_mut().tree.block_parent(node);
    }

    pub(crate) fn unblock_parent(&self, node: NodeId) {
        self.inner.borrow_mut().tree.unblock_parent(node);
    }

    pub(crate) fn is_blocked(&self, node: NodeId) -> bool {
        self.inner.borrow().tree.is_blocked(node)
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}
