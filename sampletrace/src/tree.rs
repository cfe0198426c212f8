//! Interned call tree.
//!
//! Every distinct stack suffix maps to exactly one node. A node is keyed by
//! its parent's id plus its own raw stack element, which identifies the whole
//! suffix from that frame out to the outermost caller: two stacks that agree
//! from some frame onward share every node from that frame outward.
//!
//! Node ids are handed out in creation order starting at 1 and are never
//! reused. Id 0 means "no parent" and is only carried by the root.
//!
//! The tree is mutated through `&mut self` only and keeps no interior
//! mutability; parsing in parallel would need one tree per worker or external
//! locking around [`CallTree::resolve`].

use crate::frame::CallSite;
use std::collections::HashMap;

/// Identity of a tree node.
pub type NodeId = u64;

/// Parent id carried by the root.
pub const NO_PARENT: NodeId = 0;

/// Function name of the synthetic root.
pub const ROOT_NAME: &str = "(root)";

/// An interned stack suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeNode {
    pub id: NodeId,
    pub call_site: CallSite,
    pub parent: NodeId,
}

impl TreeNode {
    pub fn is_root(&self) -> bool {
        self.parent == NO_PARENT
    }
}

/// Call tree built from stacks given innermost frame first.
#[derive(Debug, Default)]
pub struct CallTree {
    /// Node with id `n` lives at index `n - 1`.
    nodes: Vec<TreeNode>,
    /// Parent id -> raw stack element -> child id.
    children: HashMap<NodeId, HashMap<String, NodeId>>,
    root: Option<NodeId>,
    /// Number of nodes already handed out by `drain_new`.
    flushed: usize,
}

impl CallTree {
    /// Create an empty tree. The root is created by the first resolution.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a stack (innermost frame first) to its node, creating the
    /// missing part of the chain.
    ///
    /// The chain is walked from the outermost caller inward, so arbitrarily
    /// deep stacks never recurse. Resolving a stack that was seen before
    /// returns the same id and allocates nothing.
    pub fn resolve<S: AsRef<str>>(&mut self, stack: &[S]) -> NodeId {
        let mut current = self.root();
        for element in stack.iter().rev() {
            current = self.child(current, element.as_ref());
        }
        current
    }

    fn root(&mut self) -> NodeId {
        if let Some(root) = self.root {
            return root;
        }
        let root = self.push(
            CallSite {
                function_name: ROOT_NAME.to_string(),
                source_path: String::new(),
                line_number: 0,
            },
            NO_PARENT,
        );
        self.root = Some(root);
        root
    }

    fn child(&mut self, parent: NodeId, element: &str) -> NodeId {
        if let Some(&id) = self
            .children
            .get(&parent)
            .and_then(|siblings| siblings.get(element))
        {
            return id;
        }

        let id = self.push(CallSite::parse(element), parent);
        self.children
            .entry(parent)
            .or_default()
            .insert(element.to_string(), id);
        id
    }

    fn push(&mut self, call_site: CallSite, parent: NodeId) -> NodeId {
        let id = self.nodes.len() as NodeId + 1;
        self.nodes.push(TreeNode {
            id,
            call_site,
            parent,
        });
        id
    }

    /// Return the nodes created since the previous call, in creation order.
    pub fn drain_new(&mut self) -> &[TreeNode] {
        let start = self.flushed;
        self.flushed = self.nodes.len();
        &self.nodes[start..]
    }

    /// Look up a node by id.
    pub fn get(&self, id: NodeId) -> Option<&TreeNode> {
        let index = usize::try_from(id).ok()?.checked_sub(1)?;
        self.nodes.get(index)
    }

    /// Walk from a node to the root. Returns ids in leaf-to-root order.
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut chain = Vec::new();
        let mut current = self.get(id);
        while let Some(node) = current {
            chain.push(node.id);
            current = if node.is_root() {
                None
            } else {
                self.get(node.parent)
            };
        }
        chain
    }

    /// Number of live nodes, root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All nodes in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &TreeNode> {
        self.nodes.iter()
    }
}
