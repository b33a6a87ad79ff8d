//! Host capability record.
//!
//! The patch engine never touches a concrete tree API. Everything it does to
//! the host goes through [`HostOps`], so the same engine drives a DOM, a
//! terminal buffer or the in-memory [`super::MemoryHost`] used in tests.

use std::fmt;

use crate::reactive::Value;

/// Opaque handle to a node owned by the host.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostNode(u64);

impl HostNode {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for HostNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Operations the patch engine needs from a host tree.
pub trait HostOps {
    /// Create a detached element.
    fn create_element(&self, tag: &str) -> HostNode;

    /// Create a detached text node.
    fn create_text(&self, text: &str) -> HostNode;

    /// Create an empty marker node (fragment boundaries, placeholders).
    fn create_anchor(&self) -> HostNode;

    fn set_text(&self, node: HostNode, text: &str);

    /// Apply a property change. `next = None` removes the property.
    fn patch_prop(&self, el: HostNode, key: &str, prev: Option<&Value>, next: Option<&Value>);

    /// Insert `child` into `parent` before `anchor`, or append when `anchor`
    /// is `None`. A child that is already attached somewhere is moved.
    fn insert(&self, child: HostNode, parent: HostNode, anchor: Option<HostNode>);

    /// Detach `child` from its parent.
    fn remove(&self, child: HostNode);

    fn parent_node(&self, node: HostNode) -> Option<HostNode>;

    fn next_sibling(&self, node: HostNode) -> Option<HostNode>;
}
