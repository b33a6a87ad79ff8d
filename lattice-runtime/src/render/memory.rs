//! In-memory reference host.
//!
//! `MemoryHost` keeps a plain node tree and records every mutation the
//! engine performs, which makes it the workhorse of the test suite:
//! assertions are made on the serialized tree and on the operation log.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::Write as _;

use indexmap::IndexMap;

use super::host::{HostNode, HostOps};
use crate::reactive::Value;

/// One recorded host mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum HostOp {
    CreateElement { node: HostNode, tag: String },
    CreateText { node: HostNode, text: String },
    CreateAnchor { node: HostNode },
    SetText { node: HostNode, text: String },
    PatchProp { node: HostNode, key: String, value: Option<Value> },
    /// A detached node was attached.
    Insert { node: HostNode, parent: HostNode, anchor: Option<HostNode> },
    /// An attached node was relocated.
    Move { node: HostNode, parent: HostNode, anchor: Option<HostNode> },
    Remove { node: HostNode },
}

impl HostOp {
    pub fn is_create(&self) -> bool {
        matches!(
            self,
            HostOp::CreateElement { .. } | HostOp::CreateText { .. } | HostOp::CreateAnchor { .. }
        )
    }

    pub fn is_move(&self) -> bool {
        matches!(self, HostOp::Move { .. })
    }

    pub fn is_remove(&self) -> bool {
        matches!(self, HostOp::Remove { .. })
    }
}

#[derive(Debug, Clone)]
enum NodeData {
    Element { tag: String, props: IndexMap<String, Value> },
    Text(String),
    Anchor,
}

#[derive(Debug)]
struct MemNode {
    data: NodeData,
    parent: Option<HostNode>,
    children: Vec<HostNode>,
}

#[derive(Debug, Default)]
struct MemoryTree {
    nodes: HashMap<HostNode, MemNode>,
    next_id: u64,
    ops: Vec<HostOp>,
}

impl MemoryTree {
    fn alloc(&mut self, data: NodeData) -> HostNode {
        self.next_id += 1;
        let node = HostNode::from_raw(self.next_id);
        self.nodes.insert(
            node,
            MemNode {
                data,
                parent: None,
                children: Vec::new(),
            },
        );
        node
    }

    /// Drop `node` and everything below it from the arena.
    fn free(&mut self, node: HostNode) {
        let mut stack = vec![node];
        while let Some(node) = stack.pop() {
            if let Some(freed) = self.nodes.remove(&node) {
                stack.extend(freed.children);
            }
        }
    }

    fn detach(&mut self, node: HostNode) -> bool {
        let Some(parent) = self.nodes.get_mut(&node).and_then(|n| n.parent.take()) else {
            return false;
        };
        if let Some(parent) = self.nodes.get_mut(&parent) {
            parent.children.retain(|&child| child != node);
        }
        true
    }
}

/// A host tree that lives in memory and logs every operation.
#[derive(Debug, Default)]
pub struct MemoryHost {
    tree: RefCell<MemoryTree>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a container element to render into. Not recorded.
    pub fn create_root(&self) -> HostNode {
        self.tree.borrow_mut().alloc(NodeData::Element {
            tag: "root".to_string(),
            props: IndexMap::new(),
        })
    }

    /// Snapshot of the operation log.
    pub fn ops(&self) -> Vec<HostOp> {
        self.tree.borrow().ops.clone()
    }

    /// Live nodes, roots and detached nodes included.
    pub fn node_count(&self) -> usize {
        self.tree.borrow().nodes.len()
    }

    pub fn clear_ops(&self) {
        self.tree.borrow_mut().ops.clear();
    }

    /// Number of logged operations matching `pred`.
    pub fn count_ops(&self, pred: impl Fn(&HostOp) -> bool) -> usize {
        self.tree.borrow().ops.iter().filter(|op| pred(op)).count()
    }

    pub fn children(&self, node: HostNode) -> Vec<HostNode> {
        self.tree
            .borrow()
            .nodes
            .get(&node)
            .map(|n| n.children.clone())
            .unwrap_or_default()
    }

    pub fn tag(&self, node: HostNode) -> Option<String> {
        match self.tree.borrow().nodes.get(&node).map(|n| &n.data) {
            Some(NodeData::Element { tag, .. }) => Some(tag.clone()),
            _ => None,
        }
    }

    pub fn prop(&self, node: HostNode, key: &str) -> Option<Value> {
        match self.tree.borrow().nodes.get(&node).map(|n| &n.data) {
            Some(NodeData::Element { props, .. }) => props.get(key).cloned(),
            _ => None,
        }
    }

    /// Concatenated text of every text node below `node`.
    pub fn text_content(&self, node: HostNode) -> String {
        let tree = self.tree.borrow();
        let mut out = String::new();
        collect_text(&tree, node, &mut out);
        out
    }

    /// Serialize the children of `node` as markup. Anchors are omitted.
    pub fn inner_html(&self, node: HostNode) -> String {
        let tree = self.tree.borrow();
        let mut out = String::new();
        if let Some(n) = tree.nodes.get(&node) {
            for &child in &n.children {
                serialize(&tree, child, &mut out);
            }
        }
        out
    }

    /// Serialize `node` itself as markup.
    pub fn to_html(&self, node: HostNode) -> String {
        let tree = self.tree.borrow();
        let mut out = String::new();
        serialize(&tree, node, &mut out);
        out
    }
}

fn collect_text(tree: &MemoryTree, node: HostNode, out: &mut String) {
    let Some(n) = tree.nodes.get(&node) else {
        return;
    };
    match &n.data {
        NodeData::Text(text) => out.push_str(text),
        NodeData::Anchor => {}
        NodeData::Element { .. } => {
            for &child in &n.children {
                collect_text(tree, child, out);
            }
        }
    }
}

fn serialize(tree: &MemoryTree, node: HostNode, out: &mut String) {
    let Some(n) = tree.nodes.get(&node) else {
        return;
    };
    match &n.data {
        NodeData::Text(text) => out.push_str(text),
        NodeData::Anchor => {}
        NodeData::Element { tag, props } => {
            out.push('<');
            out.push_str(tag);
            for (key, value) in props {
                let _ = write!(out, " {key}=\"{}\"", value.display_text());
            }
            out.push('>');
            for &child in &n.children {
                serialize(tree, child, out);
            }
            let _ = write!(out, "</{tag}>");
        }
    }
}

impl HostOps for MemoryHost {
    fn create_element(&self, tag: &str) -> HostNode {
        let mut tree = self.tree.borrow_mut();
        let node = tree.alloc(NodeData::Element {
            tag: tag.to_string(),
            props: IndexMap::new(),
        });
        tree.ops.push(HostOp::CreateElement {
            node,
            tag: tag.to_string(),
        });
        node
    }

    fn create_text(&self, text: &str) -> HostNode {
        let mut tree = self.tree.borrow_mut();
        let node = tree.alloc(NodeData::Text(text.to_string()));
        tree.ops.push(HostOp::CreateText {
            node,
            text: text.to_string(),
        });
        node
    }

    fn create_anchor(&self) -> HostNode {
        let mut tree = self.tree.borrow_mut();
        let node = tree.alloc(NodeData::Anchor);
        tree.ops.push(HostOp::CreateAnchor { node });
        node
    }

    fn set_text(&self, node: HostNode, text: &str) {
        let mut tree = self.tree.borrow_mut();
        if let Some(MemNode {
            data: NodeData::Text(content),
            ..
        }) = tree.nodes.get_mut(&node)
        {
            *content = text.to_string();
        }
        tree.ops.push(HostOp::SetText {
            node,
            text: text.to_string(),
        });
    }

    fn patch_prop(&self, el: HostNode, key: &str, _prev: Option<&Value>, next: Option<&Value>) {
        let mut tree = self.tree.borrow_mut();
        if let Some(MemNode {
            data: NodeData::Element { props, .. },
            ..
        }) = tree.nodes.get_mut(&el)
        {
            match next {
                Some(value) => {
                    props.insert(key.to_string(), value.clone());
                }
                None => {
                    props.shift_remove(key);
                }
            }
        }
        tree.ops.push(HostOp::PatchProp {
            node: el,
            key: key.to_string(),
            value: next.cloned(),
        });
    }

    fn insert(&self, child: HostNode, parent: HostNode, anchor: Option<HostNode>) {
        let mut tree = self.tree.borrow_mut();
        let moved = tree.detach(child);
        let live = tree.nodes.contains_key(&child);

        if let Some(p) = tree.nodes.get_mut(&parent).filter(|_| live) {
            let index = anchor
                .and_then(|a| p.children.iter().position(|&c| c == a))
                .unwrap_or(p.children.len());
            p.children.insert(index, child);
        }
        if let Some(c) = tree.nodes.get_mut(&child) {
            c.parent = Some(parent);
        }

        tree.ops.push(if moved {
            HostOp::Move {
                node: child,
                parent,
                anchor,
            }
        } else {
            HostOp::Insert {
                node: child,
                parent,
                anchor,
            }
        });
    }

    /// Removed nodes are never reinserted, so the subtree is freed.
    fn remove(&self, child: HostNode) {
        let mut tree = self.tree.borrow_mut();
        tree.detach(child);
        tree.free(child);
        tree.ops.push(HostOp::Remove { node: child });
    }

    fn parent_node(&self, node: HostNode) -> Option<HostNode> {
        self.tree.borrow().nodes.get(&node).and_then(|n| n.parent)
    }

    fn next_sibling(&self, node: HostNode) -> Option<HostNode> {
        let tree = self.tree.borrow();
        let parent = tree.nodes.get(&node)?.parent?;
        let siblings = &tree.nodes.get(&parent)?.children;
        let index = siblings.iter().position(|&c| c == node)?;
        siblings.get(index + 1).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_before_anchor_and_move() {
        let host = MemoryHost::new();
        let root = host.create_root();
        let a = host.create_text("a");
        let b = host.create_text("b");
        host.insert(b, root, None);
        host.insert(a, root, Some(b));
        assert_eq!(host.inner_html(root), "ab");

        host.insert(a, root, None);
        assert_eq!(host.inner_html(root), "ba");
        assert_eq!(host.count_ops(HostOp::is_move), 1);
        assert_eq!(host.next_sibling(b), Some(a));
        assert_eq!(host.parent_node(a), Some(root));
    }

    #[test]
    fn serializes_elements_and_props() {
        let host = MemoryHost::new();
        let root = host.create_root();
        let div = host.create_element("div");
        host.patch_prop(div, "id", None, Some(&Value::from("main")));
        let text = host.create_text("hi");
        host.insert(text, div, None);
        host.insert(div, root, None);
        let anchor = host.create_anchor();
        host.insert(anchor, root, None);

        assert_eq!(host.inner_html(root), "<div id=\"main\">hi</div>");
        assert_eq!(host.text_content(root), "hi");

        host.remove(div);
        assert_eq!(host.inner_html(root), "");
        assert_eq!(host.parent_node(div), None);
    }

    #[test]
    fn removed_subtrees_are_freed() {
        let host = MemoryHost::new();
        let root = host.create_root();
        let list = host.create_element("ul");
        for text in ["a", "b", "c"] {
            let item = host.create_element("li");
            host.insert(host.create_text(text), item, None);
            host.insert(item, list, None);
        }
        host.insert(list, root, None);
        assert_eq!(host.node_count(), 8);

        host.remove(list);
        assert_eq!(host.node_count(), 1);
        assert_eq!(host.tag(list), None);
        assert_eq!(host.inner_html(root), "");
    }
}
