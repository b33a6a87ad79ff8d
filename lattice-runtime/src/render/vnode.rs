//! Node descriptions.
//!
//! A [`VNode`] describes a piece of UI before it is mounted: an element, a
//! text node, a fragment of siblings, or a component. Descriptions are cheap
//! to clone (shared behind an `Rc`) and never mutated once built.
//!
//! For diffing, node identity is `(type, key)`. Two descriptions are the same
//! node if they have the same variant, the same tag or component definition,
//! and the same key. Reference equality is only a shortcut: patching a node
//! against the very same description does nothing.

use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use super::component::Component;
use super::keep_alive::{CacheKey, KeepAliveCtx};
use crate::reactive::Value;

/// Stable identity of a node among its siblings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeKey {
    Str(Rc<str>),
    Int(i64),
}

impl From<&str> for NodeKey {
    fn from(key: &str) -> Self {
        NodeKey::Str(Rc::from(key))
    }
}

impl From<String> for NodeKey {
    fn from(key: String) -> Self {
        NodeKey::Str(Rc::from(key))
    }
}

impl From<i64> for NodeKey {
    fn from(key: i64) -> Self {
        NodeKey::Int(key)
    }
}

impl From<i32> for NodeKey {
    fn from(key: i32) -> Self {
        NodeKey::Int(i64::from(key))
    }
}

impl From<usize> for NodeKey {
    /// Indices beyond `i64::MAX` become string keys rather than wrapping.
    fn from(key: usize) -> Self {
        match i64::try_from(key) {
            Ok(key) => NodeKey::Int(key),
            Err(_) => NodeKey::Str(Rc::from(key.to_string())),
        }
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKey::Str(s) => f.write_str(s),
            NodeKey::Int(i) => write!(f, "{i}"),
        }
    }
}

/// Ordered property bag of an element or component.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Props(IndexMap<Rc<str>, Value>);

impl Props {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(Rc::from(key), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Rc<str>, &Value)> {
        self.0.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Rc<str>> {
        self.0.keys()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: AsRef<str>, V: Into<Value>> FromIterator<(K, V)> for Props {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (Rc::from(k.as_ref()), v.into()))
                .collect(),
        )
    }
}

/// Children passed to a component.
pub type Slots = Rc<[VNode]>;

/// The closed set of node variants.
#[derive(Clone)]
pub enum VNodeKind {
    Element {
        tag: Rc<str>,
        props: Props,
        children: Vec<VNode>,
    },
    Text(Rc<str>),
    Fragment(Vec<VNode>),
    Component {
        component: Component,
        props: Props,
        children: Slots,
    },
}

/// Marks a component node as owned by a keep-alive boundary.
#[derive(Clone)]
pub(crate) struct KeepAliveLink {
    pub(crate) ctx: Weak<KeepAliveCtx>,
    pub(crate) key: CacheKey,
}

#[derive(Clone)]
struct VNodeData {
    kind: VNodeKind,
    key: Option<NodeKey>,
    keep_alive: Option<KeepAliveLink>,
}

/// An immutable node description.
#[derive(Clone)]
pub struct VNode(Rc<VNodeData>);

impl VNode {
    fn from_kind(kind: VNodeKind) -> Self {
        Self(Rc::new(VNodeData {
            kind,
            key: None,
            keep_alive: None,
        }))
    }

    pub fn element(tag: &str, props: Props, children: Vec<VNode>) -> Self {
        Self::from_kind(VNodeKind::Element {
            tag: Rc::from(tag),
            props,
            children,
        })
    }

    pub fn text(text: impl Into<Rc<str>>) -> Self {
        Self::from_kind(VNodeKind::Text(text.into()))
    }

    pub fn fragment(children: Vec<VNode>) -> Self {
        Self::from_kind(VNodeKind::Fragment(children))
    }

    pub fn component(component: &Component, props: Props) -> Self {
        Self::component_with_children(component, props, Vec::new())
    }

    pub fn component_with_children(component: &Component, props: Props, children: Vec<VNode>) -> Self {
        Self::from_kind(VNodeKind::Component {
            component: component.clone(),
            props,
            children: Rc::from(children),
        })
    }

    /// Attach a stable key.
    pub fn with_key(self, key: impl Into<NodeKey>) -> Self {
        let mut data = Rc::unwrap_or_clone(self.0);
        data.key = Some(key.into());
        Self(Rc::new(data))
    }

    pub(crate) fn kept_alive(&self, link: KeepAliveLink) -> Self {
        let mut data = (*self.0).clone();
        data.keep_alive = Some(link);
        Self(Rc::new(data))
    }

    pub(crate) fn keep_alive_link(&self) -> Option<&KeepAliveLink> {
        self.0.keep_alive.as_ref()
    }

    pub fn kind(&self) -> &VNodeKind {
        &self.0.kind
    }

    pub fn key(&self) -> Option<&NodeKey> {
        self.0.key.as_ref()
    }

    /// Whether both handles point at the same description.
    pub fn ptr_eq(&self, other: &VNode) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Same variant, tag/definition and key: the node can be patched in place.
    pub fn same_type(&self, other: &VNode) -> bool {
        if self.key() != other.key() {
            return false;
        }
        match (self.kind(), other.kind()) {
            (VNodeKind::Element { tag: a, .. }, VNodeKind::Element { tag: b, .. }) => a == b,
            (VNodeKind::Text(_), VNodeKind::Text(_)) => true,
            (VNodeKind::Fragment(_), VNodeKind::Fragment(_)) => true,
            (
                VNodeKind::Component { component: a, .. },
                VNodeKind::Component { component: b, .. },
            ) => a == b,
            _ => false,
        }
    }

    pub(crate) fn as_component(&self) -> Option<&Component> {
        match self.kind() {
            VNodeKind::Component { component, .. } => Some(component),
            _ => None,
        }
    }
}

impl fmt::Debug for VNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = match self.kind() {
            VNodeKind::Element { tag, props, children } => {
                let mut d = f.debug_struct("Element");
                d.field("tag", tag).field("props", props).field("children", children);
                d
            }
            VNodeKind::Text(text) => {
                let mut d = f.debug_struct("Text");
                d.field("text", text);
                d
            }
            VNodeKind::Fragment(children) => {
                let mut d = f.debug_struct("Fragment");
                d.field("children", children);
                d
            }
            VNodeKind::Component { component, props, children } => {
                let mut d = f.debug_struct("Component");
                d.field("name", &component.name())
                    .field("props", props)
                    .field("children", &children.len());
                d
            }
        };
        if let Some(key) = self.key() {
            dbg.field("key", key);
        }
        dbg.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn large_usize_keys_do_not_wrap() {
        assert_eq!(NodeKey::from(7usize), NodeKey::Int(7));
        let huge = usize::MAX;
        if i64::try_from(huge).is_err() {
            assert_eq!(NodeKey::from(huge), NodeKey::from(huge.to_string()));
            assert_ne!(NodeKey::from(huge), NodeKey::Int(-1));
        }
    }

    #[test]
    fn identity_is_type_and_key() {
        let a = VNode::element("li", Props::new(), vec![]).with_key(1);
        let b = VNode::element("li", Props::new().with("class", "x"), vec![]).with_key(1);
        let c = VNode::element("li", Props::new(), vec![]).with_key(2);
        let d = VNode::element("p", Props::new(), vec![]).with_key(1);

        assert!(a.same_type(&b));
        assert!(!a.same_type(&c));
        assert!(!a.same_type(&d));
        assert!(!a.ptr_eq(&b));
        assert!(a.ptr_eq(&a.clone()));
        assert!(VNode::text("x").same_type(&VNode::text("y")));
        assert!(!VNode::text("x").same_type(&VNode::fragment(vec![])));
    }

    #[test]
    fn props_compare_by_value() {
        let a = Props::new().with("id", 1).with("title", "t");
        let b: Props = [("id", Value::from(1)), ("title", Value::from("t"))].into_iter().collect();
        assert_eq!(a, b);
        assert_ne!(a, Props::new().with("id", 2));
    }
}
