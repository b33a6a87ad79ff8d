//! Mount/Patch Engine
//!
//! The renderer walks a previous mounted tree and a next description and
//! turns the difference into host operations.
//!
//! # How Patching Works
//!
//! For each `(previous, next)` pair:
//!
//! 1. previous absent, next present: **mount** (create host nodes, run
//!    component setup and first render).
//! 2. previous present, next absent: **unmount** (tear down instances, remove
//!    host nodes), or **deactivate** into a keep-alive cache.
//! 3. both present with the same `(type, key)`: **patch in place**, reusing
//!    host nodes.
//! 4. both present with different identity: mount the next node where the
//!    previous one stood, then unmount the previous one.
//!
//! Children lists use the keyed algorithm in [`super::keyed`] as soon as any
//! sibling has a key, and a positional diff otherwise.
//!
//! # Mounted State
//!
//! The engine keeps its own mirror of what is mounted ([`MountedNode`]),
//! separate from the immutable descriptions: host handles, fragment anchors
//! and component instances live there.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use super::component::{self, ComponentInstance};
use super::host::{HostNode, HostOps};
use super::keyed;
use super::vnode::{Props, VNode, VNodeKind};
use crate::app::AppContext;
use crate::error;
use crate::scheduler;

/// Who is mounting: the owning component instance and application.
#[derive(Clone, Default)]
pub(crate) struct MountContext {
    pub(crate) parent: Option<Rc<ComponentInstance>>,
    pub(crate) app: Option<Rc<AppContext>>,
}

/// Engine-side state of a mounted node.
pub(crate) enum MountedState {
    Text {
        el: HostNode,
    },
    Element {
        el: HostNode,
        children: Vec<MountedNode>,
    },
    Fragment {
        start: HostNode,
        end: HostNode,
        children: Vec<MountedNode>,
    },
    Component {
        instance: Rc<ComponentInstance>,
    },
    /// A component whose setup or first render failed.
    Failed {
        placeholder: HostNode,
    },
}

/// A mounted description plus the host state that realizes it.
pub(crate) struct MountedNode {
    pub(crate) vnode: VNode,
    pub(crate) state: MountedState,
}

impl MountedNode {
    /// The component instance behind this node, if any.
    pub(crate) fn instance(&self) -> Option<&Rc<ComponentInstance>> {
        match &self.state {
            MountedState::Component { instance } => Some(instance),
            _ => None,
        }
    }
}

pub(crate) struct RendererInner {
    host: Rc<dyn HostOps>,
    roots: RefCell<HashMap<HostNode, MountedNode>>,
}

/// Drives a host through [`HostOps`].
#[derive(Clone)]
pub struct Renderer {
    inner: Rc<RendererInner>,
}

/// Non-owning renderer handle held by component instances.
#[derive(Clone)]
pub(crate) struct WeakRenderer(Weak<RendererInner>);

impl WeakRenderer {
    pub(crate) fn upgrade(&self) -> Option<Renderer> {
        self.0.upgrade().map(|inner| Renderer { inner })
    }
}

impl Renderer {
    pub fn new(host: Rc<dyn HostOps>) -> Self {
        Self {
            inner: Rc::new(RendererInner {
                host,
                roots: RefCell::new(HashMap::new()),
            }),
        }
    }

    pub fn host(&self) -> &Rc<dyn HostOps> {
        &self.inner.host
    }

    pub(crate) fn downgrade(&self) -> WeakRenderer {
        WeakRenderer(Rc::downgrade(&self.inner))
    }

    /// Render `vnode` into `container`, patching whatever was rendered there
    /// before. `None` unmounts.
    pub fn render(&self, vnode: Option<VNode>, container: HostNode) {
        self.render_with(vnode, container, None);
    }

    pub(crate) fn render_with(&self, vnode: Option<VNode>, container: HostNode, app: Option<Rc<AppContext>>) {
        let ctx = MountContext { parent: None, app };
        let previous = self.inner.roots.borrow_mut().remove(&container);

        let next = match (previous, vnode) {
            (None, None) => None,
            (None, Some(vnode)) => Some(self.mount(&vnode, container, None, &ctx)),
            (Some(mut mounted), Some(vnode)) => {
                self.patch(&mut mounted, &vnode, container, &ctx);
                Some(mounted)
            }
            (Some(mounted), None) => {
                self.unmount(mounted, true);
                None
            }
        };

        if let Some(mounted) = next {
            self.inner.roots.borrow_mut().insert(container, mounted);
        }

        scheduler::flush_post_flush_cbs();
        error::close_window();
    }

    /// Whether something is rendered into `container`.
    pub fn is_rendered(&self, container: HostNode) -> bool {
        self.inner.roots.borrow().contains_key(&container)
    }

    // ------------------------------------------------------------------------
    // Mount
    // ------------------------------------------------------------------------

    pub(crate) fn mount(
        &self,
        vnode: &VNode,
        container: HostNode,
        anchor: Option<HostNode>,
        ctx: &MountContext,
    ) -> MountedNode {
        let host = self.host();
        let state = match vnode.kind() {
            VNodeKind::Text(text) => {
                let el = host.create_text(text);
                host.insert(el, container, anchor);
                MountedState::Text { el }
            }
            VNodeKind::Element { tag, props, children } => {
                let el = host.create_element(tag);
                for (key, value) in props.iter() {
                    host.patch_prop(el, key, None, Some(value));
                }
                let children = children
                    .iter()
                    .map(|child| self.mount(child, el, None, ctx))
                    .collect();
                host.insert(el, container, anchor);
                MountedState::Element { el, children }
            }
            VNodeKind::Fragment(children) => {
                let start = host.create_anchor();
                let end = host.create_anchor();
                host.insert(start, container, anchor);
                host.insert(end, container, anchor);
                let children = children
                    .iter()
                    .map(|child| self.mount(child, container, Some(end), ctx))
                    .collect();
                MountedState::Fragment { start, end, children }
            }
            VNodeKind::Component { .. } => {
                return component::mount_component(self, vnode, container, anchor, ctx);
            }
        };
        MountedNode {
            vnode: vnode.clone(),
            state,
        }
    }

    // ------------------------------------------------------------------------
    // Patch
    // ------------------------------------------------------------------------

    /// Patch `mounted` to match `next`, replacing it if the identities differ.
    pub(crate) fn patch(&self, mounted: &mut MountedNode, next: &VNode, container: HostNode, ctx: &MountContext) {
        if mounted.vnode.ptr_eq(next) {
            return;
        }

        if !mounted.vnode.same_type(next) || matches!(mounted.state, MountedState::Failed { .. }) {
            let anchor = self.first_host(mounted);
            let replacement = self.mount(next, container, anchor, ctx);
            let previous = std::mem::replace(mounted, replacement);
            self.unmount(previous, true);
            return;
        }

        let host = self.host();
        match (&mut mounted.state, next.kind()) {
            (MountedState::Text { el }, VNodeKind::Text(text)) => {
                if let VNodeKind::Text(old) = mounted.vnode.kind() {
                    if old != text {
                        host.set_text(*el, text);
                    }
                }
            }
            (MountedState::Element { el, children }, VNodeKind::Element { props, children: next_children, .. }) => {
                if let VNodeKind::Element { props: old_props, .. } = mounted.vnode.kind() {
                    patch_props(host.as_ref(), *el, old_props, props);
                }
                self.patch_children(children, next_children, *el, None, ctx);
            }
            (MountedState::Fragment { end, children, .. }, VNodeKind::Fragment(next_children)) => {
                let end = *end;
                self.patch_children(children, next_children, container, Some(end), ctx);
            }
            (MountedState::Component { instance }, VNodeKind::Component { .. }) => {
                let instance = instance.clone();
                component::update_component(&instance, &mounted.vnode, next);
            }
            _ => {}
        }
        mounted.vnode = next.clone();
    }

    /// Diff a children list in place.
    pub(crate) fn patch_children(
        &self,
        mounted: &mut Vec<MountedNode>,
        next: &[VNode],
        container: HostNode,
        anchor: Option<HostNode>,
        ctx: &MountContext,
    ) {
        let keyed = next.iter().any(|v| v.key().is_some()) || mounted.iter().any(|m| m.vnode.key().is_some());
        if keyed {
            keyed::patch_keyed_children(self, mounted, next, container, anchor, ctx);
        } else {
            self.patch_unkeyed_children(mounted, next, container, anchor, ctx);
        }
    }

    fn patch_unkeyed_children(
        &self,
        mounted: &mut Vec<MountedNode>,
        next: &[VNode],
        container: HostNode,
        anchor: Option<HostNode>,
        ctx: &MountContext,
    ) {
        let common = mounted.len().min(next.len());
        for (slot, vnode) in mounted.iter_mut().zip(next).take(common) {
            self.patch(slot, vnode, container, ctx);
        }

        if next.len() > mounted.len() {
            for vnode in &next[common..] {
                let node = self.mount(vnode, container, anchor, ctx);
                mounted.push(node);
            }
        } else {
            for node in mounted.drain(common..).collect::<Vec<_>>() {
                self.unmount(node, true);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Unmount
    // ------------------------------------------------------------------------

    /// Tear down `node`. With `do_remove = false` the host nodes are left in
    /// place (their parent element is being removed anyway).
    pub(crate) fn unmount(&self, node: MountedNode, do_remove: bool) {
        let host = self.host();
        match node.state {
            MountedState::Text { el } | MountedState::Failed { placeholder: el } => {
                if do_remove {
                    host.remove(el);
                }
            }
            MountedState::Element { el, children } => {
                for child in children {
                    self.unmount(child, false);
                }
                if do_remove {
                    host.remove(el);
                }
            }
            MountedState::Fragment { start, end, children } => {
                for child in children {
                    self.unmount(child, do_remove);
                }
                if do_remove {
                    host.remove(start);
                    host.remove(end);
                }
            }
            MountedState::Component { ref instance } => {
                let instance = instance.clone();
                if let Some(link) = node.vnode.keep_alive_link().cloned() {
                    if let Some(keep_alive) = link.ctx.upgrade() {
                        if keep_alive.should_deactivate(&link.key) {
                            keep_alive.deactivate(self, link.key, node);
                            return;
                        }
                    }
                }
                component::unmount_component(self, &instance, do_remove);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Host node helpers
    // ------------------------------------------------------------------------

    /// Move every host node of `node` before `anchor` in `container`.
    pub(crate) fn move_node(&self, node: &MountedNode, container: HostNode, anchor: Option<HostNode>) {
        let host = self.host();
        match &node.state {
            MountedState::Text { el } | MountedState::Element { el, .. } | MountedState::Failed { placeholder: el } => {
                host.insert(*el, container, anchor);
            }
            MountedState::Fragment { start, end, children } => {
                host.insert(*start, container, anchor);
                for child in children {
                    self.move_node(child, container, anchor);
                }
                host.insert(*end, container, anchor);
            }
            MountedState::Component { instance } => {
                if let Some(sub_tree) = instance.sub_tree().as_ref() {
                    self.move_node(sub_tree, container, anchor);
                }
            }
        }
    }

    /// First host node occupied by `node`.
    pub(crate) fn first_host(&self, node: &MountedNode) -> Option<HostNode> {
        match &node.state {
            MountedState::Text { el } | MountedState::Element { el, .. } | MountedState::Failed { placeholder: el } => {
                Some(*el)
            }
            MountedState::Fragment { start, .. } => Some(*start),
            MountedState::Component { instance } => instance
                .sub_tree()
                .as_ref()
                .and_then(|sub_tree| self.first_host(sub_tree)),
        }
    }
}

fn patch_props(host: &dyn HostOps, el: HostNode, old: &Props, next: &Props) {
    for (key, value) in next.iter() {
        let prev = old.get(key);
        if prev.is_some_and(|prev| prev == value) {
            continue;
        }
        host.patch_prop(el, key, prev, Some(value));
    }
    for (key, value) in old.iter() {
        if !next.contains_key(key) {
            host.patch_prop(el, key, Some(value), None);
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::memory::{HostOp, MemoryHost};

    fn setup() -> (Rc<MemoryHost>, Renderer, HostNode) {
        let host = Rc::new(MemoryHost::new());
        let renderer = Renderer::new(host.clone());
        let root = host.create_root();
        (host, renderer, root)
    }

    fn list(items: &[&str]) -> VNode {
        VNode::element(
            "ul",
            Props::new(),
            items
                .iter()
                .map(|item| VNode::element("li", Props::new(), vec![VNode::text(*item)]))
                .collect(),
        )
    }

    #[test]
    fn mounts_elements_text_and_fragments() {
        let (host, renderer, root) = setup();
        let tree = VNode::fragment(vec![
            VNode::element("h1", Props::new().with("id", "title"), vec![VNode::text("Hello")]),
            VNode::text("world"),
        ]);
        renderer.render(Some(tree), root);
        assert_eq!(host.inner_html(root), "<h1 id=\"title\">Hello</h1>world");
    }

    #[test]
    fn patching_same_reference_is_a_noop() {
        let (host, renderer, root) = setup();
        let tree = list(&["a", "b"]);
        renderer.render(Some(tree.clone()), root);
        host.clear_ops();

        renderer.render(Some(tree), root);
        assert!(host.ops().is_empty());
    }

    #[test]
    fn patching_equal_content_is_a_noop() {
        let (host, renderer, root) = setup();
        renderer.render(Some(list(&["a", "b"])), root);
        host.clear_ops();

        renderer.render(Some(list(&["a", "b"])), root);
        assert!(host.ops().is_empty());
    }

    #[test]
    fn text_and_props_patch_in_place() {
        let (host, renderer, root) = setup();
        renderer.render(
            Some(VNode::element("p", Props::new().with("class", "a").with("title", "t"), vec![VNode::text("one")])),
            root,
        );
        host.clear_ops();

        renderer.render(
            Some(VNode::element("p", Props::new().with("class", "b"), vec![VNode::text("two")])),
            root,
        );
        assert_eq!(host.inner_html(root), "<p class=\"b\">two</p>");
        assert_eq!(host.count_ops(HostOp::is_create), 0);
        assert_eq!(host.count_ops(|op| matches!(op, HostOp::PatchProp { .. })), 2);
        assert_eq!(host.count_ops(|op| matches!(op, HostOp::SetText { .. })), 1);
    }

    #[test]
    fn unkeyed_shrink_removes_only_the_tail() {
        let (host, renderer, root) = setup();
        renderer.render(Some(list(&["a", "b", "c"])), root);
        host.clear_ops();

        renderer.render(Some(list(&["a", "b"])), root);
        assert_eq!(host.inner_html(root), "<ul><li>a</li><li>b</li></ul>");
        assert_eq!(host.count_ops(HostOp::is_remove), 1);
        assert_eq!(host.count_ops(HostOp::is_create), 0);
    }

    #[test]
    fn unkeyed_grow_appends_after_last() {
        let (host, renderer, root) = setup();
        renderer.render(Some(list(&["a", "b"])), root);
        host.clear_ops();

        renderer.render(Some(list(&["a", "b", "c"])), root);
        assert_eq!(host.inner_html(root), "<ul><li>a</li><li>b</li><li>c</li></ul>");
        // One <li> and its text.
        assert_eq!(host.count_ops(HostOp::is_create), 2);
        assert_eq!(host.count_ops(HostOp::is_remove), 0);
    }

    #[test]
    fn different_type_replaces_at_same_position() {
        let (host, renderer, root) = setup();
        let tree = |middle: VNode| VNode::fragment(vec![VNode::text("a"), middle, VNode::text("c")]);
        renderer.render(Some(tree(VNode::element("b", Props::new(), vec![]))), root);
        renderer.render(Some(tree(VNode::element("i", Props::new(), vec![]))), root);
        assert_eq!(host.inner_html(root), "a<i></i>c");
    }

    #[test]
    fn fragment_children_stay_between_anchors() {
        let (host, renderer, root) = setup();
        let tree = |items: &[&str]| {
            VNode::element(
                "div",
                Props::new(),
                vec![
                    VNode::fragment(items.iter().map(|s| VNode::text(*s)).collect()),
                    VNode::text("|end"),
                ],
            )
        };
        renderer.render(Some(tree(&["a"])), root);
        renderer.render(Some(tree(&["a", "b", "c"])), root);
        assert_eq!(host.inner_html(root), "<div>abc|end</div>");
    }

    #[test]
    fn render_none_unmounts() {
        let (host, renderer, root) = setup();
        renderer.render(Some(list(&["a"])), root);
        assert!(renderer.is_rendered(root));

        renderer.render(None, root);
        assert_eq!(host.inner_html(root), "");
        assert!(!renderer.is_rendered(root));
    }
}
