//! Keep-Alive
//!
//! A `KeepAlive` boundary renders a single child component and, instead of
//! destroying it when it is switched out, parks its host nodes in an
//! off-tree storage container. Switching back moves the nodes in again and
//! patches them, so component state survives.
//!
//! The set of parked instances is an LRU cache ([`KeepAliveCache`]). With a
//! `max`, touching a new key past capacity evicts the least recently used
//! entry, which is then really unmounted.

use std::cell::{Cell, RefCell};
use std::hash::Hash;
use std::rc::Rc;

use indexmap::IndexMap;

use super::component::{self, Component};
use super::host::HostNode;
use super::renderer::{MountContext, MountedNode, Renderer, WeakRenderer};
use super::vnode::{KeepAliveLink, NodeKey, VNode};
use crate::config;
use crate::error::{BoxError, LifecycleHook};
use crate::reactive::on_scope_dispose;

/// Insertion-ordered cache with least-recently-used eviction.
///
/// Each key maps to a stored value, or to `None` while the entry is active
/// (mounted in the tree rather than parked).
#[derive(Debug)]
pub struct KeepAliveCache<K, V> {
    entries: IndexMap<K, Option<V>>,
    max: Option<usize>,
}

impl<K: Hash + Eq + Clone, V> KeepAliveCache<K, V> {
    pub fn new(max: Option<usize>) -> Self {
        Self {
            entries: IndexMap::new(),
            max,
        }
    }

    pub fn max(&self) -> Option<usize> {
        self.max
    }

    /// Mark `key` most recently used, inserting it as active if absent.
    /// Returns the entries evicted to stay within `max`.
    pub fn touch(&mut self, key: K) -> Vec<(K, Option<V>)> {
        match self.entries.get_index_of(&key) {
            Some(index) => {
                let last = self.entries.len() - 1;
                self.entries.move_index(index, last);
            }
            None => {
                self.entries.insert(key.clone(), None);
            }
        }

        let mut evicted = Vec::new();
        if let Some(max) = self.max {
            while self.entries.len() > max {
                match self.entries.first() {
                    Some((oldest, _)) if *oldest != key => {
                        if let Some(entry) = self.entries.shift_remove_index(0) {
                            evicted.push(entry);
                        }
                    }
                    _ => break,
                }
            }
        }
        evicted
    }

    /// Park `value` under `key`. A no-op if `key` is not in the cache.
    pub fn store(&mut self, key: &K, value: V) -> bool {
        match self.entries.get_mut(key) {
            Some(slot) => {
                *slot = Some(value);
                true
            }
            None => false,
        }
    }

    /// Take the parked value out, leaving the entry active.
    pub fn take(&mut self, key: &K) -> Option<V> {
        self.entries.get_mut(key).and_then(Option::take)
    }

    pub fn remove(&mut self, key: &K) -> Option<Option<V>> {
        self.entries.shift_remove(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Whether a value is parked under `key`.
    pub fn is_stored(&self, key: &K) -> bool {
        self.entries.get(key).is_some_and(Option::is_some)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys from least to most recently used.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }

    pub fn drain(&mut self) -> Vec<(K, Option<V>)> {
        self.entries.drain(..).collect()
    }
}

/// Cache key of a kept-alive child: its vnode key, else its definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum CacheKey {
    Key(NodeKey),
    Component(u64),
}

/// Options for [`KeepAlive::new`].
#[derive(Debug, Clone, Default)]
pub struct KeepAliveOptions {
    /// Capacity. Falls back to `RuntimeConfig::keep_alive_max`.
    pub max: Option<usize>,
    /// Only cache components with one of these names.
    pub include: Option<Vec<String>>,
    /// Never cache components with one of these names.
    pub exclude: Option<Vec<String>>,
}

impl KeepAliveOptions {
    pub fn max(mut self, max: usize) -> Self {
        self.max = Some(max);
        self
    }

    pub fn include<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.include = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn exclude<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.exclude = Some(names.into_iter().map(Into::into).collect());
        self
    }

    fn caches(&self, name: &str) -> bool {
        let listed = |names: &Option<Vec<String>>| names.as_ref().map(|names| names.iter().any(|n| n == name));
        listed(&self.include) != Some(false) && listed(&self.exclude) != Some(true)
    }
}

/// Per-boundary state shared by the render function and the renderer.
pub(crate) struct KeepAliveCtx {
    cache: RefCell<KeepAliveCache<CacheKey, MountedNode>>,
    storage: HostNode,
    renderer: WeakRenderer,
    unmounting: Cell<bool>,
}

impl KeepAliveCtx {
    pub(crate) fn take_stored(&self, key: &CacheKey) -> Option<MountedNode> {
        self.cache.borrow_mut().take(key)
    }

    /// Whether an unmount of `key` should park it instead.
    pub(crate) fn should_deactivate(&self, key: &CacheKey) -> bool {
        !self.unmounting.get() && self.cache.borrow().contains(key)
    }

    /// Move a parked subtree back into the tree and bring it up to date.
    pub(crate) fn activate(
        &self,
        renderer: &Renderer,
        mut stored: MountedNode,
        vnode: &VNode,
        container: HostNode,
        anchor: Option<HostNode>,
        ctx: &MountContext,
    ) -> MountedNode {
        renderer.move_node(&stored, container, anchor);
        renderer.patch(&mut stored, vnode, container, ctx);

        let instances = component::nested_instances(&stored);
        if let Some(instance) = stored.instance() {
            tracing::debug!(component = instance.name(), "activating kept-alive component");
            instance.set_deactivated(false);
        }
        for instance in &instances {
            instance.queue_hooks(LifecycleHook::Activated);
        }
        stored
    }

    /// Park `node` in the storage container under `key`.
    pub(crate) fn deactivate(&self, renderer: &Renderer, key: CacheKey, node: MountedNode) {
        renderer.move_node(&node, self.storage, None);

        if let Some(instance) = node.instance() {
            tracing::debug!(component = instance.name(), "deactivating kept-alive component");
            instance.set_deactivated(true);
        }
        for instance in component::nested_instances(&node) {
            instance.queue_hooks(LifecycleHook::Deactivated);
        }

        let rejected = {
            let mut cache = self.cache.borrow_mut();
            if cache.contains(&key) {
                cache.store(&key, node);
                None
            } else {
                Some(node)
            }
        };
        if let Some(node) = rejected {
            renderer.unmount(node, true);
        }
    }

    fn prune(&self, evicted: Vec<(CacheKey, Option<MountedNode>)>) {
        let Some(renderer) = self.renderer.upgrade() else {
            return;
        };
        for (key, stored) in evicted {
            if let Some(node) = stored {
                tracing::debug!(?key, "evicting kept-alive component");
                renderer.unmount(node, true);
            }
        }
    }

    fn dispose(&self) {
        self.unmounting.set(true);
        let entries = self.cache.borrow_mut().drain();
        self.prune(entries);
    }
}

/// The keep-alive boundary component.
pub struct KeepAlive;

impl KeepAlive {
    /// Build a keep-alive boundary. Render it with exactly one component
    /// child: `VNode::component_with_children(&keep_alive, props, vec![child])`.
    pub fn new(options: KeepAliveOptions) -> Component {
        Component::new("KeepAlive", move |setup| {
            let instance = component::current_instance().ok_or("KeepAlive set up outside a renderer")?;
            let renderer = instance.renderer().ok_or("KeepAlive set up outside a renderer")?;

            let max = options.max.or(config::current().keep_alive_max);
            let keep_alive = Rc::new(KeepAliveCtx {
                cache: RefCell::new(KeepAliveCache::new(max)),
                storage: renderer.host().create_element("div"),
                renderer: renderer.downgrade(),
                unmounting: Cell::new(false),
            });

            let disposing = keep_alive.clone();
            on_scope_dispose(move || disposing.dispose());

            let setup = setup.clone();
            let options = options.clone();
            Ok(move || -> Result<VNode, BoxError> {
                let children = setup.children();
                let child = match &*children {
                    [] => return Ok(VNode::fragment(Vec::new())),
                    [child] => child,
                    _ => {
                        tracing::warn!(count = children.len(), "KeepAlive expects exactly one child");
                        return Ok(VNode::fragment(children.to_vec()));
                    }
                };

                let Some(component) = child.as_component() else {
                    return Ok(child.clone());
                };
                if !options.caches(component.name()) {
                    return Ok(child.clone());
                }

                let key = match child.key() {
                    Some(key) => CacheKey::Key(key.clone()),
                    None => CacheKey::Component(component.id()),
                };
                let evicted = keep_alive.cache.borrow_mut().touch(key.clone());
                keep_alive.prune(evicted);

                Ok(child.kept_alive(KeepAliveLink {
                    ctx: Rc::downgrade(&keep_alive),
                    key,
                }))
            })
        })
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
