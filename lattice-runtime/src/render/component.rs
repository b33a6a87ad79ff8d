//! Component Instances
//!
//! A component definition is a named setup function. Setup runs once per
//! instance, inside the instance's [`EffectScope`], and returns the render
//! function. The render function runs inside the instance's render effect:
//! whatever it reads becomes a dependency, and a change queues a re-render
//! job on the [`crate::scheduler`].
//!
//! # Lifecycle
//!
//! ```text
//! setup ─► before_mount ─► render ─► mount subtree ─► (post) mounted
//!            ▲                                            │
//!            │       dependency change / new props        ▼
//!            └── before_update ◄── render ◄── (post) updated
//!
//! before_unmount ─► stop scope ─► unmount subtree ─► (post) unmounted
//! ```
//!
//! `before_*` hooks run synchronously. `mounted`, `updated`, `unmounted`,
//! `activated` and `deactivated` are queued as post-flush jobs, so a parent's
//! `mounted` runs after all of its children's.
//!
//! # Setup-only APIs
//!
//! Hook registration, [`provide`] and [`inject`] look up the instance whose
//! setup is running. Called anywhere else they return
//! [`RuntimeError::OutsideSetup`].

use std::any::Any;
use std::cell::{Cell, Ref, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use super::host::HostNode;
use super::renderer::{MountContext, MountedNode, MountedState, Renderer, WeakRenderer};
use super::vnode::{Props, Slots, VNode, VNodeKind};
use crate::app::AppContext;
use crate::error::{BoxError, ErrorContext, ErrorOrigin, LifecycleHook, RuntimeError};
use crate::reactive::{untracked, Effect, EffectOptions, EffectScope, PropKey, Reactive, ReadonlyReactive, Signal, Value};
use crate::scheduler::{self, Job};

/// Render function returned by setup.
pub type RenderFn = Box<dyn Fn() -> Result<VNode, BoxError>>;

type SetupFn = Rc<dyn Fn(&SetupContext) -> Result<RenderFn, BoxError>>;
type Hook = Rc<dyn Fn() -> Result<(), BoxError>>;

static COMPONENT_ID: AtomicU64 = AtomicU64::new(0);
static INSTANCE_UID: AtomicU64 = AtomicU64::new(0);

struct ComponentDef {
    id: u64,
    name: Rc<str>,
    setup: SetupFn,
}

/// A component definition. Cheap to clone; compares by identity.
#[derive(Clone)]
pub struct Component(Rc<ComponentDef>);

impl Component {
    /// Define a component from its setup function.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let counter = Component::new("Counter", |ctx| {
    ///     let count = Signal::new(0);
    ///     on_mounted(|| Ok(()))?;
    ///     Ok(move || Ok(VNode::text(count.get().to_string())))
    /// });
    /// ```
    pub fn new<F, R>(name: &str, setup: F) -> Self
    where
        F: Fn(&SetupContext) -> Result<R, BoxError> + 'static,
        R: Fn() -> Result<VNode, BoxError> + 'static,
    {
        Self(Rc::new(ComponentDef {
            id: COMPONENT_ID.fetch_add(1, Ordering::Relaxed),
            name: Rc::from(name),
            setup: Rc::new(move |ctx| setup(ctx).map(|render| Box::new(render) as RenderFn)),
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }
}

impl PartialEq for Component {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("id", &self.0.id)
            .field("name", &self.0.name)
            .finish()
    }
}

/// What setup gets to see of its instance.
#[derive(Clone)]
pub struct SetupContext {
    name: Rc<str>,
    props: ReadonlyReactive,
    slots: Signal<Slots>,
}

impl SetupContext {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The instance's props. Reads are tracked; the parent writes them.
    pub fn props(&self) -> ReadonlyReactive {
        self.props.clone()
    }

    /// Shorthand for `props().get(key)`.
    pub fn prop(&self, key: &str) -> Value {
        self.props.get(key)
    }

    /// Children passed by the parent. Tracked.
    pub fn children(&self) -> Slots {
        self.slots.get()
    }
}

/// A mounted component.
pub(crate) struct ComponentInstance {
    uid: u64,
    def: Component,
    vnode: RefCell<VNode>,
    next: RefCell<Option<VNode>>,
    props: Reactive,
    slots: Signal<Slots>,
    scope: EffectScope,
    render: RefCell<Option<RenderFn>>,
    effect: RefCell<Option<Effect>>,
    job: RefCell<Option<Job>>,
    sub_tree: RefCell<Option<MountedNode>>,
    parent: Option<Weak<ComponentInstance>>,
    app: Option<Rc<AppContext>>,
    provides: RefCell<HashMap<Rc<str>, Rc<dyn Any>>>,
    hooks: RefCell<HashMap<LifecycleHook, Vec<Hook>>>,
    is_mounted: Cell<bool>,
    is_unmounted: Cell<bool>,
    is_deactivated: Cell<bool>,
    container: Cell<HostNode>,
    anchor: Cell<Option<HostNode>>,
    renderer: WeakRenderer,
}

impl ComponentInstance {
    pub(crate) fn name(&self) -> &str {
        self.def.name()
    }

    pub(crate) fn renderer(&self) -> Option<Renderer> {
        self.renderer.upgrade()
    }

    pub(crate) fn sub_tree(&self) -> Ref<'_, Option<MountedNode>> {
        self.sub_tree.borrow()
    }

    pub(crate) fn set_deactivated(&self, deactivated: bool) {
        self.is_deactivated.set(deactivated);
    }

    pub(crate) fn error_context(&self) -> ErrorContext {
        ErrorContext {
            component: Some(self.def.0.name.clone()),
            app_handler: self.app.as_ref().map(|app| app.error_handler.clone()),
        }
    }

    fn add_hook(&self, hook: LifecycleHook, f: Hook) {
        self.hooks.borrow_mut().entry(hook).or_default().push(f);
    }

    fn has_hooks(&self, hook: LifecycleHook) -> bool {
        self.hooks.borrow().get(&hook).is_some_and(|hooks| !hooks.is_empty())
    }

    /// Run the hooks registered for `hook` now.
    pub(crate) fn call_hooks(&self, hook: LifecycleHook) {
        let hooks = self.hooks.borrow().get(&hook).cloned().unwrap_or_default();
        for f in hooks {
            if let Err(err) = untracked(|| f()) {
                self.error_context()
                    .report(RuntimeError::callback(err), ErrorOrigin::LifecycleHook(hook));
            }
        }
    }

    /// Run the hooks registered for `hook` after the current flush.
    pub(crate) fn queue_hooks(self: &Rc<Self>, hook: LifecycleHook) {
        if !self.has_hooks(hook) {
            return;
        }
        let instance = self.clone();
        scheduler::queue_post_flush_cb(Job::new(move || {
            instance.call_hooks(hook);
            Ok(())
        }));
    }

    fn mount_context(self: &Rc<Self>) -> MountContext {
        MountContext {
            parent: Some(self.clone()),
            app: self.app.clone(),
        }
    }

    fn install_render_effect(self: &Rc<Self>) {
        let weak = Rc::downgrade(self);
        let job = Job::new(move || {
            if let Some(instance) = weak.upgrade() {
                instance.run_render_effect();
            }
            Ok(())
        })
        .with_order(self.uid);

        let queued = job.clone();
        let weak = Rc::downgrade(self);
        let effect = Effect::with_options(
            move || {
                if let Some(instance) = weak.upgrade() {
                    instance.render_cycle();
                }
            },
            EffectOptions {
                scope: Some(self.scope.clone()),
                ..EffectOptions::lazy().with_scheduler(move |_| scheduler::queue_job(queued.clone()))
            },
        );

        *self.job.borrow_mut() = Some(job);
        *self.effect.borrow_mut() = Some(effect);
    }

    fn run_render_effect(&self) {
        let effect = self.effect.borrow().clone();
        if let Some(effect) = effect {
            if effect.is_active() {
                effect.run();
            }
        }
    }

    fn render_tree(&self) -> Result<VNode, BoxError> {
        match self.render.borrow().as_ref() {
            Some(render) => render(),
            None => Err("component has no render function".into()),
        }
    }

    fn render_cycle(self: &Rc<Self>) {
        if self.is_unmounted.get() {
            return;
        }
        let Some(renderer) = self.renderer() else {
            return;
        };
        if self.is_mounted.get() {
            self.update_subtree(&renderer);
        } else {
            self.mount_subtree(&renderer);
        }
    }

    fn mount_subtree(self: &Rc<Self>, renderer: &Renderer) {
        self.call_hooks(LifecycleHook::BeforeMount);

        let tree = match self.render_tree() {
            Ok(tree) => tree,
            Err(err) => {
                self.error_context()
                    .report(RuntimeError::callback(err), ErrorOrigin::RenderFunction);
                return;
            }
        };

        let ctx = self.mount_context();
        let node = renderer.mount(&tree, self.container.get(), self.anchor.get(), &ctx);
        *self.sub_tree.borrow_mut() = Some(node);
        self.is_mounted.set(true);

        self.queue_hooks(LifecycleHook::Mounted);
        if self.vnode.borrow().keep_alive_link().is_some() {
            let sub_tree = self.sub_tree.borrow();
            for instance in std::iter::once(self.clone()).chain(sub_tree.iter().flat_map(nested_instances)) {
                instance.queue_hooks(LifecycleHook::Activated);
            }
        }
    }

    fn update_subtree(self: &Rc<Self>, renderer: &Renderer) {
        let next = self.next.borrow_mut().take();
        if let Some(next) = next {
            untracked(|| {
                self.apply_vnode(&next);
                scheduler::flush_pre_flush_cbs();
            });
        }

        self.call_hooks(LifecycleHook::BeforeUpdate);

        let tree = match self.render_tree() {
            Ok(tree) => tree,
            Err(err) => {
                self.error_context()
                    .report(RuntimeError::callback(err), ErrorOrigin::RenderFunction);
                return;
            }
        };

        let Some(mut previous) = self.sub_tree.borrow_mut().take() else {
            return;
        };
        let container = renderer
            .first_host(&previous)
            .and_then(|node| renderer.host().parent_node(node))
            .unwrap_or(self.container.get());
        renderer.patch(&mut previous, &tree, container, &self.mount_context());
        *self.sub_tree.borrow_mut() = Some(previous);

        self.queue_hooks(LifecycleHook::Updated);
    }

    /// Adopt a new description from the parent: write changed props, drop
    /// removed ones, swap the children.
    fn apply_vnode(&self, next: &VNode) {
        if let VNodeKind::Component { props, children, .. } = next.kind() {
            for (key, value) in props.iter() {
                self.props.set(key.clone(), value.clone());
            }
            for key in self.props.own_keys() {
                if let PropKey::Name(name) = &key {
                    if !props.contains_key(name) {
                        self.props.delete(key);
                    }
                }
            }
            if !Rc::ptr_eq(&self.slots.get_untracked(), children) {
                self.slots.replace(children.clone());
            }
        }
        *self.vnode.borrow_mut() = next.clone();
    }
}

impl fmt::Debug for ComponentInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentInstance")
            .field("uid", &self.uid)
            .field("name", &self.def.name())
            .field("mounted", &self.is_mounted.get())
            .field("deactivated", &self.is_deactivated.get())
            .finish()
    }
}

/// Every component instance below `node`, outermost first.
pub(crate) fn nested_instances(node: &MountedNode) -> Vec<Rc<ComponentInstance>> {
    let mut out = Vec::new();
    collect_instances(node, &mut out);
    out
}

fn collect_instances(node: &MountedNode, out: &mut Vec<Rc<ComponentInstance>>) {
    match &node.state {
        MountedState::Element { children, .. } | MountedState::Fragment { children, .. } => {
            for child in children {
                collect_instances(child, out);
            }
        }
        MountedState::Component { instance } => {
            out.push(instance.clone());
            if let Some(sub_tree) = instance.sub_tree().as_ref() {
                collect_instances(sub_tree, out);
            }
        }
        MountedState::Text { .. } | MountedState::Failed { .. } => {}
    }
}

// ----------------------------------------------------------------------------
// Current instance
// ----------------------------------------------------------------------------

thread_local! {
    static CURRENT_INSTANCE: RefCell<Option<Rc<ComponentInstance>>> = const { RefCell::new(None) };
}

/// Marks an instance as the one being set up; restores the previous one on
/// drop.
struct SetupGuard {
    prev: Option<Rc<ComponentInstance>>,
}

impl SetupGuard {
    fn enter(instance: Rc<ComponentInstance>) -> Self {
        let prev = CURRENT_INSTANCE.with(|current| current.borrow_mut().replace(instance));
        Self { prev }
    }
}

impl Drop for SetupGuard {
    fn drop(&mut self) {
        let prev = self.prev.take();
        CURRENT_INSTANCE.with(|current| *current.borrow_mut() = prev);
    }
}

pub(crate) fn current_instance() -> Option<Rc<ComponentInstance>> {
    CURRENT_INSTANCE.with(|current| current.borrow().clone())
}

/// Error routing for code created during the current setup (watchers).
pub(crate) fn current_error_context() -> ErrorContext {
    current_instance()
        .map(|instance| instance.error_context())
        .unwrap_or_default()
}

fn require_instance(api: &'static str) -> Result<Rc<ComponentInstance>, RuntimeError> {
    current_instance().ok_or_else(|| {
        tracing::warn!(api, "setup-only API called outside component setup");
        RuntimeError::OutsideSetup { api }
    })
}

fn register_hook(
    hook: LifecycleHook,
    f: impl Fn() -> Result<(), BoxError> + 'static,
) -> Result<(), RuntimeError> {
    require_instance(hook.api_name())?.add_hook(hook, Rc::new(f));
    Ok(())
}

pub fn on_before_mount(f: impl Fn() -> Result<(), BoxError> + 'static) -> Result<(), RuntimeError> {
    register_hook(LifecycleHook::BeforeMount, f)
}

pub fn on_mounted(f: impl Fn() -> Result<(), BoxError> + 'static) -> Result<(), RuntimeError> {
    register_hook(LifecycleHook::Mounted, f)
}

pub fn on_before_update(f: impl Fn() -> Result<(), BoxError> + 'static) -> Result<(), RuntimeError> {
    register_hook(LifecycleHook::BeforeUpdate, f)
}

pub fn on_updated(f: impl Fn() -> Result<(), BoxError> + 'static) -> Result<(), RuntimeError> {
    register_hook(LifecycleHook::Updated, f)
}

pub fn on_before_unmount(f: impl Fn() -> Result<(), BoxError> + 'static) -> Result<(), RuntimeError> {
    register_hook(LifecycleHook::BeforeUnmount, f)
}

pub fn on_unmounted(f: impl Fn() -> Result<(), BoxError> + 'static) -> Result<(), RuntimeError> {
    register_hook(LifecycleHook::Unmounted, f)
}

/// Runs when a kept-alive instance is inserted (first mount included).
pub fn on_activated(f: impl Fn() -> Result<(), BoxError> + 'static) -> Result<(), RuntimeError> {
    register_hook(LifecycleHook::Activated, f)
}

/// Runs when a kept-alive instance is moved into the cache.
pub fn on_deactivated(f: impl Fn() -> Result<(), BoxError> + 'static) -> Result<(), RuntimeError> {
    register_hook(LifecycleHook::Deactivated, f)
}

/// Make `value` available to every descendant under `key`.
pub fn provide<T: 'static>(key: &str, value: T) -> Result<(), RuntimeError> {
    require_instance("provide")?
        .provides
        .borrow_mut()
        .insert(Rc::from(key), Rc::new(value));
    Ok(())
}

/// Look `key` up in the ancestors' provides, then the application's.
///
/// `Ok(None)` if nothing was provided under `key` or the value has another
/// type.
pub fn inject<T: Clone + 'static>(key: &str) -> Result<Option<T>, RuntimeError> {
    let instance = require_instance("inject")?;

    let mut cursor = instance.parent.as_ref().and_then(Weak::upgrade);
    while let Some(ancestor) = cursor {
        if let Some(value) = ancestor.provides.borrow().get(key) {
            return Ok(value.downcast_ref::<T>().cloned());
        }
        cursor = ancestor.parent.as_ref().and_then(Weak::upgrade);
    }

    Ok(instance.app.as_ref().and_then(|app| app.provided::<T>(key)))
}

// ----------------------------------------------------------------------------
// Mount / update / unmount
// ----------------------------------------------------------------------------

pub(crate) fn mount_component(
    renderer: &Renderer,
    vnode: &VNode,
    container: HostNode,
    anchor: Option<HostNode>,
    ctx: &MountContext,
) -> MountedNode {
    if let Some(link) = vnode.keep_alive_link() {
        if let Some(keep_alive) = link.ctx.upgrade() {
            if let Some(stored) = keep_alive.take_stored(&link.key) {
                return keep_alive.activate(renderer, stored, vnode, container, anchor, ctx);
            }
        }
    }

    let VNodeKind::Component { component, props, children } = vnode.kind() else {
        return renderer.mount(vnode, container, anchor, ctx);
    };

    let instance_props = Reactive::from_pairs(props.iter().map(|(key, value)| (key.clone(), value.clone())));
    let slots = Signal::new(children.clone());
    let instance = Rc::new(ComponentInstance {
        uid: INSTANCE_UID.fetch_add(1, Ordering::Relaxed),
        def: component.clone(),
        vnode: RefCell::new(vnode.clone()),
        next: RefCell::new(None),
        props: instance_props.clone(),
        slots: slots.clone(),
        scope: EffectScope::detached(),
        render: RefCell::new(None),
        effect: RefCell::new(None),
        job: RefCell::new(None),
        sub_tree: RefCell::new(None),
        parent: ctx.parent.as_ref().map(Rc::downgrade),
        app: ctx.app.clone(),
        provides: RefCell::new(HashMap::new()),
        hooks: RefCell::new(HashMap::new()),
        is_mounted: Cell::new(false),
        is_unmounted: Cell::new(false),
        is_deactivated: Cell::new(false),
        container: Cell::new(container),
        anchor: Cell::new(anchor),
        renderer: renderer.downgrade(),
    });
    tracing::debug!(component = component.name(), uid = instance.uid, "mounting component");

    let setup_ctx = SetupContext {
        name: component.0.name.clone(),
        props: instance_props.readonly(),
        slots,
    };
    let setup = component.0.setup.clone();
    let result = {
        let _guard = SetupGuard::enter(instance.clone());
        instance.scope.run(|| untracked(|| setup(&setup_ctx)))
    };

    match result {
        Some(Ok(render)) => *instance.render.borrow_mut() = Some(render),
        Some(Err(err)) => {
            instance
                .error_context()
                .report(RuntimeError::callback(err), ErrorOrigin::SetupFunction);
            return failed(renderer, &instance, vnode, container, anchor);
        }
        None => return failed(renderer, &instance, vnode, container, anchor),
    }

    instance.install_render_effect();
    instance.run_render_effect();

    if instance.sub_tree.borrow().is_none() {
        return failed(renderer, &instance, vnode, container, anchor);
    }

    MountedNode {
        vnode: vnode.clone(),
        state: MountedState::Component { instance },
    }
}

/// Tear a half-built instance down and hold its place with an empty node.
fn failed(
    renderer: &Renderer,
    instance: &Rc<ComponentInstance>,
    vnode: &VNode,
    container: HostNode,
    anchor: Option<HostNode>,
) -> MountedNode {
    tracing::debug!(component = instance.name(), "component failed to mount");
    instance.is_unmounted.set(true);
    instance.scope.stop();
    instance.render.borrow_mut().take();

    let placeholder = renderer.host().create_anchor();
    renderer.host().insert(placeholder, container, anchor);
    MountedNode {
        vnode: vnode.clone(),
        state: MountedState::Failed { placeholder },
    }
}

fn should_update(prev: &VNode, next: &VNode) -> bool {
    match (prev.kind(), next.kind()) {
        (
            VNodeKind::Component { props: prev_props, children: prev_children, .. },
            VNodeKind::Component { props: next_props, children: next_children, .. },
        ) => {
            props_changed(prev_props, next_props)
                || (!(prev_children.is_empty() && next_children.is_empty())
                    && !Rc::ptr_eq(prev_children, next_children))
        }
        _ => true,
    }
}

fn props_changed(prev: &Props, next: &Props) -> bool {
    prev.len() != next.len()
        || next
            .iter()
            .any(|(key, value)| !prev.get(key).is_some_and(|old| old.same_value(value)))
}

/// Patch a mounted component against a new description from its parent.
pub(crate) fn update_component(instance: &Rc<ComponentInstance>, prev: &VNode, next: &VNode) {
    if should_update(prev, next) {
        *instance.next.borrow_mut() = Some(next.clone());
        if let Some(job) = instance.job.borrow().as_ref() {
            scheduler::invalidate_job(job.id());
        }
        instance.run_render_effect();
    } else {
        *instance.vnode.borrow_mut() = next.clone();
    }
}

pub(crate) fn unmount_component(renderer: &Renderer, instance: &Rc<ComponentInstance>, do_remove: bool) {
    if instance.is_unmounted.replace(true) {
        return;
    }
    tracing::debug!(component = instance.name(), uid = instance.uid, "unmounting component");

    instance.call_hooks(LifecycleHook::BeforeUnmount);
    instance.scope.stop();
    if let Some(job) = instance.job.borrow().as_ref() {
        scheduler::invalidate_job(job.id());
    }

    let sub_tree = instance.sub_tree.borrow_mut().take();
    if let Some(sub_tree) = sub_tree {
        renderer.unmount(sub_tree, do_remove);
    }

    instance.queue_hooks(LifecycleHook::Unmounted);
    instance.render.borrow_mut().take();
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{set_error_handler, ErrorInfo, ErrorRef};
    use crate::render::memory::MemoryHost;

    type Log = Rc<RefCell<Vec<String>>>;

    fn setup() -> (Rc<MemoryHost>, Renderer, HostNode) {
        let host = Rc::new(MemoryHost::new());
        let renderer = Renderer::new(host.clone());
        let root = host.create_root();
        (host, renderer, root)
    }

    fn logging(name: &'static str, log: &Log, children: Vec<VNode>) -> Component {
        let log = log.clone();
        let children: Rc<[VNode]> = Rc::from(children);
        Component::new(name, move |_| {
            for (hook, label) in [
                (LifecycleHook::BeforeMount, "before_mount"),
                (LifecycleHook::Mounted, "mounted"),
                (LifecycleHook::BeforeUnmount, "before_unmount"),
                (LifecycleHook::Unmounted, "unmounted"),
            ] {
                let log = log.clone();
                register_hook(hook, move || {
                    log.borrow_mut().push(format!("{name}:{label}"));
                    Ok(())
                })?;
            }
            let children = children.clone();
            Ok(move || Ok(VNode::fragment(children.to_vec())))
        })
    }

    #[test]
    fn renders_from_props() {
        let (host, renderer, root) = setup();
        let greeting = Component::new("Greeting", |ctx| {
            let ctx = ctx.clone();
            Ok(move || Ok(VNode::text(format!("Hello, {}", ctx.prop("name").display_text()))))
        });

        renderer.render(Some(VNode::component(&greeting, Props::new().with("name", "Ada"))), root);
        assert_eq!(host.inner_html(root), "Hello, Ada");

        renderer.render(Some(VNode::component(&greeting, Props::new().with("name", "Grace"))), root);
        assert_eq!(host.inner_html(root), "Hello, Grace");
    }

    #[test]
    fn mounted_runs_child_first_and_unmounted_after_teardown() {
        let (_host, renderer, root) = setup();
        let log: Log = Rc::default();
        let child = logging("child", &log, vec![]);
        let parent = logging("parent", &log, vec![VNode::component(&child, Props::new())]);

        renderer.render(Some(VNode::component(&parent, Props::new())), root);
        assert_eq!(
            *log.borrow(),
            ["parent:before_mount", "child:before_mount", "child:mounted", "parent:mounted"]
        );

        log.borrow_mut().clear();
        renderer.render(None, root);
        assert_eq!(
            *log.borrow(),
            ["parent:before_unmount", "child:before_unmount", "child:unmounted", "parent:unmounted"]
        );
    }

    #[test]
    fn state_change_rerenders_once_per_flush() {
        let (host, renderer, root) = setup();
        let count = Signal::new(0);
        let renders = Rc::new(Cell::new(0));

        let counter = {
            let count = count.clone();
            let renders = renders.clone();
            Component::new("Counter", move |_| {
                let count = count.clone();
                let renders = renders.clone();
                Ok(move || {
                    renders.set(renders.get() + 1);
                    Ok(VNode::text(count.get().to_string()))
                })
            })
        };

        renderer.render(Some(VNode::component(&counter, Props::new())), root);
        assert_eq!(renders.get(), 1);

        count.set(1);
        count.set(2);
        count.set(3);
        assert_eq!(host.inner_html(root), "0");

        scheduler::flush_jobs();
        assert_eq!(renders.get(), 2);
        assert_eq!(host.inner_html(root), "3");
    }

    #[test]
    fn shared_dependency_renders_child_once_per_flush() {
        let (host, renderer, root) = setup();
        let label = Signal::new(1);
        let child_renders = Rc::new(Cell::new(0));
        let updated = Rc::new(Cell::new(0));

        // The child reads `label` both through its props and directly.
        let child = {
            let label = label.clone();
            let child_renders = child_renders.clone();
            let updated = updated.clone();
            Component::new("Child", move |ctx| {
                let updated = updated.clone();
                on_updated(move || {
                    updated.set(updated.get() + 1);
                    Ok(())
                })?;
                let ctx = ctx.clone();
                let label = label.clone();
                let child_renders = child_renders.clone();
                Ok(move || {
                    child_renders.set(child_renders.get() + 1);
                    Ok(VNode::text(format!("{}/{}", ctx.prop("label").display_text(), label.get())))
                })
            })
        };
        let parent = {
            let label = label.clone();
            Component::new("Parent", move |_| {
                let label = label.clone();
                let child = child.clone();
                Ok(move || Ok(VNode::component(&child, Props::new().with("label", label.get()))))
            })
        };

        renderer.render(Some(VNode::component(&parent, Props::new())), root);
        assert_eq!(host.inner_html(root), "1/1");

        label.set(2);
        scheduler::flush_jobs();

        assert_eq!(host.inner_html(root), "2/2");
        assert_eq!(child_renders.get(), 2);
        assert_eq!(updated.get(), 1);
    }

    #[test]
    fn unchanged_props_skip_child_render() {
        let (_host, renderer, root) = setup();
        let child_renders = Rc::new(Cell::new(0));
        let child = {
            let child_renders = child_renders.clone();
            Component::new("Child", move |_| {
                let child_renders = child_renders.clone();
                Ok(move || {
                    child_renders.set(child_renders.get() + 1);
                    Ok(VNode::text("child"))
                })
            })
        };

        let tree = |label: &str| {
            VNode::element(
                "div",
                Props::new().with("title", label),
                vec![VNode::component(&child, Props::new().with("n", 1))],
            )
        };
        renderer.render(Some(tree("a")), root);
        renderer.render(Some(tree("b")), root);
        assert_eq!(child_renders.get(), 1);
    }

    #[test]
    fn setup_error_leaves_placeholder_and_siblings() {
        let (host, renderer, root) = setup();
        let caught: Rc<RefCell<Vec<(String, ErrorOrigin)>>> = Rc::default();
        let sink = caught.clone();
        set_error_handler(Some(Rc::new(move |err: &ErrorRef, info: &ErrorInfo| {
            sink.borrow_mut().push((err.to_string(), info.origin));
        })));

        let broken = Component::new("Broken", |_| -> Result<fn() -> Result<VNode, BoxError>, BoxError> {
            Err("setup exploded".into())
        });
        renderer.render(
            Some(VNode::fragment(vec![
                VNode::text("a"),
                VNode::component(&broken, Props::new()),
                VNode::text("b"),
            ])),
            root,
        );
        set_error_handler(None);

        assert_eq!(host.inner_html(root), "ab");
        assert_eq!(
            *caught.borrow(),
            [("setup exploded".to_string(), ErrorOrigin::SetupFunction)]
        );
    }

    #[test]
    fn failed_rerender_keeps_previous_tree() {
        let (host, renderer, root) = setup();
        let fail = Signal::new(false);
        let caught = Rc::new(Cell::new(0));
        let sink = caught.clone();
        set_error_handler(Some(Rc::new(move |_: &ErrorRef, info: &ErrorInfo| {
            assert_eq!(info.origin, ErrorOrigin::RenderFunction);
            sink.set(sink.get() + 1);
        })));

        let flaky = {
            let fail = fail.clone();
            Component::new("Flaky", move |_| {
                let fail = fail.clone();
                Ok(move || {
                    if fail.get() {
                        Err(BoxError::from("render failed"))
                    } else {
                        Ok(VNode::text("ok"))
                    }
                })
            })
        };
        renderer.render(Some(VNode::component(&flaky, Props::new())), root);
        fail.set(true);
        scheduler::flush_jobs();
        set_error_handler(None);

        assert_eq!(caught.get(), 1);
        assert_eq!(host.inner_html(root), "ok");
    }

    #[test]
    fn provide_reaches_descendants() {
        let (host, renderer, root) = setup();
        let leaf = Component::new("Leaf", |_| {
            let theme: Option<String> = inject("theme")?;
            Ok(move || Ok(VNode::text(theme.clone().unwrap_or_default())))
        });
        let middle = {
            let leaf = leaf.clone();
            Component::new("Middle", move |_| {
                let leaf = leaf.clone();
                Ok(move || Ok(VNode::component(&leaf, Props::new())))
            })
        };
        let top = {
            let middle = middle.clone();
            Component::new("Top", move |_| {
                provide("theme", "dark".to_string())?;
                let middle = middle.clone();
                Ok(move || Ok(VNode::component(&middle, Props::new())))
            })
        };

        renderer.render(Some(VNode::component(&top, Props::new())), root);
        assert_eq!(host.inner_html(root), "dark");
    }

    #[test]
    fn setup_only_apis_fail_outside_setup() {
        assert!(matches!(
            on_mounted(|| Ok(())),
            Err(RuntimeError::OutsideSetup { api: "on_mounted" })
        ));
        assert!(matches!(
            provide("k", 1),
            Err(RuntimeError::OutsideSetup { api: "provide" })
        ));
        assert!(matches!(
            inject::<i32>("k"),
            Err(RuntimeError::OutsideSetup { api: "inject" })
        ));
    }

    #[test]
    fn children_are_passed_as_slots() {
        let (host, renderer, root) = setup();
        let card = Component::new("Card", |ctx| {
            let ctx = ctx.clone();
            Ok(move || Ok(VNode::element("section", Props::new(), ctx.children().to_vec())))
        });
        renderer.render(
            Some(VNode::component_with_children(&card, Props::new(), vec![VNode::text("body")])),
            root,
        );
        assert_eq!(host.inner_html(root), "<section>body</section>");

        renderer.render(
            Some(VNode::component_with_children(&card, Props::new(), vec![VNode::text("new body")])),
            root,
        );
        assert_eq!(host.inner_html(root), "<section>new body</section>");
    }
}
