//! Effect Scopes
//!
//! A scope collects the effects created while it is current, plus cleanup
//! callbacks and child scopes, so that all of them can be disposed with one
//! `stop()`. Components own one scope each; the render effect, watchers and
//! computeds created during setup all land in it.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;

use super::runtime::Subscriber;

static SCOPE_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

thread_local! {
    static CURRENT_SCOPE: RefCell<Option<EffectScope>> = const { RefCell::new(None) };
}

struct ScopeInner {
    id: u64,
    active: Cell<bool>,
    effects: RefCell<Vec<Rc<dyn Subscriber>>>,
    cleanups: RefCell<Vec<Box<dyn FnOnce()>>>,
    children: RefCell<IndexMap<u64, EffectScope>>,
    parent: Option<Weak<ScopeInner>>,
}

/// An owner for effects and cleanups with a single teardown point.
#[derive(Clone)]
pub struct EffectScope {
    inner: Rc<ScopeInner>,
}

/// Restores the previously current scope when dropped.
struct ScopeGuard {
    prev: Option<EffectScope>,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        let prev = self.prev.take();
        CURRENT_SCOPE.with(|current| *current.borrow_mut() = prev);
    }
}

impl EffectScope {
    /// Create a scope attached to the current scope (if any). Stopping the
    /// parent stops this scope too.
    pub fn new() -> Self {
        let scope = Self::create(current_scope().map(|parent| Rc::downgrade(&parent.inner)));
        if let Some(parent) = scope.parent() {
            parent
                .inner
                .children
                .borrow_mut()
                .insert(scope.inner.id, scope.clone());
        }
        scope
    }

    /// Create a scope with no parent. It lives until stopped explicitly.
    pub fn detached() -> Self {
        Self::create(None)
    }

    fn create(parent: Option<Weak<ScopeInner>>) -> Self {
        Self {
            inner: Rc::new(ScopeInner {
                id: SCOPE_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
                active: Cell::new(true),
                effects: RefCell::new(Vec::new()),
                cleanups: RefCell::new(Vec::new()),
                children: RefCell::new(IndexMap::new()),
                parent,
            }),
        }
    }

    fn parent(&self) -> Option<EffectScope> {
        self.inner
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|inner| EffectScope { inner })
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.get()
    }

    /// Run `f` with this scope current. Returns `None` without running `f`
    /// if the scope has been stopped.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        if !self.is_active() {
            tracing::warn!(scope = self.inner.id, "cannot run an inactive effect scope");
            return None;
        }
        let prev = CURRENT_SCOPE.with(|current| current.borrow_mut().replace(self.clone()));
        let _guard = ScopeGuard { prev };
        Some(f())
    }

    pub(crate) fn record_effect(&self, effect: Rc<dyn Subscriber>) {
        if self.is_active() {
            self.inner.effects.borrow_mut().push(effect);
        }
    }

    /// Register a callback to run when the scope stops.
    pub fn on_dispose(&self, f: impl FnOnce() + 'static) {
        if self.is_active() {
            self.inner.cleanups.borrow_mut().push(Box::new(f));
        }
    }

    /// Stop every recorded effect, run cleanups, stop child scopes and detach
    /// from the parent. Idempotent.
    pub fn stop(&self) {
        if !self.inner.active.replace(false) {
            return;
        }
        tracing::trace!(scope = self.inner.id, "stopping effect scope");

        let effects = std::mem::take(&mut *self.inner.effects.borrow_mut());
        for effect in effects {
            effect.stop();
        }

        let cleanups = std::mem::take(&mut *self.inner.cleanups.borrow_mut());
        for cleanup in cleanups {
            cleanup();
        }

        let children = std::mem::take(&mut *self.inner.children.borrow_mut());
        for (_, child) in children {
            child.stop();
        }

        if let Some(parent) = self.parent() {
            parent.inner.children.borrow_mut().shift_remove(&self.inner.id);
        }
    }

    pub fn effect_count(&self) -> usize {
        self.inner.effects.borrow().len()
    }

    pub fn child_count(&self) -> usize {
        self.inner.children.borrow().len()
    }

    pub fn ptr_eq(&self, other: &EffectScope) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for EffectScope {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EffectScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectScope")
            .field("id", &self.inner.id)
            .field("active", &self.is_active())
            .field("effects", &self.effect_count())
            .field("children", &self.child_count())
            .finish()
    }
}

/// The scope currently collecting effects, if any.
pub fn current_scope() -> Option<EffectScope> {
    CURRENT_SCOPE.with(|current| current.borrow().clone())
}

/// Register a cleanup on the current scope. Returns `false` (and does
/// nothing) when no scope is current.
pub fn on_scope_dispose(f: impl FnOnce() + 'static) -> bool {
    match current_scope() {
        Some(scope) => {
            scope.on_dispose(f);
            true
        }
        None => {
            tracing::warn!("on_scope_dispose called without an active effect scope");
            false
        }
    }
}
