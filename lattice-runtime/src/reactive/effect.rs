//! Effect Implementation
//!
//! An Effect is a re-runnable computation that subscribes to whatever it
//! reads during its last run.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately to establish
//!    initial dependencies (unless created lazy).
//!
//! 2. When any dependency changes, the effect is notified. Without a
//!    scheduler it re-runs inline; with a scheduler, the scheduler decides
//!    when (typically by queueing a job).
//!
//! 3. Before re-running, the effect unsubscribes from every bucket it joined
//!    last time and collects a fresh set during execution.
//!
//! # Ownership
//!
//! Dependency buckets only hold effects weakly. An effect lives as long as
//! its `Effect` handle or the `EffectScope` that captured it at creation.
//!
//! # Stopping
//!
//! `stop()` unsubscribes from all buckets, runs the registered stop
//! callbacks and marks the effect inactive. Inactive effects ignore triggers;
//! running one explicitly executes the function without tracking.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use smallvec::SmallVec;

use super::context::ReactiveContext;
use super::runtime::{Dep, Subscriber};
use super::scope::{self, EffectScope};
use super::subscriber::SubscriberId;

/// Scheduler callback: receives a handle that can run the effect later.
pub type EffectScheduler = Rc<dyn Fn(EffectHandle)>;

type EffectFn<T> = Box<dyn FnMut() -> T>;

/// Options for [`Effect::with_options`].
#[derive(Clone, Default)]
pub struct EffectOptions {
    /// Do not run on creation.
    pub lazy: bool,
    /// Called instead of re-running inline when a dependency changes.
    pub scheduler: Option<EffectScheduler>,
    /// Allow the effect's own writes to re-trigger it.
    pub allow_recurse: bool,
    /// Scope that owns the effect. Defaults to the current scope.
    pub scope: Option<EffectScope>,
}

impl EffectOptions {
    pub fn lazy() -> Self {
        Self {
            lazy: true,
            ..Self::default()
        }
    }

    pub fn with_scheduler(mut self, scheduler: impl Fn(EffectHandle) + 'static) -> Self {
        self.scheduler = Some(Rc::new(scheduler));
        self
    }
}

struct EffectInner<T> {
    id: SubscriberId,
    func: RefCell<Option<EffectFn<T>>>,
    scheduler: Option<EffectScheduler>,
    allow_recurse: bool,
    deps: RefCell<SmallVec<[Rc<Dep>; 4]>>,
    active: Cell<bool>,
    on_stop: RefCell<Vec<Box<dyn FnOnce()>>>,
    run_count: Cell<usize>,
}

impl<T> EffectInner<T> {
    fn cleanup_deps(&self) {
        let deps = std::mem::take(&mut *self.deps.borrow_mut());
        for dep in deps {
            dep.remove(self.id);
        }
    }
}

/// Puts the effect function back into its slot, even if the body unwinds.
struct RestoreFn<'a, T> {
    slot: &'a RefCell<Option<EffectFn<T>>>,
    func: Option<EffectFn<T>>,
}

impl<T> Drop for RestoreFn<'_, T> {
    fn drop(&mut self) {
        if let Some(func) = self.func.take() {
            *self.slot.borrow_mut() = Some(func);
        }
    }
}

fn run_effect<T: 'static>(inner: &Rc<EffectInner<T>>) -> Option<T> {
    // The function is taken out while it runs; a re-entrant run finds the
    // slot empty and does nothing.
    let func = inner.func.borrow_mut().take()?;
    let mut restore = RestoreFn {
        slot: &inner.func,
        func: Some(func),
    };

    inner.run_count.set(inner.run_count.get() + 1);

    if !inner.active.get() {
        let func = restore.func.as_mut()?;
        return Some(func());
    }

    inner.cleanup_deps();
    let subscriber: Rc<dyn Subscriber> = inner.clone();
    let _ctx = ReactiveContext::enter(subscriber);
    tracing::trace!(effect = inner.id.raw(), "effect run");

    let func = restore.func.as_mut()?;
    Some(func())
}

impl<T: 'static> Subscriber for EffectInner<T> {
    fn subscriber_id(&self) -> SubscriberId {
        self.id
    }

    fn is_active(&self) -> bool {
        self.active.get()
    }

    fn allows_recurse(&self) -> bool {
        self.allow_recurse
    }

    fn add_dependency(&self, dep: Rc<Dep>) {
        self.deps.borrow_mut().push(dep);
    }

    fn notify(self: Rc<Self>) {
        match self.scheduler.clone() {
            Some(scheduler) => {
                let subscriber: Rc<dyn Subscriber> = self;
                scheduler(EffectHandle::from_subscriber(&subscriber));
            }
            None => {
                run_effect(&self);
            }
        }
    }

    fn run_erased(self: Rc<Self>) {
        run_effect(&self);
    }

    fn stop(&self) {
        if !self.active.get() {
            return;
        }
        self.cleanup_deps();
        let callbacks = std::mem::take(&mut *self.on_stop.borrow_mut());
        for callback in callbacks {
            callback();
        }
        self.active.set(false);
        tracing::trace!(effect = self.id.raw(), "effect stopped");
    }
}

/// A side-effecting computation that re-runs when its dependencies change.
///
/// # Example
///
/// ```rust,ignore
/// let count = Signal::new(0);
///
/// let counter = count.clone();
/// let effect = Effect::new(move || {
///     println!("Count is: {}", counter.get());
/// });
///
/// count.set(5);  // Prints: "Count is: 5"
/// ```
pub struct Effect<T: 'static = ()> {
    inner: Rc<EffectInner<T>>,
}

impl<T: 'static> Effect<T> {
    /// Create a new effect and run it immediately.
    pub fn new<F>(f: F) -> Self
    where
        F: FnMut() -> T + 'static,
    {
        Self::with_options(f, EffectOptions::default())
    }

    /// Create a new effect without running it.
    pub fn new_lazy<F>(f: F) -> Self
    where
        F: FnMut() -> T + 'static,
    {
        Self::with_options(f, EffectOptions::lazy())
    }

    /// Create an effect with explicit options.
    pub fn with_options<F>(f: F, options: EffectOptions) -> Self
    where
        F: FnMut() -> T + 'static,
    {
        let inner = Rc::new(EffectInner {
            id: SubscriberId::new(),
            func: RefCell::new(Some(Box::new(f))),
            scheduler: options.scheduler,
            allow_recurse: options.allow_recurse,
            deps: RefCell::new(SmallVec::new()),
            active: Cell::new(true),
            on_stop: RefCell::new(Vec::new()),
            run_count: Cell::new(0),
        });

        if let Some(owner) = options.scope.or_else(scope::current_scope) {
            owner.record_effect(inner.clone());
        }

        let effect = Self { inner };
        if !options.lazy {
            effect.run();
        }
        effect
    }

    /// Get the effect's unique ID.
    pub fn id(&self) -> SubscriberId {
        self.inner.id
    }

    /// Run the effect now, collecting fresh dependencies.
    ///
    /// Returns `None` if the effect is already executing further up the
    /// stack.
    pub fn run(&self) -> Option<T> {
        run_effect(&self.inner)
    }

    /// Unsubscribe from all dependencies and deactivate.
    pub fn stop(&self) {
        Subscriber::stop(&*self.inner);
    }

    /// Check if the effect is still active.
    pub fn is_active(&self) -> bool {
        self.inner.active.get()
    }

    /// Register a callback to run when the effect is stopped.
    pub fn on_stop(&self, f: impl FnOnce() + 'static) {
        if self.is_active() {
            self.inner.on_stop.borrow_mut().push(Box::new(f));
        } else {
            f();
        }
    }

    /// Weak, type-erased handle to this effect.
    pub fn handle(&self) -> EffectHandle {
        let subscriber: Rc<dyn Subscriber> = self.inner.clone();
        EffectHandle::from_subscriber(&subscriber)
    }

    /// Get the number of times the effect has run.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.get()
    }

    /// Get the number of buckets the effect is subscribed to.
    pub fn dependency_count(&self) -> usize {
        self.inner.deps.borrow().len()
    }
}

impl<T: 'static> Clone for Effect<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: 'static> fmt::Debug for Effect<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.inner.id)
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("active", &self.is_active())
            .finish()
    }
}

/// Weak, type-erased reference to an effect, handed to schedulers.
#[derive(Clone)]
pub struct EffectHandle {
    id: SubscriberId,
    subscriber: Weak<dyn Subscriber>,
}

impl EffectHandle {
    fn from_subscriber(subscriber: &Rc<dyn Subscriber>) -> Self {
        Self {
            id: subscriber.subscriber_id(),
            subscriber: Rc::downgrade(subscriber),
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Whether the effect is alive and active.
    pub fn is_active(&self) -> bool {
        self.subscriber.upgrade().is_some_and(|sub| sub.is_active())
    }

    /// Run the effect if it is still alive and active. Returns whether it ran.
    pub fn run(&self) -> bool {
        match self.subscriber.upgrade() {
            Some(subscriber) if subscriber.is_active() => {
                subscriber.run_erased();
                true
            }
            _ => false,
        }
    }

    /// Stop the effect if it is still alive.
    pub fn stop(&self) {
        if let Some(subscriber) = self.subscriber.upgrade() {
            subscriber.stop();
        }
    }
}

impl fmt::Debug for EffectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectHandle")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
