//! Watchers
//!
//! A watcher runs a callback with `(new, old)` whenever the value produced by
//! its source changes. It is built from a getter effect whose scheduler
//! decides when the comparison and callback run:
//!
//! - `Pre` (default): queued before the next render round.
//! - `Post`: queued after the next render round.
//! - `Sync`: inline, on the stack of the write that triggered it.
//!
//! A watcher lives until it is stopped, either through its [`WatchHandle`]
//! or by stopping the scope it was created in. Dropping the handle does not
//! stop it.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::{Rc, Weak};

use super::computed::Computed;
use super::effect::{Effect, EffectHandle, EffectOptions};
use super::signal::Signal;
use super::subscriber::TargetId;
use super::target::{Reactive, ReadonlyReactive};
use super::value::Value;
use crate::error::{BoxError, ErrorContext, ErrorOrigin, RuntimeError};
use crate::render::component;
use crate::scheduler::{self, Job};

/// Result type of watcher callbacks and cleanups.
pub type CallbackResult = Result<(), BoxError>;

type Cleanup = Box<dyn FnOnce() -> CallbackResult>;
type CleanupSlot = Rc<RefCell<Option<Cleanup>>>;

/// When a triggered watcher runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FlushTiming {
    #[default]
    Pre,
    Post,
    Sync,
}

/// Options for [`watch`].
#[derive(Debug, Clone, Copy, Default)]
pub struct WatchOptions {
    /// Invoke the callback once at creation with `old = None`.
    pub immediate: bool,
    /// Force (or disable) deep traversal. `None` uses the source's default.
    pub deep: Option<bool>,
    pub flush: FlushTiming,
}

impl WatchOptions {
    pub fn immediate() -> Self {
        Self {
            immediate: true,
            ..Self::default()
        }
    }

    pub fn deep(mut self, deep: bool) -> Self {
        self.deep = Some(deep);
        self
    }

    pub fn flush(mut self, flush: FlushTiming) -> Self {
        self.flush = flush;
        self
    }
}

/// Something a watcher can observe.
pub trait WatchSource {
    type Value: Clone + PartialEq + 'static;

    /// Whether the source is traversed deeply when no `deep` option is given.
    fn deep_by_default(&self) -> bool {
        false
    }

    fn into_getter(self) -> Box<dyn FnMut() -> Self::Value>;
}

impl<T, F> WatchSource for F
where
    F: FnMut() -> T + 'static,
    T: Clone + PartialEq + 'static,
{
    type Value = T;

    fn into_getter(self) -> Box<dyn FnMut() -> T> {
        Box::new(self)
    }
}

impl<T: Clone + PartialEq + 'static> WatchSource for Signal<T> {
    type Value = T;

    fn into_getter(self) -> Box<dyn FnMut() -> T> {
        Box::new(move || self.get())
    }
}

impl<T: Clone + PartialEq + 'static> WatchSource for Computed<T> {
    type Value = T;

    fn into_getter(self) -> Box<dyn FnMut() -> T> {
        Box::new(move || self.get())
    }
}

impl WatchSource for Reactive {
    type Value = Reactive;

    fn deep_by_default(&self) -> bool {
        true
    }

    fn into_getter(self) -> Box<dyn FnMut() -> Reactive> {
        Box::new(move || self.clone())
    }
}

/// Registers the cleanup run before the next callback and on stop.
#[derive(Clone)]
pub struct OnCleanup {
    slot: CleanupSlot,
}

impl OnCleanup {
    pub fn register(&self, f: impl FnOnce() -> CallbackResult + 'static) {
        *self.slot.borrow_mut() = Some(Box::new(f));
    }
}

fn run_cleanup(slot: &CleanupSlot, errors: &ErrorContext) {
    let cleanup = slot.borrow_mut().take();
    if let Some(cleanup) = cleanup {
        if let Err(err) = cleanup() {
            errors.report(RuntimeError::callback(err), ErrorOrigin::WatchCleanup);
        }
    }
}

/// Read every property reachable from `value`, once per target.
fn traverse(value: &dyn Any) {
    let mut seen = HashSet::new();
    if let Some(target) = value.downcast_ref::<Reactive>() {
        traverse_target(target, &mut seen);
    } else if let Some(target) = value.downcast_ref::<ReadonlyReactive>() {
        for item in target.values() {
            traverse_value(&item, &mut seen);
        }
    } else if let Some(value) = value.downcast_ref::<Value>() {
        traverse_value(value, &mut seen);
    } else if let Some(values) = value.downcast_ref::<Vec<Value>>() {
        for value in values {
            traverse_value(value, &mut seen);
        }
    }
}

fn traverse_value(value: &Value, seen: &mut HashSet<TargetId>) {
    if let Value::Target(target) = value {
        traverse_target(target, seen);
    }
}

fn traverse_target(target: &Reactive, seen: &mut HashSet<TargetId>) {
    if !seen.insert(target.id()) {
        return;
    }
    for key in target.own_keys() {
        traverse_value(&target.get(key), seen);
    }
}

type WatchCallback<V> = Box<dyn FnMut(&V, Option<&V>, &OnCleanup) -> CallbackResult>;

struct Watcher<V: 'static> {
    effect: RefCell<Option<Effect<V>>>,
    old: RefCell<Option<V>>,
    cleanup: CleanupSlot,
    callback: RefCell<WatchCallback<V>>,
    deep: bool,
    errors: ErrorContext,
}

impl<V: Clone + PartialEq + 'static> Watcher<V> {
    fn job(&self) {
        let effect = match self.effect.borrow().clone() {
            Some(effect) if effect.is_active() => effect,
            _ => return,
        };
        let Some(new) = effect.run() else {
            return;
        };
        if !self.deep && self.old.borrow().as_ref() == Some(&new) {
            return;
        }

        let Ok(mut callback) = self.callback.try_borrow_mut() else {
            tracing::trace!("watcher callback re-entered; skipping");
            return;
        };
        run_cleanup(&self.cleanup, &self.errors);

        let old = self.old.replace(Some(new.clone()));
        let on_cleanup = OnCleanup {
            slot: self.cleanup.clone(),
        };
        if let Err(err) = callback(&new, old.as_ref(), &on_cleanup) {
            self.errors
                .report(RuntimeError::callback(err), ErrorOrigin::WatchCallback);
        }
    }

    fn teardown(&self) {
        run_cleanup(&self.cleanup, &self.errors);
        self.effect.borrow_mut().take();
    }
}

/// Stops a watcher.
#[derive(Debug, Clone)]
pub struct WatchHandle {
    effect: EffectHandle,
}

impl WatchHandle {
    /// Stop the getter effect and run the final cleanup. Idempotent.
    pub fn stop(&self) {
        self.effect.stop();
    }

    pub fn is_active(&self) -> bool {
        self.effect.is_active()
    }
}

fn scheduled(flush: FlushTiming, run: impl Fn() + 'static) -> EffectOptions {
    match flush {
        FlushTiming::Sync => EffectOptions::lazy().with_scheduler(move |_| run()),
        FlushTiming::Pre | FlushTiming::Post => {
            let job = Job::new(move || {
                run();
                Ok(())
            });
            EffectOptions::lazy().with_scheduler(move |_| {
                if flush == FlushTiming::Pre {
                    scheduler::queue_pre_flush_cb(job.clone());
                } else {
                    scheduler::queue_post_flush_cb(job.clone());
                }
            })
        }
    }
}

/// Watch `source` and call `callback(new, old, on_cleanup)` when it changes.
///
/// # Example
///
/// ```rust,ignore
/// let count = Signal::new(0);
/// let handle = watch(count.clone(), |new, old, _| {
///     println!("{old:?} -> {new}");
///     Ok(())
/// }, WatchOptions::default());
/// ```
pub fn watch<S, F>(source: S, callback: F, options: WatchOptions) -> WatchHandle
where
    S: WatchSource,
    F: FnMut(&S::Value, Option<&S::Value>, &OnCleanup) -> CallbackResult + 'static,
{
    let deep = options.deep.unwrap_or_else(|| source.deep_by_default());
    let mut raw = source.into_getter();
    let getter = move || {
        let value = raw();
        if deep {
            traverse(&value);
        }
        value
    };

    let watcher = Rc::new(Watcher {
        effect: RefCell::new(None),
        old: RefCell::new(None),
        cleanup: Rc::new(RefCell::new(None)),
        callback: RefCell::new(Box::new(callback) as WatchCallback<S::Value>),
        deep,
        errors: component::current_error_context(),
    });

    let weak: Weak<Watcher<S::Value>> = Rc::downgrade(&watcher);
    let options_for_effect = scheduled(options.flush, move || {
        if let Some(watcher) = weak.upgrade() {
            watcher.job();
        }
    });
    let effect = Effect::with_options(getter, options_for_effect);

    // The effect keeps the watcher alive until it is stopped.
    let keep = watcher.clone();
    effect.on_stop(move || keep.teardown());
    *watcher.effect.borrow_mut() = Some(effect.clone());

    if options.immediate {
        watcher.job();
    } else {
        *watcher.old.borrow_mut() = effect.run();
    }

    WatchHandle {
        effect: effect.handle(),
    }
}

/// Run `f` immediately, tracking its reads, and re-run it (pre flush)
/// whenever any of them change.
pub fn watch_effect<F>(f: F) -> WatchHandle
where
    F: FnMut(&OnCleanup) -> CallbackResult + 'static,
{
    watch_effect_with(f, FlushTiming::Pre)
}

/// [`watch_effect`] with explicit flush timing.
pub fn watch_effect_with<F>(mut f: F, flush: FlushTiming) -> WatchHandle
where
    F: FnMut(&OnCleanup) -> CallbackResult + 'static,
{
    let cleanup: CleanupSlot = Rc::new(RefCell::new(None));
    let errors = component::current_error_context();

    let body = {
        let cleanup = cleanup.clone();
        let errors = errors.clone();
        move || {
            run_cleanup(&cleanup, &errors);
            let on_cleanup = OnCleanup {
                slot: cleanup.clone(),
            };
            if let Err(err) = f(&on_cleanup) {
                errors.report(RuntimeError::callback(err), ErrorOrigin::WatchCallback);
            }
        }
    };

    let handle_slot: Rc<RefCell<Option<EffectHandle>>> = Rc::new(RefCell::new(None));
    let runner = handle_slot.clone();
    let effect = Effect::with_options(
        body,
        scheduled(flush, move || {
            let handle = runner.borrow().clone();
            if let Some(handle) = handle {
                handle.run();
            }
        }),
    );
    *handle_slot.borrow_mut() = Some(effect.handle());

    let keep = effect.clone();
    effect.on_stop(move || {
        run_cleanup(&cleanup, &errors);
        drop(keep);
    });
    effect.run();

    WatchHandle {
        effect: effect.handle(),
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
