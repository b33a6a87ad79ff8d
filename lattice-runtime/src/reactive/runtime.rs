//! Dependency Registry
//!
//! The registry is the bookkeeping half of the reactive system: for every
//! `(target, key)` pair that has ever been read inside an effect it keeps a
//! bucket of subscribed effects.
//!
//! # How It Works
//!
//! 1. A tracked read calls [`Runtime::track`], which adds the running effect
//!    to the bucket and records the bucket on the effect (so the effect can
//!    unsubscribe itself in O(n) before its next run).
//!
//! 2. A write calls [`Runtime::trigger`] with every key it invalidated. The
//!    runtime snapshots the affected buckets, deduplicates the effects, and
//!    notifies each one that is still active. The running effect is skipped
//!    so an effect that writes what it reads does not loop forever.
//!
//! 3. Notification either re-runs the effect inline or, when the effect has
//!    a scheduler, hands it to the scheduler.
//!
//! # Lifetime
//!
//! Buckets hold effects weakly; whoever owns an effect (a scope, a watcher
//! handle, a component) keeps it alive. Buckets are created lazily and
//! dropped together with their target.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use super::context::ReactiveContext;
use super::subscriber::{SubscriberId, TargetId};
use super::value::PropKey;

/// A computation that can be subscribed to dependency buckets.
pub(crate) trait Subscriber {
    /// Get the subscriber ID for this effect.
    fn subscriber_id(&self) -> SubscriberId;

    /// Whether the effect still accepts notifications.
    fn is_active(&self) -> bool;

    /// Whether the effect may be re-triggered by its own writes.
    fn allows_recurse(&self) -> bool;

    /// Record that the effect is now a member of `dep`.
    fn add_dependency(&self, dep: Rc<Dep>);

    /// A dependency changed: run now or hand over to the scheduler.
    fn notify(self: Rc<Self>);

    /// Run the effect, discarding its result.
    fn run_erased(self: Rc<Self>);

    /// Unsubscribe from everything and deactivate.
    fn stop(&self);
}

/// Subscriber set for one `(target, key)` pair.
pub(crate) struct Dep {
    subscribers: RefCell<IndexMap<SubscriberId, Weak<dyn Subscriber>>>,
}

impl Dep {
    fn new() -> Rc<Self> {
        Rc::new(Self {
            subscribers: RefCell::new(IndexMap::new()),
        })
    }

    /// Add a subscriber. Returns `false` if it was already a member.
    fn insert(&self, subscriber: &Rc<dyn Subscriber>) -> bool {
        let mut subscribers = self.subscribers.borrow_mut();
        let id = subscriber.subscriber_id();
        if subscribers.contains_key(&id) {
            return false;
        }
        subscribers.insert(id, Rc::downgrade(subscriber));
        true
    }

    pub(crate) fn remove(&self, id: SubscriberId) {
        self.subscribers.borrow_mut().shift_remove(&id);
    }

    pub(crate) fn len(&self) -> usize {
        self.subscribers.borrow().len()
    }

    /// Point-in-time copy of the live members. Dead entries are pruned.
    fn snapshot(&self) -> Vec<Rc<dyn Subscriber>> {
        let mut subscribers = self.subscribers.borrow_mut();
        let mut live = Vec::with_capacity(subscribers.len());
        subscribers.retain(|_, weak| match weak.upgrade() {
            Some(subscriber) => {
                live.push(subscriber);
                true
            }
            None => false,
        });
        live
    }
}

thread_local! {
    static TARGET_MAP: RefCell<HashMap<TargetId, HashMap<PropKey, Rc<Dep>>>> =
        RefCell::new(HashMap::new());
}

/// The per-thread dependency registry.
pub struct Runtime;

impl Runtime {
    /// Record the running effect as a subscriber of `(target, key)`.
    ///
    /// A no-op when no effect is running or collection is paused.
    pub fn track(target: TargetId, key: PropKey) {
        if !ReactiveContext::should_track() {
            return;
        }
        let Some(subscriber) = ReactiveContext::current_subscriber() else {
            return;
        };

        let dep = TARGET_MAP.with(|map| {
            map.borrow_mut()
                .entry(target)
                .or_default()
                .entry(key)
                .or_insert_with(Dep::new)
                .clone()
        });

        if dep.insert(&subscriber) {
            subscriber.add_dependency(dep);
        }
    }

    /// Notify every subscriber of `(target, key)`.
    pub fn trigger(target: TargetId, key: PropKey) {
        Self::trigger_keys(target, &[key]);
    }

    /// Notify every subscriber of any of `keys` on `target`. Each effect is
    /// notified at most once even if it read several of the keys.
    pub fn trigger_keys(target: TargetId, keys: &[PropKey]) {
        let deps: Vec<Rc<Dep>> = TARGET_MAP.with(|map| {
            map.borrow()
                .get(&target)
                .map(|by_key| keys.iter().filter_map(|key| by_key.get(key).cloned()).collect())
                .unwrap_or_default()
        });

        if deps.is_empty() {
            return;
        }

        let mut effects: IndexMap<SubscriberId, Rc<dyn Subscriber>> = IndexMap::new();
        for dep in &deps {
            for subscriber in dep.snapshot() {
                effects.entry(subscriber.subscriber_id()).or_insert(subscriber);
            }
        }

        tracing::trace!(target = target.raw(), ?keys, count = effects.len(), "trigger");

        let running = ReactiveContext::current_subscriber_id();
        for (id, subscriber) in effects {
            // An earlier notification in this wave may have stopped it.
            if !subscriber.is_active() {
                continue;
            }
            if Some(id) == running && !subscriber.allows_recurse() {
                continue;
            }
            subscriber.notify();
        }
    }

    /// Number of live subscribers of `(target, key)`.
    pub fn subscriber_count(target: TargetId, key: &PropKey) -> usize {
        TARGET_MAP.with(|map| {
            map.borrow()
                .get(&target)
                .and_then(|by_key| by_key.get(key))
                .map(|dep| dep.len())
                .unwrap_or(0)
        })
    }

    /// Drop every bucket belonging to `target`. Called when a target dies.
    pub(crate) fn forget_target(target: TargetId) {
        let _ = TARGET_MAP.try_with(|map| {
            if let Ok(mut map) = map.try_borrow_mut() {
                map.remove(&target);
            }
        });
    }
}
