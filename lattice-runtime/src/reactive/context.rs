//! Reactive Context
//!
//! The reactive context tracks which effect is currently running. This
//! enables automatic dependency tracking: when a tracked value is read, the
//! registry subscribes the effect on top of the stack.
//!
//! # Implementation
//!
//! We use a thread-local stack of running effects. Running an effect pushes
//! it, and the returned guard pops it when dropped, so the stack stays
//! balanced even if the effect body unwinds. Nested effects (an effect that
//! reads a computed, which runs its own getter effect) attribute reads to the
//! innermost entry.
//!
//! Collection can be paused independently of the stack. Writes pause it while
//! they read the previous value, so a write never subscribes its caller.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use super::runtime::Subscriber;
use super::SubscriberId;

thread_local! {
    static EFFECT_STACK: RefCell<Vec<Rc<dyn Subscriber>>> = RefCell::new(Vec::new());
    static SHOULD_TRACK: Cell<bool> = const { Cell::new(true) };
}

/// Guard that pops the running effect when dropped.
pub struct ReactiveContext {
    subscriber_id: SubscriberId,
    prev_should_track: bool,
}

impl ReactiveContext {
    /// Enter a new reactive context for the given subscriber.
    ///
    /// Tracking is force-enabled for the duration of the context, so an
    /// effect started from an untracked section still collects its own
    /// dependencies.
    pub(crate) fn enter(subscriber: Rc<dyn Subscriber>) -> Self {
        let subscriber_id = subscriber.subscriber_id();
        EFFECT_STACK.with(|stack| stack.borrow_mut().push(subscriber));
        let prev_should_track = SHOULD_TRACK.with(|flag| flag.replace(true));

        Self {
            subscriber_id,
            prev_should_track,
        }
    }

    /// Check if there is a running effect.
    pub fn is_active() -> bool {
        EFFECT_STACK.with(|stack| !stack.borrow().is_empty())
    }

    /// Get the innermost running effect's ID, if any.
    pub fn current_subscriber_id() -> Option<SubscriberId> {
        EFFECT_STACK.with(|stack| stack.borrow().last().map(|sub| sub.subscriber_id()))
    }

    pub(crate) fn current_subscriber() -> Option<Rc<dyn Subscriber>> {
        EFFECT_STACK.with(|stack| stack.borrow().last().cloned())
    }

    /// Check whether the given effect is anywhere on the running stack.
    pub fn is_running(id: SubscriberId) -> bool {
        EFFECT_STACK.with(|stack| stack.borrow().iter().any(|sub| sub.subscriber_id() == id))
    }

    /// Whether reads should currently be recorded.
    pub fn should_track() -> bool {
        SHOULD_TRACK.with(|flag| flag.get())
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        EFFECT_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();

            if let Some(entry) = popped {
                debug_assert_eq!(
                    entry.subscriber_id(),
                    self.subscriber_id,
                    "ReactiveContext mismatch: expected {:?}, got {:?}",
                    self.subscriber_id,
                    entry.subscriber_id()
                );
            }
        });
        SHOULD_TRACK.with(|flag| flag.set(self.prev_should_track));
    }
}

/// Guard returned by [`pause_tracking`]; restores the previous tracking state
/// when dropped.
pub struct TrackingPause {
    prev: bool,
}

impl Drop for TrackingPause {
    fn drop(&mut self) {
        SHOULD_TRACK.with(|flag| flag.set(self.prev));
    }
}

/// Suppress dependency collection until the guard is dropped.
pub fn pause_tracking() -> TrackingPause {
    let prev = SHOULD_TRACK.with(|flag| flag.replace(false));
    TrackingPause { prev }
}

/// Run `f` without recording any reads as dependencies.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let _pause = pause_tracking();
    f()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::runtime::Dep;

    struct Probe(SubscriberId);

    impl Subscriber for Probe {
        fn subscriber_id(&self) -> SubscriberId {
            self.0
        }
        fn is_active(&self) -> bool {
            true
        }
        fn allows_recurse(&self) -> bool {
            false
        }
        fn add_dependency(&self, _dep: Rc<Dep>) {}
        fn notify(self: Rc<Self>) {}
        fn run_erased(self: Rc<Self>) {}
        fn stop(&self) {}
    }

    fn probe() -> Rc<dyn Subscriber> {
        Rc::new(Probe(SubscriberId::new()))
    }

    #[test]
    fn context_tracks_subscriber() {
        let sub = probe();
        let id = sub.subscriber_id();

        assert!(!ReactiveContext::is_active());
        assert!(ReactiveContext::current_subscriber_id().is_none());

        {
            let _ctx = ReactiveContext::enter(sub);

            assert!(ReactiveContext::is_active());
            assert_eq!(ReactiveContext::current_subscriber_id(), Some(id));
        }

        assert!(!ReactiveContext::is_active());
        assert!(ReactiveContext::current_subscriber_id().is_none());
    }

    #[test]
    fn nested_contexts() {
        let outer = probe();
        let inner = probe();
        let (id1, id2) = (outer.subscriber_id(), inner.subscriber_id());

        {
            let _ctx1 = ReactiveContext::enter(outer);
            assert_eq!(ReactiveContext::current_subscriber_id(), Some(id1));

            {
                let _ctx2 = ReactiveContext::enter(inner);
                assert_eq!(ReactiveContext::current_subscriber_id(), Some(id2));
                assert!(ReactiveContext::is_running(id1));
            }

            assert_eq!(ReactiveContext::current_subscriber_id(), Some(id1));
            assert!(!ReactiveContext::is_running(id2));
        }

        assert!(ReactiveContext::current_subscriber_id().is_none());
    }

    #[test]
    fn pause_is_scoped() {
        assert!(ReactiveContext::should_track());
        {
            let _pause = pause_tracking();
            assert!(!ReactiveContext::should_track());

            // Entering an effect re-enables collection for its body only.
            {
                let _ctx = ReactiveContext::enter(probe());
                assert!(ReactiveContext::should_track());
            }
            assert!(!ReactiveContext::should_track());
        }
        assert!(ReactiveContext::should_track());
        assert_eq!(untracked(ReactiveContext::should_track), false);
    }
}
