//! Computed Implementation
//!
//! A Computed is a cached derived value that re-evaluates only when read
//! after one of its dependencies changed.
//!
//! # How Computeds Work
//!
//! 1. The getter runs inside a lazy effect. Nothing runs until the first read.
//!
//! 2. On read, if the computed is dirty, the getter runs, the result is
//!    cached and the computed becomes clean.
//!
//! 3. When a dependency changes, the effect's scheduler marks the computed
//!    dirty and notifies the computed's own subscribers. The getter is not
//!    re-run at that point.
//!
//! # Why This Matters
//!
//! - A signal changes
//! - 10 computeds depend on it
//! - Only the computeds actually read again will recompute
//! - Computeds that are never read stay dirty (no wasted work)

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use super::effect::{Effect, EffectOptions};
use super::runtime::Runtime;
use super::subscriber::TargetId;
use super::value::PropKey;
use crate::error::RuntimeError;

/// Dirty state for a computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputedState {
    /// The cached value is up-to-date.
    Clean,

    /// A dependency changed since the last evaluation (or there was none).
    Dirty,
}

type Setter<T> = Box<dyn Fn(T)>;

struct ComputedInner<T: 'static> {
    id: TargetId,
    value: RefCell<Option<T>>,
    dirty: Cell<bool>,
    effect: Effect<T>,
    setter: Option<Setter<T>>,
}

impl<T: 'static> Drop for ComputedInner<T> {
    fn drop(&mut self) {
        self.effect.stop();
        Runtime::forget_target(self.id);
    }
}

/// A cached derived value.
///
/// # Example
///
/// ```rust,ignore
/// let count = Signal::new(2);
/// let c = count.clone();
/// let doubled = Computed::new(move || c.get() * 2);
///
/// assert_eq!(doubled.get(), 4);
/// count.set(3);
/// assert_eq!(doubled.get(), 6);
/// ```
pub struct Computed<T: 'static> {
    inner: Rc<ComputedInner<T>>,
}

impl<T: 'static> Computed<T> {
    /// Create a read-only computed. The getter does not run until first read.
    pub fn new<F>(getter: F) -> Self
    where
        F: FnMut() -> T + 'static,
    {
        Self::build(getter, None)
    }

    /// Create a writable computed. Writes are forwarded to `setter`.
    pub fn with_setter<F, S>(getter: F, setter: S) -> Self
    where
        F: FnMut() -> T + 'static,
        S: Fn(T) + 'static,
    {
        Self::build(getter, Some(Box::new(setter)))
    }

    fn build<F>(getter: F, setter: Option<Setter<T>>) -> Self
    where
        F: FnMut() -> T + 'static,
    {
        let inner = Rc::new_cyclic(|weak: &Weak<ComputedInner<T>>| {
            let weak = weak.clone();
            let options = EffectOptions::lazy().with_scheduler(move |_| {
                if let Some(inner) = weak.upgrade() {
                    if !inner.dirty.replace(true) {
                        Runtime::trigger(inner.id, PropKey::Value);
                    }
                }
            });

            ComputedInner {
                id: TargetId::new(),
                value: RefCell::new(None),
                dirty: Cell::new(true),
                effect: Effect::with_options(getter, options),
                setter,
            }
        });
        Self { inner }
    }

    /// Get the computed's target ID.
    pub fn id(&self) -> TargetId {
        self.inner.id
    }

    /// Get the current dirty state.
    pub fn state(&self) -> ComputedState {
        if self.inner.dirty.get() {
            ComputedState::Dirty
        } else {
            ComputedState::Clean
        }
    }

    /// Check if the computed has a cached value.
    pub fn has_value(&self) -> bool {
        self.inner.value.borrow().is_some()
    }

    /// Write through the setter.
    pub fn set(&self, value: T) -> Result<(), RuntimeError> {
        match &self.inner.setter {
            Some(setter) => {
                setter(value);
                Ok(())
            }
            None => {
                tracing::warn!(computed = self.inner.id.raw(), "write to a read-only computed");
                Err(RuntimeError::ReadonlyComputed)
            }
        }
    }

    /// Stop the getter effect. The last cached value stays readable.
    pub fn stop(&self) {
        self.inner.effect.stop();
    }

    pub fn is_active(&self) -> bool {
        self.inner.effect.is_active()
    }

    /// Number of effects subscribed to this computed.
    pub fn subscriber_count(&self) -> usize {
        Runtime::subscriber_count(self.inner.id, &PropKey::Value)
    }

    fn refresh(&self) {
        if !self.inner.dirty.get() {
            return;
        }
        // `None` means the getter is already on the stack; keep the stale value.
        if let Some(value) = self.inner.effect.run() {
            *self.inner.value.borrow_mut() = Some(value);
            self.inner.dirty.set(false);
        }
    }
}

impl<T: Clone + 'static> Computed<T> {
    /// Get the current value, recomputing if necessary.
    ///
    /// Returns `None` only when a getter reads its own computed before the
    /// first evaluation finished.
    pub fn try_get(&self) -> Option<T> {
        Runtime::track(self.inner.id, PropKey::Value);
        self.refresh();
        self.inner.value.borrow().clone()
    }

    /// Get the current value, recomputing if necessary.
    ///
    /// # Panics
    ///
    /// Panics if the getter reads its own computed during its first
    /// evaluation.
    pub fn get(&self) -> T {
        self.try_get()
            .unwrap_or_else(|| panic!("computed {:?} read itself during its first evaluation", self.inner.id))
    }

    /// Get the current value without subscribing the caller.
    pub fn get_untracked(&self) -> Option<T> {
        self.refresh();
        self.inner.value.borrow().clone()
    }
}

impl<T: 'static> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: 'static> fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("has_value", &self.has_value())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
