//! Signal Implementation
//!
//! A Signal is a ref-like cell: a single tracked value. It is the
//! fundamental reactive primitive for values that are not objects.
//!
//! # How Signals Work
//!
//! 1. When a signal is read within a running effect, the registry subscribes
//!    that effect to the signal's `Value` key.
//!
//! 2. When a signal's value changes, all subscribers are notified.
//!
//! 3. Setting a value equal to the current one is not a change.
//!
//! # Memory Layout
//!
//! Each signal is a shared handle to:
//! - A unique target ID (8 bytes)
//! - The value, behind a `RefCell`

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use super::runtime::Runtime;
use super::subscriber::TargetId;
use super::value::PropKey;

struct SignalInner<T> {
    id: TargetId,
    value: RefCell<T>,
}

impl<T> Drop for SignalInner<T> {
    fn drop(&mut self) {
        Runtime::forget_target(self.id);
    }
}

/// A reactive cell holding a value of type T.
///
/// # Example
///
/// ```rust,ignore
/// let count = Signal::new(0);
///
/// // Read the value
/// let value = count.get();
///
/// // Update the value (notifies subscribers)
/// count.set(5);
/// ```
pub struct Signal<T: 'static> {
    inner: Rc<SignalInner<T>>,
}

impl<T: 'static> Signal<T> {
    /// Create a new signal with the given initial value.
    pub fn new(value: T) -> Self {
        Self {
            inner: Rc::new(SignalInner {
                id: TargetId::new(),
                value: RefCell::new(value),
            }),
        }
    }

    /// Get the signal's target ID.
    pub fn id(&self) -> TargetId {
        self.inner.id
    }

    /// Read the value by reference, tracking the read.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        Runtime::track(self.inner.id, PropKey::Value);
        f(&self.inner.value.borrow())
    }

    /// Read the value by reference without tracking.
    pub fn with_untracked<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.value.borrow())
    }

    /// Replace the value and notify subscribers unconditionally.
    pub fn replace(&self, value: T) -> T {
        let old = self.inner.value.replace(value);
        self.notify();
        old
    }

    /// Notify subscribers without changing the value.
    ///
    /// Use after mutating the value in place through [`Signal::update_in_place`].
    pub fn notify(&self) {
        Runtime::trigger(self.inner.id, PropKey::Value);
    }

    /// Mutate the value in place and notify subscribers.
    pub fn update_in_place(&self, f: impl FnOnce(&mut T)) {
        f(&mut self.inner.value.borrow_mut());
        self.notify();
    }

    /// Number of effects subscribed to this signal.
    pub fn subscriber_count(&self) -> usize {
        Runtime::subscriber_count(self.inner.id, &PropKey::Value)
    }

    pub fn ptr_eq(&self, other: &Signal<T>) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: Clone + 'static> Signal<T> {
    /// Get the current value.
    ///
    /// If called within a running effect, this also subscribes the effect.
    pub fn get(&self) -> T {
        self.with(T::clone)
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> T {
        self.inner.value.borrow().clone()
    }
}

impl<T: PartialEq + 'static> Signal<T> {
    /// Set a new value. Subscribers are notified only if it differs.
    pub fn set(&self, value: T) {
        let changed = *self.inner.value.borrow() != value;
        if changed {
            *self.inner.value.borrow_mut() = value;
            self.notify();
        }
    }

    /// Update the value using a function of the current one.
    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        let next = f(&self.inner.value.borrow());
        self.set(next);
    }
}

impl<T: 'static> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug + 'static> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.inner.id)
            .field("value", &*self.inner.value.borrow())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

impl<T: Default + 'static> Default for Signal<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
