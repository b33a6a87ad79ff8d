//! Reactive Primitives
//!
//! This module implements the dependency-tracking half of the runtime:
//! tracked targets, signals, computeds, effects, scopes and watchers.
//!
//! # Concepts
//!
//! ## Targets and Signals
//!
//! A [`Reactive`] wraps an object or array; a [`Signal`] wraps a single
//! value. Reading either inside a running effect subscribes the effect to the
//! `(target, key)` that was read. Writing notifies every subscriber of the
//! keys that changed.
//!
//! ## Computeds
//!
//! A [`Computed`] is a derived value that caches its result. It re-evaluates
//! lazily, on the first read after one of its dependencies changed.
//!
//! ## Effects and Scopes
//!
//! An [`Effect`] is a computation that re-runs whenever its dependencies
//! change, or hands itself to a scheduler that decides when. An
//! [`EffectScope`] owns the effects created inside it so they can be stopped
//! together.
//!
//! ## Watchers
//!
//! [`watch`] observes a source and calls back with the new and old values,
//! batched through the [`crate::scheduler`].
//!
//! # Implementation Notes
//!
//! The registry, the running-effect stack and the current scope are
//! thread-local. Dependency buckets hold effects weakly; scopes, handles and
//! component instances own them.

mod computed;
mod context;
mod effect;
mod runtime;
mod scope;
mod signal;
mod subscriber;
mod target;
mod value;
mod watch;

pub use computed::{Computed, ComputedState};
pub use context::{pause_tracking, untracked, ReactiveContext, TrackingPause};
pub use effect::{Effect, EffectHandle, EffectOptions, EffectScheduler};
pub use runtime::Runtime;
pub use scope::{current_scope, on_scope_dispose, EffectScope};
pub use signal::Signal;
pub use subscriber::{SubscriberId, TargetId};
pub use target::{Reactive, ReadonlyReactive};
pub use value::{Callback, PropKey, Value};
pub use watch::{
    watch, watch_effect, watch_effect_with, CallbackResult, FlushTiming, OnCleanup, WatchHandle,
    WatchOptions, WatchSource,
};
