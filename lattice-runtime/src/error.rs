//! Error Channel
//!
//! Every failure that happens inside the runtime (user setup and render
//! functions, lifecycle hooks, watcher callbacks, scheduler jobs) is routed
//! through a single reporting function instead of unwinding through the
//! renderer. This keeps sibling work going: one broken component does not stop
//! the rest of the tree from mounting.
//!
//! # Resolution Order
//!
//! 1. The handler installed on the owning application (`App::on_error`).
//! 2. The thread's global handler (`set_error_handler`).
//! 3. Otherwise the error is logged and parked in the unhandled queue, which
//!    is surfaced by `scheduler::next_tick()` and `take_unhandled_errors()`.
//!
//! Misuse of the API (calling setup-only functions outside setup, writing a
//! read-only computed) is *not* reported here; those calls return `Err`
//! directly to the caller.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use thiserror::Error;

use crate::config;
use crate::scheduler::JobId;

/// Boxed error returned by user-supplied code.
pub type BoxError = Box<dyn std::error::Error + 'static>;

/// A shared, identity-carrying error. Reporting the same `ErrorRef` twice in
/// one flush window forwards it to the handler only once.
pub type ErrorRef = Rc<RuntimeError>;

/// Handler signature for the error channel.
pub type ErrorHandler = Rc<dyn Fn(&ErrorRef, &ErrorInfo)>;

/// Errors produced by the runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// A setup-only API was called while no component was being set up.
    #[error("`{api}` can only be called during component setup")]
    OutsideSetup { api: &'static str },

    /// Attempted to write a computed value that has no setter.
    #[error("computed value is read-only")]
    ReadonlyComputed,

    /// `App::mount` was called twice.
    #[error("app is already mounted")]
    AlreadyMounted,

    /// `App::unmount` was called before `App::mount`.
    #[error("app is not mounted")]
    NotMounted,

    /// A scheduler job re-queued itself too many times in a single flush.
    #[error("maximum recursive updates exceeded ({limit}) for job {job:?}")]
    RecursionLimit { job: JobId, limit: usize },

    /// The runtime configuration could not be parsed.
    #[error("invalid runtime config: {0}")]
    Config(#[from] serde_json::Error),

    /// User code (setup, render, hook, callback) failed.
    #[error("{0}")]
    Callback(BoxError),
}

impl RuntimeError {
    /// Wrap an error raised by user code.
    pub fn callback(error: impl Into<BoxError>) -> Self {
        Self::Callback(error.into())
    }
}

/// Lifecycle phases that carry user hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleHook {
    BeforeMount,
    Mounted,
    BeforeUpdate,
    Updated,
    BeforeUnmount,
    Unmounted,
    Activated,
    Deactivated,
}

impl LifecycleHook {
    /// Name of the registration function for this hook.
    pub fn api_name(self) -> &'static str {
        match self {
            Self::BeforeMount => "on_before_mount",
            Self::Mounted => "on_mounted",
            Self::BeforeUpdate => "on_before_update",
            Self::Updated => "on_updated",
            Self::BeforeUnmount => "on_before_unmount",
            Self::Unmounted => "on_unmounted",
            Self::Activated => "on_activated",
            Self::Deactivated => "on_deactivated",
        }
    }
}

/// Where a reported error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorOrigin {
    SetupFunction,
    RenderFunction,
    WatchCallback,
    WatchCleanup,
    LifecycleHook(LifecycleHook),
    Scheduler,
    AppUnmountCleanup,
}

impl fmt::Display for ErrorOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SetupFunction => f.write_str("setup function"),
            Self::RenderFunction => f.write_str("render function"),
            Self::WatchCallback => f.write_str("watcher callback"),
            Self::WatchCleanup => f.write_str("watcher cleanup function"),
            Self::LifecycleHook(hook) => write!(f, "{} hook", hook.api_name()),
            Self::Scheduler => f.write_str("scheduler flush"),
            Self::AppUnmountCleanup => f.write_str("app unmount cleanup function"),
        }
    }
}

/// Context passed to the error handler alongside the error.
#[derive(Debug, Clone)]
pub struct ErrorInfo {
    /// Which runtime phase was executing user code.
    pub origin: ErrorOrigin,
    /// Name of the component that owned the failing code, if any.
    pub component: Option<Rc<str>>,
}

impl ErrorInfo {
    pub fn new(origin: ErrorOrigin) -> Self {
        Self {
            origin,
            component: None,
        }
    }

    pub fn with_component(mut self, name: Rc<str>) -> Self {
        self.component = Some(name);
        self
    }
}

thread_local! {
    static GLOBAL_HANDLER: RefCell<Option<ErrorHandler>> = RefCell::new(None);
    static REPORTED: RefCell<Vec<ErrorRef>> = RefCell::new(Vec::new());
    static UNHANDLED: RefCell<Vec<ErrorRef>> = RefCell::new(Vec::new());
}

/// Install (or clear) the thread's global error handler.
pub fn set_error_handler(handler: Option<ErrorHandler>) {
    GLOBAL_HANDLER.with(|slot| *slot.borrow_mut() = handler);
}

/// Drain errors that reached the channel with no handler installed.
pub fn take_unhandled_errors() -> Vec<ErrorRef> {
    UNHANDLED.with(|queue| std::mem::take(&mut *queue.borrow_mut()))
}

/// Shared, replaceable handler slot owned by an application.
pub(crate) type HandlerSlot = Rc<RefCell<Option<ErrorHandler>>>;

/// Where errors raised by a piece of user code should be routed.
#[derive(Clone, Default)]
pub(crate) struct ErrorContext {
    pub(crate) component: Option<Rc<str>>,
    pub(crate) app_handler: Option<HandlerSlot>,
}

impl ErrorContext {
    pub(crate) fn report(&self, error: impl Into<ErrorRef>, origin: ErrorOrigin) {
        let mut info = ErrorInfo::new(origin);
        if let Some(name) = &self.component {
            info = info.with_component(name.clone());
        }
        let handler = self.app_handler.as_ref().and_then(|slot| slot.borrow().clone());
        report(error, info, handler);
    }
}

/// Pop the oldest unhandled error, leaving the rest queued.
pub(crate) fn take_first_unhandled() -> Option<ErrorRef> {
    UNHANDLED.with(|queue| {
        let mut queue = queue.borrow_mut();
        if queue.is_empty() {
            None
        } else {
            Some(queue.remove(0))
        }
    })
}

/// Report an error raised by user code.
pub(crate) fn report(error: impl Into<ErrorRef>, info: ErrorInfo, app_handler: Option<ErrorHandler>) {
    let error = error.into();

    if config::current().dedupe_errors {
        let seen = REPORTED.with(|reported| {
            let mut reported = reported.borrow_mut();
            if reported.iter().any(|e| Rc::ptr_eq(e, &error)) {
                true
            } else {
                reported.push(error.clone());
                false
            }
        });
        if seen {
            tracing::trace!(origin = %info.origin, "duplicate error report suppressed");
            return;
        }
    }

    let handler = app_handler.or_else(|| GLOBAL_HANDLER.with(|slot| slot.borrow().clone()));
    match handler {
        Some(handler) => handler(&error, &info),
        None => {
            tracing::error!(
                origin = %info.origin,
                component = info.component.as_deref().unwrap_or("<none>"),
                "unhandled error: {error}"
            );
            UNHANDLED.with(|queue| queue.borrow_mut().push(error));
        }
    }
}

/// Close the deduplication window. Called at the end of every flush and
/// every root render.
pub(crate) fn close_window() {
    REPORTED.with(|reported| reported.borrow_mut().clear());
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
