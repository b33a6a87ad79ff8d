//! Lattice Runtime
//!
//! This crate provides the reactive rendering runtime for the Lattice UI
//! framework. It implements:
//!
//! - Reactive primitives (tracked targets, signals, computeds, effects,
//!   scopes, watchers)
//! - A batching scheduler with pre/main/post queues
//! - Node descriptions and a mount/patch engine with keyed reconciliation
//! - Components with lifecycle hooks, provide/inject and keep-alive caching
//!
//! The runtime is single-threaded: every registry lives in thread-local
//! storage and handles are `Rc`-based.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Dependency tracking and the reactive primitives
//! - `scheduler`: Job queues and flushing
//! - `render`: Node descriptions, host abstraction, patch engine, components
//! - `app`: Application handle and plugins
//! - `error`: Error type and the error channel
//! - `config`: Runtime configuration
//!
//! # Example
//!
//! ```rust,ignore
//! use std::rc::Rc;
//! use lattice_runtime::reactive::Signal;
//! use lattice_runtime::render::{Component, MemoryHost, Props, VNode};
//! use lattice_runtime::{scheduler, App};
//!
//! let count = Signal::new(0);
//! let counter = {
//!     let count = count.clone();
//!     Component::new("Counter", move |_| {
//!         let count = count.clone();
//!         Ok(move || Ok(VNode::text(format!("Count: {}", count.get()))))
//!     })
//! };
//!
//! let host = Rc::new(MemoryHost::new());
//! let container = host.create_root();
//! App::new(host.clone(), counter, Props::new()).mount(container)?;
//!
//! count.set(5);
//! scheduler::flush_jobs();
//! assert_eq!(host.inner_html(container), "Count: 5");
//! ```

pub mod app;
pub mod config;
pub mod error;
pub mod reactive;
pub mod render;
pub mod scheduler;

pub use app::{App, Plugin};
pub use config::RuntimeConfig;
pub use error::{BoxError, ErrorInfo, ErrorOrigin, ErrorRef, LifecycleHook, RuntimeError};
