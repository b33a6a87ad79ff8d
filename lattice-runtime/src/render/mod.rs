//! Rendering
//!
//! The half of the runtime that turns node descriptions into host
//! mutations.
//!
//! # Layers
//!
//! - [`VNode`]: immutable descriptions of elements, text, fragments and
//!   components.
//! - [`HostOps`]: the capability record a host tree implements.
//!   [`MemoryHost`] is the in-memory reference implementation.
//! - [`Renderer`]: the mount/patch engine, with the keyed children diff.
//! - [`Component`]: setup functions, render effects and lifecycle hooks.
//! - [`KeepAlive`]: caches switched-out component instances.

pub(crate) mod component;
mod host;
mod keep_alive;
mod keyed;
mod memory;
mod renderer;
mod vnode;

pub use component::{
    inject, on_activated, on_before_mount, on_before_unmount, on_before_update, on_deactivated, on_mounted,
    on_unmounted, on_updated, provide, Component, RenderFn, SetupContext,
};
pub use host::{HostNode, HostOps};
pub use keep_alive::{KeepAlive, KeepAliveCache, KeepAliveOptions};
pub use memory::{HostOp, MemoryHost};
pub use renderer::Renderer;
pub use vnode::{NodeKey, Props, Slots, VNode, VNodeKind};
