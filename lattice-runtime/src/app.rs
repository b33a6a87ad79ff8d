//! Application Handle
//!
//! An [`App`] ties a root component to a host: it owns the renderer, the
//! application-level provides and error handler, and the set of installed
//! plugins.
//!
//! # Example
//!
//! ```rust,ignore
//! let host = Rc::new(MemoryHost::new());
//! let container = host.create_root();
//! let app = App::new(host.clone(), root_component, Props::new());
//! app.provide("locale", "en".to_string());
//! app.mount(container)?;
//! ```

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::error::{BoxError, ErrorContext, ErrorInfo, ErrorOrigin, ErrorRef, HandlerSlot, RuntimeError};
use crate::render::{Component, HostNode, HostOps, Props, Renderer, VNode};

/// State shared with every component instance of an application.
#[derive(Default)]
pub(crate) struct AppContext {
    provides: RefCell<HashMap<Rc<str>, Rc<dyn Any>>>,
    pub(crate) error_handler: HandlerSlot,
}

impl AppContext {
    pub(crate) fn provided<T: Clone + 'static>(&self, key: &str) -> Option<T> {
        self.provides
            .borrow()
            .get(key)
            .and_then(|value| value.downcast_ref::<T>().cloned())
    }
}

/// An extension installed once per application.
pub trait Plugin {
    /// Installation is deduplicated on this name.
    fn name(&self) -> &str;

    fn install(&self, app: &App) -> Result<(), BoxError>;
}

type UnmountCallback = Box<dyn FnOnce() -> Result<(), BoxError>>;

/// A root component bound to a host.
pub struct App {
    renderer: Renderer,
    root: Component,
    props: Props,
    context: Rc<AppContext>,
    container: Cell<Option<HostNode>>,
    installed: RefCell<HashSet<String>>,
    unmount_callbacks: RefCell<Vec<UnmountCallback>>,
}

impl App {
    pub fn new(host: Rc<dyn HostOps>, root: Component, props: Props) -> Self {
        Self {
            renderer: Renderer::new(host),
            root,
            props,
            context: Rc::new(AppContext::default()),
            container: Cell::new(None),
            installed: RefCell::new(HashSet::new()),
            unmount_callbacks: RefCell::new(Vec::new()),
        }
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    pub fn is_mounted(&self) -> bool {
        self.container.get().is_some()
    }

    /// Mount the root component into `container`.
    pub fn mount(&self, container: HostNode) -> Result<(), RuntimeError> {
        if self.is_mounted() {
            tracing::warn!(component = self.root.name(), "app is already mounted");
            return Err(RuntimeError::AlreadyMounted);
        }
        tracing::debug!(component = self.root.name(), ?container, "mounting app");

        self.container.set(Some(container));
        let vnode = VNode::component(&self.root, self.props.clone());
        self.renderer
            .render_with(Some(vnode), container, Some(self.context.clone()));
        Ok(())
    }

    /// Run the unmount callbacks, then tear the whole tree down.
    pub fn unmount(&self) -> Result<(), RuntimeError> {
        let Some(container) = self.container.take() else {
            tracing::warn!(component = self.root.name(), "cannot unmount an app that is not mounted");
            return Err(RuntimeError::NotMounted);
        };
        tracing::debug!(component = self.root.name(), ?container, "unmounting app");

        let errors = ErrorContext {
            component: None,
            app_handler: Some(self.context.error_handler.clone()),
        };
        let callbacks = std::mem::take(&mut *self.unmount_callbacks.borrow_mut());
        for callback in callbacks {
            if let Err(err) = callback() {
                errors.report(RuntimeError::callback(err), ErrorOrigin::AppUnmountCleanup);
            }
        }

        self.renderer.render_with(None, container, Some(self.context.clone()));
        Ok(())
    }

    /// Install `plugin`. A plugin whose name is already installed is
    /// skipped; an install error is returned as is.
    pub fn use_plugin(&self, plugin: impl Plugin) -> Result<&Self, RuntimeError> {
        if self.installed.borrow().contains(plugin.name()) {
            tracing::warn!(plugin = plugin.name(), "plugin has already been applied to the app");
            return Ok(self);
        }
        plugin.install(self).map_err(RuntimeError::Callback)?;
        self.installed.borrow_mut().insert(plugin.name().to_string());
        Ok(self)
    }

    /// Provide `value` to every component of the app under `key`.
    pub fn provide<T: 'static>(&self, key: &str, value: T) -> &Self {
        self.context
            .provides
            .borrow_mut()
            .insert(Rc::from(key), Rc::new(value));
        self
    }

    /// Install the app-level error handler. It takes precedence over the
    /// global one for errors raised inside this app.
    pub fn on_error(&self, handler: impl Fn(&ErrorRef, &ErrorInfo) + 'static) -> &Self {
        *self.context.error_handler.borrow_mut() = Some(Rc::new(handler));
        self
    }

    /// Register a callback run by [`App::unmount`] before the tree is torn
    /// down.
    pub fn on_unmount(&self, f: impl FnOnce() -> Result<(), BoxError> + 'static) -> &Self {
        self.unmount_callbacks.borrow_mut().push(Box::new(f));
        self
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{inject, on_mounted, MemoryHost};

    fn greeting() -> Component {
        Component::new("Greeting", |_| {
            let locale: Option<String> = inject("locale")?;
            Ok(move || Ok(VNode::text(locale.clone().unwrap_or_else(|| "??".into()))))
        })
    }

    #[test]
    fn mount_and_unmount() {
        let host = Rc::new(MemoryHost::new());
        let container = host.create_root();
        let app = App::new(host.clone(), greeting(), Props::new());
        app.provide("locale", "en".to_string());

        app.mount(container).unwrap();
        assert_eq!(host.inner_html(container), "en");
        assert!(matches!(app.mount(container), Err(RuntimeError::AlreadyMounted)));

        app.unmount().unwrap();
        assert_eq!(host.inner_html(container), "");
        assert!(matches!(app.unmount(), Err(RuntimeError::NotMounted)));
    }

    struct Counting {
        installs: Rc<Cell<usize>>,
        fail: bool,
    }

    impl Plugin for Counting {
        fn name(&self) -> &str {
            if self.fail {
                "broken"
            } else {
                "counting"
            }
        }

        fn install(&self, app: &App) -> Result<(), BoxError> {
            if self.fail {
                return Err("install failed".into());
            }
            self.installs.set(self.installs.get() + 1);
            app.provide("installed", true);
            Ok(())
        }
    }

    #[test]
    fn plugins_install_once() {
        let host = Rc::new(MemoryHost::new());
        let app = App::new(host, greeting(), Props::new());
        let installs = Rc::new(Cell::new(0));

        app.use_plugin(Counting { installs: installs.clone(), fail: false })
            .unwrap()
            .use_plugin(Counting { installs: installs.clone(), fail: false })
            .unwrap();
        assert_eq!(installs.get(), 1);
        assert_eq!(app.context.provided::<bool>("installed"), Some(true));

        let err = app
            .use_plugin(Counting { installs, fail: true })
            .err()
            .map(|e| e.to_string());
        assert_eq!(err.as_deref(), Some("install failed"));
    }

    #[test]
    fn app_handler_catches_component_errors() {
        let host = Rc::new(MemoryHost::new());
        let container = host.create_root();
        let root = Component::new("Noisy", |_| {
            on_mounted(|| Err("mounted failed".into()))?;
            Ok(|| Ok(VNode::text("noisy")))
        });

        let seen: Rc<RefCell<Vec<(String, ErrorOrigin, Option<String>)>>> = Rc::default();
        let sink = seen.clone();
        let app = App::new(host.clone(), root, Props::new());
        app.on_error(move |err, info| {
            sink.borrow_mut().push((
                err.to_string(),
                info.origin,
                info.component.as_deref().map(str::to_string),
            ));
        });
        app.on_unmount(|| Err("cleanup failed".into()));

        app.mount(container).unwrap();
        app.unmount().unwrap();

        assert_eq!(
            *seen.borrow(),
            [
                (
                    "mounted failed".to_string(),
                    ErrorOrigin::LifecycleHook(crate::error::LifecycleHook::Mounted),
                    Some("Noisy".to_string())
                ),
                ("cleanup failed".to_string(), ErrorOrigin::AppUnmountCleanup, None),
            ]
        );
        assert!(crate::error::take_unhandled_errors().is_empty());
    }
}
