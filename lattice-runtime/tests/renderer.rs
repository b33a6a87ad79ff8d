//! Integration Tests for Rendering
//!
//! These tests drive the patch engine through the in-memory host and check
//! both the resulting tree and the host operations it took to get there.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use lattice_runtime::error::{self, ErrorInfo, ErrorOrigin, ErrorRef};
use lattice_runtime::reactive::{Reactive, Signal};
use lattice_runtime::render::{
    on_mounted, Component, HostNode, HostOp, KeepAlive, KeepAliveOptions, MemoryHost, Props, Renderer,
    VNode,
};
use lattice_runtime::{scheduler, App, BoxError, RuntimeError};

fn setup() -> (Rc<MemoryHost>, Renderer, HostNode) {
    let host = Rc::new(MemoryHost::new());
    let renderer = Renderer::new(host.clone());
    let root = host.create_root();
    (host, renderer, root)
}

fn keyed_items(keys: &[&str]) -> VNode {
    VNode::element(
        "ul",
        Props::new(),
        keys.iter()
            .map(|key| {
                VNode::element("li", Props::new().with("id", *key), vec![VNode::text(*key)]).with_key(*key)
            })
            .collect(),
    )
}

/// Test that patching a tree against an identical description issues no
/// host operations.
#[test]
fn identical_patch_is_silent() {
    let (host, renderer, root) = setup();
    let tree = || {
        VNode::element(
            "div",
            Props::new().with("class", "app"),
            vec![
                VNode::text("title"),
                VNode::fragment(vec![VNode::text("a"), VNode::text("b")]),
                keyed_items(&["x", "y"]),
            ],
        )
    };

    renderer.render(Some(tree()), root);
    host.clear_ops();
    renderer.render(Some(tree()), root);
    assert_eq!(host.ops(), Vec::<HostOp>::new());
}

/// Test that rotating a keyed list reuses every node and moves exactly one.
#[test]
fn keyed_rotation_is_a_single_move() {
    let (host, renderer, root) = setup();
    renderer.render(Some(keyed_items(&["A", "B", "C"])), root);
    host.clear_ops();

    renderer.render(Some(keyed_items(&["C", "A", "B"])), root);
    assert_eq!(
        host.inner_html(root),
        "<ul><li id=\"C\">C</li><li id=\"A\">A</li><li id=\"B\">B</li></ul>"
    );
    assert_eq!(host.count_ops(HostOp::is_create), 0);
    assert_eq!(host.count_ops(HostOp::is_remove), 0);
    assert_eq!(host.count_ops(HostOp::is_move), 1);
}

/// Test that an unkeyed list shrinks from the tail and grows at the end.
#[test]
fn unkeyed_lists_shrink_and_grow() {
    let (host, renderer, root) = setup();
    let list = |n: usize| VNode::element("p", Props::new(), (0..n).map(|i| VNode::text(i.to_string())).collect());

    renderer.render(Some(list(3)), root);
    host.clear_ops();
    renderer.render(Some(list(2)), root);
    assert_eq!(host.inner_html(root), "<p>01</p>");
    assert_eq!(host.count_ops(HostOp::is_remove), 1);

    host.clear_ops();
    renderer.render(Some(list(4)), root);
    assert_eq!(host.inner_html(root), "<p>0123</p>");
    assert_eq!(host.count_ops(HostOp::is_create), 2);
    assert_eq!(host.count_ops(HostOp::is_remove), 0);
}

/// Test that a synchronous burst of writes produces one re-render with the
/// final state once the scheduler flushes.
#[test]
fn burst_of_writes_renders_once() {
    let (host, renderer, root) = setup();
    let state = Reactive::from_pairs([("count", 0)]);
    let renders = Rc::new(Cell::new(0));

    let counter = {
        let state = state.clone();
        let renders = renders.clone();
        Component::new("Counter", move |_| {
            let state = state.clone();
            let renders = renders.clone();
            Ok(move || {
                renders.set(renders.get() + 1);
                Ok(VNode::element(
                    "span",
                    Props::new(),
                    vec![VNode::text(state.get("count").display_text())],
                ))
            })
        })
    };
    renderer.render(Some(VNode::component(&counter, Props::new())), root);

    for i in 1..=10 {
        state.set("count", i);
    }
    assert!(scheduler::has_pending_jobs());
    assert_eq!(host.inner_html(root), "<span>0</span>");

    scheduler::flush_jobs();
    assert_eq!(renders.get(), 2);
    assert_eq!(host.inner_html(root), "<span>10</span>");
}

/// Test that a parent re-render with new props updates the child in the
/// same flush, without a second child job.
#[test]
fn parent_and_child_update_in_one_flush() {
    let (host, renderer, root) = setup();
    let label = Signal::new("one".to_string());
    let child_renders = Rc::new(Cell::new(0));

    let child = {
        let child_renders = child_renders.clone();
        Component::new("Child", move |ctx| {
            let ctx = ctx.clone();
            let child_renders = child_renders.clone();
            Ok(move || {
                child_renders.set(child_renders.get() + 1);
                Ok(VNode::text(ctx.prop("label").display_text()))
            })
        })
    };
    let parent = {
        let label = label.clone();
        Component::new("Parent", move |_| {
            let label = label.clone();
            let child = child.clone();
            Ok(move || Ok(VNode::component(&child, Props::new().with("label", label.get()))))
        })
    };

    renderer.render(Some(VNode::component(&parent, Props::new())), root);
    assert_eq!(host.inner_html(root), "one");

    label.set("two".to_string());
    scheduler::flush_jobs();
    assert_eq!(host.inner_html(root), "two");
    assert_eq!(child_renders.get(), 2);
}

/// Test that a component failing in setup is replaced by a placeholder while
/// its siblings still mount, and that the error reaches the app handler.
#[test]
fn failing_component_does_not_take_siblings_down() {
    let host = Rc::new(MemoryHost::new());
    let container = host.create_root();

    let broken = Component::new("Broken", |_| -> Result<fn() -> Result<VNode, BoxError>, BoxError> {
        Err("no setup for you".into())
    });
    let fine = Component::new("Fine", |_| Ok(|| Ok(VNode::text("fine"))));
    let root = Component::new("Root", move |_| {
        let broken = broken.clone();
        let fine = fine.clone();
        Ok(move || {
            Ok(VNode::element(
                "main",
                Props::new(),
                vec![VNode::component(&broken, Props::new()), VNode::component(&fine, Props::new())],
            ))
        })
    });

    let seen: Rc<RefCell<Vec<(ErrorOrigin, Option<String>)>>> = Rc::default();
    let sink = seen.clone();
    let app = App::new(host.clone(), root, Props::new());
    app.on_error(move |_: &ErrorRef, info: &ErrorInfo| {
        sink.borrow_mut()
            .push((info.origin, info.component.as_deref().map(str::to_string)));
    });
    app.mount(container).unwrap();

    assert_eq!(host.inner_html(container), "<main>fine</main>");
    assert_eq!(*seen.borrow(), vec![(ErrorOrigin::SetupFunction, Some("Broken".to_string()))]);
}

/// Test that unhandled errors surface through `next_tick`.
#[tokio::test]
async fn unhandled_errors_surface_on_next_tick() {
    let (_host, renderer, root) = setup();
    let fail = Signal::new(false);

    let flaky = {
        let fail = fail.clone();
        Component::new("Flaky", move |_| {
            let fail = fail.clone();
            Ok(move || {
                if fail.get() {
                    return Err(BoxError::from("render blew up"));
                }
                Ok(VNode::text("ok"))
            })
        })
    };
    renderer.render(Some(VNode::component(&flaky, Props::new())), root);
    error::take_unhandled_errors();

    fail.set(true);
    let err = scheduler::next_tick().await.unwrap_err();
    assert_eq!(err.to_string(), "render blew up");
    assert!(scheduler::next_tick().await.is_ok());
}

/// Test that a keep-alive boundary with `max = 2` evicts the least recently
/// used instance.
#[test]
fn keep_alive_lru_eviction() {
    let (_host, renderer, root) = setup();
    let keep_alive = KeepAlive::new(KeepAliveOptions::default().max(2));
    let mounts: Rc<RefCell<Vec<String>>> = Rc::default();

    let view = |n: i64| {
        let mounts = mounts.clone();
        Component::new("View", move |_| {
            let mounts = mounts.clone();
            on_mounted(move || {
                mounts.borrow_mut().push(format!("mounted {n}"));
                Ok(())
            })?;
            Ok(move || Ok(VNode::text(n.to_string())))
        })
    };
    let views = [view(1), view(2), view(3)];
    let show = |index: usize, key: i64| {
        let child = VNode::component(&views[index], Props::new()).with_key(key);
        let tree = VNode::component_with_children(&keep_alive, Props::new(), vec![child]);
        renderer.render(Some(tree), root);
    };

    show(0, 1);
    show(1, 2);
    show(0, 1);
    assert_eq!(*mounts.borrow(), ["mounted 1", "mounted 2"]);

    // Cache: [2, 1]. Showing 3 evicts 2.
    show(2, 3);
    show(1, 2);
    assert_eq!(*mounts.borrow(), ["mounted 1", "mounted 2", "mounted 3", "mounted 2"]);

    // Bringing 2 back evicted 1, so 1 mounts from scratch.
    show(0, 1);
    assert_eq!(mounts.borrow().last().map(String::as_str), Some("mounted 1"));
}

/// Test the application handle's misuse errors.
#[test]
fn app_misuse_is_reported_synchronously() {
    let host = Rc::new(MemoryHost::new());
    let container = host.create_root();
    let app = App::new(host, Component::new("Empty", |_| Ok(|| Ok(VNode::fragment(vec![])))), Props::new());

    assert!(matches!(app.unmount(), Err(RuntimeError::NotMounted)));
    app.mount(container).unwrap();
    assert!(matches!(app.mount(container), Err(RuntimeError::AlreadyMounted)));
    assert!(matches!(
        lattice_runtime::render::provide("k", 1),
        Err(RuntimeError::OutsideSetup { api: "provide" })
    ));
}

/// Test that tearing a tree down releases every host node it created.
#[test]
fn unmount_releases_host_nodes() {
    let (host, renderer, root) = setup();
    renderer.render(Some(keyed_items(&["a", "b", "c"])), root);
    renderer.render(Some(keyed_items(&["c", "d"])), root);
    assert_eq!(host.node_count(), 1 + 1 + 2 * 2);

    renderer.render(None, root);
    assert_eq!(host.node_count(), 1);
}
