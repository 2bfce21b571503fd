#![forbid(unsafe_code)]

//! End-to-end checks for suspension, boundaries, and retries.
//!
//! # Checks
//!
//! 1. On mount, a boundary commits its fallback and swaps in the primary
//!    content once the resource resolves.
//! 2. Without a boundary nothing commits; the lane parks until a ping.
//! 3. Content that was visible is hidden, not removed, while an update
//!    suspends, and revealed again on resolution.
//! 4. The nearest boundary captures; content outside it stays visible.
//! 5. A rejected resource surfaces as a render failure.
//! 6. One subscription is attached per resource and boundary.
//! 7. A fulfilled resource renders without suspending.
//! 8. A boundary that mounts into its fallback keeps the primary fibers
//!    under its hidden offscreen.
//! 9. Revealing an outer boundary leaves content hidden by an inner
//!    boundary hidden.

use std::cell::RefCell;
use std::rc::Rc;

use arbor_core::{Lanes, Resource};
use arbor_harness::{HostOp, TestRoot};
use arbor_reconciler::{Component, Dispatch, Node, ReconcileError, WorkTag, host, suspense};

fn reader(resource: &Resource<String>) -> Component {
    let resource = resource.clone();
    Component::new("Reader", move |_, hooks| {
        Ok(Node::text(hooks.use_resource(&resource)?))
    })
}

// ── Mount ────────────────────────────────────────────────────────────────

#[test]
fn boundary_shows_fallback_then_content() {
    let resource = Resource::new("profile");
    let root = TestRoot::new();
    root.render(suspense(Node::text("loading"), reader(&resource).node()))
        .expect("mount");
    assert_eq!(root.visible_markup(), "loading");
    assert_eq!(resource.listener_count(), 1);
    root.take_ops();

    resource.resolve("ada".to_string());
    root.flush().expect("retry");
    assert_eq!(root.markup(), "ada");
    let mutations = root.take_mutations();
    assert!(mutations.iter().any(|op| matches!(op, HostOp::Remove { .. })));
    assert_eq!(root.lanes().expect("lanes").pending, Lanes::NONE);
}

#[test]
fn mount_fallback_keeps_primary_fibers() {
    let resource = Resource::new("profile");
    let root = TestRoot::new();
    root.render(suspense(Node::text("loading"), reader(&resource).node()))
        .expect("mount");
    assert_eq!(root.visible_markup(), "loading");

    let snapshot = root.snapshot().expect("snapshot");
    let offscreen = snapshot
        .iter()
        .find(|node| node.tag == WorkTag::OffscreenComponent)
        .expect("offscreen");
    assert!(offscreen.hidden);
    let names: Vec<&str> = offscreen.children.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, ["Reader"]);

    resource.resolve("ada".to_string());
    root.flush().expect("retry");
    assert_eq!(root.markup(), "ada");
    let snapshot = root.snapshot().expect("snapshot");
    let offscreen = snapshot
        .iter()
        .find(|node| node.tag == WorkTag::OffscreenComponent)
        .expect("offscreen");
    assert!(!offscreen.hidden);
    assert_eq!(offscreen.children.len(), 1);
    assert_eq!(offscreen.children[0].name, "Reader");
}

#[test]
fn missing_boundary_parks_lane() {
    let resource = Resource::new("profile");
    let root = TestRoot::new();
    root.render(host("main").child(reader(&resource).node()).build())
        .expect("render");
    assert_eq!(root.markup(), "");
    assert!(root.take_ops().is_empty());
    let lanes = root.lanes().expect("lanes");
    assert_eq!(lanes.suspended, Lanes::SYNC);

    resource.resolve("ok".to_string());
    root.flush().expect("ping");
    assert_eq!(root.markup(), "<main>ok</main>");
    assert_eq!(root.lanes().expect("lanes").suspended, Lanes::NONE);
}

#[test]
fn fulfilled_resource_never_suspends() {
    let resource = Resource::ready("cached", "hit".to_string());
    let root = TestRoot::new();
    root.render(suspense(Node::text("loading"), reader(&resource).node()))
        .expect("render");
    assert_eq!(root.markup(), "hit");
    assert_eq!(resource.listener_count(), 0);
}

// ── Updates ──────────────────────────────────────────────────────────────

#[test]
fn suspended_update_hides_existing_content() {
    let first = Resource::ready("first", "one".to_string());
    let second: Resource<String> = Resource::new("second");
    let setter: Rc<RefCell<Option<Dispatch<u8>>>> = Rc::new(RefCell::new(None));
    let switcher = {
        let (first, second) = (first.clone(), second.clone());
        let setter = Rc::clone(&setter);
        Component::new("Switcher", move |_, hooks| {
            let (which, set) = hooks.use_state(|| 1_u8)?;
            *setter.borrow_mut() = Some(set);
            let resource = if which == 1 { &first } else { &second };
            Ok(Node::text(hooks.use_resource(resource)?))
        })
    };
    let root = TestRoot::new();
    root.render(suspense(Node::text("loading"), switcher.node()))
        .expect("mount");
    assert_eq!(root.markup(), "one");
    let original = root.host().children(root.container());

    let set = setter.borrow().clone().expect("rendered");
    root.act(|| set.set(2)).expect("suspend");
    assert_eq!(root.visible_markup(), "loading");
    assert_eq!(root.markup(), "<!--hidden:one-->loading");
    assert!(root.host().is_hidden(original[0]));

    second.resolve("two".to_string());
    root.flush().expect("reveal");
    assert_eq!(root.markup(), "two");
    assert_eq!(root.host().children(root.container()), original);
    assert!(!root.host().is_hidden(original[0]));
}

// ── Boundaries ───────────────────────────────────────────────────────────

#[test]
fn nearest_boundary_captures() {
    let resource = Resource::new("inner");
    let root = TestRoot::new();
    let tree = || {
        suspense(
            Node::text("outer fallback"),
            Node::list([
                host("p").child("static").build(),
                suspense(Node::text("inner fallback"), reader(&resource).node()),
            ]),
        )
    };
    root.render(tree()).expect("mount");
    assert_eq!(root.visible_markup(), "<p>static</p>inner fallback");

    resource.resolve("done".to_string());
    root.flush().expect("retry");
    assert_eq!(root.markup(), "<p>static</p>done");
}

/// Reads `before` until switched, then `after`.
fn switchable(
    name: &'static str,
    before: &Resource<String>,
    after: &Resource<String>,
) -> (Component, Rc<RefCell<Option<Dispatch<bool>>>>) {
    let setter: Rc<RefCell<Option<Dispatch<bool>>>> = Rc::new(RefCell::new(None));
    let component = {
        let (before, after) = (before.clone(), after.clone());
        let setter = Rc::clone(&setter);
        Component::new(name, move |_, hooks| {
            let (switched, set) = hooks.use_state(|| false)?;
            *setter.borrow_mut() = Some(set);
            let resource = if switched { &after } else { &before };
            Ok(Node::text(hooks.use_resource(resource)?))
        })
    };
    (component, setter)
}

#[test]
fn outer_reveal_keeps_inner_boundary_hidden() {
    let a2: Resource<String> = Resource::new("a2");
    let b2: Resource<String> = Resource::new("b2");
    let (a, set_a) = switchable("A", &Resource::ready("a1", "a1".to_string()), &a2);
    let (b, set_b) = switchable("B", &Resource::ready("b1", "b1".to_string()), &b2);
    let root = TestRoot::new();
    root.render(suspense(
        Node::text("O"),
        Node::list([suspense(Node::text("I"), a.node()), b.node()]),
    ))
    .expect("mount");
    assert_eq!(root.visible_markup(), "a1b1");

    let set_a = set_a.borrow().clone().expect("rendered");
    root.act(|| set_a.set(true)).expect("inner suspends");
    assert_eq!(root.visible_markup(), "Ib1");

    let set_b = set_b.borrow().clone().expect("rendered");
    root.act(|| set_b.set(true)).expect("outer suspends");
    assert_eq!(root.visible_markup(), "O");

    b2.resolve("b2".to_string());
    root.flush().expect("outer reveals");
    assert_eq!(root.visible_markup(), "Ib2");

    a2.resolve("a2".to_string());
    root.flush().expect("inner reveals");
    assert_eq!(root.visible_markup(), "a2b2");
    assert_eq!(root.markup(), "a2b2");
}

#[test]
fn rejected_resource_fails_render() {
    let resource: Resource<String> = Resource::new("broken");
    resource.reject("not found");
    let root = TestRoot::new();
    let err = root
        .render(suspense(Node::text("loading"), reader(&resource).node()))
        .expect_err("failure");
    assert!(
        matches!(&err, ReconcileError::RenderFailed { component, message }
            if &**component == "Reader" && &**message == "not found"),
        "{err:?}"
    );
    assert_eq!(root.markup(), "");
}

#[test]
fn retry_cap_is_configurable() {
    let resource: Resource<String> = Resource::new("slow");
    let root = TestRoot::with_config(arbor_core::ReconcilerConfig::default().with_retry_cap(0));
    let err = root
        .render(reader(&resource).node())
        .expect_err("cap");
    assert!(matches!(err, ReconcileError::RetryCapExceeded { attempts: 1, .. }), "{err:?}");
}
