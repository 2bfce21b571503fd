#![forbid(unsafe_code)]

//! End-to-end checks for passive effects.
//!
//! # Checks
//!
//! 1. Effects run after the commit, from a scheduled task, never during it.
//! 2. Unchanged dependencies skip the effect; changed ones run the previous
//!    cleanup first.
//! 3. Effects without dependencies re-run after every commit.
//! 4. Unmounting runs the cleanup.
//! 5. All cleanups of a flush run before any of its creates.
//! 6. A sync render first flushes effects owed by the previous commit.
//! 7. State set from an effect schedules another render.

use std::cell::RefCell;
use std::rc::Rc;

use arbor_harness::TestRoot;
use arbor_reconciler::{Cleanup, Component, Node, PropValue, host};

type Log = Rc<RefCell<Vec<String>>>;

/// Renders its `dep` prop and logs effect lifecycle as `create {name}{dep}`
/// and `destroy {name}{dep}`.
fn logger(log: &Log, tracked: bool) -> Component {
    let log = Rc::clone(log);
    Component::new("Logger", move |props, hooks| {
        let dep = props.attr("dep").and_then(PropValue::as_int).unwrap_or(0);
        let name = props
            .attr("name")
            .and_then(PropValue::as_str)
            .unwrap_or_default()
            .to_owned();
        let log = Rc::clone(&log);
        let label = format!("{name}{dep}");
        let deps = tracked.then(|| vec![PropValue::Int(dep)]);
        hooks.use_effect(
            move || {
                log.borrow_mut().push(format!("create {label}"));
                Some(Box::new(move || log.borrow_mut().push(format!("destroy {label}"))) as Cleanup)
            },
            deps,
        )?;
        Ok(Node::text(dep.to_string()))
    })
}

fn with_dep(component: &Component, dep: i64) -> Node {
    component.element().attr("dep", dep).build()
}

fn drain(log: &Log) -> Vec<String> {
    std::mem::take(&mut *log.borrow_mut())
}

// ── Timing ───────────────────────────────────────────────────────────────

#[test]
fn effects_run_after_commit() {
    let log = Log::default();
    let component = logger(&log, true);
    let root = TestRoot::new();

    root.update(with_dep(&component, 1)).expect("update");
    root.flush_microtasks().expect("commit");
    assert_eq!(root.markup(), "1");
    assert!(log.borrow().is_empty());
    assert_eq!(root.scheduler().pending(), 1);

    root.flush().expect("passive");
    assert_eq!(drain(&log), vec!["create 1"]);
}

#[test]
fn explicit_flush_runs_owed_effects() {
    let log = Log::default();
    let component = logger(&log, true);
    let root = TestRoot::new();

    root.update(with_dep(&component, 1)).expect("update");
    root.flush_microtasks().expect("commit");
    assert!(root.reconciler().flush_passive_effects());
    assert_eq!(drain(&log), vec!["create 1"]);
    assert!(!root.reconciler().flush_passive_effects());
}

// ── Dependencies ─────────────────────────────────────────────────────────

#[test]
fn unchanged_deps_skip_and_changed_deps_rerun() {
    let log = Log::default();
    let component = logger(&log, true);
    let root = TestRoot::new();
    root.render(with_dep(&component, 1)).expect("mount");
    drain(&log);

    root.render(with_dep(&component, 1)).expect("same deps");
    assert!(drain(&log).is_empty());

    root.render(with_dep(&component, 2)).expect("new deps");
    assert_eq!(drain(&log), vec!["destroy 1", "create 2"]);
}

#[test]
fn missing_deps_rerun_every_commit() {
    let log = Log::default();
    let component = logger(&log, false);
    let root = TestRoot::new();
    root.render(with_dep(&component, 1)).expect("mount");
    root.render(with_dep(&component, 1)).expect("again");
    assert_eq!(drain(&log), vec!["create 1", "destroy 1", "create 1"]);
}

#[test]
fn unmount_runs_cleanup() {
    let log = Log::default();
    let component = logger(&log, true);
    let root = TestRoot::new();
    root.render(host("div").child(with_dep(&component, 4)).build())
        .expect("mount");
    drain(&log);

    root.unmount().expect("unmount");
    assert_eq!(drain(&log), vec!["destroy 4"]);
}

#[test]
fn cleanups_precede_creates() {
    let log = Log::default();
    let component = logger(&log, false);
    let pair = |dep: i64| {
        Node::list([
            component.element().key("a").attr("name", "A").attr("dep", dep).build(),
            component.element().key("b").attr("name", "B").attr("dep", dep).build(),
        ])
    };
    let root = TestRoot::new();
    root.render(pair(1)).expect("mount");
    assert_eq!(drain(&log), vec!["create A1", "create B1"]);

    root.render(pair(2)).expect("update");
    assert_eq!(
        drain(&log),
        vec!["destroy A1", "destroy B1", "create A2", "create B2"]
    );
}

#[test]
fn removed_sibling_cleanup_runs_before_survivor_effects() {
    let log = Log::default();
    let component = logger(&log, false);
    let root = TestRoot::new();
    root.render(Node::list([
        component.element().key("a").attr("name", "A").attr("dep", 1_i64).build(),
        component.element().key("b").attr("name", "B").attr("dep", 1_i64).build(),
    ]))
    .expect("mount");
    drain(&log);

    root.render(Node::list([component
        .element()
        .key("a")
        .attr("name", "A")
        .attr("dep", 1_i64)
        .build()]))
    .expect("remove b");
    assert_eq!(drain(&log), vec!["destroy B1", "destroy A1", "create A1"]);
}

// ── Ordering against renders ─────────────────────────────────────────────

#[test]
fn sync_render_flushes_owed_effects_first() {
    let log = Log::default();
    let component = logger(&log, true);
    let root = TestRoot::new();

    root.update(with_dep(&component, 1)).expect("first");
    root.flush_microtasks().expect("first commit");
    assert!(log.borrow().is_empty());

    root.update(with_dep(&component, 2)).expect("second");
    root.flush_microtasks().expect("second commit");
    assert_eq!(*log.borrow(), vec!["create 1"]);
    assert_eq!(root.markup(), "2");

    root.flush().expect("passive");
    assert_eq!(drain(&log), vec!["create 1", "destroy 1", "create 2"]);
}

#[test]
fn state_set_in_effect_rerenders() {
    let component = Component::new("Loader", |_, hooks| {
        let (loaded, set_loaded) = hooks.use_state(|| false)?;
        hooks.use_effect(
            move || {
                set_loaded.set(true);
                None
            },
            Some(Vec::new()),
        )?;
        Ok(Node::text(if loaded { "ready" } else { "loading" }))
    });
    let root = TestRoot::new();
    root.update(component.node()).expect("update");
    root.flush_microtasks().expect("commit");
    assert_eq!(root.markup(), "loading");

    root.flush().expect("settle");
    assert_eq!(root.markup(), "ready");
}
