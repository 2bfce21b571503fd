#![forbid(unsafe_code)]

//! Property-based invariant tests for child reconciliation and update lanes.
//!
//! Drives a live `TestRoot` through arbitrary keyed-list histories and
//! checks:
//!
//! 1. Host child order always equals the rendered key order
//! 2. Re-rendering an identical list issues no host mutations
//! 3. Instances of keys that survive a render keep their host handle
//! 4. Removals detach exactly the dropped keys
//! 5. Moves plus insertions never exceed the new list length
//! 6. Fiber storage stays within two generations of the committed tree
//! 7. Urgent renders apply only urgent updates; settling applies every
//!    update in enqueue order

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;

use arbor_core::Priority;
use arbor_harness::{HostOp, TestRoot};
use arbor_reconciler::{Component, Dispatch, HostHandle, Node, host};
use proptest::prelude::*;

// ── Helpers ──────────────────────────────────────────────────────────

fn list(keys: &[u32]) -> Node {
    host("ul")
        .children(Node::list(
            keys.iter().map(|k| host("li").key(*k).child(k.to_string()).build()),
        ))
        .build()
}

fn list_markup(keys: &[u32]) -> String {
    let items: String = keys.iter().map(|k| format!("<li>{k}</li>")).collect();
    format!("<ul>{items}</ul>")
}

fn items(root: &TestRoot) -> Vec<HostHandle> {
    let ul = root.host().children(root.container())[0];
    root.host().children(ul)
}

/// Distinct keys in arbitrary order.
fn arb_keys() -> impl Strategy<Value = Vec<u32>> {
    proptest::collection::btree_set(0u32..24, 0..12)
        .prop_map(|set| set.into_iter().collect::<Vec<_>>())
        .prop_shuffle()
}

fn arb_history() -> impl Strategy<Value = Vec<Vec<u32>>> {
    proptest::collection::vec(arb_keys(), 1..6)
}

// ═════════════════════════════════════════════════════════════════════════
// 1. Host order equals key order
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn host_order_follows_keys(history in arb_history()) {
        let root = TestRoot::new();
        for keys in &history {
            root.render(list(keys)).expect("render");
            prop_assert_eq!(root.markup(), list_markup(keys));
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 2. Identical re-render is a no-op on the host
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn identical_rerender_is_silent(keys in arb_keys()) {
        let root = TestRoot::new();
        root.render(list(&keys)).expect("mount");
        root.take_ops();

        root.render(list(&keys)).expect("rerender");
        let mutations = root.take_mutations();
        prop_assert!(mutations.is_empty(), "unexpected mutations: {:?}", mutations);
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 3. Surviving keys keep their instances
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn surviving_instances_are_preserved(before in arb_keys(), after in arb_keys()) {
        let root = TestRoot::new();
        root.render(list(&before)).expect("mount");
        let old: HashMap<u32, HostHandle> =
            before.iter().copied().zip(items(&root)).collect();

        root.render(list(&after)).expect("update");
        let new: HashMap<u32, HostHandle> =
            after.iter().copied().zip(items(&root)).collect();

        for key in &after {
            if let Some(handle) = old.get(key) {
                prop_assert_eq!(Some(handle), new.get(key), "key {} was recreated", key);
            }
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 4. Removals match dropped keys
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn removals_match_dropped_keys(before in arb_keys(), after in arb_keys()) {
        let root = TestRoot::new();
        root.render(list(&before)).expect("mount");
        let ul = root.host().children(root.container())[0];
        root.take_ops();

        root.render(list(&after)).expect("update");
        let kept: BTreeSet<u32> = after.iter().copied().collect();
        let dropped = before.iter().filter(|k| !kept.contains(k)).count();
        let removes = root
            .take_mutations()
            .iter()
            .filter(|op| matches!(op, HostOp::Remove { parent, .. } if *parent == ul))
            .count();
        prop_assert_eq!(removes, dropped);
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 5. Placements are bounded by the new list
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn placements_are_bounded(before in arb_keys(), after in arb_keys()) {
        let root = TestRoot::new();
        root.render(list(&before)).expect("mount");
        let ul = root.host().children(root.container())[0];
        root.take_ops();

        root.render(list(&after)).expect("update");
        let placements = root
            .take_mutations()
            .iter()
            .filter(|op| match op {
                HostOp::Append { parent, .. } | HostOp::Insert { parent, .. } => *parent == ul,
                _ => false,
            })
            .count();
        prop_assert!(placements <= after.len());
        if before == after {
            prop_assert_eq!(placements, 0);
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 6. Fiber storage stays bounded
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn fiber_storage_is_bounded(history in arb_history()) {
        let root = TestRoot::new();
        for keys in &history {
            root.render(list(keys)).expect("render");
            let committed = root.snapshot().expect("snapshot").count();
            let live = root.reconciler().live_fibers();
            prop_assert!(live >= committed);
            prop_assert!(live <= 2 * committed, "live {} committed {}", live, committed);
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 7. Lane isolation and rebasing
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn urgent_render_skips_transitions(
        steps in proptest::collection::vec((proptest::char::range('a', 'z'), any::<bool>()), 1..10),
    ) {
        let setter: Rc<RefCell<Option<Dispatch<String>>>> = Rc::new(RefCell::new(None));
        let app = {
            let setter = Rc::clone(&setter);
            Component::new("Log", move |_, hooks| {
                let (text, set) = hooks.use_state(String::new)?;
                *setter.borrow_mut() = Some(set);
                Ok(host("p").child(Node::text(text)).build())
            })
        };
        let root = TestRoot::new();
        root.render(app.node()).expect("mount");
        let set = setter.borrow().clone().expect("rendered");

        for &(ch, urgent) in &steps {
            let append = move |s: &String| format!("{s}{ch}");
            if urgent {
                root.reconciler()
                    .run_with_priority(Priority::Immediate, || set.update(append));
            } else {
                root.reconciler().start_transition(|| set.update(append));
            }
        }

        let urgent_only: String = steps.iter().filter(|(_, u)| *u).map(|(c, _)| *c).collect();
        let everything: String = steps.iter().map(|(c, _)| *c).collect();

        root.flush_microtasks().expect("urgent");
        prop_assert_eq!(root.markup(), format!("<p>{urgent_only}</p>"));

        root.flush().expect("settle");
        prop_assert_eq!(root.markup(), format!("<p>{everything}</p>"));
    }
}
