#![no_main]

use arbitrary::Arbitrary;
use arbor_core::Priority;
use arbor_harness::TestRoot;
use arbor_reconciler::{Node, host};
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug, Clone, Copy)]
enum FuzzPriority {
    Immediate,
    UserBlocking,
    Normal,
    Low,
    Idle,
    Transition,
}

#[derive(Arbitrary, Debug)]
struct FuzzUpdate {
    keys: Vec<u8>,
    priority: FuzzPriority,
}

#[derive(Arbitrary, Debug)]
struct FuzzBatch {
    updates: Vec<FuzzUpdate>,
    /// Scheduler polls granted before the first task is asked to yield.
    yield_after: Option<u8>,
}

fn dedup(keys: &[u8]) -> Vec<u8> {
    let mut seen = [false; 256];
    keys.iter()
        .copied()
        .filter(|&k| !std::mem::replace(&mut seen[usize::from(k)], true))
        .take(48)
        .collect()
}

fn list(keys: &[u8]) -> Node {
    host("ul")
        .children(Node::list(
            keys.iter()
                .map(|k| host("li").key(u32::from(*k)).child(k.to_string()).build()),
        ))
        .build()
}

fn markup(keys: &[u8]) -> String {
    let items: String = keys.iter().map(|k| format!("<li>{k}</li>")).collect();
    format!("<ul>{items}</ul>")
}

fn enqueue(root: &TestRoot, update: &FuzzUpdate) -> Vec<u8> {
    let keys = dedup(&update.keys);
    let node = list(&keys);
    let reconciler = root.reconciler();
    let result = match update.priority {
        FuzzPriority::Immediate => reconciler.run_with_priority(Priority::Immediate, || root.update(node)),
        FuzzPriority::UserBlocking => {
            reconciler.run_with_priority(Priority::UserBlocking, || root.update(node))
        }
        FuzzPriority::Normal => reconciler.run_with_priority(Priority::Normal, || root.update(node)),
        FuzzPriority::Low => reconciler.run_with_priority(Priority::Low, || root.update(node)),
        FuzzPriority::Idle => reconciler.run_with_priority(Priority::Idle, || root.update(node)),
        FuzzPriority::Transition => reconciler.start_transition(|| root.update(node)),
    };
    assert!(result.is_ok(), "update rejected: {result:?}");
    keys
}

fuzz_target!(|batches: Vec<FuzzBatch>| {
    let root = TestRoot::new();
    for batch in batches.iter().take(16) {
        let mut last = None;
        for update in batch.updates.iter().take(8) {
            last = Some(enqueue(&root, update));
        }

        if let Some(budget) = batch.yield_after {
            root.scheduler().set_yield_budget(usize::from(budget));
            root.scheduler().flush_one();
            root.scheduler().clear_yield_budget();
        }
        root.flush().expect("keyed lists never fail to render");

        // Every lane has settled, so the latest enqueued list is on screen.
        if let Some(keys) = last {
            assert_eq!(root.markup(), markup(&keys));
            let ul = root.host().children(root.container())[0];
            assert_eq!(root.host().children(ul).len(), keys.len());
        }
    }
});
