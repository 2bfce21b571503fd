#![forbid(unsafe_code)]

//! Complete step: the post-order half of one unit of work.
//!
//! Creates or diffs host instances, pops providers, derives offscreen
//! visibility changes, and bubbles `flags | subtree_flags` and lanes from
//! children into their parent.

use arbor_core::{Flags, Lanes};

use crate::element::Props;
use crate::fiber::{FiberArena, FiberId, OffscreenMode, WorkTag};
use crate::host::{HostHandle, HostRenderer};
use crate::reconciler::Shared;

/// Run the complete step for `wip`.
pub(crate) fn complete_work(arena: &mut FiberArena, shared: &Shared, wip: FiberId) {
    match arena[wip].tag {
        WorkTag::HostComponent => complete_host_component(arena, shared.host.as_ref(), wip),
        WorkTag::HostText => complete_host_text(arena, shared.host.as_ref(), wip),
        WorkTag::ContextProvider => shared.contexts.borrow_mut().pop(),
        WorkTag::SuspenseComponent => complete_suspense(arena, wip),
        WorkTag::HostRoot
        | WorkTag::FunctionComponent
        | WorkTag::Fragment
        | WorkTag::OffscreenComponent => {}
    }
    bubble_properties(arena, wip);
}

fn complete_host_component(arena: &mut FiberArena, host: &dyn HostRenderer, wip: FiberId) {
    let fiber = &arena[wip];
    let props = fiber.pending_props.clone();
    let existing = fiber.alternate.and(fiber.state_node);
    if let (Some(current), Some(_)) = (fiber.alternate, existing) {
        let prev = arena[current].memoized_props.clone();
        let fiber = &mut arena[wip];
        if !Props::same_attrs(&prev, &props) {
            fiber.flags |= Flags::UPDATE;
        }
        if !Props::same_ref(&prev, &props) {
            fiber.flags |= Flags::REF;
        }
        return;
    }

    let ty = fiber.host_type().unwrap_or_default().to_owned();
    let instance = host.create_instance(&ty, &props);
    append_all_children(arena, host, instance, wip);
    let fiber = &mut arena[wip];
    fiber.state_node = Some(instance);
    if props.host_ref().is_some() {
        fiber.flags |= Flags::REF;
    }
}

fn complete_host_text(arena: &mut FiberArena, host: &dyn HostRenderer, wip: FiberId) {
    let fiber = &arena[wip];
    let text = fiber.pending_props.text_content().unwrap_or_default().to_owned();
    if let (Some(current), Some(_)) = (fiber.alternate, fiber.state_node) {
        let changed = arena[current].memoized_props.text_content() != Some(text.as_str());
        if changed {
            arena[wip].flags |= Flags::UPDATE;
        }
        return;
    }
    let instance = host.create_text_instance(&text);
    arena[wip].state_node = Some(instance);
}

/// Append the top-level host nodes under `wip` to `parent`.
fn append_all_children(arena: &FiberArena, host: &dyn HostRenderer, parent: HostHandle, wip: FiberId) {
    let mut node = arena[wip].child;
    while let Some(id) = node {
        let fiber = &arena[id];
        if fiber.tag.is_host() {
            if let Some(child) = fiber.state_node {
                host.append_initial_child(parent, child);
            }
        } else if let Some(child) = fiber.child {
            node = Some(child);
            continue;
        }

        let mut cursor = id;
        loop {
            if cursor == wip {
                return;
            }
            if let Some(sibling) = arena[cursor].sibling {
                node = Some(sibling);
                break;
            }
            match arena[cursor].parent {
                Some(parent) if parent != wip => cursor = parent,
                _ => return,
            }
        }
    }
}

fn complete_suspense(arena: &mut FiberArena, wip: FiberId) {
    let Some(offscreen) = arena[wip].child else {
        return;
    };
    let pending = arena[offscreen].pending_props.clone();
    let hidden = OffscreenMode::of(&pending) == OffscreenMode::Hidden;
    let was_hidden = arena[offscreen]
        .alternate
        .map(|current| OffscreenMode::of(&arena[current].memoized_props) == OffscreenMode::Hidden);
    let toggled = match was_hidden {
        Some(was_hidden) => was_hidden != hidden,
        None => hidden,
    };
    // A hidden primary subtree is skipped by this render; its committed
    // children must still point at the offscreen fiber being committed.
    let children: Vec<FiberId> = arena.children(offscreen).collect();
    for child in children {
        arena[child].parent = Some(offscreen);
    }
    let fiber = &mut arena[offscreen];
    fiber.memoized_props = pending;
    if toggled {
        fiber.flags |= Flags::VISIBILITY;
        tracing::trace!(message = "suspense.visibility", fiber = ?offscreen, hidden);
    }
}

/// Fold children's flags and lanes into `wip`, and point every child back
/// at `wip`.
pub(crate) fn bubble_properties(arena: &mut FiberArena, wip: FiberId) {
    let bailed_out = arena[wip]
        .alternate
        .is_some_and(|current| arena[current].child == arena[wip].child);
    let mut subtree_flags = Flags::empty();
    let mut child_lanes = Lanes::NONE;
    let mut node = arena[wip].child;
    while let Some(id) = node {
        let child = &mut arena[id];
        child_lanes |= child.lanes | child.child_lanes;
        if !bailed_out {
            subtree_flags |= child.flags | child.subtree_flags;
        }
        child.parent = Some(wip);
        node = child.sibling;
    }
    let fiber = &mut arena[wip];
    fiber.subtree_flags |= subtree_flags;
    fiber.child_lanes = child_lanes;
}

// ---- Tests ----
