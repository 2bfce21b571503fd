#![forbid(unsafe_code)]

//! Commit engine: applies a finished render to the host.
//!
//! # Passes
//!
//! 1. **Mutation** (depth-first): deletions of a fiber's children on the
//!    way down; placement, host updates, ref detachment, and offscreen
//!    visibility on the way up. Passive effects are collected here.
//! 2. **Swap**: the root's `current` becomes the finished tree.
//! 3. **Layout**: refs of live host nodes are attached.
//!
//! Each pass only descends into a subtree whose `subtree_flags` intersect
//! the pass mask. Passive effects never run here; they are queued on the
//! root and one flush is scheduled at normal priority.

use std::rc::Rc;

use arbor_core::{Flags, Lanes, Priority, TaskStatus};

use crate::fiber::{FiberArena, FiberId, OffscreenMode, WorkTag};
use crate::host::{HostHandle, HostRenderer};
use crate::reconciler::{PendingPassive, ReconcilerState, RootId, Shared};
use crate::trace::{CommitRecord, FiberSnapshot};

/// Commit the finished work parked on `root`.
pub(crate) fn commit_root(shared: &Shared, state: &mut ReconcilerState, root: RootId) {
    let fiber_root = &mut state.roots[root.index()];
    let Some(finished) = fiber_root.finished_work.take() else {
        return;
    };
    let lane = std::mem::replace(&mut fiber_root.finished_lane, Lanes::NONE);
    let span = tracing::debug_span!(
        "arbor.commit",
        root = root.index(),
        lane = %lane,
        mutations = tracing::field::Empty,
        freed = tracing::field::Empty
    );
    let _guard = span.enter();

    if shared.config.record_commits {
        let record = CommitRecord {
            root,
            lane,
            tree: FiberSnapshot::capture(&state.fibers, finished),
        };
        let capacity = shared.config.commit_record_capacity.max(1);
        while state.commit_records.len() >= capacity {
            state.commit_records.pop_front();
        }
        state.commit_records.push_back(record);
    }

    let remaining = state.fibers[finished].lanes | state.fibers[finished].child_lanes;
    let fiber_root = &mut state.roots[root.index()];
    fiber_root.lanes.mark_finished(lane);
    for pending in remaining.iter() {
        fiber_root.lanes.mark_updated(pending);
    }
    if let Some(callback) = fiber_root.callback.take()
        && let Some(token) = callback.token
    {
        shared.scheduler.cancel_callback(token);
    }

    let aggregate = state.fibers[finished].flags | state.fibers[finished].subtree_flags;
    if aggregate.needs(Flags::PASSIVE_MASK) && !fiber_root.passive_scheduled {
        fiber_root.passive_scheduled = true;
        let this = std::rc::Weak::clone(&shared.this);
        shared.scheduler.schedule_callback(
            Priority::Normal,
            Box::new(move |_| {
                if let Some(shared) = this.upgrade() {
                    shared.flush_passive_effects();
                }
                TaskStatus::Complete
            }),
        );
        tracing::trace!(message = "passive.scheduled", root = root.index());
    }

    let container = fiber_root.container;
    let mut passive = std::mem::take(&mut fiber_root.pending_passive);
    let mutations = commit_mutation_effects(
        &mut state.fibers,
        shared.host.as_ref(),
        container,
        finished,
        &mut passive,
    );
    let fiber_root = &mut state.roots[root.index()];
    fiber_root.pending_passive = passive;

    fiber_root.current = finished;

    commit_layout_effects(&state.fibers, finished);

    let live: Vec<FiberId> = state.roots.iter().map(|r| r.current).collect();
    let freed = state.fibers.collect(live);
    span.record("mutations", mutations);
    span.record("freed", freed);
    tracing::debug!(message = "commit.done", root = root.index(), lane = %lane, remaining = %remaining);

    shared.ensure_root_is_scheduled(state, root);
}

// ─── Mutation pass ─────────────────────────────────────────────────────────

enum Visit {
    Enter(FiberId),
    Exit(FiberId),
}

/// Returns the number of host mutations issued.
fn commit_mutation_effects(
    arena: &mut FiberArena,
    host: &dyn HostRenderer,
    container: HostHandle,
    finished: FiberId,
    passive: &mut PendingPassive,
) -> usize {
    let mut mutations = 0;
    let mut stack = vec![Visit::Enter(finished)];
    while let Some(visit) = stack.pop() {
        match visit {
            Visit::Enter(id) => {
                let deletions = std::mem::take(&mut arena[id].deletions);
                if !deletions.is_empty() {
                    let parent = host_parent_of(arena, id, container);
                    for deleted in deletions {
                        mutations += commit_deletion(arena, host, parent, deleted, passive);
                    }
                }
                stack.push(Visit::Exit(id));
                if arena[id]
                    .subtree_flags
                    .needs(Flags::MUTATION_MASK | Flags::PASSIVE_MASK)
                {
                    let children: Vec<FiberId> = arena.children(id).collect();
                    stack.extend(children.into_iter().rev().map(Visit::Enter));
                }
            }
            Visit::Exit(id) => {
                mutations += commit_mutation_on_fiber(arena, host, container, id, passive);
            }
        }
    }
    mutations
}

fn commit_mutation_on_fiber(
    arena: &mut FiberArena,
    host: &dyn HostRenderer,
    container: HostHandle,
    id: FiberId,
    passive: &mut PendingPassive,
) -> usize {
    let flags = arena[id].flags;
    let mut mutations = 0;
    tracing::trace!(message = "commit.mutation", fiber = ?id, flags = ?flags);

    if flags.contains(Flags::PLACEMENT) {
        mutations += commit_placement(arena, host, container, id);
        arena[id].flags.remove(Flags::PLACEMENT);
    }

    let fiber = &arena[id];
    if flags.contains(Flags::UPDATE)
        && let Some(instance) = fiber.state_node
    {
        match fiber.tag {
            WorkTag::HostComponent => {
                host.commit_update(instance, &fiber.memoized_props);
                mutations += 1;
            }
            WorkTag::HostText => {
                let text = fiber.memoized_props.text_content().unwrap_or_default();
                host.commit_text_update(instance, text);
                mutations += 1;
            }
            _ => {}
        }
    }

    if flags.contains(Flags::REF)
        && fiber.tag == WorkTag::HostComponent
        && let Some(prev) = fiber.alternate.and_then(|current| arena.get(current))
        && let Some(old_ref) = prev.memoized_props.host_ref()
    {
        old_ref.detach();
    }

    if flags.contains(Flags::PASSIVE_EFFECT) && fiber.tag == WorkTag::FunctionComponent {
        passive.update.extend(fiber.effects.iter().cloned());
    }

    if flags.contains(Flags::VISIBILITY) && fiber.tag == WorkTag::OffscreenComponent {
        let hidden = OffscreenMode::of(&fiber.memoized_props) == OffscreenMode::Hidden;
        mutations += toggle_visibility(arena, host, id, hidden);
    }
    mutations
}

/// Nearest host node above `id`: a host component's instance or the root
/// container.
fn host_parent_of(arena: &FiberArena, id: FiberId, container: HostHandle) -> HostHandle {
    let mut node = Some(id);
    while let Some(current) = node {
        let fiber = &arena[current];
        match fiber.tag {
            WorkTag::HostComponent => {
                if let Some(instance) = fiber.state_node {
                    return instance;
                }
            }
            WorkTag::HostRoot => return fiber.state_node.unwrap_or(container),
            _ => {}
        }
        node = fiber.parent;
    }
    container
}

fn commit_placement(arena: &FiberArena, host: &dyn HostRenderer, container: HostHandle, id: FiberId) -> usize {
    let parent = match arena[id].parent {
        Some(parent) => host_parent_of(arena, parent, container),
        None => container,
    };
    let before = host_sibling(arena, id);
    let mut placed = 0;
    for node in top_level_host_nodes(arena, id) {
        let Some(handle) = arena[node].state_node else {
            continue;
        };
        match before {
            Some(before) => host.insert_child_to_container(parent, handle, before),
            None => host.append_child_to_container(parent, handle),
        }
        placed += 1;
    }
    placed
}

/// Host node the placed fiber `id` must be inserted before: the first
/// stable host node after it under the same host parent.
fn host_sibling(arena: &FiberArena, id: FiberId) -> Option<HostHandle> {
    let mut node = id;
    'siblings: loop {
        while arena[node].sibling.is_none() {
            let parent = arena[node].parent?;
            let tag = arena[parent].tag;
            if tag.is_host() || tag == WorkTag::HostRoot {
                return None;
            }
            node = parent;
        }
        node = arena[node].sibling?;

        while !arena[node].tag.is_host() {
            if arena[node].flags.contains(Flags::PLACEMENT) {
                continue 'siblings;
            }
            match arena[node].child {
                Some(child) => node = child,
                None => continue 'siblings,
            }
        }
        if !arena[node].flags.contains(Flags::PLACEMENT)
            && let Some(handle) = arena[node].state_node
        {
            return Some(handle);
        }
    }
}

/// Host fibers at the top of the subtree rooted at `id`, in tree order.
fn top_level_host_nodes(arena: &FiberArena, id: FiberId) -> Vec<FiberId> {
    let mut found = Vec::new();
    let mut stack = vec![id];
    while let Some(node) = stack.pop() {
        if arena[node].tag.is_host() {
            found.push(node);
            continue;
        }
        let children: Vec<FiberId> = arena.children(node).collect();
        stack.extend(children.into_iter().rev());
    }
    found
}

/// Top-level host fibers whose visibility follows `offscreen`. Nested
/// offscreen subtrees that are hidden in their own right are left out.
fn visibility_targets(arena: &FiberArena, offscreen: FiberId) -> Vec<FiberId> {
    let mut found = Vec::new();
    let mut stack: Vec<FiberId> = arena.children(offscreen).collect();
    stack.reverse();
    while let Some(node) = stack.pop() {
        let fiber = &arena[node];
        if fiber.tag.is_host() {
            found.push(node);
            continue;
        }
        if fiber.tag == WorkTag::OffscreenComponent
            && OffscreenMode::of(&fiber.memoized_props) == OffscreenMode::Hidden
        {
            continue;
        }
        let children: Vec<FiberId> = arena.children(node).collect();
        stack.extend(children.into_iter().rev());
    }
    found
}

fn toggle_visibility(arena: &FiberArena, host: &dyn HostRenderer, offscreen: FiberId, hidden: bool) -> usize {
    let mut toggled = 0;
    for node in visibility_targets(arena, offscreen) {
        let fiber = &arena[node];
        let Some(instance) = fiber.state_node else {
            continue;
        };
        match (fiber.tag, hidden) {
            (WorkTag::HostComponent, true) => host.hide_instance(instance),
            (WorkTag::HostComponent, false) => host.unhide_instance(instance, &fiber.memoized_props),
            (_, true) => host.hide_text_instance(instance),
            (_, false) => {
                let text = fiber.memoized_props.text_content().unwrap_or_default();
                host.unhide_text_instance(instance, text);
            }
        }
        toggled += 1;
    }
    tracing::trace!(message = "commit.visibility", fiber = ?offscreen, hidden, toggled);
    toggled
}

/// Unmount the subtree rooted at `deleted`: queue unmount effects, detach
/// refs, then remove its top-level host nodes from `parent` in one batch.
fn commit_deletion(
    arena: &mut FiberArena,
    host: &dyn HostRenderer,
    parent: HostHandle,
    deleted: FiberId,
    passive: &mut PendingPassive,
) -> usize {
    let mut removals: Vec<HostHandle> = Vec::new();
    let mut stack = vec![(deleted, false)];
    while let Some((id, inside_host)) = stack.pop() {
        let Some(fiber) = arena.get(id) else {
            continue;
        };
        match fiber.tag {
            WorkTag::HostComponent | WorkTag::HostText => {
                if let Some(host_ref) = fiber.memoized_props.host_ref() {
                    host_ref.detach();
                }
                if !inside_host && let Some(instance) = fiber.state_node {
                    removals.push(instance);
                }
            }
            WorkTag::FunctionComponent => {
                passive.unmount.extend(fiber.effects.iter().map(Rc::clone));
            }
            _ => {}
        }
        let nested = inside_host || fiber.tag.is_host();
        let children: Vec<FiberId> = arena.children(id).collect();
        stack.extend(children.into_iter().rev().map(|child| (child, nested)));
    }

    for instance in &removals {
        host.remove_child(parent, *instance);
    }
    if let Some(fiber) = arena.get_mut(deleted) {
        fiber.parent = None;
        fiber.sibling = None;
    }
    tracing::trace!(message = "commit.deletion", fiber = ?deleted, removed = removals.len());
    removals.len()
}

// ─── Layout pass ───────────────────────────────────────────────────────────

fn commit_layout_effects(arena: &FiberArena, finished: FiberId) {
    let mut stack = vec![finished];
    while let Some(id) = stack.pop() {
        let fiber = &arena[id];
        if fiber.flags.contains(Flags::REF)
            && fiber.tag == WorkTag::HostComponent
            && let (Some(host_ref), Some(instance)) = (fiber.memoized_props.host_ref(), fiber.state_node)
        {
            host_ref.attach(instance);
            tracing::trace!(message = "commit.ref_attach", fiber = ?id, instance = ?instance);
        }
        if fiber.subtree_flags.needs(Flags::LAYOUT_MASK) {
            stack.extend(arena.children(id));
        }
    }
}

// ---- Tests ----
