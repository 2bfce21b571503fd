#![forbid(unsafe_code)]

//! Work loop: drives begin/complete steps over the work-in-progress tree.
//!
//! A render is a sequence of units, one begin step each, with complete
//! steps run while climbing back out of finished subtrees. In time-sliced
//! mode the scheduler's `should_yield` is polled between units and the
//! loop returns [`RootExit::Incomplete`]; the next call with the same root
//! and lane resumes where it stopped. Any other root or lane discards the
//! work-in-progress tree and starts over from the committed one.
//!
//! Suspensions walk up to the nearest Suspense boundary whose primary
//! subtree raised them and re-begin it in fallback mode. Without such a
//! boundary, or on a failure, the render is abandoned.

use std::rc::Weak;

use arbor_core::{Flags, Lane, WakeableRef};

use crate::begin::begin_work;
use crate::complete::complete_work;
use crate::error::{ReconcileError, UnitOutcome};
use crate::fiber::{FiberArena, FiberId, WorkTag};
use crate::reconciler::{ReconcilerState, RootId, ScheduledUpdate, Shared, WorkInProgress};

/// How a call to [`render_root`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RootExit {
    /// The finished tree is parked on the root, ready to commit.
    Completed,
    /// The loop yielded; call again to resume.
    Incomplete,
    /// The render was abandoned.
    DidNotComplete,
}

enum Step {
    Next(Option<FiberId>),
    Abandon,
}

/// Render `root` at `lane`, resuming in-progress work when it matches.
pub(crate) fn render_root(
    shared: &Shared,
    state: &mut ReconcilerState,
    root: RootId,
    lane: Lane,
    time_slice: bool,
) -> RootExit {
    let resumable = state
        .wip
        .as_ref()
        .is_some_and(|wip| wip.root == root && wip.lane == lane);
    if !resumable {
        prepare_fresh_stack(shared, state, root, lane);
    }

    let span = tracing::debug_span!(
        "arbor.render",
        root = root.index(),
        lane = %lane,
        resumed = resumable,
        units = tracing::field::Empty,
        status = tracing::field::Empty
    );
    let _guard = span.enter();

    let mut units = 0_u64;
    let exit = loop {
        let Some(next) = state.wip.as_ref().map(|wip| wip.next) else {
            break RootExit::DidNotComplete;
        };
        let Some(unit) = next else {
            break RootExit::Completed;
        };
        if time_slice && units > 0 && shared.scheduler.should_yield() {
            tracing::debug!(message = "work_loop.yield", root = root.index(), units);
            break RootExit::Incomplete;
        }
        units += 1;
        match perform_unit(shared, state, unit, lane) {
            Step::Next(next) => {
                if let Some(wip) = state.wip.as_mut() {
                    wip.next = next;
                }
            }
            Step::Abandon => {
                abandon(shared, state);
                break RootExit::DidNotComplete;
            }
        }
    };

    span.record("units", units);
    span.record("status", tracing::field::debug(exit));
    match exit {
        RootExit::Completed => {
            if let Some(wip) = state.wip.take() {
                let fiber_root = &mut state.roots[root.index()];
                fiber_root.finished_work = Some(wip.root_fiber);
                fiber_root.finished_lane = lane;
            }
        }
        RootExit::DidNotComplete => {
            tracing::warn!(message = "work_loop.did_not_complete", root = root.index(), lane = %lane);
        }
        RootExit::Incomplete => {}
    }
    exit
}

/// Discard any in-progress work and start a render of `root` at `lane`.
fn prepare_fresh_stack(shared: &Shared, state: &mut ReconcilerState, root: RootId, lane: Lane) {
    if let Some(prev) = state.wip.take() {
        tracing::debug!(
            message = "work_loop.restart",
            root = root.index(),
            lane = %lane,
            discarded_root = prev.root.index(),
            discarded_lane = %prev.lane
        );
    }
    shared.contexts.borrow_mut().unwind_to(0);
    let fiber_root = &mut state.roots[root.index()];
    fiber_root.finished_work = None;
    let current = fiber_root.current;
    let props = state.fibers[current].memoized_props.clone();
    let root_fiber = state.fibers.create_work_in_progress(current, props);
    state.wip = Some(WorkInProgress {
        root,
        lane,
        root_fiber,
        next: Some(root_fiber),
        throws: 0,
    });
}

fn abandon(shared: &Shared, state: &mut ReconcilerState) {
    state.wip = None;
    shared.contexts.borrow_mut().unwind_to(0);
}

fn perform_unit(shared: &Shared, state: &mut ReconcilerState, unit: FiberId, lane: Lane) -> Step {
    tracing::trace!(message = "work_loop.unit", fiber = ?unit, tag = state.fibers[unit].tag.label());
    match begin_work(&mut state.fibers, shared, unit, lane) {
        Ok(UnitOutcome::Ready(Some(child))) => Step::Next(Some(child)),
        Ok(UnitOutcome::Ready(None)) => Step::Next(complete_unit(shared, state, unit)),
        Ok(UnitOutcome::Pending(wakeable)) => handle_suspension(shared, state, unit, lane, wakeable),
        Ok(UnitOutcome::Failed(message)) => {
            let component = state.fibers[unit].name();
            tracing::error!(message = "work_loop.render_failed", component = %component, error = %message);
            state.record_error(ReconcileError::RenderFailed { component, message });
            Step::Abandon
        }
        Err(violation) => {
            tracing::error!(message = "work_loop.protocol_violation", error = %violation);
            state.record_error(violation.into());
            Step::Abandon
        }
    }
}

/// Complete `unit` and every ancestor it finishes. Returns the next fiber
/// to begin, or `None` when the root completed.
fn complete_unit(shared: &Shared, state: &mut ReconcilerState, unit: FiberId) -> Option<FiberId> {
    let root_fiber = state.wip.as_ref().map(|wip| wip.root_fiber);
    let mut node = unit;
    loop {
        complete_work(&mut state.fibers, shared, node);
        if Some(node) == root_fiber {
            return None;
        }
        let fiber = &state.fibers[node];
        if let Some(sibling) = fiber.sibling {
            return Some(sibling);
        }
        node = fiber.parent?;
    }
}

// ─── Unwind ────────────────────────────────────────────────────────────────

fn handle_suspension(
    shared: &Shared,
    state: &mut ReconcilerState,
    unit: FiberId,
    lane: Lane,
    wakeable: WakeableRef,
) -> Step {
    let Some(wip) = state.wip.as_mut() else {
        return Step::Abandon;
    };
    wip.throws += 1;
    let (root, throws) = (wip.root, wip.throws);
    if throws > shared.config.retry_cap {
        tracing::error!(message = "work_loop.retry_cap", root = root.index(), lane = %lane, attempts = throws);
        state.record_error(ReconcileError::RetryCapExceeded { lane, attempts: throws });
        return Step::Abandon;
    }

    let boundary = find_suspense_boundary(&state.fibers, unit);
    attach_ping(shared, state, root, lane, &wakeable, boundary, unit);
    let Some(boundary) = boundary else {
        tracing::debug!(message = "suspense.no_boundary", fiber = ?unit, wakeable = wakeable.id());
        return Step::Abandon;
    };

    tracing::debug!(message = "suspense.capture", boundary = ?boundary, wakeable = wakeable.id());
    state.fibers[boundary].flags |= Flags::SHOULD_CAPTURE;
    unwind_to_boundary(shared, &mut state.fibers, unit, boundary);
    Step::Next(Some(boundary))
}

/// Nearest Suspense ancestor of `fiber` that is rendering its primary
/// subtree, with `fiber` inside that subtree.
pub(crate) fn find_suspense_boundary(arena: &FiberArena, fiber: FiberId) -> Option<FiberId> {
    let mut prev = fiber;
    let mut node = arena[fiber].parent;
    while let Some(id) = node {
        let candidate = &arena[id];
        if candidate.tag == WorkTag::SuspenseComponent
            && candidate.child == Some(prev)
            && arena[prev].tag == WorkTag::OffscreenComponent
        {
            return Some(id);
        }
        prev = id;
        node = candidate.parent;
    }
    None
}

/// Pop the providers between `unit` and `boundary` and reset the boundary
/// for a fallback render.
fn unwind_to_boundary(shared: &Shared, arena: &mut FiberArena, unit: FiberId, boundary: FiberId) {
    let mut node = arena[unit].parent;
    while let Some(id) = node {
        if id == boundary {
            break;
        }
        if arena[id].tag == WorkTag::ContextProvider {
            shared.contexts.borrow_mut().pop();
        }
        node = arena[id].parent;
    }

    let fiber = &mut arena[boundary];
    fiber.flags.remove(Flags::SHOULD_CAPTURE | Flags::CHILD_DELETION);
    fiber.flags |= Flags::DID_CAPTURE;
    fiber.deletions.clear();
    fiber.subtree_flags = Flags::empty();
}

/// Subscribe once per resource, root, boundary, and lane for a retry.
fn attach_ping(
    shared: &Shared,
    state: &mut ReconcilerState,
    root: RootId,
    lane: Lane,
    wakeable: &WakeableRef,
    boundary: Option<FiberId>,
    source: FiberId,
) {
    let id = wakeable.id();
    let lanes = state.ping_cache.entry((id, root, boundary)).or_default();
    if lanes.includes(lane) {
        return;
    }
    *lanes |= lane;
    let this: Weak<Shared> = Weak::clone(&shared.this);
    wakeable.subscribe(Box::new(move || {
        if let Some(shared) = this.upgrade() {
            shared.schedule(ScheduledUpdate::Ping {
                root,
                lane,
                wakeable: id,
                boundary,
                source,
            });
        }
    }));
}

// ---- Tests ----
