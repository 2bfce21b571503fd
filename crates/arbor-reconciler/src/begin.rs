#![forbid(unsafe_code)]

//! Begin step: the pre-order half of one unit of work.
//!
//! Produces a fiber's children for the render lane, or skips the fiber
//! entirely when nothing about it changed (bailout). Providers push their
//! value here and pop it in the complete step.

use arbor_core::{Flags, Lane, Lanes};

use crate::child::{clone_child_fibers, reconcile_child_fibers};
use crate::element::{ElementType, FALLBACK_ATTR, Node, PropValue, Props};
use crate::error::{ProtocolViolation, UnitOutcome};
use crate::fiber::{Fiber, FiberArena, FiberId, OffscreenMode, WorkTag};
use crate::hooks::render_with_hooks;
use crate::reconciler::Shared;

/// Run the begin step for `wip`, returning the next fiber to begin.
pub(crate) fn begin_work(
    arena: &mut FiberArena,
    shared: &Shared,
    wip: FiberId,
    lane: Lane,
) -> Result<UnitOutcome<Option<FiberId>>, ProtocolViolation> {
    if arena[wip].tag == WorkTag::ContextProvider {
        push_provider(arena, shared, wip)?;
    }
    if can_bail_out(arena, shared, wip, lane) {
        return Ok(UnitOutcome::Ready(bail_out(arena, wip, lane)));
    }
    arena[wip].lanes = Lanes::NONE;

    let outcome = match arena[wip].tag {
        WorkTag::HostRoot => UnitOutcome::Ready(update_host_root(arena, shared, wip, lane)),
        WorkTag::FunctionComponent => update_function_component(arena, shared, wip, lane)?,
        WorkTag::HostText => UnitOutcome::Ready(None),
        WorkTag::HostComponent
        | WorkTag::Fragment
        | WorkTag::ContextProvider
        | WorkTag::OffscreenComponent => {
            let children = arena[wip].pending_props.children().clone();
            UnitOutcome::Ready(reconcile_children(arena, wip, &children))
        }
        WorkTag::SuspenseComponent => UnitOutcome::Ready(update_suspense(arena, wip, lane)),
    };
    if matches!(outcome, UnitOutcome::Ready(_)) {
        let fiber = &mut arena[wip];
        fiber.memoized_props = fiber.pending_props.clone();
    }
    Ok(outcome)
}

fn can_bail_out(arena: &FiberArena, shared: &Shared, wip: FiberId, lane: Lane) -> bool {
    let fiber = &arena[wip];
    let Some(current) = fiber.alternate else {
        return false;
    };
    Props::ptr_eq(&arena[current].memoized_props, &fiber.pending_props)
        && !fiber.flags.contains(Flags::DID_CAPTURE)
        && !fiber.lanes.intersects(lane)
        && !shared.contexts.borrow().has_changed_provider()
}

fn bail_out(arena: &mut FiberArena, wip: FiberId, lane: Lane) -> Option<FiberId> {
    if !arena[wip].child_lanes.intersects(lane) {
        tracing::trace!(message = "begin.bailout", fiber = ?wip, subtree = true);
        return None;
    }
    clone_child_fibers(arena, wip);
    arena[wip].child
}

fn push_provider(arena: &FiberArena, shared: &Shared, wip: FiberId) -> Result<(), ProtocolViolation> {
    let fiber = &arena[wip];
    let Some(ElementType::Provider(id)) = &fiber.ty else {
        return Ok(());
    };
    let Some(value) = fiber.pending_props.context_value() else {
        return Err(ProtocolViolation::MissingProviderValue { context: id.raw() });
    };
    let changed = fiber.alternate.is_some_and(|current| {
        arena[current]
            .memoized_props
            .context_value()
            .is_none_or(|prev| !prev.same(value))
    });
    shared.contexts.borrow_mut().push(*id, value.clone(), changed);
    Ok(())
}

/// Reconcile `node` as the children of `wip`.
pub(crate) fn reconcile_children(arena: &mut FiberArena, wip: FiberId, node: &Node) -> Option<FiberId> {
    let current = arena[wip].alternate;
    // Deferred children were never rendered; mount fresh over them.
    let deferred = std::mem::take(&mut arena[wip].deferred);
    let current_child = current.and_then(|c| arena[c].child).filter(|_| !deferred);
    let first = reconcile_child_fibers(arena, wip, current_child, node, current.is_some());
    arena[wip].child = first;
    first
}

fn update_host_root(arena: &mut FiberArena, shared: &Shared, wip: FiberId, lane: Lane) -> Option<FiberId> {
    let pending = arena[wip]
        .host_root
        .and_then(|root| shared.root_queue(root))
        .map(|queue| queue.borrow_mut().take_pending())
        .unwrap_or_default();
    if let Some(current) = arena[wip].alternate
        && let Some(state) = arena[current].root_state.as_mut()
    {
        state.absorb(pending.clone());
    }
    let fiber = &mut arena[wip];
    let state = fiber.root_state.get_or_insert_with(|| arbor_core::ReducerState::new(Node::Empty));
    state.absorb(pending);
    let outcome = state.process(lane);
    let element = state.memoized.clone();
    fiber.lanes |= outcome.skipped_lanes;
    reconcile_children(arena, wip, &element)
}

fn update_function_component(
    arena: &mut FiberArena,
    shared: &Shared,
    wip: FiberId,
    lane: Lane,
) -> Result<UnitOutcome<Option<FiberId>>, ProtocolViolation> {
    let Some(ElementType::Component(component)) = arena[wip].ty.clone() else {
        return Ok(UnitOutcome::Ready(None));
    };
    let props = arena[wip].pending_props.clone();
    let output = match render_with_hooks(arena, shared, wip, &component, &props, lane)? {
        UnitOutcome::Ready(output) => output,
        UnitOutcome::Pending(wakeable) => return Ok(UnitOutcome::Pending(wakeable)),
        UnitOutcome::Failed(message) => return Ok(UnitOutcome::Failed(message)),
    };
    let fiber = &mut arena[wip];
    fiber.hooks = output.hooks;
    fiber.effects = output.effects;
    fiber.flags |= output.flags;
    fiber.lanes |= output.skipped;
    Ok(UnitOutcome::Ready(reconcile_children(arena, wip, &output.node)))
}

// ─── Suspense ──────────────────────────────────────────────────────────────

fn link_offscreen(arena: &mut FiberArena, wip: FiberId, offscreen: FiberId, fallback: Option<FiberId>) {
    arena[wip].child = Some(offscreen);
    let primary = &mut arena[offscreen];
    primary.parent = Some(wip);
    primary.index = 0;
    primary.sibling = fallback;
    if let Some(fallback) = fallback {
        let fallback = &mut arena[fallback];
        fallback.parent = Some(wip);
        fallback.index = 1;
        fallback.sibling = None;
    }
}

fn update_suspense(arena: &mut FiberArena, wip: FiberId, lane: Lane) -> Option<FiberId> {
    let show_fallback = arena[wip].flags.contains(Flags::DID_CAPTURE);
    arena[wip].flags.remove(Flags::DID_CAPTURE);
    let props = arena[wip].pending_props.clone();
    let primary = props.children().clone();
    let fallback = props
        .attr(FALLBACK_ATTR)
        .and_then(PropValue::as_node)
        .cloned()
        .unwrap_or_default();

    let current_offscreen = arena[wip].alternate.and_then(|c| arena[c].child);
    let current_fallback = current_offscreen.and_then(|o| arena[o].sibling);
    tracing::trace!(message = "suspense.begin", fiber = ?wip, fallback = show_fallback);

    match (current_offscreen, show_fallback) {
        (None, false) => {
            let offscreen = arena.alloc(Fiber::new(
                WorkTag::OffscreenComponent,
                OffscreenMode::Visible.props(primary),
                None,
            ));
            link_offscreen(arena, wip, offscreen, None);
            Some(offscreen)
        }
        (None, true) => {
            let offscreen = arena.alloc(Fiber::new(
                WorkTag::OffscreenComponent,
                OffscreenMode::Hidden.props(primary.clone()),
                None,
            ));
            // Keep the primary children as unrendered fibers under the
            // hidden offscreen; they are mounted for real on reveal.
            let placeholders = reconcile_child_fibers(arena, offscreen, None, &primary, false);
            let hidden = &mut arena[offscreen];
            hidden.child = placeholders;
            hidden.deferred = true;
            let fallback = arena.alloc(Fiber::fragment(fallback, None));
            if arena[wip].alternate.is_some() {
                arena[fallback].flags |= Flags::PLACEMENT;
            }
            link_offscreen(arena, wip, offscreen, Some(fallback));
            Some(fallback)
        }
        (Some(current_offscreen), true) => {
            let offscreen =
                arena.create_work_in_progress(current_offscreen, OffscreenMode::Hidden.props(primary));
            // The primary subtree is not revisited in this render; work at
            // the render lane is retried once the suspension settles.
            let primary_fiber = &mut arena[offscreen];
            primary_fiber.lanes = primary_fiber.lanes.remove(lane);
            primary_fiber.child_lanes = primary_fiber.child_lanes.remove(lane);
            let fallback_props = Props::with_children(fallback.clone());
            let fallback = match current_fallback {
                Some(current) => arena.create_work_in_progress(current, fallback_props),
                None => {
                    let created = arena.alloc(Fiber::fragment(fallback, None));
                    arena[created].flags |= Flags::PLACEMENT;
                    created
                }
            };
            link_offscreen(arena, wip, offscreen, Some(fallback));
            Some(fallback)
        }
        (Some(current_offscreen), false) => {
            let offscreen =
                arena.create_work_in_progress(current_offscreen, OffscreenMode::Visible.props(primary));
            if let Some(current_fallback) = current_fallback {
                let fiber = &mut arena[wip];
                fiber.deletions.push(current_fallback);
                fiber.flags |= Flags::CHILD_DELETION;
            }
            link_offscreen(arena, wip, offscreen, None);
            Some(offscreen)
        }
    }
}

// ---- Tests ----

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{host, suspense};
    use crate::test_support::shared_for_tests;

    fn element_fiber(arena: &mut FiberArena, node: &Node) -> FiberId {
        let Node::Element(element) = node else {
            panic!("expected element");
        };
        arena.alloc(Fiber::from_element(element))
    }

    #[test]
    fn host_component_reconciles_its_children() {
        let shared = shared_for_tests();
        let mut arena = FiberArena::new();
        let node = host("ul").child(host("li").build()).child(host("li").build()).build();
        let wip = element_fiber(&mut arena, &node);
        let outcome = begin_work(&mut arena, &shared, wip, Lanes::DEFAULT);
        let Ok(UnitOutcome::Ready(Some(first))) = outcome else {
            panic!("expected first child");
        };
        assert_eq!(arena.children(wip).count(), 2);
        assert_eq!(arena[first].parent, Some(wip));
        assert!(Props::ptr_eq(&arena[wip].memoized_props, &arena[wip].pending_props));
    }

    #[test]
    fn identical_props_without_lanes_bail_out() {
        let shared = shared_for_tests();
        let mut arena = FiberArena::new();
        let node = host("div").child(host("span").build()).build();
        let current = element_fiber(&mut arena, &node);
        let Ok(UnitOutcome::Ready(_)) = begin_work(&mut arena, &shared, current, Lanes::DEFAULT) else {
            panic!("mount failed");
        };
        let props = arena[current].memoized_props.clone();
        let wip = arena.create_work_in_progress(current, props);

        let Ok(UnitOutcome::Ready(next)) = begin_work(&mut arena, &shared, wip, Lanes::DEFAULT) else {
            panic!("bailout failed");
        };
        assert_eq!(next, None);
        assert_eq!(arena[wip].child, arena[current].child);

        arena[wip].child_lanes = Lanes::DEFAULT;
        let Ok(UnitOutcome::Ready(next)) = begin_work(&mut arena, &shared, wip, Lanes::DEFAULT) else {
            panic!("clone failed");
        };
        let next = next.map(|id| arena[id].alternate);
        assert_eq!(next, Some(arena[current].child));
    }

    #[test]
    fn provider_without_value_is_a_violation() {
        let shared = shared_for_tests();
        let mut arena = FiberArena::new();
        let ctx = crate::context::Context::new(0_u8);
        let node = crate::element::ElementBuilder::new(ElementType::Provider(ctx.id())).build();
        let wip = element_fiber(&mut arena, &node);
        let outcome = begin_work(&mut arena, &shared, wip, Lanes::DEFAULT);
        assert!(matches!(
            outcome,
            Err(ProtocolViolation::MissingProviderValue { .. })
        ));
    }

    #[test]
    fn suspense_mounts_visible_offscreen_then_fallback_on_capture() {
        let shared = shared_for_tests();
        let mut arena = FiberArena::new();
        let node = suspense("loading", host("p").build());
        let wip = element_fiber(&mut arena, &node);

        let Ok(UnitOutcome::Ready(Some(offscreen))) = begin_work(&mut arena, &shared, wip, Lanes::DEFAULT) else {
            panic!("expected offscreen");
        };
        assert_eq!(arena[offscreen].tag, WorkTag::OffscreenComponent);
        assert_eq!(OffscreenMode::of(&arena[offscreen].pending_props), OffscreenMode::Visible);

        arena[wip].flags |= Flags::DID_CAPTURE;
        let Ok(UnitOutcome::Ready(Some(fallback))) = begin_work(&mut arena, &shared, wip, Lanes::DEFAULT) else {
            panic!("expected fallback");
        };
        assert_eq!(arena[fallback].tag, WorkTag::Fragment);
        assert!(!arena[fallback].flags.contains(Flags::PLACEMENT));
        let primary = arena[wip].child.map(|id| OffscreenMode::of(&arena[id].pending_props));
        assert_eq!(primary, Some(OffscreenMode::Hidden));
        assert!(!arena[wip].flags.contains(Flags::DID_CAPTURE));

        // The primary children stay attached, unrendered, under the hidden offscreen.
        let Some(hidden) = arena[wip].child else {
            panic!("expected hidden offscreen");
        };
        assert!(arena[hidden].deferred);
        let placeholders: Vec<FiberId> = arena.children(hidden).collect();
        assert_eq!(placeholders.len(), 1);
        let p = &arena[placeholders[0]];
        assert_eq!(p.host_type(), Some("p"));
        assert!(p.flags.is_empty());
        assert!(p.state_node.is_none());
    }

    #[test]
    fn deferred_children_mount_fresh_on_reveal() {
        let shared = shared_for_tests();
        let mut arena = FiberArena::new();
        let current = arena.alloc(Fiber::new(WorkTag::OffscreenComponent, Props::empty(), None));
        let placeholder = reconcile_child_fibers(&mut arena, current, None, &host("p").build(), false);
        arena[current].child = placeholder;
        arena[current].deferred = true;

        let wip = arena.create_work_in_progress(current, OffscreenMode::Visible.props(host("p").build()));
        assert!(arena[wip].deferred);
        let Ok(UnitOutcome::Ready(Some(child))) = begin_work(&mut arena, &shared, wip, Lanes::DEFAULT) else {
            panic!("expected child");
        };
        assert_ne!(Some(child), placeholder);
        assert_eq!(arena[child].alternate, None);
        assert!(arena[child].flags.contains(Flags::PLACEMENT));
        assert!(!arena[wip].deferred);
        assert!(arena[wip].deletions.is_empty());
    }
}
