#![forbid(unsafe_code)]

//! Hooks engine.
//!
//! # Design
//!
//! A function component's per-instance data is an ordered list of hook
//! records keyed by call position. Each render walks that list through a
//! [`Hooks`] handle whose [`HookTable`] is picked once per render: the
//! mount table allocates records, the update table walks the previous
//! render's records in lockstep and derives new ones from them.
//!
//! State records are type-erased behind [`StateHook`] so one list can hold
//! state of many types. Updates go to a queue shared by both generations
//! of the fiber; the update table splices that queue into the committed
//! record first, so an abandoned render never loses an update.
//!
//! # Invariants
//!
//! 1. A component requests the same hooks, in the same order and of the
//!    same kinds, on every render. Any divergence is a fatal
//!    [`ProtocolViolation`], reported even if the component swallowed the
//!    error returned by the hook call.
//! 2. A ref hook returns the same allocation on every render.
//! 3. An effect whose dependencies are unchanged is recorded without
//!    [`HookFlags::HAS_EFFECT`], so the next flush skips it.
//!
//! # Failure Modes
//!
//! - **Setter after unmount**: the fiber handle is stale; the update is
//!   dropped at scheduling time.
//! - **Setter during render**: queued in the reconciler mailbox and
//!   scheduled once the render yields control.

use std::any::{Any, type_name};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use arbor_core::{
    Flags, HookFlags, Lane, Lanes, ReducerState, Resource, ResourceState, Update, UpdateQueue,
    WakeableRef,
};

use crate::context::{Context, ContextStack};
use crate::element::{Component, Node, PropValue, Props};
use crate::error::{ProtocolViolation, RenderError, UnitOutcome};
use crate::fiber::{FiberArena, FiberId};
use crate::reconciler::{ScheduledUpdate, Shared};

/// Teardown returned by an effect.
pub type Cleanup = Box<dyn FnOnce()>;

type CreateFn = Box<dyn FnOnce() -> Option<Cleanup>>;
type DestroySlot = Rc<RefCell<Option<Cleanup>>>;
type StateInit<'b> = Box<dyn FnOnce() -> Box<dyn StateHook> + 'b>;
type RefInit<'b> = Box<dyn FnOnce() -> Rc<dyn Any> + 'b>;

// ─── Records ───────────────────────────────────────────────────────────────

/// Type-erased state record.
pub(crate) trait StateHook {
    /// Move updates from the shared queue into this record's base queue.
    fn sync_pending(&mut self);
    /// Reduce at `lanes`; returns the lanes left unprocessed.
    fn process(&mut self, lanes: Lanes) -> Lanes;
    fn clone_box(&self) -> Box<dyn StateHook>;
    fn state_type(&self) -> &'static str;
    fn as_any(&self) -> &dyn Any;
}

struct StateRecord<S> {
    queue: Rc<RefCell<UpdateQueue<S>>>,
    reducer: ReducerState<S>,
}

impl<S: Clone + 'static> StateHook for StateRecord<S> {
    fn sync_pending(&mut self) {
        let pending = self.queue.borrow_mut().take_pending();
        self.reducer.absorb(pending);
    }

    fn process(&mut self, lanes: Lanes) -> Lanes {
        self.reducer.process(lanes).skipped_lanes
    }

    fn clone_box(&self) -> Box<dyn StateHook> {
        Box::new(StateRecord {
            queue: Rc::clone(&self.queue),
            reducer: self.reducer.clone(),
        })
    }

    fn state_type(&self) -> &'static str {
        type_name::<S>()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// One passive effect record.
pub struct Effect {
    pub(crate) tag: HookFlags,
    create: RefCell<Option<CreateFn>>,
    destroy: DestroySlot,
    deps: Option<Vec<PropValue>>,
}

impl Effect {
    fn new(tag: HookFlags, create: CreateFn, destroy: DestroySlot, deps: Option<Vec<PropValue>>) -> Self {
        Self {
            tag,
            create: RefCell::new(Some(create)),
            destroy,
            deps,
        }
    }

    /// Run and clear the stored teardown, if any.
    pub(crate) fn run_destroy(&self) {
        let destroy = self.destroy.borrow_mut().take();
        if let Some(destroy) = destroy {
            destroy();
        }
    }

    /// Run the setup once and store its teardown.
    pub(crate) fn run_create(&self) {
        let create = self.create.borrow_mut().take();
        if let Some(create) = create {
            let destroy = create();
            *self.destroy.borrow_mut() = destroy;
        }
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("tag", &self.tag)
            .field("deps", &self.deps)
            .finish_non_exhaustive()
    }
}

/// One hook record.
pub(crate) enum Hook {
    State(Box<dyn StateHook>),
    Effect(Rc<Effect>),
    Ref(Rc<dyn Any>),
}

impl Hook {
    const fn kind(&self) -> &'static str {
        match self {
            Self::State(_) => "state",
            Self::Effect(_) => "effect",
            Self::Ref(_) => "ref",
        }
    }
}

impl Clone for Hook {
    fn clone(&self) -> Self {
        match self {
            Self::State(state) => Self::State(state.clone_box()),
            Self::Effect(effect) => Self::Effect(Rc::clone(effect)),
            Self::Ref(cell) => Self::Ref(Rc::clone(cell)),
        }
    }
}

fn deps_equal(prev: Option<&[PropValue]>, next: Option<&[PropValue]>) -> bool {
    match (prev, next) {
        (Some(prev), Some(next)) => prev.len() == next.len() && prev.iter().zip(next).all(|(a, b)| a == b),
        _ => false,
    }
}

// ─── Dispatch ──────────────────────────────────────────────────────────────

#[derive(Clone)]
struct UpdateLink {
    shared: Weak<Shared>,
    fiber: FiberId,
}

impl UpdateLink {
    fn dispatch<S>(&self, queue: &RefCell<UpdateQueue<S>>, make: impl FnOnce(Lane) -> Update<S>) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let lane = shared.request_update_lane();
        queue.borrow_mut().enqueue(make(lane));
        shared.schedule(ScheduledUpdate::Fiber {
            fiber: self.fiber,
            lane,
        });
    }
}

/// State setter returned by [`Hooks::use_state`].
pub struct Dispatch<S> {
    queue: Rc<RefCell<UpdateQueue<S>>>,
    link: UpdateLink,
}

impl<S> Clone for Dispatch<S> {
    fn clone(&self) -> Self {
        Self {
            queue: Rc::clone(&self.queue),
            link: self.link.clone(),
        }
    }
}

impl<S> fmt::Debug for Dispatch<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatch")
            .field("fiber", &self.link.fiber)
            .field("pending", &self.queue.borrow().len())
            .finish()
    }
}

impl<S: Clone + 'static> Dispatch<S> {
    /// Replace the state.
    pub fn set(&self, value: S) {
        self.link
            .dispatch(&self.queue, move |lane| Update::set(value, lane));
    }

    /// Derive the next state from the previous one.
    pub fn update(&self, reducer: impl Fn(&S) -> S + 'static) {
        self.link
            .dispatch(&self.queue, move |lane| Update::reduce(reducer, lane));
    }
}

/// Runs callbacks whose state updates are tagged with the transition lane.
#[derive(Clone)]
pub struct StartTransition {
    set_pending: Dispatch<bool>,
    shared: Weak<Shared>,
}

impl StartTransition {
    /// Flag pending at the current lane, run `callback` in transition mode,
    /// then clear pending in transition mode.
    pub fn run(&self, callback: impl FnOnce()) {
        let Some(shared) = self.shared.upgrade() else {
            callback();
            return;
        };
        self.set_pending.set(true);
        let prev = shared.enter_transition();
        callback();
        self.set_pending.set(false);
        shared.exit_transition(prev);
    }
}

impl fmt::Debug for StartTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StartTransition").finish_non_exhaustive()
    }
}

// ─── Tables ────────────────────────────────────────────────────────────────

/// Hook implementations for one phase.
pub(crate) struct HookTable {
    phase: &'static str,
    state: fn(&mut HookCursor<'_>, StateInit<'_>) -> Result<usize, ProtocolViolation>,
    effect: fn(&mut HookCursor<'_>, CreateFn, Option<Vec<PropValue>>) -> Result<(), ProtocolViolation>,
    reference: fn(&mut HookCursor<'_>, RefInit<'_>) -> Result<Rc<dyn Any>, ProtocolViolation>,
}

static MOUNT: HookTable = HookTable {
    phase: "mount",
    state: mount_state,
    effect: mount_effect,
    reference: mount_ref,
};

static UPDATE: HookTable = HookTable {
    phase: "update",
    state: update_state,
    effect: update_effect,
    reference: update_ref,
};

/// Render-local hook bookkeeping.
pub(crate) struct HookCursor<'a> {
    component: Rc<str>,
    fiber: FiberId,
    lane: Lanes,
    current: Option<Vec<Hook>>,
    hooks: Vec<Hook>,
    effects: Vec<Rc<Effect>>,
    flags: Flags,
    skipped: Lanes,
    shared: Weak<Shared>,
    contexts: &'a RefCell<ContextStack>,
    suspended: Option<WakeableRef>,
    violation: Option<ProtocolViolation>,
}

impl HookCursor<'_> {
    fn violate(&mut self, violation: ProtocolViolation) -> ProtocolViolation {
        if self.violation.is_none() {
            self.violation = Some(violation.clone());
        }
        violation
    }

    fn mismatch(&mut self, index: usize, expected: &'static str, found: Option<&'static str>) -> ProtocolViolation {
        let component = Rc::clone(&self.component);
        let violation = match found {
            None => ProtocolViolation::HookCountRegression { component, index },
            Some(found) => ProtocolViolation::HookKindMismatch {
                component,
                index,
                expected,
                found,
            },
        };
        self.violate(violation)
    }

    fn link(&self) -> UpdateLink {
        UpdateLink {
            shared: Weak::clone(&self.shared),
            fiber: self.fiber,
        }
    }
}

fn mount_state(cursor: &mut HookCursor<'_>, init: StateInit<'_>) -> Result<usize, ProtocolViolation> {
    let index = cursor.hooks.len();
    cursor.hooks.push(Hook::State(init()));
    Ok(index)
}

fn update_state(cursor: &mut HookCursor<'_>, _init: StateInit<'_>) -> Result<usize, ProtocolViolation> {
    let index = cursor.hooks.len();
    let lane = cursor.lane;
    let next = match cursor.current.as_mut().and_then(|hooks| hooks.get_mut(index)) {
        Some(Hook::State(current)) => {
            current.sync_pending();
            let mut next = current.clone_box();
            let skipped = next.process(lane);
            Ok((next, skipped))
        }
        Some(other) => Err(Some(other.kind())),
        None => Err(None),
    };
    match next {
        Ok((next, skipped)) => {
            cursor.skipped |= skipped;
            cursor.hooks.push(Hook::State(next));
            Ok(index)
        }
        Err(found) => Err(cursor.mismatch(index, "state", found)),
    }
}

fn mount_effect(
    cursor: &mut HookCursor<'_>,
    create: CreateFn,
    deps: Option<Vec<PropValue>>,
) -> Result<(), ProtocolViolation> {
    cursor.flags |= Flags::PASSIVE_EFFECT;
    let effect = Rc::new(Effect::new(
        HookFlags::PASSIVE | HookFlags::HAS_EFFECT,
        create,
        Rc::default(),
        deps,
    ));
    cursor.effects.push(Rc::clone(&effect));
    cursor.hooks.push(Hook::Effect(effect));
    Ok(())
}

fn update_effect(
    cursor: &mut HookCursor<'_>,
    create: CreateFn,
    deps: Option<Vec<PropValue>>,
) -> Result<(), ProtocolViolation> {
    let index = cursor.hooks.len();
    let prev = match cursor.current.as_ref().and_then(|hooks| hooks.get(index)) {
        Some(Hook::Effect(prev)) => Rc::clone(prev),
        Some(other) => {
            let found = other.kind();
            return Err(cursor.mismatch(index, "effect", Some(found)));
        }
        None => return Err(cursor.mismatch(index, "effect", None)),
    };
    let tag = if deps_equal(prev.deps.as_deref(), deps.as_deref()) {
        HookFlags::PASSIVE
    } else {
        cursor.flags |= Flags::PASSIVE_EFFECT;
        HookFlags::PASSIVE | HookFlags::HAS_EFFECT
    };
    let effect = Rc::new(Effect::new(tag, create, Rc::clone(&prev.destroy), deps));
    cursor.effects.push(Rc::clone(&effect));
    cursor.hooks.push(Hook::Effect(effect));
    Ok(())
}

fn mount_ref(cursor: &mut HookCursor<'_>, init: RefInit<'_>) -> Result<Rc<dyn Any>, ProtocolViolation> {
    let cell = init();
    cursor.hooks.push(Hook::Ref(Rc::clone(&cell)));
    Ok(cell)
}

fn update_ref(cursor: &mut HookCursor<'_>, _init: RefInit<'_>) -> Result<Rc<dyn Any>, ProtocolViolation> {
    let index = cursor.hooks.len();
    let cell = match cursor.current.as_ref().and_then(|hooks| hooks.get(index)) {
        Some(Hook::Ref(cell)) => Rc::clone(cell),
        Some(other) => {
            let found = other.kind();
            return Err(cursor.mismatch(index, "ref", Some(found)));
        }
        None => return Err(cursor.mismatch(index, "ref", None)),
    };
    cursor.hooks.push(Hook::Ref(Rc::clone(&cell)));
    Ok(cell)
}

// ─── Public handle ─────────────────────────────────────────────────────────

/// Hook access for one component render.
pub struct Hooks<'a> {
    table: &'static HookTable,
    cursor: HookCursor<'a>,
}

impl Hooks<'_> {
    /// Name of the rendering component.
    #[must_use]
    pub fn component_name(&self) -> &str {
        &self.cursor.component
    }

    /// Lane this render services.
    #[must_use]
    pub fn render_lane(&self) -> Lane {
        self.cursor.lane
    }

    /// Fiber being rendered. Pass it to `Reconciler::schedule_update` to
    /// request a re-render from outside the component.
    #[must_use]
    pub fn fiber(&self) -> FiberId {
        self.cursor.fiber
    }

    /// `"mount"` or `"update"`.
    #[must_use]
    pub fn phase(&self) -> &'static str {
        self.table.phase
    }

    /// Component state. `init` runs only on mount.
    pub fn use_state<S: Clone + 'static>(
        &mut self,
        init: impl FnOnce() -> S,
    ) -> Result<(S, Dispatch<S>), RenderError> {
        let make: StateInit<'_> = Box::new(move || {
            Box::new(StateRecord {
                queue: Rc::new(RefCell::new(UpdateQueue::new())),
                reducer: ReducerState::new(init()),
            })
        });
        let index = (self.table.state)(&mut self.cursor, make)?;
        let link = self.cursor.link();
        let record = match &self.cursor.hooks[index] {
            Hook::State(state) => state.as_any().downcast_ref::<StateRecord<S>>(),
            _ => None,
        };
        match record {
            Some(record) => Ok((
                record.reducer.memoized.clone(),
                Dispatch {
                    queue: Rc::clone(&record.queue),
                    link,
                },
            )),
            None => {
                let found = match &self.cursor.hooks[index] {
                    Hook::State(state) => state.state_type(),
                    other => other.kind(),
                };
                Err(self
                    .cursor
                    .mismatch(index, type_name::<S>(), Some(found))
                    .into())
            }
        }
    }

    /// Passive effect. `deps: None` re-runs after every commit; otherwise
    /// the effect re-runs only when a dependency changed.
    pub fn use_effect(
        &mut self,
        create: impl FnOnce() -> Option<Cleanup> + 'static,
        deps: Option<Vec<PropValue>>,
    ) -> Result<(), RenderError> {
        (self.table.effect)(&mut self.cursor, Box::new(create), deps)?;
        Ok(())
    }

    /// A value allocated on mount and returned as-is afterwards.
    pub fn use_ref<T: 'static>(&mut self, init: impl FnOnce() -> T) -> Result<Rc<T>, RenderError> {
        let make: RefInit<'_> = Box::new(move || Rc::new(init()) as Rc<dyn Any>);
        let index = self.cursor.hooks.len();
        let cell = (self.table.reference)(&mut self.cursor, make)?;
        cell.downcast::<T>()
            .map_err(|_| self.cursor.mismatch(index, type_name::<T>(), Some("ref")).into())
    }

    /// Current value of `context` at this position.
    pub fn use_context<T: Clone + PartialEq + 'static>(&mut self, context: &Context<T>) -> T {
        context.read_from(&self.cursor.contexts.borrow())
    }

    /// Pending flag plus a starter for low-priority updates.
    pub fn use_transition(&mut self) -> Result<(bool, StartTransition), RenderError> {
        let (pending, set_pending) = self.use_state(|| false)?;
        Ok((
            pending,
            StartTransition {
                set_pending,
                shared: Weak::clone(&self.cursor.shared),
            },
        ))
    }

    /// Read a resource, suspending this render while it is pending.
    pub fn use_resource<T: Clone + 'static>(&mut self, resource: &Resource<T>) -> Result<T, RenderError> {
        match resource.state() {
            ResourceState::Fulfilled(value) => Ok(value),
            ResourceState::Rejected(message) => Err(RenderError::Failed(message)),
            ResourceState::Pending => {
                let wakeable = resource.as_wakeable();
                self.cursor.suspended = Some(Rc::clone(&wakeable));
                Err(RenderError::Suspended(wakeable))
            }
        }
    }
}

// ─── Render entry ──────────────────────────────────────────────────────────

/// What a completed component render produced.
pub(crate) struct RenderOutput {
    pub node: Node,
    pub hooks: Vec<Hook>,
    pub effects: Vec<Rc<Effect>>,
    pub flags: Flags,
    pub skipped: Lanes,
}

struct RenderingGuard<'a>(&'a Cell<bool>);

impl<'a> RenderingGuard<'a> {
    fn enter(flag: &'a Cell<bool>) -> Self {
        flag.set(true);
        Self(flag)
    }
}

impl Drop for RenderingGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// Render `component` for the work-in-progress fiber `wip`.
///
/// The committed fiber's hook list is borrowed for the duration of the
/// call and always restored, whatever the outcome.
pub(crate) fn render_with_hooks(
    arena: &mut FiberArena,
    shared: &Shared,
    wip: FiberId,
    component: &Component,
    props: &Props,
    lane: Lanes,
) -> Result<UnitOutcome<RenderOutput>, ProtocolViolation> {
    let current = arena[wip].alternate;
    let current_hooks = current.map(|id| std::mem::take(&mut arena[id].hooks));
    let expected = current_hooks.as_ref().map(Vec::len);
    let table: &'static HookTable = if current_hooks.is_some() { &UPDATE } else { &MOUNT };

    let mut hooks = Hooks {
        table,
        cursor: HookCursor {
            component: Rc::clone(component.name()),
            fiber: wip,
            lane,
            current: current_hooks,
            hooks: Vec::new(),
            effects: Vec::new(),
            flags: Flags::empty(),
            skipped: Lanes::NONE,
            shared: Weak::clone(&shared.this),
            contexts: &shared.contexts,
            suspended: None,
            violation: None,
        },
    };

    let result = {
        let _guard = RenderingGuard::enter(&shared.rendering);
        component.render(props, &mut hooks)
    };
    let cursor = hooks.cursor;
    if let Some(id) = current {
        arena[id].hooks = cursor.current.unwrap_or_default();
    }
    tracing::trace!(
        message = "hooks.render",
        component = %cursor.component,
        phase = table.phase,
        hooks = cursor.hooks.len()
    );

    if let Some(violation) = cursor.violation {
        return Err(violation);
    }
    let node = match result {
        Ok(node) => node,
        Err(RenderError::Protocol(violation)) => return Err(violation),
        Err(RenderError::Suspended(wakeable)) => return Ok(UnitOutcome::Pending(wakeable)),
        Err(RenderError::Failed(message)) => return Ok(UnitOutcome::Failed(message)),
    };
    if let Some(wakeable) = cursor.suspended {
        return Ok(UnitOutcome::Pending(wakeable));
    }
    if let Some(expected) = expected
        && cursor.hooks.len() != expected
    {
        return Err(ProtocolViolation::HookCountMismatch {
            component: cursor.component,
            expected,
            found: cursor.hooks.len(),
        });
    }
    Ok(UnitOutcome::Ready(RenderOutput {
        node,
        hooks: cursor.hooks,
        effects: cursor.effects,
        flags: cursor.flags,
        skipped: cursor.skipped,
    }))
}

// ---- Tests ----
