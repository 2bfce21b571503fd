#![forbid(unsafe_code)]

//! Reconciler state, scheduling, and the public entry points.
//!
//! # Design
//!
//! All mutable state lives in one [`ReconcilerState`] behind a `RefCell`
//! owned by [`Shared`]. Everything user code can reach while that borrow
//! is held (setters, pings, container updates) goes through a mailbox:
//! the request is queued, and whoever releases the borrow drains the
//! mailbox. A render or commit therefore never observes a half-applied
//! external request.
//!
//! Context values and the "currently rendering" flag sit outside the
//! state cell so component code can read them mid-render.
//!
//! # Scheduling
//!
//! Each root carries at most one scheduled callback, tagged with the lane
//! it services and a generation number. `ensure_root_is_scheduled` keeps
//! the callback in step with the root's highest pending lane, cancelling a
//! superseded one. Sync-lane work is queued and flushed from one host
//! microtask, so several sync updates in the same tick share a render.
//!
//! # Failure Modes
//!
//! - **Stale callback**: a callback whose generation no longer matches its
//!   root returns [`TaskStatus::Complete`] without doing anything.
//! - **Re-entry**: a public call made while the state is borrowed is
//!   either deferred through the mailbox or rejected with
//!   [`ReconcileError::Reentrant`].

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};

use ahash::AHashMap;
use arbor_core::{
    CallbackToken, Lane, Lanes, Priority, ReconcilerConfig, ReducerState, RootLanes, Scheduler,
    TaskStatus, Update, UpdateQueue,
};

use crate::context::{Context, ContextStack};
use crate::element::{Node, Props};
use crate::error::{ProtocolViolation, ReconcileError};
use crate::fiber::{Fiber, FiberArena, FiberId, WorkTag};
use crate::hooks::Effect;
use crate::host::{HostHandle, HostRenderer};
use crate::trace::{CommitRecord, FiberSnapshot};
use crate::work_loop::{self, RootExit};

/// Handle to a root created by [`Reconciler::create_container`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RootId(usize);

impl RootId {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }

    #[cfg(test)]
    pub(crate) const fn from_index(index: usize) -> Self {
        Self(index)
    }
}

impl fmt::Debug for RootId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RootId({})", self.0)
    }
}

/// A request deferred until the state is free.
pub(crate) enum ScheduledUpdate {
    Fiber {
        fiber: FiberId,
        lane: Lane,
    },
    Root {
        root: RootId,
        lane: Lane,
    },
    Ping {
        root: RootId,
        lane: Lane,
        wakeable: u64,
        boundary: Option<FiberId>,
        source: FiberId,
    },
}

pub(crate) struct RootCallback {
    pub lane: Lane,
    pub token: Option<CallbackToken>,
    pub generation: u64,
}

/// Passive effects owed by the last commits of one root.
#[derive(Default)]
pub(crate) struct PendingPassive {
    pub unmount: Vec<Rc<Effect>>,
    pub update: Vec<Rc<Effect>>,
}

impl PendingPassive {
    fn is_empty(&self) -> bool {
        self.unmount.is_empty() && self.update.is_empty()
    }
}

pub(crate) struct FiberRoot {
    pub current: FiberId,
    pub container: HostHandle,
    pub lanes: RootLanes,
    pub finished_work: Option<FiberId>,
    pub finished_lane: Lane,
    pub callback: Option<RootCallback>,
    pub passive_scheduled: bool,
    pub pending_passive: PendingPassive,
}

/// Key of one retry listener: resource, root, and the boundary it wakes.
pub(crate) type PingKey = (u64, RootId, Option<FiberId>);

pub(crate) struct WorkInProgress {
    pub root: RootId,
    pub lane: Lane,
    pub root_fiber: FiberId,
    /// Next fiber to begin; `None` once the root completed.
    pub next: Option<FiberId>,
    /// Suspensions and failures raised in this attempt.
    pub throws: u32,
}

pub(crate) struct ReconcilerState {
    pub fibers: FiberArena,
    pub roots: Vec<FiberRoot>,
    pub wip: Option<WorkInProgress>,
    pub sync_queue: VecDeque<RootId>,
    pub sync_flush_scheduled: bool,
    pub errors: Vec<ReconcileError>,
    pub commit_records: VecDeque<CommitRecord>,
    pub ping_cache: AHashMap<PingKey, Lanes>,
    pub next_generation: u64,
}

impl ReconcilerState {
    fn new() -> Self {
        Self {
            fibers: FiberArena::new(),
            roots: Vec::new(),
            wip: None,
            sync_queue: VecDeque::new(),
            sync_flush_scheduled: false,
            errors: Vec::new(),
            commit_records: VecDeque::new(),
            ping_cache: AHashMap::new(),
            next_generation: 0,
        }
    }

    pub(crate) fn record_error(&mut self, error: ReconcileError) {
        tracing::warn!(message = "arbor.error", error = %error);
        self.errors.push(error);
    }
}

pub(crate) struct Shared {
    pub state: RefCell<ReconcilerState>,
    pub contexts: RefCell<ContextStack>,
    pub rendering: Cell<bool>,
    pub host: Rc<dyn HostRenderer>,
    pub scheduler: Rc<dyn Scheduler>,
    pub config: ReconcilerConfig,
    pub this: Weak<Shared>,
    mailbox: RefCell<VecDeque<ScheduledUpdate>>,
    update_priority: Cell<Option<Lane>>,
    transition: Cell<bool>,
    root_queues: RefCell<Vec<Rc<RefCell<UpdateQueue<Node>>>>>,
}

impl Shared {
    pub(crate) fn new(
        host: Rc<dyn HostRenderer>,
        scheduler: Rc<dyn Scheduler>,
        config: ReconcilerConfig,
    ) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            state: RefCell::new(ReconcilerState::new()),
            contexts: RefCell::new(ContextStack::new()),
            rendering: Cell::new(false),
            host,
            scheduler,
            config,
            this: Weak::clone(this),
            mailbox: RefCell::new(VecDeque::new()),
            update_priority: Cell::new(None),
            transition: Cell::new(false),
            root_queues: RefCell::new(Vec::new()),
        })
    }

    // ─── Lane requests ─────────────────────────────────────────────────

    /// Lane for a state update requested right now.
    pub(crate) fn request_update_lane(&self) -> Lane {
        if self.transition.get() {
            return Lanes::TRANSITION;
        }
        self.update_priority.get().unwrap_or(Lanes::DEFAULT)
    }

    fn request_container_lane(&self) -> Lane {
        if self.transition.get() {
            return Lanes::TRANSITION;
        }
        self.update_priority.get().unwrap_or(Lanes::SYNC)
    }

    pub(crate) fn enter_transition(&self) -> bool {
        self.transition.replace(true)
    }

    pub(crate) fn exit_transition(&self, prev: bool) {
        self.transition.set(prev);
    }

    pub(crate) fn root_queue(&self, root: RootId) -> Option<Rc<RefCell<UpdateQueue<Node>>>> {
        self.root_queues.borrow().get(root.0).cloned()
    }

    // ─── Mailbox ───────────────────────────────────────────────────────

    pub(crate) fn schedule(&self, update: ScheduledUpdate) {
        self.mailbox.borrow_mut().push_back(update);
        self.drain_mailbox();
    }

    /// Apply queued requests while the state is free.
    pub(crate) fn drain_mailbox(&self) {
        loop {
            let Ok(mut state) = self.state.try_borrow_mut() else {
                return;
            };
            let next = self.mailbox.borrow_mut().pop_front();
            let Some(update) = next else {
                return;
            };
            self.apply_scheduled(&mut state, update);
        }
    }

    fn apply_scheduled(&self, state: &mut ReconcilerState, update: ScheduledUpdate) {
        match update {
            ScheduledUpdate::Fiber { fiber, lane } => {
                match mark_update_lane_from_fiber_to_root(&mut state.fibers, fiber, lane) {
                    Some(root) => {
                        state.roots[root.0].lanes.mark_updated(lane);
                        self.ensure_root_is_scheduled(state, root);
                    }
                    None => tracing::debug!(message = "update.dropped", fiber = ?fiber, lane = %lane),
                }
            }
            ScheduledUpdate::Root { root, lane } => {
                let current = state.roots[root.0].current;
                mark_update_lane_from_fiber_to_root(&mut state.fibers, current, lane);
                state.roots[root.0].lanes.mark_updated(lane);
                self.ensure_root_is_scheduled(state, root);
            }
            ScheduledUpdate::Ping {
                root,
                lane,
                wakeable,
                boundary,
                source,
            } => {
                state.ping_cache.remove(&(wakeable, root, boundary));
                for fiber in boundary.into_iter().chain([source]) {
                    if state.fibers.contains(fiber) {
                        mark_update_lane_from_fiber_to_root(&mut state.fibers, fiber, lane);
                    }
                }
                let current = state.roots[root.0].current;
                mark_update_lane_from_fiber_to_root(&mut state.fibers, current, lane);
                state.roots[root.0].lanes.mark_pinged(lane);
                tracing::debug!(message = "suspense.ping", root = root.0, lane = %lane, wakeable);
                self.ensure_root_is_scheduled(state, root);
            }
        }
    }

    // ─── Scheduling ────────────────────────────────────────────────────

    /// Keep `root`'s scheduled callback in step with its pending lanes.
    pub(crate) fn ensure_root_is_scheduled(&self, state: &mut ReconcilerState, root: RootId) {
        let next = state.roots[root.0].lanes.next_lane();
        let existing = state.roots[root.0]
            .callback
            .as_ref()
            .map(|callback| (callback.lane, callback.token));

        if next.is_empty() {
            if let Some((_, Some(token))) = existing {
                self.scheduler.cancel_callback(token);
            }
            state.roots[root.0].callback = None;
            return;
        }
        if let Some((lane, _)) = existing
            && lane == next
        {
            return;
        }
        if let Some((_, Some(token))) = existing {
            self.scheduler.cancel_callback(token);
        }

        state.next_generation += 1;
        let generation = state.next_generation;
        let token = if next == Lanes::SYNC {
            if !state.sync_queue.contains(&root) {
                state.sync_queue.push_back(root);
            }
            if !state.sync_flush_scheduled {
                state.sync_flush_scheduled = true;
                let this = Weak::clone(&self.this);
                self.host.schedule_microtask(Box::new(move || {
                    if let Some(shared) = this.upgrade() {
                        shared.flush_sync_work();
                    }
                }));
            }
            None
        } else {
            let this = Weak::clone(&self.this);
            let task = Box::new(move |did_timeout: bool| match this.upgrade() {
                Some(shared) => shared.perform_concurrent_work(root, generation, did_timeout),
                None => TaskStatus::Complete,
            });
            Some(self.scheduler.schedule_callback(Priority::from_lane(next), task))
        };
        tracing::trace!(message = "root.scheduled", root = root.0, lane = %next, generation);
        state.roots[root.0].callback = Some(RootCallback {
            lane: next,
            token,
            generation,
        });
    }

    fn is_current_callback(state: &ReconcilerState, root: RootId, generation: u64) -> bool {
        state
            .roots
            .get(root.0)
            .and_then(|r| r.callback.as_ref())
            .is_some_and(|callback| callback.generation == generation)
    }

    /// Render every root queued for sync work.
    pub(crate) fn flush_sync_work(&self) {
        loop {
            let next = {
                let Ok(mut state) = self.state.try_borrow_mut() else {
                    tracing::warn!(message = "sync.flush_reentrant");
                    return;
                };
                state.sync_flush_scheduled = false;
                state.sync_queue.pop_front()
            };
            let Some(root) = next else {
                break;
            };
            self.perform_sync_work_on_root(root);
        }
        self.drain_mailbox();
    }

    fn perform_sync_work_on_root(&self, root: RootId) {
        self.flush_passive_effects();
        {
            let Ok(mut guard) = self.state.try_borrow_mut() else {
                return;
            };
            let state = &mut *guard;
            let lane = state.roots[root.0].lanes.next_lane();
            if lane != Lanes::SYNC {
                self.ensure_root_is_scheduled(state, root);
                return;
            }
            let exit = work_loop::render_root(self, state, root, lane, false);
            self.finish_render(state, root, lane, exit);
        }
        self.drain_mailbox();
    }

    /// Scheduler entry for a non-sync lane.
    pub(crate) fn perform_concurrent_work(&self, root: RootId, generation: u64, did_timeout: bool) -> TaskStatus {
        match self.state.try_borrow() {
            Ok(state) if Self::is_current_callback(&state, root, generation) => {}
            Ok(_) => return TaskStatus::Complete,
            Err(_) => {
                tracing::warn!(message = "work_loop.reentrant", root = root.0);
                return TaskStatus::Complete;
            }
        }
        self.flush_passive_effects();

        {
            let Ok(mut guard) = self.state.try_borrow_mut() else {
                return TaskStatus::Complete;
            };
            let state = &mut *guard;
            if !Self::is_current_callback(state, root, generation) {
                return TaskStatus::Complete;
            }
            let lane = state.roots[root.0].lanes.next_lane();
            if lane.is_empty() {
                state.roots[root.0].callback = None;
                return TaskStatus::Complete;
            }
            let time_slice = self.config.time_slicing && !did_timeout && lane != Lanes::SYNC;
            let exit = work_loop::render_root(self, state, root, lane, time_slice);
            self.finish_render(state, root, lane, exit);
        }
        self.drain_mailbox();

        match self.state.try_borrow() {
            Ok(state) if Self::is_current_callback(&state, root, generation) => TaskStatus::Yielded,
            _ => TaskStatus::Complete,
        }
    }

    fn finish_render(&self, state: &mut ReconcilerState, root: RootId, lane: Lane, exit: RootExit) {
        match exit {
            RootExit::Completed => crate::commit::commit_root(self, state, root),
            RootExit::Incomplete => {}
            RootExit::DidNotComplete => {
                state.roots[root.0].lanes.mark_suspended(lane);
                self.ensure_root_is_scheduled(state, root);
            }
        }
    }

    // ─── Passive effects ───────────────────────────────────────────────

    /// Run every owed passive effect: unmount destroys, then update
    /// destroys, then update creates. Returns `false` if nothing was owed.
    pub(crate) fn flush_passive_effects(&self) -> bool {
        let batches: Vec<PendingPassive> = {
            let Ok(mut state) = self.state.try_borrow_mut() else {
                return false;
            };
            state
                .roots
                .iter_mut()
                .map(|root| {
                    root.passive_scheduled = false;
                    std::mem::take(&mut root.pending_passive)
                })
                .collect()
        };
        if batches.iter().all(PendingPassive::is_empty) {
            return false;
        }

        let span = tracing::debug_span!(
            "arbor.passive",
            unmount = tracing::field::Empty,
            update = tracing::field::Empty
        );
        let _guard = span.enter();
        let mut unmount = 0_u64;
        let mut update = 0_u64;
        for effect in batches.iter().flat_map(|b| &b.unmount) {
            effect.run_destroy();
            unmount += 1;
        }
        let pending = || batches.iter().flat_map(|b| &b.update).filter(|e| e.tag.is_pending());
        for effect in pending() {
            effect.run_destroy();
        }
        for effect in pending() {
            effect.run_create();
            update += 1;
        }
        span.record("unmount", unmount);
        span.record("update", update);
        drop(_guard);
        self.drain_mailbox();
        true
    }
}

/// Mark `lane` on `fiber` and on the `child_lanes` of every ancestor, in
/// both generations. Returns the owning root, or `None` for a detached or
/// freed fiber.
pub(crate) fn mark_update_lane_from_fiber_to_root(
    arena: &mut FiberArena,
    fiber: FiberId,
    lane: Lane,
) -> Option<RootId> {
    let alternate = arena.get(fiber)?.alternate;
    arena[fiber].lanes |= lane;
    if let Some(alt) = alternate.filter(|alt| arena.contains(*alt)) {
        arena[alt].lanes |= lane;
    }

    let mut node = fiber;
    loop {
        let here = &arena[node];
        let parent = here
            .parent
            .filter(|p| arena.contains(*p))
            .or_else(|| {
                here.alternate
                    .and_then(|alt| arena.get(alt))
                    .and_then(|alt| alt.parent)
                    .filter(|p| arena.contains(*p))
            });
        let Some(parent) = parent else {
            let here = &arena[node];
            return here
                .host_root
                .filter(|_| here.tag == WorkTag::HostRoot);
        };
        arena[parent].child_lanes |= lane;
        if let Some(alt) = arena[parent].alternate.filter(|alt| arena.contains(*alt)) {
            arena[alt].child_lanes |= lane;
        }
        node = parent;
    }
}

// ─── Public handle ─────────────────────────────────────────────────────────

/// The reconciler: owns every root, their fibers, and their scheduling.
///
/// Cloning yields another handle to the same reconciler.
#[derive(Clone)]
pub struct Reconciler {
    pub(crate) shared: Rc<Shared>,
}

impl fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    #[must_use]
    pub fn new(host: Rc<dyn HostRenderer>, scheduler: Rc<dyn Scheduler>, config: ReconcilerConfig) -> Self {
        Self {
            shared: Shared::new(host, scheduler, config),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ReconcilerConfig {
        &self.shared.config
    }

    /// Create a root rendering into `container`.
    pub fn create_container(&self, container: HostHandle) -> Result<RootId, ReconcileError> {
        let mut state = self
            .shared
            .state
            .try_borrow_mut()
            .map_err(|_| ReconcileError::Reentrant)?;
        let root = RootId(state.roots.len());
        let mut fiber = Fiber::new(WorkTag::HostRoot, Props::empty(), None);
        fiber.host_root = Some(root);
        fiber.state_node = Some(container);
        fiber.root_state = Some(ReducerState::new(Node::Empty));
        let current = state.fibers.alloc(fiber);
        state.roots.push(FiberRoot {
            current,
            container,
            lanes: RootLanes::default(),
            finished_work: None,
            finished_lane: Lanes::NONE,
            callback: None,
            passive_scheduled: false,
            pending_passive: PendingPassive::default(),
        });
        self.shared
            .root_queues
            .borrow_mut()
            .push(Rc::new(RefCell::new(UpdateQueue::new())));
        tracing::debug!(message = "root.created", root = root.0, container = ?container);
        Ok(root)
    }

    /// Replace what `root` renders. Returns the lane of the update.
    ///
    /// Outside any priority scope the update is synchronous: it renders and
    /// commits when the host runs its microtasks.
    pub fn update_container(&self, root: RootId, element: Node) -> Result<Lane, ReconcileError> {
        let queue = self
            .shared
            .root_queue(root)
            .ok_or(ProtocolViolation::UnknownRoot { root: root.0 })?;
        let lane = self.shared.request_container_lane();
        queue.borrow_mut().enqueue(Update::set(element, lane));
        self.shared.schedule(ScheduledUpdate::Root { root, lane });
        Ok(lane)
    }

    /// Render nothing into `root`, unmounting its tree.
    pub fn unmount_container(&self, root: RootId) -> Result<Lane, ReconcileError> {
        self.update_container(root, Node::Empty)
    }

    /// Request a re-render of `fiber` at `lane`.
    pub fn schedule_update(&self, fiber: FiberId, lane: Lane) {
        self.shared.schedule(ScheduledUpdate::Fiber { fiber, lane });
    }

    /// Run `f` with updates it requests tagged at `priority`.
    pub fn run_with_priority<R>(&self, priority: Priority, f: impl FnOnce() -> R) -> R {
        let prev = self.shared.update_priority.replace(Some(priority.lane()));
        let result = f();
        self.shared.update_priority.set(prev);
        result
    }

    /// Run `f` with updates it requests tagged as a transition.
    pub fn start_transition<R>(&self, f: impl FnOnce() -> R) -> R {
        let prev = self.shared.enter_transition();
        let result = f();
        self.shared.exit_transition(prev);
        result
    }

    /// Render and commit every root with pending sync work now.
    pub fn flush_sync_work(&self) {
        self.shared.flush_sync_work();
    }

    /// Run owed passive effects now. Returns `false` if none were owed.
    pub fn flush_passive_effects(&self) -> bool {
        self.shared.flush_passive_effects()
    }

    /// Current value of `context`; only valid while a component renders.
    pub fn read_context<T: Clone + PartialEq + 'static>(&self, context: &Context<T>) -> Result<T, ProtocolViolation> {
        if !self.shared.rendering.get() {
            return Err(ProtocolViolation::ContextReadOutsideRender);
        }
        Ok(context.read_from(&self.shared.contexts.borrow()))
    }

    /// Drain recorded errors.
    pub fn take_errors(&self) -> Result<Vec<ReconcileError>, ReconcileError> {
        let mut state = self
            .shared
            .state
            .try_borrow_mut()
            .map_err(|_| ReconcileError::Reentrant)?;
        Ok(std::mem::take(&mut state.errors))
    }

    /// Drain recorded commit snapshots (see [`ReconcilerConfig::record_commits`]).
    pub fn take_commit_records(&self) -> Result<Vec<CommitRecord>, ReconcileError> {
        let mut state = self
            .shared
            .state
            .try_borrow_mut()
            .map_err(|_| ReconcileError::Reentrant)?;
        Ok(state.commit_records.drain(..).collect())
    }

    /// Snapshot of `root`'s committed tree.
    pub fn root_snapshot(&self, root: RootId) -> Result<FiberSnapshot, ReconcileError> {
        let state = self
            .shared
            .state
            .try_borrow()
            .map_err(|_| ReconcileError::Reentrant)?;
        let fiber_root = state
            .roots
            .get(root.0)
            .ok_or(ProtocolViolation::UnknownRoot { root: root.0 })?;
        Ok(FiberSnapshot::capture(&state.fibers, fiber_root.current))
    }

    /// Lane bookkeeping of `root`.
    pub fn root_lanes(&self, root: RootId) -> Result<RootLanes, ReconcileError> {
        let state = self
            .shared
            .state
            .try_borrow()
            .map_err(|_| ReconcileError::Reentrant)?;
        state
            .roots
            .get(root.0)
            .map(|r| r.lanes)
            .ok_or_else(|| ProtocolViolation::UnknownRoot { root: root.0 }.into())
    }

    /// `true` while a render has been started and not yet finished.
    #[must_use]
    pub fn has_work_in_progress(&self) -> bool {
        self.shared
            .state
            .try_borrow()
            .map_or(true, |state| state.wip.is_some())
    }

    /// Number of live fibers across every root.
    #[must_use]
    pub fn live_fibers(&self) -> usize {
        self.shared
            .state
            .try_borrow()
            .map_or(0, |state| state.fibers.live_count())
    }
}

// ---- Tests ----
