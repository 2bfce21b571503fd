#![forbid(unsafe_code)]

//! Per-state update queues and lane-aware reduction.
//!
//! # Design
//!
//! An [`UpdateQueue`] is a ring whose back is the tail and whose front is
//! the logical head, so enqueue is O(1) and draining yields updates in
//! enqueue order. Pending updates are moved into a [`ReducerState`]'s base
//! queue before reduction; the reducer then walks the base queue at one
//! render lane.
//!
//! # Invariants
//!
//! 1. Updates are processed in enqueue order, whatever their lanes.
//! 2. Once an update is skipped, every later update (applied or not) is
//!    kept in the base queue. Applied ones are re-tagged [`Lanes::NONE`] so
//!    any later render replays them.
//! 3. `base_state` is the running state just before the first skipped
//!    update, or the final state when nothing was skipped.
//! 4. Replaying the base queue from `base_state` at the skipped lanes gives
//!    the same state as processing every update in order at once.

use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use crate::lane::{Lane, Lanes};

/// How an update derives the next state.
pub enum Action<S> {
    /// Replace the state.
    Set(S),
    /// Compute the next state from the previous one.
    Reduce(Rc<dyn Fn(&S) -> S>),
}

impl<S: Clone> Action<S> {
    /// Apply this action to `prev`.
    #[must_use]
    pub fn apply(&self, prev: &S) -> S {
        match self {
            Self::Set(value) => value.clone(),
            Self::Reduce(reducer) => reducer(prev),
        }
    }
}

impl<S: Clone> Clone for Action<S> {
    fn clone(&self) -> Self {
        match self {
            Self::Set(value) => Self::Set(value.clone()),
            Self::Reduce(reducer) => Self::Reduce(Rc::clone(reducer)),
        }
    }
}

impl<S: fmt::Debug> fmt::Debug for Action<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Set(value) => f.debug_tuple("Set").field(value).finish(),
            Self::Reduce(_) => f.write_str("Reduce(..)"),
        }
    }
}

/// One requested state transition.
#[derive(Debug)]
pub struct Update<S> {
    pub action: Action<S>,
    pub lane: Lane,
}

impl<S: Clone> Clone for Update<S> {
    fn clone(&self) -> Self {
        Self {
            action: self.action.clone(),
            lane: self.lane,
        }
    }
}

impl<S> Update<S> {
    #[must_use]
    pub fn new(action: Action<S>, lane: Lane) -> Self {
        Self { action, lane }
    }

    #[must_use]
    pub fn set(value: S, lane: Lane) -> Self {
        Self::new(Action::Set(value), lane)
    }

    #[must_use]
    pub fn reduce(reducer: impl Fn(&S) -> S + 'static, lane: Lane) -> Self {
        Self::new(Action::Reduce(Rc::new(reducer)), lane)
    }
}

/// Shared pending list of one stateful unit.
///
/// Both generations of a fiber point at the same queue, so an update
/// enqueued while a render is in flight is seen by whichever generation
/// renders next.
#[derive(Debug)]
pub struct UpdateQueue<S> {
    pending: VecDeque<Update<S>>,
}

impl<S> Default for UpdateQueue<S> {
    fn default() -> Self {
        Self {
            pending: VecDeque::new(),
        }
    }
}

impl<S> UpdateQueue<S> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append at the tail.
    pub fn enqueue(&mut self, update: Update<S>) {
        self.pending.push_back(update);
    }

    /// Detach the whole pending list, head first.
    pub fn take_pending(&mut self) -> VecDeque<Update<S>> {
        std::mem::take(&mut self.pending)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Union of the lanes of every pending update.
    #[must_use]
    pub fn pending_lanes(&self) -> Lanes {
        self.pending
            .iter()
            .fold(Lanes::NONE, |acc, update| acc | update.lane)
    }
}

/// Result of one reduction pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcessOutcome {
    /// Lanes of updates left in the base queue.
    pub skipped_lanes: Lanes,
    /// Number of updates applied to the running state.
    pub applied: usize,
}

/// Memoized state plus the rebase bookkeeping for skipped updates.
#[derive(Debug, Clone)]
pub struct ReducerState<S> {
    /// State as of the last reduction.
    pub memoized: S,
    /// State to replay `base_queue` from.
    pub base_state: S,
    /// Updates not yet folded into `base_state`, in enqueue order.
    pub base_queue: VecDeque<Update<S>>,
}

impl<S: Clone> ReducerState<S> {
    #[must_use]
    pub fn new(initial: S) -> Self {
        Self {
            memoized: initial.clone(),
            base_state: initial,
            base_queue: VecDeque::new(),
        }
    }

    /// Splice a pending list onto the tail of the base queue.
    pub fn absorb(&mut self, pending: VecDeque<Update<S>>) {
        self.base_queue.extend(pending);
    }

    /// Reduce the base queue at `render_lanes`.
    pub fn process(&mut self, render_lanes: Lanes) -> ProcessOutcome {
        let queue = std::mem::take(&mut self.base_queue);
        let mut running = self.base_state.clone();
        let mut new_base_state: Option<S> = None;
        let mut outcome = ProcessOutcome::default();

        for update in queue {
            if !render_lanes.includes(update.lane) {
                if new_base_state.is_none() {
                    new_base_state = Some(running.clone());
                }
                outcome.skipped_lanes |= update.lane;
                self.base_queue.push_back(update);
                continue;
            }
            running = update.action.apply(&running);
            outcome.applied += 1;
            if new_base_state.is_some() {
                self.base_queue
                    .push_back(Update::new(update.action, Lanes::NONE));
            }
        }

        self.base_state = match new_base_state {
            Some(snapshot) => snapshot,
            None => running.clone(),
        };
        self.memoized = running;
        outcome
    }
}

// ---- Tests ----
