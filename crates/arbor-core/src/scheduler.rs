#![forbid(unsafe_code)]

//! Boundary to the external cooperative task scheduler.
//!
//! The reconciler never owns a timer or a task queue. It hands boxed tasks
//! to a [`Scheduler`] at a [`Priority`] derived one-to-one from a lane, and
//! polls [`Scheduler::should_yield`] between units of work.
//!
//! A task returns [`TaskStatus::Yielded`] when it stopped early and wants
//! the scheduler to invoke the same callback again later.

use std::fmt;

use crate::lane::{Lane, Lanes};

/// Scheduler priority levels, most urgent first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Immediate,
    UserBlocking,
    Normal,
    Low,
    Idle,
}

impl Priority {
    /// Priority that services `lane`. The most urgent lane of a set wins.
    #[must_use]
    pub fn from_lane(lane: Lane) -> Self {
        match lane.highest_priority() {
            Lanes::SYNC => Self::Immediate,
            Lanes::INPUT_CONTINUOUS => Self::UserBlocking,
            Lanes::DEFAULT => Self::Normal,
            Lanes::TRANSITION => Self::Low,
            _ => Self::Idle,
        }
    }

    /// Lane tagged on updates requested at this priority.
    #[must_use]
    pub const fn lane(self) -> Lane {
        match self {
            Self::Immediate => Lanes::SYNC,
            Self::UserBlocking => Lanes::INPUT_CONTINUOUS,
            Self::Normal => Lanes::DEFAULT,
            Self::Low => Lanes::TRANSITION,
            Self::Idle => Lanes::IDLE,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Immediate => "immediate",
            Self::UserBlocking => "user-blocking",
            Self::Normal => "normal",
            Self::Low => "low",
            Self::Idle => "idle",
        };
        f.write_str(name)
    }
}

/// What a task reports back to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Done; drop the callback.
    Complete,
    /// Interrupted; invoke the same callback again later.
    Yielded,
}

/// A schedulable unit. The argument is `true` when the task's deadline has
/// already passed and it should finish without yielding.
pub type Task = Box<dyn FnMut(bool) -> TaskStatus>;

/// Opaque handle to a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackToken(u64);

impl CallbackToken {
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Cooperative task scheduler consumed by the reconciler.
///
/// Implementations must not invoke a task from inside
/// [`schedule_callback`](Scheduler::schedule_callback); tasks run later,
/// from the scheduler's own loop.
pub trait Scheduler {
    fn schedule_callback(&self, priority: Priority, task: Task) -> CallbackToken;

    /// Withdraw a task that has not run yet. Unknown tokens are ignored.
    fn cancel_callback(&self, token: CallbackToken);

    /// `true` when the current task should return control.
    fn should_yield(&self) -> bool;
}

// ---- Tests ----

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lanes_map_one_to_one() {
        for lane in Lanes::ALL {
            assert_eq!(Priority::from_lane(lane).lane(), lane);
        }
    }

    #[test]
    fn mixed_set_maps_to_most_urgent() {
        assert_eq!(
            Priority::from_lane(Lanes::TRANSITION | Lanes::INPUT_CONTINUOUS),
            Priority::UserBlocking
        );
        assert!(Priority::Immediate < Priority::Idle);
    }
}
