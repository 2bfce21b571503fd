#![forbid(unsafe_code)]

//! Core: priority lanes, effect flags, update queues, suspension resources,
//! the scheduler boundary, and reconciler configuration.

pub mod config;
pub mod flags;
pub mod lane;
pub mod resource;
pub mod scheduler;
pub mod update_queue;

pub use config::ReconcilerConfig;
pub use flags::{Flags, HookFlags};
pub use lane::{Lane, Lanes, RootLanes};
pub use resource::{Resource, ResourceState, Wakeable, WakeableRef};
pub use scheduler::{CallbackToken, Priority, Scheduler, Task, TaskStatus};
pub use update_queue::{Action, ProcessOutcome, ReducerState, Update, UpdateQueue};
