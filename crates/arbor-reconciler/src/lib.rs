#![forbid(unsafe_code)]

//! Reconciler: element descriptors, the fiber tree, hooks, the interruptible
//! work loop, and the commit engine.
//!
//! A [`Reconciler`] owns any number of roots. Each root renders a [`Node`]
//! tree into a host container through a [`HostRenderer`], scheduling its
//! work through an external [`arbor_core::Scheduler`].

mod begin;
mod child;
mod commit;
mod complete;
pub mod context;
pub mod element;
pub mod error;
pub(crate) mod fiber;
pub mod hooks;
pub mod host;
pub mod reconciler;
pub mod trace;
mod work_loop;

#[cfg(test)]
mod test_support;

pub use context::{Context, ContextId};
pub use element::{
    Component, Element, ElementBuilder, ElementType, Key, Node, PropValue, Props, fragment, host,
    keyed_fragment, suspense,
};
pub use error::{ProtocolViolation, ReconcileError, RenderError};
pub use fiber::{FiberId, WorkTag};
pub use hooks::{Cleanup, Dispatch, Hooks, StartTransition};
pub use host::{HostHandle, HostRef, HostRenderer};
pub use reconciler::{Reconciler, RootId};
pub use trace::{CommitRecord, FiberSnapshot};
