#![forbid(unsafe_code)]

//! Test harness for arbor.
//!
//! - [`NoopHost`]: a host renderer that keeps an in-memory tree and logs
//!   every call as a [`HostOp`].
//! - [`MockScheduler`]: a deterministic scheduler with scripted yielding.
//! - [`TestRoot`]: one root wired to both, with `act`-style settling.

pub mod mock_scheduler;
pub mod noop_host;
pub mod test_root;

pub use mock_scheduler::MockScheduler;
pub use noop_host::{HostOp, NoopHost};
pub use test_root::TestRoot;
