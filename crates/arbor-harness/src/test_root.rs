#![forbid(unsafe_code)]

//! One reconciler root wired to a [`NoopHost`] and a [`MockScheduler`].
//!
//! [`TestRoot::act`] runs a closure and then drains microtasks and
//! scheduled tasks until the reconciler is idle, surfacing any error the
//! reconciler recorded on the way.

use std::rc::Rc;

use arbor_core::{Lane, ReconcilerConfig, RootLanes, Scheduler};
use arbor_reconciler::{
    CommitRecord, FiberSnapshot, HostHandle, HostRenderer, Node, ReconcileError, Reconciler, RootId,
};

use crate::mock_scheduler::MockScheduler;
use crate::noop_host::{HostOp, NoopHost};

/// Upper bound on scheduler rounds in one [`TestRoot::flush`].
const SETTLE_LIMIT: usize = 10_000;

/// A single root under test.
#[derive(Debug)]
pub struct TestRoot {
    reconciler: Reconciler,
    host: Rc<NoopHost>,
    scheduler: Rc<MockScheduler>,
    root: RootId,
    container: HostHandle,
}

impl TestRoot {
    /// A root with [`ReconcilerConfig::default`].
    ///
    /// # Panics
    ///
    /// Panics if the fresh reconciler rejects the container.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(ReconcilerConfig::default())
    }

    /// # Panics
    ///
    /// Panics if the fresh reconciler rejects the container.
    #[must_use]
    pub fn with_config(config: ReconcilerConfig) -> Self {
        let host = Rc::new(NoopHost::new());
        let scheduler = Rc::new(MockScheduler::new());
        let reconciler = Reconciler::new(
            Rc::clone(&host) as Rc<dyn HostRenderer>,
            Rc::clone(&scheduler) as Rc<dyn Scheduler>,
            config,
        );
        let container = host.create_container();
        let root = match reconciler.create_container(container) {
            Ok(root) => root,
            Err(err) => panic!("fresh reconciler rejected container: {err}"),
        };
        Self {
            reconciler,
            host,
            scheduler,
            root,
            container,
        }
    }

    /// Another root on the same reconciler, host, and scheduler.
    ///
    /// # Panics
    ///
    /// Panics if called while the reconciler is mid-render.
    #[must_use]
    pub fn sibling(&self) -> Self {
        let container = self.host.create_container();
        let root = match self.reconciler.create_container(container) {
            Ok(root) => root,
            Err(err) => panic!("sibling root rejected: {err}"),
        };
        Self {
            reconciler: self.reconciler.clone(),
            host: Rc::clone(&self.host),
            scheduler: Rc::clone(&self.scheduler),
            root,
            container,
        }
    }

    #[must_use]
    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    #[must_use]
    pub fn host(&self) -> &NoopHost {
        &self.host
    }

    #[must_use]
    pub fn scheduler(&self) -> &MockScheduler {
        &self.scheduler
    }

    #[must_use]
    pub fn id(&self) -> RootId {
        self.root
    }

    #[must_use]
    pub fn container(&self) -> HostHandle {
        self.container
    }

    /// Queue `node` for this root without running anything.
    pub fn update(&self, node: impl Into<Node>) -> Result<Lane, ReconcileError> {
        self.reconciler.update_container(self.root, node.into())
    }

    /// Render `node` and run everything it schedules.
    pub fn render(&self, node: impl Into<Node>) -> Result<Lane, ReconcileError> {
        let lane = self.update(node)?;
        self.flush()?;
        Ok(lane)
    }

    /// Unmount the tree and run everything it schedules.
    pub fn unmount(&self) -> Result<(), ReconcileError> {
        self.reconciler.unmount_container(self.root)?;
        self.flush()
    }

    /// Run `f`, then settle.
    pub fn act<R>(&self, f: impl FnOnce() -> R) -> Result<R, ReconcileError> {
        let out = f();
        self.flush()?;
        Ok(out)
    }

    /// Drain microtasks and scheduled tasks until both queues are empty.
    /// Returns the first error the reconciler recorded meanwhile.
    ///
    /// # Panics
    ///
    /// Panics if work keeps rescheduling itself without end.
    pub fn flush(&self) -> Result<(), ReconcileError> {
        for _ in 0..SETTLE_LIMIT {
            self.host.run_microtasks();
            if !self.scheduler.flush_one() {
                break;
            }
        }
        if self.scheduler.pending() > 0 || self.host.pending_microtasks() > 0 {
            panic!("reconciler did not settle after {SETTLE_LIMIT} rounds");
        }
        self.first_error()
    }

    /// Drain microtasks only, leaving scheduled tasks queued.
    pub fn flush_microtasks(&self) -> Result<(), ReconcileError> {
        self.host.run_microtasks();
        self.first_error()
    }

    fn first_error(&self) -> Result<(), ReconcileError> {
        match self.reconciler.take_errors()?.into_iter().next() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Every recorded error, drained.
    pub fn take_errors(&self) -> Result<Vec<ReconcileError>, ReconcileError> {
        self.reconciler.take_errors()
    }

    pub fn take_ops(&self) -> Vec<HostOp> {
        self.host.take_ops()
    }

    /// Drained operations that touched the attached tree.
    pub fn take_mutations(&self) -> Vec<HostOp> {
        self.host
            .take_ops()
            .into_iter()
            .filter(HostOp::is_mutation)
            .collect()
    }

    #[must_use]
    pub fn markup(&self) -> String {
        self.host.markup(self.container)
    }

    #[must_use]
    pub fn visible_markup(&self) -> String {
        self.host.visible_markup(self.container)
    }

    #[must_use]
    pub fn digest(&self) -> String {
        self.host.digest(self.container)
    }

    /// Indented outline of the host tree under the container.
    #[must_use]
    pub fn host_snapshot(&self) -> String {
        self.host.outline(self.container)
    }

    pub fn snapshot(&self) -> Result<FiberSnapshot, ReconcileError> {
        self.reconciler.root_snapshot(self.root)
    }

    pub fn lanes(&self) -> Result<RootLanes, ReconcileError> {
        self.reconciler.root_lanes(self.root)
    }

    pub fn take_commit_records(&self) -> Result<Vec<CommitRecord>, ReconcileError> {
        self.reconciler.take_commit_records()
    }
}

impl Default for TestRoot {
    fn default() -> Self {
        Self::new()
    }
}

// ---- Tests ----
