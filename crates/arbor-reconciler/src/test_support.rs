#![forbid(unsafe_code)]

//! Minimal host and scheduler for this crate's unit tests.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use arbor_core::{CallbackToken, Priority, ReconcilerConfig, Scheduler, Task, TaskStatus};

use crate::element::Props;
use crate::host::{HostHandle, HostRenderer};
use crate::reconciler::{Reconciler, ReconcilerState, RootId, Shared};

/// Host that logs one short line per call.
#[derive(Default)]
pub(crate) struct RecordingHost {
    pub log: Rc<RefCell<Vec<String>>>,
    next: Cell<u64>,
    microtasks: RefCell<VecDeque<Box<dyn FnOnce()>>>,
}

impl RecordingHost {
    fn handle(&self) -> HostHandle {
        let raw = self.next.get() + 1;
        self.next.set(raw);
        HostHandle::new(raw)
    }

    fn push(&self, line: impl Into<String>) {
        self.log.borrow_mut().push(line.into());
    }

    pub fn run_microtasks(&self) {
        loop {
            let next = self.microtasks.borrow_mut().pop_front();
            let Some(task) = next else {
                return;
            };
            task();
        }
    }
}

impl HostRenderer for RecordingHost {
    fn create_instance(&self, ty: &str, _props: &Props) -> HostHandle {
        self.push(format!("create {ty}"));
        self.handle()
    }

    fn create_text_instance(&self, text: &str) -> HostHandle {
        self.push(format!("text {text}"));
        self.handle()
    }

    fn append_initial_child(&self, _parent: HostHandle, _child: HostHandle) {
        self.push("append");
    }

    fn append_child_to_container(&self, _container: HostHandle, _child: HostHandle) {
        self.push("append");
    }

    fn insert_child_to_container(&self, _container: HostHandle, _child: HostHandle, _before: HostHandle) {
        self.push("insert");
    }

    fn remove_child(&self, _container: HostHandle, _child: HostHandle) {
        self.push("remove");
    }

    fn commit_update(&self, _instance: HostHandle, _props: &Props) {
        self.push("update");
    }

    fn commit_text_update(&self, _instance: HostHandle, text: &str) {
        self.push(format!("text_update {text}"));
    }

    fn schedule_microtask(&self, task: Box<dyn FnOnce()>) {
        self.microtasks.borrow_mut().push_back(task);
    }

    fn hide_instance(&self, _instance: HostHandle) {
        self.push("hide");
    }

    fn unhide_instance(&self, _instance: HostHandle, _props: &Props) {
        self.push("unhide");
    }

    fn hide_text_instance(&self, _instance: HostHandle) {
        self.push("hide");
    }

    fn unhide_text_instance(&self, _instance: HostHandle, _text: &str) {
        self.push("unhide");
    }
}

/// Scheduler whose tasks run only when a test asks.
#[derive(Default)]
pub(crate) struct ManualScheduler {
    tasks: RefCell<Vec<(u64, Priority, Task)>>,
    canceled: RefCell<Vec<u64>>,
    next: Cell<u64>,
    yield_after: Cell<Option<usize>>,
}

impl ManualScheduler {
    /// Answer `should_yield` with `false` `polls` times, then `true` once.
    pub fn yield_after(&self, polls: usize) {
        self.yield_after.set(Some(polls));
    }

    /// Run the most urgent task once. Returns `false` if none was queued.
    pub fn run_one(&self) -> bool {
        let next = {
            let mut tasks = self.tasks.borrow_mut();
            let best = tasks
                .iter()
                .enumerate()
                .min_by_key(|(_, (seq, priority, _))| (*priority, *seq))
                .map(|(index, _)| index);
            best.map(|index| tasks.remove(index))
        };
        let Some((seq, priority, mut task)) = next else {
            return false;
        };
        let status = task(false);
        let canceled = self.canceled.borrow().contains(&seq);
        if status == TaskStatus::Yielded && !canceled {
            self.tasks.borrow_mut().push((seq, priority, task));
        }
        true
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_callback(&self, priority: Priority, task: Task) -> CallbackToken {
        let seq = self.next.get() + 1;
        self.next.set(seq);
        self.tasks.borrow_mut().push((seq, priority, task));
        CallbackToken::new(seq)
    }

    fn cancel_callback(&self, token: CallbackToken) {
        self.tasks.borrow_mut().retain(|(seq, _, _)| *seq != token.raw());
        self.canceled.borrow_mut().push(token.raw());
    }

    fn should_yield(&self) -> bool {
        match self.yield_after.get() {
            Some(0) => {
                self.yield_after.set(None);
                true
            }
            Some(n) => {
                self.yield_after.set(Some(n - 1));
                false
            }
            None => false,
        }
    }
}

/// A reconciler wired to a recording host and a manual scheduler.
pub(crate) struct TestEnv {
    pub reconciler: Reconciler,
    pub host: Rc<RecordingHost>,
    pub scheduler: Rc<ManualScheduler>,
}

impl TestEnv {
    pub fn new(config: ReconcilerConfig) -> Self {
        let host = Rc::new(RecordingHost::default());
        let scheduler = Rc::new(ManualScheduler::default());
        let reconciler = Reconciler::new(
            Rc::clone(&host) as Rc<dyn HostRenderer>,
            Rc::clone(&scheduler) as Rc<dyn Scheduler>,
            config,
        );
        Self {
            reconciler,
            host,
            scheduler,
        }
    }

    pub fn root(&self) -> RootId {
        match self.reconciler.create_container(HostHandle::new(0)) {
            Ok(root) => root,
            Err(err) => panic!("create_container failed: {err}"),
        }
    }

    pub fn log(&self) -> Vec<String> {
        self.host.log.borrow().clone()
    }

    pub fn take_log(&self) -> Vec<String> {
        std::mem::take(&mut *self.host.log.borrow_mut())
    }

    pub fn run_microtasks(&self) {
        self.host.run_microtasks();
    }

    pub fn run_one_task(&self) {
        self.scheduler.run_one();
    }

    /// Run scheduled tasks and microtasks until both queues are empty.
    pub fn run_tasks(&self) {
        for _ in 0..1_000 {
            self.run_microtasks();
            if !self.scheduler.run_one() {
                return;
            }
        }
        panic!("scheduler did not settle");
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&ReconcilerState) -> R) -> R {
        f(&self.reconciler.shared.state.borrow())
    }
}

pub(crate) fn shared_for_tests() -> Rc<Shared> {
    recording_shared().0
}

pub(crate) fn recording_shared() -> (Rc<Shared>, Rc<RefCell<Vec<String>>>) {
    let host = Rc::new(RecordingHost::default());
    let log = Rc::clone(&host.log);
    let shared = Shared::new(
        host as Rc<dyn HostRenderer>,
        Rc::new(ManualScheduler::default()) as Rc<dyn Scheduler>,
        ReconcilerConfig::default(),
    );
    (shared, log)
}
