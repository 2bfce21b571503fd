#![forbid(unsafe_code)]

//! Deterministic cooperative scheduler.
//!
//! Tasks run only when a test flushes them. The most urgent priority runs
//! first, FIFO within a priority. `should_yield` answers from a scripted
//! budget so tests control exactly where a render is interrupted.
//!
//! # Example
//!
//! ```
//! use arbor_core::{Priority, Scheduler, TaskStatus};
//! use arbor_harness::MockScheduler;
//!
//! let scheduler = MockScheduler::new();
//! scheduler.schedule_callback(Priority::Normal, Box::new(|_| TaskStatus::Complete));
//! assert_eq!(scheduler.pending(), 1);
//! assert_eq!(scheduler.flush_all(), 1);
//! ```

use std::cell::{Cell, RefCell};

use arbor_core::{CallbackToken, Priority, Scheduler, Task, TaskStatus};

struct Entry {
    seq: u64,
    priority: Priority,
    task: Task,
}

/// Upper bound on task invocations in one flush.
const FLUSH_LIMIT: usize = 10_000;

/// A scheduler driven by explicit flush calls.
#[derive(Default)]
pub struct MockScheduler {
    queue: RefCell<Vec<Entry>>,
    /// Token of the task currently executing, if any.
    running: Cell<Option<u64>>,
    /// Set when the running task cancels itself.
    running_canceled: Cell<bool>,
    next_seq: Cell<u64>,
    /// Remaining `should_yield` polls answered with `false`; `None` never yields.
    budget: Cell<Option<usize>>,
    polls: Cell<u64>,
    runs: Cell<u64>,
}

impl std::fmt::Debug for MockScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockScheduler")
            .field("pending", &self.pending())
            .field("budget", &self.budget.get())
            .field("runs", &self.runs.get())
            .finish()
    }
}

impl MockScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `should_yield` with `false` for the next `polls` calls, then
    /// `true` until the budget is reset.
    pub fn set_yield_budget(&self, polls: usize) {
        self.budget.set(Some(polls));
    }

    /// Never ask tasks to yield.
    pub fn clear_yield_budget(&self) {
        self.budget.set(None);
    }

    /// Number of queued tasks.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Priorities of queued tasks in run order.
    #[must_use]
    pub fn pending_priorities(&self) -> Vec<Priority> {
        let mut entries: Vec<(Priority, u64)> = self
            .queue
            .borrow()
            .iter()
            .map(|entry| (entry.priority, entry.seq))
            .collect();
        entries.sort_unstable();
        entries.into_iter().map(|(priority, _)| priority).collect()
    }

    /// Total `should_yield` polls so far.
    #[must_use]
    pub fn polls(&self) -> u64 {
        self.polls.get()
    }

    /// Total task invocations so far.
    #[must_use]
    pub fn runs(&self) -> u64 {
        self.runs.get()
    }

    fn pop_next(&self) -> Option<Entry> {
        let mut queue = self.queue.borrow_mut();
        let index = queue
            .iter()
            .enumerate()
            .min_by_key(|(_, entry)| (entry.priority, entry.seq))
            .map(|(index, _)| index)?;
        Some(queue.remove(index))
    }

    /// Run the most urgent task once. A task that yields is re-queued at
    /// its original position. Returns `false` when the queue was empty.
    pub fn flush_one(&self) -> bool {
        self.run_next(false)
    }

    /// Like [`flush_one`](Self::flush_one) but tells the task its deadline
    /// has passed.
    pub fn flush_one_expired(&self) -> bool {
        self.run_next(true)
    }

    fn run_next(&self, did_timeout: bool) -> bool {
        let Some(mut entry) = self.pop_next() else {
            return false;
        };
        self.running.set(Some(entry.seq));
        self.running_canceled.set(false);
        self.runs.set(self.runs.get() + 1);
        let span = tracing::trace_span!("mock_scheduler.run", seq = entry.seq, priority = %entry.priority);
        let status = span.in_scope(|| (entry.task)(did_timeout));
        self.running.set(None);
        if status == TaskStatus::Yielded && !self.running_canceled.get() {
            self.queue.borrow_mut().push(entry);
        }
        true
    }

    /// Run tasks until the queue is empty. Returns how many ran.
    ///
    /// # Panics
    ///
    /// Panics if the queue does not drain within a fixed number of runs,
    /// which means some task yields forever.
    pub fn flush_all(&self) -> usize {
        for ran in 0..FLUSH_LIMIT {
            if !self.flush_one() {
                return ran;
            }
        }
        panic!("mock scheduler did not drain after {FLUSH_LIMIT} runs");
    }

    /// Run tasks until one yields or the queue is empty. Returns how many
    /// ran, the yielding one included.
    pub fn flush_until_yield(&self) -> usize {
        let mut ran = 0;
        while let Some(mut entry) = self.pop_next() {
            ran += 1;
            self.running.set(Some(entry.seq));
            self.running_canceled.set(false);
            self.runs.set(self.runs.get() + 1);
            let status = (entry.task)(false);
            self.running.set(None);
            if status == TaskStatus::Yielded {
                if !self.running_canceled.get() {
                    self.queue.borrow_mut().push(entry);
                }
                break;
            }
        }
        ran
    }
}

impl Scheduler for MockScheduler {
    fn schedule_callback(&self, priority: Priority, task: Task) -> CallbackToken {
        let seq = self.next_seq.get() + 1;
        self.next_seq.set(seq);
        tracing::trace!(message = "mock_scheduler.schedule", seq, priority = %priority);
        self.queue.borrow_mut().push(Entry { seq, priority, task });
        CallbackToken::new(seq)
    }

    fn cancel_callback(&self, token: CallbackToken) {
        if self.running.get() == Some(token.raw()) {
            self.running_canceled.set(true);
        }
        self.queue.borrow_mut().retain(|entry| entry.seq != token.raw());
    }

    fn should_yield(&self) -> bool {
        self.polls.set(self.polls.get() + 1);
        match self.budget.get() {
            None => false,
            Some(0) => true,
            Some(n) => {
                self.budget.set(Some(n - 1));
                false
            }
        }
    }
}

// ---- Tests ----

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    fn recorder(log: &Rc<RefCell<Vec<&'static str>>>, name: &'static str) -> Task {
        let log = Rc::clone(log);
        Box::new(move |_| {
            log.borrow_mut().push(name);
            TaskStatus::Complete
        })
    }

    #[test]
    fn runs_by_priority_then_fifo() {
        let scheduler = MockScheduler::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        scheduler.schedule_callback(Priority::Low, recorder(&log, "low"));
        scheduler.schedule_callback(Priority::Normal, recorder(&log, "normal-1"));
        scheduler.schedule_callback(Priority::Immediate, recorder(&log, "immediate"));
        scheduler.schedule_callback(Priority::Normal, recorder(&log, "normal-2"));
        assert_eq!(
            scheduler.pending_priorities(),
            vec![Priority::Immediate, Priority::Normal, Priority::Normal, Priority::Low]
        );
        assert_eq!(scheduler.flush_all(), 4);
        assert_eq!(*log.borrow(), vec!["immediate", "normal-1", "normal-2", "low"]);
    }

    #[test]
    fn canceled_task_never_runs() {
        let scheduler = MockScheduler::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let token = scheduler.schedule_callback(Priority::Normal, recorder(&log, "a"));
        scheduler.cancel_callback(token);
        assert_eq!(scheduler.flush_all(), 0);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn yielded_task_is_requeued() {
        let scheduler = MockScheduler::new();
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        scheduler.schedule_callback(
            Priority::Normal,
            Box::new(move |_| {
                counter.set(counter.get() + 1);
                if counter.get() < 3 {
                    TaskStatus::Yielded
                } else {
                    TaskStatus::Complete
                }
            }),
        );
        assert_eq!(scheduler.flush_until_yield(), 1);
        assert_eq!(scheduler.pending(), 1);
        assert_eq!(scheduler.flush_all(), 2);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn yield_budget_counts_down() {
        let scheduler = MockScheduler::new();
        assert!(!scheduler.should_yield());
        scheduler.set_yield_budget(2);
        assert!(!scheduler.should_yield());
        assert!(!scheduler.should_yield());
        assert!(scheduler.should_yield());
        assert!(scheduler.should_yield());
        scheduler.clear_yield_budget();
        assert!(!scheduler.should_yield());
        assert_eq!(scheduler.polls(), 6);
    }

    #[test]
    fn expired_flag_reaches_task() {
        let scheduler = MockScheduler::new();
        let seen = Rc::new(Cell::new(false));
        let flag = Rc::clone(&seen);
        scheduler.schedule_callback(
            Priority::Idle,
            Box::new(move |did_timeout| {
                flag.set(did_timeout);
                TaskStatus::Complete
            }),
        );
        assert!(scheduler.flush_one_expired());
        assert!(seen.get());
    }
}
