#![forbid(unsafe_code)]

//! Asynchronous values a render can suspend on.
//!
//! A [`Resource<T>`] starts pending and settles once, either fulfilled with
//! a value or rejected with a message. Listeners registered through the
//! type-erased [`Wakeable`] view run exactly once, when the resource
//! settles, or immediately if it already has.
//!
//! # Failure Modes
//!
//! - **Settling twice**: the second `resolve`/`reject` is ignored and
//!   logged at `debug`.
//! - **Listener re-entrancy**: listeners run after the internal borrow is
//!   released, so a listener may read the resource or subscribe again.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Settlement state of a [`Resource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceState<T> {
    Pending,
    Fulfilled(T),
    Rejected(Rc<str>),
}

/// Something a suspended render waits on.
pub trait Wakeable {
    /// Stable identity, used to attach at most one retry listener per lane.
    fn id(&self) -> u64;

    fn is_settled(&self) -> bool;

    /// Run `listener` once the value settles.
    fn subscribe(&self, listener: Box<dyn FnOnce()>);
}

/// Shared handle to a [`Wakeable`].
pub type WakeableRef = Rc<dyn Wakeable>;

struct ResourceInner<T> {
    id: u64,
    label: Rc<str>,
    state: RefCell<ResourceState<T>>,
    listeners: RefCell<Vec<Box<dyn FnOnce()>>>,
}

/// A single-assignment asynchronous value.
///
/// Cloning creates a new handle to the **same** value.
pub struct Resource<T> {
    inner: Rc<ResourceInner<T>>,
}

impl<T> Clone for Resource<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Resource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label)
            .field("state", &*self.inner.state.borrow())
            .finish()
    }
}

impl<T: Clone + 'static> Resource<T> {
    /// A pending resource.
    #[must_use]
    pub fn new(label: &str) -> Self {
        Self::with_state(label, ResourceState::Pending)
    }

    /// An already fulfilled resource.
    #[must_use]
    pub fn ready(label: &str, value: T) -> Self {
        Self::with_state(label, ResourceState::Fulfilled(value))
    }

    fn with_state(label: &str, state: ResourceState<T>) -> Self {
        Self {
            inner: Rc::new(ResourceInner {
                id: NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed),
                label: Rc::from(label),
                state: RefCell::new(state),
                listeners: RefCell::new(Vec::new()),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Snapshot of the current state.
    #[must_use]
    pub fn state(&self) -> ResourceState<T> {
        self.inner.state.borrow().clone()
    }

    /// Fulfil the resource and wake every listener.
    pub fn resolve(&self, value: T) {
        self.settle(ResourceState::Fulfilled(value));
    }

    /// Reject the resource and wake every listener.
    pub fn reject(&self, message: &str) {
        self.settle(ResourceState::Rejected(Rc::from(message)));
    }

    /// Number of listeners still waiting.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.borrow().len()
    }

    /// Type-erased handle for suspension bookkeeping.
    #[must_use]
    pub fn as_wakeable(&self) -> WakeableRef {
        Rc::new(self.clone())
    }

    fn settle(&self, next: ResourceState<T>) {
        {
            let mut state = self.inner.state.borrow_mut();
            if !matches!(*state, ResourceState::Pending) {
                tracing::debug!(
                    message = "resource.settle_ignored",
                    id = self.inner.id,
                    label = %self.inner.label
                );
                return;
            }
            *state = next;
        }
        let listeners = std::mem::take(&mut *self.inner.listeners.borrow_mut());
        tracing::trace!(
            message = "resource.settled",
            id = self.inner.id,
            listeners = listeners.len()
        );
        for listener in listeners {
            listener();
        }
    }
}

impl<T: Clone + 'static> Wakeable for Resource<T> {
    fn id(&self) -> u64 {
        self.inner.id
    }

    fn is_settled(&self) -> bool {
        !matches!(*self.inner.state.borrow(), ResourceState::Pending)
    }

    fn subscribe(&self, listener: Box<dyn FnOnce()>) {
        if self.is_settled() {
            listener();
            return;
        }
        self.inner.listeners.borrow_mut().push(listener);
    }
}

// ---- Tests ----

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn listeners_run_once_on_resolve() {
        let res = Resource::<u32>::new("user");
        let hits = Rc::new(Cell::new(0));
        let wake = res.as_wakeable();
        for _ in 0..2 {
            let hits = Rc::clone(&hits);
            wake.subscribe(Box::new(move || hits.set(hits.get() + 1)));
        }
        assert_eq!(res.listener_count(), 2);
        assert!(!wake.is_settled());

        res.resolve(7);
        assert_eq!(hits.get(), 2);
        assert_eq!(res.state(), ResourceState::Fulfilled(7));
        assert_eq!(res.listener_count(), 0);

        res.resolve(8);
        assert_eq!(res.state(), ResourceState::Fulfilled(7));
        assert_eq!(hits.get(), 2);
    }

    #[test]
    fn subscribe_after_settle_fires_immediately() {
        let res = Resource::ready("cached", "hi".to_string());
        let fired = Rc::new(Cell::new(false));
        let flag = Rc::clone(&fired);
        res.as_wakeable().subscribe(Box::new(move || flag.set(true)));
        assert!(fired.get());
    }

    #[test]
    fn reject_is_terminal() {
        let res = Resource::<u8>::new("broken");
        res.reject("timeout");
        assert_eq!(res.state(), ResourceState::Rejected(Rc::from("timeout")));
        res.resolve(1);
        assert!(matches!(res.state(), ResourceState::Rejected(_)));
    }

    #[test]
    fn ids_are_distinct_and_shared_by_clones() {
        let a = Resource::<u8>::new("a");
        let b = Resource::<u8>::new("b");
        assert_ne!(a.id(), b.id());
        assert_eq!(a.clone().id(), a.id());
        assert_eq!(a.as_wakeable().id(), a.id());
    }
}
