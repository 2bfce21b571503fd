#![forbid(unsafe_code)]

//! Boundary to the host renderer.
//!
//! The reconciler drives a host through [`HostRenderer`] and never
//! interprets a [`HostHandle`]. Containers are host handles too, so the
//! same insert/append/remove calls serve both containers and instances.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use crate::element::Props;

/// Opaque reference to a host node or container.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostHandle(u64);

impl HostHandle {
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for HostHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Host mutation primitives consumed by the commit engine.
pub trait HostRenderer {
    fn create_instance(&self, ty: &str, props: &Props) -> HostHandle;

    fn create_text_instance(&self, text: &str) -> HostHandle;

    /// Append while building a detached subtree during completion.
    fn append_initial_child(&self, parent: HostHandle, child: HostHandle);

    fn append_child_to_container(&self, container: HostHandle, child: HostHandle);

    fn insert_child_to_container(&self, container: HostHandle, child: HostHandle, before: HostHandle);

    fn remove_child(&self, container: HostHandle, child: HostHandle);

    fn commit_update(&self, instance: HostHandle, props: &Props);

    fn commit_text_update(&self, instance: HostHandle, text: &str);

    /// Run `task` after the current call stack unwinds. Must not run it
    /// synchronously.
    fn schedule_microtask(&self, task: Box<dyn FnOnce()>);

    fn hide_instance(&self, _instance: HostHandle) {}

    fn unhide_instance(&self, _instance: HostHandle, _props: &Props) {}

    fn hide_text_instance(&self, _instance: HostHandle) {}

    fn unhide_text_instance(&self, _instance: HostHandle, _text: &str) {}
}

/// A cell the commit engine fills with a host node once it is attached.
#[derive(Clone, Default, Debug)]
pub struct HostRef(Rc<Cell<Option<HostHandle>>>);

impl HostRef {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self) -> Option<HostHandle> {
        self.0.get()
    }

    pub(crate) fn attach(&self, handle: HostHandle) {
        self.0.set(Some(handle));
    }

    pub(crate) fn detach(&self) {
        self.0.set(None);
    }

    #[must_use]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Rc::ptr_eq(&a.0, &b.0)
    }
}
