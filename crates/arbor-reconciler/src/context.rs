#![forbid(unsafe_code)]

//! Context values and the provider stack.
//!
//! # Design
//!
//! Each context has one current value plus a shadow stack of the values
//! it replaced. Entering a provider during the begin step pushes; the
//! provider's complete step (or its unwind) pops. The stack also keeps a
//! log of pushes so an abandoned render can be unwound to a known depth.
//!
//! # Invariants
//!
//! 1. For a well-formed traversal, every push is matched by exactly one
//!    pop in mirrored order.
//! 2. After `unwind_to(d)`, `depth() == d` and every context reads the
//!    value it had at depth `d`.
//! 3. A context with no active provider reads its default value.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHashMap;

use crate::element::{ElementBuilder, ElementType, Node};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a [`Context`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

impl ContextId {
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// A type-erased context value with its equality.
#[derive(Clone)]
pub struct ContextValue {
    value: Rc<dyn Any>,
    eq: fn(&dyn Any, &dyn Any) -> bool,
}

impl ContextValue {
    fn new<T: PartialEq + 'static>(value: T) -> Self {
        fn eq<T: PartialEq + 'static>(a: &dyn Any, b: &dyn Any) -> bool {
            match (a.downcast_ref::<T>(), b.downcast_ref::<T>()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            }
        }
        Self {
            value: Rc::new(value),
            eq: eq::<T>,
        }
    }

    /// Value equality.
    #[must_use]
    pub fn same(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.value, &other.value) || (self.eq)(&*self.value, &*other.value)
    }

    fn downcast<T: Clone + 'static>(&self) -> Option<T> {
        self.value.downcast_ref::<T>().cloned()
    }
}

impl fmt::Debug for ContextValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ContextValue(..)")
    }
}

/// A typed context with a default value.
pub struct Context<T> {
    id: ContextId,
    default: ContextValue,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Context<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            default: self.default.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Context<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context").field("id", &self.id).finish()
    }
}

impl<T: Clone + PartialEq + 'static> Context<T> {
    #[must_use]
    pub fn new(default: T) -> Self {
        Self {
            id: ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed)),
            default: ContextValue::new(default),
            _marker: PhantomData,
        }
    }

    #[must_use]
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// A provider installing `value` for `children`.
    #[must_use]
    pub fn provider(&self, value: T, children: impl Into<Node>) -> Node {
        self.provider_element(value).children(children).build()
    }

    /// Builder for a provider element, for adding a key.
    #[must_use]
    pub fn provider_element(&self, value: T) -> ElementBuilder {
        ElementBuilder::new(ElementType::Provider(self.id)).context_value(ContextValue::new(value))
    }

    pub(crate) fn read_from(&self, stack: &ContextStack) -> T {
        stack
            .current(self.id)
            .and_then(ContextValue::downcast::<T>)
            .or_else(|| self.default.downcast::<T>())
            .unwrap_or_else(|| unreachable!("context default has the context's type"))
    }
}

#[derive(Default)]
struct Slot {
    current: Option<ContextValue>,
    shadow: Vec<Option<ContextValue>>,
}

struct Push {
    id: ContextId,
    changed: bool,
}

/// Per-render provider stack.
#[derive(Default)]
pub struct ContextStack {
    slots: AHashMap<ContextId, Slot>,
    log: Vec<Push>,
    changed: usize,
}

impl ContextStack {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `value` for `id`. `changed` marks a provider whose value
    /// differs from its committed one; while any such provider is on the
    /// stack, descendants must not bail out.
    pub fn push(&mut self, id: ContextId, value: ContextValue, changed: bool) {
        let slot = self.slots.entry(id).or_default();
        let previous = slot.current.replace(value);
        slot.shadow.push(previous);
        self.log.push(Push { id, changed });
        if changed {
            self.changed += 1;
        }
    }

    /// Undo the most recent push.
    pub fn pop(&mut self) {
        let Some(push) = self.log.pop() else {
            tracing::error!(message = "context.pop_underflow");
            return;
        };
        if push.changed {
            self.changed -= 1;
        }
        if let Some(slot) = self.slots.get_mut(&push.id) {
            slot.current = slot.shadow.pop().flatten();
        }
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.log.len()
    }

    /// Pop until `depth() == depth`.
    pub fn unwind_to(&mut self, depth: usize) {
        while self.log.len() > depth {
            self.pop();
        }
    }

    /// `true` while a changed provider is on the stack.
    #[must_use]
    pub fn has_changed_provider(&self) -> bool {
        self.changed > 0
    }

    #[must_use]
    pub fn current(&self, id: ContextId) -> Option<&ContextValue> {
        self.slots.get(&id).and_then(|slot| slot.current.as_ref())
    }
}

// ---- Tests ----
