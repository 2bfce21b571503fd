#![forbid(unsafe_code)]

//! Fiber arena.
//!
//! # Design
//!
//! Fibers live in one arena and refer to each other through generational
//! [`FiberId`]s. A parent owns its children through the `child`/`sibling`
//! chain; `parent` and `alternate` are plain back-references. Double
//! buffering is two arena slots per tree position, linked mutually through
//! `alternate`: the committed (current) one and the work-in-progress one.
//!
//! # Invariants
//!
//! 1. At most two fibers per tree position, paired by `alternate`, and the
//!    pairing is always mutual.
//! 2. A freed slot bumps its generation, so stale ids (e.g. held by the
//!    state setter of an unmounted component) fail [`FiberArena::get`].
//! 3. [`FiberArena::collect`] frees exactly the fibers not reachable from
//!    a committed tree or as the alternate of a reachable fiber.

use std::fmt;
use std::ops::{Index, IndexMut};
use std::rc::Rc;

use arbor_core::{Flags, Lanes, ReducerState};
use smallvec::SmallVec;

use crate::element::{Element, ElementType, Key, MODE_ATTR, Node, PropValue, Props, PropsInner};
use crate::hooks::{Effect, Hook};
use crate::host::HostHandle;
use crate::reconciler::RootId;

/// What kind of tree position a fiber represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkTag {
    FunctionComponent,
    HostComponent,
    HostText,
    HostRoot,
    Fragment,
    ContextProvider,
    SuspenseComponent,
    OffscreenComponent,
}

impl WorkTag {
    #[must_use]
    pub const fn is_host(self) -> bool {
        matches!(self, Self::HostComponent | Self::HostText)
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::FunctionComponent => "function",
            Self::HostComponent => "host",
            Self::HostText => "text",
            Self::HostRoot => "root",
            Self::Fragment => "fragment",
            Self::ContextProvider => "provider",
            Self::SuspenseComponent => "suspense",
            Self::OffscreenComponent => "offscreen",
        }
    }
}

/// Generational handle to a fiber.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FiberId {
    index: u32,
    generation: u32,
}

impl fmt::Debug for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FiberId({}v{})", self.index, self.generation)
    }
}

/// Offscreen visibility mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffscreenMode {
    Visible,
    Hidden,
}

impl OffscreenMode {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Visible => "visible",
            Self::Hidden => "hidden",
        }
    }

    pub(crate) fn of(props: &Props) -> Self {
        match props.attr(MODE_ATTR).and_then(PropValue::as_str) {
            Some("hidden") => Self::Hidden,
            _ => Self::Visible,
        }
    }

    pub(crate) fn props(self, children: Node) -> Props {
        let mut inner = PropsInner {
            children,
            ..PropsInner::default()
        };
        inner
            .attrs
            .insert(Rc::from(MODE_ATTR), PropValue::from(self.as_str()));
        Props::new(inner)
    }
}

/// One tree position in one generation.
pub struct Fiber {
    pub tag: WorkTag,
    pub key: Option<Key>,
    /// `None` for text, root, and offscreen fibers.
    pub ty: Option<ElementType>,
    pub pending_props: Props,
    pub memoized_props: Props,
    /// Hook records, in call order (function components).
    pub hooks: Vec<Hook>,
    /// Effect ring of the last render (function components).
    pub effects: Vec<Rc<Effect>>,
    /// Rendered element and its rebase state (host root).
    pub root_state: Option<ReducerState<Node>>,
    pub state_node: Option<HostHandle>,
    /// Owning root (host root fibers only).
    pub host_root: Option<RootId>,
    pub parent: Option<FiberId>,
    pub child: Option<FiberId>,
    pub sibling: Option<FiberId>,
    pub index: usize,
    pub flags: Flags,
    pub subtree_flags: Flags,
    pub deletions: SmallVec<[FiberId; 4]>,
    pub lanes: Lanes,
    pub child_lanes: Lanes,
    pub alternate: Option<FiberId>,
    /// Offscreen only: the children were reconciled from the primary node
    /// but never rendered, because the boundary mounted into its fallback.
    pub deferred: bool,
}

impl Fiber {
    #[must_use]
    pub fn new(tag: WorkTag, pending_props: Props, key: Option<Key>) -> Self {
        Self {
            tag,
            key,
            ty: None,
            pending_props,
            memoized_props: Props::empty(),
            hooks: Vec::new(),
            effects: Vec::new(),
            root_state: None,
            state_node: None,
            host_root: None,
            parent: None,
            child: None,
            sibling: None,
            index: 0,
            flags: Flags::empty(),
            subtree_flags: Flags::empty(),
            deletions: SmallVec::new(),
            lanes: Lanes::NONE,
            child_lanes: Lanes::NONE,
            alternate: None,
            deferred: false,
        }
    }

    /// A fresh fiber for `element`.
    #[must_use]
    pub fn from_element(element: &Element) -> Self {
        let tag = match &element.ty {
            ElementType::Host(_) => WorkTag::HostComponent,
            ElementType::Component(_) => WorkTag::FunctionComponent,
            ElementType::Fragment => WorkTag::Fragment,
            ElementType::Provider(_) => WorkTag::ContextProvider,
            ElementType::Suspense => WorkTag::SuspenseComponent,
        };
        let mut fiber = Self::new(tag, element.props.clone(), element.key.clone());
        fiber.ty = Some(element.ty.clone());
        fiber
    }

    /// A fresh fragment fiber wrapping `children`.
    #[must_use]
    pub fn fragment(children: Node, key: Option<Key>) -> Self {
        let mut fiber = Self::new(WorkTag::Fragment, Props::with_children(children), key);
        fiber.ty = Some(ElementType::Fragment);
        fiber
    }

    /// A fresh text fiber.
    #[must_use]
    pub fn text(text: Rc<str>) -> Self {
        Self::new(WorkTag::HostText, Props::text(text), None)
    }

    /// Display name for logs and snapshots.
    #[must_use]
    pub fn name(&self) -> Rc<str> {
        match &self.ty {
            Some(ty) => ty.name(),
            None => Rc::from(self.tag.label()),
        }
    }

    /// Host element type name, for host component fibers.
    #[must_use]
    pub fn host_type(&self) -> Option<&str> {
        match &self.ty {
            Some(ElementType::Host(ty)) => Some(ty),
            _ => None,
        }
    }
}

struct Slot {
    generation: u32,
    fiber: Option<Fiber>,
}

/// Storage for every fiber of every root.
#[derive(Default)]
pub struct FiberArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl FiberArena {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, fiber: Fiber) -> FiberId {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.fiber = Some(fiber);
            return FiberId {
                index,
                generation: slot.generation,
            };
        }
        let index = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
        self.slots.push(Slot {
            generation: 0,
            fiber: Some(fiber),
        });
        FiberId {
            index,
            generation: 0,
        }
    }

    #[must_use]
    pub fn get(&self, id: FiberId) -> Option<&Fiber> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.fiber.as_ref())
    }

    #[must_use]
    pub fn get_mut(&mut self, id: FiberId) -> Option<&mut Fiber> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.fiber.as_mut())
    }

    #[must_use]
    pub fn contains(&self, id: FiberId) -> bool {
        self.get(id).is_some()
    }

    /// Number of live fibers.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.live
    }

    fn free_slot(&mut self, index: u32) {
        let slot = &mut self.slots[index as usize];
        if slot.fiber.take().is_some() {
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(index);
            self.live -= 1;
        }
    }

    /// Children of `id`, in sibling order.
    pub fn children(&self, id: FiberId) -> impl Iterator<Item = FiberId> + '_ {
        let mut next = self[id].child;
        std::iter::from_fn(move || {
            let current = next?;
            next = self[current].sibling;
            Some(current)
        })
    }

    /// Work-in-progress fiber for the position of `current`, reusing its
    /// alternate slot when there is one.
    pub fn create_work_in_progress(&mut self, current: FiberId, pending_props: Props) -> FiberId {
        let wip = match self[current].alternate {
            Some(wip) => {
                let fiber = &mut self[wip];
                fiber.pending_props = pending_props;
                fiber.flags = Flags::empty();
                fiber.subtree_flags = Flags::empty();
                fiber.deletions.clear();
                wip
            }
            None => {
                let src = &self[current];
                let mut fiber = Fiber::new(src.tag, pending_props, src.key.clone());
                fiber.ty = src.ty.clone();
                fiber.state_node = src.state_node;
                fiber.host_root = src.host_root;
                fiber.alternate = Some(current);
                let wip = self.alloc(fiber);
                self[current].alternate = Some(wip);
                wip
            }
        };

        let src = &self[current];
        let hooks = src.hooks.clone();
        let effects = src.effects.clone();
        let root_state = src.root_state.clone();
        let memoized_props = src.memoized_props.clone();
        let (child, sibling, index) = (src.child, src.sibling, src.index);
        let (lanes, child_lanes) = (src.lanes, src.child_lanes);
        let state_node = src.state_node;
        let deferred = src.deferred;

        let fiber = &mut self[wip];
        fiber.deferred = deferred;
        fiber.hooks = hooks;
        fiber.effects = effects;
        fiber.root_state = root_state;
        fiber.memoized_props = memoized_props;
        fiber.child = child;
        fiber.sibling = sibling;
        fiber.index = index;
        fiber.lanes = lanes;
        fiber.child_lanes = child_lanes;
        fiber.state_node = state_node;
        wip
    }

    /// Free every fiber not reachable from `roots` (through child links, or
    /// as the alternate of a reachable fiber). Returns the number freed.
    pub fn collect(&mut self, roots: impl IntoIterator<Item = FiberId>) -> usize {
        let mut keep = vec![false; self.slots.len()];
        let mut visited = vec![false; self.slots.len()];
        let mut stack: Vec<FiberId> = roots.into_iter().collect();
        while let Some(id) = stack.pop() {
            let Some(fiber) = self.get(id) else {
                continue;
            };
            let index = id.index as usize;
            if visited[index] {
                continue;
            }
            visited[index] = true;
            keep[index] = true;
            if let Some(alternate) = fiber.alternate
                && self.contains(alternate)
            {
                keep[alternate.index as usize] = true;
            }
            let mut child = fiber.child;
            while let Some(c) = child {
                stack.push(c);
                child = self.get(c).and_then(|f| f.sibling);
            }
        }

        let mut freed = 0;
        for index in 0..self.slots.len() {
            if !keep[index] && self.slots[index].fiber.is_some() {
                self.free_slot(index as u32);
                freed += 1;
            }
        }
        freed
    }
}

impl Index<FiberId> for FiberArena {
    type Output = Fiber;

    fn index(&self, id: FiberId) -> &Fiber {
        match self.get(id) {
            Some(fiber) => fiber,
            None => panic!("stale fiber handle {id:?}"),
        }
    }
}

impl IndexMut<FiberId> for FiberArena {
    fn index_mut(&mut self, id: FiberId) -> &mut Fiber {
        match self.get_mut(id) {
            Some(fiber) => fiber,
            None => panic!("stale fiber handle {id:?}"),
        }
    }
}

// ---- Tests ----
