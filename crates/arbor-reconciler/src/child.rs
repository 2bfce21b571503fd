#![forbid(unsafe_code)]

//! Child reconciliation.
//!
//! Diffs the committed child list of a fiber against the node its begin
//! step produced, reusing matching fibers and flagging placements and
//! deletions on the work-in-progress side.
//!
//! # Matching
//!
//! - A single element reuses the first old child with the same key and
//!   type. Old children with other keys are deleted; a key match with a
//!   different type deletes it and everything after it.
//! - A text node reuses an old text fiber at the same position.
//! - A list maps old children by key (or by index when unkeyed) and keeps
//!   a `last_placed` index: a reused fiber whose old index is lower than
//!   `last_placed` moved right and is flagged [`Flags::PLACEMENT`].
//!   Unmatched old children are deleted in their old order.
//!
//! Effects are only tracked when the parent has a committed counterpart;
//! a freshly mounted subtree is placed once, at its top.

use ahash::AHashMap;
use arbor_core::Flags;

use crate::element::{Element, ElementType, Key, Node, Props};
use crate::fiber::{Fiber, FiberArena, FiberId, WorkTag};

#[derive(Clone, PartialEq, Eq, Hash)]
enum MapKey {
    Key(Key),
    Index(usize),
}

impl MapKey {
    fn of_fiber(fiber: &Fiber) -> Self {
        match &fiber.key {
            Some(key) => Self::Key(key.clone()),
            None => Self::Index(fiber.index),
        }
    }

    fn of_node(node: &Node, index: usize) -> Option<Self> {
        match node {
            Node::Empty => None,
            Node::Element(element) => Some(match &element.key {
                Some(key) => Self::Key(key.clone()),
                None => Self::Index(index),
            }),
            Node::Text(_) | Node::List(_) => Some(Self::Index(index)),
        }
    }
}

struct ChildReconciler<'a> {
    arena: &'a mut FiberArena,
    parent: FiberId,
    track: bool,
}

impl ChildReconciler<'_> {
    fn delete_child(&mut self, child: FiberId) {
        if !self.track {
            return;
        }
        let parent = &mut self.arena[self.parent];
        parent.deletions.push(child);
        parent.flags |= Flags::CHILD_DELETION;
    }

    fn delete_remaining(&mut self, mut next: Option<FiberId>) {
        if !self.track {
            return;
        }
        while let Some(child) = next {
            next = self.arena[child].sibling;
            self.delete_child(child);
        }
    }

    fn use_fiber(&mut self, current: FiberId, props: Props) -> FiberId {
        let wip = self.arena.create_work_in_progress(current, props);
        let fiber = &mut self.arena[wip];
        fiber.index = 0;
        fiber.sibling = None;
        fiber.parent = Some(self.parent);
        wip
    }

    fn create(&mut self, fiber: Fiber) -> FiberId {
        let id = self.arena.alloc(fiber);
        self.arena[id].parent = Some(self.parent);
        id
    }

    fn place_single(&mut self, fiber: FiberId) -> FiberId {
        let fiber_ref = &mut self.arena[fiber];
        if self.track && fiber_ref.alternate.is_none() {
            fiber_ref.flags |= Flags::PLACEMENT;
        }
        fiber
    }

    fn single_element(&mut self, mut current: Option<FiberId>, element: &Element) -> FiberId {
        while let Some(child) = current {
            let fiber = &self.arena[child];
            let sibling = fiber.sibling;
            if fiber.key == element.key {
                let same = fiber
                    .ty
                    .as_ref()
                    .is_some_and(|ty| ty.same_type(&element.ty));
                if same {
                    self.delete_remaining(sibling);
                    return self.use_fiber(child, element.props.clone());
                }
                self.delete_remaining(Some(child));
                break;
            }
            self.delete_child(child);
            current = sibling;
        }
        self.create(Fiber::from_element(element))
    }

    fn single_text(&mut self, current: Option<FiberId>, text: &std::rc::Rc<str>) -> FiberId {
        if let Some(child) = current
            && self.arena[child].tag == WorkTag::HostText
        {
            let sibling = self.arena[child].sibling;
            self.delete_remaining(sibling);
            return self.use_fiber(child, Props::text(text.clone()));
        }
        self.delete_remaining(current);
        self.create(Fiber::text(text.clone()))
    }

    fn update_from_map(
        &mut self,
        existing: &mut AHashMap<MapKey, FiberId>,
        index: usize,
        node: &Node,
    ) -> Option<FiberId> {
        let map_key = MapKey::of_node(node, index)?;
        let before = existing.get(&map_key).copied();
        match node {
            Node::Empty => None,
            Node::Text(text) => {
                if let Some(old) = before
                    && self.arena[old].tag == WorkTag::HostText
                {
                    existing.remove(&map_key);
                    return Some(self.use_fiber(old, Props::text(text.clone())));
                }
                Some(self.create(Fiber::text(text.clone())))
            }
            Node::Element(element) => {
                if let Some(old) = before {
                    let same = self.arena[old]
                        .ty
                        .as_ref()
                        .is_some_and(|ty| ty.same_type(&element.ty));
                    if same {
                        existing.remove(&map_key);
                        return Some(self.use_fiber(old, element.props.clone()));
                    }
                }
                Some(self.create(Fiber::from_element(element)))
            }
            Node::List(_) => {
                let props = Props::with_children(node.clone());
                if let Some(old) = before
                    && self.arena[old].tag == WorkTag::Fragment
                {
                    existing.remove(&map_key);
                    return Some(self.use_fiber(old, props));
                }
                Some(self.create(Fiber::fragment(node.clone(), None)))
            }
        }
    }

    fn array(&mut self, current: Option<FiberId>, items: &[Node]) -> Option<FiberId> {
        let mut old_chain = Vec::new();
        let mut existing = AHashMap::new();
        let mut next = current;
        while let Some(child) = next {
            let fiber = &self.arena[child];
            existing.insert(MapKey::of_fiber(fiber), child);
            old_chain.push(child);
            next = fiber.sibling;
        }

        let mut first: Option<FiberId> = None;
        let mut prev: Option<FiberId> = None;
        let mut last_placed = 0;
        for (index, node) in items.iter().enumerate() {
            let Some(fiber) = self.update_from_map(&mut existing, index, node) else {
                continue;
            };
            self.arena[fiber].index = index;
            self.arena[fiber].sibling = None;
            if self.track {
                match self.arena[fiber].alternate {
                    Some(old) => {
                        let old_index = self.arena[old].index;
                        if old_index < last_placed {
                            self.arena[fiber].flags |= Flags::PLACEMENT;
                        } else {
                            last_placed = old_index;
                        }
                    }
                    None => self.arena[fiber].flags |= Flags::PLACEMENT,
                }
            }
            match prev {
                Some(prev) => self.arena[prev].sibling = Some(fiber),
                None => first = Some(fiber),
            }
            prev = Some(fiber);
        }

        for old in old_chain {
            let key = MapKey::of_fiber(&self.arena[old]);
            if existing.get(&key) == Some(&old) {
                self.delete_child(old);
            }
        }
        first
    }
}

/// Reconcile `node` against the committed children starting at `current`,
/// returning the new first child of `parent`.
pub(crate) fn reconcile_child_fibers(
    arena: &mut FiberArena,
    parent: FiberId,
    current: Option<FiberId>,
    node: &Node,
    track: bool,
) -> Option<FiberId> {
    let mut reconciler = ChildReconciler {
        arena,
        parent,
        track,
    };
    let node = match node {
        Node::Element(element)
            if element.key.is_none() && matches!(element.ty, ElementType::Fragment) =>
        {
            element.props.children()
        }
        other => other,
    };
    match node {
        Node::Element(element) => {
            let fiber = reconciler.single_element(current, element);
            Some(reconciler.place_single(fiber))
        }
        Node::Text(text) => {
            let fiber = reconciler.single_text(current, text);
            Some(reconciler.place_single(fiber))
        }
        Node::List(items) => reconciler.array(current, items),
        Node::Empty => {
            reconciler.delete_remaining(current);
            None
        }
    }
}

/// Point `wip` at work-in-progress copies of its committed children.
pub(crate) fn clone_child_fibers(arena: &mut FiberArena, wip: FiberId) {
    let Some(current_child) = arena[wip].child else {
        return;
    };
    let props = arena[current_child].pending_props.clone();
    let mut new_child = arena.create_work_in_progress(current_child, props);
    arena[wip].child = Some(new_child);
    arena[new_child].parent = Some(wip);

    let mut current = arena[current_child].sibling;
    while let Some(current_sibling) = current {
        let props = arena[current_sibling].pending_props.clone();
        let next = arena.create_work_in_progress(current_sibling, props);
        arena[new_child].sibling = Some(next);
        arena[next].parent = Some(wip);
        new_child = next;
        current = arena[current_sibling].sibling;
    }
    arena[new_child].sibling = None;
}

// ---- Tests ----
