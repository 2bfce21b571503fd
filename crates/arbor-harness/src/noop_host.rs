#![forbid(unsafe_code)]

//! A host renderer that keeps an in-memory instance tree.
//!
//! Every call from the commit engine is appended to an operation log as a
//! [`HostOp`] and applied to the tree, so tests can assert both on the
//! exact mutation sequence and on the resulting structure.
//!
//! Inserting or appending a node that already has a parent moves it, the
//! way DOM `insertBefore`/`appendChild` do.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::fmt::Write as _;

use ahash::AHashMap;
use arbor_reconciler::{HostHandle, HostRenderer, PropValue, Props};

/// One recorded host call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostOp {
    CreateInstance { handle: HostHandle, ty: String },
    CreateText { handle: HostHandle, text: String },
    AppendInitial { parent: HostHandle, child: HostHandle },
    Append { parent: HostHandle, child: HostHandle },
    Insert { parent: HostHandle, child: HostHandle, before: HostHandle },
    Remove { parent: HostHandle, child: HostHandle },
    Update { handle: HostHandle },
    TextUpdate { handle: HostHandle, text: String },
    Hide { handle: HostHandle },
    Unhide { handle: HostHandle },
}

impl HostOp {
    /// `true` for operations that change the attached tree.
    #[must_use]
    pub fn is_mutation(&self) -> bool {
        !matches!(
            self,
            Self::CreateInstance { .. } | Self::CreateText { .. } | Self::AppendInitial { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum NodeKind {
    Container,
    Element { ty: String, attrs: BTreeMap<String, String> },
    Text(String),
}

#[derive(Debug, Clone)]
struct HostNode {
    kind: NodeKind,
    children: Vec<HostHandle>,
    parent: Option<HostHandle>,
    hidden: bool,
}

impl HostNode {
    fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            children: Vec::new(),
            parent: None,
            hidden: false,
        }
    }
}

fn attrs_of(props: &Props) -> BTreeMap<String, String> {
    props
        .attrs()
        .iter()
        .filter(|(_, value)| !matches!(value, PropValue::Node(_) | PropValue::Any(_)))
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
}

/// Recording host renderer.
#[derive(Default)]
pub struct NoopHost {
    nodes: RefCell<AHashMap<HostHandle, HostNode>>,
    ops: RefCell<Vec<HostOp>>,
    microtasks: RefCell<VecDeque<Box<dyn FnOnce()>>>,
    next: Cell<u64>,
}

impl std::fmt::Debug for NoopHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoopHost")
            .field("nodes", &self.nodes.borrow().len())
            .field("ops", &self.ops.borrow().len())
            .field("microtasks", &self.microtasks.borrow().len())
            .finish()
    }
}

impl NoopHost {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc(&self, kind: NodeKind) -> HostHandle {
        let raw = self.next.get() + 1;
        self.next.set(raw);
        let handle = HostHandle::new(raw);
        self.nodes.borrow_mut().insert(handle, HostNode::new(kind));
        handle
    }

    fn record(&self, op: HostOp) {
        tracing::trace!(message = "host.op", op = ?op);
        self.ops.borrow_mut().push(op);
    }

    /// A fresh, empty container.
    pub fn create_container(&self) -> HostHandle {
        self.alloc(NodeKind::Container)
    }

    /// Drain the operation log.
    pub fn take_ops(&self) -> Vec<HostOp> {
        std::mem::take(&mut *self.ops.borrow_mut())
    }

    /// Copy of the operation log.
    #[must_use]
    pub fn ops(&self) -> Vec<HostOp> {
        self.ops.borrow().clone()
    }

    /// Run queued microtasks, including ones queued while running.
    /// Returns how many ran.
    pub fn run_microtasks(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = self.microtasks.borrow_mut().pop_front();
            let Some(task) = next else {
                return ran;
            };
            task();
            ran += 1;
        }
    }

    #[must_use]
    pub fn pending_microtasks(&self) -> usize {
        self.microtasks.borrow().len()
    }

    /// Children of `parent`, in order.
    #[must_use]
    pub fn children(&self, parent: HostHandle) -> Vec<HostHandle> {
        self.nodes
            .borrow()
            .get(&parent)
            .map(|node| node.children.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn parent(&self, handle: HostHandle) -> Option<HostHandle> {
        self.nodes.borrow().get(&handle).and_then(|node| node.parent)
    }

    #[must_use]
    pub fn is_hidden(&self, handle: HostHandle) -> bool {
        self.nodes.borrow().get(&handle).is_some_and(|node| node.hidden)
    }

    /// Attribute `name` of element `handle`.
    #[must_use]
    pub fn attr(&self, handle: HostHandle, name: &str) -> Option<String> {
        match &self.nodes.borrow().get(&handle)?.kind {
            NodeKind::Element { attrs, .. } => attrs.get(name).cloned(),
            _ => None,
        }
    }

    /// Markup of everything under `root`, hidden nodes included and marked.
    #[must_use]
    pub fn markup(&self, root: HostHandle) -> String {
        let mut out = String::new();
        let nodes = self.nodes.borrow();
        for child in nodes.get(&root).map(|n| n.children.as_slice()).unwrap_or_default() {
            write_markup(&nodes, *child, &mut out, true);
        }
        out
    }

    /// Markup of the visible nodes under `root`.
    #[must_use]
    pub fn visible_markup(&self, root: HostHandle) -> String {
        let mut out = String::new();
        let nodes = self.nodes.borrow();
        for child in nodes.get(&root).map(|n| n.children.as_slice()).unwrap_or_default() {
            write_markup(&nodes, *child, &mut out, false);
        }
        out
    }

    /// Hex BLAKE3 digest of [`markup`](Self::markup), for compact
    /// comparisons between runs.
    #[must_use]
    pub fn digest(&self, root: HostHandle) -> String {
        blake3::hash(self.markup(root).as_bytes()).to_hex().to_string()
    }

    /// One line per node under `root`, indented two spaces per level.
    /// Text is quoted and hidden nodes are suffixed with ` (hidden)`.
    #[must_use]
    pub fn outline(&self, root: HostHandle) -> String {
        let nodes = self.nodes.borrow();
        let mut out = String::new();
        let mut stack: Vec<(HostHandle, usize)> = nodes
            .get(&root)
            .map(|n| n.children.iter().rev().map(|c| (*c, 0)).collect())
            .unwrap_or_default();
        while let Some((handle, depth)) = stack.pop() {
            let Some(node) = nodes.get(&handle) else {
                continue;
            };
            let _ = write!(out, "{:indent$}", "", indent = depth * 2);
            match &node.kind {
                NodeKind::Text(text) => {
                    let _ = write!(out, "{text:?}");
                }
                NodeKind::Element { ty, attrs } => {
                    out.push_str(ty);
                    for (name, value) in attrs {
                        let _ = write!(out, " {name}=\"{value}\"");
                    }
                }
                NodeKind::Container => out.push_str("container"),
            }
            if node.hidden {
                out.push_str(" (hidden)");
            }
            out.push('\n');
            stack.extend(node.children.iter().rev().map(|c| (*c, depth + 1)));
        }
        out
    }

    /// Number of nodes ever created and not yet dropped.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.borrow().len()
    }

    fn detach(nodes: &mut AHashMap<HostHandle, HostNode>, child: HostHandle) {
        let Some(old_parent) = nodes.get(&child).and_then(|node| node.parent) else {
            return;
        };
        if let Some(parent) = nodes.get_mut(&old_parent) {
            parent.children.retain(|c| *c != child);
        }
        if let Some(node) = nodes.get_mut(&child) {
            node.parent = None;
        }
    }

    fn attach(&self, parent: HostHandle, child: HostHandle, before: Option<HostHandle>) {
        let mut nodes = self.nodes.borrow_mut();
        Self::detach(&mut nodes, child);
        let Some(parent_node) = nodes.get_mut(&parent) else {
            tracing::warn!(message = "host.unknown_parent", parent = ?parent);
            return;
        };
        let position = before
            .and_then(|before| parent_node.children.iter().position(|c| *c == before))
            .unwrap_or(parent_node.children.len());
        parent_node.children.insert(position, child);
        if let Some(node) = nodes.get_mut(&child) {
            node.parent = Some(parent);
        }
    }

    fn drop_subtree(nodes: &mut AHashMap<HostHandle, HostNode>, handle: HostHandle) {
        let mut stack = vec![handle];
        while let Some(next) = stack.pop() {
            if let Some(node) = nodes.remove(&next) {
                stack.extend(node.children);
            }
        }
    }
}

fn write_markup(nodes: &AHashMap<HostHandle, HostNode>, handle: HostHandle, out: &mut String, show_hidden: bool) {
    let Some(node) = nodes.get(&handle) else {
        return;
    };
    if node.hidden && !show_hidden {
        return;
    }
    match &node.kind {
        NodeKind::Text(text) => {
            if node.hidden {
                let _ = write!(out, "<!--hidden:{text}-->");
            } else {
                out.push_str(text);
            }
        }
        NodeKind::Element { ty, attrs } => {
            let _ = write!(out, "<{ty}");
            for (name, value) in attrs {
                let _ = write!(out, " {name}=\"{value}\"");
            }
            if node.hidden {
                out.push_str(" hidden");
            }
            out.push('>');
            for child in &node.children {
                write_markup(nodes, *child, out, show_hidden);
            }
            let _ = write!(out, "</{ty}>");
        }
        NodeKind::Container => {
            for child in &node.children {
                write_markup(nodes, *child, out, show_hidden);
            }
        }
    }
}

impl HostRenderer for NoopHost {
    fn create_instance(&self, ty: &str, props: &Props) -> HostHandle {
        let handle = self.alloc(NodeKind::Element {
            ty: ty.to_owned(),
            attrs: attrs_of(props),
        });
        self.record(HostOp::CreateInstance {
            handle,
            ty: ty.to_owned(),
        });
        handle
    }

    fn create_text_instance(&self, text: &str) -> HostHandle {
        let handle = self.alloc(NodeKind::Text(text.to_owned()));
        self.record(HostOp::CreateText {
            handle,
            text: text.to_owned(),
        });
        handle
    }

    fn append_initial_child(&self, parent: HostHandle, child: HostHandle) {
        self.attach(parent, child, None);
        self.record(HostOp::AppendInitial { parent, child });
    }

    fn append_child_to_container(&self, container: HostHandle, child: HostHandle) {
        self.attach(container, child, None);
        self.record(HostOp::Append {
            parent: container,
            child,
        });
    }

    fn insert_child_to_container(&self, container: HostHandle, child: HostHandle, before: HostHandle) {
        self.attach(container, child, Some(before));
        self.record(HostOp::Insert {
            parent: container,
            child,
            before,
        });
    }

    fn remove_child(&self, container: HostHandle, child: HostHandle) {
        {
            let mut nodes = self.nodes.borrow_mut();
            if let Some(parent) = nodes.get_mut(&container) {
                parent.children.retain(|c| *c != child);
            }
            Self::drop_subtree(&mut nodes, child);
        }
        self.record(HostOp::Remove {
            parent: container,
            child,
        });
    }

    fn commit_update(&self, instance: HostHandle, props: &Props) {
        if let Some(NodeKind::Element { attrs, .. }) =
            self.nodes.borrow_mut().get_mut(&instance).map(|node| &mut node.kind)
        {
            *attrs = attrs_of(props);
        }
        self.record(HostOp::Update { handle: instance });
    }

    fn commit_text_update(&self, instance: HostHandle, text: &str) {
        if let Some(NodeKind::Text(current)) =
            self.nodes.borrow_mut().get_mut(&instance).map(|node| &mut node.kind)
        {
            text.clone_into(current);
        }
        self.record(HostOp::TextUpdate {
            handle: instance,
            text: text.to_owned(),
        });
    }

    fn schedule_microtask(&self, task: Box<dyn FnOnce()>) {
        self.microtasks.borrow_mut().push_back(task);
    }

    fn hide_instance(&self, instance: HostHandle) {
        self.set_hidden(instance, true);
    }

    fn unhide_instance(&self, instance: HostHandle, _props: &Props) {
        self.set_hidden(instance, false);
    }

    fn hide_text_instance(&self, instance: HostHandle) {
        self.set_hidden(instance, true);
    }

    fn unhide_text_instance(&self, instance: HostHandle, _text: &str) {
        self.set_hidden(instance, false);
    }
}

impl NoopHost {
    fn set_hidden(&self, handle: HostHandle, hidden: bool) {
        if let Some(node) = self.nodes.borrow_mut().get_mut(&handle) {
            node.hidden = hidden;
        }
        self.record(if hidden {
            HostOp::Hide { handle }
        } else {
            HostOp::Unhide { handle }
        });
    }
}

// ---- Tests ----
