#![forbid(unsafe_code)]

//! Immutable element descriptors.
//!
//! A [`Node`] is what a component returns: nothing, a text leaf, one
//! [`Element`], or a list of nodes. An element carries the four fields the
//! reconciler matches on: its [`ElementType`], an optional [`Key`], and its
//! [`Props`].
//!
//! Props are reference counted. Two props values are *identical* when they
//! share an allocation, which is what the bailout check compares. Host
//! updates compare attributes structurally instead.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::context::{ContextId, ContextValue};
use crate::error::RenderError;
use crate::hooks::Hooks;
use crate::host::HostRef;

/// Attribute name selecting an offscreen subtree's visibility.
pub(crate) const MODE_ATTR: &str = "mode";
/// Attribute holding a suspense boundary's fallback node.
pub(crate) const FALLBACK_ATTR: &str = "fallback";

/// Stable identity of an element among its siblings.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(Rc<str>);

impl Key {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({:?})", &*self.0)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Self(Rc::from(value))
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Self(Rc::from(value))
    }
}

impl From<usize> for Key {
    fn from(value: usize) -> Self {
        Self(Rc::from(value.to_string()))
    }
}

impl From<u32> for Key {
    fn from(value: u32) -> Self {
        Self(Rc::from(value.to_string()))
    }
}

/// An attribute or dependency value.
#[derive(Clone)]
pub enum PropValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Node(Node),
    /// Opaque value compared by pointer identity.
    Any(Rc<dyn Any>),
}

impl PropValue {
    #[must_use]
    pub fn any<T: Any>(value: T) -> Self {
        Self::Any(Rc::new(value))
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_node(&self) -> Option<&Node> {
        match self {
            Self::Node(node) => Some(node),
            _ => None,
        }
    }
}

impl PartialEq for PropValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            // Bitwise, so NaN equals itself and 0.0 differs from -0.0.
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Node(a), Self::Node(b)) => a.same(b),
            (Self::Any(a), Self::Any(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for PropValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Node(node) => write!(f, "{node:?}"),
            Self::Any(_) => f.write_str("<any>"),
        }
    }
}

impl fmt::Display for PropValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Str(s) => f.write_str(s),
            other => write!(f, "{other:?}"),
        }
    }
}

impl From<bool> for PropValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for PropValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for PropValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u32> for PropValue {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<usize> for PropValue {
    fn from(value: usize) -> Self {
        Self::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<f64> for PropValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for PropValue {
    fn from(value: &str) -> Self {
        Self::Str(Rc::from(value))
    }
}

impl From<String> for PropValue {
    fn from(value: String) -> Self {
        Self::Str(Rc::from(value))
    }
}

impl From<Rc<str>> for PropValue {
    fn from(value: Rc<str>) -> Self {
        Self::Str(value)
    }
}

impl From<Node> for PropValue {
    fn from(value: Node) -> Self {
        Self::Node(value)
    }
}

/// Contents of a [`Props`] allocation.
#[derive(Default)]
pub struct PropsInner {
    pub attrs: BTreeMap<Rc<str>, PropValue>,
    pub children: Node,
    /// Content of a text leaf.
    pub text: Option<Rc<str>>,
    pub host_ref: Option<HostRef>,
    /// Value installed by a context provider.
    pub context_value: Option<ContextValue>,
}

/// Shared, immutable props.
#[derive(Clone, Default)]
pub struct Props(Rc<PropsInner>);

impl Props {
    #[must_use]
    pub fn new(inner: PropsInner) -> Self {
        Self(Rc::new(inner))
    }

    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Props of a text leaf.
    #[must_use]
    pub fn text(text: Rc<str>) -> Self {
        Self::new(PropsInner {
            text: Some(text),
            ..PropsInner::default()
        })
    }

    /// Props carrying only children.
    #[must_use]
    pub fn with_children(children: Node) -> Self {
        Self::new(PropsInner {
            children,
            ..PropsInner::default()
        })
    }

    #[must_use]
    pub fn attr(&self, name: &str) -> Option<&PropValue> {
        self.0.attrs.get(name)
    }

    #[must_use]
    pub fn attrs(&self) -> &BTreeMap<Rc<str>, PropValue> {
        &self.0.attrs
    }

    #[must_use]
    pub fn children(&self) -> &Node {
        &self.0.children
    }

    #[must_use]
    pub fn text_content(&self) -> Option<&str> {
        self.0.text.as_deref()
    }

    #[must_use]
    pub fn host_ref(&self) -> Option<&HostRef> {
        self.0.host_ref.as_ref()
    }

    #[must_use]
    pub fn context_value(&self) -> Option<&ContextValue> {
        self.0.context_value.as_ref()
    }

    /// Same allocation.
    #[must_use]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Rc::ptr_eq(&a.0, &b.0)
    }

    /// Attributes equal value by value.
    #[must_use]
    pub fn same_attrs(a: &Self, b: &Self) -> bool {
        Self::ptr_eq(a, b) || a.0.attrs == b.0.attrs
    }

    /// `true` if both props reference the same host ref (or neither has one).
    #[must_use]
    pub fn same_ref(a: &Self, b: &Self) -> bool {
        match (a.host_ref(), b.host_ref()) {
            (None, None) => true,
            (Some(x), Some(y)) => HostRef::ptr_eq(x, y),
            _ => false,
        }
    }
}

impl fmt::Debug for Props {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Props");
        if let Some(text) = &self.0.text {
            s.field("text", text);
        }
        if !self.0.attrs.is_empty() {
            s.field("attrs", &self.0.attrs);
        }
        if !matches!(self.0.children, Node::Empty) {
            s.field("children", &self.0.children);
        }
        s.finish()
    }
}

/// Signature of a component's render function.
pub type RenderFn = dyn Fn(&Props, &mut Hooks<'_>) -> Result<Node, RenderError>;

/// A named render function. Identity is the function allocation.
#[derive(Clone)]
pub struct Component {
    name: Rc<str>,
    render: Rc<RenderFn>,
}

impl Component {
    pub fn new(
        name: &str,
        render: impl Fn(&Props, &mut Hooks<'_>) -> Result<Node, RenderError> + 'static,
    ) -> Self {
        Self {
            name: Rc::from(name),
            render: Rc::new(render),
        }
    }

    #[must_use]
    pub fn name(&self) -> &Rc<str> {
        &self.name
    }

    /// Start an element rendering this component.
    #[must_use]
    pub fn element(&self) -> ElementBuilder {
        ElementBuilder::new(ElementType::Component(self.clone()))
    }

    /// Element rendering this component with no props.
    #[must_use]
    pub fn node(&self) -> Node {
        self.element().build()
    }

    #[must_use]
    pub fn same(a: &Self, b: &Self) -> bool {
        Rc::ptr_eq(&a.render, &b.render)
    }

    pub(crate) fn render(&self, props: &Props, hooks: &mut Hooks<'_>) -> Result<Node, RenderError> {
        (self.render)(props, hooks)
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Component({})", self.name)
    }
}

/// What an element renders as.
#[derive(Clone, Debug)]
pub enum ElementType {
    /// A host node, e.g. `"div"`.
    Host(Rc<str>),
    Component(Component),
    /// Groups children without a host node.
    Fragment,
    /// Installs a context value for its subtree.
    Provider(ContextId),
    /// Shows a fallback while its children wait on data.
    Suspense,
}

impl ElementType {
    /// Whether a fiber of type `self` can be reused for an element of type
    /// `other`.
    #[must_use]
    pub fn same_type(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Host(a), Self::Host(b)) => a == b,
            (Self::Component(a), Self::Component(b)) => Component::same(a, b),
            (Self::Fragment, Self::Fragment) | (Self::Suspense, Self::Suspense) => true,
            (Self::Provider(a), Self::Provider(b)) => a == b,
            _ => false,
        }
    }

    /// Display name for logs and snapshots.
    #[must_use]
    pub fn name(&self) -> Rc<str> {
        match self {
            Self::Host(ty) => Rc::clone(ty),
            Self::Component(component) => Rc::clone(component.name()),
            Self::Fragment => Rc::from("Fragment"),
            Self::Provider(_) => Rc::from("Provider"),
            Self::Suspense => Rc::from("Suspense"),
        }
    }
}

/// One element descriptor.
#[derive(Clone, Debug)]
pub struct Element {
    pub ty: ElementType,
    pub key: Option<Key>,
    pub props: Props,
}

impl Element {
    #[must_use]
    pub fn new(ty: ElementType, key: Option<Key>, props: Props) -> Self {
        Self { ty, key, props }
    }
}

/// A renderable value.
#[derive(Clone, Default)]
pub enum Node {
    #[default]
    Empty,
    Text(Rc<str>),
    Element(Rc<Element>),
    List(Rc<[Node]>),
}

impl Node {
    #[must_use]
    pub fn text(text: impl Into<Rc<str>>) -> Self {
        Self::Text(text.into())
    }

    #[must_use]
    pub fn list(items: impl IntoIterator<Item = Node>) -> Self {
        Self::List(items.into_iter().collect())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Identity comparison: text by value, elements and lists by allocation.
    #[must_use]
    pub fn same(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Empty, Self::Empty) => true,
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Element(a), Self::Element(b)) => Rc::ptr_eq(a, b),
            (Self::List(a), Self::List(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Text(text) => write!(f, "{text:?}"),
            Self::Element(element) => {
                write!(f, "<{}", element.ty.name())?;
                if let Some(key) = &element.key {
                    write!(f, " key={key}")?;
                }
                write!(f, " {:?}>", element.props)
            }
            Self::List(items) => f.debug_list().entries(items.iter()).finish(),
        }
    }
}

impl From<Element> for Node {
    fn from(element: Element) -> Self {
        Self::Element(Rc::new(element))
    }
}

impl From<&str> for Node {
    fn from(text: &str) -> Self {
        Self::Text(Rc::from(text))
    }
}

impl From<String> for Node {
    fn from(text: String) -> Self {
        Self::Text(Rc::from(text))
    }
}

impl From<i64> for Node {
    fn from(n: i64) -> Self {
        Self::Text(Rc::from(n.to_string()))
    }
}

impl From<Vec<Node>> for Node {
    fn from(items: Vec<Node>) -> Self {
        Self::List(Rc::from(items))
    }
}

/// Incremental element construction.
pub struct ElementBuilder {
    ty: ElementType,
    key: Option<Key>,
    props: PropsInner,
    children: Vec<Node>,
    explicit_children: Option<Node>,
}

impl ElementBuilder {
    #[must_use]
    pub fn new(ty: ElementType) -> Self {
        Self {
            ty,
            key: None,
            props: PropsInner::default(),
            children: Vec::new(),
            explicit_children: None,
        }
    }

    #[must_use]
    pub fn key(mut self, key: impl Into<Key>) -> Self {
        self.key = Some(key.into());
        self
    }

    #[must_use]
    pub fn attr(mut self, name: &str, value: impl Into<PropValue>) -> Self {
        self.props.attrs.insert(Rc::from(name), value.into());
        self
    }

    /// Append one child.
    #[must_use]
    pub fn child(mut self, child: impl Into<Node>) -> Self {
        self.children.push(child.into());
        self
    }

    /// Set the children node as-is (a list stays one keyed array).
    #[must_use]
    pub fn children(mut self, children: impl Into<Node>) -> Self {
        self.explicit_children = Some(children.into());
        self
    }

    #[must_use]
    pub fn host_ref(mut self, host_ref: &HostRef) -> Self {
        self.props.host_ref = Some(host_ref.clone());
        self
    }

    #[must_use]
    pub(crate) fn context_value(mut self, value: ContextValue) -> Self {
        self.props.context_value = Some(value);
        self
    }

    #[must_use]
    pub fn build_element(mut self) -> Element {
        self.props.children = match self.explicit_children {
            Some(children) => children,
            None => match self.children.len() {
                0 => Node::Empty,
                1 => self.children.pop().unwrap_or_default(),
                _ => Node::List(Rc::from(self.children)),
            },
        };
        Element::new(self.ty, self.key, Props::new(self.props))
    }

    #[must_use]
    pub fn build(self) -> Node {
        Node::from(self.build_element())
    }
}

/// Start a host element.
#[must_use]
pub fn host(ty: &str) -> ElementBuilder {
    ElementBuilder::new(ElementType::Host(Rc::from(ty)))
}

/// An unkeyed fragment; reconciled as its children.
#[must_use]
pub fn fragment(children: impl IntoIterator<Item = Node>) -> Node {
    ElementBuilder::new(ElementType::Fragment)
        .children(Node::list(children))
        .build()
}

/// A keyed fragment; reconciled as one sibling.
#[must_use]
pub fn keyed_fragment(key: impl Into<Key>, children: impl IntoIterator<Item = Node>) -> Node {
    ElementBuilder::new(ElementType::Fragment)
        .key(key)
        .children(Node::list(children))
        .build()
}

/// A suspense boundary showing `fallback` while `children` wait on data.
#[must_use]
pub fn suspense(fallback: impl Into<Node>, children: impl Into<Node>) -> Node {
    ElementBuilder::new(ElementType::Suspense)
        .attr(FALLBACK_ATTR, PropValue::Node(fallback.into()))
        .children(children)
        .build()
}

// ---- Tests ----

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_collapses_single_child() {
        let node = host("div").child("hi").build();
        let Node::Element(el) = &node else {
            panic!("expected element");
        };
        assert!(matches!(el.props.children(), Node::Text(t) if &**t == "hi"));

        let node = host("ul").child("a").child("b").build();
        let Node::Element(el) = &node else {
            panic!("expected element");
        };
        assert!(matches!(el.props.children(), Node::List(items) if items.len() == 2));
    }

    #[test]
    fn same_type_rules() {
        let a = Component::new("A", |_, _| Ok(Node::Empty));
        let a2 = a.clone();
        let b = Component::new("A", |_, _| Ok(Node::Empty));
        assert!(ElementType::Component(a.clone()).same_type(&ElementType::Component(a2)));
        assert!(!ElementType::Component(a).same_type(&ElementType::Component(b)));
        assert!(ElementType::Host("div".into()).same_type(&ElementType::Host("div".into())));
        assert!(!ElementType::Host("div".into()).same_type(&ElementType::Fragment));
    }

    #[test]
    fn prop_value_equality() {
        assert_eq!(PropValue::from(1), PropValue::Int(1));
        assert_ne!(PropValue::from(1), PropValue::from("1"));
        assert_eq!(PropValue::Float(f64::NAN), PropValue::Float(f64::NAN));
        let shared = Rc::new(5_u8) as Rc<dyn Any>;
        assert_eq!(PropValue::Any(shared.clone()), PropValue::Any(shared));
        assert_ne!(PropValue::any(5_u8), PropValue::any(5_u8));
    }

    #[test]
    fn props_identity_vs_attrs() {
        let a = host("div").attr("id", "x").build_element().props;
        let b = host("div").attr("id", "x").build_element().props;
        assert!(!Props::ptr_eq(&a, &b));
        assert!(Props::same_attrs(&a, &b));
        assert!(Props::ptr_eq(&a, &a.clone()));
    }

    #[test]
    fn suspense_stores_fallback() {
        let node = suspense("loading", host("p").build());
        let Node::Element(el) = &node else {
            panic!("expected element");
        };
        let fallback = el.props.attr(FALLBACK_ATTR).and_then(PropValue::as_node);
        assert!(matches!(fallback, Some(Node::Text(t)) if &**t == "loading"));
    }
}
