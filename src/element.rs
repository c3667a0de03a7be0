//! Intent-tree data shape.
//!
//! An [`Element`] is one node of the tree a caller hands to
//! [`crate::runtime::Root::render`]: a plain description of what should
//! exist, never a live object. The runtime diffs consecutive element
//! trees against its work-unit graph and mutates the host tree to match.
//!
//! Five shapes exist:
//! - [`Element::Host`] - a host node (e.g. a DOM element), with a tag,
//!   props and children
//! - [`Element::Text`] - a host text leaf
//! - [`Element::Component`] - a function component invocation site
//! - [`Element::Fragment`] - a transparent grouping with no host node
//! - [`Element::Provider`] - a context value scope
//!
//! Identity for diffing is the optional string key plus the shape's type:
//! the tag for host nodes, function identity (`Rc` pointer) for
//! components, the channel id for providers.

use std::any::Any;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::hooks::HookCtx;
use crate::host::InstanceId;

// =============================================================================
// Prop values
// =============================================================================

/// A single prop value.
///
/// Values compare structurally except for handlers, which compare by
/// `Rc` identity (two clones of the same handler are equal, two
/// separately-built closures never are). Floats compare by bit pattern
/// so a prop diff never hits NaN != NaN surprises.
#[derive(Clone)]
pub enum PropValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Handler(Rc<dyn Fn()>),
}

impl PartialEq for PropValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (PropValue::Str(a), PropValue::Str(b)) => a == b,
            (PropValue::Int(a), PropValue::Int(b)) => a == b,
            (PropValue::Float(a), PropValue::Float(b)) => a.to_bits() == b.to_bits(),
            (PropValue::Bool(a), PropValue::Bool(b)) => a == b,
            (PropValue::Handler(a), PropValue::Handler(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for PropValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropValue::Str(s) => write!(f, "{s:?}"),
            PropValue::Int(n) => write!(f, "{n}"),
            PropValue::Float(n) => write!(f, "{n}"),
            PropValue::Bool(b) => write!(f, "{b}"),
            PropValue::Handler(_) => write!(f, "<handler>"),
        }
    }
}

impl From<&str> for PropValue {
    fn from(value: &str) -> Self {
        PropValue::Str(value.to_string())
    }
}

impl From<String> for PropValue {
    fn from(value: String) -> Self {
        PropValue::Str(value)
    }
}

impl From<i64> for PropValue {
    fn from(value: i64) -> Self {
        PropValue::Int(value)
    }
}

impl From<i32> for PropValue {
    fn from(value: i32) -> Self {
        PropValue::Int(value as i64)
    }
}

impl From<f64> for PropValue {
    fn from(value: f64) -> Self {
        PropValue::Float(value)
    }
}

impl From<bool> for PropValue {
    fn from(value: bool) -> Self {
        PropValue::Bool(value)
    }
}

/// Wrap a callback as a handler prop.
pub fn handler(f: impl Fn() + 'static) -> PropValue {
    PropValue::Handler(Rc::new(f))
}

// =============================================================================
// Props
// =============================================================================

/// Ordered name/value prop map carried by host and component elements.
#[derive(Clone, PartialEq, Default, Debug)]
pub struct Props {
    entries: BTreeMap<String, PropValue>,
}

impl Props {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn set(mut self, name: impl Into<String>, value: impl Into<PropValue>) -> Self {
        self.entries.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&PropValue> {
        self.entries.get(name)
    }

    /// Convenience accessor for string props.
    pub fn str(&self, name: &str) -> Option<&str> {
        match self.entries.get(name) {
            Some(PropValue::Str(s)) => Some(s),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

// =============================================================================
// References and components
// =============================================================================

/// An external reference handle to a host instance.
///
/// Attached during the commit layout pass, detached on removal and when
/// the owning node's handle changes. Never diffed, never re-renders.
pub type NodeRef = Rc<RefCell<Option<InstanceId>>>;

/// Allocate an empty [`NodeRef`].
pub fn create_node_ref() -> NodeRef {
    Rc::new(RefCell::new(None))
}

/// A function component: invoked with a hook context and its props,
/// returns the element describing its children. Identity (for diffing)
/// is the `Rc` pointer, so clone the same handle everywhere a component
/// is used.
pub type ComponentFn = Rc<dyn Fn(&mut HookCtx, &Props) -> Element>;

/// Wrap a function as a [`ComponentFn`].
pub fn component(f: impl Fn(&mut HookCtx, &Props) -> Element + 'static) -> ComponentFn {
    Rc::new(f)
}

// =============================================================================
// Children
// =============================================================================

/// The child value carried by a host element.
///
/// The reconciler dispatches on this shape: a single element takes the
/// single-child scan, a list takes the keyed map walk. The distinction
/// is semantic, not just convenience - a one-element list still
/// reconciles as a list.
#[derive(Clone)]
pub enum Children {
    None,
    One(Box<Element>),
    Many(Vec<Element>),
}

impl From<Element> for Children {
    fn from(value: Element) -> Self {
        Children::One(Box::new(value))
    }
}

impl From<Vec<Element>> for Children {
    fn from(value: Vec<Element>) -> Self {
        Children::Many(value)
    }
}

impl From<()> for Children {
    fn from(_: ()) -> Self {
        Children::None
    }
}

impl From<&str> for Children {
    fn from(value: &str) -> Self {
        Children::One(Box::new(Element::text(value)))
    }
}

impl From<String> for Children {
    fn from(value: String) -> Self {
        Children::One(Box::new(Element::text(value)))
    }
}

// =============================================================================
// Element
// =============================================================================

/// One node of an intent tree.
#[derive(Clone)]
pub enum Element {
    Host {
        tag: String,
        key: Option<String>,
        props: Props,
        children: Children,
        node_ref: Option<NodeRef>,
    },
    Text(String),
    Component {
        func: ComponentFn,
        key: Option<String>,
        props: Props,
    },
    Fragment {
        key: Option<String>,
        children: Vec<Element>,
    },
    Provider {
        context_id: u32,
        value: Rc<dyn Any>,
        children: Vec<Element>,
    },
}

impl Element {
    /// A host node.
    pub fn host(
        tag: impl Into<String>,
        props: Props,
        children: impl Into<Children>,
    ) -> Element {
        Element::Host {
            tag: tag.into(),
            key: None,
            props,
            children: children.into(),
            node_ref: None,
        }
    }

    /// A host text leaf.
    pub fn text(content: impl Into<String>) -> Element {
        Element::Text(content.into())
    }

    /// A component invocation site. Pass the same [`ComponentFn`] handle
    /// on every render so the position reconciles as an update instead of
    /// a remount.
    pub fn from_component(func: &ComponentFn, props: Props) -> Element {
        Element::Component {
            func: func.clone(),
            key: None,
            props,
        }
    }

    /// A transparent grouping node.
    pub fn fragment(children: Vec<Element>) -> Element {
        Element::Fragment {
            key: None,
            children,
        }
    }

    /// Attach an identity key (list reconciliation).
    pub fn with_key(mut self, new_key: impl Into<String>) -> Element {
        match &mut self {
            Element::Host { key, .. }
            | Element::Component { key, .. }
            | Element::Fragment { key, .. } => *key = Some(new_key.into()),
            Element::Text(_) | Element::Provider { .. } => {}
        }
        self
    }

    /// Attach an external reference handle (host nodes only).
    pub fn with_ref(mut self, handle: NodeRef) -> Element {
        if let Element::Host { node_ref, .. } = &mut self {
            *node_ref = Some(handle);
        }
        self
    }

    pub(crate) fn key(&self) -> Option<&str> {
        match self {
            Element::Host { key, .. }
            | Element::Component { key, .. }
            | Element::Fragment { key, .. } => key.as_deref(),
            Element::Text(_) | Element::Provider { .. } => None,
        }
    }
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Element::Host { tag, key, .. } => f
                .debug_struct("Host")
                .field("tag", tag)
                .field("key", key)
                .finish_non_exhaustive(),
            Element::Text(s) => f.debug_tuple("Text").field(s).finish(),
            Element::Component { key, .. } => {
                f.debug_struct("Component").field("key", key).finish_non_exhaustive()
            }
            Element::Fragment { key, children } => f
                .debug_struct("Fragment")
                .field("key", key)
                .field("children", &children.len())
                .finish(),
            Element::Provider { context_id, .. } => f
                .debug_struct("Provider")
                .field("context_id", context_id)
                .finish_non_exhaustive(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_props_builder_and_compare() {
        let a = Props::new().set("class", "title").set("rows", 3);
        let b = Props::new().set("rows", 3).set("class", "title");
        assert_eq!(a, b);
        assert_eq!(a.str("class"), Some("title"));
        assert_eq!(a.get("rows"), Some(&PropValue::Int(3)));
        assert_ne!(a, Props::new().set("class", "title"));
    }

    #[test]
    fn test_handler_identity_compare() {
        let shared = handler(|| {});
        assert_eq!(shared, shared.clone());
        assert_ne!(handler(|| {}), handler(|| {}));
    }

    #[test]
    fn test_float_props_compare_by_bits() {
        assert_eq!(PropValue::Float(f64::NAN), PropValue::Float(f64::NAN));
        assert_ne!(PropValue::Float(0.0), PropValue::Float(-0.0));
    }

    #[test]
    fn test_with_key() {
        let el = Element::host("div", Props::new(), ()).with_key("a");
        assert_eq!(el.key(), Some("a"));
        // Text leaves carry no key.
        assert_eq!(Element::text("x").with_key("a").key(), None);
    }

    #[test]
    fn test_children_from() {
        assert!(matches!(Children::from(()), Children::None));
        assert!(matches!(
            Children::from(Element::text("x")),
            Children::One(_)
        ));
        assert!(matches!(
            Children::from(vec![Element::text("x")]),
            Children::Many(v) if v.len() == 1
        ));
    }
}
