//! Host-tree contract - the seam between the runtime and the platform.
//!
//! The runtime never touches a real platform tree. Everything it does to
//! the outside world goes through the [`Host`] trait: create an instance,
//! insert it somewhere, push a staged update, remove it. A binding layer
//! (DOM, terminal, scene graph) implements these seven primitives and the
//! reconciler drives them during commit.
//!
//! [`MemoryHost`] is the reference implementation: an in-memory node tree
//! with an operation log, used by the test suite and doc examples to
//! assert exactly which mutations a commit performed.

use std::cell::RefCell;
use std::rc::Rc;

use crate::element::{PropValue, Props};

/// Opaque handle to a host instance (or container). Issued by the host,
/// meaningless to the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceId(pub u64);

/// Payload of an incremental commit to an existing instance.
#[derive(Debug)]
pub enum HostUpdate<'a> {
    /// New content for a text instance.
    Text(&'a str),
    /// New props for an element instance.
    Props(&'a Props),
}

/// The mutation primitives the commit phase consumes.
pub trait Host {
    /// Create an instance for a host element. Children arrive separately
    /// through [`Host::append_initial_child`].
    fn create_instance(&mut self, tag: &str, props: &Props) -> InstanceId;

    /// Create an instance for a text leaf.
    fn create_text_instance(&mut self, text: &str) -> InstanceId;

    /// Attach a child while building an off-tree subtree (before the
    /// subtree itself is placed).
    fn append_initial_child(&mut self, parent: InstanceId, child: InstanceId);

    /// Append a child at the end of an attached container.
    fn append_child_to_container(&mut self, container: InstanceId, child: InstanceId);

    /// Insert (or move) a child immediately before `before`.
    fn insert_child_in_container(
        &mut self,
        container: InstanceId,
        child: InstanceId,
        before: InstanceId,
    );

    /// Detach a child from an attached container.
    fn remove_child(&mut self, container: InstanceId, child: InstanceId);

    /// Push staged prop/content changes to an existing instance.
    fn commit_update(&mut self, instance: InstanceId, update: HostUpdate<'_>);
}

/// Shared-handle forwarding so an embedder can keep a handle to its host
/// while the runtime owns another.
impl<H: Host> Host for Rc<RefCell<H>> {
    fn create_instance(&mut self, tag: &str, props: &Props) -> InstanceId {
        self.borrow_mut().create_instance(tag, props)
    }

    fn create_text_instance(&mut self, text: &str) -> InstanceId {
        self.borrow_mut().create_text_instance(text)
    }

    fn append_initial_child(&mut self, parent: InstanceId, child: InstanceId) {
        self.borrow_mut().append_initial_child(parent, child)
    }

    fn append_child_to_container(&mut self, container: InstanceId, child: InstanceId) {
        self.borrow_mut().append_child_to_container(container, child)
    }

    fn insert_child_in_container(
        &mut self,
        container: InstanceId,
        child: InstanceId,
        before: InstanceId,
    ) {
        self.borrow_mut()
            .insert_child_in_container(container, child, before)
    }

    fn remove_child(&mut self, container: InstanceId, child: InstanceId) {
        self.borrow_mut().remove_child(container, child)
    }

    fn commit_update(&mut self, instance: InstanceId, update: HostUpdate<'_>) {
        self.borrow_mut().commit_update(instance, update)
    }
}

// =============================================================================
// MemoryHost
// =============================================================================

/// One recorded host mutation, for test assertions.
#[derive(Debug, Clone, PartialEq)]
pub enum HostOp {
    Create { id: InstanceId, tag: String },
    CreateText { id: InstanceId, text: String },
    AppendInitial { parent: InstanceId, child: InstanceId },
    Append { container: InstanceId, child: InstanceId },
    Insert { container: InstanceId, child: InstanceId, before: InstanceId },
    Remove { container: InstanceId, child: InstanceId },
    UpdateText { instance: InstanceId, text: String },
    UpdateProps { instance: InstanceId },
}

impl HostOp {
    /// Whether the op mutates an attached tree (creation and off-tree
    /// assembly don't count).
    pub fn is_tree_mutation(&self) -> bool {
        matches!(
            self,
            HostOp::Append { .. }
                | HostOp::Insert { .. }
                | HostOp::Remove { .. }
                | HostOp::UpdateText { .. }
                | HostOp::UpdateProps { .. }
        )
    }
}

#[derive(Debug, Clone)]
enum NodeKind {
    Container,
    Element { tag: String, props: Props },
    Text(String),
}

#[derive(Debug, Clone)]
struct MemoryNode {
    kind: NodeKind,
    children: Vec<InstanceId>,
}

/// In-memory host tree with an operation log.
#[derive(Default)]
pub struct MemoryHost {
    nodes: Vec<MemoryNode>,
    ops: Vec<HostOp>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a mount target.
    pub fn create_container(&mut self) -> InstanceId {
        self.push_node(NodeKind::Container)
    }

    fn push_node(&mut self, kind: NodeKind) -> InstanceId {
        let id = InstanceId(self.nodes.len() as u64);
        self.nodes.push(MemoryNode {
            kind,
            children: Vec::new(),
        });
        id
    }

    fn node(&self, id: InstanceId) -> &MemoryNode {
        &self.nodes[id.0 as usize]
    }

    fn node_mut(&mut self, id: InstanceId) -> &mut MemoryNode {
        &mut self.nodes[id.0 as usize]
    }

    fn detach(&mut self, parent: InstanceId, child: InstanceId) {
        self.node_mut(parent).children.retain(|c| *c != child);
    }

    /// Children of a node, in order.
    pub fn children(&self, id: InstanceId) -> Vec<InstanceId> {
        self.node(id).children.clone()
    }

    /// Text content of a text node.
    pub fn text_of(&self, id: InstanceId) -> Option<&str> {
        match &self.node(id).kind {
            NodeKind::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Tag of an element node.
    pub fn tag_of(&self, id: InstanceId) -> Option<&str> {
        match &self.node(id).kind {
            NodeKind::Element { tag, .. } => Some(tag),
            _ => None,
        }
    }

    /// Current props of an element node.
    pub fn props_of(&self, id: InstanceId) -> Option<&Props> {
        match &self.node(id).kind {
            NodeKind::Element { props, .. } => Some(props),
            _ => None,
        }
    }

    /// All recorded operations since the last [`MemoryHost::take_ops`].
    pub fn ops(&self) -> &[HostOp] {
        &self.ops
    }

    pub fn take_ops(&mut self) -> Vec<HostOp> {
        std::mem::take(&mut self.ops)
    }

    /// Render a subtree as flat markup, for structural assertions.
    pub fn markup(&self, id: InstanceId) -> String {
        let node = self.node(id);
        match &node.kind {
            NodeKind::Text(s) => s.clone(),
            NodeKind::Container => node
                .children
                .iter()
                .map(|c| self.markup(*c))
                .collect::<Vec<_>>()
                .join(""),
            NodeKind::Element { tag, props } => {
                let attrs: String = props
                    .iter()
                    .filter_map(|(name, value)| match value {
                        PropValue::Handler(_) => None,
                        other => Some(format!(" {name}={other:?}")),
                    })
                    .collect();
                let inner: String = node.children.iter().map(|c| self.markup(*c)).collect();
                format!("<{tag}{attrs}>{inner}</{tag}>")
            }
        }
    }
}

impl Host for MemoryHost {
    fn create_instance(&mut self, tag: &str, props: &Props) -> InstanceId {
        let id = self.push_node(NodeKind::Element {
            tag: tag.to_string(),
            props: props.clone(),
        });
        self.ops.push(HostOp::Create {
            id,
            tag: tag.to_string(),
        });
        id
    }

    fn create_text_instance(&mut self, text: &str) -> InstanceId {
        let id = self.push_node(NodeKind::Text(text.to_string()));
        self.ops.push(HostOp::CreateText {
            id,
            text: text.to_string(),
        });
        id
    }

    fn append_initial_child(&mut self, parent: InstanceId, child: InstanceId) {
        self.node_mut(parent).children.push(child);
        self.ops.push(HostOp::AppendInitial { parent, child });
    }

    fn append_child_to_container(&mut self, container: InstanceId, child: InstanceId) {
        // Appending an already-attached child is a move to the end.
        self.detach(container, child);
        self.node_mut(container).children.push(child);
        self.ops.push(HostOp::Append { container, child });
    }

    fn insert_child_in_container(
        &mut self,
        container: InstanceId,
        child: InstanceId,
        before: InstanceId,
    ) {
        self.detach(container, child);
        let pos = self
            .node(container)
            .children
            .iter()
            .position(|c| *c == before)
            .unwrap_or(self.node(container).children.len());
        self.node_mut(container).children.insert(pos, child);
        self.ops.push(HostOp::Insert {
            container,
            child,
            before,
        });
    }

    fn remove_child(&mut self, container: InstanceId, child: InstanceId) {
        self.detach(container, child);
        self.ops.push(HostOp::Remove { container, child });
    }

    fn commit_update(&mut self, instance: InstanceId, update: HostUpdate<'_>) {
        match update {
            HostUpdate::Text(text) => {
                if let NodeKind::Text(s) = &mut self.node_mut(instance).kind {
                    *s = text.to_string();
                }
                self.ops.push(HostOp::UpdateText {
                    instance,
                    text: text.to_string(),
                });
            }
            HostUpdate::Props(props) => {
                if let NodeKind::Element { props: p, .. } = &mut self.node_mut(instance).kind {
                    *p = props.clone();
                }
                self.ops.push(HostOp::UpdateProps { instance });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_markup() {
        let mut host = MemoryHost::new();
        let container = host.create_container();
        let div = host.create_instance("div", &Props::new().set("class", "x"));
        let text = host.create_text_instance("hi");
        host.append_initial_child(div, text);
        host.append_child_to_container(container, div);

        assert_eq!(host.markup(container), "<div class=\"x\">hi</div>");
    }

    #[test]
    fn test_insert_moves_existing_child() {
        let mut host = MemoryHost::new();
        let container = host.create_container();
        let a = host.create_text_instance("a");
        let b = host.create_text_instance("b");
        let c = host.create_text_instance("c");
        host.append_child_to_container(container, a);
        host.append_child_to_container(container, b);
        host.append_child_to_container(container, c);

        // Move c before a.
        host.insert_child_in_container(container, c, a);
        assert_eq!(host.children(container), vec![c, a, b]);

        // Append a moves it to the end.
        host.append_child_to_container(container, a);
        assert_eq!(host.children(container), vec![c, b, a]);
    }

    #[test]
    fn test_update_text() {
        let mut host = MemoryHost::new();
        let t = host.create_text_instance("old");
        host.commit_update(t, HostUpdate::Text("new"));
        assert_eq!(host.text_of(t), Some("new"));
    }

    #[test]
    fn test_op_log_classification() {
        let mut host = MemoryHost::new();
        let container = host.create_container();
        let t = host.create_text_instance("x");
        host.append_child_to_container(container, t);

        let ops = host.take_ops();
        assert_eq!(ops.len(), 2);
        assert!(!ops[0].is_tree_mutation());
        assert!(ops[1].is_tree_mutation());
        assert!(host.ops().is_empty());
    }
}
