//! The complete step of the traversal: build or diff the unit's
//! host-facing instance and bubble its flags into the parent's subtree
//! flags.
//!
//! Host instances are constructed off-tree on first mount: a completing
//! host unit creates its instance and attaches every nearest host
//! descendant to it, so by the time the subtree's topmost placed unit
//! commits, a single insertion attaches the whole thing.

use crate::fiber::{FiberId, FiberKind, FiberProps};
use crate::flags::Flags;

use super::RuntimeShared;

impl RuntimeShared {
    pub(crate) fn complete_work(&self, wip: FiberId) {
        let kind = self.arena.borrow().fiber(wip).kind;
        match kind {
            FiberKind::HostComponent => {
                let (alternate, instance) = {
                    let arena = self.arena.borrow();
                    let f = arena.fiber(wip);
                    (f.alternate, f.instance)
                };
                if let (Some(alternate), Some(_)) = (alternate, instance) {
                    self.diff_host_element(wip, alternate);
                } else {
                    self.mount_host_element(wip);
                }
            }
            FiberKind::HostText => {
                let (alternate, instance) = {
                    let arena = self.arena.borrow();
                    let f = arena.fiber(wip);
                    (f.alternate, f.instance)
                };
                if let (Some(alternate), Some(_)) = (alternate, instance) {
                    let changed = {
                        let arena = self.arena.borrow();
                        let old = match &arena.fiber(alternate).memoized_props {
                            Some(FiberProps::Text(s)) => s.clone(),
                            _ => String::new(),
                        };
                        let new = match &arena.fiber(wip).pending_props {
                            FiberProps::Text(s) => s.clone(),
                            _ => String::new(),
                        };
                        old != new
                    };
                    if changed {
                        self.arena.borrow_mut().fiber_mut(wip).flags |= Flags::UPDATE;
                    }
                } else {
                    let text = match &self.arena.borrow().fiber(wip).pending_props {
                        FiberProps::Text(s) => s.clone(),
                        _ => String::new(),
                    };
                    let instance = self.host.borrow_mut().create_text_instance(&text);
                    self.arena.borrow_mut().fiber_mut(wip).instance = Some(instance);
                }
            }
            FiberKind::HostRoot | FiberKind::FunctionComponent | FiberKind::Fragment => {}
            FiberKind::ContextProvider => {
                // Leaving the provider's subtree: its value goes out of
                // scope.
                self.pop_provider();
            }
        }
        self.bubble_properties(wip);
    }

    /// Update path: stage prop changes and ref swaps as flags.
    fn diff_host_element(&self, wip: FiberId, alternate: FiberId) {
        let mut arena = self.arena.borrow_mut();

        let props_changed = {
            let old = match &arena.fiber(alternate).memoized_props {
                Some(FiberProps::Host { props, .. }) => Some(props.clone()),
                _ => None,
            };
            let new = match &arena.fiber(wip).pending_props {
                FiberProps::Host { props, .. } => Some(props.clone()),
                _ => None,
            };
            old != new
        };
        if props_changed {
            arena.fiber_mut(wip).flags |= Flags::UPDATE;
        }

        let ref_changed = {
            let old = arena.fiber(alternate).node_ref.clone();
            let new = arena.fiber(wip).node_ref.clone();
            match (old, new) {
                (None, None) => false,
                (Some(a), Some(b)) => !std::rc::Rc::ptr_eq(&a, &b),
                _ => true,
            }
        };
        if ref_changed {
            arena.fiber_mut(wip).flags |= Flags::REF;
        }
    }

    /// Mount path: create the instance and adopt the subtree's host
    /// descendants.
    fn mount_host_element(&self, wip: FiberId) {
        let (tag, props) = {
            let arena = self.arena.borrow();
            match &arena.fiber(wip).pending_props {
                FiberProps::Host { props, .. } => {
                    let Some(crate::fiber::ElemType::Host(tag)) = &arena.fiber(wip).elem_type
                    else {
                        unreachable!("host unit without a tag");
                    };
                    (tag.clone(), props.clone())
                }
                _ => unreachable!("host unit carries non-host props"),
            }
        };

        let instance = self.host.borrow_mut().create_instance(&tag, &props);
        self.append_all_children(instance, wip);
        {
            let mut arena = self.arena.borrow_mut();
            let f = arena.fiber_mut(wip);
            f.instance = Some(instance);
            if f.node_ref.is_some() {
                f.flags |= Flags::REF;
            }
        }
    }

    /// Attach every nearest host descendant of `wip` to `parent`,
    /// skipping over component/fragment layers.
    fn append_all_children(&self, parent: crate::host::InstanceId, wip: FiberId) {
        let mut node = self.arena.borrow().fiber(wip).child;
        while let Some(current) = node {
            let (is_host, instance, child) = {
                let arena = self.arena.borrow();
                let f = arena.fiber(current);
                (f.is_host_kind(), f.instance, f.child)
            };

            if is_host {
                let instance = instance.expect("host child completed without an instance");
                self.host.borrow_mut().append_initial_child(parent, instance);
            } else if let Some(child) = child {
                node = Some(child);
                continue;
            }

            // Climb until a sibling opens, stopping at the subtree root.
            let mut cursor = current;
            loop {
                let (sibling, parent_id) = {
                    let arena = self.arena.borrow();
                    let f = arena.fiber(cursor);
                    (f.sibling, f.parent)
                };
                if let Some(sibling) = sibling {
                    node = Some(sibling);
                    break;
                }
                match parent_id {
                    None => return,
                    Some(p) if p == wip => return,
                    Some(p) => cursor = p,
                }
            }
        }
    }

    /// Accumulate child flags into `wip`'s subtree flags and re-anchor
    /// the children's parent links to this generation.
    fn bubble_properties(&self, wip: FiberId) {
        let mut arena = self.arena.borrow_mut();
        let mut subtree = Flags::NONE;
        let mut child = arena.fiber(wip).child;
        while let Some(c) = child {
            let f = arena.fiber_mut(c);
            subtree |= f.subtree_flags | f.flags;
            f.parent = Some(wip);
            child = f.sibling;
        }
        arena.fiber_mut(wip).subtree_flags |= subtree;
    }
}
