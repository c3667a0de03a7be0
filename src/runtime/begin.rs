//! The begin step of the traversal: resolve a unit's new children via
//! the child reconciler (and the hooks engine for function components)
//! and hand back the first child to descend into.

use std::rc::Rc;

use crate::element::Children;
use crate::fiber::{ElemType, FiberId, FiberKind, FiberProps, FiberState};
use crate::hooks::render_with_hooks;
use crate::lanes::Lanes;
use crate::reconcile::ChildReconciler;
use crate::update_queue::process_update_queue;

use super::RuntimeShared;

impl RuntimeShared {
    /// Diff `wip`'s children and return the next unit to process (its
    /// first child), or `None` to begin completing.
    pub(crate) fn begin_work(self: &Rc<Self>, wip: FiberId, render_lane: Lanes) -> Option<FiberId> {
        let kind = self.arena.borrow().fiber(wip).kind;
        match kind {
            FiberKind::HostRoot => self.update_host_root(wip, render_lane),
            FiberKind::HostComponent => {
                let children = match &self.arena.borrow().fiber(wip).pending_props {
                    FiberProps::Host { children, .. } => children.clone(),
                    _ => unreachable!("host unit carries non-host props"),
                };
                self.reconcile_children(wip, Some(children));
            }
            // Text is a leaf; nothing to descend into.
            FiberKind::HostText => return None,
            FiberKind::FunctionComponent => {
                let child = render_with_hooks(self, wip, render_lane);
                self.reconcile_children(wip, Some(Children::One(Box::new(child))));
            }
            FiberKind::Fragment => {
                let children = match &self.arena.borrow().fiber(wip).pending_props {
                    FiberProps::Fragment(children) => children.clone(),
                    _ => unreachable!("fragment unit carries non-fragment props"),
                };
                self.reconcile_children(wip, Some(Children::Many(children)));
            }
            FiberKind::ContextProvider => {
                let (context_id, value, children) = {
                    let arena = self.arena.borrow();
                    let fiber = arena.fiber(wip);
                    let Some(ElemType::Provider(id)) = &fiber.elem_type else {
                        unreachable!("provider unit without a channel id");
                    };
                    let FiberProps::Provider { value, children } = &fiber.pending_props else {
                        unreachable!("provider unit carries non-provider props");
                    };
                    (*id, value.clone(), children.clone())
                };
                // Pushed here, popped when the unit completes: the value
                // is visible to exactly the subtree below.
                self.push_provider(context_id, value);
                self.reconcile_children(wip, Some(Children::Many(children)));
            }
        }
        self.arena.borrow().fiber(wip).child
    }

    /// Fold the root's element transitions at the render lane, then
    /// reconcile the resulting element as the single child.
    fn update_host_root(self: &Rc<Self>, wip: FiberId, render_lane: Lanes) {
        let root_id = self
            .arena
            .borrow()
            .fiber(wip)
            .root
            .expect("host root without a registered root");
        let queue = self.roots.borrow()[root_id].queue.clone();

        // Same carry-forward discipline as state hooks: the merged queue
        // is persisted on the committed generation before processing, so
        // an abandoned pass loses nothing.
        let (merged, base_state) = {
            let mut arena = self.arena.borrow_mut();
            let alternate = arena
                .fiber(wip)
                .alternate
                .expect("the host root is always double-buffered");
            let FiberState::Root(slot) = &mut arena.fiber_mut(alternate).state else {
                panic!("host root lost its queue state");
            };
            let pending = queue.borrow_mut().drain_pending();
            slot.base_queue.extend(pending);
            (slot.base_queue.clone(), slot.base_state.clone())
        };

        let processed = process_update_queue(base_state, &merged, render_lane);
        let next_element = processed.memoized.clone();

        {
            let mut arena = self.arena.borrow_mut();
            let FiberState::Root(slot) = &mut arena.fiber_mut(wip).state else {
                panic!("host root lost its queue state");
            };
            slot.memoized = processed.memoized;
            slot.base_state = processed.base_state;
            slot.base_queue = processed.base_queue;
        }

        let children = next_element.map(|el| Children::One(Box::new(el)));
        self.reconcile_children(wip, children);
    }

    /// Run the child reconciler for `wip`. Effect tracking is off for
    /// the first mount of a subtree (no alternate): the whole subtree is
    /// placed as one unit by its host ancestor.
    fn reconcile_children(&self, wip: FiberId, children: Option<Children>) {
        let (alternate, old_first) = {
            let arena = self.arena.borrow();
            let fiber = arena.fiber(wip);
            let alternate = fiber.alternate;
            let old_first = alternate.and_then(|a| arena.fiber(a).child);
            (alternate, old_first)
        };

        let reconciler = ChildReconciler::new(alternate.is_some());
        let first = {
            let mut arena = self.arena.borrow_mut();
            reconciler.reconcile(&mut arena, wip, old_first, children)
        };
        self.arena.borrow_mut().fiber_mut(wip).child = first;
    }
}
