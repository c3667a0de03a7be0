//! Child reconciler - diffing intent-tree children against the previous
//! generation's fibers.
//!
//! Two instances exist: one that tracks side effects (placements,
//! deletions) and one that skips the bookkeeping for the very first
//! mount subtree, where the whole tree is placed as one unit by its
//! host ancestor anyway.
//!
//! The keyed-list walk is the single-pass linear-time diff: build a map
//! of old children by key (else positional index), walk the new list
//! left to right reusing map hits, and mark moves against a
//! `last_placed_index` watermark. It accepts extra moves in exchange for
//! O(n) time; the exact heuristic is load-bearing for downstream
//! behavior and is preserved as-is.

use std::collections::BTreeMap;

use crate::element::{Children, Element};
use crate::fiber::{
    ElemType, Fiber, FiberArena, FiberId, FiberKind, FiberProps, create_work_in_progress,
};
use crate::flags::Flags;

/// Lookup key into the old-children map: explicit key, else position.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum MapKey {
    Keyed(String),
    Index(u32),
}

pub(crate) struct ChildReconciler {
    track_effects: bool,
}

impl ChildReconciler {
    pub fn new(track_effects: bool) -> Self {
        Self { track_effects }
    }

    /// Produce the new child chain for `parent` from `new_child`,
    /// reusing fibers from the old chain starting at `current_first`.
    pub fn reconcile(
        &self,
        arena: &mut FiberArena,
        parent: FiberId,
        current_first: Option<FiberId>,
        new_child: Option<Children>,
    ) -> Option<FiberId> {
        // A top-level unkeyed fragment is transparent: reconcile its
        // children directly.
        let new_child = match new_child {
            Some(Children::One(el)) => match *el {
                Element::Fragment {
                    key: None,
                    children,
                } => Some(Children::Many(children)),
                other => Some(Children::One(Box::new(other))),
            },
            other => other,
        };

        match new_child {
            Some(Children::Many(list)) => self.reconcile_list(arena, parent, current_first, &list),
            Some(Children::One(el)) => {
                let fiber = match &*el {
                    Element::Text(content) => {
                        self.reconcile_single_text(arena, parent, current_first, content)
                    }
                    element => self.reconcile_single_element(arena, parent, current_first, element),
                };
                Some(self.place_single_child(arena, fiber))
            }
            Some(Children::None) | None => {
                self.delete_remaining(arena, parent, current_first);
                None
            }
        }
    }

    // =========================================================================
    // Deletion marking
    // =========================================================================

    fn delete_child(&self, arena: &mut FiberArena, parent: FiberId, child: FiberId) {
        if !self.track_effects {
            return;
        }
        let p = arena.fiber_mut(parent);
        p.deletions.push(child);
        p.flags |= Flags::CHILD_DELETION;
    }

    fn delete_remaining(
        &self,
        arena: &mut FiberArena,
        parent: FiberId,
        first: Option<FiberId>,
    ) {
        if !self.track_effects {
            return;
        }
        let mut cursor = first;
        while let Some(child) = cursor {
            cursor = arena.fiber(child).sibling;
            self.delete_child(arena, parent, child);
        }
    }

    // =========================================================================
    // Single child
    // =========================================================================

    fn reconcile_single_element(
        &self,
        arena: &mut FiberArena,
        parent: FiberId,
        mut current: Option<FiberId>,
        element: &Element,
    ) -> FiberId {
        let key = element.key();
        while let Some(current_id) = current {
            let (current_key, sibling) = {
                let f = arena.fiber(current_id);
                (f.key.clone(), f.sibling)
            };
            if current_key.as_deref() == key {
                if element_matches(arena.fiber(current_id), element) {
                    // Same position, same thing: reuse it and drop the
                    // rest of the old chain.
                    let existing = use_fiber(arena, current_id, element);
                    arena.fiber_mut(existing).parent = Some(parent);
                    self.delete_remaining(arena, parent, sibling);
                    return existing;
                }
                // Key matched but the type changed: nothing below is
                // salvageable.
                self.delete_remaining(arena, parent, Some(current_id));
                break;
            } else {
                self.delete_child(arena, parent, current_id);
                current = sibling;
            }
        }

        let fiber = create_fiber_from_element(arena, element);
        arena.fiber_mut(fiber).parent = Some(parent);
        fiber
    }

    fn reconcile_single_text(
        &self,
        arena: &mut FiberArena,
        parent: FiberId,
        mut current: Option<FiberId>,
        content: &str,
    ) -> FiberId {
        while let Some(current_id) = current {
            let (kind, sibling) = {
                let f = arena.fiber(current_id);
                (f.kind, f.sibling)
            };
            if kind == FiberKind::HostText {
                // Text has no type/key distinction: reuse content in
                // place.
                let existing =
                    use_fiber_with_props(arena, current_id, FiberProps::Text(content.to_string()));
                arena.fiber_mut(existing).parent = Some(parent);
                self.delete_remaining(arena, parent, sibling);
                return existing;
            }
            self.delete_child(arena, parent, current_id);
            current = sibling;
        }

        let fiber = arena.alloc(Fiber::new(
            FiberKind::HostText,
            FiberProps::Text(content.to_string()),
            None,
        ));
        arena.fiber_mut(fiber).parent = Some(parent);
        fiber
    }

    /// Flag a freshly mounted single child for placement. Skipped when
    /// this reconciler instance is not tracking effects: the first-mount
    /// subtree is placed wholesale by its host ancestor.
    fn place_single_child(&self, arena: &mut FiberArena, fiber: FiberId) -> FiberId {
        if self.track_effects && arena.fiber(fiber).alternate.is_none() {
            arena.fiber_mut(fiber).flags |= Flags::PLACEMENT;
        }
        fiber
    }

    // =========================================================================
    // Keyed list
    // =========================================================================

    fn reconcile_list(
        &self,
        arena: &mut FiberArena,
        parent: FiberId,
        current_first: Option<FiberId>,
        list: &[Element],
    ) -> Option<FiberId> {
        // The old position of the last reused, not-moved child.
        let mut last_placed_index: u32 = 0;
        let mut first_new: Option<FiberId> = None;
        let mut last_new: Option<FiberId> = None;

        // 1. Index the old chain by key, else position.
        let mut existing: BTreeMap<MapKey, FiberId> = BTreeMap::new();
        let mut cursor = current_first;
        while let Some(id) = cursor {
            let f = arena.fiber(id);
            let map_key = match &f.key {
                Some(k) => MapKey::Keyed(k.clone()),
                None => MapKey::Index(f.index),
            };
            cursor = f.sibling;
            existing.insert(map_key, id);
        }

        for (i, element) in list.iter().enumerate() {
            // 2. Reuse a map hit or create fresh.
            let new_fiber = self.update_from_map(arena, &mut existing, i as u32, element);

            {
                let f = arena.fiber_mut(new_fiber);
                f.index = i as u32;
                f.parent = Some(parent);
            }
            match last_new {
                None => {
                    first_new = Some(new_fiber);
                    last_new = Some(new_fiber);
                }
                Some(prev) => {
                    arena.fiber_mut(prev).sibling = Some(new_fiber);
                    last_new = Some(new_fiber);
                }
            }

            if !self.track_effects {
                continue;
            }

            // 3. Mark moves. A reused child whose old position sits left
            // of the watermark has to shift right; otherwise it anchors
            // the watermark.
            let alternate = arena.fiber(new_fiber).alternate;
            match alternate {
                Some(alternate) => {
                    let old_index = arena.fiber(alternate).index;
                    if old_index < last_placed_index {
                        arena.fiber_mut(new_fiber).flags |= Flags::PLACEMENT;
                    } else {
                        last_placed_index = old_index;
                    }
                }
                None => {
                    arena.fiber_mut(new_fiber).flags |= Flags::PLACEMENT;
                }
            }
        }

        // 4. Whatever the walk didn't claim is gone.
        let leftover: Vec<FiberId> = existing.into_values().collect();
        for stale in leftover {
            self.delete_child(arena, parent, stale);
        }

        first_new
    }

    fn update_from_map(
        &self,
        arena: &mut FiberArena,
        existing: &mut BTreeMap<MapKey, FiberId>,
        index: u32,
        element: &Element,
    ) -> FiberId {
        let map_key = match element.key() {
            Some(k) => MapKey::Keyed(k.to_string()),
            None => MapKey::Index(index),
        };
        let before = existing.get(&map_key).copied();

        if let Some(before_id) = before {
            if element_matches(arena.fiber(before_id), element) {
                existing.remove(&map_key);
                return use_fiber(arena, before_id, element);
            }
        }
        create_fiber_from_element(arena, element)
    }
}

// =============================================================================
// Fiber construction
// =============================================================================

/// Whether the old fiber tracks the same thing the element describes.
fn element_matches(fiber: &Fiber, element: &Element) -> bool {
    match element {
        Element::Text(_) => fiber.kind == FiberKind::HostText,
        Element::Fragment { .. } => fiber.kind == FiberKind::Fragment,
        Element::Host { tag, .. } => matches!(
            &fiber.elem_type,
            Some(ElemType::Host(t)) if t == tag
        ),
        Element::Component { func, .. } => matches!(
            &fiber.elem_type,
            Some(ElemType::Component(f)) if std::rc::Rc::ptr_eq(f, func)
        ),
        Element::Provider { context_id, .. } => matches!(
            &fiber.elem_type,
            Some(ElemType::Provider(id)) if id == context_id
        ),
    }
}

fn pending_props_of(element: &Element) -> FiberProps {
    match element {
        Element::Host {
            props, children, ..
        } => FiberProps::Host {
            props: props.clone(),
            children: children.clone(),
        },
        Element::Text(content) => FiberProps::Text(content.clone()),
        Element::Component { props, .. } => FiberProps::Component(props.clone()),
        // A fragment's children array is the props its unit carries.
        Element::Fragment { children, .. } => FiberProps::Fragment(children.clone()),
        Element::Provider {
            value, children, ..
        } => FiberProps::Provider {
            value: value.clone(),
            children: children.clone(),
        },
    }
}

pub(crate) fn create_fiber_from_element(arena: &mut FiberArena, element: &Element) -> FiberId {
    let (kind, elem_type, node_ref) = match element {
        Element::Host { tag, node_ref, .. } => (
            FiberKind::HostComponent,
            Some(ElemType::Host(tag.clone())),
            node_ref.clone(),
        ),
        Element::Text(_) => (FiberKind::HostText, None, None),
        Element::Component { func, .. } => (
            FiberKind::FunctionComponent,
            Some(ElemType::Component(func.clone())),
            None,
        ),
        Element::Fragment { .. } => (FiberKind::Fragment, None, None),
        Element::Provider { context_id, .. } => (
            FiberKind::ContextProvider,
            Some(ElemType::Provider(*context_id)),
            None,
        ),
    };

    let mut fiber = Fiber::new(
        kind,
        pending_props_of(element),
        element.key().map(str::to_string),
    );
    fiber.elem_type = elem_type;
    fiber.node_ref = node_ref;
    arena.alloc(fiber)
}

/// Reuse an old fiber for a matching element: arm its work-in-progress
/// with the new props and detach it from its old chain.
fn use_fiber(arena: &mut FiberArena, current: FiberId, element: &Element) -> FiberId {
    let wip = use_fiber_with_props(arena, current, pending_props_of(element));
    if let Element::Host { node_ref, .. } = element {
        arena.fiber_mut(wip).node_ref = node_ref.clone();
    }
    wip
}

fn use_fiber_with_props(
    arena: &mut FiberArena,
    current: FiberId,
    pending_props: FiberProps,
) -> FiberId {
    let wip = create_work_in_progress(arena, current, pending_props);
    let f = arena.fiber_mut(wip);
    f.index = 0;
    f.sibling = None;
    wip
}
