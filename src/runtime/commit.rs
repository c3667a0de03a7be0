//! Commit: apply a finished tree's accumulated flags to the host tree.
//!
//! Commit is uninterruptible. The mutation pass walks only flagged
//! subtrees (subtree-flag masking keeps it O(flagged units)) applying,
//! per unit, placement, update, child deletion, and ref detachment, in
//! that order. The root pointer then flips to the finished tree, a
//! layout pass re-attaches flagged refs, and - if any unit staged
//! passive effects - one normal-priority callback is scheduled to flush
//! them: unmount cleanups first, then update cleanups, then update
//! creates. Sync work enqueued by the effects themselves is flushed at
//! the end of that pass rather than stranded a tick behind.

use std::rc::Rc;

use crate::fiber::{FiberId, FiberKind, FiberProps, RootId};
use crate::flags::{Flags, HookFlags};
use crate::host::{HostUpdate, InstanceId};
use crate::lanes::Lanes;
use crate::scheduler::Priority;

use super::{RuntimeError, RuntimeShared, TaskPayload};

impl RuntimeShared {
    pub(crate) fn commit_root(self: &Rc<Self>, root_id: RootId) -> Result<(), RuntimeError> {
        let Some(finished) = self.roots.borrow_mut()[root_id].finished_work.take() else {
            return Ok(());
        };
        let lane = {
            let mut roots = self.roots.borrow_mut();
            let root = &mut roots[root_id];
            let lane = root.finished_lane;
            root.finished_lane = Lanes::NONE;
            root.mark_finished(lane);
            lane
        };
        if lane == Lanes::NONE {
            tracing::warn!(root = root_id, "commit without a finished lane");
        }
        tracing::debug!(root = root_id, ?lane, "commit");

        let (flags, subtree_flags) = {
            let arena = self.arena.borrow();
            let f = arena.fiber(finished);
            (f.flags, f.subtree_flags)
        };

        // One passive flush per commit, deduplicated by the root guard.
        if (flags | subtree_flags).intersects(Flags::PASSIVE_MASK) {
            let should_schedule = {
                let mut roots = self.roots.borrow_mut();
                let root = &mut roots[root_id];
                let first = !root.passive_scheduled;
                root.passive_scheduled = true;
                first
            };
            if should_schedule {
                self.scheduler
                    .borrow_mut()
                    .schedule_callback(Priority::Normal, TaskPayload::FlushPassive(root_id));
            }
        }

        // Passive staging happens inside the mutation traversal, so the
        // pass also runs when only effect markers are set.
        let commit_mask = Flags::MUTATION_MASK | Flags::PASSIVE_MASK;
        if (flags | subtree_flags).intersects(commit_mask) {
            self.commit_mutation_effects(finished, root_id)?;
            // Double-buffer swap: the finished tree becomes current.
            self.roots.borrow_mut()[root_id].current = finished;
            self.commit_layout_effects(finished);
        } else {
            self.roots.borrow_mut()[root_id].current = finished;
        }

        self.roots.borrow_mut()[root_id].passive_scheduled = false;

        // Retired generations (deleted subtrees, abandoned mounts) are
        // unreachable now; reclaim their slots.
        let seeds: Vec<FiberId> = self.roots.borrow().iter().map(|r| r.current).collect();
        self.arena.borrow_mut().sweep(seeds);

        // A commit may have left more pending lanes behind.
        self.ensure_root_scheduled(root_id);
        Ok(())
    }

    // =========================================================================
    // Mutation pass
    // =========================================================================

    fn commit_mutation_effects(
        &self,
        finished: FiberId,
        root_id: RootId,
    ) -> Result<(), RuntimeError> {
        let descend_mask = Flags::MUTATION_MASK | Flags::PASSIVE_MASK;
        let mut next_effect = Some(finished);
        while let Some(fiber) = next_effect {
            let (child, subtree_flags) = {
                let arena = self.arena.borrow();
                let f = arena.fiber(fiber);
                (f.child, f.subtree_flags)
            };

            if subtree_flags.intersects(descend_mask) && child.is_some() {
                next_effect = child;
            } else {
                // Nothing flagged below: apply here, then walk across and
                // up.
                let mut node = Some(fiber);
                while let Some(current) = node {
                    self.commit_mutation_on_fiber(current, root_id)?;
                    let sibling = self.arena.borrow().fiber(current).sibling;
                    if let Some(sibling) = sibling {
                        next_effect = Some(sibling);
                        break;
                    }
                    node = self.arena.borrow().fiber(current).parent;
                    next_effect = node;
                }
            }
        }
        Ok(())
    }

    fn commit_mutation_on_fiber(
        &self,
        fiber: FiberId,
        root_id: RootId,
    ) -> Result<(), RuntimeError> {
        let flags = self.arena.borrow().fiber(fiber).flags;

        if flags.contains(Flags::PLACEMENT) {
            self.commit_placement(fiber)?;
            self.arena.borrow_mut().fiber_mut(fiber).flags.remove(Flags::PLACEMENT);
        }

        if flags.contains(Flags::UPDATE) {
            self.commit_update(fiber);
            self.arena.borrow_mut().fiber_mut(fiber).flags.remove(Flags::UPDATE);
        }

        if flags.contains(Flags::CHILD_DELETION) {
            let deletions = std::mem::take(&mut self.arena.borrow_mut().fiber_mut(fiber).deletions);
            for child in deletions {
                self.commit_deletion(child, root_id)?;
            }
            self.arena
                .borrow_mut()
                .fiber_mut(fiber)
                .flags
                .remove(Flags::CHILD_DELETION);
        }

        if flags.contains(Flags::PASSIVE_EFFECT) {
            let effects = self.arena.borrow().fiber(fiber).effects.clone();
            self.roots.borrow_mut()[root_id].passive_update.extend(effects);
            self.arena
                .borrow_mut()
                .fiber_mut(fiber)
                .flags
                .remove(Flags::PASSIVE_EFFECT);
        }

        // Detach the previous generation's ref; the layout pass attaches
        // the new one. The flag survives until then.
        if flags.contains(Flags::REF) {
            let detach = {
                let arena = self.arena.borrow();
                let f = arena.fiber(fiber);
                match (f.kind, f.alternate) {
                    (FiberKind::HostComponent, Some(alternate)) => {
                        arena.fiber(alternate).node_ref.clone()
                    }
                    _ => None,
                }
            };
            if let Some(cell) = detach {
                *cell.borrow_mut() = None;
            }
        }

        Ok(())
    }

    fn commit_update(&self, fiber: FiberId) {
        let arena = self.arena.borrow();
        let f = arena.fiber(fiber);
        let Some(instance) = f.instance else { return };
        match (&f.kind, &f.pending_props) {
            (FiberKind::HostText, FiberProps::Text(text)) => {
                self.host
                    .borrow_mut()
                    .commit_update(instance, HostUpdate::Text(text));
            }
            (FiberKind::HostComponent, FiberProps::Host { props, .. }) => {
                self.host
                    .borrow_mut()
                    .commit_update(instance, HostUpdate::Props(props));
            }
            _ => {}
        }
    }

    // =========================================================================
    // Placement
    // =========================================================================

    fn commit_placement(&self, fiber: FiberId) -> Result<(), RuntimeError> {
        let host_parent = self
            .get_host_parent(fiber)
            .ok_or(RuntimeError::HostParentMissing)?;
        let before = self.get_host_sibling(fiber);
        self.insert_or_append_placement_node(fiber, host_parent, before);
        Ok(())
    }

    /// Nearest host-bearing ancestor: a host element's instance, or the
    /// root's container.
    fn get_host_parent(&self, fiber: FiberId) -> Option<InstanceId> {
        let arena = self.arena.borrow();
        let mut parent = arena.fiber(fiber).parent;
        while let Some(p) = parent {
            let f = arena.fiber(p);
            match f.kind {
                FiberKind::HostComponent => return f.instance,
                FiberKind::HostRoot => {
                    let root = f.root?;
                    return Some(self.roots.borrow()[root].container);
                }
                _ => parent = f.parent,
            }
        }
        tracing::warn!("no host parent found");
        None
    }

    /// The stable "insert before" anchor: walk forward through siblings
    /// (and up through non-host ancestors), descending into composite
    /// siblings, skipping anything itself pending placement.
    fn get_host_sibling(&self, fiber: FiberId) -> Option<InstanceId> {
        let arena = self.arena.borrow();
        let mut node = fiber;
        'find: loop {
            // Walk up until a sibling opens; a host boundary means there
            // is no anchor and we append.
            loop {
                if let Some(sibling) = arena.fiber(node).sibling {
                    node = sibling;
                    break;
                }
                match arena.fiber(node).parent {
                    None => return None,
                    Some(parent) => {
                        let kind = arena.fiber(parent).kind;
                        if kind == FiberKind::HostComponent || kind == FiberKind::HostRoot {
                            return None;
                        }
                        node = parent;
                    }
                }
            }

            // Descend the composite sibling to its first host node.
            while !arena.fiber(node).is_host_kind() {
                // A sibling that is itself moving cannot anchor an
                // insertion.
                if arena.fiber(node).flags.contains(Flags::PLACEMENT) {
                    continue 'find;
                }
                match arena.fiber(node).child {
                    None => continue 'find,
                    Some(child) => node = child,
                }
            }

            if !arena.fiber(node).flags.contains(Flags::PLACEMENT) {
                return arena.fiber(node).instance;
            }
            // This host node is moving too; keep scanning.
        }
    }

    /// Insert (or append) the placed unit's host node(s). Composite units
    /// place each nearest host descendant.
    fn insert_or_append_placement_node(
        &self,
        fiber: FiberId,
        host_parent: InstanceId,
        before: Option<InstanceId>,
    ) {
        let (is_host, instance, child) = {
            let arena = self.arena.borrow();
            let f = arena.fiber(fiber);
            (f.is_host_kind(), f.instance, f.child)
        };

        if is_host {
            let instance = instance.expect("placed host unit without an instance");
            match before {
                Some(before) => {
                    self.host
                        .borrow_mut()
                        .insert_child_in_container(host_parent, instance, before)
                }
                None => self
                    .host
                    .borrow_mut()
                    .append_child_to_container(host_parent, instance),
            }
            return;
        }

        if let Some(child) = child {
            self.insert_or_append_placement_node(child, host_parent, before);
            let mut sibling = self.arena.borrow().fiber(child).sibling;
            while let Some(s) = sibling {
                self.insert_or_append_placement_node(s, host_parent, before);
                sibling = self.arena.borrow().fiber(s).sibling;
            }
        }
    }

    // =========================================================================
    // Deletion
    // =========================================================================

    fn commit_deletion(&self, child: FiberId, root_id: RootId) -> Result<(), RuntimeError> {
        // Visit the whole subtree: detach refs, stage unmount effects,
        // and collect the contiguous host-bearing roots to remove.
        let mut host_roots: Vec<FiberId> = Vec::new();
        self.commit_nested_unmounts(child, &mut host_roots, root_id);

        if !host_roots.is_empty() {
            if let Some(host_parent) = self.get_host_parent(child) {
                for node in &host_roots {
                    let instance = self.arena.borrow().fiber(*node).instance;
                    if let Some(instance) = instance {
                        self.host.borrow_mut().remove_child(host_parent, instance);
                    }
                }
            }
        }

        let mut arena = self.arena.borrow_mut();
        let f = arena.fiber_mut(child);
        f.parent = None;
        f.child = None;
        Ok(())
    }

    fn commit_nested_unmounts(
        &self,
        subtree_root: FiberId,
        host_roots: &mut Vec<FiberId>,
        root_id: RootId,
    ) {
        let mut node = subtree_root;
        loop {
            self.commit_unmount(node, host_roots, root_id);

            let child = self.arena.borrow().fiber(node).child;
            if let Some(child) = child {
                self.arena.borrow_mut().fiber_mut(child).parent = Some(node);
                node = child;
                continue;
            }

            if node == subtree_root {
                return;
            }
            loop {
                let (sibling, parent) = {
                    let arena = self.arena.borrow();
                    let f = arena.fiber(node);
                    (f.sibling, f.parent)
                };
                if sibling.is_some() {
                    break;
                }
                match parent {
                    None => return,
                    Some(p) if p == subtree_root => return,
                    Some(p) => node = p,
                }
            }
            let (sibling, parent) = {
                let arena = self.arena.borrow();
                let f = arena.fiber(node);
                (f.sibling, f.parent)
            };
            let sibling = sibling.expect("climb loop exits on a sibling");
            self.arena.borrow_mut().fiber_mut(sibling).parent = parent;
            node = sibling;
        }
    }

    fn commit_unmount(&self, fiber: FiberId, host_roots: &mut Vec<FiberId>, root_id: RootId) {
        let kind = self.arena.borrow().fiber(fiber).kind;
        match kind {
            FiberKind::HostComponent => {
                self.record_host_child_to_delete(host_roots, fiber);
                let cell = self.arena.borrow().fiber(fiber).node_ref.clone();
                if let Some(cell) = cell {
                    *cell.borrow_mut() = None;
                }
            }
            FiberKind::HostText => {
                self.record_host_child_to_delete(host_roots, fiber);
            }
            FiberKind::FunctionComponent => {
                // Unmount cleanups run in the passive flush, before any
                // update effect of the same commit.
                let effects = self.arena.borrow().fiber(fiber).effects.clone();
                self.roots.borrow_mut()[root_id].passive_unmount.extend(effects);
            }
            _ => {}
        }
    }

    /// Collect the host nodes to physically remove. The first host node
    /// found roots the removal; further ones count only if they are its
    /// siblings (a fragment groups several host nodes under one logical
    /// deletion boundary).
    fn record_host_child_to_delete(&self, host_roots: &mut Vec<FiberId>, unmounting: FiberId) {
        let arena = self.arena.borrow();
        match host_roots.last() {
            None => host_roots.push(unmounting),
            Some(&last) => {
                let mut node = arena.fiber(last).sibling;
                while let Some(n) = node {
                    if n == unmounting {
                        host_roots.push(unmounting);
                    }
                    node = arena.fiber(n).sibling;
                }
            }
        }
    }

    // =========================================================================
    // Layout pass
    // =========================================================================

    /// Re-attach refs flagged during the render pass. Runs after the
    /// buffer flip, over the same flag-masked traversal as the mutation
    /// pass.
    fn commit_layout_effects(&self, finished: FiberId) {
        let mut next_effect = Some(finished);
        while let Some(fiber) = next_effect {
            let (child, subtree_flags) = {
                let arena = self.arena.borrow();
                let f = arena.fiber(fiber);
                (f.child, f.subtree_flags)
            };

            if subtree_flags.intersects(Flags::LAYOUT_MASK) && child.is_some() {
                next_effect = child;
            } else {
                let mut node = Some(fiber);
                while let Some(current) = node {
                    self.commit_layout_on_fiber(current);
                    let sibling = self.arena.borrow().fiber(current).sibling;
                    if let Some(sibling) = sibling {
                        next_effect = Some(sibling);
                        break;
                    }
                    node = self.arena.borrow().fiber(current).parent;
                    next_effect = node;
                }
            }
        }
    }

    fn commit_layout_on_fiber(&self, fiber: FiberId) {
        let flags = self.arena.borrow().fiber(fiber).flags;
        if flags.contains(Flags::REF) {
            let attach = {
                let arena = self.arena.borrow();
                let f = arena.fiber(fiber);
                if f.kind == FiberKind::HostComponent {
                    f.node_ref.clone().map(|cell| (cell, f.instance))
                } else {
                    None
                }
            };
            if let Some((cell, instance)) = attach {
                *cell.borrow_mut() = instance;
            }
            self.arena.borrow_mut().fiber_mut(fiber).flags.remove(Flags::REF);
        }
    }

    // =========================================================================
    // Passive effects
    // =========================================================================

    /// Flush staged passive effects for a root: unmount cleanups, then
    /// update cleanups, then update creates. Returns whether anything was
    /// staged. Sync updates enqueued by the effects are flushed before
    /// returning.
    pub(crate) fn flush_passive_effects(
        self: &Rc<Self>,
        root_id: RootId,
    ) -> Result<bool, RuntimeError> {
        let (unmounts, updates) = {
            let mut roots = self.roots.borrow_mut();
            let root = &mut roots[root_id];
            (
                std::mem::take(&mut root.passive_unmount),
                std::mem::take(&mut root.passive_update),
            )
        };

        let mut did_flush = false;

        for effect in &unmounts {
            did_flush = true;
            let cell = {
                let mut e = effect.borrow_mut();
                if e.tag.contains(HookFlags::PASSIVE) {
                    // A destroyed record never runs its create.
                    e.tag.remove(HookFlags::HAS_EFFECT);
                    Some(e.destroy.clone())
                } else {
                    None
                }
            };
            if let Some(destroy) = cell.and_then(|cell| cell.borrow_mut().take()) {
                destroy();
            }
        }

        let active = HookFlags::PASSIVE | HookFlags::HAS_EFFECT;
        for effect in &updates {
            did_flush = true;
            let cell = {
                let e = effect.borrow();
                if e.tag.contains(active) { Some(e.destroy.clone()) } else { None }
            };
            if let Some(destroy) = cell.and_then(|cell| cell.borrow_mut().take()) {
                destroy();
            }
        }
        for effect in &updates {
            let create = {
                let mut e = effect.borrow_mut();
                if e.tag.contains(active) { e.create.take() } else { None }
            };
            if let Some(create) = create {
                let cleanup = create();
                *effect.borrow().destroy.borrow_mut() = cleanup;
            }
        }

        if did_flush {
            tracing::debug!(root = root_id, "passive effects flushed");
        }

        // Effects may have dispatched sync work; don't strand it a tick
        // behind.
        self.flush_sync_callbacks()?;
        Ok(did_flush)
    }
}
