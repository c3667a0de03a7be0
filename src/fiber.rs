//! Work-unit graph - the double-buffered tree the reconciler walks.
//!
//! Each position in the intent tree is tracked by up to two `Fiber`
//! buffer instances: the committed one (`current`) and the one being
//! built (`work-in-progress`), linked through mutual `alternate` ids.
//! Fibers live in a generational slot arena: ids carry a generation
//! counter so a handle to a retired fiber goes inert instead of aliasing
//! whatever reuses the slot.
//!
//! Tree links (`parent`/`child`/`sibling`) are only guaranteed valid for
//! the buffer generation currently being walked; flags are cleared when a
//! work-in-progress is (re)armed and only set while diffing.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use crate::element::{Children, ComponentFn, Element, NodeRef, Props};
use crate::flags::Flags;
use crate::hooks::{Effect, Hook};
use crate::host::InstanceId;
use crate::lanes::Lanes;
use crate::scheduler::CallbackId;
use crate::update_queue::{SharedQueue, Update, new_shared_queue};

// =============================================================================
// Ids
// =============================================================================

/// Handle to a fiber slot. Carries the slot's generation so stale
/// handles (to retired fibers) fail lookups instead of aliasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct FiberId {
    slot: u32,
    generation: u32,
}

/// Index of a root container registered with the runtime.
pub(crate) type RootId = usize;

// =============================================================================
// Fiber
// =============================================================================

/// What kind of tree position a fiber tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FiberKind {
    FunctionComponent,
    HostRoot,
    HostComponent,
    HostText,
    Fragment,
    ContextProvider,
}

/// Type identity used for "same position, same thing?" checks.
#[derive(Clone)]
pub(crate) enum ElemType {
    Host(String),
    Component(ComponentFn),
    Provider(u32),
}

/// Props as staged on a fiber, shaped per kind.
#[derive(Clone)]
pub(crate) enum FiberProps {
    Root,
    Host { props: Props, children: Children },
    Text(String),
    Component(Props),
    Fragment(Vec<Element>),
    Provider { value: Rc<dyn Any>, children: Vec<Element> },
}

/// Memoized internal state, shaped per kind.
pub(crate) enum FiberState {
    None,
    /// Function components: hook records in invocation order.
    Hooks(Vec<Hook>),
    /// The host root: the rendered element plus its carry-forward queue
    /// state.
    Root(RootSlot),
}

impl FiberState {
    /// What a freshly (re)armed work-in-progress inherits. Hook lists are
    /// rebuilt during the component's invocation, so they are not copied
    /// across buffers.
    fn clone_for_buffer(&self) -> FiberState {
        match self {
            FiberState::Root(slot) => FiberState::Root(slot.clone()),
            FiberState::Hooks(_) | FiberState::None => FiberState::None,
        }
    }
}

/// Queue state for the host root's element transitions.
#[derive(Clone)]
pub(crate) struct RootSlot {
    pub memoized: Option<Element>,
    pub base_state: Option<Element>,
    pub base_queue: Vec<Update<Option<Element>>>,
}

impl RootSlot {
    pub fn new() -> Self {
        Self {
            memoized: None,
            base_state: None,
            base_queue: Vec::new(),
        }
    }
}

/// One work unit.
pub(crate) struct Fiber {
    pub kind: FiberKind,
    pub key: Option<String>,
    pub elem_type: Option<ElemType>,

    pub pending_props: FiberProps,
    pub memoized_props: Option<FiberProps>,
    pub state: FiberState,
    /// Lifecycle-effect records collected during the unit's last
    /// invocation, in hook order.
    pub effects: Vec<Rc<RefCell<Effect>>>,

    pub flags: Flags,
    pub subtree_flags: Flags,
    pub deletions: Vec<FiberId>,

    pub alternate: Option<FiberId>,
    pub index: u32,
    pub parent: Option<FiberId>,
    pub child: Option<FiberId>,
    pub sibling: Option<FiberId>,

    pub node_ref: Option<NodeRef>,
    pub instance: Option<InstanceId>,
    /// Set on host-root fibers only: which registered root owns this tree.
    pub root: Option<RootId>,
}

impl Fiber {
    pub fn new(kind: FiberKind, pending_props: FiberProps, key: Option<String>) -> Self {
        Self {
            kind,
            key,
            elem_type: None,
            pending_props,
            memoized_props: None,
            state: FiberState::None,
            effects: Vec::new(),
            flags: Flags::NONE,
            subtree_flags: Flags::NONE,
            deletions: Vec::new(),
            alternate: None,
            index: 0,
            parent: None,
            child: None,
            sibling: None,
            node_ref: None,
            instance: None,
            root: None,
        }
    }

    pub fn is_host_kind(&self) -> bool {
        matches!(self.kind, FiberKind::HostComponent | FiberKind::HostText)
    }
}

// =============================================================================
// Arena
// =============================================================================

struct Slot {
    generation: u32,
    fiber: Option<Fiber>,
}

/// Generational slot arena holding every fiber of every root.
pub(crate) struct FiberArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl FiberArena {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    pub fn alloc(&mut self, fiber: Fiber) -> FiberId {
        match self.free.pop() {
            Some(slot) => {
                let entry = &mut self.slots[slot as usize];
                entry.fiber = Some(fiber);
                FiberId {
                    slot,
                    generation: entry.generation,
                }
            }
            None => {
                let slot = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    fiber: Some(fiber),
                });
                FiberId {
                    slot,
                    generation: 0,
                }
            }
        }
    }

    /// Lookup that tolerates stale handles.
    pub fn get(&self, id: FiberId) -> Option<&Fiber> {
        let entry = self.slots.get(id.slot as usize)?;
        if entry.generation != id.generation {
            return None;
        }
        entry.fiber.as_ref()
    }

    /// Lookup for handles the runtime knows to be live.
    pub fn fiber(&self, id: FiberId) -> &Fiber {
        self.get(id).expect("fiber handle is stale")
    }

    pub fn fiber_mut(&mut self, id: FiberId) -> &mut Fiber {
        let entry = &mut self.slots[id.slot as usize];
        assert_eq!(entry.generation, id.generation, "fiber handle is stale");
        entry.fiber.as_mut().expect("fiber handle is stale")
    }

    pub fn is_live(&self, id: FiberId) -> bool {
        self.get(id).is_some()
    }

    fn release(&mut self, slot: u32) {
        let entry = &mut self.slots[slot as usize];
        if entry.fiber.take().is_some() {
            entry.generation = entry.generation.wrapping_add(1);
            self.free.push(slot);
        }
    }

    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.fiber.is_some()).count()
    }

    /// Free every fiber not reachable from `seeds` over
    /// `{child, sibling, alternate}` edges. Run after commit, once the
    /// retired generation's links can no longer be walked.
    pub fn sweep(&mut self, seeds: impl IntoIterator<Item = FiberId>) -> usize {
        let mut reachable = vec![false; self.slots.len()];
        let mut stack: Vec<FiberId> = seeds.into_iter().collect();

        while let Some(id) = stack.pop() {
            let Some(fiber) = self.get(id) else { continue };
            if reachable[id.slot as usize] {
                continue;
            }
            reachable[id.slot as usize] = true;
            for next in [fiber.child, fiber.sibling, fiber.alternate]
                .into_iter()
                .flatten()
            {
                stack.push(next);
            }
        }

        let mut freed = 0;
        for slot in 0..self.slots.len() {
            if !reachable[slot] && self.slots[slot].fiber.is_some() {
                self.release(slot as u32);
                freed += 1;
            }
        }
        if freed > 0 {
            tracing::debug!(freed, live = self.live_count(), "swept retired fibers");
        }
        freed
    }
}

/// Arm (or create) the work-in-progress buffer for `current`.
///
/// First call for a position creates the second buffer instance and
/// links the pair through `alternate`; later calls reuse it, resetting
/// props, flags and deletions.
pub(crate) fn create_work_in_progress(
    arena: &mut FiberArena,
    current_id: FiberId,
    pending_props: FiberProps,
) -> FiberId {
    let existing = arena.fiber(current_id).alternate;

    match existing {
        None => {
            let current = arena.fiber(current_id);
            let mut wip = Fiber::new(current.kind, pending_props, current.key.clone());
            wip.elem_type = current.elem_type.clone();
            wip.instance = current.instance;
            wip.root = current.root;
            wip.node_ref = current.node_ref.clone();
            wip.child = current.child;
            wip.memoized_props = current.memoized_props.clone();
            wip.state = current.state.clone_for_buffer();

            let wip_id = arena.alloc(wip);
            arena.fiber_mut(wip_id).alternate = Some(current_id);
            arena.fiber_mut(current_id).alternate = Some(wip_id);
            wip_id
        }
        Some(wip_id) => {
            let (elem_type, child, memoized_props, state) = {
                let current = arena.fiber(current_id);
                (
                    current.elem_type.clone(),
                    current.child,
                    current.memoized_props.clone(),
                    current.state.clone_for_buffer(),
                )
            };
            let wip = arena.fiber_mut(wip_id);
            wip.pending_props = pending_props;
            wip.flags = Flags::NONE;
            wip.subtree_flags = Flags::NONE;
            wip.deletions.clear();
            wip.elem_type = elem_type;
            wip.child = child;
            wip.memoized_props = memoized_props;
            wip.state = state;
            wip_id
        }
    }
}

// =============================================================================
// Roots
// =============================================================================

/// Per-mount-target bookkeeping: the current tree, finished work waiting
/// to commit, pending/finished lanes, the registered scheduler callback,
/// and the passive-effect staging queues.
pub(crate) struct RootNode {
    pub container: InstanceId,
    pub current: FiberId,
    pub finished_work: Option<FiberId>,
    pub pending_lanes: Lanes,
    pub finished_lane: Lanes,
    /// Element transitions enqueued by `Root::render`.
    pub queue: SharedQueue<Option<Element>>,
    pub callback: Option<CallbackId>,
    pub callback_priority: Lanes,
    pub passive_update: Vec<Rc<RefCell<Effect>>>,
    pub passive_unmount: Vec<Rc<RefCell<Effect>>>,
    pub passive_scheduled: bool,
}

impl RootNode {
    pub fn new(container: InstanceId, current: FiberId) -> Self {
        Self {
            container,
            current,
            finished_work: None,
            pending_lanes: Lanes::NONE,
            finished_lane: Lanes::NONE,
            queue: new_shared_queue(),
            callback: None,
            callback_priority: Lanes::NONE,
            passive_update: Vec::new(),
            passive_unmount: Vec::new(),
            passive_scheduled: false,
        }
    }

    pub fn mark_updated(&mut self, lane: Lanes) {
        self.pending_lanes = self.pending_lanes.merge(lane);
    }

    pub fn mark_finished(&mut self, lane: Lanes) {
        self.pending_lanes.remove(lane);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_fiber(content: &str) -> Fiber {
        Fiber::new(
            FiberKind::HostText,
            FiberProps::Text(content.to_string()),
            None,
        )
    }

    #[test]
    fn test_stale_handles_go_inert() {
        let mut arena = FiberArena::new();
        let id = arena.alloc(text_fiber("a"));
        assert!(arena.is_live(id));

        arena.release(0);
        assert!(!arena.is_live(id));
        assert!(arena.get(id).is_none());

        // The slot is reused under a new generation; the old handle stays
        // dead.
        let reused = arena.alloc(text_fiber("b"));
        assert!(arena.is_live(reused));
        assert!(!arena.is_live(id));
    }

    #[test]
    fn test_create_work_in_progress_links_pair() {
        let mut arena = FiberArena::new();
        let current = arena.alloc(text_fiber("a"));

        let wip = create_work_in_progress(&mut arena, current, FiberProps::Text("b".into()));
        assert_eq!(arena.fiber(current).alternate, Some(wip));
        assert_eq!(arena.fiber(wip).alternate, Some(current));

        // Arming again reuses the same buffer and clears diff bookkeeping.
        arena.fiber_mut(wip).flags = Flags::PLACEMENT;
        arena.fiber_mut(wip).subtree_flags = Flags::UPDATE;
        let again = create_work_in_progress(&mut arena, current, FiberProps::Text("c".into()));
        assert_eq!(again, wip);
        assert_eq!(arena.fiber(wip).flags, Flags::NONE);
        assert_eq!(arena.fiber(wip).subtree_flags, Flags::NONE);
    }

    #[test]
    fn test_sweep_frees_unreachable() {
        let mut arena = FiberArena::new();
        let root = arena.alloc(text_fiber("root"));
        let kept = arena.alloc(text_fiber("kept"));
        let orphan = arena.alloc(text_fiber("orphan"));
        arena.fiber_mut(root).child = Some(kept);

        let freed = arena.sweep([root]);
        assert_eq!(freed, 1);
        assert!(arena.is_live(root));
        assert!(arena.is_live(kept));
        assert!(!arena.is_live(orphan));
    }

    #[test]
    fn test_sweep_follows_alternates() {
        let mut arena = FiberArena::new();
        let current = arena.alloc(text_fiber("a"));
        let wip = create_work_in_progress(&mut arena, current, FiberProps::Text("b".into()));

        let freed = arena.sweep([current]);
        assert_eq!(freed, 0);
        assert!(arena.is_live(wip));
    }
}
