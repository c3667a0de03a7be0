//! Hooks engine - per-unit stateful primitives for function components.
//!
//! While a function component runs, the runtime keeps two cursors: the
//! unit being rendered and an index into its hook list. On update renders
//! the index also walks the *previous* generation's hook list in lockstep
//! to source prior values. Each primitive has a mount and an update
//! variant, selected by the active [`HookPhase`].
//!
//! The cardinal invariant: a component must invoke the same hooks in the
//! same order on every render. Running past the end of the previous
//! render's list is a fatal, user-visible error - the model cannot
//! reconcile it.

use std::any::Any;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::context::{Context, read_from_stack};
use crate::element::Element;
use crate::fiber::{FiberId, FiberState};
use crate::flags::{Flags, HookFlags};
use crate::lanes::Lanes;
use crate::runtime::{HookPhase, RuntimeShared};
use crate::update_queue::{
    Action, SharedQueue, Update, new_shared_queue, process_update_queue,
};

// =============================================================================
// Records
// =============================================================================

/// A cleanup callback returned by an effect's create callback.
pub type Cleanup = Box<dyn FnOnce()>;

/// Wrap a callback as an effect cleanup (sugar for `Some(Box::new(f))`).
pub fn cleanup(f: impl FnOnce() + 'static) -> Option<Cleanup> {
    Some(Box::new(f))
}

/// One lifecycle-effect record. A fresh record is created per invocation;
/// the cleanup returned by the previous run travels forward in a cell
/// shared by every generation of the invocation site, so an abandoned
/// render pass cannot strand it.
pub(crate) struct Effect {
    pub tag: HookFlags,
    pub create: Option<Box<dyn FnOnce() -> Option<Cleanup>>>,
    pub destroy: Rc<RefCell<Option<Cleanup>>>,
    pub deps: Option<Vec<Dep>>,
}

/// A dependency-list member, compared with `Object.is`-like semantics:
/// floats by bit pattern, shared values by `Rc` identity.
#[derive(Clone)]
pub enum Dep {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Shared(Rc<dyn Any>),
}

impl std::fmt::Debug for Dep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dep::Int(n) => write!(f, "{n}"),
            Dep::Float(n) => write!(f, "{n}"),
            Dep::Bool(b) => write!(f, "{b}"),
            Dep::Str(s) => write!(f, "{s:?}"),
            Dep::Shared(rc) => write!(f, "<shared@{:p}>", Rc::as_ptr(rc)),
        }
    }
}

impl PartialEq for Dep {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Dep::Int(a), Dep::Int(b)) => a == b,
            (Dep::Float(a), Dep::Float(b)) => a.to_bits() == b.to_bits(),
            (Dep::Bool(a), Dep::Bool(b)) => a == b,
            (Dep::Str(a), Dep::Str(b)) => a == b,
            (Dep::Shared(a), Dep::Shared(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<i64> for Dep {
    fn from(value: i64) -> Self {
        Dep::Int(value)
    }
}

impl From<i32> for Dep {
    fn from(value: i32) -> Self {
        Dep::Int(value as i64)
    }
}

impl From<usize> for Dep {
    fn from(value: usize) -> Self {
        Dep::Int(value as i64)
    }
}

impl From<f64> for Dep {
    fn from(value: f64) -> Self {
        Dep::Float(value)
    }
}

impl From<bool> for Dep {
    fn from(value: bool) -> Self {
        Dep::Bool(value)
    }
}

impl From<&str> for Dep {
    fn from(value: &str) -> Self {
        Dep::Str(value.to_string())
    }
}

impl From<String> for Dep {
    fn from(value: String) -> Self {
        Dep::Str(value)
    }
}

/// Compare dependency lists member-by-member. A missing list on either
/// side always re-runs.
fn hook_inputs_equal(next: Option<&[Dep]>, prev: Option<&[Dep]>) -> bool {
    let (Some(next), Some(prev)) = (next, prev) else {
        return false;
    };
    next.iter().zip(prev.iter()).all(|(a, b)| a == b)
}

/// One hook record, one per primitive invocation site.
pub(crate) struct Hook {
    pub slot: HookSlot,
}

pub(crate) enum HookSlot {
    /// A `StateSlot<S>` behind `dyn Any`; the concrete `S` is recovered
    /// at the invocation site.
    State(Box<dyn Any>),
    Effect(Rc<RefCell<Effect>>),
    Transition(TransitionStart),
    /// An `Rc<RefCell<T>>` behind `dyn Any`.
    Ref(Rc<dyn Any>),
}

impl HookSlot {
    fn kind_name(&self) -> &'static str {
        match self {
            HookSlot::State(_) => "state",
            HookSlot::Effect(_) => "effect",
            HookSlot::Transition(_) => "transition",
            HookSlot::Ref(_) => "ref",
        }
    }
}

/// The typed payload of a state hook.
pub(crate) struct StateSlot<S> {
    pub memoized: S,
    pub base_state: S,
    pub base_queue: Vec<Update<S>>,
    pub queue: SharedQueue<S>,
    pub dispatch: Dispatch<S>,
}

// =============================================================================
// Dispatch
// =============================================================================

/// The setter half of a state hook. Cheap to clone, callable from any
/// event handler; dispatching requests a lane from the ambient scheduler
/// priority, enqueues the transition, and schedules a render toward the
/// owning root. Handles whose unit has been retired no-op.
pub struct Dispatch<S> {
    runtime: Weak<RuntimeShared>,
    fiber: FiberId,
    queue: SharedQueue<S>,
}

impl<S> Clone for Dispatch<S> {
    fn clone(&self) -> Self {
        Self {
            runtime: self.runtime.clone(),
            fiber: self.fiber,
            queue: self.queue.clone(),
        }
    }
}

impl<S: Clone + 'static> Dispatch<S> {
    /// Replace the state outright.
    pub fn set(&self, value: S) {
        self.dispatch(Action::Replace(value));
    }

    /// Transition the state through a pure function of the previous value.
    pub fn update(&self, f: impl Fn(&S) -> S + 'static) {
        self.dispatch(Action::Apply(Rc::new(f)));
    }

    fn dispatch(&self, action: Action<S>) {
        let Some(runtime) = self.runtime.upgrade() else {
            return;
        };
        let lane = runtime.request_update_lane();
        self.queue.borrow_mut().enqueue(Update { action, lane });
        runtime.schedule_update_on_fiber(self.fiber, lane);
    }
}

// =============================================================================
// Transitions
// =============================================================================

/// Starter handle returned by [`HookCtx::use_transition`]. Identity is
/// stable across renders of the owning unit.
#[derive(Clone)]
pub struct TransitionStart {
    set_pending: Dispatch<bool>,
    runtime: Weak<RuntimeShared>,
}

impl TransitionStart {
    /// Run `scope` with its state updates tagged as deferred work.
    ///
    /// The pending flag flips on at ambient priority before the marker is
    /// set and flips off inside the marker's span, so it clears only when
    /// the deferred work itself commits.
    pub fn start(&self, scope: impl FnOnce()) {
        self.set_pending.set(true);
        let Some(runtime) = self.runtime.upgrade() else {
            return;
        };
        let prev = runtime.transition.replace(true);
        scope();
        self.set_pending.set(false);
        runtime.transition.set(prev);
    }
}

// =============================================================================
// Hook context
// =============================================================================

/// Handle through which a function component reaches its stateful
/// primitives. Only valid during the component's invocation.
pub struct HookCtx {
    shared: Rc<RuntimeShared>,
}

impl HookCtx {
    fn current_fiber(&self) -> FiberId {
        self.shared
            .session
            .borrow()
            .rendering_fiber
            .expect("hooks may only be called while a function component is rendering")
    }

    fn phase(&self) -> HookPhase {
        self.shared.session.borrow().hook_phase
    }

    /// Advance the shared hook cursor, returning this invocation's index.
    fn next_hook_index(&self) -> usize {
        let mut session = self.shared.session.borrow_mut();
        let index = session.hook_index;
        session.hook_index += 1;
        index
    }

    fn push_hook(&self, fiber: FiberId, hook: Hook) {
        let mut arena = self.shared.arena.borrow_mut();
        match &mut arena.fiber_mut(fiber).state {
            FiberState::Hooks(hooks) => hooks.push(hook),
            state => {
                *state = FiberState::Hooks(vec![hook]);
            }
        }
    }

    /// Read the previous render's hook at `index`, failing loudly when
    /// the component invoked more hooks than last time.
    fn with_prev_hook<R>(&self, fiber: FiberId, index: usize, f: impl FnOnce(&mut Hook) -> R) -> R {
        let mut arena = self.shared.arena.borrow_mut();
        let alternate = arena
            .fiber(fiber)
            .alternate
            .expect("update render without a previous generation");
        let prev = arena.fiber_mut(alternate);
        let FiberState::Hooks(hooks) = &mut prev.state else {
            panic!("previous render left no hook list behind");
        };
        let Some(hook) = hooks.get_mut(index) else {
            panic!("component invoked more hooks than during its previous render");
        };
        f(hook)
    }

    // =========================================================================
    // State
    // =========================================================================

    /// Declare a state cell with an eagerly-computed initial value.
    pub fn use_state<S: Clone + 'static>(&mut self, initial: S) -> (S, Dispatch<S>) {
        self.use_state_init(move || initial)
    }

    /// Declare a state cell, computing the initial value only on mount.
    pub fn use_state_init<S, F>(&mut self, init: F) -> (S, Dispatch<S>)
    where
        S: Clone + 'static,
        F: FnOnce() -> S,
    {
        let fiber = self.current_fiber();
        let index = self.next_hook_index();
        match self.phase() {
            HookPhase::Mount => self.mount_state(fiber, init),
            HookPhase::Update => self.update_state(fiber, index),
        }
    }

    fn mount_state<S: Clone + 'static>(
        &mut self,
        fiber: FiberId,
        init: impl FnOnce() -> S,
    ) -> (S, Dispatch<S>) {
        let memoized = init();
        let queue = new_shared_queue();
        let dispatch = Dispatch {
            runtime: Rc::downgrade(&self.shared),
            fiber,
            queue: queue.clone(),
        };
        let slot = StateSlot {
            memoized: memoized.clone(),
            base_state: memoized.clone(),
            base_queue: Vec::new(),
            queue,
            dispatch: dispatch.clone(),
        };
        self.push_hook(
            fiber,
            Hook {
                slot: HookSlot::State(Box::new(slot)),
            },
        );
        (memoized, dispatch)
    }

    fn update_state<S: Clone + 'static>(
        &mut self,
        fiber: FiberId,
        index: usize,
    ) -> (S, Dispatch<S>) {
        let render_lanes = self.shared.session.borrow().render_lane;

        // Merge newly arrived updates after the carried-forward base queue
        // and persist the merged list on the previous-generation record,
        // so an abandoned pass can replay from there.
        let (merged, base_state, queue, dispatch) = self.with_prev_hook(fiber, index, |hook| {
            let HookSlot::State(any) = &mut hook.slot else {
                panic!(
                    "hook order changed between renders: expected state, found {}",
                    hook.slot.kind_name()
                );
            };
            let slot = any
                .downcast_mut::<StateSlot<S>>()
                .expect("state hook changed type between renders");
            let pending = slot.queue.borrow_mut().drain_pending();
            slot.base_queue.extend(pending);
            (
                slot.base_queue.clone(),
                slot.base_state.clone(),
                slot.queue.clone(),
                slot.dispatch.clone(),
            )
        });

        // Replay outside any borrow: function actions are caller code.
        let processed = process_update_queue(base_state, &merged, render_lanes);

        let slot = StateSlot {
            memoized: processed.memoized.clone(),
            base_state: processed.base_state,
            base_queue: processed.base_queue,
            queue,
            dispatch: dispatch.clone(),
        };
        self.push_hook(
            fiber,
            Hook {
                slot: HookSlot::State(Box::new(slot)),
            },
        );
        (processed.memoized, dispatch)
    }

    // =========================================================================
    // Effects
    // =========================================================================

    /// Declare a passive lifecycle effect.
    ///
    /// `deps: None` re-runs every render. `Some([])` runs exactly once on
    /// mount (and cleans up on unmount). Otherwise the effect re-runs only
    /// when a member changes by identity.
    pub fn use_effect(
        &mut self,
        create: impl FnOnce() -> Option<Cleanup> + 'static,
        deps: Option<Vec<Dep>>,
    ) {
        let fiber = self.current_fiber();
        let index = self.next_hook_index();
        match self.phase() {
            HookPhase::Mount => {
                let effect = Rc::new(RefCell::new(Effect {
                    tag: HookFlags::PASSIVE | HookFlags::HAS_EFFECT,
                    create: Some(Box::new(create)),
                    destroy: Rc::new(RefCell::new(None)),
                    deps,
                }));
                self.stage_effect(fiber, effect, true);
            }
            HookPhase::Update => {
                let (destroy, prev_deps) = self.with_prev_hook(fiber, index, |hook| {
                    let HookSlot::Effect(prev) = &hook.slot else {
                        panic!(
                            "hook order changed between renders: expected effect, found {}",
                            hook.slot.kind_name()
                        );
                    };
                    let prev = prev.borrow();
                    (prev.destroy.clone(), prev.deps.clone())
                });

                let unchanged = hook_inputs_equal(deps.as_deref(), prev_deps.as_deref());
                let tag = if unchanged {
                    HookFlags::PASSIVE
                } else {
                    HookFlags::PASSIVE | HookFlags::HAS_EFFECT
                };
                let effect = Rc::new(RefCell::new(Effect {
                    tag,
                    create: Some(Box::new(create)),
                    destroy,
                    deps,
                }));
                self.stage_effect(fiber, effect, !unchanged);
            }
        }
    }

    fn stage_effect(&self, fiber: FiberId, effect: Rc<RefCell<Effect>>, flag_owner: bool) {
        {
            let mut arena = self.shared.arena.borrow_mut();
            let f = arena.fiber_mut(fiber);
            f.effects.push(effect.clone());
            if flag_owner {
                f.flags |= Flags::PASSIVE_EFFECT;
            }
        }
        self.push_hook(
            fiber,
            Hook {
                slot: HookSlot::Effect(effect),
            },
        );
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// Declare a deferred-transition pair: the pending flag and a starter
    /// whose identity is stable across renders.
    pub fn use_transition(&mut self) -> (bool, TransitionStart) {
        let (pending, set_pending) = self.use_state(false);
        let fiber = self.current_fiber();
        let index = self.next_hook_index();
        match self.phase() {
            HookPhase::Mount => {
                let start = TransitionStart {
                    set_pending,
                    runtime: Rc::downgrade(&self.shared),
                };
                self.push_hook(
                    fiber,
                    Hook {
                        slot: HookSlot::Transition(start.clone()),
                    },
                );
                (pending, start)
            }
            HookPhase::Update => {
                let start = self.with_prev_hook(fiber, index, |hook| {
                    let HookSlot::Transition(start) = &hook.slot else {
                        panic!(
                            "hook order changed between renders: expected transition, found {}",
                            hook.slot.kind_name()
                        );
                    };
                    start.clone()
                });
                self.push_hook(
                    fiber,
                    Hook {
                        slot: HookSlot::Transition(start.clone()),
                    },
                );
                (pending, start)
            }
        }
    }

    // =========================================================================
    // Refs
    // =========================================================================

    /// Declare a mutable cell that survives renders without triggering
    /// them.
    pub fn use_ref<T: 'static>(&mut self, init: impl FnOnce() -> T) -> Rc<RefCell<T>> {
        let fiber = self.current_fiber();
        let index = self.next_hook_index();
        match self.phase() {
            HookPhase::Mount => {
                let cell = Rc::new(RefCell::new(init()));
                self.push_hook(
                    fiber,
                    Hook {
                        slot: HookSlot::Ref(cell.clone()),
                    },
                );
                cell
            }
            HookPhase::Update => {
                let any = self.with_prev_hook(fiber, index, |hook| {
                    let HookSlot::Ref(cell) = &hook.slot else {
                        panic!(
                            "hook order changed between renders: expected ref, found {}",
                            hook.slot.kind_name()
                        );
                    };
                    cell.clone()
                });
                let cell = any
                    .downcast::<RefCell<T>>()
                    .expect("ref hook changed type between renders");
                self.push_hook(
                    fiber,
                    Hook {
                        slot: HookSlot::Ref(cell.clone()),
                    },
                );
                cell
            }
        }
    }

    // =========================================================================
    // Context
    // =========================================================================

    /// Read the innermost provided value for `context`. Carries no
    /// per-render slot; this is an ambient lookup.
    pub fn use_context<T: Clone + 'static>(&self, context: &Context<T>) -> T {
        let _ = self.current_fiber();
        let session = self.shared.session.borrow();
        read_from_stack(&session.context_stack, context)
    }
}

// =============================================================================
// Component invocation
// =============================================================================

/// Invoke the function component owned by `wip`, with the hook cursors
/// armed for it.
pub(crate) fn render_with_hooks(
    shared: &Rc<RuntimeShared>,
    wip: FiberId,
    lane: Lanes,
) -> Element {
    let (func, props, is_update) = {
        let mut arena = shared.arena.borrow_mut();
        let fiber = arena.fiber_mut(wip);
        // Reset the unit's hook and effect lists; they rebuild in
        // invocation order below.
        fiber.state = FiberState::Hooks(Vec::new());
        fiber.effects.clear();

        let Some(crate::fiber::ElemType::Component(func)) = fiber.elem_type.clone() else {
            panic!("render_with_hooks on a non-component unit");
        };
        let crate::fiber::FiberProps::Component(props) = fiber.pending_props.clone() else {
            panic!("component unit carries non-component props");
        };
        (func, props, fiber.alternate.is_some())
    };

    {
        let mut session = shared.session.borrow_mut();
        session.rendering_fiber = Some(wip);
        session.hook_index = 0;
        session.hook_phase = if is_update {
            HookPhase::Update
        } else {
            HookPhase::Mount
        };
        session.render_lane = lane;
    }

    let mut ctx = HookCtx {
        shared: shared.clone(),
    };
    let children = func(&mut ctx, &props);

    {
        let mut session = shared.session.borrow_mut();
        session.rendering_fiber = None;
        session.hook_index = 0;
    }

    children
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dep_identity_semantics() {
        assert_eq!(Dep::from(3), Dep::from(3i64));
        assert_ne!(Dep::from(3), Dep::from(4));
        assert_eq!(Dep::Float(f64::NAN), Dep::Float(f64::NAN));
        assert_ne!(Dep::Float(0.0), Dep::Float(-0.0));

        let shared: Rc<dyn Any> = Rc::new(5u8);
        assert_eq!(Dep::Shared(shared.clone()), Dep::Shared(shared.clone()));
        assert_ne!(
            Dep::Shared(Rc::new(5u8)),
            Dep::Shared(Rc::new(5u8))
        );
    }

    #[test]
    fn test_hook_inputs_equal() {
        assert!(hook_inputs_equal(
            Some(&[Dep::from(1), Dep::from("a")]),
            Some(&[Dep::from(1), Dep::from("a")])
        ));
        assert!(!hook_inputs_equal(
            Some(&[Dep::from(1)]),
            Some(&[Dep::from(2)])
        ));
        // A missing list on either side always re-runs.
        assert!(!hook_inputs_equal(None, None));
        assert!(!hook_inputs_equal(Some(&[Dep::from(1)]), None));
        // Empty lists are equal: run-once semantics.
        assert!(hook_inputs_equal(Some(&[]), Some(&[])));
    }
}
