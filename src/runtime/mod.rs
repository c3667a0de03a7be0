//! Runtime - roots, scheduling, and the embedder-facing drive API.
//!
//! A [`Runtime`] owns everything: the fiber arena, the registered roots,
//! the cooperative scheduler, and the single render session whose
//! cursors make an interrupted traversal resumable. The embedder drives
//! it explicitly:
//!
//! ```
//! use reweave::{Element, MemoryHost, Props, Runtime};
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! let host = Rc::new(RefCell::new(MemoryHost::new()));
//! let container = host.borrow_mut().create_container();
//!
//! let runtime = Runtime::new(host.clone());
//! let root = runtime.create_root(container);
//! root.render(Element::host("div", Props::new(), "hello"));
//! runtime.flush().unwrap();
//!
//! assert_eq!(host.borrow().markup(container), "<div>hello</div>");
//! ```
//!
//! Scheduling keeps exactly one registered callback per root, at the
//! priority of the highest pending lane. Sync-lane work goes through a
//! dedicated callback queue flushed in a microtask, so a synchronous
//! burst of updates collapses into one render pass; everything else is a
//! cancellable scheduler callback that may be time-sliced.

mod begin;
mod commit;
mod complete;
mod work_loop;

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use thiserror::Error;

use crate::context::ProviderEntry;
use crate::element::Element;
use crate::fiber::{
    Fiber, FiberArena, FiberId, FiberKind, FiberProps, FiberState, RootId, RootNode, RootSlot,
};
use crate::host::{Host, InstanceId};
use crate::lanes::{Lanes, lanes_to_priority, priority_to_lane};
use crate::scheduler::{DueTask, Priority, Scheduler, YieldPolicy};
use crate::update_queue::{Action, Update};

/// Fatal errors surfaced by the drive API. These are invariant
/// violations, not recoverable conditions; the host tree may be left
/// mid-mutation.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("no host parent found while placing a node")]
    HostParentMissing,
}

/// Which dispatch table the hook primitives use during an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HookPhase {
    Mount,
    Update,
}

/// The work a scheduler callback performs when it fires.
#[derive(Debug, Clone, Copy)]
pub(crate) enum TaskPayload {
    /// A (possibly time-sliced) render pass on a root.
    ConcurrentWork(RootId),
    /// Deferred flush of staged passive effects.
    FlushPassive(RootId),
    /// Microtask flush of the sync callback queue.
    FlushSyncQueue,
}

/// The process-wide render cursors (work-in-progress pointer, hooks
/// cursor, provider stack). Living here rather than on the call stack is
/// what lets a concurrent pass suspend between units and resume exactly
/// where it left off.
pub(crate) struct RenderSession {
    pub wip: Option<FiberId>,
    pub wip_root: Option<RootId>,
    pub render_lane: Lanes,
    pub rendering_fiber: Option<FiberId>,
    pub hook_index: usize,
    pub hook_phase: HookPhase,
    pub context_stack: Vec<ProviderEntry>,
}

impl RenderSession {
    fn new() -> Self {
        Self {
            wip: None,
            wip_root: None,
            render_lane: Lanes::NONE,
            rendering_fiber: None,
            hook_index: 0,
            hook_phase: HookPhase::Mount,
            context_stack: Vec::new(),
        }
    }

    /// Drop all in-flight render state (abandoned or failed pass).
    pub fn reset(&mut self) {
        self.wip = None;
        self.wip_root = None;
        self.render_lane = Lanes::NONE;
        self.rendering_fiber = None;
        self.hook_index = 0;
        self.context_stack.clear();
    }
}

pub(crate) struct RuntimeShared {
    pub(crate) arena: RefCell<FiberArena>,
    pub(crate) roots: RefCell<Vec<RootNode>>,
    pub(crate) scheduler: RefCell<Scheduler<TaskPayload>>,
    pub(crate) session: RefCell<RenderSession>,
    pub(crate) sync_queue: RefCell<Vec<RootId>>,
    pub(crate) flushing_sync: Cell<bool>,
    /// The deferred-transition marker: while set, new updates take the
    /// idle lane.
    pub(crate) transition: Cell<bool>,
    pub(crate) host: RefCell<Box<dyn Host>>,
}

/// Tuning knobs for a runtime instance.
#[derive(Debug, Clone, Default)]
pub struct RuntimeOptions {
    pub yield_policy: YieldPolicy,
}

/// The reconciliation runtime. Single-threaded; clones of the handles it
/// gives out ([`Root`], dispatches, transition starters) all point back
/// at the same shared state.
pub struct Runtime {
    shared: Rc<RuntimeShared>,
}

impl Runtime {
    pub fn new(host: impl Host + 'static) -> Self {
        Self::with_options(host, RuntimeOptions::default())
    }

    pub fn with_options(host: impl Host + 'static, options: RuntimeOptions) -> Self {
        Self {
            shared: Rc::new(RuntimeShared {
                arena: RefCell::new(FiberArena::new()),
                roots: RefCell::new(Vec::new()),
                scheduler: RefCell::new(Scheduler::new(options.yield_policy)),
                session: RefCell::new(RenderSession::new()),
                sync_queue: RefCell::new(Vec::new()),
                flushing_sync: Cell::new(false),
                transition: Cell::new(false),
                host: RefCell::new(Box::new(host)),
            }),
        }
    }

    /// Register a mount target and return its render handle.
    pub fn create_root(&self, container: InstanceId) -> Root {
        let fiber_id = {
            let mut arena = self.shared.arena.borrow_mut();
            let mut fiber = Fiber::new(FiberKind::HostRoot, FiberProps::Root, None);
            fiber.state = FiberState::Root(RootSlot::new());
            fiber.instance = Some(container);
            arena.alloc(fiber)
        };
        let root_id = {
            let mut roots = self.shared.roots.borrow_mut();
            let id = roots.len();
            roots.push(RootNode::new(container, fiber_id));
            id
        };
        self.shared.arena.borrow_mut().fiber_mut(fiber_id).root = Some(root_id);
        tracing::debug!(root = root_id, "root created");
        Root {
            shared: self.shared.clone(),
            id: root_id,
        }
    }

    /// Run one scheduled callback (plus surrounding microtasks). Returns
    /// whether any work happened.
    pub fn tick(&self) -> Result<bool, RuntimeError> {
        let mut did_work = self.drain_microtasks()?;

        let task = self.shared.scheduler.borrow_mut().take_next_task();
        if let Some(task) = task {
            did_work = true;
            self.shared.run_task(task)?;
            self.drain_microtasks()?;
        }
        Ok(did_work)
    }

    /// Drive until no scheduled work remains.
    pub fn flush(&self) -> Result<(), RuntimeError> {
        while self.tick()? {}
        Ok(())
    }

    /// Run `f` with the ambient scheduler priority pinned to `priority`,
    /// the way a host event-delegation layer dispatches handlers. Updates
    /// dispatched inside derive their lane from it. Microtasks queued by
    /// `f` (sync flushes) run before this returns.
    pub fn run_with_priority<R>(
        &self,
        priority: Priority,
        f: impl FnOnce() -> R,
    ) -> Result<R, RuntimeError> {
        let prev = self
            .shared
            .scheduler
            .borrow_mut()
            .set_current_priority(priority);
        let result = f();
        self.shared.scheduler.borrow_mut().set_current_priority(prev);
        self.drain_microtasks()?;
        Ok(result)
    }

    /// Whether any callbacks or microtasks are queued.
    pub fn has_pending_work(&self) -> bool {
        self.shared.scheduler.borrow().has_pending()
    }

    fn drain_microtasks(&self) -> Result<bool, RuntimeError> {
        let mut any = false;
        loop {
            let next = self.shared.scheduler.borrow_mut().take_microtask();
            let Some(payload) = next else { break };
            any = true;
            match payload {
                TaskPayload::FlushSyncQueue => self.shared.flush_sync_callbacks()?,
                other => {
                    tracing::warn!(?other, "unexpected microtask payload");
                }
            }
        }
        Ok(any)
    }
}

/// Handle to a mounted root: `render` enqueues a new intent tree.
pub struct Root {
    shared: Rc<RuntimeShared>,
    id: RootId,
}

impl Root {
    /// Request that the root's tree match `element`. The work is
    /// scheduled, not performed inline; drive the runtime to observe it.
    pub fn render(&self, element: Element) {
        let lane = self.shared.request_update_lane();
        let queue = self.shared.roots.borrow()[self.id].queue.clone();
        queue.borrow_mut().enqueue(Update {
            action: Action::Replace(Some(element)),
            lane,
        });
        tracing::debug!(root = self.id, ?lane, "render requested");
        self.shared.roots.borrow_mut()[self.id].mark_updated(lane);
        self.shared.ensure_root_scheduled(self.id);
    }

    pub fn container(&self) -> InstanceId {
        self.shared.roots.borrow()[self.id].container
    }
}

// =============================================================================
// Scheduling
// =============================================================================

impl RuntimeShared {
    fn run_task(self: &Rc<Self>, task: DueTask<TaskPayload>) -> Result<(), RuntimeError> {
        let prev = self
            .scheduler
            .borrow_mut()
            .set_current_priority(task.priority);
        let result = (|| match task.payload {
            TaskPayload::ConcurrentWork(root_id) => {
                self.scheduler.borrow_mut().start_slice();
                if let Some(continuation) =
                    self.perform_concurrent_work_on_root(root_id, task.timed_out)?
                {
                    // An interrupted pass continues under the same handle
                    // so supersession stays detectable by identity.
                    self.scheduler
                        .borrow_mut()
                        .reschedule(task.id, task.priority, continuation);
                }
                Ok(())
            }
            TaskPayload::FlushPassive(root_id) => {
                self.flush_passive_effects(root_id)?;
                Ok(())
            }
            TaskPayload::FlushSyncQueue => self.flush_sync_callbacks(),
        })();
        self.scheduler.borrow_mut().set_current_priority(prev);
        result
    }

    /// The lane a newly dispatched update belongs to, derived from the
    /// ambient scheduler priority - unless a transition scope is open,
    /// which defers the work to the idle lane.
    pub(crate) fn request_update_lane(&self) -> Lanes {
        if self.transition.get() {
            return Lanes::IDLE;
        }
        priority_to_lane(self.scheduler.borrow().current_priority())
    }

    /// Route a dispatched update to its owning root and (re)schedule.
    /// Updates against retired units are silently dropped.
    pub(crate) fn schedule_update_on_fiber(&self, fiber: FiberId, lane: Lanes) {
        let Some(root_id) = self.find_root_of(fiber) else {
            tracing::debug!("update dispatched to a retired unit; ignoring");
            return;
        };
        self.roots.borrow_mut()[root_id].mark_updated(lane);
        self.ensure_root_scheduled(root_id);
    }

    fn find_root_of(&self, fiber: FiberId) -> Option<RootId> {
        let arena = self.arena.borrow();
        let mut node = arena.get(fiber)?;
        while let Some(parent) = node.parent {
            node = arena.get(parent)?;
        }
        if node.kind == FiberKind::HostRoot {
            node.root
        } else {
            None
        }
    }

    /// Keep exactly one registered callback per root, at the priority of
    /// its highest pending lane. Equal priority keeps the existing
    /// callback; anything else cancels and re-registers.
    pub(crate) fn ensure_root_scheduled(&self, root_id: RootId) {
        let (update_lane, existing, prev_priority) = {
            let roots = self.roots.borrow();
            let root = &roots[root_id];
            (
                root.pending_lanes.highest_priority(),
                root.callback,
                root.callback_priority,
            )
        };

        if update_lane == Lanes::NONE {
            if let Some(callback) = existing {
                self.scheduler.borrow_mut().cancel_callback(callback);
            }
            let mut roots = self.roots.borrow_mut();
            roots[root_id].callback = None;
            roots[root_id].callback_priority = Lanes::NONE;
            return;
        }

        if update_lane == prev_priority {
            return;
        }

        if let Some(callback) = existing {
            self.scheduler.borrow_mut().cancel_callback(callback);
        }

        let new_callback = if update_lane == Lanes::SYNC {
            // Later sync requests in the same burst hit the equal-priority
            // early return above, so the burst flushes as one pass.
            self.sync_queue.borrow_mut().push(root_id);
            self.scheduler
                .borrow_mut()
                .schedule_microtask(TaskPayload::FlushSyncQueue);
            tracing::debug!(root = root_id, "sync flush scheduled in microtask");
            None
        } else {
            let priority = lanes_to_priority(update_lane);
            Some(
                self.scheduler
                    .borrow_mut()
                    .schedule_callback(priority, TaskPayload::ConcurrentWork(root_id)),
            )
        };

        let mut roots = self.roots.borrow_mut();
        roots[root_id].callback = new_callback;
        roots[root_id].callback_priority = update_lane;
    }

    /// Drain the sync callback queue, including work the drained
    /// callbacks enqueue while running. Re-entrant calls no-op.
    pub(crate) fn flush_sync_callbacks(self: &Rc<Self>) -> Result<(), RuntimeError> {
        if self.flushing_sync.get() {
            return Ok(());
        }
        self.flushing_sync.set(true);
        let result = (|| {
            loop {
                let batch: Vec<RootId> = std::mem::take(&mut *self.sync_queue.borrow_mut());
                if batch.is_empty() {
                    break;
                }
                for root_id in batch {
                    self.perform_sync_work_on_root(root_id)?;
                }
            }
            Ok(())
        })();
        self.flushing_sync.set(false);
        result
    }

    /// Read a provider value pushed for `context_id`, innermost first.
    /// Exposed for hook reads through the session stack.
    pub(crate) fn push_provider(&self, context_id: u32, value: Rc<dyn Any>) {
        self.session
            .borrow_mut()
            .context_stack
            .push((context_id, value));
    }

    pub(crate) fn pop_provider(&self) {
        self.session.borrow_mut().context_stack.pop();
    }
}
