//! The cooperative work loop: depth-first begin/complete traversal with
//! optional time slicing, plus the per-root entry points the scheduler
//! fires.
//!
//! A pass renders against one lane. If a different lane (or root) is
//! in flight when a pass starts, the work-in-progress tree is rebuilt
//! from scratch - partial progress at a superseded priority is never
//! kept. Sync passes run to exhaustion; concurrent passes check the
//! yield signal between units and suspend without losing position, since
//! the traversal cursor lives in the render session rather than on the
//! call stack.
//!
//! A panic inside a pass (component code or an interior invariant)
//! discards the work-in-progress wholesale: the pass commits nothing,
//! the lane is retired, and the error is logged. All-or-nothing per
//! attempt, no retry.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;

use crate::fiber::{FiberId, FiberProps, RootId, create_work_in_progress};
use crate::lanes::Lanes;

use super::{RuntimeError, RuntimeShared, TaskPayload};

/// How a render pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RootExitStatus {
    /// Yielded with work remaining; resume or abandon via scheduling.
    Incomplete,
    /// The whole tree was processed; a finished tree awaits commit.
    Completed,
    /// The pass panicked and was discarded.
    Errored,
}

impl RuntimeShared {
    /// Entry point for scheduler-driven (concurrent) work on a root.
    /// Returns the continuation payload when the pass yielded and should
    /// keep its callback.
    pub(crate) fn perform_concurrent_work_on_root(
        self: &Rc<Self>,
        root_id: RootId,
        did_timeout: bool,
    ) -> Result<Option<TaskPayload>, RuntimeError> {
        // Pending passive effects run first; they may dispatch updates
        // that outrank the work this callback was scheduled for.
        let callback_before_effects = self.roots.borrow()[root_id].callback;
        let did_flush = self.flush_passive_effects(root_id)?;
        if did_flush && self.roots.borrow()[root_id].callback != callback_before_effects {
            return Ok(None);
        }

        let lane = self.roots.borrow()[root_id].pending_lanes.highest_priority();
        let current_callback = self.roots.borrow()[root_id].callback;
        if lane == Lanes::NONE {
            return Ok(None);
        }

        // A timed-out task has been starved long enough: finish it in one
        // go, no more slicing.
        let need_sync = lane == Lanes::SYNC || did_timeout;
        let status = self.render_root(root_id, lane, !need_sync);

        if status == RootExitStatus::Errored {
            self.roots.borrow_mut()[root_id].mark_finished(lane);
        }
        self.ensure_root_scheduled(root_id);

        match status {
            RootExitStatus::Incomplete => {
                if self.roots.borrow()[root_id].callback != current_callback {
                    // A higher-priority lane re-registered the root; this
                    // pass is abandoned.
                    return Ok(None);
                }
                Ok(Some(TaskPayload::ConcurrentWork(root_id)))
            }
            RootExitStatus::Completed => {
                let finished = {
                    let roots = self.roots.borrow();
                    let arena = self.arena.borrow();
                    arena
                        .fiber(roots[root_id].current)
                        .alternate
                        .expect("completed render left no finished tree")
                };
                {
                    let mut roots = self.roots.borrow_mut();
                    roots[root_id].finished_work = Some(finished);
                    roots[root_id].finished_lane = lane;
                }
                self.session.borrow_mut().render_lane = Lanes::NONE;
                self.commit_root(root_id)?;
                Ok(None)
            }
            RootExitStatus::Errored => Ok(None),
        }
    }

    /// Entry point for microtask-flushed sync work on a root. Bursts of
    /// sync updates queue several of these; the first one consumes the
    /// lane and the rest bail.
    pub(crate) fn perform_sync_work_on_root(
        self: &Rc<Self>,
        root_id: RootId,
    ) -> Result<(), RuntimeError> {
        let next_lane = self.roots.borrow()[root_id].pending_lanes.highest_priority();
        if next_lane != Lanes::SYNC {
            self.ensure_root_scheduled(root_id);
            return Ok(());
        }

        let status = self.render_root(root_id, Lanes::SYNC, false);
        match status {
            RootExitStatus::Completed => {
                let finished = {
                    let roots = self.roots.borrow();
                    let arena = self.arena.borrow();
                    arena
                        .fiber(roots[root_id].current)
                        .alternate
                        .expect("completed render left no finished tree")
                };
                {
                    let mut roots = self.roots.borrow_mut();
                    roots[root_id].finished_work = Some(finished);
                    roots[root_id].finished_lane = Lanes::SYNC;
                }
                self.session.borrow_mut().render_lane = Lanes::NONE;
                self.commit_root(root_id)
            }
            RootExitStatus::Errored => {
                self.roots.borrow_mut()[root_id].mark_finished(Lanes::SYNC);
                self.ensure_root_scheduled(root_id);
                Ok(())
            }
            RootExitStatus::Incomplete => {
                tracing::error!("sync render pass reported incomplete");
                Ok(())
            }
        }
    }

    /// Rebuild the work-in-progress from the committed tree and re-arm
    /// the session for `lane`.
    fn prepare_fresh_stack(&self, root_id: RootId, lane: Lanes) {
        {
            let mut roots = self.roots.borrow_mut();
            roots[root_id].finished_work = None;
            roots[root_id].finished_lane = Lanes::NONE;
        }
        let current = self.roots.borrow()[root_id].current;
        let wip = create_work_in_progress(&mut self.arena.borrow_mut(), current, FiberProps::Root);

        let mut session = self.session.borrow_mut();
        session.reset();
        session.wip = Some(wip);
        session.wip_root = Some(root_id);
        session.render_lane = lane;
    }

    /// One render attempt at `lane`. `time_slice` selects the concurrent
    /// loop, which consults the yield signal between units.
    pub(crate) fn render_root(
        self: &Rc<Self>,
        root_id: RootId,
        lane: Lanes,
        time_slice: bool,
    ) -> RootExitStatus {
        tracing::debug!(root = root_id, ?lane, concurrent = time_slice, "render pass");

        {
            let session = self.session.borrow();
            let in_flight = session.wip_root == Some(root_id) && session.render_lane == lane;
            drop(session);
            if !in_flight {
                self.prepare_fresh_stack(root_id, lane);
            }
        }

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            if time_slice {
                self.work_loop_concurrent();
            } else {
                self.work_loop_sync();
            }
        }));

        match outcome {
            Ok(()) => {
                let remaining = self.session.borrow().wip;
                if time_slice && remaining.is_some() {
                    return RootExitStatus::Incomplete;
                }
                if remaining.is_some() {
                    tracing::error!("sync render pass ended with work remaining");
                }
                RootExitStatus::Completed
            }
            Err(payload) => {
                tracing::error!(
                    root = root_id,
                    error = panic_message(payload.as_ref()),
                    "render pass panicked; discarding work in progress"
                );
                self.session.borrow_mut().reset();
                RootExitStatus::Errored
            }
        }
    }

    fn work_loop_sync(self: &Rc<Self>) {
        loop {
            let Some(wip) = self.session.borrow().wip else {
                break;
            };
            self.perform_unit_of_work(wip);
        }
    }

    fn work_loop_concurrent(self: &Rc<Self>) {
        loop {
            let Some(wip) = self.session.borrow().wip else {
                break;
            };
            if self.scheduler.borrow_mut().should_yield() {
                break;
            }
            self.perform_unit_of_work(wip);
        }
    }

    /// The "begin" step: resolve the unit's children, then either descend
    /// or bubble through "complete".
    fn perform_unit_of_work(self: &Rc<Self>, fiber: FiberId) {
        let render_lane = self.session.borrow().render_lane;
        let next = self.begin_work(fiber, render_lane);
        {
            let mut arena = self.arena.borrow_mut();
            let f = arena.fiber_mut(fiber);
            f.memoized_props = Some(f.pending_props.clone());
        }
        match next {
            Some(child) => self.session.borrow_mut().wip = Some(child),
            None => self.complete_unit_of_work(fiber),
        }
    }

    /// The "complete" step: finish units bottom-up until a sibling opens
    /// a new branch.
    fn complete_unit_of_work(&self, fiber: FiberId) {
        let mut node = Some(fiber);
        while let Some(current) = node {
            self.complete_work(current);

            let sibling = self.arena.borrow().fiber(current).sibling;
            if let Some(sibling) = sibling {
                self.session.borrow_mut().wip = Some(sibling);
                return;
            }
            node = self.arena.borrow().fiber(current).parent;
            self.session.borrow_mut().wip = node;
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}
