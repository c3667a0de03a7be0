//! Cooperative task scheduler.
//!
//! A deterministic, in-process implementation of the scheduling contract
//! the work loop consumes: five ordered priority levels, cancellable
//! callbacks with stable identity across continuations, a microtask
//! queue, an ambient current-priority query, and a yield signal.
//!
//! The scheduler never spins a thread or an event loop of its own. The
//! embedder drives it through [`crate::runtime::Runtime::tick`] /
//! [`crate::runtime::Runtime::flush`], the same manual-drive shape as a
//! terminal poll loop. Yielding is governed by a [`YieldPolicy`] so tests
//! can force a suspension after an exact number of work units.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// The five ordered priority levels, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Immediate = 1,
    UserBlocking = 2,
    Normal = 3,
    Low = 4,
    Idle = 5,
}

impl Priority {
    /// How long a task at this level may sit in the queue before it is
    /// handed out as timed-out (and must then run to completion).
    fn timeout(self) -> Option<Duration> {
        match self {
            // Immediate work is born expired.
            Priority::Immediate => Some(Duration::ZERO),
            Priority::UserBlocking => Some(Duration::from_millis(250)),
            Priority::Normal => Some(Duration::from_secs(5)),
            Priority::Low => Some(Duration::from_secs(10)),
            Priority::Idle => None,
        }
    }
}

/// Handle identifying a scheduled callback.
///
/// Identity is stable across continuations: a task that yields and is
/// rescheduled keeps its handle, so "was my callback superseded?" is a
/// plain equality check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

/// When the concurrent work loop should give control back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YieldPolicy {
    /// Never yield; every pass runs to completion.
    Never,
    /// Yield after this many work units per slice. Deterministic, used
    /// heavily by the test suite.
    UnitBudget(u32),
    /// Yield once this much wall time has elapsed in the slice.
    TimeSlice(Duration),
}

impl Default for YieldPolicy {
    fn default() -> Self {
        YieldPolicy::TimeSlice(Duration::from_millis(5))
    }
}

struct Task<T> {
    id: CallbackId,
    priority: Priority,
    seq: u64,
    enqueued_at: Instant,
    payload: T,
}

/// A scheduled callback popped from the queue.
pub(crate) struct DueTask<T> {
    pub id: CallbackId,
    pub priority: Priority,
    pub timed_out: bool,
    pub payload: T,
}

/// Priority task queue plus microtask queue.
pub struct Scheduler<T> {
    tasks: Vec<Task<T>>,
    microtasks: VecDeque<T>,
    next_id: u64,
    next_seq: u64,
    current_priority: Priority,
    yield_policy: YieldPolicy,
    slice_started: Option<Instant>,
    slice_units_left: u32,
}

impl<T> Scheduler<T> {
    pub fn new(yield_policy: YieldPolicy) -> Self {
        Self {
            tasks: Vec::new(),
            microtasks: VecDeque::new(),
            next_id: 1,
            next_seq: 0,
            current_priority: Priority::Normal,
            yield_policy,
            slice_started: None,
            slice_units_left: 0,
        }
    }

    /// Register a callback at `priority`. Returns its cancellable handle.
    pub fn schedule_callback(&mut self, priority: Priority, payload: T) -> CallbackId {
        let id = CallbackId(self.next_id);
        self.next_id += 1;
        self.push_task(id, priority, payload);
        tracing::debug!(?id, ?priority, "scheduled callback");
        id
    }

    /// Re-register an interrupted task as a continuation, keeping its
    /// handle identity.
    pub fn reschedule(&mut self, id: CallbackId, priority: Priority, payload: T) {
        self.push_task(id, priority, payload);
        tracing::debug!(?id, ?priority, "rescheduled continuation");
    }

    fn push_task(&mut self, id: CallbackId, priority: Priority, payload: T) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.tasks.push(Task {
            id,
            priority,
            seq,
            enqueued_at: Instant::now(),
            payload,
        });
    }

    /// Remove a previously scheduled callback. Unknown handles are a no-op
    /// (the callback may already have run).
    pub fn cancel_callback(&mut self, id: CallbackId) {
        self.tasks.retain(|t| t.id != id);
    }

    /// Queue a microtask. Microtasks drain before any task runs and again
    /// after each task completes.
    pub fn schedule_microtask(&mut self, payload: T) {
        self.microtasks.push_back(payload);
    }

    pub fn take_microtask(&mut self) -> Option<T> {
        self.microtasks.pop_front()
    }

    /// Pop the highest-priority task (FIFO within a level).
    pub(crate) fn take_next_task(&mut self) -> Option<DueTask<T>> {
        let best = self
            .tasks
            .iter()
            .enumerate()
            .min_by_key(|(_, t)| (t.priority, t.seq))
            .map(|(i, _)| i)?;
        let task = self.tasks.swap_remove(best);
        let timed_out = match task.priority.timeout() {
            Some(timeout) => task.enqueued_at.elapsed() >= timeout,
            None => false,
        };
        Some(DueTask {
            id: task.id,
            priority: task.priority,
            timed_out,
            payload: task.payload,
        })
    }

    pub fn has_pending(&self) -> bool {
        !self.tasks.is_empty() || !self.microtasks.is_empty()
    }

    /// The priority of the task currently running, or `Normal` when idle.
    /// This is the ambient value new updates derive their lane from.
    pub fn current_priority(&self) -> Priority {
        self.current_priority
    }

    pub fn set_current_priority(&mut self, priority: Priority) -> Priority {
        std::mem::replace(&mut self.current_priority, priority)
    }

    /// Begin a new time slice; resets the yield budget.
    pub fn start_slice(&mut self) {
        self.slice_started = Some(Instant::now());
        self.slice_units_left = match self.yield_policy {
            YieldPolicy::UnitBudget(n) => n,
            _ => 0,
        };
    }

    /// Consulted by the concurrent work loop between units.
    pub fn should_yield(&mut self) -> bool {
        match self.yield_policy {
            YieldPolicy::Never => false,
            YieldPolicy::UnitBudget(_) => {
                if self.slice_units_left == 0 {
                    return true;
                }
                self.slice_units_left -= 1;
                false
            }
            YieldPolicy::TimeSlice(slice) => match self.slice_started {
                Some(start) => start.elapsed() >= slice,
                None => false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_order_then_fifo() {
        let mut sched: Scheduler<u32> = Scheduler::new(YieldPolicy::Never);
        sched.schedule_callback(Priority::Normal, 1);
        sched.schedule_callback(Priority::Immediate, 2);
        sched.schedule_callback(Priority::Normal, 3);
        sched.schedule_callback(Priority::Idle, 4);

        let order: Vec<u32> = std::iter::from_fn(|| sched.take_next_task().map(|t| t.payload))
            .collect();
        assert_eq!(order, vec![2, 1, 3, 4]);
    }

    #[test]
    fn test_cancel_removes_task() {
        let mut sched: Scheduler<u32> = Scheduler::new(YieldPolicy::Never);
        let id = sched.schedule_callback(Priority::Normal, 1);
        sched.schedule_callback(Priority::Normal, 2);
        sched.cancel_callback(id);

        assert_eq!(sched.take_next_task().map(|t| t.payload), Some(2));
        assert!(sched.take_next_task().is_none());
    }

    #[test]
    fn test_continuation_keeps_identity() {
        let mut sched: Scheduler<u32> = Scheduler::new(YieldPolicy::Never);
        let id = sched.schedule_callback(Priority::Normal, 1);
        let task = sched.take_next_task().unwrap();
        assert_eq!(task.id, id);

        sched.reschedule(id, task.priority, 1);
        let again = sched.take_next_task().unwrap();
        assert_eq!(again.id, id);
    }

    #[test]
    fn test_microtasks_fifo() {
        let mut sched: Scheduler<u32> = Scheduler::new(YieldPolicy::Never);
        sched.schedule_microtask(1);
        sched.schedule_microtask(2);
        assert_eq!(sched.take_microtask(), Some(1));
        assert_eq!(sched.take_microtask(), Some(2));
        assert_eq!(sched.take_microtask(), None);
    }

    #[test]
    fn test_immediate_tasks_are_born_timed_out() {
        let mut sched: Scheduler<u32> = Scheduler::new(YieldPolicy::Never);
        sched.schedule_callback(Priority::Immediate, 1);
        assert!(sched.take_next_task().unwrap().timed_out);

        sched.schedule_callback(Priority::Normal, 2);
        assert!(!sched.take_next_task().unwrap().timed_out);
    }

    #[test]
    fn test_unit_budget_yields_after_budget() {
        let mut sched: Scheduler<u32> = Scheduler::new(YieldPolicy::UnitBudget(2));
        sched.start_slice();
        assert!(!sched.should_yield());
        assert!(!sched.should_yield());
        assert!(sched.should_yield());

        // A fresh slice resets the budget.
        sched.start_slice();
        assert!(!sched.should_yield());
    }

    #[test]
    fn test_never_policy() {
        let mut sched: Scheduler<u32> = Scheduler::new(YieldPolicy::Never);
        sched.start_slice();
        for _ in 0..100 {
            assert!(!sched.should_yield());
        }
    }

    #[test]
    fn test_ambient_priority() {
        let mut sched: Scheduler<u32> = Scheduler::new(YieldPolicy::Never);
        assert_eq!(sched.current_priority(), Priority::Normal);
        let prev = sched.set_current_priority(Priority::UserBlocking);
        assert_eq!(prev, Priority::Normal);
        assert_eq!(sched.current_priority(), Priority::UserBlocking);
    }
}
