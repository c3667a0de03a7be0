//! Update queues - pending state transitions per stateful unit.
//!
//! Dispatching a state change appends an [`Update`] to the shared pending
//! ring in O(1). A render pass drains the ring and folds the updates into
//! new state, but only the ones whose lane the pass covers: skipped
//! updates are carried forward in a base queue together with a base-state
//! checkpoint taken at the first skip, and updates applied *after* a skip
//! leave a lane-less placeholder behind so the whole sequence replays in
//! original arrival order when a later, lower-priority pass picks the
//! leftovers up.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::lanes::Lanes;

/// A state transition: either a replacement value or a pure function of
/// the previous state.
pub enum Action<S> {
    Replace(S),
    Apply(Rc<dyn Fn(&S) -> S>),
}

impl<S: Clone> Action<S> {
    pub fn apply_to(&self, prev: &S) -> S {
        match self {
            Action::Replace(value) => value.clone(),
            Action::Apply(f) => f(prev),
        }
    }
}

impl<S: Clone> Clone for Action<S> {
    fn clone(&self) -> Self {
        match self {
            Action::Replace(value) => Action::Replace(value.clone()),
            Action::Apply(f) => Action::Apply(f.clone()),
        }
    }
}

/// One pending transition, tagged with the lane it was dispatched at.
pub struct Update<S> {
    pub action: Action<S>,
    pub lane: Lanes,
}

impl<S: Clone> Clone for Update<S> {
    fn clone(&self) -> Self {
        Self {
            action: self.action.clone(),
            lane: self.lane,
        }
    }
}

/// The shared pending ring. Enqueue at the tail; the front is the oldest
/// entry and processing starts there.
pub struct UpdateQueue<S> {
    pending: VecDeque<Update<S>>,
}

impl<S> UpdateQueue<S> {
    pub fn new() -> Self {
        Self {
            pending: VecDeque::new(),
        }
    }

    pub fn enqueue(&mut self, update: Update<S>) {
        self.pending.push_back(update);
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Drain pending updates in arrival order.
    pub fn drain_pending(&mut self) -> Vec<Update<S>> {
        self.pending.drain(..).collect()
    }
}

impl<S> Default for UpdateQueue<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// Queues are shared between the dispatch handle and both buffer
/// generations of the owning unit.
pub type SharedQueue<S> = Rc<RefCell<UpdateQueue<S>>>;

pub fn new_shared_queue<S>() -> SharedQueue<S> {
    Rc::new(RefCell::new(UpdateQueue::new()))
}

/// Result of folding a queue at a render lane.
pub struct Processed<S> {
    /// State after every covered update.
    pub memoized: S,
    /// State as of just before the first skipped update (or the final
    /// state if nothing was skipped).
    pub base_state: S,
    /// Skipped updates plus replay-order placeholders, to process on a
    /// later pass.
    pub base_queue: Vec<Update<S>>,
}

/// Fold `updates` (oldest first) over `base_state`, applying only the
/// updates covered by `render_lanes`.
pub fn process_update_queue<S: Clone>(
    base_state: S,
    updates: &[Update<S>],
    render_lanes: Lanes,
) -> Processed<S> {
    let mut state = base_state;
    let mut new_base_state: Option<S> = None;
    let mut new_base_queue: Vec<Update<S>> = Vec::new();

    for update in updates {
        if !render_lanes.covers(update.lane) {
            // Insufficient priority: checkpoint at the first skip, keep
            // the update for a later pass.
            if new_base_queue.is_empty() {
                new_base_state = Some(state.clone());
            }
            new_base_queue.push(update.clone());
        } else {
            // Once something was skipped, every later applied update also
            // goes into the base queue lane-less, so the replay sees the
            // sequence in arrival order.
            if !new_base_queue.is_empty() {
                new_base_queue.push(Update {
                    action: update.action.clone(),
                    lane: Lanes::NONE,
                });
            }
            state = update.action.apply_to(&state);
        }
    }

    let base_state = match new_base_state {
        Some(checkpoint) => checkpoint,
        None => state.clone(),
    };

    Processed {
        memoized: state,
        base_state,
        base_queue: new_base_queue,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replace(n: i32, lane: Lanes) -> Update<i32> {
        Update {
            action: Action::Replace(n),
            lane,
        }
    }

    fn add(n: i32, lane: Lanes) -> Update<i32> {
        Update {
            action: Action::Apply(Rc::new(move |prev: &i32| prev + n)),
            lane,
        }
    }

    #[test]
    fn test_fold_in_arrival_order() {
        let updates = vec![
            replace(10, Lanes::DEFAULT),
            add(1, Lanes::DEFAULT),
            add(1, Lanes::DEFAULT),
        ];
        let out = process_update_queue(0, &updates, Lanes::DEFAULT);
        assert_eq!(out.memoized, 12);
        assert_eq!(out.base_state, 12);
        assert!(out.base_queue.is_empty());
    }

    #[test]
    fn test_skip_checkpoints_base_state() {
        // add(1) applies, replace(100) is too low priority, add(10) applies
        // but leaves a placeholder.
        let updates = vec![
            add(1, Lanes::SYNC),
            replace(100, Lanes::IDLE),
            add(10, Lanes::SYNC),
        ];
        let out = process_update_queue(0, &updates, Lanes::SYNC);
        assert_eq!(out.memoized, 11);
        // Checkpoint is the state just before the skipped update.
        assert_eq!(out.base_state, 1);
        assert_eq!(out.base_queue.len(), 2);
        assert_eq!(out.base_queue[0].lane, Lanes::IDLE);
        // The placeholder carries no lane so any later pass applies it.
        assert_eq!(out.base_queue[1].lane, Lanes::NONE);
    }

    #[test]
    fn test_replay_converges() {
        // First pass at sync priority, then replay everything at idle.
        let updates = vec![
            add(1, Lanes::SYNC),
            replace(100, Lanes::IDLE),
            add(10, Lanes::SYNC),
        ];
        let first = process_update_queue(0, &updates, Lanes::SYNC);
        let second = process_update_queue(
            first.base_state,
            &first.base_queue,
            Lanes::SYNC | Lanes::IDLE,
        );
        // 1, then replace(100), then +10: arrival order preserved.
        assert_eq!(second.memoized, 110);
        assert!(second.base_queue.is_empty());
        assert_eq!(second.base_state, 110);
    }

    #[test]
    fn test_nothing_covered() {
        let updates = vec![add(1, Lanes::IDLE), add(2, Lanes::IDLE)];
        let out = process_update_queue(5, &updates, Lanes::SYNC);
        assert_eq!(out.memoized, 5);
        assert_eq!(out.base_state, 5);
        assert_eq!(out.base_queue.len(), 2);
    }

    #[test]
    fn test_queue_fifo() {
        let queue: SharedQueue<i32> = new_shared_queue();
        queue.borrow_mut().enqueue(replace(1, Lanes::DEFAULT));
        queue.borrow_mut().enqueue(replace(2, Lanes::DEFAULT));
        let drained = queue.borrow_mut().drain_pending();
        assert_eq!(drained.len(), 2);
        assert!(matches!(drained[0].action, Action::Replace(1)));
        assert!(matches!(drained[1].action, Action::Replace(2)));
        assert!(!queue.borrow().has_pending());
    }
}
