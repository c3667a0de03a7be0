//! Priority lanes - bitset-encoded urgency classes for pending updates.
//!
//! A lane is a single bit; a lane set is a union of them. Smaller bit
//! value means higher priority (zero excepted, which means "no work").
//! The lane model is deliberately tiny: merge, pick-highest, and subset
//! checks are single bit operations, and the mapping to the cooperative
//! scheduler's five priority levels is a fixed table in both directions.

use bitflags::bitflags;

use crate::scheduler::Priority;

bitflags! {
    /// A set of priority lanes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Lanes: u8 {
        /// Synchronous work, flushed in a microtask within the same tick.
        const SYNC = 1 << 0;
        /// Continuous user interaction (drag, scroll, pointer move).
        const INPUT_CONTINUOUS = 1 << 1;
        /// Ordinary updates.
        const DEFAULT = 1 << 2;
        /// Deferred work (transitions, idle-time updates).
        const IDLE = 1 << 3;
    }
}

impl Lanes {
    /// The empty lane set ("no pending work").
    pub const NONE: Lanes = Lanes::empty();

    /// Union of two lane sets.
    #[inline]
    pub fn merge(self, other: Lanes) -> Lanes {
        self | other
    }

    /// Isolate the highest-priority lane (the lowest set bit).
    #[inline]
    pub fn highest_priority(self) -> Lanes {
        Lanes::from_bits_retain(self.bits() & self.bits().wrapping_neg())
    }

    /// Whether this render lane set covers `lane`.
    ///
    /// The empty set is covered by everything, which is what makes
    /// replay-order placeholder updates apply unconditionally.
    #[inline]
    pub fn covers(self, lane: Lanes) -> bool {
        self.contains(lane)
    }
}

/// Map the highest lane in `lanes` to a scheduler priority level.
pub fn lanes_to_priority(lanes: Lanes) -> Priority {
    let lane = lanes.highest_priority();
    if lane == Lanes::SYNC {
        Priority::Immediate
    } else if lane == Lanes::INPUT_CONTINUOUS {
        Priority::UserBlocking
    } else if lane == Lanes::DEFAULT {
        Priority::Normal
    } else {
        Priority::Idle
    }
}

/// Map an ambient scheduler priority to the lane a new update gets.
pub fn priority_to_lane(priority: Priority) -> Lanes {
    match priority {
        Priority::Immediate => Lanes::SYNC,
        Priority::UserBlocking => Lanes::INPUT_CONTINUOUS,
        Priority::Normal => Lanes::DEFAULT,
        Priority::Low | Priority::Idle => Lanes::IDLE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_highest_priority_is_lowest_bit() {
        let lanes = Lanes::DEFAULT | Lanes::SYNC | Lanes::IDLE;
        assert_eq!(lanes.highest_priority(), Lanes::SYNC);

        let lanes = Lanes::IDLE | Lanes::DEFAULT;
        assert_eq!(lanes.highest_priority(), Lanes::DEFAULT);

        assert_eq!(Lanes::NONE.highest_priority(), Lanes::NONE);
    }

    #[test]
    fn test_merge() {
        let merged = Lanes::SYNC.merge(Lanes::IDLE);
        assert!(merged.contains(Lanes::SYNC));
        assert!(merged.contains(Lanes::IDLE));
        assert!(!merged.contains(Lanes::DEFAULT));
    }

    #[test]
    fn test_covers() {
        let render = Lanes::SYNC | Lanes::DEFAULT;
        assert!(render.covers(Lanes::SYNC));
        assert!(render.covers(Lanes::DEFAULT));
        assert!(!render.covers(Lanes::IDLE));
        // The empty lane is always covered.
        assert!(render.covers(Lanes::NONE));
        assert!(Lanes::NONE.covers(Lanes::NONE));
    }

    #[test]
    fn test_priority_mapping_round_trip() {
        assert_eq!(lanes_to_priority(Lanes::SYNC), Priority::Immediate);
        assert_eq!(
            lanes_to_priority(Lanes::INPUT_CONTINUOUS),
            Priority::UserBlocking
        );
        assert_eq!(lanes_to_priority(Lanes::DEFAULT), Priority::Normal);
        assert_eq!(lanes_to_priority(Lanes::IDLE), Priority::Idle);

        assert_eq!(priority_to_lane(Priority::Immediate), Lanes::SYNC);
        assert_eq!(
            priority_to_lane(Priority::UserBlocking),
            Lanes::INPUT_CONTINUOUS
        );
        assert_eq!(priority_to_lane(Priority::Normal), Lanes::DEFAULT);
        assert_eq!(priority_to_lane(Priority::Low), Lanes::IDLE);
        assert_eq!(priority_to_lane(Priority::Idle), Lanes::IDLE);
    }

    #[test]
    fn test_mapping_uses_highest_lane() {
        assert_eq!(
            lanes_to_priority(Lanes::IDLE | Lanes::INPUT_CONTINUOUS),
            Priority::UserBlocking
        );
    }
}
