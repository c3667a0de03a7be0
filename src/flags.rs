//! Diff flags - the outcome markers of reconciliation.
//!
//! Flags are set on work units while diffing and consumed during commit.
//! Subtree flags accumulate a child's flags upward so commit can skip
//! entire subtrees in O(flagged nodes) instead of walking everything.

use bitflags::bitflags;

bitflags! {
    /// Per-unit diff outcome markers.
    ///
    /// Combine with bitwise OR: `Flags::PLACEMENT | Flags::UPDATE`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Flags: u8 {
        const NONE = 0;
        /// The unit's host node must be inserted or moved.
        const PLACEMENT = 1 << 0;
        /// The unit's host node has staged prop/content changes.
        const UPDATE = 1 << 1;
        /// The unit has children staged for removal.
        const CHILD_DELETION = 1 << 2;
        /// The unit has lifecycle effects awaiting a passive flush.
        const PASSIVE_EFFECT = 1 << 3;
        /// The unit's external reference handle must be (re)attached.
        const REF = 1 << 4;

        /// Everything the mutation pass of commit cares about.
        const MUTATION_MASK = Self::PLACEMENT.bits()
            | Self::UPDATE.bits()
            | Self::CHILD_DELETION.bits()
            | Self::REF.bits();
        /// Everything the layout pass of commit cares about.
        const LAYOUT_MASK = Self::REF.bits();
        /// Everything that forces a passive-effect flush to be scheduled.
        /// Deletions are included because unmount cleanups run passively.
        const PASSIVE_MASK = Self::PASSIVE_EFFECT.bits() | Self::CHILD_DELETION.bits();
    }
}

bitflags! {
    /// Tags on a single lifecycle-effect record.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct HookFlags: u8 {
        /// The record belongs to a passive (post-commit, async) effect.
        const PASSIVE = 1 << 1;
        /// The record must actually run this pass (deps changed or mount).
        const HAS_EFFECT = 1 << 0;
    }
}
