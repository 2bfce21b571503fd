#![forbid(unsafe_code)]

//! Priority lanes.
//!
//! A lane is one bit in a `u32`. Numerically smaller bits are more urgent,
//! so the highest-priority lane of a set is its lowest set bit. A render
//! always targets exactly one lane; every other pending lane stays in the
//! root's [`RootLanes::pending`] set until a render services it.
//!
//! # Invariants
//!
//! 1. Every named lane constant has exactly one bit set.
//! 2. `highest_priority()` of a non-empty set is a single lane contained in
//!    the set; of the empty set it is [`Lanes::NONE`].
//! 3. A lane is never in both `pending` and `suspended` of a [`RootLanes`].

use std::fmt;

/// A set of priority lanes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct Lanes(u32);

/// A single lane. Same representation as [`Lanes`], with one bit set.
pub type Lane = Lanes;

impl Lanes {
    pub const NONE: Self = Self(0);
    pub const SYNC: Self = Self(0b0_0001);
    pub const INPUT_CONTINUOUS: Self = Self(0b0_0010);
    pub const DEFAULT: Self = Self(0b0_0100);
    pub const TRANSITION: Self = Self(0b0_1000);
    pub const IDLE: Self = Self(0b1_0000);

    /// Lanes in urgency order.
    pub const ALL: [Lane; 5] = [
        Self::SYNC,
        Self::INPUT_CONTINUOUS,
        Self::DEFAULT,
        Self::TRANSITION,
        Self::IDLE,
    ];

    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    #[inline]
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Union of two sets.
    #[inline]
    #[must_use]
    pub const fn merge(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// The most urgent lane in the set (lowest set bit).
    #[inline]
    #[must_use]
    pub const fn highest_priority(self) -> Lane {
        Self(self.0 & self.0.wrapping_neg())
    }

    /// `true` when every lane of `subset` is in `self`.
    ///
    /// The empty set is a subset of everything, so an update tagged
    /// [`Lanes::NONE`] is serviced by any render.
    #[inline]
    #[must_use]
    pub const fn includes(self, subset: Self) -> bool {
        self.0 & subset.0 == subset.0
    }

    /// `true` when the two sets share at least one lane.
    #[inline]
    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    #[inline]
    #[must_use]
    pub const fn remove(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// Iterate the single lanes of this set, most urgent first.
    pub fn iter(self) -> impl Iterator<Item = Lane> {
        let mut rest = self;
        std::iter::from_fn(move || {
            if rest.is_empty() {
                return None;
            }
            let lane = rest.highest_priority();
            rest = rest.remove(lane);
            Some(lane)
        })
    }

    /// Short label for a single lane, used in logs.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self.0 {
            0 => "none",
            0b0_0001 => "sync",
            0b0_0010 => "input-continuous",
            0b0_0100 => "default",
            0b0_1000 => "transition",
            0b1_0000 => "idle",
            _ => "mixed",
        }
    }
}

impl std::ops::BitOr for Lanes {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.merge(rhs)
    }
}

impl std::ops::BitOrAssign for Lanes {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.merge(rhs);
    }
}

impl fmt::Debug for Lanes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.count_ones() <= 1 {
            return write!(f, "Lanes({})", self.label());
        }
        f.debug_list()
            .entries(self.iter().map(Lanes::label))
            .finish()
    }
}

impl fmt::Display for Lanes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#07b}", self.0)
    }
}

/// Per-root lane bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RootLanes {
    /// Lanes with at least one unresolved update.
    pub pending: Lanes,
    /// Lanes whose last render was abandoned waiting on data.
    pub suspended: Lanes,
    /// Suspended lanes whose data has since settled.
    pub pinged: Lanes,
}

impl RootLanes {
    /// Record a new update at `lane`.
    pub fn mark_updated(&mut self, lane: Lane) {
        self.pending |= lane;
        self.suspended = self.suspended.remove(lane);
    }

    /// Park `lane`: it leaves the pending set until pinged or updated again.
    pub fn mark_suspended(&mut self, lane: Lane) {
        self.suspended |= lane;
        self.pending = self.pending.remove(lane);
        self.pinged = self.pinged.remove(lane);
    }

    /// Data awaited by `lane` settled; the lane becomes pending again.
    pub fn mark_pinged(&mut self, lane: Lane) {
        if self.suspended.includes(lane) {
            self.pinged |= lane;
        }
        self.mark_updated(lane);
    }

    /// A render of `lane` committed.
    pub fn mark_finished(&mut self, lane: Lane) {
        self.pending = self.pending.remove(lane);
        self.suspended = self.suspended.remove(lane);
        self.pinged = self.pinged.remove(lane);
    }

    /// The lane the next render should target.
    #[must_use]
    pub fn next_lane(&self) -> Lane {
        self.pending.highest_priority()
    }
}

// ---- Tests ----

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn highest_priority_is_lowest_bit() {
        let set = Lanes::DEFAULT | Lanes::SYNC | Lanes::IDLE;
        assert_eq!(set.highest_priority(), Lanes::SYNC);
        assert_eq!(Lanes::NONE.highest_priority(), Lanes::NONE);
        assert_eq!(
            (Lanes::TRANSITION | Lanes::IDLE).highest_priority(),
            Lanes::TRANSITION
        );
    }

    #[test]
    fn empty_lane_is_subset_of_everything() {
        assert!(Lanes::SYNC.includes(Lanes::NONE));
        assert!(Lanes::NONE.includes(Lanes::NONE));
        assert!(!Lanes::SYNC.includes(Lanes::DEFAULT));
        assert!((Lanes::SYNC | Lanes::DEFAULT).includes(Lanes::DEFAULT));
    }

    #[test]
    fn iter_visits_lanes_in_urgency_order() {
        let set = Lanes::IDLE | Lanes::SYNC | Lanes::TRANSITION;
        let lanes: Vec<_> = set.iter().collect();
        assert_eq!(lanes, vec![Lanes::SYNC, Lanes::TRANSITION, Lanes::IDLE]);
    }

    #[test]
    fn root_lanes_suspend_and_ping() {
        let mut root = RootLanes::default();
        root.mark_updated(Lanes::DEFAULT);
        root.mark_updated(Lanes::SYNC);
        assert_eq!(root.next_lane(), Lanes::SYNC);

        root.mark_suspended(Lanes::SYNC);
        assert_eq!(root.next_lane(), Lanes::DEFAULT);
        assert!(root.suspended.includes(Lanes::SYNC));

        root.mark_pinged(Lanes::SYNC);
        assert!(root.pinged.includes(Lanes::SYNC));
        assert_eq!(root.next_lane(), Lanes::SYNC);
        assert!(!root.suspended.intersects(root.pending));

        root.mark_finished(Lanes::SYNC);
        assert_eq!(root.pinged, Lanes::NONE);
        assert_eq!(root.next_lane(), Lanes::DEFAULT);
    }

    #[test]
    fn debug_names_lanes() {
        assert_eq!(format!("{:?}", Lanes::SYNC), "Lanes(sync)");
        assert_eq!(
            format!("{:?}", Lanes::SYNC | Lanes::IDLE),
            "[\"sync\", \"idle\"]"
        );
    }

    proptest! {
        #[test]
        fn highest_priority_is_single_member(bits in 0u32..32) {
            let set = Lanes::from_bits(bits);
            let top = set.highest_priority();
            prop_assert!(top.bits().count_ones() <= 1);
            prop_assert!(set.includes(top));
            prop_assert_eq!(top.is_empty(), set.is_empty());
        }

        #[test]
        fn pending_and_suspended_stay_disjoint(ops in proptest::collection::vec((0u8..4, 0usize..5), 0..40)) {
            let mut root = RootLanes::default();
            for (op, lane) in ops {
                let lane = Lanes::ALL[lane];
                match op {
                    0 => root.mark_updated(lane),
                    1 => root.mark_suspended(lane),
                    2 => root.mark_pinged(lane),
                    _ => root.mark_finished(lane),
                }
                prop_assert!(!root.pending.intersects(root.suspended));
            }
        }
    }
}
