#![forbid(unsafe_code)]

//! Side-effect bitsets carried by fibers and effect records.

bitflags::bitflags! {
    /// Pending side effects of one fiber.
    ///
    /// A fiber's `subtree_flags` is the union of `flags | subtree_flags` of
    /// its children, so a commit pass can skip any subtree whose aggregate
    /// does not intersect the pass mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Flags: u16 {
        /// Host nodes must be inserted (new fiber) or moved (reordered).
        const PLACEMENT       = 0b0000_0000_0001;
        /// Host props or text changed.
        const UPDATE          = 0b0000_0000_0010;
        /// `deletions` holds children to unmount.
        const CHILD_DELETION  = 0b0000_0000_0100;
        /// A passive effect must run after commit.
        const PASSIVE_EFFECT  = 0b0000_0000_1000;
        /// The host ref changed.
        const REF             = 0b0000_0001_0000;
        /// An offscreen subtree toggled between hidden and visible.
        const VISIBILITY      = 0b0000_0010_0000;
        /// A suspension was routed to this boundary during unwind.
        const SHOULD_CAPTURE  = 0b0000_0100_0000;
        /// This boundary captured a suspension and renders its fallback.
        const DID_CAPTURE     = 0b0000_1000_0000;
    }
}

impl Flags {
    /// Flags handled by the mutation pass.
    pub const MUTATION_MASK: Self = Self::PLACEMENT
        .union(Self::UPDATE)
        .union(Self::CHILD_DELETION)
        .union(Self::REF)
        .union(Self::VISIBILITY);

    /// Flags handled by the layout pass.
    pub const LAYOUT_MASK: Self = Self::REF;

    /// Flags that require a passive-effect flush.
    pub const PASSIVE_MASK: Self = Self::PASSIVE_EFFECT.union(Self::CHILD_DELETION);

    /// Flags that touch host nodes directly.
    pub const HOST_EFFECT_MASK: Self = Self::PLACEMENT
        .union(Self::UPDATE)
        .union(Self::CHILD_DELETION)
        .union(Self::VISIBILITY);

    /// `true` if a commit pass using `mask` must visit this aggregate.
    #[inline]
    #[must_use]
    pub const fn needs(self, mask: Self) -> bool {
        self.intersects(mask)
    }
}

bitflags::bitflags! {
    /// Tag of one effect record.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct HookFlags: u8 {
        /// Effect runs in the passive flush.
        const PASSIVE    = 0b01;
        /// Effect's dependencies changed; destroy and create must run.
        const HAS_EFFECT = 0b10;
    }
}

impl HookFlags {
    /// `true` when this effect must be re-run by the next passive flush.
    #[inline]
    #[must_use]
    pub const fn is_pending(self) -> bool {
        self.contains(Self::PASSIVE.union(Self::HAS_EFFECT))
    }
}

// ---- Tests ----
