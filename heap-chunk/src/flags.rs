use {
    bitflags::bitflags,
    std::{fmt, sync::atomic::{AtomicUsize, Ordering::Relaxed}},
};

bitflags!
{
    /// Classification bits of a chunk.
    ///
    /// The bits are one machine word wide, so that inline write barriers
    /// can test them with a single load and a single `and` instruction.
    /// The numeric values are part of the layout contract
    /// and must not be renumbered without bumping [`ChunkLayout::VERSION`].
    ///
    /// [`ChunkLayout::VERSION`]: `crate::ChunkLayout::VERSION`
    pub struct ChunkFlags: usize
    {
        /// The chunk contains machine code.
        const IS_EXECUTABLE                      = 1 << 0;

        /// Slots pointing into this chunk must be recorded.
        const POINTERS_TO_HERE_ARE_INTERESTING   = 1 << 1;

        /// Slots pointing out of this chunk must be recorded.
        const POINTERS_FROM_HERE_ARE_INTERESTING = 1 << 2;

        /// The chunk is the from-half of the young generation.
        const FROM_PAGE                          = 1 << 3;

        /// The chunk is the to-half of the young generation.
        const TO_PAGE                            = 1 << 4;

        /// The chunk holds a single large object.
        const LARGE_PAGE                         = 1 << 5;

        /// The chunk is selected for compaction this cycle.
        const EVACUATION_CANDIDATE               = 1 << 6;

        /// The chunk must never be selected for compaction.
        const NEVER_EVACUATE                     = 1 << 7;

        /// The chunk was promoted from the young generation as a whole.
        const PAGE_NEW_OLD_PROMOTION             = 1 << 8;

        /// The allocator must not carve new objects out of this chunk.
        const NEVER_ALLOCATE_ON_PAGE             = 1 << 9;

        /// The chunk is queued for release.
        const PRE_FREED                          = 1 << 10;

        /// The chunk sits in the pool of reusable chunks.
        const POOLED                             = 1 << 11;

        /// Evacuation of this chunk started but did not complete.
        const COMPACTION_WAS_ABORTED             = 1 << 12;

        /// Objects in this chunk are younger than the age mark.
        const NEW_SPACE_BELOW_AGE_MARK           = 1 << 13;

        /// The chunk belongs to the read-only heap.
        ///
        /// Only such chunks may have no heap back-reference.
        const READ_ONLY_HEAP                     = 1 << 14;

        /// Incremental marking is running for the heap of this chunk.
        const INCREMENTAL_MARKING                = 1 << 15;

        /// The chunk belongs to a heap shared between isolates.
        const IN_SHARED_HEAP                     = 1 << 16;
    }
}

impl ChunkFlags
{
    /// Every defined bit, for bulk copies and resets.
    pub const ALL_FLAGS: Self = Self::all();

    /// Tested by the write barrier on the target chunk of a store.
    pub const POINTERS_TO_HERE_ARE_INTERESTING_MASK: Self =
        Self::POINTERS_TO_HERE_ARE_INTERESTING;

    /// Tested by the write barrier on the source chunk of a store.
    pub const POINTERS_FROM_HERE_ARE_INTERESTING_MASK: Self =
        Self::POINTERS_FROM_HERE_ARE_INTERESTING;

    /// Set on chunks selected for compaction.
    pub const EVACUATION_CANDIDATE_MASK: Self =
        Self::EVACUATION_CANDIDATE;

    /// Either half of the young generation.
    pub const IS_IN_YOUNG_GENERATION_MASK: Self =
        Self::FROM_PAGE.union(Self::TO_PAGE);

    /// Set on chunks that hold a single large object.
    pub const IS_LARGE_PAGE_MASK: Self =
        Self::LARGE_PAGE;

    /// Slots on chunks matching this mask are never recorded
    /// for evacuation: their objects move anyway.
    pub const SKIP_EVACUATION_SLOTS_RECORDING_MASK: Self =
        Self::EVACUATION_CANDIDATE_MASK
            .union(Self::IS_IN_YOUNG_GENERATION_MASK);
}

/// Word-sized cell holding [`ChunkFlags`].
///
/// At most one thread may write the cell at a time:
/// whichever thread drives the current collection phase.
/// Any thread may read it at any time without synchronization.
/// Reads observe either the old or the new word, never a mix,
/// but they may be stale; callers must treat stale flags
/// as extra or missing barrier work, never as a safety condition.
///
/// Writes are a relaxed load followed by a relaxed store,
/// not a read-modify-write instruction, so concurrent writers lose updates.
#[repr(transparent)]
pub struct FlagCell(AtomicUsize);

impl FlagCell
{
    /// Create a cell holding the given flags.
    pub const fn new(flags: ChunkFlags) -> Self
    {
        Self(AtomicUsize::new(flags.bits()))
    }

    /// The current flags.
    #[inline]
    pub fn load(&self) -> ChunkFlags
    {
        ChunkFlags::from_bits_truncate(self.0.load(Relaxed))
    }

    /// Whether any bit of `mask` is set.
    #[inline]
    pub fn is_set(&self, mask: ChunkFlags) -> bool
    {
        self.load().intersects(mask)
    }

    /// Replace all flags.
    #[inline]
    pub fn store(&self, flags: ChunkFlags)
    {
        self.0.store(flags.bits(), Relaxed);
    }

    /// Set every bit of `mask`.
    #[inline]
    pub fn set(&self, mask: ChunkFlags)
    {
        self.update(|flags| flags | mask);
    }

    /// Clear every bit of `mask`.
    #[inline]
    pub fn clear(&self, mask: ChunkFlags)
    {
        self.update(|flags| flags - mask);
    }

    /// Copy the bits of `flags` selected by `mask`,
    /// leaving bits outside `mask` alone.
    #[inline]
    pub fn set_masked(&self, flags: ChunkFlags, mask: ChunkFlags)
    {
        self.update(|old| (old - mask) | (flags & mask));
    }

    #[inline]
    fn update(&self, f: impl FnOnce(ChunkFlags) -> ChunkFlags)
    {
        let old = self.load();
        self.store(f(old));
    }
}

impl fmt::Debug for FlagCell
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        fmt::Debug::fmt(&self.load(), f)
    }
}
