use {
    crate::{Address, BaseSpace, ChunkFlags, FlagCell, Reservation, SpaceKind},
    std::{
        fmt,
        marker::PhantomData,
        ptr::{self, null_mut},
        sync::atomic::{
            AtomicPtr, AtomicUsize,
            Ordering::Relaxed,
        },
    },
};

#[cfg(any(debug_assertions, feature = "verify-heap"))]
use {std::sync::atomic::Ordering::Acquire, thiserror::Error, tracing::error};

/// Bookkeeping record of a chunk.
///
/// A chunk is a contiguous range of heap memory:
/// a header followed by an area in which objects are allocated.
/// Every chunk has exactly one metadata record,
/// owned by the space that manages the chunk.
///
/// The record is `#[repr(C)]` and its field offsets are fixed
/// by [`ChunkLayout`], so that generated code can read them directly.
/// Fields that other threads read while the chunk is in use
/// are relaxed atomics; writing them is reserved to the single thread
/// that drives the current allocation, sweeping, or collection step.
///
/// `'h` is the lifetime of the heap and the space the chunk refers back to.
/// Neither back-reference is owning: the record never outlives its referents.
///
/// [`ChunkLayout`]: `crate::ChunkLayout`
#[repr(C)]
pub struct ChunkMetadata<'h, H>
{
    /// Total reserved length of the chunk, header and area.
    size: usize,

    /// Classification bits, read by the write barrier.
    flags: FlagCell,

    /// The heap to which this chunk belongs.
    ///
    /// Null only for chunks of the read-only heap.
    /// Stored as an atomic so that the diagnostic check
    /// can pair an acquire load with the publishing store.
    heap: AtomicPtr<H>,

    area_start: Address,
    area_end: Address,

    /// Bytes of the area that are allocated or considered live.
    allocated_bytes: AtomicUsize,

    /// Bytes of the area lost to fragmentation.
    wasted_memory: AtomicUsize,

    /// Offset from the chunk address of the furthest byte ever allocated.
    high_water_mark: AtomicUsize,

    /// The space that manages this chunk.
    owner: &'h BaseSpace,

    /// The memory of the chunk, released when the record is dropped.
    reservation: Reservation,

    _heap: PhantomData<&'h H>,
}

impl<'h, H> ChunkMetadata<'h, H>
{
    /// Create the record for a freshly carved chunk.
    ///
    /// The chunk starts at the address of `reservation`,
    /// which must cover at least `chunk_size` bytes,
    /// and `area_start..area_end` must lie within it.
    /// The whole area counts as allocated until the sweeper says otherwise,
    /// and the high water mark is set to the start of the area.
    /// The initial flags are those of the kind of `space`.
    pub fn new(
        heap:        Option<&'h H>,
        space:       &'h BaseSpace,
        chunk_size:  usize,
        area_start:  Address,
        area_end:    Address,
        reservation: Reservation,
    ) -> Self
    {
        let address = reservation.address();

        debug_assert!(area_start <= area_end);
        debug_assert!(reservation.contains_range(address, chunk_size));
        debug_assert!(address <= area_start && area_end <= address + chunk_size);

        let heap = heap.map_or(null_mut(), |heap| ptr::from_ref(heap).cast_mut());
        let flags = space.identity().initial_chunk_flags();

        Self{
            size: chunk_size,
            flags: FlagCell::new(flags),
            heap: AtomicPtr::new(heap),
            area_start,
            area_end,
            allocated_bytes: AtomicUsize::new(area_end - area_start),
            wasted_memory: AtomicUsize::new(0),
            high_water_mark: AtomicUsize::new(area_start - address),
            owner: space,
            reservation,
            _heap: PhantomData,
        }
    }

    /* ---------------------------------------------------------------------- */
    /*                            Addresses and sizes                         */
    /* ---------------------------------------------------------------------- */

    /// Address of the first byte of the chunk.
    #[inline]
    pub fn address(&self) -> Address
    {
        self.reservation.address()
    }

    /// Total length of the chunk in bytes.
    #[inline]
    pub fn size(&self) -> usize
    {
        self.size
    }

    /// First byte available for objects.
    #[inline]
    pub fn area_start(&self) -> Address
    {
        self.area_start
    }

    /// One past the last byte available for objects.
    #[inline]
    pub fn area_end(&self) -> Address
    {
        self.area_end
    }

    /// Number of bytes available for objects.
    #[inline]
    pub fn area_size(&self) -> usize
    {
        self.area_end - self.area_start
    }

    /// Whether `address` is an object address within the area.
    #[inline]
    pub fn contains(&self, address: Address) -> bool
    {
        self.area_start <= address && address < self.area_end
    }

    /// Like [`contains`][`Self::contains`], but also accepts `area_end`,
    /// which is a valid allocation limit.
    #[inline]
    pub fn contains_limit(&self, address: Address) -> bool
    {
        self.area_start <= address && address <= self.area_end
    }

    /// Offset of `address` from the start of the chunk.
    #[inline]
    pub fn offset(&self, address: Address) -> usize
    {
        debug_assert!(address >= self.address());
        address - self.address()
    }

    /// Release the tail of the area, as when a large object shrinks.
    ///
    /// Allocated bytes are clamped to the smaller area.
    pub fn shrink_area(&mut self, new_area_end: Address)
    {
        debug_assert!(self.area_start <= new_area_end);
        debug_assert!(new_area_end <= self.area_end);
        self.area_end = new_area_end;
        let allocated = self.allocated_bytes.get_mut();
        *allocated = (*allocated).min(self.area_end - self.area_start);
    }

    /* ---------------------------------------------------------------------- */
    /*                              Back-references                           */
    /* ---------------------------------------------------------------------- */

    /// The heap to which this chunk belongs.
    ///
    /// This is [`None`] only for chunks of the read-only heap.
    #[inline]
    pub fn heap(&self) -> Option<&'h H>
    {
        let heap = self.heap.load(Relaxed);
        // SAFETY: The pointer is null or came from a &'h H.
        unsafe { heap.as_ref() }
    }

    /// The space that manages this chunk.
    #[inline]
    pub fn owner(&self) -> &'h BaseSpace
    {
        self.owner
    }

    /// Hand the chunk over to another space.
    ///
    /// Flags are left alone; the collector adjusts them as part of the move.
    pub fn set_owner(&mut self, space: &'h BaseSpace)
    {
        self.owner = space;
    }

    /// Kind of the space that manages this chunk.
    #[inline]
    pub fn owner_identity(&self) -> SpaceKind
    {
        self.owner.identity()
    }

    /// Whether the chunk belongs to the old generation space.
    #[inline]
    pub fn in_old_space(&self) -> bool
    {
        self.owner_identity() == SpaceKind::Old
    }

    /// Whether the chunk belongs to the large object space.
    ///
    /// Young and code large object spaces do not count.
    #[inline]
    pub fn in_large_object_space(&self) -> bool
    {
        self.owner_identity() == SpaceKind::LargeObject
    }

    /// Whether the chunk belongs to a young generation space.
    #[inline]
    pub fn in_young_generation_space(&self) -> bool
    {
        matches!(self.owner_identity(), SpaceKind::Young
                                      | SpaceKind::YoungLargeObject)
    }

    /// Whether the chunk belongs to a code space.
    #[inline]
    pub fn in_code_space(&self) -> bool
    {
        matches!(self.owner_identity(), SpaceKind::Code
                                      | SpaceKind::CodeLargeObject)
    }

    /// Whether the chunk belongs to the read-only space.
    #[inline]
    pub fn in_read_only_heap_space(&self) -> bool
    {
        self.owner_identity() == SpaceKind::ReadOnly
    }

    /// The memory of the chunk.
    #[inline]
    pub fn reservation(&self) -> &Reservation
    {
        &self.reservation
    }

    /// Retire the record and take back the memory of the chunk,
    /// as when the chunk goes to a pool instead of being unmapped.
    pub fn into_reservation(self) -> Reservation
    {
        self.reservation
    }

    /* ---------------------------------------------------------------------- */
    /*                                 Counters                               */
    /* ---------------------------------------------------------------------- */

    /// Bytes of the area that are allocated or considered live.
    #[inline]
    pub fn allocated_bytes(&self) -> usize
    {
        self.allocated_bytes.load(Relaxed)
    }

    /// Account for `bytes` more allocated bytes.
    pub fn increase_allocated_bytes(&self, bytes: usize)
    {
        let old = self.allocated_bytes.fetch_add(bytes, Relaxed);
        debug_assert!(old + bytes <= self.area_size());
    }

    /// Account for `bytes` fewer allocated bytes.
    pub fn decrease_allocated_bytes(&self, bytes: usize)
    {
        let old = self.allocated_bytes.fetch_sub(bytes, Relaxed);
        debug_assert!(old >= bytes);
    }

    /// Bytes of the area lost to fragmentation.
    #[inline]
    pub fn wasted_memory(&self) -> usize
    {
        self.wasted_memory.load(Relaxed)
    }

    /// Account for `bytes` more bytes lost to fragmentation.
    pub fn add_wasted_memory(&self, bytes: usize)
    {
        self.wasted_memory.fetch_add(bytes, Relaxed);
    }

    /// Offset from the chunk address of the furthest byte ever allocated.
    #[inline]
    pub fn high_water_mark(&self) -> usize
    {
        self.high_water_mark.load(Relaxed)
    }

    /// Raise the high water mark to `mark` if it is higher.
    ///
    /// `mark` is an address within the chunk.
    /// The mark never goes down, even with concurrent callers.
    pub fn update_high_water_mark(&self, mark: Address)
    {
        let new = self.offset(mark);
        debug_assert!(new <= self.size);
        self.high_water_mark.fetch_max(new, Relaxed);
    }

    /// Forget the statistics gathered during the previous cycle.
    ///
    /// Counters return to the values they had right after construction.
    pub fn reset_allocation_statistics(&self)
    {
        self.allocated_bytes.store(self.area_size(), Relaxed);
        self.wasted_memory.store(0, Relaxed);
        self.high_water_mark.store(self.area_start - self.address(), Relaxed);
    }

    /* ---------------------------------------------------------------------- */
    /*                                   Flags                                */
    /* ---------------------------------------------------------------------- */

    /// All classification bits.
    #[inline]
    pub fn get_flags(&self) -> ChunkFlags
    {
        self.flags.load()
    }

    /// Whether any bit of `mask` is set.
    #[inline]
    pub fn is_flag_set(&self, mask: ChunkFlags) -> bool
    {
        self.flags.is_set(mask)
    }

    /// Set every bit of `mask`.
    ///
    /// Only the thread driving the current collection phase may call this.
    #[inline]
    pub fn set_flag(&self, mask: ChunkFlags)
    {
        self.flags.set(mask);
    }

    /// Clear every bit of `mask`.
    ///
    /// Only the thread driving the current collection phase may call this.
    #[inline]
    pub fn clear_flag(&self, mask: ChunkFlags)
    {
        self.flags.clear(mask);
    }

    /// Copy the bits of `flags` selected by `mask`.
    ///
    /// Only the thread driving the current collection phase may call this.
    #[inline]
    pub fn set_flags(&self, flags: ChunkFlags, mask: ChunkFlags)
    {
        self.flags.set_masked(flags, mask);
    }

    #[allow(missing_docs)]
    #[inline]
    pub fn is_evacuation_candidate(&self) -> bool
    {
        self.is_flag_set(ChunkFlags::EVACUATION_CANDIDATE_MASK)
    }

    #[allow(missing_docs)]
    #[inline]
    pub fn should_skip_evacuation_slot_recording(&self) -> bool
    {
        self.is_flag_set(ChunkFlags::SKIP_EVACUATION_SLOTS_RECORDING_MASK)
    }

    #[allow(missing_docs)]
    #[inline]
    pub fn in_young_generation(&self) -> bool
    {
        self.is_flag_set(ChunkFlags::IS_IN_YOUNG_GENERATION_MASK)
    }

    #[allow(missing_docs)]
    #[inline]
    pub fn is_large_page(&self) -> bool
    {
        self.is_flag_set(ChunkFlags::IS_LARGE_PAGE_MASK)
    }

    #[allow(missing_docs)]
    #[inline]
    pub fn in_read_only_space(&self) -> bool
    {
        self.is_flag_set(ChunkFlags::READ_ONLY_HEAP)
    }

    #[allow(missing_docs)]
    #[inline]
    pub fn is_executable(&self) -> bool
    {
        self.is_flag_set(ChunkFlags::IS_EXECUTABLE)
    }

    #[allow(missing_docs)]
    #[inline]
    pub fn pointers_to_here_are_interesting(&self) -> bool
    {
        self.is_flag_set(ChunkFlags::POINTERS_TO_HERE_ARE_INTERESTING_MASK)
    }

    #[allow(missing_docs)]
    #[inline]
    pub fn pointers_from_here_are_interesting(&self) -> bool
    {
        self.is_flag_set(ChunkFlags::POINTERS_FROM_HERE_ARE_INTERESTING_MASK)
    }
}

/* -------------------------------------------------------------------------- */
/*                         Heap pointer publication check                     */
/* -------------------------------------------------------------------------- */

/// Returned when a chunk is observed without a heap
/// even though it is not part of the read-only heap.
#[cfg(any(debug_assertions, feature = "verify-heap"))]
#[derive(Debug, Error)]
#[error("Chunk at {address:#x} has no heap and is not read-only")]
pub struct HeapPointerError
{
    /// Address of the offending chunk.
    pub address: Address,
}

#[cfg(any(debug_assertions, feature = "verify-heap"))]
impl<'h, H> ChunkMetadata<'h, H>
{
    /// Check that the heap back-reference is visible to this thread.
    ///
    /// The load has acquire ordering. It pairs with the release store
    /// by which the allocator publishes the chunk to other threads,
    /// so a chunk published before its construction completed is caught here.
    pub fn check_heap_pointer(&self) -> Result<(), HeapPointerError>
    {
        let heap = self.heap.load(Acquire);
        if heap.is_null() && !self.is_flag_set(ChunkFlags::READ_ONLY_HEAP) {
            return Err(HeapPointerError{address: self.address()});
        }
        Ok(())
    }

    /// Like [`check_heap_pointer`][`Self::check_heap_pointer`],
    /// but abort the process on failure.
    pub fn synchronized_heap_load(&self)
    {
        if let Err(err) = self.check_heap_pointer() {
            error!("{err}");
            std::process::abort();
        }
    }
}

impl<'h, H> fmt::Debug for ChunkMetadata<'h, H>
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        f.debug_struct("ChunkMetadata")
            .field("address", &format_args!("{:#x}", self.address()))
            .field("size", &self.size)
            .field("flags", &self.flags)
            .field("heap", &self.heap.load(Relaxed))
            .field("area_start", &format_args!("{:#x}", self.area_start))
            .field("area_end", &format_args!("{:#x}", self.area_end))
            .field("allocated_bytes", &self.allocated_bytes())
            .field("wasted_memory", &self.wasted_memory())
            .field("high_water_mark", &self.high_water_mark())
            .field("owner", &self.owner.identity())
            .finish()
    }
}

/// Computed offsets must match the declared layout.
mod layout_validator
{
    use {
        super::ChunkMetadata,
        crate::ChunkLayout,
        std::mem::{offset_of, size_of},
    };

    type Metadata = ChunkMetadata<'static, ()>;

    const _: () = assert!(offset_of!(Metadata, size)            == ChunkLayout::SIZE_OFFSET);
    const _: () = assert!(offset_of!(Metadata, flags)           == ChunkLayout::FLAGS_OFFSET);
    const _: () = assert!(offset_of!(Metadata, heap)            == ChunkLayout::HEAP_OFFSET);
    const _: () = assert!(offset_of!(Metadata, area_start)      == ChunkLayout::AREA_START_OFFSET);
    const _: () = assert!(offset_of!(Metadata, area_end)        == ChunkLayout::AREA_END_OFFSET);
    const _: () = assert!(offset_of!(Metadata, allocated_bytes) == ChunkLayout::ALLOCATED_BYTES_OFFSET);
    const _: () = assert!(offset_of!(Metadata, wasted_memory)   == ChunkLayout::WASTED_MEMORY_OFFSET);
    const _: () = assert!(offset_of!(Metadata, high_water_mark) == ChunkLayout::HIGH_WATER_MARK_OFFSET);
    const _: () = assert!(offset_of!(Metadata, owner)           == ChunkLayout::OWNER_OFFSET);
    const _: () = assert!(offset_of!(Metadata, reservation)     == ChunkLayout::RESERVATION_OFFSET);

    const _: () = assert!(size_of::<Metadata>() == ChunkLayout::HEADER_SIZE);
}

#[cfg(test)]
mod tests
{
    use {
        super::*,
        crate::{ChunkLayout, load_flags_at},
        proptest::{prop_assert, prop_assert_eq, proptest},
        crate::reservation::{MappingGuard, is_mapped, lock_mappings},
        std::{ptr::NonNull, thread},
    };

    const CHUNK_SIZE: usize = 256 * 1024;
    const HEADER: usize = 32;

    struct TestHeap;

    /// The guard is declared first so that it outlives the chunk
    /// in the caller's `let (_mapping, chunk)` binding.
    fn chunk<'h>(heap: Option<&'h TestHeap>, space: &'h BaseSpace)
        -> (MappingGuard, ChunkMetadata<'h, TestHeap>)
    {
        let mapping = lock_mappings();
        let reservation =
            Reservation::reserve_aligned(CHUNK_SIZE, CHUNK_SIZE).unwrap();
        let base = reservation.address();
        let chunk = ChunkMetadata::new(
            heap, space, CHUNK_SIZE,
            base + HEADER, base + CHUNK_SIZE,
            reservation,
        );
        (mapping, chunk)
    }

    #[test]
    fn construct_old_space_chunk()
    {
        let heap = TestHeap;
        let space = BaseSpace::new(SpaceKind::Old);
        let (_mapping, chunk) = chunk(Some(&heap), &space);

        assert_eq!(chunk.size(), 262144);
        assert_eq!(chunk.area_start(), chunk.address() + 32);
        assert_eq!(chunk.area_end(), chunk.address() + 262144);
        assert_eq!(chunk.allocated_bytes(), 262112);
        assert_eq!(chunk.wasted_memory(), 0);
        assert_eq!(chunk.high_water_mark(), 32);
        assert!(chunk.in_old_space());
        assert!(!chunk.in_large_object_space());
        assert!(ptr::eq(chunk.heap().unwrap(), &heap));
        assert!(ptr::eq(chunk.owner(), &space));
        assert_eq!(chunk.get_flags(), ChunkFlags::empty());
    }

    #[test]
    fn space_predicates_are_total()
    {
        let heap = TestHeap;
        for kind in SpaceKind::ALL {
            let space = BaseSpace::new(kind);
            let (_mapping, chunk) = chunk(Some(&heap), &space);
            assert_eq!(chunk.in_old_space(), kind == SpaceKind::Old);
            assert_eq!(
                chunk.in_large_object_space(),
                kind == SpaceKind::LargeObject,
            );
            assert_eq!(chunk.in_read_only_heap_space(), kind == SpaceKind::ReadOnly);
            assert_eq!(chunk.get_flags(), kind.initial_chunk_flags());
            assert_eq!(chunk.in_young_generation(), chunk.in_young_generation_space());
            assert_eq!(chunk.is_executable(), chunk.in_code_space());
        }
    }

    #[test]
    fn set_owner_changes_identity()
    {
        let heap = TestHeap;
        let young = BaseSpace::new(SpaceKind::Young);
        let old = BaseSpace::new(SpaceKind::Old);
        let (_mapping, mut chunk) = chunk(Some(&heap), &young);
        assert!(chunk.in_young_generation_space());

        chunk.set_owner(&old);
        assert!(chunk.in_old_space());
        assert!(chunk.in_young_generation(), "flags are left alone");
    }

    #[test]
    fn contains_and_contains_limit()
    {
        let space = BaseSpace::new(SpaceKind::Old);
        let (_mapping, chunk) = chunk(Some(&TestHeap), &space);
        let (start, end) = (chunk.area_start(), chunk.area_end());

        assert!(!chunk.contains(start - 1));
        assert!(chunk.contains(start));
        assert!(chunk.contains(end - 1));
        assert!(!chunk.contains(end));
        assert!(chunk.contains_limit(end));
        assert!(!chunk.contains_limit(end + 1));
        assert_eq!(chunk.offset(end), CHUNK_SIZE);
    }

    #[test]
    fn counters_and_reset()
    {
        let space = BaseSpace::new(SpaceKind::Old);
        let (_mapping, chunk) = chunk(Some(&TestHeap), &space);

        chunk.decrease_allocated_bytes(1000);
        chunk.add_wasted_memory(24);
        chunk.update_high_water_mark(chunk.area_start() + 4096);
        assert_eq!(chunk.allocated_bytes(), 262112 - 1000);
        assert_eq!(chunk.wasted_memory(), 24);
        assert_eq!(chunk.high_water_mark(), 32 + 4096);

        chunk.increase_allocated_bytes(500);
        assert_eq!(chunk.allocated_bytes(), 262112 - 500);

        chunk.reset_allocation_statistics();
        assert_eq!(chunk.allocated_bytes(), 262112);
        assert_eq!(chunk.wasted_memory(), 0);
        assert_eq!(chunk.high_water_mark(), 32);
    }

    #[test]
    fn into_reservation_returns_the_chunk_memory()
    {
        let space = BaseSpace::new(SpaceKind::Old);
        let (_mapping, chunk) = chunk(Some(&TestHeap), &space);
        let address = chunk.address();

        let reservation = chunk.into_reservation();
        assert_eq!(reservation.address(), address);
        assert!(reservation.contains_range(address, CHUNK_SIZE));
        assert!(is_mapped(address, CHUNK_SIZE));

        drop(reservation);
        assert!(!is_mapped(address, CHUNK_SIZE));
    }

    #[test]
    fn shrink_area_clamps_allocated_bytes()
    {
        let space = BaseSpace::new(SpaceKind::LargeObject);
        let (_mapping, mut chunk) = chunk(Some(&TestHeap), &space);
        let new_end = chunk.area_start() + 4096;

        chunk.shrink_area(new_end);
        assert_eq!(chunk.area_end(), new_end);
        assert_eq!(chunk.area_size(), 4096);
        assert_eq!(chunk.allocated_bytes(), 4096);
        assert_eq!(chunk.size(), CHUNK_SIZE);
    }

    #[test]
    fn high_water_mark_with_concurrent_updaters()
    {
        let space = BaseSpace::new(SpaceKind::Old);
        let (_mapping, chunk) = chunk(Some(&TestHeap), &space);
        let start = chunk.area_start();

        thread::scope(|s| {
            for t in 0 .. 4 {
                let chunk = &chunk;
                s.spawn(move || {
                    for i in (0 .. 1000).map(|i| i * 4 + t) {
                        chunk.update_high_water_mark(start + i);
                    }
                });
            }
        });

        assert_eq!(chunk.high_water_mark(), 32 + 3999);
    }

    #[test]
    fn named_flag_predicates()
    {
        let space = BaseSpace::new(SpaceKind::Old);
        let (_mapping, chunk) = chunk(Some(&TestHeap), &space);

        assert!(!chunk.is_evacuation_candidate());
        assert!(!chunk.should_skip_evacuation_slot_recording());

        chunk.set_flag(ChunkFlags::EVACUATION_CANDIDATE);
        assert!(chunk.is_evacuation_candidate());
        assert!(chunk.should_skip_evacuation_slot_recording());

        chunk.set_flag(ChunkFlags::POINTERS_TO_HERE_ARE_INTERESTING
                     | ChunkFlags::POINTERS_FROM_HERE_ARE_INTERESTING);
        assert!(chunk.pointers_to_here_are_interesting());
        assert!(chunk.pointers_from_here_are_interesting());

        chunk.clear_flag(ChunkFlags::EVACUATION_CANDIDATE);
        assert!(!chunk.should_skip_evacuation_slot_recording());
        assert!(chunk.pointers_to_here_are_interesting());

        chunk.set_flags(ChunkFlags::TO_PAGE, ChunkFlags::IS_IN_YOUNG_GENERATION_MASK);
        assert!(chunk.in_young_generation());
        assert!(chunk.should_skip_evacuation_slot_recording());
        assert!(!chunk.is_large_page());
        assert!(!chunk.in_read_only_space());
    }

    #[test]
    fn fields_are_readable_at_declared_offsets()
    {
        let heap = TestHeap;
        let space = BaseSpace::new(SpaceKind::YoungLargeObject);
        let (_mapping, chunk) = chunk(Some(&heap), &space);
        chunk.add_wasted_memory(16);

        let base = NonNull::from(&chunk).cast::<u8>();
        // SAFETY: Each offset holds a word-sized field of chunk.
        let word = |offset: usize| unsafe {
            ptr::read(base.as_ptr().add(offset).cast::<usize>())
        };

        assert_eq!(word(ChunkLayout::SIZE_OFFSET), CHUNK_SIZE);
        assert_eq!(word(ChunkLayout::FLAGS_OFFSET), chunk.get_flags().bits());
        assert_eq!(word(ChunkLayout::HEAP_OFFSET), ptr::from_ref(&heap) as usize);
        assert_eq!(word(ChunkLayout::AREA_START_OFFSET), chunk.area_start());
        assert_eq!(word(ChunkLayout::AREA_END_OFFSET), chunk.area_end());
        assert_eq!(word(ChunkLayout::ALLOCATED_BYTES_OFFSET), chunk.allocated_bytes());
        assert_eq!(word(ChunkLayout::WASTED_MEMORY_OFFSET), 16);
        assert_eq!(word(ChunkLayout::HIGH_WATER_MARK_OFFSET), HEADER);
        assert_eq!(word(ChunkLayout::OWNER_OFFSET), ptr::from_ref(&space) as usize);
        assert_eq!(word(ChunkLayout::RESERVATION_OFFSET), chunk.address());

        // SAFETY: base points to live chunk metadata.
        let flags = unsafe { load_flags_at(base) };
        assert_eq!(flags, ChunkFlags::LARGE_PAGE | ChunkFlags::TO_PAGE);
    }

    #[cfg(any(debug_assertions, feature = "verify-heap"))]
    #[test]
    fn check_heap_pointer_with_heap()
    {
        let space = BaseSpace::new(SpaceKind::Old);
        let (_mapping, chunk) = chunk(Some(&TestHeap), &space);
        assert!(chunk.check_heap_pointer().is_ok());
        chunk.synchronized_heap_load();
    }

    #[cfg(any(debug_assertions, feature = "verify-heap"))]
    #[test]
    fn check_heap_pointer_read_only_without_heap()
    {
        let space = BaseSpace::new(SpaceKind::ReadOnly);
        let (_mapping, chunk) = chunk(None, &space);
        assert!(chunk.heap().is_none());
        assert!(chunk.in_read_only_space());
        assert!(chunk.check_heap_pointer().is_ok());
        chunk.synchronized_heap_load();
    }

    #[cfg(any(debug_assertions, feature = "verify-heap"))]
    #[test]
    fn heap_pointer_visible_after_publication()
    {
        use std::sync::atomic::Ordering::{Acquire, Release};

        let heap = TestHeap;
        let space = BaseSpace::new(SpaceKind::Old);
        let (_mapping, chunk) = chunk(Some(&heap), &space);

        // The allocator publishes the finished record.
        let published = AtomicPtr::new(null_mut());
        published.store(ptr::from_ref(&chunk).cast_mut(), Release);

        let visible = thread::scope(|s| {
            s.spawn(|| {
                let chunk = published.load(Acquire);
                // SAFETY: The chunk outlives this scope.
                let chunk: &ChunkMetadata<TestHeap> = unsafe { &*chunk };
                chunk.check_heap_pointer().is_ok()
                    && chunk.heap().is_some_and(|h| ptr::eq(h, &heap))
            }).join().unwrap()
        });

        assert!(visible);
    }

    #[cfg(any(debug_assertions, feature = "verify-heap"))]
    #[test]
    fn check_heap_pointer_fails_without_heap()
    {
        let space = BaseSpace::new(SpaceKind::Old);
        let (_mapping, chunk) = chunk(None, &space);
        let err = chunk.check_heap_pointer().unwrap_err();
        assert_eq!(err.address, chunk.address());
    }

    #[cfg(any(debug_assertions, feature = "verify-heap"))]
    #[test]
    fn synchronized_heap_load_aborts_without_heap()
    {
        use std::{
            env::{current_exe, var_os},
            os::unix::process::ExitStatusExt,
            process::{Command, Stdio},
        };

        const CHILD: &str = "HEAP_CHUNK_ABORT_CHILD";

        if var_os(CHILD).is_some() {
            let space = BaseSpace::new(SpaceKind::Old);
            let (_mapping, chunk) = chunk(None, &space);
            chunk.synchronized_heap_load();
            return;
        }

        // Run this same test in a child process, which must abort.
        let status = Command::new(current_exe().unwrap())
            .arg("--exact")
            .arg("metadata::tests::synchronized_heap_load_aborts_without_heap")
            .arg("--test-threads=1")
            .env(CHILD, "1")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .unwrap();

        assert_eq!(status.signal(), Some(libc::SIGABRT));
    }

    proptest!
    {
        #[test]
        fn high_water_mark_never_decreases(
            marks in proptest::collection::vec(0usize .. CHUNK_SIZE, 1 .. 32),
        )
        {
            let space = BaseSpace::new(SpaceKind::Old);
            let (_mapping, chunk) = chunk(Some(&TestHeap), &space);
            let mut expected = chunk.high_water_mark();

            for mark in marks {
                let before = chunk.high_water_mark();
                chunk.update_high_water_mark(chunk.address() + mark);
                expected = expected.max(mark);
                prop_assert!(chunk.high_water_mark() >= before);
                prop_assert_eq!(chunk.high_water_mark(), expected);
            }
        }
    }
}
