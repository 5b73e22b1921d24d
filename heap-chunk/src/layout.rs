//! Byte offsets of the chunk metadata fields.
//!
//! Inline write barriers and other generated code read chunk metadata
//! with plain loads at these offsets, without calling into this crate.
//! The offsets are checked against [`ChunkMetadata`] at compile time.
//!
//! [`ChunkMetadata`]: `crate::ChunkMetadata`

use {
    crate::{ChunkFlags, FlagCell},
    std::{mem::size_of, ptr::NonNull},
};

/// Width of an address on the target.
const WORD: usize = size_of::<usize>();

/// Declared layout of chunk metadata.
pub struct ChunkLayout;

/// One field of the declared layout.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LayoutField
{
    /// Name of the field, as code generators refer to it.
    pub name: &'static str,

    /// Byte offset from the start of the metadata.
    pub offset: usize,

    /// Byte width of the field.
    pub width: usize,
}

#[allow(missing_docs)]
impl ChunkLayout
{
    /// Bumped whenever an offset or a flag value changes.
    pub const VERSION: u32 = 1;

    pub const SIZE_OFFSET:            usize = 0;
    pub const FLAGS_OFFSET:           usize = Self::SIZE_OFFSET + WORD;
    pub const HEAP_OFFSET:            usize = Self::FLAGS_OFFSET + WORD;
    pub const AREA_START_OFFSET:      usize = Self::HEAP_OFFSET + WORD;
    pub const AREA_END_OFFSET:        usize = Self::AREA_START_OFFSET + WORD;
    pub const ALLOCATED_BYTES_OFFSET: usize = Self::AREA_END_OFFSET + WORD;
    pub const WASTED_MEMORY_OFFSET:   usize = Self::ALLOCATED_BYTES_OFFSET + WORD;
    pub const HIGH_WATER_MARK_OFFSET: usize = Self::WASTED_MEMORY_OFFSET + WORD;
    pub const OWNER_OFFSET:           usize = Self::HIGH_WATER_MARK_OFFSET + WORD;
    pub const RESERVATION_OFFSET:     usize = Self::OWNER_OFFSET + WORD;

    /// The reservation is an address and a size.
    pub const RESERVATION_SIZE: usize = 2 * WORD;

    /// Total size of chunk metadata.
    pub const HEADER_SIZE: usize =
        Self::RESERVATION_OFFSET + Self::RESERVATION_SIZE;

    /// Every field, in order of increasing offset.
    pub const FIELDS: [LayoutField; 10] = [
        layout_field("size",            Self::SIZE_OFFSET,            WORD),
        layout_field("flags",           Self::FLAGS_OFFSET,           WORD),
        layout_field("heap",            Self::HEAP_OFFSET,            WORD),
        layout_field("area_start",      Self::AREA_START_OFFSET,      WORD),
        layout_field("area_end",        Self::AREA_END_OFFSET,        WORD),
        layout_field("allocated_bytes", Self::ALLOCATED_BYTES_OFFSET, WORD),
        layout_field("wasted_memory",   Self::WASTED_MEMORY_OFFSET,   WORD),
        layout_field("high_water_mark", Self::HIGH_WATER_MARK_OFFSET, WORD),
        layout_field("owner",           Self::OWNER_OFFSET,           WORD),
        layout_field("reservation",     Self::RESERVATION_OFFSET,     Self::RESERVATION_SIZE),
    ];

    /// Look up a field by name.
    pub fn field(name: &str) -> Option<LayoutField>
    {
        Self::FIELDS.into_iter().find(|f| f.name == name)
    }
}

const fn layout_field(name: &'static str, offset: usize, width: usize) -> LayoutField
{
    LayoutField{name, offset, width}
}

/// Load the flags of the chunk whose metadata starts at `metadata`.
///
/// This is the read performed by the write barrier fast path:
/// one relaxed word load at [`ChunkLayout::FLAGS_OFFSET`].
///
/// # Safety
///
/// `metadata` must point to live chunk metadata.
#[inline]
pub unsafe fn load_flags_at(metadata: NonNull<u8>) -> ChunkFlags
{
    let cell = metadata.as_ptr().add(ChunkLayout::FLAGS_OFFSET);
    // SAFETY: The flags field is a FlagCell at this offset.
    let cell = &*cell.cast::<FlagCell>();
    cell.load()
}
