use crate::ChunkFlags;

/// Identity of a space.
///
/// Each chunk is managed by exactly one space at a time,
/// and the space decides the allocation and lifetime policy of its objects.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[repr(u8)]
pub enum SpaceKind
{
    ReadOnly,
    Young,
    Old,
    Code,
    Shared,
    LargeObject,
    YoungLargeObject,
    CodeLargeObject,
}

impl SpaceKind
{
    /// Every space kind.
    pub const ALL: [Self; 8] = [
        Self::ReadOnly,
        Self::Young,
        Self::Old,
        Self::Code,
        Self::Shared,
        Self::LargeObject,
        Self::YoungLargeObject,
        Self::CodeLargeObject,
    ];

    /// The flags a chunk starts out with when created for this space.
    pub const fn initial_chunk_flags(self) -> ChunkFlags
    {
        use ChunkFlags as F;
        match self {
            Self::ReadOnly         => F::READ_ONLY_HEAP,
            Self::Young            => F::TO_PAGE,
            Self::Old              => F::empty(),
            Self::Code             => F::IS_EXECUTABLE,
            Self::Shared           => F::IN_SHARED_HEAP,
            Self::LargeObject      => F::LARGE_PAGE,
            Self::YoungLargeObject => F::LARGE_PAGE.union(F::TO_PAGE),
            Self::CodeLargeObject  => F::LARGE_PAGE.union(F::IS_EXECUTABLE),
        }
    }
}

/// The part of a space that chunks refer back to.
///
/// Concrete spaces live outside this crate and embed a `BaseSpace`.
/// Chunk metadata keeps a plain reference to it,
/// so the space must outlive every chunk it owns.
#[derive(Debug)]
#[repr(C)]
pub struct BaseSpace
{
    identity: SpaceKind,
}

impl BaseSpace
{
    /// Create the identity part of a space.
    pub const fn new(identity: SpaceKind) -> Self
    {
        Self{identity}
    }

    /// Which kind of space this is.
    #[inline]
    pub fn identity(&self) -> SpaceKind
    {
        self.identity
    }
}
