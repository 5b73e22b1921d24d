//! Per-chunk bookkeeping for a generational, concurrently marked heap.
//!
//! The heap is made of chunks: contiguous ranges of memory
//! that the collector allocates and reclaims as a unit.
//! Each chunk is described by a [`ChunkMetadata`] record.
//! The record stores the classification [flags] tested by write barriers,
//! allocation counters maintained by the sweeper,
//! back-references to the owning heap and [space],
//! and the [reservation] that owns the memory of the chunk.
//!
//! # Fixed layout
//!
//! Write barriers are emitted inline by the compiler
//! and read chunk metadata without calling into this crate.
//! The byte offset of every field is therefore declared in [`ChunkLayout`]
//! and checked against the actual struct layout at compile time.
//!
//! # Concurrency
//!
//! At most one thread mutates a given record at a time:
//! the thread that drives the current allocation, sweeping,
//! or collection step for the chunk.
//! Other threads may read flags and counters concurrently;
//! they may observe stale values, but never torn ones.
//!
//! # Diagnostics
//!
//! When debug assertions or the `verify-heap` feature are enabled,
//! [`ChunkMetadata::synchronized_heap_load`] checks that the heap
//! back-reference was published before the chunk was.
//!
//! [flags]: `ChunkFlags`
//! [space]: `BaseSpace`
//! [reservation]: `Reservation`

#![warn(missing_docs)]

pub use self::{
    flags::*,
    layout::*,
    metadata::*,
    reservation::*,
    space::*,
};

mod flags;
mod layout;
mod metadata;
mod reservation;
mod space;

/// Address of a byte of memory.
pub type Address = usize;
