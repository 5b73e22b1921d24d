//! Extra items for talking to the operating system.
//!
//! This crate provides a safe, low-level interface to the operating system.
//! The functions in this crate are named after their underlying system calls,
//! and their behavior is identical except for the differences listed below.
//! The exact semantics of each function can be found in their man pages.
//! This is in contrast with the std crate, which gives no such guarantees.
//! This is a trade-off against cross-platform compatibility.
//!
//! # Differences with underlying system calls
//!
//! Errors are reported using [`Result`] rather than
//! through `errno` and an arbitrary return value.
//!
//! Output buffers are allocated by the wrapper functions
//! and returned instead of being passed in by the caller.
//!
//! [`Result`]: `std::io::Result`

#![warn(missing_docs)]

pub use {
    self::{sys_mman::*, unistd::*},
    libc::{
        ENOMEM,
        MAP_ANONYMOUS, MAP_FIXED, MAP_NORESERVE, MAP_PRIVATE,
        PROT_NONE, PROT_READ, PROT_WRITE,
        _SC_PAGESIZE,
        c_int, c_long, c_void, off_t,
    },
};

mod sys_mman;
mod unistd;
