use {
    crate::{_SC_PAGESIZE, sysconf},
    std::{
        io,
        os::unix::io::{AsRawFd, BorrowedFd},
    },
};

/// Call mmap(2) with the given arguments.
///
/// If `fd` is [`None`], `-1` is passed.
///
/// # Safety
///
/// With `MAP_FIXED`, any existing mapping in the range is replaced.
/// The caller must own that range or pass a null `addr` hint.
pub unsafe fn mmap(
    addr:   *mut libc::c_void,
    length: usize,
    prot:   libc::c_int,
    flags:  libc::c_int,
    fd:     Option<BorrowedFd>,
    offset: libc::off_t,
) -> io::Result<*mut libc::c_void>
{
    let fd = fd.map(|fd| fd.as_raw_fd()).unwrap_or(-1);

    let ptr = libc::mmap(addr, length, prot, flags, fd, offset);

    if ptr == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }

    Ok(ptr)
}

/// Call munmap(2) with the given arguments.
///
/// # Safety
///
/// Nothing may access the range after it is unmapped.
pub unsafe fn munmap(addr: *mut libc::c_void, length: usize)
    -> io::Result<()>
{
    let result = libc::munmap(addr, length);

    if result == -1 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// Call mincore(2) with the given arguments.
///
/// The residency vector is allocated by this function,
/// with one entry per page overlapping the range.
/// If any page in the range is not mapped, this fails with `ENOMEM`.
pub fn mincore(addr: *mut libc::c_void, length: usize) -> io::Result<Vec<u8>>
{
    let page_size = sysconf(_SC_PAGESIZE)? as usize;
    let mut vec = vec![0u8; length.div_ceil(page_size)];

    // SAFETY: vec has one byte for each page in the range.
    let result = unsafe {
        libc::mincore(addr, length, vec.as_mut_ptr().cast())
    };

    if result == -1 {
        return Err(io::Error::last_os_error());
    }

    Ok(vec)
}
