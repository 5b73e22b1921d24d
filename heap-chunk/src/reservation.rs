use {
    crate::Address,
    os_ext::{
        MAP_ANONYMOUS, MAP_NORESERVE, MAP_PRIVATE, PROT_READ, PROT_WRITE,
        _SC_PAGESIZE,
        c_void, mmap, munmap, sysconf,
    },
    std::{io, mem::ManuallyDrop, ptr::null_mut},
    thiserror::Error,
    tracing::{error, trace},
};

/// Owned range of virtual memory.
///
/// A reservation is move-only and unmaps its range exactly once,
/// when it is dropped.
/// The representation is two words, address then size,
/// which is part of the chunk layout contract.
#[derive(Debug)]
#[repr(C)]
pub struct Reservation
{
    /// Address of the first byte of the range.
    address: Address,

    /// Length of the range in bytes, a multiple of the page size.
    size: usize,
}

/// Returned when memory cannot be reserved.
#[derive(Debug, Error)]
pub enum ReservationError
{
    /// The requested size was zero.
    #[error("Cannot reserve an empty range")]
    Empty,

    /// The requested size overflows when rounded to pages.
    #[error("Cannot reserve a range this large")]
    TooLarge,

    /// The alignment is not a power of two.
    #[error("Cannot align a reservation to {0} bytes")]
    BadAlignment(usize),

    /// The operating system refused the mapping.
    #[error("Cannot map memory: {0}")]
    Os(#[from] io::Error),
}

impl Reservation
{
    /// Reserve at least `size` bytes of readable and writable memory.
    ///
    /// The size is rounded up to a multiple of the page size.
    /// Memory is committed lazily by the operating system.
    pub fn reserve(size: usize) -> Result<Self, ReservationError>
    {
        let size = round_to_pages(size)?;

        // SAFETY: No MAP_FIXED, so no existing mapping is replaced.
        let ptr = unsafe {
            mmap(
                null_mut(), size,
                PROT_READ | PROT_WRITE,
                MAP_PRIVATE | MAP_ANONYMOUS | MAP_NORESERVE,
                None, 0,
            )?
        };

        let address = ptr as Address;
        trace!("reserved {size} bytes at {address:#x}");
        Ok(Self{address, size})
    }

    /// Reserve at least `size` bytes aligned to `align`.
    ///
    /// This over-reserves by `align` bytes and unmaps
    /// the unaligned head and the excess tail.
    pub fn reserve_aligned(size: usize, align: usize)
        -> Result<Self, ReservationError>
    {
        if !align.is_power_of_two() {
            return Err(ReservationError::BadAlignment(align));
        }

        let page_size = page_size()?;
        if align <= page_size {
            return Self::reserve(size);
        }

        let size = round_to_pages(size)?;
        let padded = size.checked_add(align)
            .ok_or(ReservationError::TooLarge)?;
        let padded = Self::reserve(padded)?;

        // Take the range apart so that each piece can be released separately.
        let (start, padded_size) = padded.into_raw_parts();
        let end = start + padded_size;
        let aligned = start.next_multiple_of(align);

        // SAFETY: The head and tail were mapped above and are not in use.
        unsafe {
            drop(Self::from_raw_parts(start, aligned - start));
            drop(Self::from_raw_parts(aligned + size, end - (aligned + size)));
        }

        // SAFETY: The middle was mapped above and nothing else owns it.
        Ok(unsafe { Self::from_raw_parts(aligned, size) })
    }

    /// Take ownership of a mapped range.
    ///
    /// A zero `size` owns nothing and releases nothing.
    ///
    /// # Safety
    ///
    /// The range must have been mapped with mmap(2),
    /// must be page-aligned, and must not be owned by anything else.
    pub unsafe fn from_raw_parts(address: Address, size: usize) -> Self
    {
        Self{address, size}
    }

    /// Give up ownership of the range without releasing it.
    pub fn into_raw_parts(self) -> (Address, usize)
    {
        let this = ManuallyDrop::new(self);
        (this.address, this.size)
    }

    /// Address of the first byte of the range.
    #[inline]
    pub fn address(&self) -> Address
    {
        self.address
    }

    /// Length of the range in bytes.
    #[inline]
    pub fn size(&self) -> usize
    {
        self.size
    }

    /// Address one past the last byte of the range.
    #[inline]
    pub fn end(&self) -> Address
    {
        self.address + self.size
    }

    /// Whether the reservation owns any memory.
    #[inline]
    pub fn is_reserved(&self) -> bool
    {
        self.size != 0
    }

    /// Whether `address` lies within the range.
    pub fn contains(&self, address: Address) -> bool
    {
        self.address <= address && address < self.end()
    }

    /// Whether `[start, start + len)` lies within the range.
    pub fn contains_range(&self, start: Address, len: usize) -> bool
    {
        match start.checked_add(len) {
            Some(end) => self.address <= start && end <= self.end(),
            None      => false,
        }
    }
}

impl Drop for Reservation
{
    fn drop(&mut self)
    {
        if !self.is_reserved() {
            return;
        }

        let (address, size) = (self.address, self.size);

        // SAFETY: We own the mapping and nothing uses it anymore.
        match unsafe { munmap(address as *mut c_void, size) } {
            Ok(()) =>
                trace!("released {size} bytes at {address:#x}"),
            Err(err) =>
                error!("cannot release {size} bytes at {address:#x}: {err}"),
        }
    }
}

/// The page size of the system.
fn page_size() -> io::Result<usize>
{
    Ok(sysconf(_SC_PAGESIZE)? as usize)
}

/// Round a non-zero size up to a multiple of the page size.
fn round_to_pages(size: usize) -> Result<usize, ReservationError>
{
    if size == 0 {
        return Err(ReservationError::Empty);
    }
    size.checked_next_multiple_of(page_size()?)
        .ok_or(ReservationError::TooLarge)
}

/// Held by tests while they map, unmap, or inspect memory.
#[cfg(test)]
pub (crate) type MappingGuard = std::sync::MutexGuard<'static, ()>;

/// Serialize tests that map memory.
///
/// A range freed by one test could be reused by another
/// before mincore(2) looks at it.
#[cfg(test)]
pub (crate) fn lock_mappings() -> MappingGuard
{
    use std::sync::{Mutex, PoisonError};
    static MAPPING: Mutex<()> = Mutex::new(());
    MAPPING.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Whether every page of the range is mapped.
#[cfg(test)]
pub (crate) fn is_mapped(address: Address, size: usize) -> bool
{
    use os_ext::{ENOMEM, mincore};
    match mincore(address as *mut c_void, size) {
        Ok(..) => true,
        Err(err) if err.raw_os_error() == Some(ENOMEM) => false,
        Err(err) => panic!("{err}"),
    }
}
