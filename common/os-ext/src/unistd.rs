use std::io;

/// Call sysconf(3) with the given arguments.
///
/// Options without a definite limit are reported as errors,
/// just like options that do not exist.
pub fn sysconf(name: libc::c_int) -> io::Result<libc::c_long>
{
    // SAFETY: This is always safe.
    let result = unsafe { libc::sysconf(name) };

    if result == -1 {
        return Err(io::Error::last_os_error());
    }

    Ok(result)
}
