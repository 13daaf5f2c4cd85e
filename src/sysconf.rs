//! System configuration limits from `sysconf(3)`.
//!
//! Each function is a single idempotent read. `None` means the limit is
//! unsupported or indeterminate on this system.

fn sysconf(name: libc::c_int) -> Option<u64> {
    // SAFETY: sysconf has no memory-safety preconditions.
    let value = unsafe { libc::sysconf(name) };
    u64::try_from(value).ok()
}

/// Maximum length of the arguments to the exec functions.
pub fn max_arguments_length() -> Option<u64> {
    sysconf(libc::_SC_ARG_MAX)
}

/// Maximum number of simultaneous processes per user.
pub fn max_processes_per_user() -> Option<u64> {
    sysconf(libc::_SC_CHILD_MAX)
}

/// Clock ticks per second (USER_HZ).
pub fn ticks_per_second() -> Option<u64> {
    sysconf(libc::_SC_CLK_TCK)
}

/// Maximum number of files a process can have open.
pub fn max_open_files() -> Option<u64> {
    sysconf(libc::_SC_OPEN_MAX)
}

/// Memory page size in bytes.
pub fn page_size() -> Option<u64> {
    sysconf(libc::_SC_PAGESIZE)
}

/// Number of physical memory pages.
pub fn total_ram_pages() -> Option<u64> {
    sysconf(libc::_SC_PHYS_PAGES)
}

/// Number of currently available physical memory pages.
pub fn available_ram_pages() -> Option<u64> {
    sysconf(libc::_SC_AVPHYS_PAGES)
}

/// Number of configured processors.
pub fn cpu_count() -> Option<u64> {
    sysconf(libc::_SC_NPROCESSORS_CONF)
}

/// Number of online processors.
pub fn online_cpu_count() -> Option<u64> {
    sysconf(libc::_SC_NPROCESSORS_ONLN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_limits_available() {
        assert!(page_size().is_some_and(|size| size >= 1024));
        assert!(ticks_per_second().is_some_and(|hz| hz > 0));
        assert!(online_cpu_count().is_some_and(|n| n >= 1));
    }

    #[test]
    fn test_online_cpus_not_above_configured() {
        if let (Some(online), Some(configured)) = (online_cpu_count(), cpu_count()) {
            assert!(online <= configured);
        }
    }
}
