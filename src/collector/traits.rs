//! Abstractions for filesystem access to enable testing and mocking.
//!
//! The `FileSystem` trait allows the collectors to work with both the real
//! `/proc` filesystem and `statvfs(3)` on Linux, and with mock implementations
//! for testing.

use std::ffi::CString;
use std::io;
use std::mem::MaybeUninit;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

/// Geometry of a mounted filesystem as reported by the statistics query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FsStats {
    /// Size of one block in bytes.
    pub block_size: u64,
    /// Total data blocks.
    pub blocks: u64,
    /// Free blocks.
    pub blocks_free: u64,
    /// Free blocks available to unprivileged users.
    pub blocks_available: u64,
    /// Maximum filename length.
    pub name_max: u64,
    /// Total file nodes.
    pub files: u64,
    /// Free file nodes.
    pub files_free: u64,
}

/// Abstraction for filesystem operations.
///
/// This trait allows collectors to read from the real filesystem or from
/// a mock implementation for testing purposes.
pub trait FileSystem: Send + Sync {
    /// Reads the entire contents of a file as a string.
    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// Checks if a path exists.
    fn exists(&self, path: &Path) -> bool;

    /// Lists entries in a directory.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;

    /// Queries filesystem statistics for the filesystem containing `path`.
    ///
    /// May block for an unbounded time (e.g. a stalled network mount).
    fn statfs(&self, path: &Path) -> io::Result<FsStats>;
}

/// Real filesystem implementation that delegates to `std::fs` and `statvfs`.
///
/// Use this in production to read from the actual `/proc` filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFs;

impl RealFs {
    /// Creates a new `RealFs` instance.
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for RealFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let entries = std::fs::read_dir(path)?;
        let mut paths = Vec::new();
        for entry in entries {
            paths.push(entry?.path());
        }
        Ok(paths)
    }

    fn statfs(&self, path: &Path) -> io::Result<FsStats> {
        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))?;
        let mut raw = MaybeUninit::<libc::statvfs>::uninit();

        // SAFETY: c_path is NUL-terminated and raw points to writable storage
        // large enough for a statvfs struct.
        let rc = unsafe { libc::statvfs(c_path.as_ptr(), raw.as_mut_ptr()) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: statvfs returned 0, so the struct has been filled in.
        let raw = unsafe { raw.assume_init() };

        // Block counts are expressed in fragment-size units.
        let block_size = if raw.f_frsize > 0 {
            raw.f_frsize as u64
        } else {
            raw.f_bsize as u64
        };

        Ok(FsStats {
            block_size,
            blocks: raw.f_blocks as u64,
            blocks_free: raw.f_bfree as u64,
            blocks_available: raw.f_bavail as u64,
            name_max: raw.f_namemax as u64,
            files: raw.f_files as u64,
            files_free: raw.f_ffree as u64,
        })
    }
}
