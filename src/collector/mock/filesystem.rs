//! In-memory mock filesystem for testing collectors without real `/proc`.
//!
//! This module provides `MockFs` which simulates a filesystem in memory,
//! including filesystem statistics for mount points, allowing tests to run
//! without Linux and to simulate hung or failing mounts.

use crate::collector::traits::{FileSystem, FsStats};
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Simulated result of a statistics query for one path.
#[derive(Debug, Clone)]
struct MockStatfs {
    result: Result<FsStats, i32>,
    delay: Duration,
}

/// In-memory filesystem for testing.
///
/// Stores files and directories in memory, allowing tests to simulate
/// various `/proc` filesystem states without needing actual Linux access.
#[derive(Debug, Clone, Default)]
pub struct MockFs {
    /// Map from path to file contents.
    files: HashMap<PathBuf, String>,
    /// Set of directories (for read_dir support).
    directories: HashSet<PathBuf>,
    /// Statistics query results keyed by mount path.
    statfs: HashMap<PathBuf, MockStatfs>,
    /// Statistics queries started per path, shared between clones.
    statfs_calls: Arc<Mutex<HashMap<PathBuf, usize>>>,
}

impl MockFs {
    /// Creates a new empty mock filesystem.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) a file with the given content.
    ///
    /// Parent directories are automatically created.
    pub fn add_file(&mut self, path: impl AsRef<Path>, content: impl Into<String>) {
        let path = path.as_ref().to_path_buf();
        self.add_parents(&path);
        self.files.insert(path, content.into());
    }

    /// Removes a file if present.
    pub fn remove_file(&mut self, path: impl AsRef<Path>) {
        self.files.remove(path.as_ref());
    }

    /// Adds an empty directory.
    pub fn add_dir(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref().to_path_buf();
        self.add_parents(&path);
        self.directories.insert(path);
    }

    fn add_parents(&mut self, path: &Path) {
        let mut parent = path.parent();
        while let Some(p) = parent {
            if !p.as_os_str().is_empty() {
                self.directories.insert(p.to_path_buf());
            }
            parent = p.parent();
        }
    }

    /// Adds a process directory with its `/proc/[pid]/stat` record.
    pub fn add_process(&mut self, pid: u32, stat: &str) {
        let base = PathBuf::from(format!("/proc/{}", pid));
        self.add_dir(&base);
        self.add_file(base.join("stat"), stat);
    }

    /// Removes a process directory and everything below it.
    pub fn remove_process(&mut self, pid: u32) {
        let base = PathBuf::from(format!("/proc/{}", pid));
        self.files.retain(|path, _| !path.starts_with(&base));
        self.directories.retain(|path| !path.starts_with(&base));
    }

    /// Registers successful filesystem statistics for a mount path.
    pub fn add_mount_stats(&mut self, path: impl AsRef<Path>, stats: FsStats) {
        self.statfs.insert(
            path.as_ref().to_path_buf(),
            MockStatfs {
                result: Ok(stats),
                delay: Duration::ZERO,
            },
        );
    }

    /// Makes the statistics query for `path` fail with `errno`.
    pub fn set_statfs_error(&mut self, path: impl AsRef<Path>, errno: i32) {
        self.statfs.insert(
            path.as_ref().to_path_buf(),
            MockStatfs {
                result: Err(errno),
                delay: Duration::ZERO,
            },
        );
    }

    /// Makes the statistics query for `path` block for `delay` before answering.
    ///
    /// Paths without registered statistics answer `ENOENT` after the delay.
    pub fn set_statfs_delay(&mut self, path: impl AsRef<Path>, delay: Duration) {
        self.statfs
            .entry(path.as_ref().to_path_buf())
            .or_insert(MockStatfs {
                result: Err(libc::ENOENT),
                delay: Duration::ZERO,
            })
            .delay = delay;
    }

    /// Number of statistics queries started for `path` so far.
    pub fn statfs_calls(&self, path: impl AsRef<Path>) -> usize {
        let calls = self.statfs_calls.lock().unwrap_or_else(PoisonError::into_inner);
        calls.get(path.as_ref()).copied().unwrap_or(0)
    }
}

impl FileSystem for MockFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.files.get(path).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("file not found: {:?}", path),
            )
        })
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.contains_key(path) || self.directories.contains(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        if !self.directories.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("directory not found: {:?}", path),
            ));
        }

        let mut entries = HashSet::new();

        // Find all files and directories that are direct children
        for file_path in self.files.keys() {
            if file_path.parent().is_some_and(|parent| parent == path) {
                entries.insert(file_path.clone());
            }
        }

        for dir_path in &self.directories {
            if dir_path.parent().is_some_and(|parent| parent == path) && dir_path != path {
                entries.insert(dir_path.clone());
            }
        }

        Ok(entries.into_iter().collect())
    }

    fn statfs(&self, path: &Path) -> io::Result<FsStats> {
        *self
            .statfs_calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(path.to_path_buf())
            .or_insert(0) += 1;
        let Some(entry) = self.statfs.get(path) else {
            return Err(io::Error::from_raw_os_error(libc::ENOENT));
        };
        if !entry.delay.is_zero() {
            std::thread::sleep(entry.delay);
        }
        entry.result.map_err(io::Error::from_raw_os_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_fs_add_file() {
        let mut fs = MockFs::new();
        fs.add_file("/proc/meminfo", "MemTotal: 16384 kB\n");

        assert!(fs.exists(Path::new("/proc/meminfo")));
        assert!(fs.exists(Path::new("/proc")));

        let content = fs.read_to_string(Path::new("/proc/meminfo")).unwrap();
        assert_eq!(content, "MemTotal: 16384 kB\n");
    }

    #[test]
    fn test_mock_fs_read_dir() {
        let mut fs = MockFs::new();
        fs.add_file("/proc/1/stat", "stat content");
        fs.add_file("/proc/1/status", "status content");
        fs.add_file("/proc/2/stat", "stat content 2");

        let proc_entries = fs.read_dir(Path::new("/proc")).unwrap();
        assert_eq!(proc_entries.len(), 2); // /proc/1 and /proc/2

        let proc1_entries = fs.read_dir(Path::new("/proc/1")).unwrap();
        assert_eq!(proc1_entries.len(), 2); // stat and status
    }

    #[test]
    fn test_mock_fs_add_and_remove_process() {
        let mut fs = MockFs::new();
        fs.add_process(1234, "1234 (bash) S 1233 1234 1234 0 -1 4194304 100 0 0 0 10 5 0 0 20 0 1 0 12345 12345678 100");

        assert!(fs.exists(Path::new("/proc/1234")));
        assert!(fs.exists(Path::new("/proc/1234/stat")));

        fs.remove_process(1234);
        assert!(!fs.exists(Path::new("/proc/1234")));
        assert!(!fs.exists(Path::new("/proc/1234/stat")));
        assert!(fs.exists(Path::new("/proc")));
    }

    #[test]
    fn test_mock_fs_not_found() {
        let fs = MockFs::new();
        let result = fs.read_to_string(Path::new("/nonexistent"));
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_mock_fs_statfs() {
        let mut fs = MockFs::new();
        let stats = FsStats {
            block_size: 4096,
            blocks: 100,
            blocks_free: 50,
            blocks_available: 40,
            ..FsStats::default()
        };
        fs.add_mount_stats("/", stats);
        fs.set_statfs_error("/mnt/nfs", libc::EACCES);

        assert_eq!(fs.statfs(Path::new("/")).unwrap(), stats);
        let err = fs.statfs(Path::new("/mnt/nfs")).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EACCES));
        let err = fs.statfs(Path::new("/unknown")).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
    }

    #[test]
    fn test_mock_fs_statfs_delay_keeps_result() {
        let mut fs = MockFs::new();
        fs.add_mount_stats("/slow", FsStats::default());
        fs.set_statfs_delay("/slow", Duration::from_millis(20));

        let started = std::time::Instant::now();
        assert!(fs.statfs(Path::new("/slow")).is_ok());
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_mock_fs_counts_statfs_calls() {
        let fs = MockFs::typical_system();
        let clone = fs.clone();
        assert_eq!(fs.statfs_calls("/"), 0);

        let _ = fs.statfs(Path::new("/"));
        let _ = clone.statfs(Path::new("/"));
        let _ = fs.statfs(Path::new("/unknown"));

        assert_eq!(fs.statfs_calls("/"), 2);
        assert_eq!(fs.statfs_calls("/unknown"), 1);
        assert_eq!(fs.statfs_calls("/boot"), 0);
    }
}
