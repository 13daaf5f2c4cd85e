//! System collector for memory, swap and load figures from `/proc/`.

use crate::cache::ClockedCache;
use crate::collector::procfs::parser::{
    LoadAvg, MemInfo, parse_loadavg, parse_meminfo, parse_uptime,
};
use crate::collector::procfs::process::CollectError;
use crate::collector::traits::FileSystem;
use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

/// 1, 5 and 15 minute load averages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LoadAverage {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

/// Snapshot of system-wide memory and load counters.
///
/// Memory figures are in bytes (`memory_unit` is always 1).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SysInfo {
    pub total_ram: u64,
    pub free_ram: u64,
    pub shared_ram: u64,
    pub buffer_ram: u64,
    pub total_swap: u64,
    pub free_swap: u64,
    pub total_high: u64,
    pub free_high: u64,
    pub memory_unit: u32,
    /// Seconds since boot.
    pub uptime: u64,
    pub load: LoadAverage,
    /// Number of kernel scheduling entities (threads).
    pub threads: u32,
    /// Scheduling entities currently runnable.
    pub running_threads: u32,
}

/// Collects system-wide metrics from `/proc/`, cached for `value_duration`.
pub struct SystemCollector<F: FileSystem> {
    fs: F,
    proc_path: String,
    cache: Mutex<ClockedCache<SysInfo>>,
}

impl<F: FileSystem> SystemCollector<F> {
    /// Creates a new system collector.
    ///
    /// # Arguments
    /// * `fs` - Filesystem implementation (real or mock)
    /// * `proc_path` - Base path to proc filesystem (usually "/proc")
    /// * `value_duration` - Freshness window of the snapshot
    pub fn new(fs: F, proc_path: impl Into<String>, value_duration: Duration) -> Self {
        Self {
            fs,
            proc_path: proc_path.into(),
            cache: Mutex::new(ClockedCache::new(value_duration)),
        }
    }

    fn lock_cache(&self) -> MutexGuard<'_, ClockedCache<SysInfo>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn value_duration(&self) -> Duration {
        self.lock_cache().window()
    }

    pub fn set_value_duration(&self, window: Duration) {
        self.lock_cache().set_window(window);
    }

    /// Returns the cached snapshot, re-reading `/proc` when it is stale or
    /// `force` is set.
    pub fn snapshot(&self, force: bool) -> SysInfo {
        self.lock_cache()
            .get_or_refresh(force, || self.collect())
            .clone()
    }

    /// Reads a fresh snapshot. Unreadable sources leave their fields zeroed.
    pub fn collect(&self) -> SysInfo {
        let mem = self.collect_meminfo().unwrap_or_else(|e| {
            warn!(error = %e, "meminfo unavailable");
            MemInfo::default()
        });
        let load = self.collect_loadavg().unwrap_or_else(|e| {
            warn!(error = %e, "loadavg unavailable");
            LoadAvg::default()
        });
        let uptime = self.collect_uptime().unwrap_or_else(|e| {
            warn!(error = %e, "uptime unavailable");
            0.0
        });

        let info = SysInfo {
            total_ram: mem.mem_total * 1024,
            free_ram: mem.mem_free * 1024,
            shared_ram: mem.shmem * 1024,
            buffer_ram: mem.buffers * 1024,
            total_swap: mem.swap_total * 1024,
            free_swap: mem.swap_free * 1024,
            total_high: mem.high_total * 1024,
            free_high: mem.high_free * 1024,
            memory_unit: 1,
            uptime: uptime.max(0.0) as u64,
            load: LoadAverage {
                one: load.load1,
                five: load.load5,
                fifteen: load.load15,
            },
            threads: load.total,
            running_threads: load.running,
        };
        debug!(
            total_ram = info.total_ram,
            free_ram = info.free_ram,
            "system snapshot refreshed"
        );
        info
    }

    /// Collects memory information from `/proc/meminfo`.
    pub fn collect_meminfo(&self) -> Result<MemInfo, CollectError> {
        let path = format!("{}/meminfo", self.proc_path);
        let content = self.fs.read_to_string(Path::new(&path))?;
        parse_meminfo(&content).map_err(|e| CollectError::Parse(e.message))
    }

    /// Collects load average from `/proc/loadavg`.
    pub fn collect_loadavg(&self) -> Result<LoadAvg, CollectError> {
        let path = format!("{}/loadavg", self.proc_path);
        let content = self.fs.read_to_string(Path::new(&path))?;
        parse_loadavg(&content).map_err(|e| CollectError::Parse(e.message))
    }

    /// Collects seconds since boot from `/proc/uptime`.
    pub fn collect_uptime(&self) -> Result<f64, CollectError> {
        let path = format!("{}/uptime", self.proc_path);
        let content = self.fs.read_to_string(Path::new(&path))?;
        parse_uptime(&content).map_err(|e| CollectError::Parse(e.message))
    }

    pub fn total_ram(&self) -> u64 {
        self.snapshot(false).total_ram
    }

    pub fn free_ram(&self) -> u64 {
        self.snapshot(false).free_ram
    }

    pub fn used_ram(&self) -> u64 {
        let info = self.snapshot(false);
        info.total_ram.saturating_sub(info.free_ram)
    }

    /// Used memory not counting kernel buffers.
    pub fn used_ram_without_buffers(&self) -> u64 {
        let info = self.snapshot(false);
        info.total_ram
            .saturating_sub(info.free_ram)
            .saturating_sub(info.buffer_ram)
    }

    pub fn shared_ram(&self) -> u64 {
        self.snapshot(false).shared_ram
    }

    pub fn buffer_ram(&self) -> u64 {
        self.snapshot(false).buffer_ram
    }

    pub fn total_swap(&self) -> u64 {
        self.snapshot(false).total_swap
    }

    pub fn free_swap(&self) -> u64 {
        self.snapshot(false).free_swap
    }

    pub fn used_swap(&self) -> u64 {
        let info = self.snapshot(false);
        info.total_swap.saturating_sub(info.free_swap)
    }

    pub fn total_high_mem(&self) -> u64 {
        self.snapshot(false).total_high
    }

    pub fn free_high_mem(&self) -> u64 {
        self.snapshot(false).free_high
    }

    pub fn memory_unit_size(&self) -> u32 {
        self.snapshot(false).memory_unit
    }

    pub fn uptime(&self) -> u64 {
        self.snapshot(false).uptime
    }

    pub fn load_average(&self) -> LoadAverage {
        self.snapshot(false).load
    }

    pub fn total_threads(&self) -> u32 {
        self.snapshot(false).threads
    }

    pub fn running_threads(&self) -> u32 {
        self.snapshot(false).running_threads
    }

    /// Returns a mutable reference to the filesystem.
    pub fn fs_mut(&mut self) -> &mut F {
        &mut self.fs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mock::MockFs;

    fn collector(fs: MockFs) -> SystemCollector<MockFs> {
        SystemCollector::new(fs, "/proc", Duration::from_secs(3600))
    }

    #[test]
    fn test_snapshot_from_typical_system() {
        let collector = collector(MockFs::typical_system());
        let info = collector.snapshot(false);

        assert_eq!(info.total_ram, 16384000 * 1024);
        assert_eq!(info.free_ram, 8192000 * 1024);
        assert_eq!(info.shared_ram, 256000 * 1024);
        assert_eq!(info.buffer_ram, 512000 * 1024);
        assert_eq!(info.total_swap, 4096000 * 1024);
        assert_eq!(info.free_swap, 3072000 * 1024);
        assert_eq!(info.total_high, 0);
        assert_eq!(info.memory_unit, 1);
        assert_eq!(info.uptime, 12345);
        assert_eq!(info.threads, 150);
        assert!((info.load.one - 0.15).abs() < 1e-9);
        assert!((info.load.fifteen - 0.05).abs() < 1e-9);
    }

    #[test]
    fn test_derived_accessors() {
        let collector = collector(MockFs::typical_system());

        assert_eq!(collector.used_ram(), 8192000 * 1024);
        assert_eq!(collector.used_ram_without_buffers(), (8192000 - 512000) * 1024);
        assert_eq!(collector.used_swap(), 1024000 * 1024);
        assert_eq!(collector.memory_unit_size(), 1);
        assert_eq!(collector.total_threads(), 150);
        assert_eq!(collector.running_threads(), 1);
    }

    #[test]
    fn test_snapshot_is_cached_within_window() {
        let mut collector = collector(MockFs::typical_system());
        let first = collector.total_ram();

        collector
            .fs_mut()
            .add_file("/proc/meminfo", "MemTotal: 1 kB\nMemFree: 1 kB\n");
        assert_eq!(collector.total_ram(), first);

        assert_eq!(collector.snapshot(true).total_ram, 1024);
    }

    #[test]
    fn test_zero_window_always_refreshes() {
        let mut collector = collector(MockFs::typical_system());
        collector.set_value_duration(Duration::ZERO);
        assert_eq!(collector.value_duration(), Duration::ZERO);
        collector.total_ram();

        collector
            .fs_mut()
            .add_file("/proc/meminfo", "MemTotal: 2 kB\nMemFree: 1 kB\n");
        assert_eq!(collector.total_ram(), 2048);
    }

    #[test]
    fn test_missing_sources_give_zeroes() {
        let collector = collector(MockFs::new());
        let info = collector.snapshot(false);

        assert_eq!(info.total_ram, 0);
        assert_eq!(info.uptime, 0);
        assert_eq!(info.load, LoadAverage::default());
        assert_eq!(info.memory_unit, 1);
    }

    #[test]
    fn test_collect_meminfo_error() {
        let collector = collector(MockFs::new());
        assert!(matches!(
            collector.collect_meminfo(),
            Err(CollectError::Io(_))
        ));
    }
}
