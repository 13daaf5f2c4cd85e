//! Process scanner keeping a persistent per-PID record store built from
//! `/proc/[pid]/stat`.
//!
//! Every scan cycle has a generation number. Records are updated in place,
//! CPU percentages are computed against the previous sample of the same PID,
//! and records not seen for more than one full cycle are evicted.

use crate::cache::ClockedCache;
use crate::collector::procfs::parser::{ProcStat, parse_proc_stat, parse_uptime};
use crate::collector::traits::FileSystem;
use crate::sysconf;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Clock ticks per second (USER_HZ) used when sysconf cannot tell.
const DEFAULT_CLOCK_TICKS: u64 = 100;
/// Page size used when sysconf cannot tell.
const DEFAULT_PAGE_SIZE: u64 = 4096;

/// Error type for collection failures.
#[derive(Debug)]
pub enum CollectError {
    /// Process disappeared during collection.
    ProcessGone(u32),
    /// I/O error reading process files.
    Io(std::io::Error),
    /// Parse error in process files.
    Parse(String),
}

impl std::fmt::Display for CollectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollectError::ProcessGone(pid) => write!(f, "process {} disappeared", pid),
            CollectError::Io(e) => write!(f, "I/O error: {}", e),
            CollectError::Parse(msg) => write!(f, "parse error: {}", msg),
        }
    }
}

impl std::error::Error for CollectError {}

impl From<std::io::Error> for CollectError {
    fn from(e: std::io::Error) -> Self {
        CollectError::Io(e)
    }
}

/// Persistent information about one process, keyed by PID.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcessRecord {
    pub pid: u32,
    pub ppid: i32,
    pub pgrp: i32,
    pub session: i32,
    /// Controlling terminal (`tty_nr`).
    pub tty: i32,
    /// Foreground process group of the controlling terminal.
    pub tpgid: i32,
    pub name: String,
    pub state: char,
    pub flags: u64,
    pub minor_faults: u64,
    pub child_minor_faults: u64,
    pub major_faults: u64,
    pub child_major_faults: u64,
    /// Virtual memory size in bytes.
    pub virtual_size: u64,
    /// Resident set size in bytes.
    pub resident_size: u64,
    pub priority: i64,
    pub nice: i64,
    pub thread_count: i64,
    /// Start time in clock ticks after boot.
    pub start_time: u64,
    /// User mode time in clock ticks.
    pub user_time: u64,
    /// Kernel mode time in clock ticks.
    pub system_time: u64,
    pub child_user_time: i64,
    pub child_system_time: i64,
    /// `user_time + system_time` of the previous sample, in clock ticks.
    pub previous_total_time: u64,
    /// CPU usage since the previous sample, in percent of one CPU.
    pub instant_cpu_percent: f64,
    /// CPU usage over the whole process lifetime, in percent of one CPU.
    pub cumulative_cpu_percent: f64,
    /// Scan generation in which the process was last parsed successfully.
    pub last_seen_generation: u64,
    /// Set during the first cycle the PID was observed.
    pub is_new: bool,
    /// Set when the latest read of the record failed; other fields keep
    /// their previous values.
    pub error: bool,
    #[serde(skip)]
    sampled_at: Option<Instant>,
}

impl ProcessRecord {
    fn new(pid: u32) -> Self {
        Self {
            pid,
            ..Self::default()
        }
    }

    /// Total CPU time (user + system) in clock ticks.
    pub fn total_time(&self) -> u64 {
        self.user_time + self.system_time
    }

    /// Returns the selected CPU percentage.
    pub fn cpu_percent(&self, cumulative: bool) -> f64 {
        if cumulative {
            self.cumulative_cpu_percent
        } else {
            self.instant_cpu_percent
        }
    }

    fn apply_sample(&mut self, stat: ProcStat, sample: &Sample) {
        // A different start time means the PID was reused by a new process.
        if self.sampled_at.is_some() && stat.starttime != self.start_time {
            self.sampled_at = None;
            self.user_time = 0;
            self.system_time = 0;
        }

        let hz = sample.clock_ticks as f64;
        let previous_total = self.total_time();
        let total = stat.utime + stat.stime;

        self.instant_cpu_percent = match self.sampled_at {
            Some(prev_at) => {
                let elapsed = sample.now.saturating_duration_since(prev_at).as_secs_f64();
                if elapsed > 0.0 {
                    100.0 * total.saturating_sub(previous_total) as f64 / hz / elapsed
                } else {
                    0.0
                }
            }
            None => 0.0,
        };

        let process_uptime = sample.uptime_secs - stat.starttime as f64 / hz;
        self.cumulative_cpu_percent = if process_uptime > 0.0 {
            100.0 * total as f64 / hz / process_uptime
        } else {
            0.0
        };

        self.is_new = self.sampled_at.is_none();
        self.previous_total_time = previous_total;
        self.ppid = stat.ppid;
        self.pgrp = stat.pgrp;
        self.session = stat.session;
        self.tty = stat.tty_nr;
        self.tpgid = stat.tpgid;
        self.name = stat.comm;
        self.state = stat.state;
        self.flags = stat.flags;
        self.minor_faults = stat.minflt;
        self.child_minor_faults = stat.cminflt;
        self.major_faults = stat.majflt;
        self.child_major_faults = stat.cmajflt;
        self.virtual_size = stat.vsize;
        self.resident_size = stat.rss.max(0) as u64 * sample.page_size;
        self.priority = stat.priority;
        self.nice = stat.nice;
        self.thread_count = stat.num_threads;
        self.start_time = stat.starttime;
        self.user_time = stat.utime;
        self.system_time = stat.stime;
        self.child_user_time = stat.cutime;
        self.child_system_time = stat.cstime;
        self.last_seen_generation = sample.generation;
        self.error = false;
        self.sampled_at = Some(sample.now);
    }
}

/// Per-cycle inputs shared by all processes of one scan.
struct Sample {
    generation: u64,
    now: Instant,
    uptime_secs: f64,
    clock_ticks: u64,
    page_size: u64,
}

struct ScanState {
    records: BTreeMap<u32, ProcessRecord>,
    generation: u64,
    /// Generation produced by the last gated refresh.
    cache: ClockedCache<u64>,
    last_build_duration: Duration,
}

/// Scans `/proc/[pid]/stat` records into a persistent store.
pub struct ProcessScanner<F: FileSystem> {
    fs: F,
    proc_path: String,
    clock_ticks: u64,
    page_size: u64,
    state: Mutex<ScanState>,
}

impl<F: FileSystem> ProcessScanner<F> {
    /// Creates a new process scanner.
    ///
    /// # Arguments
    /// * `fs` - Filesystem implementation (real or mock)
    /// * `proc_path` - Base path to proc filesystem (usually "/proc")
    /// * `rebuild_window` - Minimum age of the store before a scan is repeated
    pub fn new(fs: F, proc_path: impl Into<String>, rebuild_window: Duration) -> Self {
        Self {
            fs,
            proc_path: proc_path.into(),
            clock_ticks: sysconf::ticks_per_second()
                .filter(|&hz| hz > 0)
                .unwrap_or(DEFAULT_CLOCK_TICKS),
            page_size: sysconf::page_size()
                .filter(|&size| size > 0)
                .unwrap_or(DEFAULT_PAGE_SIZE),
            state: Mutex::new(ScanState {
                records: BTreeMap::new(),
                generation: 0,
                cache: ClockedCache::new(rebuild_window),
                last_build_duration: Duration::ZERO,
            }),
        }
    }

    /// Overrides the clock tick rate used to convert CPU times.
    pub fn set_clock_ticks(&mut self, clock_ticks: u64) {
        self.clock_ticks = clock_ticks.max(1);
    }

    /// Overrides the page size used to convert resident sizes.
    pub fn set_page_size(&mut self, page_size: u64) {
        self.page_size = page_size;
    }

    /// Returns a mutable reference to the filesystem.
    pub fn fs_mut(&mut self) -> &mut F {
        &mut self.fs
    }

    pub fn rebuild_window(&self) -> Duration {
        self.lock_state().cache.window()
    }

    /// Changes the rebuild window. Takes effect on the next build.
    pub fn set_rebuild_window(&self, window: Duration) {
        self.lock_state().cache.set_window(window);
    }

    fn lock_state(&self) -> MutexGuard<'_, ScanState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Rescans the process table if the store is older than the rebuild
    /// window or `force` is set.
    pub fn build_summary(&self, force: bool) {
        let now = Instant::now();
        let mut state = self.lock_state();
        if state.cache.needs_refresh(force, now) {
            self.scan_locked(&mut state, now);
            let generation = state.generation;
            state.cache.store(generation);
        }
    }

    /// Runs one scan cycle unconditionally, treating `now` as the sample time.
    #[cfg(test)]
    pub(crate) fn scan_at(&self, now: Instant) {
        let mut state = self.lock_state();
        self.scan_locked(&mut state, now);
        let generation = state.generation;
        state.cache.store_at(generation, now);
    }

    fn scan_locked(&self, state: &mut ScanState, now: Instant) {
        let started = Instant::now();
        state.generation += 1;

        let sample = Sample {
            generation: state.generation,
            now,
            uptime_secs: self.read_uptime(),
            clock_ticks: self.clock_ticks,
            page_size: self.page_size,
        };

        let pids = self.list_pids().unwrap_or_else(|e| {
            warn!(proc_path = %self.proc_path, error = %e, "cannot enumerate processes");
            Vec::new()
        });

        let mut failed = 0usize;
        for pid in pids {
            match self.read_stat(pid) {
                Ok(stat) => {
                    state
                        .records
                        .entry(pid)
                        .or_insert_with(|| ProcessRecord::new(pid))
                        .apply_sample(stat, &sample);
                }
                Err(e) => {
                    failed += 1;
                    debug!(pid, error = %e, "unreadable process record");
                    if let Some(record) = state.records.get_mut(&pid) {
                        record.error = true;
                    }
                }
            }
        }

        // One missed cycle is tolerated before a record is dropped.
        let before = state.records.len();
        let generation = state.generation;
        state
            .records
            .retain(|_, record| record.last_seen_generation + 1 >= generation);
        let evicted = before - state.records.len();

        state.last_build_duration = started.elapsed();
        debug!(
            generation,
            processes = state.records.len(),
            failed,
            evicted,
            elapsed_us = state.last_build_duration.as_micros() as u64,
            "process scan complete"
        );
    }

    fn list_pids(&self) -> Result<Vec<u32>, CollectError> {
        let root = Path::new(&self.proc_path);
        if !self.fs.exists(root) {
            return Err(CollectError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("proc root {} not mounted", self.proc_path),
            )));
        }
        let entries = self.fs.read_dir(root)?;
        let mut pids: Vec<u32> = entries
            .iter()
            .filter_map(|entry| entry.file_name()?.to_str()?.parse().ok())
            .collect();
        pids.sort_unstable();
        Ok(pids)
    }

    fn read_stat(&self, pid: u32) -> Result<ProcStat, CollectError> {
        let stat_path = format!("{}/{}/stat", self.proc_path, pid);
        let content = self
            .fs
            .read_to_string(Path::new(&stat_path))
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => CollectError::ProcessGone(pid),
                _ => CollectError::Io(e),
            })?;
        parse_proc_stat(&content).map_err(|e| CollectError::Parse(e.message))
    }

    /// System uptime in seconds, zero when unavailable.
    fn read_uptime(&self) -> f64 {
        let path = format!("{}/uptime", self.proc_path);
        match self.fs.read_to_string(Path::new(&path)) {
            Ok(content) => parse_uptime(&content).unwrap_or_else(|e| {
                warn!(error = %e, "cannot parse uptime");
                0.0
            }),
            Err(e) => {
                warn!(error = %e, "cannot read uptime");
                0.0
            }
        }
    }

    /// Current scan generation (0 before the first scan).
    pub fn generation(&self) -> u64 {
        self.lock_state().generation
    }

    /// Time taken by the last scan cycle.
    pub fn last_build_duration(&self) -> Duration {
        self.lock_state().last_build_duration
    }

    /// Runs `f` over the record store after refreshing it if stale.
    pub(crate) fn with_records<R>(&self, f: impl FnOnce(&BTreeMap<u32, ProcessRecord>) -> R) -> R {
        self.build_summary(false);
        f(&self.lock_state().records)
    }

    /// Number of processes in the store.
    pub fn process_count(&self) -> usize {
        self.with_records(|records| records.len())
    }

    /// Snapshot of all process records keyed by PID.
    pub fn all_processes(&self) -> BTreeMap<u32, ProcessRecord> {
        self.with_records(|records| records.clone())
    }

    /// Snapshot of one process record.
    pub fn get(&self, pid: u32) -> Option<ProcessRecord> {
        self.with_records(|records| records.get(&pid).cloned())
    }

    /// Processes whose CPU percentage is at least `threshold`.
    pub fn by_cpu_threshold(&self, threshold: f64, cumulative: bool) -> Vec<ProcessRecord> {
        self.with_records(|records| {
            records
                .values()
                .filter(|record| record.cpu_percent(cumulative) >= threshold)
                .cloned()
                .collect()
        })
    }

    /// Processes whose virtual size is at least `threshold` bytes.
    pub fn by_virtual_size_threshold(&self, threshold: u64) -> Vec<ProcessRecord> {
        self.with_records(|records| {
            records
                .values()
                .filter(|record| record.virtual_size >= threshold)
                .cloned()
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mock::MockFs;

    fn scanner(fs: MockFs) -> ProcessScanner<MockFs> {
        let mut scanner = ProcessScanner::new(fs, "/proc", Duration::from_millis(1500));
        scanner.set_clock_ticks(100);
        scanner.set_page_size(4096);
        scanner
    }

    fn bash_stat(pid: u32, utime: u64, stime: u64) -> String {
        format!(
            "{} (bash) S 999 {} {} 34816 -1 4194304 5000 50000 0 0 {} {} 0 0 20 0 1 0 100000 25000000 2000",
            pid, pid, pid, utime, stime
        )
    }

    #[test]
    fn test_first_scan_populates_store() {
        let scanner = scanner(MockFs::typical_system());
        scanner.build_summary(false);

        assert_eq!(scanner.generation(), 1);
        assert_eq!(scanner.process_count(), 4);

        let bash = scanner.get(1000).unwrap();
        assert_eq!(bash.name, "bash");
        assert_eq!(bash.ppid, 999);
        assert_eq!(bash.tty, 34816);
        assert_eq!(bash.user_time, 100);
        assert_eq!(bash.system_time, 50);
        assert_eq!(bash.child_user_time, 200);
        assert_eq!(bash.virtual_size, 25000000);
        assert_eq!(bash.resident_size, 2000 * 4096);
        assert_eq!(bash.last_seen_generation, 1);
        assert!(bash.is_new);
        assert!(!bash.error);
        assert_eq!(bash.instant_cpu_percent, 0.0);
    }

    #[test]
    fn test_cumulative_cpu_percent() {
        let scanner = scanner(MockFs::typical_system());
        scanner.build_summary(false);

        // 150 ticks over (12345.67 - 1000) seconds of lifetime
        let bash = scanner.get(1000).unwrap();
        let expected = 100.0 * 1.5 / (12345.67 - 1000.0);
        assert!((bash.cumulative_cpu_percent - expected).abs() < 1e-9);
    }

    #[test]
    fn test_cumulative_cpu_zero_without_uptime() {
        let mut fs = MockFs::typical_system();
        fs.remove_file("/proc/uptime");
        let scanner = scanner(fs);
        scanner.build_summary(false);

        assert_eq!(scanner.get(1000).unwrap().cumulative_cpu_percent, 0.0);
    }

    #[test]
    fn test_instant_cpu_delta() {
        let mut scanner = scanner(MockFs::typical_system());
        let t0 = Instant::now();
        scanner.scan_at(t0);

        // +150 ticks (1.5 s of CPU) over 2 s of wall clock
        scanner.fs_mut().add_process(1000, &bash_stat(1000, 200, 100));
        scanner.scan_at(t0 + Duration::from_secs(2));

        let bash = scanner.get(1000).unwrap();
        assert!(!bash.is_new);
        assert_eq!(bash.previous_total_time, 150);
        assert!((bash.instant_cpu_percent - 75.0).abs() < 1e-9);
    }

    #[test]
    fn test_new_pid_has_zero_instant_cpu() {
        let mut scanner = scanner(MockFs::typical_system());
        let t0 = Instant::now();
        scanner.scan_at(t0);

        scanner.fs_mut().add_process(4242, &bash_stat(4242, 500, 500));
        scanner.scan_at(t0 + Duration::from_secs(1));

        let record = scanner.get(4242).unwrap();
        assert!(record.is_new);
        assert_eq!(record.instant_cpu_percent, 0.0);
    }

    #[test]
    fn test_eviction_grace_period() {
        let mut scanner = scanner(MockFs::typical_system());
        let t0 = Instant::now();
        scanner.scan_at(t0);
        assert!(scanner.all_processes().contains_key(&1001));

        scanner.fs_mut().remove_process(1001);
        scanner.scan_at(t0 + Duration::from_secs(2));
        assert!(scanner.all_processes().contains_key(&1001));

        scanner.scan_at(t0 + Duration::from_secs(4));
        assert!(!scanner.all_processes().contains_key(&1001));
        assert_eq!(scanner.process_count(), 3);
    }

    #[test]
    fn test_malformed_record_keeps_previous_values() {
        let mut scanner = scanner(MockFs::typical_system());
        let t0 = Instant::now();
        scanner.scan_at(t0);

        scanner.fs_mut().add_process(1000, "1000 (bash S garbage");
        scanner.scan_at(t0 + Duration::from_secs(2));

        let bash = scanner.get(1000).unwrap();
        assert!(bash.error);
        assert_eq!(bash.name, "bash");
        assert_eq!(bash.user_time, 100);
        assert_eq!(bash.last_seen_generation, 1);

        // Recovers once the record parses again
        scanner.fs_mut().add_process(1000, &bash_stat(1000, 100, 50));
        scanner.scan_at(t0 + Duration::from_secs(4));
        let bash = scanner.get(1000).unwrap();
        assert!(!bash.error);
        assert_eq!(bash.last_seen_generation, 3);
    }

    #[test]
    fn test_malformed_new_pid_is_skipped() {
        let scanner = scanner(MockFs::with_malformed_process());
        scanner.build_summary(false);

        assert!(scanner.get(3000).is_none());
        assert_eq!(scanner.process_count(), 4);
    }

    #[test]
    fn test_special_names() {
        let scanner = scanner(MockFs::with_special_names());
        scanner.build_summary(false);

        assert_eq!(scanner.get(5000).unwrap().name, "Web Content");
        assert_eq!(scanner.get(5001).unwrap().name, "(sd-pam)");
    }

    #[test]
    fn test_reused_pid_starts_fresh_baseline() {
        let mut scanner = scanner(MockFs::typical_system());
        let t0 = Instant::now();
        scanner.scan_at(t0);

        // bash (150 ticks) exits, python takes over PID 1000 with a later start
        scanner.fs_mut().add_process(
            1000,
            "1000 (python) R 999 1000 1000 34816 -1 4194304 100 0 0 0 300 100 0 0 20 0 1 0 900000 50000000 4000",
        );
        scanner.scan_at(t0 + Duration::from_secs(2));

        let python = scanner.get(1000).unwrap();
        assert_eq!(python.name, "python");
        assert!(python.is_new);
        assert_eq!(python.instant_cpu_percent, 0.0);
        assert_eq!(python.previous_total_time, 0);
        assert_eq!(python.start_time, 900000);

        // Next sample of the same process measures against its own baseline
        scanner.fs_mut().add_process(
            1000,
            "1000 (python) R 999 1000 1000 34816 -1 4194304 100 0 0 0 400 100 0 0 20 0 1 0 900000 50000000 4000",
        );
        scanner.scan_at(t0 + Duration::from_secs(3));
        let python = scanner.get(1000).unwrap();
        assert!(!python.is_new);
        assert!((python.instant_cpu_percent - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_terminal_fields() {
        let scanner = scanner(MockFs::typical_system());
        let bash = scanner.get(1000).unwrap();
        assert_eq!(bash.tty, 34816);
        assert_eq!(bash.tpgid, 1001);
        assert_eq!(scanner.get(1).unwrap().tpgid, -1);
    }

    #[test]
    fn test_list_pids_without_proc_root() {
        let scanner = scanner(MockFs::new());
        let err = scanner.list_pids().unwrap_err();
        assert!(matches!(err, CollectError::Io(ref e) if e.kind() == std::io::ErrorKind::NotFound));

        let mut fs = MockFs::new();
        fs.add_dir("/proc");
        let scanner = self::scanner(fs);
        assert!(scanner.list_pids().unwrap().is_empty());
    }

    #[test]
    fn test_missing_proc_dir_yields_empty_store() {
        let scanner = scanner(MockFs::new());
        scanner.build_summary(false);
        assert_eq!(scanner.process_count(), 0);
        assert!(scanner.all_processes().is_empty());
    }

    #[test]
    fn test_build_summary_respects_window() {
        let scanner = scanner(MockFs::typical_system());
        scanner.set_rebuild_window(Duration::from_secs(3600));

        scanner.build_summary(false);
        scanner.build_summary(false);
        assert_eq!(scanner.generation(), 1);

        scanner.build_summary(true);
        assert_eq!(scanner.generation(), 2);
    }

    #[test]
    fn test_thresholds() {
        let scanner = scanner(MockFs::typical_system());

        let big = scanner.by_virtual_size_threshold(1_000_000_000);
        assert_eq!(big.len(), 1);
        assert_eq!(big[0].name, "nginx");

        // nginx: 4000 ticks over (12345.67 - 500) s, about 0.34%; systemd about 0.12%
        let busy = scanner.by_cpu_threshold(0.2, true);
        let names: Vec<&str> = busy.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["nginx"]);

        assert!(scanner.by_cpu_threshold(1.0, false).is_empty());
        assert_eq!(scanner.by_cpu_threshold(0.0, false).len(), 4);
    }
}
