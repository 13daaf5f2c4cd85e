//! Mount table: every mounted filesystem with its usage figures.

use super::probe::{MountProbe, TIMEOUT_ERROR};
use crate::cache::ClockedCache;
use crate::collector::procfs::parser::{MountEntry, parse_mounts};
use crate::collector::traits::{FileSystem, FsStats};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Returned by [`MountTable::fs_type`] when no mount matches.
pub const UNKNOWN_FS_TYPE: &str = "error";

/// One mounted filesystem as seen by the last refresh.
///
/// Geometry fields are zero when `probe_error` is non-zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MountRecord {
    pub source: String,
    pub target: String,
    pub fs_type: String,
    pub options: String,
    pub dump_frequency: i32,
    pub pass_number: i32,
    pub block_size: u64,
    pub total_blocks: u64,
    /// Free blocks including those reserved for the superuser.
    pub free_blocks: u64,
    /// Free blocks available to unprivileged users.
    pub free_blocks_unprivileged: u64,
    pub max_name_length: u64,
    pub total_nodes: u64,
    pub free_nodes: u64,
    /// 0 on success, otherwise an OS error code.
    pub probe_error: i32,
}

impl MountRecord {
    /// Builds a record from a registry entry and its probe outcome.
    pub fn new(entry: MountEntry, result: Result<FsStats, i32>) -> Self {
        let (stats, probe_error) = match result {
            Ok(stats) => (stats, 0),
            Err(code) => (FsStats::default(), code),
        };
        Self {
            source: entry.source,
            target: entry.target,
            fs_type: entry.fs_type,
            options: entry.options,
            dump_frequency: entry.dump_frequency,
            pass_number: entry.pass_number,
            block_size: stats.block_size,
            total_blocks: stats.blocks,
            free_blocks: stats.blocks_free,
            free_blocks_unprivileged: stats.blocks_available,
            max_name_length: stats.name_max,
            total_nodes: stats.files,
            free_nodes: stats.files_free,
            probe_error,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.probe_error == 0
    }

    fn bytes(&self, blocks: u64) -> u64 {
        if self.is_ok() {
            blocks.saturating_mul(self.block_size)
        } else {
            0
        }
    }

    /// Bytes available to unprivileged users.
    pub fn free_space(&self) -> u64 {
        self.bytes(self.free_blocks_unprivileged)
    }

    /// Free bytes including the superuser reserve.
    pub fn free_space_privileged(&self) -> u64 {
        self.bytes(self.free_blocks)
    }

    pub fn total_space(&self) -> u64 {
        self.bytes(self.total_blocks)
    }

    pub fn used_space(&self) -> u64 {
        self.bytes(self.total_blocks.saturating_sub(self.free_blocks))
    }

    /// Share of the filesystem unavailable to unprivileged users, 0..=1.
    pub fn used_ratio(&self) -> f64 {
        let total = self.total_space();
        if total == 0 {
            return 0.0;
        }
        1.0 - self.free_space() as f64 / total as f64
    }

    /// Whether `name` is this mount's source or mount point.
    pub fn matches(&self, name: &str) -> bool {
        self.source == name || self.target == name
    }
}

#[derive(Debug, Clone, Copy)]
struct ProbeSettings {
    mount_wait: Duration,
    probe_steps: u32,
}

/// Probes every entry of the mount registry, cached for `value_duration`.
pub struct MountTable<F: FileSystem + 'static> {
    fs: Arc<F>,
    proc_path: String,
    settings: Mutex<ProbeSettings>,
    cache: Mutex<ClockedCache<Arc<Vec<MountRecord>>>>,
    /// Mount points whose timed-out worker is still blocked, with its
    /// completion flag.
    stalled: Mutex<HashMap<String, Arc<AtomicBool>>>,
}

impl<F: FileSystem + 'static> MountTable<F> {
    /// Creates a mount table reading `{proc_path}/self/mounts`.
    pub fn new(
        fs: Arc<F>,
        proc_path: impl Into<String>,
        value_duration: Duration,
        mount_wait: Duration,
        probe_steps: u32,
    ) -> Self {
        Self {
            fs,
            proc_path: proc_path.into(),
            settings: Mutex::new(ProbeSettings {
                mount_wait,
                probe_steps,
            }),
            cache: Mutex::new(ClockedCache::new(value_duration)),
            stalled: Mutex::new(HashMap::new()),
        }
    }

    fn lock_settings(&self) -> MutexGuard<'_, ProbeSettings> {
        self.settings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_stalled(&self) -> MutexGuard<'_, HashMap<String, Arc<AtomicBool>>> {
        self.stalled.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_cache(&self) -> MutexGuard<'_, ClockedCache<Arc<Vec<MountRecord>>>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_value_duration(&self, window: Duration) {
        self.lock_cache().set_window(window);
    }

    pub fn set_mount_wait(&self, wait: Duration) {
        self.lock_settings().mount_wait = wait;
    }

    pub fn set_probe_steps(&self, steps: u32) {
        self.lock_settings().probe_steps = steps;
    }

    pub fn mount_wait(&self) -> Duration {
        self.lock_settings().mount_wait
    }

    fn read_registry(&self) -> Vec<MountEntry> {
        let path = format!("{}/self/mounts", self.proc_path);
        match self.fs.read_to_string(Path::new(&path)) {
            Ok(content) => parse_mounts(&content),
            Err(e) => {
                warn!(path = %path, error = %e, "mount registry unavailable");
                Vec::new()
            }
        }
    }

    /// Reads the registry and probes all entries concurrently.
    ///
    /// Returns within the mount wait window (plus registry read time), in
    /// registry order. A mount point whose previous worker is still blocked
    /// is not queried again and reports a timeout straight away.
    pub fn refresh(&self) -> Vec<MountRecord> {
        let entries = self.read_registry();
        let settings = *self.lock_settings();
        let started = Instant::now();
        let deadline = started + settings.mount_wait;

        let mut stalled = self.lock_stalled();
        stalled.retain(|_, finished| !finished.load(Ordering::Acquire));

        let probes: Vec<Option<MountProbe>> = entries
            .iter()
            .map(|entry| {
                if stalled.contains_key(&entry.target) {
                    debug!(path = %entry.target, "mount still stalled, skipped");
                    None
                } else {
                    Some(MountProbe::start(Arc::clone(&self.fs), &entry.target))
                }
            })
            .collect();

        let mut timed_out = 0usize;
        let records: Vec<MountRecord> = entries
            .into_iter()
            .zip(probes)
            .map(|(entry, probe)| {
                let result = match probe {
                    Some(probe) => {
                        let finished = probe.finished_flag();
                        let result = probe.wait(deadline, settings.probe_steps);
                        if result == Err(TIMEOUT_ERROR) && !finished.load(Ordering::Acquire) {
                            stalled.insert(entry.target.clone(), finished);
                        }
                        result
                    }
                    None => Err(TIMEOUT_ERROR),
                };
                if result == Err(TIMEOUT_ERROR) {
                    timed_out += 1;
                }
                MountRecord::new(entry, result)
            })
            .collect();

        debug!(
            mounts = records.len(),
            timed_out,
            stalled = stalled.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "mount table refreshed"
        );
        records
    }

    /// Current snapshot, refreshed when stale or when `force` is set.
    pub fn mounts(&self, force: bool) -> Arc<Vec<MountRecord>> {
        let mut cache = self.lock_cache();
        Arc::clone(cache.get_or_refresh(force, || Arc::new(self.refresh())))
    }

    /// First mount whose source or mount point is `name`.
    pub fn find(&self, name: &str) -> Option<MountRecord> {
        self.mounts(false)
            .iter()
            .find(|record| record.matches(name))
            .cloned()
    }

    fn query(&self, name: &str, value: impl Fn(&MountRecord) -> u64) -> u64 {
        self.mounts(false)
            .iter()
            .find(|record| record.matches(name))
            .map_or(0, value)
    }

    pub fn free_space(&self, name: &str) -> u64 {
        self.query(name, MountRecord::free_space)
    }

    pub fn free_space_privileged(&self, name: &str) -> u64 {
        self.query(name, MountRecord::free_space_privileged)
    }

    pub fn used_space(&self, name: &str) -> u64 {
        self.query(name, MountRecord::used_space)
    }

    pub fn total_space(&self, name: &str) -> u64 {
        self.query(name, MountRecord::total_space)
    }

    pub fn used_ratio(&self, name: &str) -> f64 {
        self.find(name).map_or(0.0, |record| record.used_ratio())
    }

    /// Filesystem type of `name`, or [`UNKNOWN_FS_TYPE`].
    pub fn fs_type(&self, name: &str) -> String {
        self.find(name)
            .map_or_else(|| UNKNOWN_FS_TYPE.to_string(), |record| record.fs_type)
    }
}
