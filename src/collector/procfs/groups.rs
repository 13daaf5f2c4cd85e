//! Name-grouped rollups over the process store.

use crate::cache::ClockedCache;
use crate::collector::procfs::process::{ProcessRecord, ProcessScanner};
use crate::collector::traits::FileSystem;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

/// Sum of all processes sharing one name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcessGroupRecord {
    pub name: String,
    pub instant_cpu_percent: f64,
    pub cumulative_cpu_percent: f64,
    pub total_virtual_size: u64,
    pub total_resident_size: u64,
    pub count: usize,
    pub members: BTreeMap<u32, ProcessRecord>,
}

impl ProcessGroupRecord {
    fn empty(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    fn add(&mut self, record: &ProcessRecord) {
        self.instant_cpu_percent += record.instant_cpu_percent;
        self.cumulative_cpu_percent += record.cumulative_cpu_percent;
        self.total_virtual_size += record.virtual_size;
        self.total_resident_size += record.resident_size;
        self.count += 1;
        self.members.insert(record.pid, record.clone());
    }

    /// Returns the selected CPU percentage sum.
    pub fn cpu_percent(&self, cumulative: bool) -> f64 {
        if cumulative {
            self.cumulative_cpu_percent
        } else {
            self.instant_cpu_percent
        }
    }
}

type GroupMap = BTreeMap<String, ProcessGroupRecord>;

/// Builds and queries process rollups keyed by process name.
///
/// The group map is rebuilt from scratch on every refresh.
pub struct ProcessAggregator<F: FileSystem> {
    scanner: ProcessScanner<F>,
    groups: Mutex<ClockedCache<GroupMap>>,
}

impl<F: FileSystem> ProcessAggregator<F> {
    /// Creates an aggregator over `scanner`, sharing its rebuild window.
    pub fn new(scanner: ProcessScanner<F>) -> Self {
        let window = scanner.rebuild_window();
        Self {
            scanner,
            groups: Mutex::new(ClockedCache::new(window)),
        }
    }

    pub fn scanner(&self) -> &ProcessScanner<F> {
        &self.scanner
    }

    pub fn scanner_mut(&mut self) -> &mut ProcessScanner<F> {
        &mut self.scanner
    }

    fn lock_groups(&self) -> MutexGuard<'_, ClockedCache<GroupMap>> {
        self.groups.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Changes the rebuild window of both the scanner and the group map.
    pub fn set_rebuild_window(&self, window: Duration) {
        self.scanner.set_rebuild_window(window);
        self.lock_groups().set_window(window);
    }

    /// Refreshes the process store, then rebuilds the group map if stale.
    pub fn build_group_summary(&self, force: bool) {
        self.scanner.build_summary(force);
        self.lock_groups().get_or_refresh(force, || self.rebuild());
    }

    fn rebuild(&self) -> GroupMap {
        self.scanner.with_records(|records| {
            let mut groups = GroupMap::new();
            for record in records.values() {
                groups
                    .entry(record.name.clone())
                    .or_insert_with(|| ProcessGroupRecord::empty(&record.name))
                    .add(record);
            }
            debug!(
                groups = groups.len(),
                processes = records.len(),
                "process groups rebuilt"
            );
            groups
        })
    }

    fn with_groups<R>(&self, f: impl FnOnce(&GroupMap) -> R) -> R {
        let mut cache = self.lock_groups();
        f(cache.get_or_refresh(false, || self.rebuild()))
    }

    /// Rollup for `name`; a zeroed record carrying `name` when absent.
    pub fn get_by_name(&self, name: &str) -> ProcessGroupRecord {
        self.build_group_summary(false);
        self.with_groups(|groups| {
            groups
                .get(name)
                .cloned()
                .unwrap_or_else(|| ProcessGroupRecord::empty(name))
        })
    }

    /// Number of processes named `name`.
    pub fn count_by_name(&self, name: &str) -> usize {
        self.build_group_summary(false);
        self.with_groups(|groups| groups.get(name).map_or(0, |group| group.count))
    }

    /// Summed CPU percentage of processes named `name`.
    pub fn total_cpu_by_name(&self, name: &str, cumulative: bool) -> f64 {
        self.build_group_summary(false);
        self.with_groups(|groups| {
            groups
                .get(name)
                .map_or(0.0, |group| group.cpu_percent(cumulative))
        })
    }

    /// Groups whose summed CPU percentage is at least `threshold`.
    pub fn by_cpu_threshold_grouped(&self, threshold: f64, cumulative: bool) -> GroupMap {
        self.filtered(|group| group.cpu_percent(cumulative) >= threshold)
    }

    /// Groups whose summed virtual size is at least `threshold` bytes.
    pub fn by_virtual_size_threshold_grouped(&self, threshold: u64) -> GroupMap {
        self.filtered(|group| group.total_virtual_size >= threshold)
    }

    /// Snapshot of every group.
    pub fn all_groups(&self) -> GroupMap {
        self.filtered(|_| true)
    }

    fn filtered(&self, keep: impl Fn(&ProcessGroupRecord) -> bool) -> GroupMap {
        self.build_group_summary(false);
        self.with_groups(|groups| {
            groups
                .iter()
                .filter(|(_, group)| keep(group))
                .map(|(name, group)| (name.clone(), group.clone()))
                .collect()
        })
    }
}
