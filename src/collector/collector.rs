//! Main collector that owns every component and their configuration.
//!
//! Each `Collector` has its own caches and process store, so several can
//! coexist (for example one per proc root in tests).

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::collector::mounts::MountTable;
use crate::collector::procfs::{ProcessAggregator, ProcessScanner, SystemCollector};
use crate::collector::traits::FileSystem;
use crate::config::{CollectorConfig, normalize_probe_steps};
use crate::fmt::SizeFormatter;
use tracing::debug;

/// Host metrics collector.
///
/// Accessors on the components are synchronous and serve cached values
/// while they are fresh; a stale read refreshes on the caller's thread.
pub struct Collector<F: FileSystem + Clone + 'static> {
    config: Mutex<CollectorConfig>,
    system: SystemCollector<F>,
    mounts: MountTable<F>,
    processes: ProcessAggregator<F>,
}

impl<F: FileSystem + Clone + 'static> Collector<F> {
    /// Creates a new collector.
    ///
    /// # Arguments
    /// * `fs` - Filesystem implementation (real or mock)
    /// * `config` - Windows and limits; `probe_steps` of zero is raised to one
    pub fn new(fs: F, config: CollectorConfig) -> Self {
        let config = config.normalized();
        let proc_path = config.proc_path.clone();

        let system = SystemCollector::new(fs.clone(), &proc_path, config.value_duration);
        let mounts = MountTable::new(
            Arc::new(fs.clone()),
            &proc_path,
            config.value_duration,
            config.mount_wait,
            config.probe_steps,
        );
        let scanner = ProcessScanner::new(fs, &proc_path, config.rebuild_window);

        debug!(?config, "collector created");
        Self {
            config: Mutex::new(config),
            system,
            mounts,
            processes: ProcessAggregator::new(scanner),
        }
    }

    fn lock_config(&self) -> MutexGuard<'_, CollectorConfig> {
        self.config.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of the current configuration.
    pub fn config(&self) -> CollectorConfig {
        self.lock_config().clone()
    }

    /// Memory, swap and load snapshot.
    pub fn system(&self) -> &SystemCollector<F> {
        &self.system
    }

    /// Mounted filesystems.
    pub fn mounts(&self) -> &MountTable<F> {
        &self.mounts
    }

    /// Name-grouped process rollups.
    pub fn processes(&self) -> &ProcessAggregator<F> {
        &self.processes
    }

    /// Per-PID process store.
    pub fn scanner(&self) -> &ProcessScanner<F> {
        self.processes.scanner()
    }

    /// Mutable access to the process store, e.g. to override clock ticks.
    pub fn scanner_mut(&mut self) -> &mut ProcessScanner<F> {
        self.processes.scanner_mut()
    }

    /// Freshness window of the memory, load and mount caches.
    pub fn set_value_duration(&self, window: Duration) {
        self.lock_config().value_duration = window;
        self.system.set_value_duration(window);
        self.mounts.set_value_duration(window);
    }

    /// Deadline of one mount table refresh.
    pub fn set_mount_wait(&self, wait: Duration) {
        self.lock_config().mount_wait = wait;
        self.mounts.set_mount_wait(wait);
    }

    /// Refresh window of the process store and its rollups.
    pub fn set_rebuild_window(&self, window: Duration) {
        self.lock_config().rebuild_window = window;
        self.processes.set_rebuild_window(window);
    }

    /// Poll granularity of mount probes.
    pub fn set_probe_steps(&self, steps: u32) {
        let steps = normalize_probe_steps(steps);
        self.lock_config().probe_steps = steps;
        self.mounts.set_probe_steps(steps);
    }

    /// Default precision of [`format_size`](Self::format_size).
    pub fn set_size_precision(&self, precision: usize) {
        self.lock_config().size_precision = precision;
    }

    /// Refreshes the process store and rollups if stale or forced.
    pub fn build_summary(&self, force: bool) {
        self.processes.build_group_summary(force);
    }

    /// Humanizes a byte count; negative `precision` uses the configured default.
    pub fn format_size(&self, size: f64, precision: i32) -> String {
        SizeFormatter::new(self.lock_config().size_precision).format(size, precision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mock::MockFs;

    fn collector(fs: MockFs) -> Collector<MockFs> {
        let config = CollectorConfig {
            value_duration: Duration::from_secs(3600),
            rebuild_window: Duration::from_secs(3600),
            ..CollectorConfig::default()
        };
        let mut collector = Collector::new(fs, config);
        collector.scanner_mut().set_clock_ticks(100);
        collector
    }

    #[test]
    fn test_end_to_end_root_filesystem() {
        let collector = collector(MockFs::typical_system());
        let mounts = collector.mounts();

        assert_eq!(mounts.total_space("/"), 1024000);
        assert_eq!(mounts.free_space("/"), 409600);
        assert!((mounts.used_ratio("/") - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_components_share_proc_root() {
        let collector = collector(MockFs::typical_system());

        assert_eq!(collector.system().total_ram(), 16384000 * 1024);
        assert_eq!(collector.scanner().process_count(), 4);
        assert_eq!(collector.processes().count_by_name("bash"), 2);
    }

    #[test]
    fn test_setters_update_config() {
        let collector = collector(MockFs::typical_system());

        collector.set_value_duration(Duration::from_millis(10));
        collector.set_mount_wait(Duration::from_millis(20));
        collector.set_rebuild_window(Duration::from_millis(30));
        collector.set_probe_steps(0);
        collector.set_size_precision(1);

        let config = collector.config();
        assert_eq!(config.value_duration, Duration::from_millis(10));
        assert_eq!(config.mount_wait, Duration::from_millis(20));
        assert_eq!(config.rebuild_window, Duration::from_millis(30));
        assert_eq!(config.probe_steps, 1);
        assert_eq!(config.size_precision, 1);

        assert_eq!(collector.system().value_duration(), Duration::from_millis(10));
        assert_eq!(collector.mounts().mount_wait(), Duration::from_millis(20));
        assert_eq!(
            collector.scanner().rebuild_window(),
            Duration::from_millis(30)
        );
    }

    #[test]
    fn test_format_size_uses_default_precision() {
        let collector = collector(MockFs::new());

        assert_eq!(collector.format_size(12345678.0, -1), "11.774Mb");
        assert_eq!(collector.format_size(12345678.0, 1), "11.8Mb");

        collector.set_size_precision(0);
        assert_eq!(collector.format_size(12345678.0, -1), "12Mb");
    }

    #[test]
    fn test_collectors_are_independent() {
        let busy = collector(MockFs::typical_system());
        let empty = collector(MockFs::new());

        assert_eq!(busy.scanner().process_count(), 4);
        assert_eq!(empty.scanner().process_count(), 0);
        assert!(empty.mounts().mounts(false).is_empty());
        assert_eq!(busy.mounts().mounts(false).len(), 4);
    }
}
