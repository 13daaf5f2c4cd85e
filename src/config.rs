//! Collector configuration.
//!
//! Every `Collector` owns its own copy of this configuration, so several
//! collectors with different freshness windows can live in one process.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default freshness window for memory, load and mount snapshots.
pub const DEFAULT_VALUE_DURATION: Duration = Duration::from_millis(300);
/// Default per-cycle deadline for mount probes.
pub const DEFAULT_MOUNT_WAIT: Duration = Duration::from_millis(1000);
/// Default process summary refresh window.
pub const DEFAULT_REBUILD_WINDOW: Duration = Duration::from_millis(1500);
/// Default number of slices the mount wait window is polled in.
pub const DEFAULT_PROBE_STEPS: u32 = 200;
/// Default number of decimals used by the size humanizer.
pub const DEFAULT_SIZE_PRECISION: usize = 3;

/// Runtime-tunable collector settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Base path to the proc filesystem.
    pub proc_path: String,
    /// Freshness window shared by the memory/load and mount caches.
    pub value_duration: Duration,
    /// Deadline applied to every mount refresh cycle.
    pub mount_wait: Duration,
    /// Freshness window of the process and process-group summaries.
    pub rebuild_window: Duration,
    /// Granularity of the probe wait loop. Never zero.
    pub probe_steps: u32,
    /// Decimals used when humanizing sizes with a negative precision.
    pub size_precision: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            proc_path: "/proc".to_string(),
            value_duration: DEFAULT_VALUE_DURATION,
            mount_wait: DEFAULT_MOUNT_WAIT,
            rebuild_window: DEFAULT_REBUILD_WINDOW,
            probe_steps: DEFAULT_PROBE_STEPS,
            size_precision: DEFAULT_SIZE_PRECISION,
        }
    }
}

impl CollectorConfig {
    /// Creates a configuration rooted at a custom proc path.
    pub fn with_proc_path(proc_path: impl Into<String>) -> Self {
        Self {
            proc_path: proc_path.into(),
            ..Self::default()
        }
    }

    /// Returns a copy with all invalid values replaced by usable ones.
    pub fn normalized(mut self) -> Self {
        self.probe_steps = normalize_probe_steps(self.probe_steps);
        self
    }
}

/// Zero poll steps would make the wait loop degenerate.
pub(crate) fn normalize_probe_steps(steps: u32) -> u32 {
    steps.max(1)
}
