//! Bounded-time filesystem statistics query for a single mount.
//!
//! The query runs on its own detached thread and publishes its result
//! through a one-shot channel. The caller polls that channel until a
//! deadline; past it, the probe is flagged cancelled and abandoned. A worker
//! already blocked inside `statvfs(3)` cannot be interrupted: it finishes
//! whenever the kernel lets it, and its late result is discarded.
//!
//! Each abandoned worker stays blocked until the kernel answers. Callers that
//! refresh repeatedly should not start a second probe for a path whose
//! previous worker has not finished ([`MountProbe::finished_flag`]),
//! otherwise one blocked thread accumulates per refresh.

use super::table::MountRecord;
use crate::collector::procfs::parser::MountEntry;
use crate::collector::traits::{FileSystem, FsStats};
use crate::config::normalize_probe_steps;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Probe error reported when the deadline passes first.
pub const TIMEOUT_ERROR: i32 = libc::ETIMEDOUT;

/// Shortest poll slice, so tiny windows with many steps do not spin.
const MIN_POLL_SLICE: Duration = Duration::from_millis(1);

type ProbeResult = Result<FsStats, i32>;

/// An in-flight statistics query.
pub struct MountProbe {
    path: String,
    receiver: Option<Receiver<ProbeResult>>,
    cancelled: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    spawn_error: i32,
}

impl MountProbe {
    /// Starts querying `path` on a new thread.
    pub fn start<F: FileSystem + 'static>(fs: Arc<F>, path: &str) -> Self {
        let (sender, receiver) = mpsc::sync_channel(1);
        let cancelled = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let done = Arc::clone(&finished);
        let target = path.to_string();

        let spawned = thread::Builder::new()
            .name("mount-probe".to_string())
            .spawn(move || {
                if !flag.load(Ordering::Acquire) {
                    let result = fs
                        .statfs(Path::new(&target))
                        .map_err(|e| e.raw_os_error().unwrap_or(libc::EIO));
                    // Receiver is gone when the caller gave up.
                    let _ = sender.send(result);
                }
                done.store(true, Ordering::Release);
            });

        match spawned {
            Ok(_) => Self {
                path: path.to_string(),
                receiver: Some(receiver),
                cancelled,
                finished,
                spawn_error: 0,
            },
            Err(e) => {
                warn!(path, error = %e, "cannot start mount probe");
                finished.store(true, Ordering::Release);
                Self {
                    path: path.to_string(),
                    receiver: None,
                    cancelled,
                    finished,
                    spawn_error: e.raw_os_error().unwrap_or(libc::EAGAIN),
                }
            }
        }
    }

    /// Waits for the result until `deadline`, polling in `steps` slices of
    /// the remaining window.
    ///
    /// Returns the OS error code on failure, [`TIMEOUT_ERROR`] on timeout.
    pub fn wait(self, deadline: Instant, steps: u32) -> ProbeResult {
        let Some(receiver) = self.receiver else {
            return Err(self.spawn_error);
        };

        let steps = normalize_probe_steps(steps);
        let slice = (deadline.saturating_duration_since(Instant::now()) / steps).max(MIN_POLL_SLICE);

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match receiver.recv_timeout(slice.min(remaining)) {
                Ok(result) => return result,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    debug!(path = %self.path, "mount probe exited without a result");
                    return Err(libc::EIO);
                }
            }
        }

        if let Ok(result) = receiver.try_recv() {
            return result;
        }
        self.cancelled.store(true, Ordering::Release);
        warn!(path = %self.path, "mount probe timed out");
        Err(TIMEOUT_ERROR)
    }

    /// Flag set once the worker thread no longer runs the query.
    pub fn finished_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.finished)
    }

    /// Whether the probe was abandoned past its deadline.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Probes one mount entry and builds its record, never waiting past `deadline`.
pub fn probe<F: FileSystem + 'static>(
    fs: Arc<F>,
    entry: MountEntry,
    deadline: Instant,
    steps: u32,
) -> MountRecord {
    let result = MountProbe::start(fs, &entry.target).wait(deadline, steps);
    MountRecord::new(entry, result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mock::MockFs;

    fn entry(source: &str, target: &str) -> MountEntry {
        MountEntry {
            source: source.to_string(),
            target: target.to_string(),
            fs_type: "ext4".to_string(),
            options: "rw".to_string(),
            dump_frequency: 0,
            pass_number: 1,
        }
    }

    #[test]
    fn test_probe_success() {
        let fs = Arc::new(MockFs::typical_system());
        let deadline = Instant::now() + Duration::from_secs(1);

        let result = MountProbe::start(fs, "/").wait(deadline, 200);
        let stats = result.unwrap();
        assert_eq!(stats.blocks, 1000);
        assert_eq!(stats.block_size, 1024);
    }

    #[test]
    fn test_probe_reports_os_error() {
        let mut fs = MockFs::typical_system();
        fs.set_statfs_error("/boot", libc::EACCES);
        let deadline = Instant::now() + Duration::from_secs(1);

        let record = probe(Arc::new(fs), entry("/dev/sda2", "/boot"), deadline, 200);
        assert_eq!(record.probe_error, libc::EACCES);
        assert_eq!(record.total_space(), 0);
    }

    #[test]
    fn test_probe_timeout_is_bounded() {
        let fs = Arc::new(MockFs::with_hung_mount(Duration::from_secs(5)));
        let wait = Duration::from_millis(100);
        let started = Instant::now();

        let probe = MountProbe::start(fs, "/mnt/nfs");
        let result = probe.wait(started + wait, 200);

        assert_eq!(result, Err(TIMEOUT_ERROR));
        assert!(started.elapsed() < wait + Duration::from_millis(400));
    }

    #[test]
    fn test_timed_out_probe_is_cancelled() {
        let fs = Arc::new(MockFs::with_hung_mount(Duration::from_secs(5)));
        let probe = MountProbe::start(fs, "/mnt/nfs");
        let cancelled = Arc::clone(&probe.cancelled);

        assert!(!probe.is_cancelled());
        let _ = probe.wait(Instant::now() + Duration::from_millis(20), 4);
        assert!(cancelled.load(Ordering::Acquire));
    }

    #[test]
    fn test_finished_flag_follows_worker() {
        let fs = Arc::new(MockFs::with_hung_mount(Duration::from_millis(150)));
        let probe = MountProbe::start(fs, "/mnt/nfs");
        let finished = probe.finished_flag();

        assert_eq!(
            probe.wait(Instant::now() + Duration::from_millis(20), 4),
            Err(TIMEOUT_ERROR)
        );
        assert!(!finished.load(Ordering::Acquire));

        thread::sleep(Duration::from_millis(400));
        assert!(finished.load(Ordering::Acquire));
    }

    #[test]
    fn test_expired_deadline_still_collects_finished_result() {
        let fs = Arc::new(MockFs::typical_system());
        let probe = MountProbe::start(fs, "/");
        thread::sleep(Duration::from_millis(50));

        // Deadline already passed, but the result is sitting in the slot
        let result = probe.wait(Instant::now() - Duration::from_millis(10), 200);
        assert!(result.is_ok());
    }

    #[test]
    fn test_zero_steps_is_accepted() {
        let fs = Arc::new(MockFs::typical_system());
        let deadline = Instant::now() + Duration::from_secs(1);
        assert!(MountProbe::start(fs, "/run").wait(deadline, 0).is_ok());
    }
}
