//! Pre-built mock filesystem scenarios for testing.
//!
//! These scenarios provide realistic `/proc` filesystem and mount states
//! for testing various system conditions.

use super::filesystem::MockFs;
use crate::collector::traits::FsStats;
use std::time::Duration;

/// Mount registry used by [`MockFs::typical_system`].
pub const TYPICAL_MOUNTS: &str = "\
/dev/sda1 / ext4 rw,relatime 0 1
/dev/sda2 /boot ext4 rw,relatime 0 2
proc /proc proc rw,nosuid,nodev,noexec,relatime 0 0
tmpfs /run tmpfs rw,nosuid,nodev,mode=755 0 0
";

impl MockFs {
    /// Creates a typical system with a few processes and mounts.
    ///
    /// Includes: init (PID 1), two bash shells (PIDs 1000, 1001) and an
    /// nginx worker (PID 1200). `/` has 1000 blocks of 1 KiB, 400 free.
    pub fn typical_system() -> Self {
        let mut fs = Self::new();

        // System-wide files
        fs.add_file("/proc/uptime", "12345.67 98765.43\n");
        fs.add_file("/proc/loadavg", "0.15 0.10 0.05 1/150 1234\n");
        fs.add_file(
            "/proc/meminfo",
            "\
MemTotal:       16384000 kB
MemFree:         8192000 kB
MemAvailable:   12000000 kB
Buffers:          512000 kB
Cached:          2048000 kB
SwapCached:            0 kB
SwapTotal:       4096000 kB
SwapFree:        3072000 kB
Shmem:            256000 kB
",
        );

        // Mount registry and per-mount statistics
        fs.add_file("/proc/self/mounts", TYPICAL_MOUNTS);
        fs.add_mount_stats(
            "/",
            FsStats {
                block_size: 1024,
                blocks: 1000,
                blocks_free: 400,
                blocks_available: 400,
                name_max: 255,
                files: 640,
                files_free: 320,
            },
        );
        fs.add_mount_stats(
            "/boot",
            FsStats {
                block_size: 4096,
                blocks: 262144,
                blocks_free: 131072,
                blocks_available: 120000,
                name_max: 255,
                files: 65536,
                files_free: 65000,
            },
        );
        fs.add_mount_stats(
            "/proc",
            FsStats {
                block_size: 4096,
                name_max: 255,
                ..FsStats::default()
            },
        );
        fs.add_mount_stats(
            "/run",
            FsStats {
                block_size: 4096,
                blocks: 409600,
                blocks_free: 409000,
                blocks_available: 409000,
                name_max: 255,
                files: 100000,
                files_free: 99000,
            },
        );

        // PID 1 - init/systemd
        fs.add_process(
            1,
            "1 (systemd) S 0 1 1 0 -1 4194560 50000 1000000 100 500 1000 500 2000 1000 20 0 1 0 1 170000000 3000 18446744073709551615 0 0 0 0 0 0 0 0 1073745152 0 0 0 17 0 0 0 0 0 0 0 0 0 0 0 0 0 0",
        );

        // PID 1000 - bash shell
        fs.add_process(
            1000,
            "1000 (bash) S 999 1000 1000 34816 1001 4194304 5000 50000 0 0 100 50 200 100 20 0 1 0 100000 25000000 2000 18446744073709551615 0 0 0 0 0 0 65536 3670020 1266777851 0 0 0 17 2 0 0 0 0 0 0 0 0 0 0 0 0 0",
        );

        // PID 1001 - second bash shell
        fs.add_process(
            1001,
            "1001 (bash) S 1000 1001 1000 34817 1001 4194304 1000 0 0 0 40 10 0 0 20 0 1 0 200000 20000000 1500 18446744073709551615 0 0 0 0 0 0 65536 3670020 1266777851 0 0 0 17 1 0 0 0 0 0 0 0 0 0 0 0 0 0",
        );

        // PID 1200 - nginx worker
        fs.add_process(
            1200,
            "1200 (nginx) S 1 1200 1200 0 -1 4194368 20000 0 5 0 3000 1000 0 0 20 0 4 0 50000 1500000000 40000 18446744073709551615 0 0 0 0 0 0 0 0 0 0 0 0 17 3 0 0 0 0 0 0 0 0 0 0 0 0 0",
        );

        fs
    }

    /// Creates a system with processes whose names need careful parsing.
    pub fn with_special_names() -> Self {
        let mut fs = Self::typical_system();

        // Process with spaces in name
        fs.add_process(
            5000,
            "5000 (Web Content) S 4999 5000 4999 0 -1 4194304 100000 0 500 0 5000 1000 0 0 20 0 20 0 500000 2000000000 50000 18446744073709551615 0 0 0 0 0 0 0 0 0 0 0 0 17 0 0 0 0 0 0 0 0 0 0 0 0 0 0",
        );

        // Process with parentheses in name
        fs.add_process(
            5001,
            "5001 ((sd-pam)) S 1 5001 5001 0 -1 1077936448 50 0 0 0 0 0 0 0 20 0 1 0 150 180000000 1200 18446744073709551615 0 0 0 0 0 0 0 4096 0 0 0 0 17 0 0 0 0 0 0 0 0 0 0 0 0 0 0",
        );

        fs
    }

    /// Creates a typical system plus a network mount whose statistics query hangs.
    pub fn with_hung_mount(hang: Duration) -> Self {
        let mut fs = Self::typical_system();
        let mut mounts = TYPICAL_MOUNTS.to_string();
        mounts.push_str("server:/export /mnt/nfs nfs rw,vers=4.2 0 0\n");
        fs.add_file("/proc/self/mounts", mounts);
        fs.add_mount_stats(
            "/mnt/nfs",
            FsStats {
                block_size: 4096,
                blocks: 1000,
                blocks_free: 10,
                blocks_available: 10,
                ..FsStats::default()
            },
        );
        fs.set_statfs_delay("/mnt/nfs", hang);
        fs
    }

    /// Creates a typical system with one unparsable process record (PID 3000).
    pub fn with_malformed_process() -> Self {
        let mut fs = Self::typical_system();
        fs.add_process(3000, "3000 (broken S 1 3000");
        fs
    }
}
