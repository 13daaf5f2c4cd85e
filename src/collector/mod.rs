//! Host metrics collectors for Linux.
//!
//! This module provides the system snapshot, mount table and process
//! collectors, with support for mocking the OS for tests.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            Collector                             │
//! │  ┌─────────────────┐  ┌──────────────────┐  ┌─────────────────┐  │
//! │  │ SystemCollector │  │    MountTable    │  │ProcessAggregator│  │
//! │  │ - /proc/meminfo │  │ - /proc/self/    │  │  (name groups)  │  │
//! │  │ - /proc/loadavg │  │   mounts         │  └────────┬────────┘  │
//! │  │ - /proc/uptime  │  │ - MountProbe per │  ┌────────▼────────┐  │
//! │  └────────┬────────┘  │   entry (thread) │  │ ProcessScanner  │  │
//! │           │           └────────┬─────────┘  │ - /proc/[pid]/  │  │
//! │           │                    │            │   stat          │  │
//! │           │                    │            └────────┬────────┘  │
//! │           └────────────────────┼─────────────────────┘           │
//! │                         ┌──────▼──────┐                          │
//! │                         │  FileSystem │ (trait)                  │
//! │                         └──────┬──────┘                          │
//! └────────────────────────────────┼─────────────────────────────────┘
//!                         ┌────────┴────────┐
//!                  ┌──────▼──────┐   ┌──────▼──────┐
//!                  │   RealFs    │   │   MockFs    │
//!                  │  (Linux)    │   │  (Testing)  │
//!                  └─────────────┘   └─────────────┘
//! ```
//!
//! Every component keeps its last result in a [`ClockedCache`] and only
//! goes back to the OS once that result is older than its window.
//!
//! [`ClockedCache`]: crate::cache::ClockedCache
//!
//! # Usage
//!
//! ## Production (Linux)
//!
//! ```ignore
//! use hostmon::collector::{Collector, RealFs};
//! use hostmon::config::CollectorConfig;
//!
//! let collector = Collector::new(RealFs::new(), CollectorConfig::default());
//! println!("free on /: {}", collector.mounts().free_space("/"));
//! ```
//!
//! ## Testing (with MockFs)
//!
//! ```
//! use hostmon::collector::{Collector, MockFs};
//! use hostmon::config::CollectorConfig;
//!
//! let collector = Collector::new(MockFs::typical_system(), CollectorConfig::default());
//! assert_eq!(collector.mounts().total_space("/"), 1024000);
//! assert_eq!(collector.processes().count_by_name("bash"), 2);
//! ```

#[allow(clippy::module_inception)]
mod collector;
pub mod mock;
pub mod mounts;
pub mod procfs;
pub mod traits;

pub use collector::Collector;
pub use mock::MockFs;
pub use mounts::{MountProbe, MountRecord, MountTable};
pub use procfs::{
    CollectError, LoadAverage, ProcessAggregator, ProcessGroupRecord, ProcessRecord,
    ProcessScanner, SysInfo, SystemCollector,
};
pub use traits::{FileSystem, FsStats, RealFs};
