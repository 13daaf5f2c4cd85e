//! Collectors for the Linux `/proc` filesystem.
//!
//! Parsers for the raw text formats, the system snapshot collector, the
//! per-PID process scanner and the name-grouped aggregator built on top of it.

pub mod groups;
pub mod parser;
pub mod process;
pub mod system;

pub use groups::{ProcessAggregator, ProcessGroupRecord};
pub use parser::{MountEntry, ParseError};
pub use process::{CollectError, ProcessRecord, ProcessScanner};
pub use system::{LoadAverage, SysInfo, SystemCollector};
