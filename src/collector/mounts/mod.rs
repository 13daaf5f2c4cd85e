//! Mounted filesystems and their usage.
//!
//! [`MountTable`] reads the mount registry and runs one [`MountProbe`] per
//! entry under a shared deadline, so a stalled filesystem delays the table
//! by at most the mount wait window.

pub mod probe;
pub mod table;

pub use probe::{MountProbe, TIMEOUT_ERROR, probe};
pub use table::{MountRecord, MountTable, UNKNOWN_FS_TYPE};
