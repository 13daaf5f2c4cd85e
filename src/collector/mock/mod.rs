//! Mock filesystem implementations for testing.
//!
//! This module provides `MockFs` and pre-built scenarios for testing
//! collectors without requiring actual Linux `/proc` filesystem access
//! or real mounts.

mod filesystem;
mod scenarios;

pub use filesystem::MockFs;
pub use scenarios::TYPICAL_MOUNTS;
