//! hostmon - host metrics collection library.
//!
//! This library samples memory/swap/load statistics, per-filesystem mount
//! usage and the live process table of a Linux machine, and exposes them
//! through throttled, cached accessors:
//! - `collector` - system, mount and process collectors plus the `Collector` facade
//! - `cache` - time-windowed value cache shared by all collectors
//! - `config` - runtime-tunable collector configuration
//! - `fmt` - byte-size humanizer
//! - `sysconf` - system configuration limits

pub mod cache;
pub mod collector;
pub mod config;
pub mod fmt;
pub mod sysconf;
