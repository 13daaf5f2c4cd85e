//! Byte-size humanizer.
//!
//! Sizes are scaled by 1024 until they fit the largest matching unit and
//! printed with a fixed number of decimals: `12345678` → `"11.774Mb"`.

use crate::config::DEFAULT_SIZE_PRECISION;

const UNITS: [&str; 10] = ["bytes", "Kb", "Mb", "Gb", "Tb", "Pb", "Eb", "Zb", "Yb", "Bb"];

/// Upper bound for the number of decimals.
const MAX_PRECISION: usize = 20;

/// Format a magnitude as a unit-scaled string with `precision` decimals.
pub fn format_size(size: f64, precision: usize) -> String {
    let mut size = size;
    let mut unit = 0;
    while size > 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!(
        "{:.*}{}",
        precision.min(MAX_PRECISION),
        size,
        UNITS[unit]
    )
}

/// Humanizer carrying a default precision for "use the default" requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeFormatter {
    default_precision: usize,
}

impl Default for SizeFormatter {
    fn default() -> Self {
        Self::new(DEFAULT_SIZE_PRECISION)
    }
}

impl SizeFormatter {
    pub fn new(default_precision: usize) -> Self {
        Self { default_precision }
    }

    pub fn default_precision(&self) -> usize {
        self.default_precision
    }

    /// Formats `size`; a negative `precision` selects the default precision.
    pub fn format(&self, size: f64, precision: i32) -> String {
        let precision = usize::try_from(precision).unwrap_or(self.default_precision);
        format_size(size, precision)
    }
}
