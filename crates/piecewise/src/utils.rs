//! Utility functions

const UNITS: [&str; 7] = ["B", "KB", "MB", "GB", "TB", "PB", "EB"];

/// Format a byte count with decimal units, like `28.78 MB`.
pub fn to_human_readable(n: u64) -> String {
    if n < 1000 {
        return format!("{n} B");
    }

    let mut value = n as f64;
    let mut unit = 0;

    // anything that would print as 1000.00 belongs to the next unit
    while value >= 999.995 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }

    format!("{value:.2} {}", UNITS[unit])
}
