/// Utility functions for timestamp formatting and host bookkeeping
use std::fs;
use std::path::Path;

use log::warn;
use time::{format_description, OffsetDateTime, UtcOffset};

/// Format a timestamp for telemetry payloads and logging
///
/// Converts an OffsetDateTime to YYYY-MM-DD HH:MM:SS format.
/// Falls back to default string representation if formatting fails.
pub fn format_datetime(dt: &OffsetDateTime) -> String {
    let format = format_description::parse("[year]-[month]-[day] [hour]:[minute]:[second]")
        .expect("Failed to create format description");
    dt.format(&format).unwrap_or_else(|_| dt.to_string())
}

/// Current wall-clock time in the host's local offset.
///
/// Falls back to UTC when the local offset cannot be determined (the lookup
/// is refused in multi-threaded processes on some platforms).
pub fn local_now() -> OffsetDateTime {
    let now = OffsetDateTime::now_utc();
    match UtcOffset::current_local_offset() {
        Ok(offset) => now.to_offset(offset),
        Err(_) => now,
    }
}

/// Read, increment and persist the boot counter.
///
/// A missing or corrupt counter file restarts the count at 1. Persistence
/// failures are logged and the in-memory count is still returned.
pub fn next_boot_count(path: &Path) -> u64 {
    let previous = fs::read_to_string(path)
        .ok()
        .and_then(|contents| contents.trim().parse::<u64>().ok())
        .unwrap_or(0);
    let count = previous + 1;

    if let Err(e) = fs::write(path, count.to_string()) {
        warn!("Failed to persist boot count to {}: {}", path.display(), e);
    }

    count
}

/// Resident set size of this process in bytes, read from /proc/self/status.
///
/// Returns None on platforms without procfs; telemetry simply omits the
/// memory figure in that case.
pub fn resident_memory_bytes() -> Option<u64> {
    let status = fs::read_to_string("/proc/self/status").ok()?;
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            let kib: u64 = rest.trim().trim_end_matches("kB").trim().parse().ok()?;
            return Some(kib * 1024);
        }
    }
    None
}
