//! Process-wide sizing of the resident plate set.

use std::fs;
use std::sync::OnceLock;

use tracing::{info, warn};

/// Plates every process may keep regardless of memory.
pub const MIN_TECTONIC_LIMIT: usize = 2;

/// Megabytes of available memory granting one more resident plate.
pub const MB_PER_PLATE: u64 = 200;

/// Assumed available memory when it cannot be measured.
const FALLBACK_MEMORY_MB: u64 = 1024;

static TECTONIC_LIMIT: OnceLock<usize> = OnceLock::new();

/// `2 + floor(available_mb / 200)`.
pub fn tectonic_limit_for(available_mb: u64) -> usize {
    MIN_TECTONIC_LIMIT + (available_mb / MB_PER_PLATE) as usize
}

/// Available memory in megabytes, read from `/proc/meminfo` when present.
pub fn available_memory_mb() -> Option<u64> {
    let meminfo = fs::read_to_string("/proc/meminfo").ok()?;
    parse_meminfo_available(&meminfo)
}

fn parse_meminfo_available(meminfo: &str) -> Option<u64> {
    meminfo.lines().find_map(|line| {
        let rest = line.strip_prefix("MemAvailable:")?;
        let kb: u64 = rest.trim().trim_end_matches("kB").trim().parse().ok()?;
        Some(kb / 1024)
    })
}

/// The process-wide capacity limit, computed on first call and fixed afterwards.
///
/// `override_mb` replaces the measured memory on that first call only.
pub fn tectonic_limit(override_mb: Option<u64>) -> usize {
    *TECTONIC_LIMIT.get_or_init(|| {
        let memory_mb = match override_mb.or_else(available_memory_mb) {
            Some(mb) => mb,
            None => {
                warn!(
                    fallback_mb = FALLBACK_MEMORY_MB,
                    "Could not measure available memory, using fallback"
                );
                FALLBACK_MEMORY_MB
            }
        };
        let limit = tectonic_limit_for(memory_mb);
        info!(memory_mb, limit, "Tectonic plate limit computed");
        limit
    })
}
