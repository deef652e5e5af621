//! Pre-flight resource guard.

use std::path::{Path, PathBuf};

use serde::Serialize;
use sysinfo::{Disks, System};
use tracing::{debug, warn};

use crate::ResourceThresholds;

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Below this multiple of a minimum the guard warns but lets the run proceed.
const WARN_FACTOR: u64 = 2;

/// Reads free host resources.
pub trait ResourceProbe: Send + Sync {
    /// Available memory in bytes, or `None` when it cannot be read.
    fn free_memory_bytes(&self) -> Option<u64>;

    /// Free space in bytes on the filesystem holding `path`.
    fn free_disk_bytes(&self, path: &Path) -> Option<u64>;
}

/// Probe backed by `sysinfo`.
#[derive(Debug, Default)]
pub struct SysinfoProbe;

impl ResourceProbe for SysinfoProbe {
    fn free_memory_bytes(&self) -> Option<u64> {
        let mut system = System::new();
        system.refresh_memory();
        let available = system.available_memory();
        // Some platforms report zero when the value is unsupported
        (available > 0).then_some(available)
    }

    fn free_disk_bytes(&self, path: &Path) -> Option<u64> {
        let target = absolute(path);
        let disks = Disks::new_with_refreshed_list();

        disks
            .list()
            .iter()
            .filter(|disk| target.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .map(|disk| disk.available_space())
    }
}

/// Resolve `path` against the nearest existing ancestor so mount matching works
/// before the directory has been created.
fn absolute(path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    let mut candidate = joined.as_path();
    loop {
        if let Ok(resolved) = candidate.canonicalize() {
            return resolved;
        }
        match candidate.parent() {
            Some(parent) => candidate = parent,
            None => return joined,
        }
    }
}

/// Verdict of a resource check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceLevel {
    Ok,
    /// Soft margin: log and proceed.
    Warn,
    /// Hard refusal: the run must not start.
    Abort,
}

/// Result of [`ResourceGuard::check`].
#[derive(Debug, Clone, Serialize)]
pub struct ResourceReport {
    pub level: ResourceLevel,
    pub free_memory_mb: Option<u64>,
    pub free_disk_mb: Option<u64>,
    /// One entry per threshold that was crossed or could not be read.
    pub reasons: Vec<String>,
}

impl ResourceReport {
    pub fn summary(&self) -> String {
        self.reasons.join("; ")
    }
}

/// Compares free memory and disk against configured floors.
pub struct ResourceGuard {
    thresholds: ResourceThresholds,
    probe: Box<dyn ResourceProbe>,
}

impl ResourceGuard {
    pub fn new(thresholds: ResourceThresholds) -> Self {
        Self::with_probe(thresholds, Box::new(SysinfoProbe))
    }

    pub fn with_probe(thresholds: ResourceThresholds, probe: Box<dyn ResourceProbe>) -> Self {
        Self { thresholds, probe }
    }

    pub fn thresholds(&self) -> &ResourceThresholds {
        &self.thresholds
    }

    /// Classify current free resources as OK, WARN or ABORT.
    pub fn check(&self) -> ResourceReport {
        let free_memory_mb = self.probe.free_memory_bytes().map(|b| b / BYTES_PER_MB);
        let free_disk_mb = self
            .probe
            .free_disk_bytes(&self.thresholds.disk_path)
            .map(|b| b / BYTES_PER_MB);

        let mut reasons = Vec::new();
        let memory = classify(
            "memory",
            free_memory_mb,
            self.thresholds.min_free_memory_mb,
            &mut reasons,
        );
        let disk = classify(
            "disk",
            free_disk_mb,
            self.thresholds.min_free_disk_mb,
            &mut reasons,
        );
        let level = memory.max(disk);

        match level {
            ResourceLevel::Ok => {
                debug!(?free_memory_mb, ?free_disk_mb, "resource check passed")
            }
            ResourceLevel::Warn => warn!(
                ?free_memory_mb,
                ?free_disk_mb,
                reasons = %reasons.join("; "),
                "resources low, proceeding"
            ),
            ResourceLevel::Abort => warn!(
                ?free_memory_mb,
                ?free_disk_mb,
                reasons = %reasons.join("; "),
                "resources exhausted"
            ),
        }

        ResourceReport {
            level,
            free_memory_mb,
            free_disk_mb,
            reasons,
        }
    }
}

fn classify(
    resource: &str,
    free_mb: Option<u64>,
    min_mb: u64,
    reasons: &mut Vec<String>,
) -> ResourceLevel {
    match free_mb {
        None => {
            reasons.push(format!("could not read free {}", resource));
            ResourceLevel::Warn
        }
        Some(free) if free < min_mb => {
            reasons.push(format!(
                "free {} {} MB below minimum {} MB",
                resource, free, min_mb
            ));
            ResourceLevel::Abort
        }
        Some(free) if free < min_mb.saturating_mul(WARN_FACTOR) => {
            reasons.push(format!(
                "free {} {} MB within {}x of minimum {} MB",
                resource, free, WARN_FACTOR, min_mb
            ));
            ResourceLevel::Warn
        }
        Some(_) => ResourceLevel::Ok,
    }
}
