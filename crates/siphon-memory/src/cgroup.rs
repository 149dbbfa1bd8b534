#[cfg(target_os = "linux")]
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// cgroup membership parsed from `/proc/self/cgroup`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcSelfCgroup {
    /// Unified (v2) hierarchy path, from a `0::/path` entry.
    pub v2_path: Option<String>,
    /// Memory controller path on a v1 hierarchy, from an `N:memory:/path` entry.
    pub v1_memory_path: Option<String>,
}

/// Parse `/proc/self/cgroup` contents. Pure; does not touch the filesystem.
pub fn parse_proc_self_cgroup(contents: &str) -> ProcSelfCgroup {
    let mut parsed = ProcSelfCgroup {
        v2_path: None,
        v1_memory_path: None,
    };

    for line in contents.lines().map(str::trim).filter(|line| !line.is_empty()) {
        let mut fields = line.splitn(3, ':');
        let (Some(hierarchy), Some(controllers), Some(path)) =
            (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        let path = path.trim();
        if path.is_empty() {
            continue;
        }

        if parsed.v2_path.is_none() && hierarchy == "0" && controllers.is_empty() {
            parsed.v2_path = Some(path.to_owned());
        }
        if parsed.v1_memory_path.is_none()
            && controllers.split(',').any(|name| name.trim() == "memory")
        {
            parsed.v1_memory_path = Some(path.to_owned());
        }
    }

    parsed
}

// Limits at or above 1 EiB are how runtimes spell "unlimited" on v1.
const UNLIMITED_THRESHOLD_BYTES: u64 = 1 << 60;

/// Parse a `memory.max` / `memory.limit_in_bytes` value.
///
/// Returns `None` for `max`, unlimited sentinels and unparsable values.
pub fn parse_cgroup_memory_limit_bytes(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if raw.is_empty() || raw == "max" {
        return None;
    }
    match raw.parse::<u64>() {
        Ok(value) if value < UNLIMITED_THRESHOLD_BYTES && value > 0 => Some(value),
        Ok(_) => None,
        Err(err) => {
            static REPORTED: OnceLock<()> = OnceLock::new();
            if REPORTED.set(()).is_ok() {
                tracing::debug!(
                    target = "siphon.memory",
                    raw,
                    error = %err,
                    "failed to parse cgroup memory limit value"
                );
            }
            None
        }
    }
}

/// Memory limit and usage of the cgroup the process lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CgroupUsage {
    pub limit_bytes: u64,
    pub current_bytes: u64,
}

/// Probe the enclosing cgroup. `None` unless both a finite limit and a usage
/// counter are readable.
#[cfg(target_os = "linux")]
pub(crate) fn probe() -> Option<CgroupUsage> {
    let contents = std::fs::read_to_string("/proc/self/cgroup").ok()?;
    let parsed = parse_proc_self_cgroup(&contents);

    let hierarchies = [
        (
            parsed.v2_path.as_deref(),
            Path::new("/sys/fs/cgroup"),
            "memory.max",
            "memory.current",
        ),
        (
            parsed.v1_memory_path.as_deref(),
            Path::new("/sys/fs/cgroup/memory"),
            "memory.limit_in_bytes",
            "memory.usage_in_bytes",
        ),
    ];

    for (path, mount, limit_file, usage_file) in hierarchies {
        let Some(path) = path else {
            continue;
        };
        let rel = PathBuf::from(path.trim_start_matches('/'));
        let Some(limit_bytes) = effective_limit(mount, &rel, limit_file) else {
            continue;
        };
        let Some(current_bytes) = read_trimmed(&mount.join(&rel).join(usage_file))
            .and_then(|raw| raw.parse::<u64>().ok())
        else {
            continue;
        };
        return Some(CgroupUsage {
            limit_bytes,
            current_bytes,
        });
    }

    None
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn probe() -> Option<CgroupUsage> {
    None
}

/// The tightest limit along the path from the cgroup up to the hierarchy root.
#[cfg(target_os = "linux")]
fn effective_limit(mount: &Path, rel: &Path, limit_file: &str) -> Option<u64> {
    let mut rel = rel.to_path_buf();
    let mut best: Option<u64> = None;
    loop {
        if let Some(limit) =
            read_trimmed(&mount.join(&rel).join(limit_file)).and_then(|raw| parse_cgroup_memory_limit_bytes(&raw))
        {
            best = Some(best.map_or(limit, |best| best.min(limit)));
        }
        if !rel.pop() {
            break;
        }
    }
    best
}

#[cfg(target_os = "linux")]
fn read_trimmed(path: &Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(text) => Some(text.trim().to_owned()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
        Err(err) => {
            static REPORTED: OnceLock<()> = OnceLock::new();
            if REPORTED.set(()).is_ok() {
                tracing::debug!(
                    target = "siphon.memory",
                    path = %path.display(),
                    error = %err,
                    "failed to read cgroup file"
                );
            }
            None
        }
    }
}
