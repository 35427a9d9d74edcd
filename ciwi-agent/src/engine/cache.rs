//! Named job caches
//!
//! A cache lives at `<workdir>/cache/<id>/<key>`. Resolution reports a
//! `hit` when the keyed directory was used before, a `fallback` when it was
//! seeded from the newest directory matching a restore key, and a `miss`
//! otherwise. Each use touches a marker file whose mtime drives TTL and
//! size-based eviction.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use ciwi_core::domain::job::{JobCacheSpec, JobCacheStats};
use tracing::{debug, info};

use super::process::{ProcessSpec, capture_output};
use super::workspace::sanitize_segment;

/// Marker touched on every use of a cache directory
pub const CACHE_MARKER: &str = ".ciwi-cache-last-used";

const DEFAULT_KEY: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
    Hit,
    Miss,
    Fallback,
}

impl CacheSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheSource::Hit => "hit",
            CacheSource::Miss => "miss",
            CacheSource::Fallback => "fallback",
        }
    }
}

/// A cache ready for use by a job
#[derive(Debug, Clone)]
pub struct ResolvedCache {
    pub spec: JobCacheSpec,
    pub path: PathBuf,
    pub source: CacheSource,
    /// Directory the fallback was seeded from
    pub restored_from: Option<PathBuf>,
}

/// Directory of a cache spec under `cache_root`
pub fn cache_path(cache_root: &Path, spec: &JobCacheSpec) -> PathBuf {
    let key = match spec.key.trim() {
        "" => DEFAULT_KEY,
        key => key,
    };
    cache_root
        .join(sanitize_segment(&spec.id))
        .join(sanitize_segment(key))
}

/// Resolves every declared cache; specs without an id are skipped
pub fn resolve_all(cache_root: &Path, specs: &[JobCacheSpec]) -> Result<Vec<ResolvedCache>> {
    specs
        .iter()
        .filter(|s| !s.id.trim().is_empty())
        .map(|spec| resolve(cache_root, spec))
        .collect()
}

/// Resolves one cache, creating or seeding its directory
pub fn resolve(cache_root: &Path, spec: &JobCacheSpec) -> Result<ResolvedCache> {
    let path = cache_path(cache_root, spec);
    let mut restored_from = None;

    let source = if path.join(CACHE_MARKER).exists() {
        CacheSource::Hit
    } else if let Some(seed) = find_restore_candidate(&path, &spec.restore_keys) {
        copy_dir_all(&seed, &path)
            .with_context(|| format!("failed to restore cache {} from {}", spec.id, seed.display()))?;
        restored_from = Some(seed);
        CacheSource::Fallback
    } else {
        CacheSource::Miss
    };

    fs::create_dir_all(&path)
        .with_context(|| format!("failed to create cache dir {}", path.display()))?;
    touch_marker(&path)?;

    Ok(ResolvedCache {
        spec: spec.clone(),
        path,
        source,
        restored_from,
    })
}

/// Newest sibling of `path` whose name starts with one of the restore keys
fn find_restore_candidate(path: &Path, restore_keys: &[String]) -> Option<PathBuf> {
    let parent = path.parent()?;
    let entries = fs::read_dir(parent).ok()?;
    let siblings: Vec<(String, PathBuf, SystemTime)> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path() != path && e.path().join(CACHE_MARKER).exists())
        .filter_map(|e| {
            let dir = e.path();
            let used = last_used(&dir)?;
            Some((e.file_name().to_string_lossy().to_string(), dir, used))
        })
        .collect();

    restore_keys.iter().find_map(|key| {
        let prefix = sanitize_segment(key);
        siblings
            .iter()
            .filter(|(name, _, _)| name.starts_with(&prefix))
            .max_by_key(|(_, _, used)| *used)
            .map(|(_, dir, _)| dir.clone())
    })
}

fn touch_marker(dir: &Path) -> Result<()> {
    let stamp = chrono::Utc::now().to_rfc3339();
    fs::write(dir.join(CACHE_MARKER), stamp)
        .with_context(|| format!("failed to touch cache marker in {}", dir.display()))
}

fn last_used(dir: &Path) -> Option<SystemTime> {
    fs::metadata(dir.join(CACHE_MARKER))
        .and_then(|m| m.modified())
        .ok()
}

fn copy_dir_all(src: &Path, dst: &Path) -> io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let target = dst.join(entry.file_name());
        if file_type.is_dir() {
            copy_dir_all(&entry.path(), &target)?;
        } else if file_type.is_file() && entry.file_name() != CACHE_MARKER {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Environment variables exposing cache paths
pub fn cache_env(caches: &[ResolvedCache]) -> HashMap<String, String> {
    caches
        .iter()
        .filter(|c| !c.spec.env.trim().is_empty())
        .map(|c| {
            (
                c.spec.env.trim().to_string(),
                c.path.to_string_lossy().to_string(),
            )
        })
        .collect()
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DirUsage {
    pub files: u64,
    pub directories: u64,
    pub size_bytes: u64,
}

/// Files, directories and bytes below `dir`, ignoring the marker
pub fn dir_usage(dir: &Path) -> DirUsage {
    let mut usage = DirUsage::default();
    let Ok(entries) = fs::read_dir(dir) else {
        return usage;
    };
    for entry in entries.filter_map(|e| e.ok()) {
        let Ok(file_type) = entry.file_type() else { continue };
        if file_type.is_dir() {
            usage.directories += 1;
            let nested = dir_usage(&entry.path());
            usage.files += nested.files;
            usage.directories += nested.directories;
            usage.size_bytes += nested.size_bytes;
        } else if file_type.is_file() && entry.file_name() != CACHE_MARKER {
            usage.files += 1;
            usage.size_bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
        }
    }
    usage
}

/// Usage figures reported for a cache after the job ran
pub fn cache_stats(cache: &ResolvedCache) -> JobCacheStats {
    let usage = dir_usage(&cache.path);
    JobCacheStats {
        id: cache.spec.id.clone(),
        source: cache.source.as_str().to_string(),
        path: cache.path.to_string_lossy().to_string(),
        files: usage.files,
        directories: usage.directories,
        size_bytes: usage.size_bytes,
        tool_metrics: HashMap::new(),
    }
}

/// Removes sibling entries of `keep` past their TTL, then the least
/// recently used ones while the cache exceeds its size budget
///
/// Returns the evicted directories.
pub fn prune(keep: &Path, ttl_days: i64, max_size_mb: i64) -> Vec<PathBuf> {
    let Some(parent) = keep.parent() else {
        return Vec::new();
    };
    let Ok(entries) = fs::read_dir(parent) else {
        return Vec::new();
    };

    let mut others: Vec<(PathBuf, SystemTime)> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir() && p != keep)
        .map(|p| {
            let used = last_used(&p).unwrap_or(SystemTime::UNIX_EPOCH);
            (p, used)
        })
        .collect();
    others.sort_by_key(|(_, used)| *used);

    let mut evicted = Vec::new();
    if ttl_days > 0 {
        let ttl = Duration::from_secs(ttl_days as u64 * 24 * 60 * 60);
        let now = SystemTime::now();
        others.retain(|(dir, used)| {
            let expired = now.duration_since(*used).map(|age| age > ttl).unwrap_or(false);
            if expired && remove_entry(dir) {
                evicted.push(dir.clone());
                return false;
            }
            true
        });
    }

    if max_size_mb > 0 {
        let budget = max_size_mb as u64 * 1024 * 1024;
        let mut total: u64 = dir_usage(parent).size_bytes;
        for (dir, _) in &others {
            if total <= budget {
                break;
            }
            let size = dir_usage(dir).size_bytes;
            if remove_entry(dir) {
                total = total.saturating_sub(size);
                evicted.push(dir.clone());
            }
        }
    }
    evicted
}

fn remove_entry(dir: &Path) -> bool {
    match fs::remove_dir_all(dir) {
        Ok(()) => {
            info!(dir = %dir.display(), "Evicted cache entry");
            true
        }
        Err(e) => {
            debug!(dir = %dir.display(), "Failed to evict cache entry: {}", e);
            false
        }
    }
}

/// True for caches that hold a ccache directory
pub fn is_ccache(spec: &JobCacheSpec) -> bool {
    spec.env.trim() == "CCACHE_DIR" || spec.id.to_ascii_lowercase().contains("ccache")
}

/// Hit and miss counters from `ccache --print-stats`
pub async fn ccache_metrics(dir: &Path) -> HashMap<String, String> {
    let mut env = HashMap::new();
    env.insert("CCACHE_DIR".to_string(), dir.to_string_lossy().to_string());
    let spec = ProcessSpec::new("ccache").arg("--print-stats").envs(&env);

    match capture_output(&spec, Duration::from_secs(10)).await {
        Ok((outcome, text)) if outcome.success() => parse_ccache_stats(&text),
        _ => HashMap::new(),
    }
}

/// Parses `key<TAB>value` lines into `hits`/`misses` metrics
pub fn parse_ccache_stats(text: &str) -> HashMap<String, String> {
    let mut hits: u64 = 0;
    let mut misses: u64 = 0;
    let mut seen = false;
    for line in text.lines() {
        let Some((key, value)) = line.split_once('\t') else {
            continue;
        };
        let Ok(value) = value.trim().parse::<u64>() else {
            continue;
        };
        match key.trim() {
            "direct_cache_hit" | "preprocessed_cache_hit" => {
                hits += value;
                seen = true;
            }
            "cache_miss" => {
                misses += value;
                seen = true;
            }
            _ => {}
        }
    }

    let mut metrics = HashMap::new();
    if seen {
        metrics.insert("ccache_hits".to_string(), hits.to_string());
        metrics.insert("ccache_misses".to_string(), misses.to_string());
    }
    metrics
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(id: &str, key: &str, restore: &[&str]) -> JobCacheSpec {
        JobCacheSpec {
            id: id.to_string(),
            env: "GOCACHE".to_string(),
            key: key.to_string(),
            restore_keys: restore.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_cache_path_is_sanitised() {
        let root = Path::new("/c");
        assert_eq!(
            cache_path(root, &spec("go build", "", &[])),
            PathBuf::from("/c/go_build/default")
        );
        assert_eq!(
            cache_path(root, &spec("go", "../x", &[])),
            PathBuf::from("/c/go/_x")
        );
    }

    #[test]
    fn test_miss_then_hit() {
        let root = tempfile::tempdir().unwrap();
        let s = spec("go", "linux-1", &[]);

        let first = resolve(root.path(), &s).unwrap();
        assert_eq!(first.source, CacheSource::Miss);
        assert!(first.path.join(CACHE_MARKER).exists());

        let second = resolve(root.path(), &s).unwrap();
        assert_eq!(second.source, CacheSource::Hit);
        assert_eq!(first.path, second.path);
    }

    #[test]
    fn test_fallback_seeds_from_restore_key() {
        let root = tempfile::tempdir().unwrap();
        let old = resolve(root.path(), &spec("go", "linux-abc", &[])).unwrap();
        fs::create_dir_all(old.path.join("pkg")).unwrap();
        fs::write(old.path.join("pkg/obj.a"), "object").unwrap();

        let new = resolve(root.path(), &spec("go", "linux-def", &["linux-"])).unwrap();
        assert_eq!(new.source, CacheSource::Fallback);
        assert_eq!(new.restored_from.as_deref(), Some(old.path.as_path()));
        assert_eq!(fs::read_to_string(new.path.join("pkg/obj.a")).unwrap(), "object");

        let unrelated = resolve(root.path(), &spec("go", "mac-1", &["windows-"])).unwrap();
        assert_eq!(unrelated.source, CacheSource::Miss);
    }

    #[test]
    fn test_stats_and_env() {
        let root = tempfile::tempdir().unwrap();
        let cache = resolve(root.path(), &spec("go", "", &[])).unwrap();
        fs::create_dir_all(cache.path.join("a/b")).unwrap();
        fs::write(cache.path.join("a/b/f1"), "12345").unwrap();
        fs::write(cache.path.join("f2"), "123").unwrap();

        let stats = cache_stats(&cache);
        assert_eq!(stats.source, "miss");
        assert_eq!(stats.files, 2);
        assert_eq!(stats.directories, 2);
        assert_eq!(stats.size_bytes, 8);

        let env = cache_env(std::slice::from_ref(&cache));
        assert_eq!(env["GOCACHE"], cache.path.to_string_lossy());
    }

    #[test]
    fn test_prune_by_size_keeps_current() {
        let root = tempfile::tempdir().unwrap();
        let old = resolve(root.path(), &spec("go", "old", &[])).unwrap();
        fs::write(old.path.join("big"), vec![0u8; 2 * 1024 * 1024]).unwrap();
        let current = resolve(root.path(), &spec("go", "current", &[])).unwrap();
        fs::write(current.path.join("big"), vec![0u8; 512 * 1024]).unwrap();

        let evicted = prune(&current.path, 0, 1);
        assert_eq!(evicted, vec![old.path.clone()]);
        assert!(!old.path.exists());
        assert!(current.path.exists());
    }

    #[test]
    fn test_parse_ccache_stats() {
        let text = "direct_cache_hit\t10\npreprocessed_cache_hit\t2\ncache_miss\t5\nstats_updated_timestamp\t1700000000\n";
        let metrics = parse_ccache_stats(text);
        assert_eq!(metrics["ccache_hits"], "12");
        assert_eq!(metrics["ccache_misses"], "5");
        assert!(parse_ccache_stats("garbage").is_empty());
    }
}
