use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use strata_core::handle::project_of;
use strata_core::{Handle, MetricSource};
use tracing::{debug, info, warn};

use crate::error::StorageError;
use crate::segment::Segment;

/// Persistent, handle-keyed store of computed [`MetricSource`] records.
///
/// Best-effort: every I/O or decode failure is logged and treated as a miss
/// (for reads) or a no-op (for writes). Callers never see storage errors.
pub struct MetricCache {
    dir: Option<PathBuf>,
    segments: RwLock<HashMap<String, Arc<Segment>>>,
}

impl MetricCache {
    /// Cache that lives only as long as this value.
    pub fn in_memory() -> Self {
        Self {
            dir: None,
            segments: RwLock::new(HashMap::new()),
        }
    }

    /// Cache backed by segment files under `dir`. Segments load lazily.
    pub fn open(dir: &Path) -> Result<Self, StorageError> {
        fs::create_dir_all(dir)?;
        info!(dir = %dir.display(), "Opened metric cache");
        Ok(Self {
            dir: Some(dir.to_path_buf()),
            segments: RwLock::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    fn segment(&self, project: &str) -> Arc<Segment> {
        {
            let segments = self.segments.read().unwrap_or_else(|e| e.into_inner());
            if let Some(segment) = segments.get(project) {
                return Arc::clone(segment);
            }
        }
        let mut segments = self.segments.write().unwrap_or_else(|e| e.into_inner());
        let segment = segments.entry(project.to_string()).or_insert_with(|| {
            Arc::new(match &self.dir {
                Some(dir) => Segment::load(project, dir),
                None => Segment::volatile(project),
            })
        });
        Arc::clone(segment)
    }

    fn commit(&self, segment: &Segment) {
        if let Err(e) = segment.commit() {
            warn!(project = %segment.project(), error = %e, "Failed to commit cache segment");
        }
    }

    // ── Reads ─────────────────────────────────────────────────────

    /// Decoded copy of the cached record, or `None` on miss or decode failure.
    pub fn get(&self, handle: &str) -> Option<MetricSource> {
        let segment = self.segment(project_of(handle));
        let entries = segment.read();
        let bytes = entries.get(handle)?;
        match rmp_serde::from_slice::<MetricSource>(bytes) {
            Ok(source) => Some(source),
            Err(e) => {
                warn!(handle, error = %e, "Failed to decode cached metric source");
                None
            }
        }
    }

    /// Whether a record is cached for `handle`, without decoding it.
    pub fn contains(&self, handle: &str) -> bool {
        self.segment(project_of(handle)).read().contains_key(handle)
    }

    /// Every cached handle in the project segment `handle` belongs to.
    pub fn keys_for_handle(&self, handle: &str) -> BTreeSet<Handle> {
        self.segment(project_of(handle)).read().keys().cloned().collect()
    }

    // ── Writes ────────────────────────────────────────────────────

    /// Store a record. Package-level and larger records commit the segment.
    pub fn put(&self, source: &MetricSource) {
        let bytes = match rmp_serde::to_vec(source) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(handle = %source.handle(), error = %e, "Failed to encode metric source");
                return;
            }
        };
        let segment = self.segment(source.project());
        segment.write().insert(source.handle().to_string(), bytes);
        if source.level().commits_cache() {
            self.commit(&segment);
        }
    }

    /// Remove one entry. Returns whether it existed.
    pub fn remove(&self, handle: &str) -> bool {
        let segment = self.segment(project_of(handle));
        let removed = segment.write().remove(handle).is_some();
        if removed {
            debug!(handle, "Removed cached metric source");
        }
        removed
    }

    /// Remove every entry whose handle starts with `prefix`.
    pub fn remove_subtree(&self, prefix: &str) -> usize {
        let segment = self.segment(project_of(prefix));
        let removed = {
            let mut entries = segment.write();
            let doomed: Vec<String> = entries
                .range(prefix.to_string()..)
                .take_while(|(key, _)| key.starts_with(prefix))
                .map(|(key, _)| key.clone())
                .collect();
            for key in &doomed {
                entries.remove(key);
            }
            doomed.len()
        };
        if removed > 0 {
            debug!(prefix, removed, "Removed cached subtree");
            self.commit(&segment);
        }
        removed
    }

    /// Drop one project's segment, in memory and on disk.
    pub fn clear_project(&self, project: &str) {
        let segment = {
            let mut segments = self.segments.write().unwrap_or_else(|e| e.into_inner());
            segments.remove(project)
        };
        let result = match segment {
            Some(segment) => segment.delete_file(),
            None => match &self.dir {
                Some(dir) => Segment::load(project, dir).delete_file(),
                None => Ok(()),
            },
        };
        if let Err(e) = result {
            warn!(project, error = %e, "Failed to delete cache segment file");
        }
        info!(project, "Cleared project cache");
    }

    /// Drop every segment, including segment files of projects not loaded yet.
    pub fn clear(&self) {
        self.segments
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        if let Some(dir) = &self.dir {
            if let Err(e) = remove_segment_files(dir) {
                warn!(dir = %dir.display(), error = %e, "Failed to clear cache directory");
            }
        }
        info!("Cleared metric cache");
    }

    /// Commit every dirty segment.
    pub fn flush(&self) {
        let segments: Vec<Arc<Segment>> = self
            .segments
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        for segment in segments.iter().filter(|s| s.is_dirty()) {
            self.commit(segment);
        }
    }
}

fn remove_segment_files(dir: &Path) -> Result<(), StorageError> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_segment = path
            .extension()
            .map(|ext| ext == "seg" || ext == "tmp")
            .unwrap_or(false);
        if path.is_file() && is_segment {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::{Level, Metric};
    use uuid::Uuid;

    fn source(handle: &str, level: Level) -> MetricSource {
        let mut source = MetricSource::new(handle, level);
        source.set_value(Metric::new("NumTypes", 1.0));
        source
    }

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("strata-cache-{}", Uuid::new_v4()))
    }

    #[test]
    fn get_returns_fresh_copy() {
        let cache = MetricCache::in_memory();
        cache.put(&source("proj/src/pkg", Level::Package));

        let mut first = cache.get("proj/src/pkg").unwrap();
        first.set_value(Metric::new("NumTypes", 99.0));
        let second = cache.get("proj/src/pkg").unwrap();
        assert_eq!(second.value("NumTypes").unwrap().value(), 1.0);
        assert!(cache.get("proj/src/nothing").is_none());
    }

    #[test]
    fn remove_subtree_leaves_unrelated_packages() {
        let cache = MetricCache::in_memory();
        cache.put(&source("proj/src/pkg", Level::Package));
        cache.put(&source("proj/src/pkg.Type", Level::Type));
        cache.put(&source("proj/src/pkg.Type#method", Level::Method));
        cache.put(&source("proj/src/otherpkg", Level::Package));

        assert_eq!(cache.remove_subtree("proj/src/pkg"), 3);
        assert!(!cache.contains("proj/src/pkg"));
        assert!(!cache.contains("proj/src/pkg.Type"));
        assert!(!cache.contains("proj/src/pkg.Type#method"));
        assert!(cache.contains("proj/src/otherpkg"));
    }

    #[test]
    fn projects_are_partitioned() {
        let cache = MetricCache::in_memory();
        cache.put(&source("a/src/x", Level::Package));
        cache.put(&source("b/src/x", Level::Package));

        let keys = cache.keys_for_handle("a/src/whatever");
        assert_eq!(keys.into_iter().collect::<Vec<_>>(), vec!["a/src/x".to_string()]);

        cache.clear_project("a");
        assert!(!cache.contains("a/src/x"));
        assert!(cache.contains("b/src/x"));

        cache.clear();
        assert!(!cache.contains("b/src/x"));
    }

    #[test]
    fn remove_single_entry() {
        let cache = MetricCache::in_memory();
        cache.put(&source("p/src/a/A.java#A", Level::Type));
        cache.put(&source("p/src/a/A.java#A.m()", Level::Method));
        assert!(cache.remove("p/src/a/A.java#A"));
        assert!(!cache.remove("p/src/a/A.java#A"));
        assert!(cache.contains("p/src/a/A.java#A.m()"));
    }

    #[test]
    fn package_writes_survive_reopen() {
        let dir = temp_dir();
        {
            let cache = MetricCache::open(&dir).unwrap();
            cache.put(&source("p/src/a/A.java#A", Level::Type));
            cache.put(&source("p/src/a", Level::Package));
        }
        let cache = MetricCache::open(&dir).unwrap();
        assert!(cache.contains("p/src/a"));
        // Written before the package commit, so it was part of the snapshot.
        assert!(cache.contains("p/src/a/A.java#A"));
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn uncommitted_writes_need_flush() {
        let dir = temp_dir();
        {
            let cache = MetricCache::open(&dir).unwrap();
            cache.put(&source("p/src/a/A.java", Level::CompilationUnit));
        }
        assert!(!MetricCache::open(&dir).unwrap().contains("p/src/a/A.java"));

        {
            let cache = MetricCache::open(&dir).unwrap();
            cache.put(&source("p/src/a/A.java", Level::CompilationUnit));
            cache.flush();
        }
        assert!(MetricCache::open(&dir).unwrap().contains("p/src/a/A.java"));
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn corrupt_value_is_a_miss() {
        let cache = MetricCache::in_memory();
        cache
            .segment("p")
            .write()
            .insert("p/src".to_string(), vec![0xc1, 0xff]);
        assert!(cache.contains("p/src"));
        assert!(cache.get("p/src").is_none());
    }

    #[test]
    fn clear_removes_files_of_unloaded_projects() {
        let dir = temp_dir();
        {
            let cache = MetricCache::open(&dir).unwrap();
            cache.put(&source("q", Level::Project));
        }
        let cache = MetricCache::open(&dir).unwrap();
        cache.clear();
        assert!(!MetricCache::open(&dir).unwrap().contains("q"));
        fs::remove_dir_all(&dir).ok();
    }
}
