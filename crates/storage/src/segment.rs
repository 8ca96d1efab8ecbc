use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::StorageError;

/// Magic bytes at the start of every segment file.
pub const MAGIC: &[u8; 6] = b"STRATA";

/// Current segment file format version. Files of any other version load empty.
pub const FORMAT_VERSION: u32 = 1;

const HEADER_LEN: usize = MAGIC.len() + 4;

/// File name of a project's segment: a readable project prefix plus a hash
/// suffix so that distinct projects never collide after sanitizing.
pub fn segment_file_name(project: &str) -> String {
    let sanitized: String = project
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let digest = Sha256::digest(project.as_bytes());
    let suffix: String = digest.iter().take(6).map(|b| format!("{:02x}", b)).collect();
    format!("{}-{}.seg", sanitized, suffix)
}

/// One project's partition of the cache.
///
/// Values are opaque encoded records keyed by handle. A segment with a path
/// persists to that file on [`Segment::commit`]; without one it is volatile.
pub struct Segment {
    project: String,
    path: Option<PathBuf>,
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
    dirty: AtomicBool,
    commit_lock: Mutex<()>,
}

impl Segment {
    /// Empty volatile segment.
    pub fn volatile(project: &str) -> Self {
        Self::with_entries(project, None, BTreeMap::new())
    }

    /// Load a segment from `dir`. Unreadable or incompatible files yield an
    /// empty segment, which is then recomputed from scratch.
    pub fn load(project: &str, dir: &Path) -> Self {
        let path = dir.join(segment_file_name(project));
        let entries = match read_entries(&path) {
            Ok(entries) => {
                debug!(project, entries = entries.len(), "Loaded cache segment");
                entries
            }
            Err(e) => {
                warn!(project, path = %path.display(), error = %e, "Discarding unreadable cache segment");
                BTreeMap::new()
            }
        };
        Self::with_entries(project, Some(path), entries)
    }

    fn with_entries(project: &str, path: Option<PathBuf>, entries: BTreeMap<String, Vec<u8>>) -> Self {
        Self {
            project: project.to_string(),
            path,
            entries: RwLock::new(entries),
            dirty: AtomicBool::new(false),
            commit_lock: Mutex::new(()),
        }
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Write access; marks the segment dirty.
    pub fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.dirty.store(true, Ordering::Release);
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Persist the segment if it has a backing file. Volatile segments just
    /// drop their dirty flag.
    pub fn commit(&self) -> Result<(), StorageError> {
        let _guard = self.commit_lock.lock().unwrap_or_else(|e| e.into_inner());
        let Some(path) = &self.path else {
            self.dirty.store(false, Ordering::Release);
            return Ok(());
        };
        // Cleared before the snapshot so concurrent writes re-dirty it.
        self.dirty.store(false, Ordering::Release);
        let entries = self.read();
        if let Err(e) = write_entries(path, &entries) {
            self.dirty.store(true, Ordering::Release);
            return Err(e);
        }
        debug!(project = %self.project, entries = entries.len(), "Committed cache segment");
        Ok(())
    }

    /// Delete the backing file, if any.
    pub fn delete_file(&self) -> Result<(), StorageError> {
        let _guard = self.commit_lock.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(path) = &self.path {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.dirty.store(false, Ordering::Release);
        Ok(())
    }
}

// ── File format ───────────────────────────────────────────────

/// Serialize entries as a header followed by length-prefixed msgpack tuples.
///
/// Layout:
///   - 6 bytes: `STRATA`
///   - 4 bytes: u32 little-endian format version
///   - per entry: u32 little-endian payload length, then msgpack `(key, value)`
///
/// The file is written next to its destination and renamed into place.
pub fn write_entries(path: &Path, entries: &BTreeMap<String, Vec<u8>>) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("seg.tmp");
    {
        let mut file = io::BufWriter::new(fs::File::create(&tmp)?);
        file.write_all(MAGIC)?;
        file.write_all(&FORMAT_VERSION.to_le_bytes())?;

        for (key, value) in entries {
            let tuple: (&String, &Vec<u8>) = (key, value);
            let encoded = rmp_serde::to_vec(&tuple)?;
            let len = encoded.len() as u32;
            file.write_all(&len.to_le_bytes())?;
            file.write_all(&encoded)?;
        }
        file.flush()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Load entries written by [`write_entries`]. A missing file is empty.
pub fn read_entries(path: &Path) -> Result<BTreeMap<String, Vec<u8>>, StorageError> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => return Err(e.into()),
    };

    if data.len() < HEADER_LEN || &data[..MAGIC.len()] != MAGIC {
        return Err(StorageError::BadHeader("missing magic".to_string()));
    }
    let version = read_u32(&data, MAGIC.len());
    if version != FORMAT_VERSION {
        return Err(StorageError::BadHeader(format!(
            "format version {} (expected {})",
            version, FORMAT_VERSION
        )));
    }

    let mut entries = BTreeMap::new();
    let mut pos = HEADER_LEN;
    while pos < data.len() {
        if pos + 4 > data.len() {
            return Err(truncated());
        }
        let len = read_u32(&data, pos) as usize;
        pos += 4;
        if pos + len > data.len() {
            return Err(truncated());
        }
        let (key, value): (String, Vec<u8>) = rmp_serde::from_slice(&data[pos..pos + len])?;
        entries.insert(key, value);
        pos += len;
    }
    Ok(entries)
}

fn read_u32(data: &[u8], pos: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&data[pos..pos + 4]);
    u32::from_le_bytes(buf)
}

fn truncated() -> StorageError {
    StorageError::Io(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated segment entry"))
}
