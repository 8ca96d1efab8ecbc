//! Element model backed by a project directory on disk.
//!
//! Layout: the project directory is the project; each top-level
//! subdirectory is a source root; every directory below a source root that
//! directly holds source files is a package (named by its relative path,
//! dot-separated); each source file is a compilation unit. Sources are read
//! lazily, and `import` lines give package dependencies.
//!
//! Source root and package handles end with `/`, so no handle is a prefix of
//! a sibling (`src/com.acme/` vs `src/com.acme.util/`).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use strata_compute::{ElementModel, ModelError};
use strata_core::{Handle, Level};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

/// Extensions scanned as compilation units.
const SOURCE_EXTENSIONS: &[&str] = &["java", "kt", "scala", "groovy"];

/// Archives kept in the tree but never measured.
const BINARY_EXTENSIONS: &[&str] = &["jar", "zip", "class"];

/// Directory names never scanned.
const SKIPPED_DIRS: &[&str] = &["target", "build"];

#[derive(Debug)]
struct Entry {
    level: Level,
    path: PathBuf,
    children: Vec<Handle>,
    binary: bool,
}

#[derive(Debug)]
pub struct FsModel {
    project: Handle,
    entries: BTreeMap<Handle, Entry>,
    /// Package name to handle, across all source roots.
    packages: BTreeMap<String, Handle>,
}

impl FsModel {
    /// Scan `dir`. The project handle is the directory name.
    pub fn scan(dir: &Path) -> Result<Self> {
        let dir = dir
            .canonicalize()
            .with_context(|| format!("failed to resolve project dir: {}", dir.display()))?;
        let Some(project) = dir.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            bail!("project dir has no usable name: {}", dir.display());
        };

        let mut model = Self {
            project: project.clone(),
            entries: BTreeMap::new(),
            packages: BTreeMap::new(),
        };
        model.entries.insert(
            project.clone(),
            Entry {
                level: Level::Project,
                path: dir.clone(),
                children: Vec::new(),
                binary: false,
            },
        );

        let roots = WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(is_visible);
        for root in roots {
            let root = root.with_context(|| format!("failed to list {}", dir.display()))?;
            if !root.file_type().is_dir() {
                continue;
            }
            let Some(name) = root.file_name().to_str() else { continue };
            let handle = format!("{}/{}/", project, name);
            model.add_child(&project, &handle, Level::SourceRoot, root.path().to_path_buf(), false);
            model.scan_packages(&handle, root.path())?;
        }

        debug!(
            project = %model.project,
            elements = model.entries.len(),
            packages = model.packages.len(),
            "Scanned project directory"
        );
        Ok(model)
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    fn add_child(&mut self, parent: &str, handle: &str, level: Level, path: PathBuf, binary: bool) {
        self.entries.insert(
            handle.to_string(),
            Entry {
                level,
                path,
                children: Vec::new(),
                binary,
            },
        );
        if let Some(parent) = self.entries.get_mut(parent) {
            parent.children.push(handle.to_string());
        }
    }

    /// Every directory under `root` that directly holds units becomes a
    /// package of the source root.
    fn scan_packages(&mut self, root_handle: &str, root: &Path) -> Result<()> {
        // Keyed by directory, so packages come out in path order.
        let mut units: BTreeMap<PathBuf, Vec<(PathBuf, bool)>> = BTreeMap::new();
        let walker = WalkDir::new(root).sort_by_file_name().into_iter().filter_entry(is_visible);
        for entry in walker {
            let entry = entry.with_context(|| format!("failed to walk {}", root.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(ext) = entry.path().extension().and_then(|e| e.to_str()) else { continue };
            let binary = BINARY_EXTENSIONS.contains(&ext);
            if !binary && !SOURCE_EXTENSIONS.contains(&ext) {
                continue;
            }
            let Some(parent) = entry.path().parent() else { continue };
            units
                .entry(parent.to_path_buf())
                .or_default()
                .push((entry.path().to_path_buf(), binary));
        }

        for (dir, files) in units {
            let name = package_name(root, &dir);
            let handle = format!("{}{}/", root_handle, name);
            self.add_child(root_handle, &handle, Level::Package, dir, false);
            self.packages.insert(name, handle.clone());
            for (path, binary) in files {
                let Some(file) = path.file_name().and_then(|n| n.to_str()) else { continue };
                let unit = format!("{}{}", handle, file);
                self.add_child(&handle, &unit, Level::CompilationUnit, path.clone(), binary);
            }
        }
        Ok(())
    }

    fn entry(&self, handle: &str) -> Result<&Entry, ModelError> {
        self.entries
            .get(handle)
            .ok_or_else(|| ModelError::Unresolved(handle.to_string()))
    }
}

impl ElementModel for FsModel {
    fn level(&self, handle: &str) -> Result<Level, ModelError> {
        Ok(self.entry(handle)?.level)
    }

    fn children(&self, handle: &str) -> Result<Vec<Handle>, ModelError> {
        Ok(self.entry(handle)?.children.clone())
    }

    fn is_archive_or_binary(&self, handle: &str) -> bool {
        self.entries.get(handle).is_some_and(|e| e.binary)
    }

    fn source(&self, handle: &str) -> Option<String> {
        let entry = self.entries.get(handle)?;
        if entry.level != Level::CompilationUnit || entry.binary {
            return None;
        }
        match fs::read_to_string(&entry.path) {
            Ok(text) => Some(text),
            Err(e) => {
                warn!(%handle, path = %entry.path.display(), error = %e, "Failed to read source");
                None
            }
        }
    }

    fn dependencies(&self, handle: &str) -> Vec<Handle> {
        let Some(text) = self.source(handle) else {
            return Vec::new();
        };
        let mut deps: Vec<Handle> = imported_packages(&text)
            .filter_map(|name| self.packages.get(name).cloned())
            .collect();
        deps.sort();
        deps.dedup();
        deps
    }
}

/// Package part of every `import` line (`import a.b.C;` gives `a.b`).
fn imported_packages(text: &str) -> impl Iterator<Item = &str> {
    text.lines().filter_map(|line| {
        let rest = line.trim().strip_prefix("import ")?;
        let rest = rest.trim_start_matches("static ").trim().trim_end_matches(';').trim();
        let (package, _) = rest.rsplit_once('.')?;
        Some(package)
    })
}

fn package_name(root: &Path, dir: &Path) -> String {
    let relative = dir.strip_prefix(root).unwrap_or(dir);
    let parts: Vec<_> = relative
        .components()
        .filter_map(|c| c.as_os_str().to_str())
        .collect();
    if parts.is_empty() {
        "(default)".to_string()
    } else {
        parts.join(".")
    }
}

/// Hidden directories and build output are skipped; the walk root is kept.
fn is_visible(entry: &DirEntry) -> bool {
    if entry.depth() == 0 || !entry.file_type().is_dir() {
        return true;
    }
    entry
        .file_name()
        .to_str()
        .is_some_and(|name| !name.starts_with('.') && !SKIPPED_DIRS.contains(&name))
}
