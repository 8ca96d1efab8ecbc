//! Element model: the narrow interface through which the engine learns the
//! structure of the code base it measures.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use strata_core::{Handle, Level};

/// Opaque per-child data a parent can hand to a child node before it is
/// computed (for example an already-parsed syntax subtree). Never persisted.
pub type ChildContext = Arc<dyn Any + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("unresolved element: {0}")]
    Unresolved(Handle),
    #[error("invalid model: {0}")]
    Invalid(String),
}

/// Structure of the code base, resolved by handle.
pub trait ElementModel: Send + Sync {
    /// Level of the element.
    fn level(&self, handle: &str) -> Result<Level, ModelError>;

    /// Handles of the element's direct children, in model order.
    fn children(&self, handle: &str) -> Result<Vec<Handle>, ModelError>;

    /// Children together with optional context for each.
    fn children_with_context(
        &self,
        handle: &str,
    ) -> Result<Vec<(Handle, Option<ChildContext>)>, ModelError> {
        Ok(self.children(handle)?.into_iter().map(|h| (h, None)).collect())
    }

    /// Archive or binary entries are never measured.
    fn is_archive_or_binary(&self, _handle: &str) -> bool {
        false
    }

    /// Source text of the element, if the model has it.
    fn source(&self, _handle: &str) -> Option<String> {
        None
    }

    /// Package handles this element depends on.
    fn dependencies(&self, _handle: &str) -> Vec<Handle> {
        Vec::new()
    }
}

// ── In-memory model ───────────────────────────────────────────

/// One element of a model manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementSpec {
    pub handle: Handle,
    pub level: Level,
    #[serde(default)]
    pub children: Vec<Handle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub binary: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<Handle>,
}

impl ElementSpec {
    fn new(handle: &str, level: Level) -> Self {
        Self {
            handle: handle.to_string(),
            level,
            children: Vec::new(),
            source: None,
            binary: false,
            dependencies: Vec::new(),
        }
    }
}

/// Serialized form of an [`InMemoryModel`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    pub elements: Vec<ElementSpec>,
}

/// Mutable model held entirely in memory.
///
/// Used for manifests, tests and embedding. Mutations are visible to the
/// engine immediately, so a caller edits the model and then schedules the
/// matching change.
#[derive(Debug, Default)]
pub struct InMemoryModel {
    elements: RwLock<BTreeMap<Handle, ElementSpec>>,
}

impl InMemoryModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> ModelBuilder {
        ModelBuilder::default()
    }

    pub fn from_manifest(manifest: Manifest) -> Result<Self, ModelError> {
        let mut elements = BTreeMap::new();
        for element in manifest.elements {
            if elements.contains_key(&element.handle) {
                return Err(ModelError::Invalid(format!("duplicate element {}", element.handle)));
            }
            elements.insert(element.handle.clone(), element);
        }
        for element in elements.values() {
            if let Some(missing) = element.children.iter().find(|c| !elements.contains_key(*c)) {
                return Err(ModelError::Invalid(format!(
                    "{} lists unknown child {}",
                    element.handle, missing
                )));
            }
            let mut seen = BTreeSet::new();
            if let Some(repeated) = element.children.iter().find(|c| !seen.insert(c.as_str())) {
                return Err(ModelError::Invalid(format!(
                    "{} lists child {} more than once",
                    element.handle, repeated
                )));
            }
        }
        if let Some(handle) = find_cycle(&elements) {
            return Err(ModelError::Invalid(format!("{} is its own descendant", handle)));
        }
        Ok(Self {
            elements: RwLock::new(elements),
        })
    }

    /// Parse a JSON manifest.
    pub fn from_json(text: &str) -> Result<Self, ModelError> {
        let manifest: Manifest =
            serde_json::from_str(text).map_err(|e| ModelError::Invalid(e.to_string()))?;
        Self::from_manifest(manifest)
    }

    pub fn to_manifest(&self) -> Manifest {
        Manifest {
            elements: self.read().values().cloned().collect(),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<Handle, ElementSpec>> {
        self.elements.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<Handle, ElementSpec>> {
        self.elements.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert an element, attaching it to `parent` when given.
    pub fn insert(&self, parent: Option<&str>, handle: &str, level: Level) {
        let mut elements = self.write();
        elements
            .entry(handle.to_string())
            .or_insert_with(|| ElementSpec::new(handle, level));
        if let Some(parent) = parent {
            if let Some(parent) = elements.get_mut(parent) {
                if !parent.children.iter().any(|c| c == handle) {
                    parent.children.push(handle.to_string());
                }
            }
        }
    }

    /// Remove an element and all of its descendants, detaching it from its
    /// parent.
    pub fn remove(&self, handle: &str) -> bool {
        let mut elements = self.write();
        let mut pending = vec![handle.to_string()];
        let mut removed = false;
        while let Some(next) = pending.pop() {
            if let Some(element) = elements.remove(&next) {
                removed = true;
                pending.extend(element.children);
            }
        }
        for element in elements.values_mut() {
            element.children.retain(|c| c != handle);
        }
        removed
    }

    pub fn set_source(&self, handle: &str, source: impl Into<String>) {
        if let Some(element) = self.write().get_mut(handle) {
            element.source = Some(source.into());
        }
    }

    pub fn set_dependencies(&self, handle: &str, dependencies: Vec<Handle>) {
        if let Some(element) = self.write().get_mut(handle) {
            element.dependencies = dependencies;
        }
    }

    pub fn contains(&self, handle: &str) -> bool {
        self.read().contains_key(handle)
    }

    /// Handles of every project-level element.
    pub fn projects(&self) -> Vec<Handle> {
        self.read()
            .values()
            .filter(|e| e.level == Level::Project)
            .map(|e| e.handle.clone())
            .collect()
    }
}

impl ElementModel for InMemoryModel {
    fn level(&self, handle: &str) -> Result<Level, ModelError> {
        self.read()
            .get(handle)
            .map(|e| e.level)
            .ok_or_else(|| ModelError::Unresolved(handle.to_string()))
    }

    fn children(&self, handle: &str) -> Result<Vec<Handle>, ModelError> {
        self.read()
            .get(handle)
            .map(|e| e.children.clone())
            .ok_or_else(|| ModelError::Unresolved(handle.to_string()))
    }

    fn is_archive_or_binary(&self, handle: &str) -> bool {
        self.read().get(handle).map(|e| e.binary).unwrap_or(false)
    }

    fn source(&self, handle: &str) -> Option<String> {
        self.read().get(handle).and_then(|e| e.source.clone())
    }

    fn dependencies(&self, handle: &str) -> Vec<Handle> {
        self.read()
            .get(handle)
            .map(|e| e.dependencies.clone())
            .unwrap_or_default()
    }
}

/// Fluent construction of an [`InMemoryModel`].
#[derive(Debug, Default)]
pub struct ModelBuilder {
    model: InMemoryModel,
}

impl ModelBuilder {
    pub fn project(self, handle: &str) -> Self {
        self.model.insert(None, handle, Level::Project);
        self
    }

    pub fn child(self, parent: &str, handle: &str, level: Level) -> Self {
        self.model.insert(Some(parent), handle, level);
        self
    }

    pub fn source(self, handle: &str, source: &str) -> Self {
        self.model.set_source(handle, source);
        self
    }

    pub fn binary(self, handle: &str) -> Self {
        if let Some(element) = self.model.write().get_mut(handle) {
            element.binary = true;
        }
        self
    }

    pub fn depends_on(self, handle: &str, target: &str) -> Self {
        if let Some(element) = self.model.write().get_mut(handle) {
            if !element.dependencies.iter().any(|d| d == target) {
                element.dependencies.push(target.to_string());
            }
        }
        self
    }

    pub fn build(self) -> InMemoryModel {
        self.model
    }
}

/// First element found on a parent/child cycle, by depth-first search.
fn find_cycle(elements: &BTreeMap<Handle, ElementSpec>) -> Option<Handle> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Open,
        Done,
    }

    let mut marks: BTreeMap<&str, Mark> = BTreeMap::new();
    for start in elements.keys() {
        if marks.contains_key(start.as_str()) {
            continue;
        }
        // (element, index of the next child to visit)
        let mut stack = vec![(start.as_str(), 0usize)];
        marks.insert(start.as_str(), Mark::Open);
        while let Some((handle, next)) = stack.pop() {
            let children = elements.get(handle).map(|e| e.children.as_slice()).unwrap_or_default();
            let Some(child) = children.get(next) else {
                marks.insert(handle, Mark::Done);
                continue;
            };
            stack.push((handle, next + 1));
            match marks.get(child.as_str()) {
                Some(Mark::Open) => return Some(child.clone()),
                Some(Mark::Done) => {}
                None => {
                    marks.insert(child.as_str(), Mark::Open);
                    stack.push((child.as_str(), 0));
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> InMemoryModel {
        InMemoryModel::builder()
            .project("p")
            .child("p", "p/src", Level::SourceRoot)
            .child("p/src", "p/src/a", Level::Package)
            .child("p/src/a", "p/src/a/A.java", Level::CompilationUnit)
            .child("p/src/a", "p/src/a/lib.jar", Level::CompilationUnit)
            .binary("p/src/a/lib.jar")
            .source("p/src/a/A.java", "class A {}")
            .build()
    }

    #[test]
    fn resolves_structure() {
        let model = sample();
        assert_eq!(model.level("p/src/a").unwrap(), Level::Package);
        assert_eq!(
            model.children("p/src/a").unwrap(),
            vec!["p/src/a/A.java".to_string(), "p/src/a/lib.jar".to_string()]
        );
        assert!(model.is_archive_or_binary("p/src/a/lib.jar"));
        assert_eq!(model.source("p/src/a/A.java").as_deref(), Some("class A {}"));
        assert!(matches!(model.level("p/nope"), Err(ModelError::Unresolved(_))));
    }

    #[test]
    fn default_context_is_none() {
        let model = sample();
        let children = model.children_with_context("p").unwrap();
        assert_eq!(children.len(), 1);
        assert!(children[0].1.is_none());
    }

    #[test]
    fn remove_detaches_subtree() {
        let model = sample();
        assert!(model.remove("p/src/a"));
        assert!(!model.contains("p/src/a/A.java"));
        assert!(model.children("p/src").unwrap().is_empty());
        assert!(!model.remove("p/src/a"));
    }

    #[test]
    fn manifest_round_trip_through_json() {
        let model = sample();
        let json = serde_json::to_string(&model.to_manifest()).unwrap();
        let back = InMemoryModel::from_json(&json).unwrap();
        assert_eq!(back.projects(), vec!["p".to_string()]);
        assert!(back.is_archive_or_binary("p/src/a/lib.jar"));
    }

    #[test]
    fn manifest_rejects_dangling_children() {
        let json = r#"{"elements":[{"handle":"p","level":"project","children":["p/src"]}]}"#;
        assert!(matches!(InMemoryModel::from_json(json), Err(ModelError::Invalid(_))));
    }

    #[test]
    fn manifest_rejects_repeated_children() {
        let json = r#"{"elements":[
            {"handle":"p","level":"project","children":["p/src","p/src"]},
            {"handle":"p/src","level":"sourceRoot"}
        ]}"#;
        let err = InMemoryModel::from_json(json).unwrap_err();
        assert!(err.to_string().contains("more than once"), "{err}");
    }

    #[test]
    fn manifest_rejects_cycles() {
        let json = r#"{"elements":[
            {"handle":"p","level":"project","children":["p/src"]},
            {"handle":"p/src","level":"sourceRoot","children":["p/src/a"]},
            {"handle":"p/src/a","level":"package","children":["p/src"]}
        ]}"#;
        let err = InMemoryModel::from_json(json).unwrap_err();
        assert!(err.to_string().contains("own descendant"), "{err}");

        let shared = r#"{"elements":[
            {"handle":"p","level":"project","children":["p/a","p/b"]},
            {"handle":"p/a","level":"package","children":["p/c"]},
            {"handle":"p/b","level":"package","children":["p/c"]},
            {"handle":"p/c","level":"compilationUnit"}
        ]}"#;
        assert!(InMemoryModel::from_json(shared).is_ok());
    }
}
