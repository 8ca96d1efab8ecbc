//! Handle helpers.
//!
//! A handle is the stable string identity of one code element. Descendant
//! handles start with their ancestor's handle, and the text before the first
//! `/` names the top-level project.

/// Stable external identity of one code element.
pub type Handle = String;

/// Separator between the project name and the rest of a handle.
pub const PROJECT_SEPARATOR: char = '/';

/// Project name of a handle (everything before the first `/`).
pub fn project_of(handle: &str) -> &str {
    match handle.find(PROJECT_SEPARATOR) {
        Some(idx) => &handle[..idx],
        None => handle,
    }
}

/// Whether `handle` denotes a top-level project.
pub fn is_project(handle: &str) -> bool {
    !handle.is_empty() && !handle.contains(PROJECT_SEPARATOR)
}

/// Whether `handle` lies under `prefix` (literal prefix match, inclusive).
pub fn is_under(handle: &str, prefix: &str) -> bool {
    handle.starts_with(prefix)
}

/// Whether `ancestor` is a strict prefix of `handle`.
pub fn is_strict_ancestor(ancestor: &str, handle: &str) -> bool {
    ancestor.len() < handle.len() && handle.starts_with(ancestor)
}
