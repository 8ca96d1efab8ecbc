use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StrataError;

/// Rank of an element in the containment hierarchy.
///
/// Ordering follows containment: a `Method` is the smallest element and a
/// `Project` the largest, so `Level::Method < Level::Project`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Level {
    Method = 1,
    Type = 2,
    CompilationUnit = 3,
    Package = 4,
    SourceRoot = 5,
    Project = 6,
}

impl Level {
    /// All levels, smallest first.
    pub const ALL: [Level; 6] = [
        Level::Method,
        Level::Type,
        Level::CompilationUnit,
        Level::Package,
        Level::SourceRoot,
        Level::Project,
    ];

    /// Stable name, also used as the scope ("per") tag of averages and maxima.
    pub fn name(self) -> &'static str {
        match self {
            Level::Method => "method",
            Level::Type => "type",
            Level::CompilationUnit => "compilationUnit",
            Level::Package => "package",
            Level::SourceRoot => "sourceRoot",
            Level::Project => "project",
        }
    }

    /// Whether a change at this level invalidates the whole cached subtree.
    pub fn purges_subtree(self) -> bool {
        self >= Level::CompilationUnit
    }

    /// Whether storing a node at this level commits the cache segment.
    pub fn commits_cache(self) -> bool {
        self >= Level::Package
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Level {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Level::ALL
            .into_iter()
            .find(|level| level.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| StrataError::Config(format!("unknown level: {}", s)))
    }
}
