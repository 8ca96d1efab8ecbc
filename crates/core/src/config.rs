use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::StrataError;
use crate::level::Level;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_bool(key: &str) -> Option<bool> {
    env_opt(key).and_then(|v| match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            tracing::warn!(key, value = %v, "Ignoring unparseable boolean env var");
            None
        }
    })
}

// ── Top-level config ──────────────────────────────────────────

/// Full engine configuration.
///
/// Parsed from an optional `strata.toml`, then overridden by `STRATA_*`
/// environment variables. Every section falls back to its defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrataConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl StrataConfig {
    /// Load config from `path` (if given), then apply env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, StrataError> {
        let mut config = match path {
            Some(path) => {
                let text = fs::read_to_string(path)?;
                Self::from_toml_str(&text)?
            }
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Parse config from TOML text (no env overrides).
    pub fn from_toml_str(text: &str) -> Result<Self, StrataError> {
        toml::from_str(text).map_err(|e| StrataError::Config(e.to_string()))
    }

    /// Override fields from `STRATA_*` environment variables.
    pub fn apply_env(&mut self) {
        if let Some(dir) = env_opt("STRATA_STATE_DIR") {
            self.storage.state_dir = PathBuf::from(dir);
        }
        if let Some(headless) = env_bool("STRATA_HEADLESS") {
            self.scheduler.headless = headless;
        }
        if let Some(refresh) = env_bool("STRATA_REFRESH_ANCESTORS") {
            self.scheduler.refresh_ancestors = refresh;
        }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!("  storage:     state_dir={}", self.storage.state_dir.display());
        tracing::info!(
            "  scheduler:   headless={}, refresh_ancestors={}",
            self.scheduler.headless,
            self.scheduler.refresh_ancestors
        );
        tracing::info!(
            "  pipeline:    calculators={}, propagators={}",
            self.pipeline
                .calculators
                .as_ref()
                .map(|c| c.len().to_string())
                .unwrap_or_else(|| "all".to_string()),
            self.pipeline
                .propagators
                .as_ref()
                .map(|p| p.len().to_string())
                .unwrap_or_else(|| "defaults".to_string()),
        );
    }
}

// ── Storage ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding one cache segment file per project.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

fn default_state_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("strata")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
        }
    }
}

// ── Scheduler ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Run commands on the caller's thread instead of the background worker.
    #[serde(default)]
    pub headless: bool,
    /// Invalidate and recompute ancestors after every change.
    #[serde(default = "default_true")]
    pub refresh_ancestors: bool,
}

fn default_true() -> bool {
    true
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            headless: false,
            refresh_ancestors: true,
        }
    }
}

// ── Pipeline ──────────────────────────────────────────────────

/// How a propagated metric is reduced over children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropagationKind {
    Sum,
    Avg,
    Max,
}

/// Declares that `metric`, measured at `level`, is propagated upwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropagationSpec {
    pub metric: String,
    pub level: Level,
    pub kinds: Vec<PropagationKind>,
}

/// Calculator and propagator selection.
///
/// `None` means "use everything the registry provides".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Enabled calculator ids, in invocation order.
    #[serde(default)]
    pub calculators: Option<Vec<String>>,
    /// Propagation declarations.
    #[serde(default)]
    pub propagators: Option<Vec<PropagationSpec>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let config = StrataConfig::from_toml_str("").unwrap();
        assert!(!config.scheduler.headless);
        assert!(config.scheduler.refresh_ancestors);
        assert!(config.pipeline.calculators.is_none());
        assert!(config.storage.state_dir.ends_with("strata"));
    }

    #[test]
    fn parses_pipeline_section() {
        let text = r#"
            [storage]
            state_dir = "/tmp/strata-state"

            [scheduler]
            headless = true

            [pipeline]
            calculators = ["NumTypes", "NumMethods"]

            [[pipeline.propagators]]
            metric = "NumTypes"
            level = "compilationUnit"
            kinds = ["sum"]

            [[pipeline.propagators]]
            metric = "NumMethods"
            level = "type"
            kinds = ["sum", "avg", "max"]
        "#;
        let config = StrataConfig::from_toml_str(text).unwrap();
        assert_eq!(config.storage.state_dir, PathBuf::from("/tmp/strata-state"));
        assert!(config.scheduler.headless);
        assert!(config.scheduler.refresh_ancestors);
        assert_eq!(config.pipeline.calculators.as_ref().unwrap().len(), 2);

        let props = config.pipeline.propagators.unwrap();
        assert_eq!(props[0].level, Level::CompilationUnit);
        assert_eq!(
            props[1].kinds,
            vec![PropagationKind::Sum, PropagationKind::Avg, PropagationKind::Max]
        );
    }

    #[test]
    fn invalid_toml_is_config_error() {
        let err = StrataConfig::from_toml_str("[scheduler\nheadless = ").unwrap_err();
        assert!(matches!(err, StrataError::Config(_)));
    }
}
