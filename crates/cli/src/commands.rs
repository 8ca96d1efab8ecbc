use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use strata_compute::{Change, ElementModel, Engine, InMemoryModel, LogListener};
use strata_core::{Handle, StrataConfig};
use strata_storage::MetricCache;
use tracing::info;

use crate::cli::Command;
use crate::fs_model::FsModel;
use crate::report;

pub fn run(command: Command, config: &StrataConfig) -> Result<()> {
    match command {
        Command::Compute { model, handles } => compute(config, &model.model, handles),
        Command::Show { handle, model } => show(config, &handle, model.as_deref()),
        Command::Export { handle, output } => export(config, &handle, output.as_deref()),
        Command::Remove { model, handle } => remove(config, &model.model, &handle),
        Command::Clear { project } => clear(config, project.as_deref()),
        Command::Deps { project, model, json } => deps(config, &project, model.as_deref(), json),
    }
}

/// Load a model from a directory (scanned) or a JSON manifest file.
/// Returns the model with its project handles.
fn load_model(path: &Path) -> Result<(Arc<dyn ElementModel>, Vec<Handle>)> {
    if path.is_dir() {
        let model = FsModel::scan(path)?;
        let projects = vec![model.project().to_string()];
        return Ok((Arc::new(model), projects));
    }
    let text = fs::read_to_string(path).with_context(|| format!("failed to read model: {}", path.display()))?;
    let model =
        InMemoryModel::from_json(&text).with_context(|| format!("failed to parse model: {}", path.display()))?;
    let projects = model.projects();
    Ok((Arc::new(model), projects))
}

fn open_engine(config: &StrataConfig, model: Option<&Path>) -> Result<Engine> {
    let model: Arc<dyn ElementModel> = match model {
        Some(path) => load_model(path)?.0,
        None => Arc::new(InMemoryModel::new()),
    };
    let engine = Engine::open(config, model).context("failed to open engine")?;
    engine.add_listener(Arc::new(LogListener));
    Ok(engine)
}

fn compute(config: &StrataConfig, model_path: &Path, handles: Vec<String>) -> Result<()> {
    let (model, projects) = load_model(model_path)?;
    let targets = if handles.is_empty() { projects } else { handles };
    if targets.is_empty() {
        bail!("model has no projects: {}", model_path.display());
    }

    let engine = Engine::open(config, model).context("failed to open engine")?;
    engine.add_listener(Arc::new(LogListener));
    engine.schedule(targets.iter().map(|h| Change::changed(h.as_str())).collect());
    let executed = engine.execute();

    let metrics = engine.scheduler_metrics();
    info!(executed, failures = metrics.failures, rollups = metrics.rollups, "Compute finished");
    for handle in &targets {
        match engine.metrics(handle) {
            Some(source) => print!("{}", report::format_source(&source)),
            None => println!("{}: no metrics", handle),
        }
    }
    engine.shutdown();
    Ok(())
}

fn show(config: &StrataConfig, handle: &str, model: Option<&Path>) -> Result<()> {
    let engine = open_engine(config, model)?;
    let source = match engine.metrics(handle) {
        Some(source) => source,
        None if model.is_some() => engine
            .compute_now(handle)
            .with_context(|| format!("failed to compute '{}'", handle))?,
        None => bail!("no cached metrics for '{}' (pass --model to compute them)", handle),
    };
    print!("{}", report::format_source(&source));
    engine.shutdown();
    Ok(())
}

fn export(config: &StrataConfig, handle: &str, output: Option<&Path>) -> Result<()> {
    let cache = MetricCache::open(&config.storage.state_dir).context("failed to open metric cache")?;
    let Some(tree) = report::export_tree(&cache, handle) else {
        bail!("no cached metrics for '{}'", handle);
    };
    let text = serde_json::to_string_pretty(&tree).context("failed to serialize metric tree")?;
    match output {
        Some(path) => {
            fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))?;
            info!(handle, path = %path.display(), "Exported metric tree");
        }
        None => println!("{}", text),
    }
    Ok(())
}

fn remove(config: &StrataConfig, model_path: &Path, handle: &str) -> Result<()> {
    let (model, _) = load_model(model_path)?;
    if model.level(handle).is_ok() {
        bail!("'{}' still exists in the model; delete it first", handle);
    }
    let engine = Engine::open(config, model).context("failed to open engine")?;
    engine.add_listener(Arc::new(LogListener));
    engine.schedule(vec![Change::removed(handle)]);
    engine.execute();

    let project = strata_core::handle::project_of(handle);
    if let Some(source) = engine.metrics(project) {
        print!("{}", report::format_source(&source));
    }
    engine.shutdown();
    Ok(())
}

fn clear(config: &StrataConfig, project: Option<&str>) -> Result<()> {
    let cache = MetricCache::open(&config.storage.state_dir).context("failed to open metric cache")?;
    match project {
        Some(project) => cache.clear_project(project),
        None => cache.clear(),
    }
    Ok(())
}

fn deps(config: &StrataConfig, project: &str, model: Option<&Path>, json: bool) -> Result<()> {
    let engine = open_engine(config, model)?;
    let mut map = engine.efferent_dependencies(project);
    if map.is_empty() && model.is_some() {
        engine
            .compute_now(project)
            .with_context(|| format!("failed to compute '{}'", project))?;
        map = engine.efferent_dependencies(project);
    }
    if json {
        println!("{}", serde_json::to_string_pretty(&map).context("failed to serialize dependency map")?);
    } else {
        print!("{}", report::format_dependencies(&map));
    }
    engine.shutdown();
    Ok(())
}
