use super::{InspectError, Project, ProjectInspector, Spec};
use crate::config::Config;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::{
    collections::BTreeSet,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

/// A project type recognised by the presence of any of its marker entries.
struct Rule {
    spec: &'static str,
    markers: &'static [&'static str],
    artifacts: &'static [(&'static str, &'static str)],
}

const RULES: &[Rule] = &[
    Rule { spec: "git_repo", markers: &[".git"], artifacts: &[] },
    Rule {
        spec: "python_library",
        markers: &["pyproject.toml", "setup.py", "setup.cfg"],
        artifacts: &[("wheel", "python -m build --wheel"), ("sdist", "python -m build --sdist")],
    },
    Rule { spec: "poetry", markers: &["poetry.lock"], artifacts: &[("lock", "poetry lock"), ("install", "poetry install")] },
    Rule { spec: "uv", markers: &["uv.lock"], artifacts: &[("lock", "uv lock"), ("sync", "uv sync")] },
    Rule { spec: "pixi", markers: &["pixi.toml", "pixi.lock"], artifacts: &[("lock", "pixi lock"), ("install", "pixi install")] },
    Rule {
        spec: "conda_project",
        markers: &["conda-project.yml", "conda-project.yaml"],
        artifacts: &[("prepare", "conda project prepare")],
    },
    Rule { spec: "conda_recipe", markers: &["meta.yaml", "recipe.yaml"], artifacts: &[("package", "conda build .")] },
    Rule { spec: "node", markers: &["package.json"], artifacts: &[("install", "npm install")] },
    Rule { spec: "yarn", markers: &["yarn.lock", ".yarnrc.yml"], artifacts: &[("install", "yarn install")] },
    Rule { spec: "rust", markers: &["Cargo.toml"], artifacts: &[("build", "cargo build"), ("test", "cargo test")] },
    Rule { spec: "md_book", markers: &["book.toml"], artifacts: &[("book", "mdbook build")] },
    Rule { spec: "r_t_d", markers: &[".readthedocs.yaml", ".readthedocs.yml"], artifacts: &[] },
    Rule { spec: "data_package", markers: &["datapackage.json"], artifacts: &[] },
    Rule { spec: "vs_code", markers: &[".vscode"], artifacts: &[] },
    Rule { spec: "jetbrains_ide", markers: &[".idea"], artifacts: &[] },
    Rule { spec: "zed", markers: &[".zed"], artifacts: &[] },
];

const SKIP_DIRS: &[&str] = &["node_modules", "target", "__pycache__"];

/// Detects project types from the entries present in a directory. Files are
/// never opened.
pub struct MarkerInspector {
    max_depth: usize,
    timeout: Duration,
}

impl MarkerInspector {
    pub fn new(cfg: &Config) -> Self {
        Self::with_depth(cfg.inspector.max_depth).with_timeout(cfg.inspector.timeout_s)
    }

    pub fn with_depth(max_depth: usize) -> Self {
        Self { max_depth, timeout: Duration::from_secs(30) }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Run a blocking walk with a deadline. On expiry the walk thread is left to
/// finish on its own; its result is discarded.
async fn run_walk<F>(timeout: Duration, walk: F) -> Result<Project, InspectError>
where
    F: FnOnce() -> Result<Project, InspectError> + Send + 'static,
{
    match tokio::time::timeout(timeout, tokio::task::spawn_blocking(walk)).await {
        Ok(joined) => joined.map_err(|e| InspectError::Task(e.to_string()))?,
        Err(_) => Err(InspectError::Timeout(timeout.as_secs())),
    }
}

#[async_trait]
impl ProjectInspector for MarkerInspector {
    fn name(&self) -> &'static str { "markers" }

    async fn scan(&self, path: &Path) -> Result<Project, InspectError> {
        let path = path.to_path_buf();
        let depth = self.max_depth;
        run_walk(self.timeout, move || scan_dir(&path, &path, depth)).await
    }
}

fn entry_names(dir: &Path) -> Result<(BTreeSet<String>, Vec<PathBuf>), InspectError> {
    let mut names = BTreeSet::new();
    let mut subdirs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        // file_type does not follow symlinks, so linked dirs are not descended into
        if entry.file_type()?.is_dir() && !name.starts_with('.') && !SKIP_DIRS.contains(&name.as_str()) {
            subdirs.push(entry.path());
        }
        names.insert(name);
    }
    subdirs.sort();
    Ok((names, subdirs))
}

fn subpath(root: &Path, dir: &Path) -> String {
    dir.strip_prefix(root)
        .map(|p| p.components().map(|c| c.as_os_str().to_string_lossy().into_owned()).collect::<Vec<_>>().join("/"))
        .unwrap_or_default()
}

fn scan_dir(root: &Path, dir: &Path, depth: usize) -> Result<Project, InspectError> {
    let (names, subdirs) = entry_names(dir)?;
    let sub = subpath(root, dir);
    let mut project = Project { url: dir.to_string_lossy().into_owned(), ..Default::default() };

    for rule in RULES {
        let hits: Vec<&str> = rule.markers.iter().copied().filter(|m| names.contains(*m)).collect();
        if hits.is_empty() {
            continue;
        }
        let mut spec = Spec { subpath: sub.clone(), ..Default::default() };
        spec.contents.insert("markers".into(), json!(hits));
        for (name, cmd) in rule.artifacts {
            spec.artifacts.insert((*name).to_string(), Value::String((*cmd).to_string()));
        }
        project.specs.insert(rule.spec.to_string(), spec);
    }

    if depth > 0 {
        for child_dir in subdirs {
            // unreadable children are skipped rather than failing the whole scan
            let Ok(child) = scan_dir(root, &child_dir, depth - 1) else { continue };
            // keep spec-less directories that lead to a reported descendant
            if child.has_specs() || !child.children.is_empty() {
                project.children.insert(subpath(root, &child_dir), child);
            }
        }
    }
    Ok(project)
}
