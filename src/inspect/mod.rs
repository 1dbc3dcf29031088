//! Project inspection: the seam between the scan endpoint and whatever
//! detects project ecosystems in a directory.

pub mod command;
pub mod html;
pub mod markers;

use crate::{
    config::{Config, InspectorKind, ResponseMode},
    errors::{AppError, AppResult},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::Path, sync::Arc};
use thiserror::Error;

pub type DynInspector = Arc<dyn ProjectInspector + Send + Sync + 'static>;

/// One detected project type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Spec {
    #[serde(default)]
    pub subpath: String,
    #[serde(rename = "_contents", default)]
    pub contents: serde_json::Map<String, serde_json::Value>,
    #[serde(rename = "_artifacts", default)]
    pub artifacts: serde_json::Map<String, serde_json::Value>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Structured description of a directory, in the `to_dict()` layout that
/// front ends already consume.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub url: String,
    #[serde(default)]
    pub specs: BTreeMap<String, Spec>,
    #[serde(default)]
    pub children: BTreeMap<String, Project>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Project {
    pub fn has_specs(&self) -> bool {
        !self.specs.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum InspectError {
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("invalid inspector output: {0}")]
    Output(#[from] serde_json::Error),
    #[error("inspector timed out after {0}s")]
    Timeout(u64),
    #[error("inspector exited with status {code}: {stderr}")]
    Exit { code: i32, stderr: String },
    #[error("inspector output exceeds {0} KiB")]
    OutputTooLarge(usize),
    #[error("inspector task failed: {0}")]
    Task(String),
}

#[async_trait]
pub trait ProjectInspector {
    fn name(&self) -> &'static str;
    async fn scan(&self, path: &Path) -> Result<Project, InspectError>;
    fn render_html(&self, project: &Project) -> String {
        html::render(project)
    }
}

pub fn from_config(cfg: &Config) -> anyhow::Result<DynInspector> {
    Ok(match cfg.inspector.kind {
        InspectorKind::Markers => Arc::new(markers::MarkerInspector::new(cfg)),
        InspectorKind::Command => Arc::new(command::CommandInspector::new(cfg)?),
    })
}

/// Body of a successful scan; serializes to `{"html": ..}` or `{"project": ..}`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanPayload {
    Html(String),
    Project(Project),
}

/// Run the inspector on an already resolved directory.
///
/// Every inspector failure ends here as `InspectionFailure`; nothing escapes.
pub async fn inspect(
    inspector: &(dyn ProjectInspector + Send + Sync),
    path: &Path,
    mode: ResponseMode,
) -> AppResult<ScanPayload> {
    let project = match inspector.scan(path).await {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(
                inspector = inspector.name(),
                path = %path.display(),
                error = %e,
                "projspec error scanning {}: {}",
                path.display(),
                e
            );
            return Err(AppError::InspectionFailure(e.to_string()));
        }
    };
    Ok(match mode {
        ResponseMode::Project => ScanPayload::Project(project),
        ResponseMode::Html if !project.has_specs() => ScanPayload::Html(html::NO_PROJECT_HTML.to_string()),
        ResponseMode::Html => ScanPayload::Html(inspector.render_html(&project)),
    })
}
