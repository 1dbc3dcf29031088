use serde::Deserialize;
use serde_with::{serde_as, DurationSeconds};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub root: Root,
    pub server: Server,
    pub auth: Auth,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub scan: Scan,
    #[serde(default)]
    pub inspector: Inspector,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Root { pub root_dir: PathBuf }

#[derive(Debug, Deserialize, Clone)]
pub struct Server {
    pub bind_addr: String,
    pub port: u16,
    #[serde(default = "default_base_path")]
    pub base_path: String,
}
fn default_base_path() -> String { "/".to_string() }

#[derive(Debug, Deserialize, Clone)]
pub struct Auth {
    pub token: String,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Limits {
    pub global_rps: u32,
    pub global_burst: u32,
    pub token_rps: u32,
    pub token_burst: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self { global_rps: 20, global_burst: 40, token_rps: 10, token_burst: 20 }
    }
}

/// Which payload the scan endpoint answers with. One per deployment.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    #[default]
    Project,
    Html,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Scan {
    #[serde(default)]
    pub response: ResponseMode,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum InspectorKind {
    #[default]
    Markers,
    Command,
}

#[serde_as]
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Inspector {
    pub kind: InspectorKind,
    /// How many directory levels below the scanned one the marker inspector descends.
    pub max_depth: usize,
    pub cmd: Option<String>,
    pub args: Vec<String>,
    pub pass_env: Vec<String>,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub timeout_s: Duration,
    pub max_stdout_kb: usize,
}

impl Default for Inspector {
    fn default() -> Self {
        Self {
            kind: InspectorKind::Markers,
            max_depth: 1,
            cmd: None,
            args: Vec::new(),
            pass_env: Vec::new(),
            timeout_s: Duration::from_secs(30),
            max_stdout_kb: 4096,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)?;
        if path.extension().map(|e| e == "json").unwrap_or(false) {
            Ok(serde_json::from_str(&raw)?)
        } else {
            Ok(toml::from_str(&raw)?)
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.root.root_dir.is_dir() {
            anyhow::bail!("root_dir does not exist or is not a directory: {}", self.root.root_dir.display());
        }
        if self.auth.token.trim().is_empty() { anyhow::bail!("token must not be empty"); }
        let l = &self.limits;
        if l.global_rps == 0 || l.global_burst == 0 || l.token_rps == 0 || l.token_burst == 0 {
            anyhow::bail!("rate limits must be > 0");
        }
        if self.inspector.timeout_s.is_zero() { anyhow::bail!("inspector timeout_s must be > 0"); }
        if self.inspector.kind == InspectorKind::Command {
            if self.inspector.cmd.as_deref().map(str::trim).unwrap_or("").is_empty() {
                anyhow::bail!("inspector cmd is required when kind = \"command\"");
            }
            if self.inspector.max_stdout_kb == 0 { anyhow::bail!("max_stdout_kb must be > 0"); }
        }
        Ok(())
    }
}

pub fn canonical_root(root: &Path) -> anyhow::Result<PathBuf> {
    let c = dunce::canonicalize(root)?;
    Ok(c)
}
