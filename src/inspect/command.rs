use super::{InspectError, Project, ProjectInspector};
use crate::config::Config;
use async_trait::async_trait;
use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::{Duration, Instant},
};
use tokio::{io::AsyncReadExt, process::Command, time::timeout};

/// Delegates to an external program that prints a project description as JSON.
/// The scanned directory is passed as the last argument.
pub struct CommandInspector {
    program: PathBuf,
    args: Vec<String>,
    pass_env: Vec<String>,
    timeout: Duration,
    max_stdout_kb: usize,
}

impl CommandInspector {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let cmd = cfg
            .inspector
            .cmd
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("inspector cmd not configured"))?;
        Ok(Self {
            program: resolve_cmd(cmd)?,
            args: cfg.inspector.args.clone(),
            pass_env: cfg.inspector.pass_env.clone(),
            timeout: cfg.inspector.timeout_s,
            max_stdout_kb: cfg.inspector.max_stdout_kb,
        })
    }
}

fn resolve_cmd(cmd: &str) -> anyhow::Result<PathBuf> {
    let path = if cmd.contains('/') { PathBuf::from(cmd) } else { which::which(cmd)? };
    Ok(dunce::canonicalize(path)?)
}

#[async_trait]
impl ProjectInspector for CommandInspector {
    fn name(&self) -> &'static str { "command" }

    async fn scan(&self, path: &Path) -> Result<Project, InspectError> {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command.arg(path);
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        command.kill_on_drop(true);
        command.env_clear();
        for k in &self.pass_env {
            if let Ok(v) = std::env::var(k) {
                command.env(k, v);
            }
        }

        let start = Instant::now();
        let mut child = command.spawn()?;
        let mut stdout = child.stdout.take().ok_or_else(|| InspectError::Task("stdout not captured".into()))?;
        let mut stderr = child.stderr.take().ok_or_else(|| InspectError::Task("stderr not captured".into()))?;

        let max_bytes = self.max_stdout_kb * 1024;
        let run = async {
            let mut out = Vec::new();
            let mut err = Vec::new();
            let mut buf_out = [0u8; 8192];
            let mut buf_err = [0u8; 8192];
            let mut out_done = false;
            let mut err_done = false;
            while !(out_done && err_done) {
                tokio::select! {
                    r = stdout.read(&mut buf_out), if !out_done => {
                        let n = r?;
                        if n == 0 { out_done = true; continue; }
                        out.extend_from_slice(&buf_out[..n]);
                        if out.len() > max_bytes { return Err(InspectError::OutputTooLarge(self.max_stdout_kb)); }
                    }
                    r = stderr.read(&mut buf_err), if !err_done => {
                        let n = r?;
                        if n == 0 { err_done = true; continue; }
                        // stderr only feeds the error message
                        if err.len() < max_bytes { err.extend_from_slice(&buf_err[..n]); }
                    }
                }
            }
            let status = child.wait().await?;
            Ok::<_, InspectError>((status, out, err))
        };

        let (status, out, err) = match timeout(self.timeout, run).await {
            Ok(r) => r?,
            Err(_) => return Err(InspectError::Timeout(self.timeout.as_secs())),
        };
        tracing::debug!(
            program = %self.program.display(),
            path = %path.display(),
            duration_ms = start.elapsed().as_millis() as u64,
            stdout_len = out.len(),
            "inspector finished"
        );

        if !status.success() {
            return Err(InspectError::Exit {
                code: status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&err).trim().to_string(),
            });
        }
        Ok(serde_json::from_slice(&out)?)
    }
}
