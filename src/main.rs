mod config;
mod errors;
mod inspect;
mod logging;
mod paths;
mod security;
mod server;
#[cfg(test)]
mod tests;

use crate::config::Config;
use anyhow::Context;
use std::path::PathBuf;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let args: Vec<String> = std::env::args().collect();
    let mut config_path = PathBuf::from("projscan.toml");
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                if i >= args.len() { eprintln!("--config requires a path"); std::process::exit(2); }
                config_path = PathBuf::from(&args[i]);
            }
            _ => {}
        }
        i += 1;
    }

    let cfg = Config::load(&config_path).context("loading config")?;
    cfg.validate().context("validating config")?;

    let addr = format!("{}:{}", cfg.server.bind_addr, cfg.server.port);
    let inspector = inspect::from_config(&cfg).context("building inspector")?;
    let state = server::AppState::new(cfg, inspector).context("canonicalizing root_dir")?;

    info!(
        addr = %addr,
        base_path = %state.cfg.server.base_path,
        root = %state.root.display(),
        inspector = state.inspector.name(),
        response = ?state.cfg.scan.response,
        "projscan ready"
    );
    println!("projscan ready addr={} root={}", addr, state.root.display());

    server::serve(state).await
}
