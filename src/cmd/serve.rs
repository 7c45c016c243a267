//! Server commands: `repairdesk serve` and `repairdesk init-db`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use repairdesk::config::DeskConfig;
use repairdesk::desk::db::TicketDb;
use repairdesk::desk::server::{ServerConfig, start_server};

pub async fn cmd_serve(host: &str, port: u16, db_path: PathBuf, dev: bool) -> Result<()> {
    let desk = DeskConfig::from_env(db_path);
    start_server(
        ServerConfig {
            host: host.to_string(),
            port,
            dev_mode: dev,
        },
        desk,
    )
    .await
}

pub fn cmd_init_db(db_path: &Path) -> Result<()> {
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    TicketDb::new(db_path)?;
    println!("Ticket database initialized at {}", db_path.display());
    Ok(())
}
