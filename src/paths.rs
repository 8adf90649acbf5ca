use std::path::PathBuf;

use anyhow::{Context, Result};

pub fn session_db_path() -> Result<PathBuf> {
    let base = dirs::data_dir().context("unable to resolve data directory")?;
    Ok(base.join("reelstream").join("session.db"))
}

pub fn default_socket_path() -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("reelstream-mpv.sock")
}
