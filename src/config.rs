use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use crate::cli::Cli;
use crate::paths::default_socket_path;

pub const DEFAULT_API_BASE: &str = "https://i.instagram.com/api/v1/";

#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub username: Option<String>,
    pub password: Option<String>,
    /// Items to keep queued ahead of the playback head.
    pub forward_target: usize,
    /// Items to keep behind the playback head before trimming.
    pub backward_target: usize,
    pub initial_fill: usize,
    pub fetch_count: usize,
    pub poll_interval: Duration,
    pub mpv_bin: PathBuf,
    pub socket_path: PathBuf,
    pub api_base: String,
}

impl Config {
    /// Process environment, with a `.env` file in the working directory
    /// filling in whatever is not already set.
    pub fn from_env() -> Result<Self> {
        load_dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        Ok(Self {
            username: non_empty("IGUSERNAME"),
            password: non_empty("IGPASSWORD"),
            forward_target: parse_count(&lookup, "REELS_FORWARD_TARGET", 12)?,
            backward_target: parse_count(&lookup, "REELS_BACKWARD_TARGET", 3)?,
            initial_fill: parse_count(&lookup, "REELS_INITIAL_FILL", 8)?,
            fetch_count: parse_count(&lookup, "REELS_FETCH_COUNT", 5)?,
            poll_interval: Duration::from_secs(parse_count(&lookup, "REELS_POLL_SECS", 10)? as u64),
            mpv_bin: non_empty("REELS_MPV_BIN")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("mpv")),
            socket_path: non_empty("REELS_MPV_SOCKET")
                .map(PathBuf::from)
                .unwrap_or_else(default_socket_path),
            api_base: non_empty("REELS_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
        })
    }

    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(forward) = cli.forward {
            self.forward_target = forward;
        }
        if let Some(backward) = cli.backward {
            self.backward_target = backward;
        }
        if let Some(initial) = cli.initial {
            self.initial_fill = initial;
        }
        if let Some(socket) = &cli.socket {
            self.socket_path = socket.clone();
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.forward_target == 0 {
            bail!("forward target must be at least 1");
        }
        if self.initial_fill == 0 {
            bail!("initial fill must be at least 1");
        }
        if self.fetch_count == 0 {
            bail!("fetch count must be at least 1");
        }
        if self.poll_interval.is_zero() {
            bail!("poll interval must be at least 1 second");
        }
        Ok(())
    }

    pub fn credentials(&self) -> Result<Credentials> {
        let username = self
            .username
            .clone()
            .context("IGUSERNAME is not set; export your account name first")?;
        let password = self
            .password
            .clone()
            .context("IGPASSWORD is not set; export your account password first")?;
        Ok(Credentials { username, password })
    }
}

fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(path) => tracing::debug!(path = %path.display(), "loaded environment file"),
        Err(err) if err.not_found() => {}
        Err(err) => tracing::warn!("ignoring unreadable .env file: {err}"),
    }
}

fn parse_count<F>(lookup: &F, key: &str, default: usize) -> Result<usize>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<usize>()
            .with_context(|| format!("{key} must be a non-negative integer, got '{raw}'")),
        _ => Ok(default),
    }
}
