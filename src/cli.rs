use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "reelstream",
    version,
    about = "Stream an endless reels feed into mpv"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Items to keep queued ahead of the playing reel
    #[arg(long, global = true)]
    pub forward: Option<usize>,

    /// Items to keep behind the playing reel before trimming
    #[arg(long, global = true)]
    pub backward: Option<usize>,

    /// Items to load before playback starts
    #[arg(long, global = true)]
    pub initial: Option<usize>,

    /// mpv IPC socket path
    #[arg(long, global = true)]
    pub socket: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Launch mpv and keep its playlist topped up (default)
    Watch,
    /// Print one page of reel URLs and exit
    Fetch {
        #[arg(long, default_value_t = 10)]
        count: usize,
    },
    /// Refresh and store the account session
    Login,
    /// Forget the stored account session
    Logout,
}
