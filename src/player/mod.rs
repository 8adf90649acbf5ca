mod mpv;
mod process;

use std::io;

use thiserror::Error;

pub(crate) use process::launch_player;

#[derive(Debug, Error)]
pub(crate) enum SinkError {
    #[error("player control channel timed out")]
    Timeout,
    #[error("player control channel io: {0}")]
    Io(io::Error),
    #[error("player rejected command: {0}")]
    Rejected(String),
    #[error("unexpected player response: {0}")]
    Protocol(String),
}

impl From<io::Error> for SinkError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => SinkError::Timeout,
            _ => SinkError::Io(err),
        }
    }
}

/// The player's playlist as seen by the buffer loop.
pub(crate) trait PlaybackSink {
    fn enqueue(&mut self, url: &str) -> Result<(), SinkError>;

    fn dequeue_first(&mut self) -> Result<(), SinkError>;

    fn playlist_length(&mut self) -> Result<usize, SinkError>;

    /// Zero-based index of the playing entry. `None` while the player is
    /// idle: an empty playlist, or playback ran past the last entry.
    fn playback_position(&mut self) -> Result<Option<usize>, SinkError>;
}
