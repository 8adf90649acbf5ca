//! Remote reels feed: the `ContentSource` seam the buffer loop pulls from and
//! its Instagram private-API implementation.

mod feed;
mod instagram;

use std::fmt;

use thiserror::Error;

pub(crate) use instagram::InstagramClient;

/// Pagination token for the reels feed. `Start` asks the source to serve
/// the feed from the top.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub(crate) enum Cursor {
    #[default]
    Start,
    After(String),
}

impl Cursor {
    pub(crate) fn max_id(&self) -> Option<&str> {
        match self {
            Cursor::Start => None,
            Cursor::After(id) => Some(id.as_str()),
        }
    }

    pub(crate) fn is_start(&self) -> bool {
        matches!(self, Cursor::Start)
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cursor::Start => write!(f, "0"),
            Cursor::After(id) => write!(f, "{id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Page {
    /// Playable URLs in feed order.
    pub(crate) urls: Vec<String>,
    pub(crate) next_cursor: Cursor,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub(crate) enum SourceError {
    #[error("session expired, login required")]
    AuthRequired,
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("fetch failed: {0}")]
    Fetch(String),
}

pub(crate) trait ContentSource {
    fn fetch_page(&mut self, cursor: &Cursor, count: usize) -> Result<Page, SourceError>;

    fn reauthenticate(&mut self) -> Result<(), SourceError>;
}
