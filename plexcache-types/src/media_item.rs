use crate::episode::EpisodeInfo;
use serde::{Deserialize, Serialize};

/// One entry in a user's "up next" queue, as handed in by the (out of
/// scope) media-server adapter. The core never talks to the media
/// server directly; it only consumes these opaque records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnDeckItem {
    pub user: String,
    pub plex_path: String,
    pub rating_key: String,
    #[serde(default)]
    pub episode_info: Option<EpisodeInfo>,
    /// True when this item is the user's current OnDeck position, as
    /// opposed to a prefetched successor fetched for read-ahead.
    pub is_current_ondeck: bool,
}

/// One entry in a user's watchlist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchlistItem {
    pub user: String,
    pub plex_path: String,
    pub rating_key: String,
    /// The media server's own timestamp for when this was added, when
    /// available; `spec.md` §3 says fall back to `now()` otherwise,
    /// which is the caller's responsibility, not this record's.
    #[serde(default)]
    pub watchlisted_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub episode_info: Option<EpisodeInfo>,
}
